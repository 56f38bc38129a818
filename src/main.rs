extern crate bulkmail;
extern crate dotenv;
#[macro_use]
extern crate failure;
#[cfg(not(debug_assertions))]
#[macro_use]
extern crate human_panic;
#[macro_use]
extern crate log;
#[macro_use]
extern crate structopt;
extern crate syslog;
extern crate tokio;
extern crate url;
extern crate warp;

use std::fs;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::process::exit;
use std::sync::Arc;

use bulkmail::{
    bounce::{process_bounce, DsnClassifier},
    lists, log_err, web, Dispatcher, EntityRef, Mailer, MemoryTransport, Registry, Renderer,
    SiteUrls, Transport, DB,
};
use failure::Error;
use structopt::StructOpt;
use url::Url;

fn main() {
    dotenv::dotenv().ok();
    let options = Options::from_args();
    options.setup_panic();
    options.start_logger();

    if let Err(err) = run(options) {
        log_err(err);
        exit(1);
    }
}

fn run(options: Options) -> Result<(), Error> {
    let db = DB::connect(&options.database_url)?;
    match options.command {
        Command::Migrate => {
            db.migrate()?;
            info!("Database is up to date");
        }
        Command::CreateJob {
            ref group,
            newsletter,
            ref campaign,
        } => {
            let job = options.dispatcher(&db)?.create_job(group, newsletter, campaign)?;
            println!("{}", job.id);
        }
        Command::Send { job, dry_run } => {
            let dispatcher = options.dispatcher(&db)?;
            let report = if dry_run {
                dispatcher.send(job, &mut MemoryTransport::new())?
            } else {
                dispatcher.send(job, &mut options.mailer()?)?
            };
            println!("job {}: {} sent", report.job_id, report.sent);
            for skipped in &report.skipped {
                println!("  skipped mail {}: {:?}", skipped.mail_id, skipped.address);
            }
        }
        Command::Reset { job } => options.dispatcher(&db)?.reset_job(job)?,
        Command::DeleteJob { job } => options.dispatcher(&db)?.delete_job(job)?,
        Command::Status { job: Some(job) } => {
            let stats = options.dispatcher(&db)?.stats(job)?;
            println!(
                "job {}: {}\n  mails:   {}\n  sent:    {}\n  viewed:  {}\n  bounced: {}\n  clicks:  {}",
                job,
                db.get_job(job)?.status(),
                stats.total,
                stats.sent,
                stats.viewed,
                stats.bounced,
                stats.clicks
            );
        }
        Command::Status { job: None } => {
            for job in db.list_jobs()? {
                println!(
                    "{}\t{}\t{}\t{}",
                    job.id,
                    job.status(),
                    job.group(),
                    job.date_created
                );
            }
        }
        Command::Serve => {
            let addr = options.serve_addr()?;
            let renderer = options.renderer(&db)?;
            let routes = web::routes(db, Arc::new(renderer))?;
            info!("Serving on {}", addr);
            tokio::run(warp::serve(routes).bind(addr));
        }
        Command::Bounce { ref files } => {
            let urls = SiteUrls::new(options.base_url.clone());
            for path in files {
                let raw = fs::read(path)?;
                match process_bounce(&db, &urls, &DsnClassifier, &raw)? {
                    Some(processed) => match processed.mail {
                        Some(mail) => println!(
                            "{}: {:?} bounce of mail {}",
                            path.display(),
                            processed.bounce,
                            mail.id
                        ),
                        None => println!(
                            "{}: {:?} bounce, no mail",
                            path.display(),
                            processed.bounce
                        ),
                    },
                    None => println!("{}: not a bounce", path.display()),
                }
            }
        }
    }
    Ok(())
}

#[derive(Debug, StructOpt)]
#[structopt(raw(setting = "::structopt::clap::AppSettings::ColoredHelp"))]
struct Options {
    /// Turns off message output.
    #[structopt(short = "q", long = "quiet")]
    quiet: bool,

    /// Increases the verbosity. Default verbosity is errors and warnings.
    #[structopt(short = "v", long = "verbose", parse(from_occurrences))]
    verbose: usize,

    /// The base URL the tracking endpoints are served under.
    #[structopt(short = "b", long = "base-url", env = "BASE_URL")]
    base_url: Url,

    /// The path of the SQLite database.
    #[structopt(short = "d", long = "db", env = "DATABASE_URL")]
    database_url: String,

    /// The newsletter templates.
    #[structopt(
        short = "t",
        long = "templates",
        env = "TEMPLATES",
        default_value = "templates/**/*.html"
    )]
    templates: String,

    /// The host to serve on.
    #[structopt(short = "h", long = "host", env = "HOST", default_value = "::")]
    host: String,

    /// The port to serve on.
    #[structopt(short = "p", long = "port", env = "PORT", default_value = "8000")]
    port: u16,

    /// The SMTP server to use.
    #[structopt(long = "smtp-addr", env = "SMTP_ADDR", default_value = "smtp.gmail.com")]
    smtp_addr: String,

    /// The SMTP username to use.
    #[structopt(long = "smtp-user", env = "SMTP_USER")]
    smtp_user: Option<String>,

    /// The SMTP password to use.
    #[structopt(long = "smtp-pass", env = "SMTP_PASS")]
    smtp_pass: Option<String>,

    /// The syslog server to send logs to.
    #[structopt(short = "s", long = "syslog-server", env = "SYSLOG_SERVER")]
    syslog_server: Option<String>,

    #[structopt(subcommand)]
    command: Command,
}

#[derive(Debug, StructOpt)]
enum Command {
    /// Creates any missing database tables.
    #[structopt(name = "migrate")]
    Migrate,

    /// Creates a draft job with one mail per recipient, and prints its ID.
    #[structopt(name = "create-job")]
    CreateJob {
        /// The group object to send to, as kind:id (e.g. mailing_list:1).
        #[structopt(short = "g", long = "group")]
        group: EntityRef,

        /// The newsletter to send.
        #[structopt(short = "n", long = "newsletter")]
        newsletter: Option<i32>,

        /// The utm_campaign of the job's links.
        #[structopt(short = "c", long = "campaign", default_value = "")]
        campaign: String,
    },

    /// Sends a job, or resumes one that failed.
    #[structopt(name = "send")]
    Send {
        job: i32,

        /// Renders every mail without sending anything.
        #[structopt(long = "dry-run")]
        dry_run: bool,
    },

    /// Moves a job stuck in sending to error, so it can be resumed.
    #[structopt(name = "reset")]
    Reset { job: i32 },

    /// Deletes a job, its mails, its links and its snapshot.
    #[structopt(name = "delete-job")]
    DeleteJob { job: i32 },

    /// Shows every job, or the counters of one.
    #[structopt(name = "status")]
    Status { job: Option<i32> },

    /// Serves the tracking endpoints.
    #[structopt(name = "serve")]
    Serve,

    /// Marks the mails that raw bounce messages are about as bounced.
    #[structopt(name = "bounce")]
    Bounce {
        #[structopt(parse(from_os_str))]
        files: Vec<PathBuf>,
    },
}

impl Options {
    fn renderer(&self, db: &DB) -> Result<Renderer, Error> {
        let mut registry = Registry::new();
        lists::register(&mut registry, db);
        let urls = SiteUrls::new(self.base_url.clone());
        Ok(Renderer::from_glob(&self.templates, urls, Arc::new(registry))?)
    }

    fn dispatcher(&self, db: &DB) -> Result<Dispatcher, Error> {
        let renderer = self.renderer(db)?;
        Ok(Dispatcher::new(db.clone(), Arc::new(renderer)))
    }

    fn mailer(&self) -> Result<impl Transport, Error> {
        match (&self.smtp_user, &self.smtp_pass) {
            (&Some(ref user), &Some(ref pass)) => Ok(Mailer::new(
                self.smtp_addr.clone(),
                user.clone(),
                pass.clone(),
            )),
            _ => bail!("Sending needs --smtp-user and --smtp-pass (or --dry-run)"),
        }
    }

    /// Get the address to serve on.
    fn serve_addr(&self) -> Result<SocketAddr, Error> {
        let addrs = (&self.host as &str, self.port)
            .to_socket_addrs()?
            .collect::<Vec<_>>();
        if addrs.is_empty() {
            bail!("No matching address exists")
        } else {
            Ok(addrs[0])
        }
    }

    /// Sets up the panic handler.
    #[cfg(debug_assertions)]
    fn setup_panic(&self) {}

    /// Sets up the panic handler.
    #[cfg(not(debug_assertions))]
    fn setup_panic(&self) {
        if self.verbose == 0 {
            setup_panic!();
        }
    }

    /// Sets up logging as specified by the `-q`, `-s`, and `-v` flags.
    fn start_logger(&self) {
        if !self.quiet {
            let log_level = match self.verbose {
                0 => log::LevelFilter::Warn,
                1 => log::LevelFilter::Info,
                2 => log::LevelFilter::Debug,
                _ => log::LevelFilter::Trace,
            };

            let r = if let Some(ref server) = self.syslog_server {
                syslog::init_tcp(
                    server,
                    "bulkmail".to_string(),
                    syslog::Facility::LOG_DAEMON,
                    log_level,
                )
            } else {
                syslog::init(syslog::Facility::LOG_DAEMON, log_level, Some("bulkmail"))
            };

            if let Err(err) = r {
                error!("Warning: logging couldn't start: {}", err);
            }
        }
    }
}
