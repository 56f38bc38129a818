//! The database and related types.

pub mod schema;

use std::collections::HashSet;
use std::sync::Arc;

use diesel::{
    self,
    connection::SimpleConnection,
    prelude::*,
    r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection},
};

use db::schema::{
    content_blocks, jobs, links, mail_unsubscribes, mailing_lists, mails, newsletters, senders,
    subscribers,
};
use models::{
    ContentBlock, Job, JobStats, JobStatus, Link, Mail, MailingList, NewContentBlock, NewJob,
    NewMail, NewSender, Newsletter, NewsletterForm, Sender, Subscriber,
};
use {ErrorKind, Result};

no_arg_sql_function!(
    last_insert_rowid,
    diesel::sql_types::Integer,
    "The rowid of the last row inserted on this connection."
);

/// A connection checked out of the pool.
pub type Conn = PooledConnection<ConnectionManager<SqliteConnection>>;

/// Sets up every connection the pool opens.
#[derive(Debug)]
struct Pragmas;

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for Pragmas {
    fn on_acquire(
        &self,
        conn: &mut SqliteConnection,
    ) -> ::std::result::Result<(), diesel::r2d2::Error> {
        conn.batch_execute("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")
            .map_err(diesel::r2d2::Error::QueryError)
    }
}

/// A pool of connections to the database.
#[derive(Clone)]
pub struct DB {
    pool: Arc<Pool<ConnectionManager<SqliteConnection>>>,
}

impl DB {
    /// Connects to the SQLite database at the given path. `:memory:` gives a private database
    /// that lives as long as the returned `DB` (and its clones).
    pub fn connect(database_url: &str) -> Result<DB> {
        let manager = ConnectionManager::new(database_url);
        let builder = Pool::<ConnectionManager<SqliteConnection>>::builder()
            .connection_customizer(Box::new(Pragmas));
        let pool = if database_url == ":memory:" {
            // Every connection would be a different database, so there must only ever be one.
            builder
                .max_size(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .build(manager)?
        } else {
            builder.build(manager)?
        };
        Ok(DB {
            pool: Arc::new(pool),
        })
    }

    /// Connects to a fresh in-memory database with the schema already created.
    pub fn in_memory() -> Result<DB> {
        let db = DB::connect(":memory:")?;
        db.migrate()?;
        Ok(db)
    }

    /// Creates any missing tables.
    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.batch_execute(include_str!("schema.sql"))?;
        Ok(())
    }

    /// Checks a connection out of the pool.
    pub fn conn(&self) -> Result<Conn> {
        Ok(self.pool.get()?)
    }

    /// Runs `func` inside a transaction, which is committed iff `func` succeeds.
    pub fn transaction<T, F>(&self, func: F) -> Result<T>
    where
        F: FnOnce(&SqliteConnection) -> Result<T>,
    {
        let conn = self.conn()?;
        conn.transaction(|| func(&conn))
    }

    /// Creates a new sender.
    pub fn new_sender(&self, email: &str, name: &str) -> Result<Sender> {
        let conn = self.conn()?;
        diesel::insert_into(senders::table)
            .values(&NewSender {
                email: email.to_string(),
                name: name.to_string(),
            })
            .execute(&*conn)?;
        let id = last_id(&conn)?;
        get_sender(&conn, id)
    }

    /// Gets a sender by ID.
    pub fn get_sender(&self, id: i32) -> Result<Sender> {
        get_sender(&*self.conn()?, id)
    }

    /// Creates a new newsletter.
    pub fn new_newsletter(&self, form: &NewsletterForm) -> Result<Newsletter> {
        insert_newsletter(&*self.conn()?, form)
    }

    /// Gets a newsletter by ID.
    pub fn get_newsletter(&self, id: i32) -> Result<Option<Newsletter>> {
        get_newsletter(&*self.conn()?, id)
    }

    /// Overwrites the fields of a newsletter.
    pub fn update_newsletter(&self, id: i32, form: &NewsletterForm) -> Result<()> {
        diesel::update(newsletters::table.find(id))
            .set(form)
            .execute(&*self.conn()?)?;
        Ok(())
    }

    /// Adds a content block to a newsletter.
    pub fn add_content_block(&self, block: &NewContentBlock) -> Result<ContentBlock> {
        insert_content_block(&*self.conn()?, block)
    }

    /// Returns the content blocks of a newsletter, in order.
    pub fn content_blocks(&self, newsletter_id: i32) -> Result<Vec<ContentBlock>> {
        content_blocks_of(&*self.conn()?, newsletter_id)
    }

    /// Sets the body of a content block.
    pub fn set_block_body(&self, id: i32, body: &str) -> Result<()> {
        set_block_body(&*self.conn()?, id, body)
    }

    /// Gets a job by ID.
    pub fn get_job(&self, id: i32) -> Result<Job> {
        get_job(&*self.conn()?, id)
    }

    /// Returns every job, oldest first.
    pub fn list_jobs(&self) -> Result<Vec<Job>> {
        let jobs = jobs::table
            .order((jobs::date_created.asc(), jobs::id.asc()))
            .load(&*self.conn()?)?;
        Ok(jobs)
    }

    /// Sets the status of a job. This is how a job in `Sending` is moved to `Error`, and how an
    /// operator can force a stuck job back to a sendable state.
    pub fn set_job_status(&self, id: i32, status: JobStatus) -> Result<()> {
        diesel::update(jobs::table.find(id))
            .set(jobs::status.eq(status.code()))
            .execute(&*self.conn()?)?;
        Ok(())
    }

    /// Points a job at another newsletter.
    pub fn set_job_newsletter(&self, id: i32, newsletter_id: i32) -> Result<()> {
        diesel::update(jobs::table.find(id))
            .set(jobs::newsletter_id.eq(Some(newsletter_id)))
            .execute(&*self.conn()?)?;
        Ok(())
    }

    /// Deletes a job with its mails and links. If the job's newsletter is an inactive snapshot no
    /// other job refers to, it goes too, content blocks and all.
    pub fn delete_job(&self, id: i32) -> Result<()> {
        self.transaction(|conn| {
            let job = get_job(conn, id)?;
            diesel::delete(mails::table.filter(mails::job_id.eq(id))).execute(conn)?;
            diesel::delete(links::table.filter(links::job_id.eq(id))).execute(conn)?;
            diesel::delete(jobs::table.find(id)).execute(conn)?;

            let newsletter = match job.newsletter_id {
                Some(newsletter_id) => get_newsletter(conn, newsletter_id)?,
                None => None,
            };
            if let Some(newsletter) = newsletter {
                let users = jobs::table
                    .filter(jobs::newsletter_id.eq(newsletter.id))
                    .count()
                    .get_result::<i64>(conn)?;
                if !newsletter.active && users == 0 {
                    let blocks = content_blocks::table
                        .filter(content_blocks::newsletter_id.eq(newsletter.id));
                    diesel::delete(blocks).execute(conn)?;
                    diesel::delete(newsletters::table.find(newsletter.id)).execute(conn)?;
                }
            }
            Ok(())
        })
    }

    /// Marks a job as finished, now.
    pub fn finish_job(&self, id: i32) -> Result<()> {
        let now = ::chrono::Utc::now().naive_utc();
        diesel::update(jobs::table.find(id))
            .set((
                jobs::status.eq(JobStatus::Finished.code()),
                jobs::date_deliver_finished.eq(Some(now)),
            ))
            .execute(&*self.conn()?)?;
        Ok(())
    }

    /// Counts the mails, views, bounces and clicks of a job.
    pub fn job_stats(&self, job_id: i32) -> Result<JobStats> {
        let conn = self.conn()?;
        let of_job = || mails::table.filter(mails::job_id.eq(job_id));
        let total = of_job().count().get_result::<i64>(&*conn)?;
        let sent = of_job().filter(mails::sent.eq(true)).count().get_result::<i64>(&*conn)?;
        let viewed = of_job().filter(mails::viewed.eq(true)).count().get_result::<i64>(&*conn)?;
        let bounced = of_job().filter(mails::bounced.eq(true)).count().get_result::<i64>(&*conn)?;
        let clicks = links::table
            .filter(links::job_id.eq(job_id))
            .select(links::click_count)
            .load::<i32>(&*conn)?
            .into_iter()
            .map(i64::from)
            .sum::<i64>();
        Ok(JobStats {
            total,
            sent,
            viewed,
            bounced,
            clicks,
        })
    }

    /// Returns every mail of a job.
    pub fn mails(&self, job_id: i32) -> Result<Vec<Mail>> {
        let mails = mails::table
            .filter(mails::job_id.eq(job_id))
            .order(mails::id.asc())
            .load(&*self.conn()?)?;
        Ok(mails)
    }

    /// Returns the mails of a job that haven't been sent yet.
    pub fn unsent_mails(&self, job_id: i32) -> Result<Vec<Mail>> {
        let mails = mails::table
            .filter(mails::job_id.eq(job_id))
            .filter(mails::sent.eq(false))
            .order(mails::id.asc())
            .load(&*self.conn()?)?;
        Ok(mails)
    }

    /// Gets a mail by ID.
    pub fn get_mail(&self, id: i32) -> Result<Mail> {
        mails::table
            .find(id)
            .first(&*self.conn()?)
            .optional()?
            .ok_or_else(|| ErrorKind::NotFound("Mail", id.to_string()).into())
    }

    /// Gets a mail by its hash.
    pub fn mail_by_hash(&self, hash: &str) -> Result<Option<Mail>> {
        let mail = mails::table
            .filter(mails::hash.eq(hash))
            .first(&*self.conn()?)
            .optional()?;
        Ok(mail)
    }

    /// Marks a mail (by ID) as sent.
    pub fn mark_sent(&self, id: i32) -> Result<()> {
        diesel::update(mails::table.find(id))
            .set(mails::sent.eq(true))
            .execute(&*self.conn()?)?;
        Ok(())
    }

    /// Marks a mail (by hash) as viewed. Returns whether the mail exists.
    pub fn mark_viewed(&self, hash: &str) -> Result<bool> {
        let n = diesel::update(mails::table.filter(mails::hash.eq(hash)))
            .set(mails::viewed.eq(true))
            .execute(&*self.conn()?)?;
        Ok(n > 0)
    }

    /// Marks a mail (by hash) as bounced. Returns whether the mail exists.
    pub fn mark_bounced(&self, hash: &str) -> Result<bool> {
        let n = diesel::update(mails::table.filter(mails::hash.eq(hash)))
            .set(mails::bounced.eq(true))
            .execute(&*self.conn()?)?;
        Ok(n > 0)
    }

    /// Returns the links of a job.
    pub fn links(&self, job_id: i32) -> Result<Vec<Link>> {
        let links = links::table
            .filter(links::job_id.eq(job_id))
            .order(links::id.asc())
            .load(&*self.conn()?)?;
        Ok(links)
    }

    /// Gets a link by its hash.
    pub fn link_by_hash(&self, hash: &str) -> Result<Option<Link>> {
        let link = links::table
            .filter(links::hash.eq(hash))
            .first(&*self.conn()?)
            .optional()?;
        Ok(link)
    }

    /// Counts a click on a link. A single statement, so concurrent clicks are never lost.
    pub fn record_click(&self, link_id: i32) -> Result<()> {
        diesel::update(links::table.find(link_id))
            .set(links::click_count.eq(links::click_count + 1))
            .execute(&*self.conn()?)?;
        Ok(())
    }

    /// Creates a new mailing list with the given name.
    pub fn new_mailing_list(&self, name: &str) -> Result<MailingList> {
        let conn = self.conn()?;
        diesel::insert_into(mailing_lists::table)
            .values(mailing_lists::name.eq(name))
            .execute(&*conn)?;
        let id = last_id(&conn)?;
        Ok(mailing_lists::table.find(id).first(&*conn)?)
    }

    /// Gets a mailing list by ID.
    pub fn get_mailing_list(&self, id: i32) -> Result<Option<MailingList>> {
        let list = mailing_lists::table
            .find(id)
            .first(&*self.conn()?)
            .optional()?;
        Ok(list)
    }

    /// Adds a subscriber to a mailing list.
    pub fn add_subscriber(
        &self,
        mailing_list_id: i32,
        email: &str,
        name: &str,
    ) -> Result<Subscriber> {
        let conn = self.conn()?;
        diesel::insert_into(subscribers::table)
            .values((
                subscribers::mailing_list_id.eq(mailing_list_id),
                subscribers::email.eq(email),
                subscribers::name.eq(name),
            ))
            .execute(&*conn)?;
        let id = last_id(&conn)?;
        Ok(subscribers::table.find(id).first(&*conn)?)
    }

    /// Gets a subscriber by ID.
    pub fn get_subscriber(&self, id: i32) -> Result<Option<Subscriber>> {
        let subscriber = subscribers::table
            .find(id)
            .first(&*self.conn()?)
            .optional()?;
        Ok(subscriber)
    }

    /// Returns the subscribers of a mailing list, minus those who unsubscribed from it.
    pub fn subscribers(&self, mailing_list_id: i32) -> Result<Vec<Subscriber>> {
        let conn = self.conn()?;
        let unsubscribed = mail_unsubscribes::table
            .filter(mail_unsubscribes::mailing_list_id.eq(mailing_list_id))
            .select(mail_unsubscribes::email)
            .load::<String>(&*conn)?
            .into_iter()
            .collect::<HashSet<_>>();
        let subscribers = subscribers::table
            .filter(subscribers::mailing_list_id.eq(mailing_list_id))
            .order(subscribers::id.asc())
            .load::<Subscriber>(&*conn)?
            .into_iter()
            .filter(|s| !unsubscribed.contains(&s.email))
            .collect();
        Ok(subscribers)
    }

    /// Marks a user as having unsubscribed from the given mailing list.
    pub fn unsubscribe(&self, email: &str, mailing_list_id: i32) -> Result<()> {
        diesel::replace_into(mail_unsubscribes::table)
            .values((
                mail_unsubscribes::email.eq(email),
                mail_unsubscribes::mailing_list_id.eq(mailing_list_id),
            ))
            .execute(&*self.conn()?)?;
        Ok(())
    }
}

/// The ID of the row the last insert on this connection created.
pub fn last_id(conn: &SqliteConnection) -> Result<i32> {
    Ok(diesel::select(last_insert_rowid).get_result(conn)?)
}

pub fn get_sender(conn: &SqliteConnection, id: i32) -> Result<Sender> {
    senders::table
        .find(id)
        .first(conn)
        .optional()?
        .ok_or_else(|| ErrorKind::NotFound("Sender", id.to_string()).into())
}

pub fn get_newsletter(conn: &SqliteConnection, id: i32) -> Result<Option<Newsletter>> {
    Ok(newsletters::table.find(id).first(conn).optional()?)
}

pub fn insert_newsletter(conn: &SqliteConnection, form: &NewsletterForm) -> Result<Newsletter> {
    diesel::insert_into(newsletters::table)
        .values(form)
        .execute(conn)?;
    let id = last_id(conn)?;
    Ok(newsletters::table.find(id).first(conn)?)
}

pub fn content_blocks_of(conn: &SqliteConnection, newsletter_id: i32) -> Result<Vec<ContentBlock>> {
    let blocks = content_blocks::table
        .filter(content_blocks::newsletter_id.eq(newsletter_id))
        .order((content_blocks::position.asc(), content_blocks::id.asc()))
        .load(conn)?;
    Ok(blocks)
}

pub fn insert_content_block(
    conn: &SqliteConnection,
    block: &NewContentBlock,
) -> Result<ContentBlock> {
    diesel::insert_into(content_blocks::table)
        .values(block)
        .execute(conn)?;
    let id = last_id(conn)?;
    Ok(content_blocks::table.find(id).first(conn)?)
}

pub fn set_block_body(conn: &SqliteConnection, id: i32, body: &str) -> Result<()> {
    diesel::update(content_blocks::table.find(id))
        .set(content_blocks::body.eq(body))
        .execute(conn)?;
    Ok(())
}

pub fn get_job(conn: &SqliteConnection, id: i32) -> Result<Job> {
    jobs::table
        .find(id)
        .first(conn)
        .optional()?
        .ok_or_else(|| ErrorKind::NotFound("Job", id.to_string()).into())
}

pub fn insert_job(conn: &SqliteConnection, job: &NewJob) -> Result<Job> {
    diesel::insert_into(jobs::table).values(job).execute(conn)?;
    let id = last_id(conn)?;
    get_job(conn, id)
}

pub fn insert_mails(conn: &SqliteConnection, new_mails: &[NewMail]) -> Result<usize> {
    Ok(diesel::insert_into(mails::table).values(new_mails).execute(conn)?)
}

pub fn mail_count(conn: &SqliteConnection, job_id: i32) -> Result<i64> {
    Ok(mails::table
        .filter(mails::job_id.eq(job_id))
        .count()
        .get_result(conn)?)
}

/// Moves a job that may be sent into `Sending`, pointing it at the newsletter it will be sent
/// with. Only succeeds for a job that is still `Draft` or `Error` when the update runs, so of two
/// claimers at most one wins. Returns whether this one did.
pub fn claim_job(conn: &SqliteConnection, id: i32, newsletter_id: i32) -> Result<bool> {
    let sendable = JobStatus::ALL
        .iter()
        .filter(|status| status.is_sendable())
        .map(|status| status.code())
        .collect::<Vec<_>>();
    let now = ::chrono::Utc::now().naive_utc();
    let n = diesel::update(
        jobs::table
            .find(id)
            .filter(jobs::status.eq_any(sendable)),
    )
    .set((
        jobs::newsletter_id.eq(Some(newsletter_id)),
        jobs::status.eq(JobStatus::Sending.code()),
        jobs::date_deliver_start.eq(Some(now)),
    ))
    .execute(conn)?;
    Ok(n == 1)
}
