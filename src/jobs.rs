//! The lifecycle of a job: creation, sending, retrying and deletion.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use db;
use delivery::{self, CancelToken, DeliveryReport};
use links::LinkRewriter;
use mailer::Transport;
use models::{EntityRef, Job, JobStats, JobStatus, NewJob, NewMail};
use recipients::Registry;
use render::Renderer;
use snapshot::create_snapshot;
use {ErrorKind, Result, DB};

/// The jobs being delivered by this process.
#[derive(Clone, Debug, Default)]
pub struct JobLocks {
    running: Arc<Mutex<HashSet<i32>>>,
}

impl JobLocks {
    /// Marks a job as being delivered until the returned guard is dropped. Fails with `JobBusy`
    /// if it already is.
    pub fn acquire(&self, job_id: i32) -> Result<JobGuard> {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if running.insert(job_id) {
            Ok(JobGuard {
                locks: self.clone(),
                job_id,
            })
        } else {
            Err(ErrorKind::JobBusy(job_id).into())
        }
    }
}

/// Releases a job when dropped.
#[derive(Debug)]
pub struct JobGuard {
    locks: JobLocks,
    job_id: i32,
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        let mut running = self.locks.running.lock().unwrap_or_else(|e| e.into_inner());
        running.remove(&self.job_id);
    }
}

/// Creates and delivers jobs.
pub struct Dispatcher {
    db: DB,
    renderer: Arc<Renderer>,
    links: LinkRewriter,
    locks: JobLocks,
}

impl Dispatcher {
    pub fn new(db: DB, renderer: Arc<Renderer>) -> Dispatcher {
        let links = LinkRewriter::new(renderer.urls().clone());
        Dispatcher {
            db,
            renderer,
            links,
            locks: JobLocks::default(),
        }
    }

    pub fn db(&self) -> &DB {
        &self.db
    }

    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    fn registry(&self) -> &Registry {
        self.renderer.registry()
    }

    /// Creates a draft job for the recipients of a group object, with one mail per recipient.
    /// The newsletter, if given, must be a live (active) one.
    pub fn create_job(
        &self,
        group: &EntityRef,
        newsletter_id: Option<i32>,
        utm_campaign: &str,
    ) -> Result<Job> {
        if let Some(id) = newsletter_id {
            self.check_assignable(id)?;
        }
        let recipients = self.recipient_refs(group)?;

        let job = self.db.transaction(|conn| {
            let job = db::insert_job(conn, &NewJob::new(group, newsletter_id, utm_campaign))?;
            insert_mails(conn, job.id, &recipients)?;
            Ok(job)
        })?;
        info!(
            "Created job {} for {} with {} mail(s)",
            job.id,
            group,
            recipients.len()
        );
        Ok(job)
    }

    /// Creates the mails of a job that has none yet, one per recipient of its group object.
    /// Returns how many were created.
    pub fn create_mails(&self, job_id: i32) -> Result<usize> {
        let job = self.db.get_job(job_id)?;
        let recipients = self.recipient_refs(&job.group())?;
        self.db.transaction(|conn| {
            if db::mail_count(conn, job_id)? > 0 {
                return Err(ErrorKind::InvalidJobState(format!(
                    "job {} already has its mails",
                    job_id
                ))
                .into());
            }
            insert_mails(conn, job_id, &recipients)
        })
    }

    fn recipient_refs(&self, group: &EntityRef) -> Result<Vec<EntityRef>> {
        let source = self.registry().source(group)?;
        Ok(source
            .recipients()?
            .iter()
            .map(|recipient| recipient.reference())
            .collect())
    }

    fn check_assignable(&self, newsletter_id: i32) -> Result<()> {
        let newsletter = self
            .db
            .get_newsletter(newsletter_id)?
            .ok_or_else(|| ErrorKind::NotFound("Newsletter", newsletter_id.to_string()))?;
        if newsletter.active {
            Ok(())
        } else {
            Err(ErrorKind::InvalidJobState(format!(
                "newsletter {} is a snapshot, not a live newsletter",
                newsletter_id
            ))
            .into())
        }
    }

    /// Chooses the newsletter of a draft job.
    pub fn assign_newsletter(&self, job_id: i32, newsletter_id: i32) -> Result<Job> {
        let job = self.db.get_job(job_id)?;
        if job.status() != JobStatus::Draft {
            return Err(ErrorKind::InvalidJobState(format!(
                "job {} is {}, only drafts can change their newsletter",
                job_id,
                job.status()
            ))
            .into());
        }
        self.check_assignable(newsletter_id)?;
        self.db.set_job_newsletter(job_id, newsletter_id)?;
        self.db.get_job(job_id)
    }

    /// Whether the job may be sent right now.
    pub fn can_send(&self, job_id: i32) -> Result<bool> {
        let job = self.db.get_job(job_id)?;
        let newsletter = match job.newsletter_id {
            Some(id) => self.db.get_newsletter(id)?,
            None => None,
        };
        Ok(job.can_send(newsletter.as_ref()))
    }

    /// Delivers a job. See `send_cancellable`.
    pub fn send(&self, job_id: i32, transport: &mut dyn Transport) -> Result<DeliveryReport> {
        self.send_cancellable(job_id, transport, &CancelToken::new())
    }

    /// Delivers a draft job, or resumes a failed one.
    ///
    /// The job is first frozen and claimed in one transaction: its newsletter is replaced by a
    /// snapshot whose links are rewritten, and the job moves to `Sending`. Then every mail that
    /// hasn't been sent yet is sent. A job that fails from there on ends in `Error` and can be
    /// sent again; it then reuses its snapshot and only sends what's left.
    pub fn send_cancellable(
        &self,
        job_id: i32,
        transport: &mut dyn Transport,
        cancel: &CancelToken,
    ) -> Result<DeliveryReport> {
        let _guard = self.locks.acquire(job_id)?;
        let job = self.claim(job_id)?;
        info!("Job {} is sending newsletter {:?}", job.id, job.newsletter_id);

        let result = self
            .renderer
            .load(&self.db, &job)
            .and_then(|ctx| delivery::deliver(&self.db, &self.renderer, &ctx, transport, cancel))
            .and_then(|report| {
                self.db.finish_job(job_id)?;
                Ok(report)
            });
        match result {
            Ok(report) => {
                info!("Job {} finished", job_id);
                Ok(report)
            }
            Err(err) => {
                error!("Job {} failed: {}", job_id, err);
                if let Err(status_err) = self.db.set_job_status(job_id, JobStatus::Error) {
                    error!("Job {} couldn't be marked as failed: {}", job_id, status_err);
                }
                Err(err)
            }
        }
    }

    /// Freezes the newsletter, rewrites its links and moves the job to `Sending`, atomically.
    fn claim(&self, job_id: i32) -> Result<Job> {
        self.db.transaction(|conn| {
            let job = db::get_job(conn, job_id)?;
            let newsletter = match job.newsletter_id {
                Some(id) => db::get_newsletter(conn, id)?,
                None => None,
            };
            let newsletter = match newsletter {
                Some(ref newsletter) if job.can_send(Some(newsletter)) => newsletter.clone(),
                _ => {
                    return Err(ErrorKind::InvalidJobState(format!(
                        "job {} can't be sent: it is {} and its newsletter is {}",
                        job_id,
                        job.status(),
                        if newsletter.is_some() { "invalid" } else { "missing" }
                    ))
                    .into())
                }
            };

            let newsletter_id = if job.status() == JobStatus::Error && !newsletter.active {
                debug!("Job {} resumes with snapshot {}", job_id, newsletter.id);
                newsletter.id
            } else {
                let snapshot = create_snapshot(conn, &newsletter)?;
                self.links.replace_links(conn, &snapshot, &job)?;
                snapshot.id()
            };

            if !db::claim_job(conn, job_id, newsletter_id)? {
                return Err(ErrorKind::InvalidJobState(format!(
                    "job {} was claimed by someone else",
                    job_id
                ))
                .into());
            }
            db::get_job(conn, job_id)
        })
    }

    /// Moves a job stuck in `Sending` (say, after a crash) to `Error`, so it can be resumed.
    pub fn reset_job(&self, job_id: i32) -> Result<()> {
        let _guard = self.locks.acquire(job_id)?;
        let job = self.db.get_job(job_id)?;
        if job.status() != JobStatus::Sending {
            return Err(ErrorKind::InvalidJobState(format!(
                "job {} is {}, not sending",
                job_id,
                job.status()
            ))
            .into());
        }
        self.db.set_job_status(job_id, JobStatus::Error)?;
        warn!("Job {} was reset to error", job_id);
        Ok(())
    }

    /// Deletes a job, its mails and links, and its snapshot.
    pub fn delete_job(&self, job_id: i32) -> Result<()> {
        let _guard = self.locks.acquire(job_id)?;
        self.db.delete_job(job_id)?;
        info!("Deleted job {}", job_id);
        Ok(())
    }

    pub fn stats(&self, job_id: i32) -> Result<JobStats> {
        self.db.get_job(job_id)?;
        self.db.job_stats(job_id)
    }
}

fn insert_mails(
    conn: &::diesel::sqlite::SqliteConnection,
    job_id: i32,
    recipients: &[EntityRef],
) -> Result<usize> {
    let mails = recipients
        .iter()
        .map(|person| NewMail::new(job_id, person))
        .collect::<Vec<_>>();
    db::insert_mails(conn, &mails)
}
