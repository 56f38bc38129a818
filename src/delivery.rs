//! Sending the unsent mails of a job over one transport connection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use mailer::Transport;
use render::{JobContext, Renderer};
use {ErrorKind, Result, DB};

/// Asks a running delivery to stop. Checked between two mails, never during one.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> CancelToken {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A mail that was left unsent because it couldn't be addressed.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SkippedMail {
    pub mail_id: i32,
    pub address: String,
}

/// What a delivery run did.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct DeliveryReport {
    pub job_id: i32,
    /// The number of mails the transport accepted in this run.
    pub sent: usize,
    pub skipped: Vec<SkippedMail>,
}

/// Sends every unsent mail of the job, marking each one sent as soon as the transport accepts
/// it. The transport is opened once and closed again on the way out, whatever happened.
///
/// Mails whose recipient address is invalid are skipped and reported; any other error ends the
/// run, leaving the remaining mails unsent.
pub fn deliver(
    db: &DB,
    renderer: &Renderer,
    ctx: &JobContext,
    transport: &mut dyn Transport,
    cancel: &CancelToken,
) -> Result<DeliveryReport> {
    transport.open()?;
    let result = send_unsent(db, renderer, ctx, transport, cancel);
    let closed = transport.close();
    let report = result?;
    closed?;

    if report.skipped.is_empty() {
        info!("Job {}: sent {} mail(s)", report.job_id, report.sent);
    } else {
        warn!(
            "Job {}: sent {} mail(s), skipped {} with invalid addresses",
            report.job_id,
            report.sent,
            report.skipped.len()
        );
    }
    Ok(report)
}

fn send_unsent(
    db: &DB,
    renderer: &Renderer,
    ctx: &JobContext,
    transport: &mut dyn Transport,
    cancel: &CancelToken,
) -> Result<DeliveryReport> {
    let job_id = ctx.job.id;
    let mut report = DeliveryReport {
        job_id,
        ..DeliveryReport::default()
    };

    for mail in db.unsent_mails(job_id)? {
        if cancel.is_cancelled() {
            warn!("Job {}: cancelled after {} mail(s)", job_id, report.sent);
            return Err(ErrorKind::Cancelled(job_id).into());
        }

        let message = match renderer.get_message(ctx, &mail) {
            Ok(message) => message,
            Err(err) => {
                if let ErrorKind::InvalidRecipientAddress(ref address) = *err.kind() {
                    warn!(
                        "Job {}: not sending mail {} to invalid address {:?}",
                        job_id, mail.id, address
                    );
                    report.skipped.push(SkippedMail {
                        mail_id: mail.id,
                        address: address.clone(),
                    });
                    continue;
                }
                return Err(err);
            }
        };

        transport.send(&message)?;
        db.mark_sent(mail.id)?;
        report.sent += 1;
        debug!("Job {}: sent mail {} to {}", job_id, mail.id, message.to);
    }
    Ok(report)
}
