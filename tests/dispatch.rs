extern crate bulkmail;
extern crate diesel;
extern crate tera;

mod support;

use std::collections::HashSet;

use bulkmail::{
    hash, CancelToken, EntityRef, ErrorKind, JobStatus, MemoryTransport, Message, Result,
    Transport, DB,
};
use diesel::connection::SimpleConnection;

use support::{ping_hash, FailingTransport, Fixture};

const THREE: &[&str] = &["alice@example.com", "bob@example.com", "carol@example.com"];

#[test]
fn one_mail_per_recipient_with_unique_hashes() {
    let addresses = (0..25)
        .map(|i| format!("user{}@example.com", i))
        .collect::<Vec<_>>();
    let addresses = addresses.iter().map(|s| s.as_str()).collect::<Vec<_>>();
    let f = Fixture::new(&addresses);
    let job = f.job();

    let mails = f.db.mails(job).unwrap();
    assert_eq!(mails.len(), 25);
    let hashes = mails.iter().map(|m| m.hash.clone()).collect::<HashSet<_>>();
    assert_eq!(hashes.len(), 25);
    assert!(hashes.iter().all(|h| hash::is_well_formed(h)));
    assert!(mails.iter().all(|m| !m.sent && !m.viewed && !m.bounced));
    assert_eq!(f.db.get_job(job).unwrap().status(), JobStatus::Draft);
}

#[test]
fn hashes_survive_delivery() {
    let f = Fixture::new(THREE);
    let job = f.job();
    let before = f.db.mails(job).unwrap();

    let mut transport = MemoryTransport::new();
    f.dispatcher.send(job, &mut transport).unwrap();

    let after = f.db.mails(job).unwrap();
    for (before, after) in before.iter().zip(&after) {
        assert_eq!(before.id, after.id);
        assert_eq!(before.hash, after.hash);
    }
    let sent_hashes = transport
        .messages()
        .iter()
        .map(|m| ping_hash(&m.html))
        .collect::<Vec<_>>();
    let hashes = before.iter().map(|m| m.hash.clone()).collect::<Vec<_>>();
    assert_eq!(sent_hashes, hashes);
}

#[test]
fn drafts_are_sent_from_a_snapshot() {
    let f = Fixture::new(THREE);
    let job = f.job();
    assert!(f.dispatcher.can_send(job).unwrap());

    let mut transport = MemoryTransport::new();
    let report = f.dispatcher.send(job, &mut transport).unwrap();
    assert_eq!(report.sent, 3);
    assert!(report.skipped.is_empty());
    assert_eq!(transport.times_opened(), 1);
    assert!(!transport.is_open());

    let finished = f.db.get_job(job).unwrap();
    assert_eq!(finished.status(), JobStatus::Finished);
    assert!(finished.date_deliver_start.is_some());
    assert!(finished.date_deliver_finished.is_some());
    assert!(!f.dispatcher.can_send(job).unwrap());

    let snapshot_id = finished.newsletter_id.unwrap();
    assert_ne!(snapshot_id, f.newsletter.id);
    let snapshot = f.db.get_newsletter(snapshot_id).unwrap().unwrap();
    assert!(!snapshot.active);
    assert_eq!(snapshot.subject, f.newsletter.subject);

    let live = f.db.get_newsletter(f.newsletter.id).unwrap().unwrap();
    assert!(live.active);
    assert_eq!(f.db.content_blocks(live.id).unwrap()[0].body, support::BODY);

    let links = f.db.links(job).unwrap();
    let targets = links.iter().map(|l| l.target.as_str()).collect::<Vec<_>>();
    assert_eq!(targets, vec!["https://example.org/a", "https://example.org/b?x=1"]);

    for (message, mail) in transport.messages().iter().zip(f.db.mails(job).unwrap()) {
        assert!(mail.sent);
        assert_eq!(message.subject, "Weekly news");
        for link in &links {
            let redirect = format!("{}redirect/{}/{}", support::BASE_URL, mail.hash, link.hash);
            assert!(message.html.contains(&redirect), "{}", message.html);
        }
        assert!(!message.html.contains("https://example.org/"));
    }
    assert_eq!(transport.messages()[1].to, "bob@example.com");
    assert!(transport.messages()[1].html.contains("Dear bob,"));
}

#[test]
fn a_failed_send_stops_and_marks_the_job() {
    let f = Fixture::new(THREE);
    let job = f.job();

    let mut transport = FailingTransport::new(2);
    let err = f.dispatcher.send(job, &mut transport).unwrap_err();
    assert!(err.is_transport(), "{}", err);

    assert_eq!(f.db.get_job(job).unwrap().status(), JobStatus::Error);
    assert_eq!(f.sent_flags(job), vec![true, false, false]);
    assert_eq!(transport.sent.len(), 1);
    assert_eq!(transport.attempts, 2);
    assert!(!transport.open);
    assert_eq!(transport.closed, 1);
}

#[test]
fn retries_only_send_what_is_left() {
    let addresses = &[
        "a@example.com",
        "b@example.com",
        "c@example.com",
        "d@example.com",
        "e@example.com",
    ];
    let f = Fixture::new(addresses);
    let job = f.job();

    let mut failing = FailingTransport::new(3);
    f.dispatcher.send(job, &mut failing).unwrap_err();
    assert_eq!(f.sent_flags(job), vec![true, true, false, false, false]);
    let failed = f.db.get_job(job).unwrap();
    assert_eq!(failed.status(), JobStatus::Error);
    assert!(f.dispatcher.can_send(job).unwrap());

    let mut transport = MemoryTransport::new();
    let report = f.dispatcher.send(job, &mut transport).unwrap();
    assert_eq!(report.sent, 3);
    let resent = transport
        .messages()
        .iter()
        .map(|m| m.to.as_str())
        .collect::<Vec<_>>();
    assert_eq!(resent, vec!["c@example.com", "d@example.com", "e@example.com"]);

    let finished = f.db.get_job(job).unwrap();
    assert_eq!(finished.status(), JobStatus::Finished);
    assert_eq!(finished.newsletter_id, failed.newsletter_id);
    assert_eq!(f.db.links(job).unwrap().len(), 2);
    assert_eq!(f.dispatcher.stats(job).unwrap().sent, 5);
}

#[test]
fn finished_jobs_cannot_be_sent_again() {
    let f = Fixture::new(THREE);
    let job = f.job();
    f.dispatcher.send(job, &mut MemoryTransport::new()).unwrap();
    let before = f.db.get_job(job).unwrap();

    let mut transport = MemoryTransport::new();
    match *f.dispatcher.send(job, &mut transport).unwrap_err().kind() {
        ErrorKind::InvalidJobState(_) => {}
        ref kind => panic!("unexpected error: {}", kind),
    }
    assert_eq!(transport.times_opened(), 0);
    let after = f.db.get_job(job).unwrap();
    assert_eq!(after.status(), JobStatus::Finished);
    assert_eq!(after.newsletter_id, before.newsletter_id);
}

#[test]
fn newsletters_without_a_subject_cannot_be_sent() {
    let f = Fixture::with_newsletter(THREE, |form| form.subject = "   ".to_string());
    let job = f.job();
    assert!(!f.dispatcher.can_send(job).unwrap());

    match *f
        .dispatcher
        .send(job, &mut MemoryTransport::new())
        .unwrap_err()
        .kind()
    {
        ErrorKind::InvalidJobState(_) => {}
        ref kind => panic!("unexpected error: {}", kind),
    }
    let unchanged = f.db.get_job(job).unwrap();
    assert_eq!(unchanged.status(), JobStatus::Draft);
    assert_eq!(unchanged.newsletter_id, Some(f.newsletter.id));
    assert!(f.db.links(job).unwrap().is_empty());
}

#[test]
fn jobs_can_get_their_newsletter_later() {
    let f = Fixture::new(THREE);
    let job = f
        .dispatcher
        .create_job(&f.group(), None, "")
        .unwrap()
        .id;
    assert!(!f.dispatcher.can_send(job).unwrap());
    assert!(f.dispatcher.send(job, &mut MemoryTransport::new()).is_err());

    f.dispatcher.assign_newsletter(job, f.newsletter.id).unwrap();
    assert!(f.dispatcher.can_send(job).unwrap());
    f.dispatcher.send(job, &mut MemoryTransport::new()).unwrap();

    // Neither finished jobs nor snapshots can be assigned.
    let snapshot_id = f.db.get_job(job).unwrap().newsletter_id.unwrap();
    assert!(f.dispatcher.assign_newsletter(job, f.newsletter.id).is_err());
    let other = f.job();
    match *f
        .dispatcher
        .assign_newsletter(other, snapshot_id)
        .unwrap_err()
        .kind()
    {
        ErrorKind::InvalidJobState(_) => {}
        ref kind => panic!("unexpected error: {}", kind),
    }
}

#[test]
fn reply_to_is_only_set_with_a_reply_address() {
    let f = Fixture::new(THREE);
    let mut transport = MemoryTransport::new();
    f.dispatcher.send(f.job(), &mut transport).unwrap();
    assert!(transport.messages().iter().all(|m| m.reply_to.is_none()));

    let f = Fixture::with_newsletter(THREE, |form| {
        form.reply_email = "replies@example.com".to_string()
    });
    let mut transport = MemoryTransport::new();
    f.dispatcher.send(f.job(), &mut transport).unwrap();
    assert!(transport
        .messages()
        .iter()
        .all(|m| m.reply_to == Some("replies@example.com".to_string())));
}

#[test]
fn only_recipient_sources_get_jobs() {
    let f = Fixture::new(THREE);
    for group in &[EntityRef::new("subscriber", 1), EntityRef::new("poll", 1)] {
        match *f
            .dispatcher
            .create_job(group, Some(f.newsletter.id), "")
            .unwrap_err()
            .kind()
        {
            ErrorKind::UnsupportedRecipientSource(ref kind) => assert_eq!(kind, &group.kind),
            ref kind => panic!("unexpected error: {}", kind),
        }
    }
    assert!(f.db.list_jobs().unwrap().is_empty());
}

#[test]
fn mails_are_only_created_once() {
    let f = Fixture::new(THREE);
    let job = f.job();
    assert!(f.dispatcher.create_mails(job).is_err());
    assert_eq!(f.db.mails(job).unwrap().len(), 3);
}

#[test]
fn invalid_addresses_are_skipped_and_reported() {
    let f = Fixture::new(&["alice@example.com", "not-an-address", "carol@example.com"]);
    let job = f.job();

    let mut transport = MemoryTransport::new();
    let report = f.dispatcher.send(job, &mut transport).unwrap();
    assert_eq!(report.sent, 2);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].address, "not-an-address");
    assert_eq!(f.sent_flags(job), vec![true, false, true]);
    assert_eq!(f.db.get_job(job).unwrap().status(), JobStatus::Finished);
}

/// Cancels delivery once it has sent `after` messages.
struct CancellingTransport {
    inner: MemoryTransport,
    token: CancelToken,
    after: usize,
}

impl Transport for CancellingTransport {
    fn open(&mut self) -> Result<()> {
        self.inner.open()
    }

    fn send(&mut self, message: &Message) -> Result<()> {
        self.inner.send(message)?;
        if self.inner.messages().len() == self.after {
            self.token.cancel();
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()
    }
}

#[test]
fn cancelling_stops_between_mails() {
    let f = Fixture::new(THREE);
    let job = f.job();

    let token = CancelToken::new();
    let mut transport = CancellingTransport {
        inner: MemoryTransport::new(),
        token: token.clone(),
        after: 1,
    };
    match *f
        .dispatcher
        .send_cancellable(job, &mut transport, &token)
        .unwrap_err()
        .kind()
    {
        ErrorKind::Cancelled(id) => assert_eq!(id, job),
        ref kind => panic!("unexpected error: {}", kind),
    }
    assert!(!transport.inner.is_open());
    assert_eq!(f.sent_flags(job), vec![true, false, false]);
    assert_eq!(f.db.get_job(job).unwrap().status(), JobStatus::Error);

    let report = f.dispatcher.send(job, &mut MemoryTransport::new()).unwrap();
    assert_eq!(report.sent, 2);
}

/// Tries to send the same job again from inside a delivery.
struct ReentrantTransport<'a> {
    fixture: &'a Fixture,
    job: i32,
    nested: Option<Result<()>>,
}

impl<'a> Transport for ReentrantTransport<'a> {
    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    fn send(&mut self, _: &Message) -> Result<()> {
        if self.nested.is_none() {
            let mut inner = MemoryTransport::new();
            let result = self.fixture.dispatcher.send(self.job, &mut inner).map(|_| ());
            self.nested = Some(result);
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[test]
fn a_job_is_only_sent_once_at_a_time() {
    let f = Fixture::new(THREE);
    let job = f.job();
    let mut transport = ReentrantTransport {
        fixture: &f,
        job,
        nested: None,
    };
    f.dispatcher.send(job, &mut transport).unwrap();

    match transport.nested {
        Some(Err(ref err)) => match *err.kind() {
            ErrorKind::JobBusy(id) => assert_eq!(id, job),
            ref kind => panic!("unexpected error: {}", kind),
        },
        _ => panic!("the nested send should have failed"),
    }
    assert_eq!(f.db.get_job(job).unwrap().status(), JobStatus::Finished);
}

/// Breaks the jobs table for finished jobs once the connection is closed, so the job can't be
/// marked as finished.
struct SabotagingTransport {
    inner: MemoryTransport,
    db: DB,
}

impl Transport for SabotagingTransport {
    fn open(&mut self) -> Result<()> {
        self.inner.open()
    }

    fn send(&mut self, message: &Message) -> Result<()> {
        self.inner.send(message)
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()?;
        self.db.conn()?.batch_execute(
            "CREATE TRIGGER no_finish BEFORE UPDATE OF status ON jobs WHEN NEW.status = 4 \
             BEGIN SELECT RAISE(ABORT, 'jobs cannot finish'); END;",
        )?;
        Ok(())
    }
}

#[test]
fn a_job_that_cannot_finish_is_marked_failed() {
    let f = Fixture::new(THREE);
    let job = f.job();
    let mut transport = SabotagingTransport {
        inner: MemoryTransport::new(),
        db: f.db.clone(),
    };
    assert!(f.dispatcher.send(job, &mut transport).is_err());
    assert_eq!(transport.inner.messages().len(), 3);
    assert_eq!(f.sent_flags(job), vec![true, true, true]);
    assert_eq!(f.db.get_job(job).unwrap().status(), JobStatus::Error);

    f.db.conn()
        .unwrap()
        .batch_execute("DROP TRIGGER no_finish;")
        .unwrap();
    let mut retry = MemoryTransport::new();
    let report = f.dispatcher.send(job, &mut retry).unwrap();
    assert_eq!(report.sent, 0);
    assert!(retry.messages().is_empty());
    assert_eq!(f.db.get_job(job).unwrap().status(), JobStatus::Finished);
}

#[test]
fn stuck_jobs_can_be_reset() {
    let f = Fixture::new(THREE);
    let job = f.job();
    assert!(f.dispatcher.reset_job(job).is_err());

    f.db.set_job_status(job, JobStatus::Sending).unwrap();
    assert!(!f.dispatcher.can_send(job).unwrap());
    f.dispatcher.reset_job(job).unwrap();
    assert_eq!(f.db.get_job(job).unwrap().status(), JobStatus::Error);
}

#[test]
fn deleting_a_job_takes_its_snapshot_along() {
    let f = Fixture::new(THREE);
    let job = f.job();
    f.dispatcher.send(job, &mut MemoryTransport::new()).unwrap();
    let snapshot_id = f.db.get_job(job).unwrap().newsletter_id.unwrap();

    f.dispatcher.delete_job(job).unwrap();
    match *f.db.get_job(job).unwrap_err().kind() {
        ErrorKind::NotFound(..) => {}
        ref kind => panic!("unexpected error: {}", kind),
    }
    assert!(f.db.mails(job).unwrap().is_empty());
    assert!(f.db.links(job).unwrap().is_empty());
    assert!(f.db.get_newsletter(snapshot_id).unwrap().is_none());
    assert!(f.db.content_blocks(snapshot_id).unwrap().is_empty());
    assert!(f.db.get_newsletter(f.newsletter.id).unwrap().is_some());
    assert_eq!(f.db.content_blocks(f.newsletter.id).unwrap().len(), 1);
}

#[test]
fn deleting_a_draft_keeps_the_live_newsletter() {
    let f = Fixture::new(THREE);
    let job = f.job();
    f.dispatcher.delete_job(job).unwrap();
    assert!(f.db.get_newsletter(f.newsletter.id).unwrap().unwrap().active);
}
