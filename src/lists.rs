//! Mailing lists: the recipient source that ships with the crate.

use serde_json::Value;

use models::{EntityRef, MailingList, Subscriber};
use recipients::{Recipient, RecipientSource, Registry};
use {Result, DB};

/// The kind of reference a mailing list is stored as.
pub const MAILING_LIST: &str = "mailing_list";

/// The kind of reference a subscriber is stored as.
pub const SUBSCRIBER: &str = "subscriber";

/// A mailing list, able to enumerate its (still subscribed) subscribers.
pub struct MailingListSource {
    list: MailingList,
    db: DB,
}

impl MailingListSource {
    pub fn new(list: MailingList, db: DB) -> MailingListSource {
        MailingListSource { list, db }
    }
}

impl RecipientSource for MailingListSource {
    fn reference(&self) -> EntityRef {
        EntityRef::new(MAILING_LIST, self.list.id)
    }

    fn recipients(&self) -> Result<Vec<Box<dyn Recipient>>> {
        let subscribers = self.db.subscribers(self.list.id)?;
        Ok(subscribers
            .into_iter()
            .map(|s| Box::new(s) as Box<dyn Recipient>)
            .collect())
    }

    fn context(&self) -> Value {
        json!({ "id": self.list.id, "name": self.list.name })
    }
}

impl Recipient for Subscriber {
    fn reference(&self) -> EntityRef {
        EntityRef::new(SUBSCRIBER, self.id)
    }

    fn address(&self) -> &str {
        &self.email
    }

    fn context(&self) -> Value {
        json!({ "email": self.email, "name": self.name })
    }
}

/// Registers mailing lists (as sources) and subscribers (as recipients).
pub fn register(registry: &mut Registry, db: &DB) {
    let lists_db = db.clone();
    registry.register_source(MAILING_LIST, move |id| {
        Ok(lists_db.get_mailing_list(id)?.map(|list| {
            Box::new(MailingListSource::new(list, lists_db.clone())) as Box<dyn RecipientSource>
        }))
    });

    let subscribers_db = db.clone();
    registry.register_recipient(SUBSCRIBER, move |id| {
        Ok(subscribers_db
            .get_subscriber(id)?
            .map(|s| Box::new(s) as Box<dyn Recipient>))
    });
}

/// Records that the recipient of a mail no longer wants mail from the job's group object. Only
/// mailing lists keep unsubscribes; for any other group this returns `false`.
pub fn unsubscribe(db: &DB, registry: &Registry, hash: &str) -> Result<bool> {
    let mail = match db.mail_by_hash(hash)? {
        Some(mail) => mail,
        None => return Ok(false),
    };
    let job = db.get_job(mail.job_id)?;
    if job.group_kind != MAILING_LIST {
        return Ok(false);
    }
    let recipient = registry.recipient(&mail.person())?;
    db.unsubscribe(recipient.address(), job.group_id)?;
    info!(
        "{} unsubscribed from mailing list {}",
        recipient.address(),
        job.group_id
    );
    Ok(true)
}
