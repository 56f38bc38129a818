//! What a group object and a recipient must be able to do, and how entity references are turned
//! back into objects.
//!
//! Jobs and mails only store an `EntityRef` for their group object and recipient. The `Registry`
//! maps each kind of reference to a resolver; a kind is a recipient source only if a source
//! resolver was registered for it, and it can be mailed only if a recipient resolver was.

use std::collections::HashMap;

use serde_json::Value;

use models::EntityRef;
use {ErrorKind, Result};

/// Something a newsletter can be addressed to.
pub trait Recipient {
    /// The reference stored on the mail.
    fn reference(&self) -> EntityRef;

    /// The email address.
    fn address(&self) -> &str;

    /// What templates see as `person`.
    fn context(&self) -> Value {
        json!({ "email": self.address() })
    }
}

/// Something a job can be created for: a group of recipients.
pub trait RecipientSource {
    /// The reference stored on the job.
    fn reference(&self) -> EntityRef;

    /// Enumerates the recipients.
    fn recipients(&self) -> Result<Vec<Box<dyn Recipient>>>;

    /// What templates see as `group_object`.
    fn context(&self) -> Value {
        json!({})
    }
}

type SourceResolver = Box<dyn Fn(i32) -> Result<Option<Box<dyn RecipientSource>>> + Send + Sync>;
type RecipientResolver = Box<dyn Fn(i32) -> Result<Option<Box<dyn Recipient>>> + Send + Sync>;

/// Resolves entity references to recipient sources and recipients.
#[derive(Default)]
pub struct Registry {
    sources: HashMap<String, SourceResolver>,
    recipients: HashMap<String, RecipientResolver>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Registry {
        Registry::default()
    }

    /// Registers `kind` as a recipient source.
    pub fn register_source<F>(&mut self, kind: &str, resolve: F)
    where
        F: Fn(i32) -> Result<Option<Box<dyn RecipientSource>>> + Send + Sync + 'static,
    {
        self.sources.insert(kind.to_string(), Box::new(resolve));
    }

    /// Registers `kind` as something that can be mailed.
    pub fn register_recipient<F>(&mut self, kind: &str, resolve: F)
    where
        F: Fn(i32) -> Result<Option<Box<dyn Recipient>>> + Send + Sync + 'static,
    {
        self.recipients.insert(kind.to_string(), Box::new(resolve));
    }

    /// Whether references of this kind can enumerate recipients.
    pub fn is_source(&self, kind: &str) -> bool {
        self.sources.contains_key(kind)
    }

    /// Resolves a group object.
    pub fn source(&self, reference: &EntityRef) -> Result<Box<dyn RecipientSource>> {
        let resolve = self
            .sources
            .get(&reference.kind)
            .ok_or_else(|| ErrorKind::UnsupportedRecipientSource(reference.kind.clone()))?;
        resolve(reference.id)?
            .ok_or_else(|| ErrorKind::NotFound("Recipient source", reference.to_string()).into())
    }

    /// Resolves the person a mail is addressed to.
    pub fn recipient(&self, reference: &EntityRef) -> Result<Box<dyn Recipient>> {
        let resolve = self
            .recipients
            .get(&reference.kind)
            .ok_or_else(|| ErrorKind::UnsupportedRecipient(reference.kind.clone()))?;
        resolve(reference.id)?
            .ok_or_else(|| ErrorKind::NotFound("Recipient", reference.to_string()).into())
    }
}
