//! The records the dispatcher works with, and the rules that only depend on a record's own fields.

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use chrono::NaiveDateTime;
use pulldown_cmark::{self, html::push_html};

use db::schema::{content_blocks, jobs, links, mails, newsletters, senders};
use hash;

/// A reference to some object owned by another part of the system: a group object that recipients
/// are enumerated from, or the person a mail is addressed to. Resolved through a `Registry`.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: String,
    pub id: i32,
}

impl EntityRef {
    pub fn new<S: Into<String>>(kind: S, id: i32) -> EntityRef {
        EntityRef {
            kind: kind.into(),
            id,
        }
    }
}

impl Display for EntityRef {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

impl FromStr for EntityRef {
    type Err = String;

    /// Parses the `kind:id` form `Display` produces.
    fn from_str(s: &str) -> ::std::result::Result<EntityRef, String> {
        let mut parts = s.rsplitn(2, ':');
        let id = parts.next().and_then(|id| id.parse().ok());
        match (parts.next(), id) {
            (Some(kind), Some(id)) if !kind.is_empty() => Ok(EntityRef::new(kind, id)),
            _ => Err(format!("expected kind:id, got {:?}", s)),
        }
    }
}

/// An HTML or Markdown document.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TemplateContents {
    /// An HTML fragment.
    Html(String),

    /// A Markdown fragment.
    Markdown(String),
}

impl TemplateContents {
    /// Renders the contents to HTML.
    pub fn to_html(&self) -> String {
        match *self {
            TemplateContents::Html(ref s) => s.clone(),
            TemplateContents::Markdown(ref s) => {
                let mut html = String::new();
                push_html(&mut html, pulldown_cmark::Parser::new(s));
                html
            }
        }
    }
}

#[derive(Clone, Debug, Queryable, Serialize)]
pub struct Sender {
    pub id: i32,
    pub email: String,
    pub name: String,
}

#[derive(Debug, Insertable)]
#[table_name = "senders"]
pub struct NewSender {
    pub email: String,
    pub name: String,
}

/// A newsletter with a subject and content. Jobs send it to the recipients of a group object.
#[derive(Clone, Debug, Queryable, Serialize)]
pub struct Newsletter {
    pub id: i32,
    /// Only used internally.
    pub name: String,
    /// Live newsletters are active; snapshots taken for a job never are.
    pub active: bool,
    pub sender_id: i32,
    pub subject: String,
    pub reply_email: String,
    pub language: String,
    /// The name of the template the mail body is rendered with.
    pub template: String,
    pub utm_source: String,
    pub utm_medium: String,
}

impl Newsletter {
    /// A newsletter without a subject can't be sent.
    pub fn is_valid(&self) -> bool {
        !self.subject.trim().is_empty()
    }

    /// The fields of this newsletter, ready to be written somewhere else.
    pub fn to_form(&self) -> NewsletterForm {
        NewsletterForm {
            name: self.name.clone(),
            active: self.active,
            sender_id: self.sender_id,
            subject: self.subject.clone(),
            reply_email: self.reply_email.clone(),
            language: self.language.clone(),
            template: self.template.clone(),
            utm_source: self.utm_source.clone(),
            utm_medium: self.utm_medium.clone(),
        }
    }
}

/// Every persisted field of a newsletter except its identity. Used both to insert and to update.
#[derive(Clone, Debug, Insertable, AsChangeset)]
#[table_name = "newsletters"]
pub struct NewsletterForm {
    pub name: String,
    pub active: bool,
    pub sender_id: i32,
    pub subject: String,
    pub reply_email: String,
    pub language: String,
    pub template: String,
    pub utm_source: String,
    pub utm_medium: String,
}

impl NewsletterForm {
    /// An active newsletter with the default tracking fields.
    pub fn new<N, S, T>(name: N, sender_id: i32, subject: S, template: T) -> NewsletterForm
    where
        N: Into<String>,
        S: Into<String>,
        T: Into<String>,
    {
        NewsletterForm {
            name: name.into(),
            active: true,
            sender_id,
            subject: subject.into(),
            reply_email: String::new(),
            language: "en".to_string(),
            template: template.into(),
            utm_source: "newsletter".to_string(),
            utm_medium: "cpc".to_string(),
        }
    }
}

/// One piece of a newsletter's body.
#[derive(Clone, Debug, Queryable, Serialize)]
pub struct ContentBlock {
    pub id: i32,
    pub newsletter_id: i32,
    pub region: String,
    pub position: i32,
    pub markdown: bool,
    pub body: String,
}

impl ContentBlock {
    pub fn contents(&self) -> TemplateContents {
        if self.markdown {
            TemplateContents::Markdown(self.body.clone())
        } else {
            TemplateContents::Html(self.body.clone())
        }
    }
}

#[derive(Clone, Debug, Insertable)]
#[table_name = "content_blocks"]
pub struct NewContentBlock {
    pub newsletter_id: i32,
    pub region: String,
    pub position: i32,
    pub markdown: bool,
    pub body: String,
}

impl NewContentBlock {
    pub fn new<R: Into<String>>(
        newsletter_id: i32,
        region: R,
        position: i32,
        contents: TemplateContents,
    ) -> NewContentBlock {
        let (markdown, body) = match contents {
            TemplateContents::Html(s) => (false, s),
            TemplateContents::Markdown(s) => (true, s),
        };
        NewContentBlock {
            newsletter_id,
            region: region.into(),
            position,
            markdown,
            body,
        }
    }
}

/// The status of a job. The discriminants are what gets stored.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum JobStatus {
    Draft = 1,
    Pending = 2,
    Sending = 3,
    Finished = 4,
    Error = 5,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Draft,
        JobStatus::Pending,
        JobStatus::Sending,
        JobStatus::Finished,
        JobStatus::Error,
    ];

    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<JobStatus> {
        JobStatus::ALL.iter().cloned().find(|s| s.code() == code)
    }

    /// Whether a job in this status may (re)start delivery.
    pub fn is_sendable(self) -> bool {
        self == JobStatus::Draft || self == JobStatus::Error
    }
}

impl Display for JobStatus {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        let name = match *self {
            JobStatus::Draft => "draft",
            JobStatus::Pending => "pending",
            JobStatus::Sending => "sending",
            JobStatus::Finished => "finished",
            JobStatus::Error => "error",
        };
        f.write_str(name)
    }
}

/// One delivery of a newsletter to the recipients of a group object.
#[derive(Clone, Debug, Queryable, Serialize)]
pub struct Job {
    pub id: i32,
    pub newsletter_id: Option<i32>,
    status: i32,
    pub date_created: NaiveDateTime,
    pub date_deliver_start: Option<NaiveDateTime>,
    pub date_deliver_finished: Option<NaiveDateTime>,
    pub group_kind: String,
    pub group_id: i32,
    pub utm_campaign: String,
}

impl Job {
    pub fn status(&self) -> JobStatus {
        // The column is constrained to valid codes.
        JobStatus::from_code(self.status).unwrap_or(JobStatus::Error)
    }

    pub fn group(&self) -> EntityRef {
        EntityRef::new(self.group_kind.clone(), self.group_id)
    }

    /// Whether the job has a newsletter, and the newsletter can be sent. The caller passes the
    /// newsletter `newsletter_id` refers to (or `None` if it refers to none).
    pub fn is_valid(&self, newsletter: Option<&Newsletter>) -> bool {
        match newsletter {
            Some(newsletter) => Some(newsletter.id) == self.newsletter_id && newsletter.is_valid(),
            None => false,
        }
    }

    pub fn can_send(&self, newsletter: Option<&Newsletter>) -> bool {
        self.status().is_sendable() && self.is_valid(newsletter)
    }
}

#[derive(Debug, Insertable)]
#[table_name = "jobs"]
pub struct NewJob {
    pub newsletter_id: Option<i32>,
    pub status: i32,
    pub date_created: NaiveDateTime,
    pub group_kind: String,
    pub group_id: i32,
    pub utm_campaign: String,
}

impl NewJob {
    /// A draft job, created now.
    pub fn new(group: &EntityRef, newsletter_id: Option<i32>, utm_campaign: &str) -> NewJob {
        NewJob {
            newsletter_id,
            status: JobStatus::Draft.code(),
            date_created: ::chrono::Utc::now().naive_utc(),
            group_kind: group.kind.clone(),
            group_id: group.id,
            utm_campaign: utm_campaign.to_string(),
        }
    }
}

/// A single mail, part of a job.
#[derive(Clone, Debug, Queryable, Serialize)]
pub struct Mail {
    pub id: i32,
    pub job_id: i32,
    pub person_kind: String,
    pub person_id: i32,
    pub hash: String,
    pub viewed: bool,
    pub bounced: bool,
    pub sent: bool,
}

impl Mail {
    pub fn person(&self) -> EntityRef {
        EntityRef::new(self.person_kind.clone(), self.person_id)
    }
}

/// A mail about to be created. The hash is assigned here, once; nothing ever updates it.
#[derive(Debug, Insertable)]
#[table_name = "mails"]
pub struct NewMail {
    pub job_id: i32,
    pub person_kind: String,
    pub person_id: i32,
    pub hash: String,
}

impl NewMail {
    pub fn new(job_id: i32, person: &EntityRef) -> NewMail {
        NewMail {
            job_id,
            person_kind: person.kind.clone(),
            person_id: person.id,
            hash: hash::generate(),
        }
    }
}

/// A link target in a job's content, rewritten to go through the redirect endpoint.
#[derive(Clone, Debug, Queryable, Serialize)]
pub struct Link {
    pub id: i32,
    pub job_id: i32,
    pub hash: String,
    pub target: String,
    pub click_count: i32,
}

#[derive(Debug, Insertable)]
#[table_name = "links"]
pub struct NewLink {
    pub job_id: i32,
    pub hash: String,
    pub target: String,
}

impl NewLink {
    pub fn new<S: Into<String>>(job_id: i32, target: S) -> NewLink {
        NewLink {
            job_id,
            hash: hash::generate(),
            target: target.into(),
        }
    }
}

#[derive(Clone, Debug, Queryable, Serialize)]
pub struct MailingList {
    pub id: i32,
    pub name: String,
}

#[derive(Clone, Debug, Queryable, Serialize)]
pub struct Subscriber {
    pub id: i32,
    pub mailing_list_id: i32,
    pub email: String,
    pub name: String,
}

/// Counters for the admin.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct JobStats {
    pub total: i64,
    pub sent: i64,
    pub viewed: i64,
    pub bounced: i64,
    pub clicks: i64,
}
