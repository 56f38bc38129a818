//! Turning a mail into a message.

use std::collections::BTreeMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tera::{Context, Tera};

use mailer::Message;
use models::{ContentBlock, Job, Mail, Newsletter, Sender, TemplateContents};
use recipients::{Recipient, Registry};
use urls::{SiteUrls, MAIL_HASH_PLACEHOLDER};
use {ErrorKind, Result, DB};

static EMAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"^[A-Za-z0-9!#$%&'*+/=?^_`{|}~-]+(\.[A-Za-z0-9!#$%&'*+/=?^_`{|}~-]+)*",
        r"@([A-Za-z0-9]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?\.)+[A-Za-z]{2,63}\.?$",
    ))
    .unwrap()
});

/// Whether an address looks like something a mail can be sent to.
pub fn is_valid_address(address: &str) -> bool {
    EMAIL.is_match(address)
}

/// The "view this mail in a browser" sentence, in the newsletter's language. The bracketed part
/// becomes the link.
pub fn weblink_text(language: &str) -> &'static str {
    match language.split(|c: char| c == '-' || c == '_').next().unwrap_or("") {
        "de" => "Um diese E-Mail als Webseite anzuzeigen, klicken Sie [hier]",
        "fr" => "Pour afficher cet e-mail comme page web, cliquez [ici]",
        _ => "To view this email as a web page, click [here]",
    }
}

fn weblink(language: &str, view_url: &str) -> String {
    weblink_text(language)
        .replace('[', &format!("<a href=\"{}\">", view_url))
        .replace(']', "</a>")
}

/// Everything about a job that is the same for each of its mails. Loaded once per delivery.
#[derive(Debug)]
pub struct JobContext {
    pub job: Job,
    pub newsletter: Newsletter,
    pub sender: Sender,
    pub blocks: Vec<ContentBlock>,
    /// What templates see as `group_object`.
    pub group: Value,
}

impl JobContext {
    /// The content of the newsletter for one mail: the HTML of each region, with the blocks in
    /// order and the links pointing at this mail's redirects.
    pub fn content(&self, mail_hash: &str) -> BTreeMap<String, String> {
        let mut content = BTreeMap::new();
        for block in &self.blocks {
            let mut contents = block.contents();
            match contents {
                TemplateContents::Html(ref mut body) | TemplateContents::Markdown(ref mut body) => {
                    *body = body.replace(MAIL_HASH_PLACEHOLDER, mail_hash);
                }
            }
            content
                .entry(block.region.clone())
                .or_insert_with(String::new)
                .push_str(&contents.to_html());
        }
        content
    }
}

/// Renders newsletters with Tera.
pub struct Renderer {
    tera: Tera,
    urls: SiteUrls,
    registry: Arc<Registry>,
}

impl Renderer {
    pub fn new(tera: Tera, urls: SiteUrls, registry: Arc<Registry>) -> Renderer {
        Renderer {
            tera,
            urls,
            registry,
        }
    }

    /// Loads the templates matching a glob, e.g. `templates/**/*.html`.
    pub fn from_glob(glob: &str, urls: SiteUrls, registry: Arc<Registry>) -> Result<Renderer> {
        let tera = Tera::new(glob)?;
        Ok(Renderer::new(tera, urls, registry))
    }

    pub fn urls(&self) -> &SiteUrls {
        &self.urls
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Loads what rendering the mails of a job needs.
    pub fn load(&self, db: &DB, job: &Job) -> Result<JobContext> {
        let newsletter = match job.newsletter_id {
            Some(id) => db.get_newsletter(id)?,
            None => None,
        };
        let newsletter = newsletter.ok_or_else(|| {
            ErrorKind::InvalidJobState(format!("job {} has no newsletter", job.id))
        })?;
        let sender = db.get_sender(newsletter.sender_id)?;
        let blocks = db.content_blocks(newsletter.id)?;
        let group = self.registry.source(&job.group())?.context();
        Ok(JobContext {
            job: job.clone(),
            newsletter,
            sender,
            blocks,
            group,
        })
    }

    /// The values the newsletter template is rendered with.
    pub fn get_context(
        &self,
        ctx: &JobContext,
        mail: &Mail,
        recipient: &dyn Recipient,
    ) -> Result<Context> {
        let pingback_url = self.urls.ping(&mail.hash)?.into_string();
        let view_url = self.urls.view(&mail.hash)?.into_string();
        let unsubscribe_url = self.urls.unsubscribe(&mail.hash)?.into_string();
        let weblink = weblink(&ctx.newsletter.language, &view_url);
        Ok(context! {
            person: recipient.context(),
            group_object: ctx.group,
            newsletter: ctx.newsletter,
            sender: ctx.sender,
            content: ctx.content(&mail.hash),
            pingback_url: pingback_url,
            view_url: view_url,
            weblink: weblink,
            unsubscribe_url: unsubscribe_url,
        })
    }

    /// Renders the body of a mail.
    pub fn render_body(
        &self,
        ctx: &JobContext,
        mail: &Mail,
        recipient: &dyn Recipient,
    ) -> Result<String> {
        let context = self.get_context(ctx, mail, recipient)?;
        Ok(self.tera.render(&ctx.newsletter.template, &context)?)
    }

    /// Renders the message for a mail. Fails with `InvalidRecipientAddress` if the recipient's
    /// address can't be mailed.
    pub fn get_message(&self, ctx: &JobContext, mail: &Mail) -> Result<Message> {
        let recipient = self.registry.recipient(&mail.person())?;
        let to = recipient.address().trim().to_string();
        if !is_valid_address(&to) {
            return Err(ErrorKind::InvalidRecipientAddress(to).into());
        }

        let html = self.render_body(ctx, mail, &*recipient)?;
        let reply_to = if ctx.newsletter.reply_email.is_empty() {
            None
        } else {
            Some(ctx.newsletter.reply_email.clone())
        };
        Ok(Message {
            from_address: ctx.sender.email.clone(),
            from_name: ctx.sender.name.clone(),
            to,
            reply_to,
            subject: ctx.newsletter.subject.clone(),
            html,
        })
    }
}
