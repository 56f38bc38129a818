#![allow(dead_code)]

use std::sync::Arc;

use bulkmail::{
    lists,
    models::{EntityRef, MailingList, NewContentBlock, Newsletter, NewsletterForm, TemplateContents},
    Dispatcher, ErrorKind, Message, Registry, Renderer, Result, SiteUrls, Transport, DB,
};
use tera::Tera;

pub const BASE_URL: &str = "https://news.example.com/";

pub const TEMPLATE: &str = "<p>{{ weblink | safe }}</p>{{ content.main | safe }}\
    <p>Dear {{ person.name }},</p><img src=\"{{ pingback_url | safe }}\">";

pub const BODY: &str = "<a href=\"https://example.org/a\">A</a> \
    <a href='https://example.org/b?x=1'>B</a> <a href=\"https://example.org/a\">A again</a>";

pub struct Fixture {
    pub db: DB,
    pub dispatcher: Dispatcher,
    pub list: MailingList,
    pub newsletter: Newsletter,
}

impl Fixture {
    /// A mailing list with the given addresses and a live newsletter with three links (two
    /// distinct targets).
    pub fn new(addresses: &[&str]) -> Fixture {
        Fixture::with_newsletter(addresses, |_| {})
    }

    pub fn with_newsletter<F: FnOnce(&mut NewsletterForm)>(addresses: &[&str], edit: F) -> Fixture {
        let db = DB::in_memory().unwrap();
        let mut registry = Registry::new();
        lists::register(&mut registry, &db);

        let sender = db.new_sender("news@example.com", "The News").unwrap();
        let mut form = NewsletterForm::new("weekly", sender.id, "Weekly news", "newsletter.html");
        edit(&mut form);
        let newsletter = db.new_newsletter(&form).unwrap();
        db.add_content_block(&NewContentBlock::new(
            newsletter.id,
            "main",
            0,
            TemplateContents::Html(BODY.to_string()),
        ))
        .unwrap();

        let list = db.new_mailing_list("members").unwrap();
        for address in addresses {
            let name = address.split('@').next().unwrap_or("");
            db.add_subscriber(list.id, address, name).unwrap();
        }

        let mut tera = Tera::default();
        tera.add_raw_template("newsletter.html", TEMPLATE).unwrap();
        let urls = SiteUrls::parse(BASE_URL).unwrap();
        let renderer = Renderer::new(tera, urls, Arc::new(registry));
        let dispatcher = Dispatcher::new(db.clone(), Arc::new(renderer));
        Fixture {
            db,
            dispatcher,
            list,
            newsletter,
        }
    }

    pub fn group(&self) -> EntityRef {
        EntityRef::new(lists::MAILING_LIST, self.list.id)
    }

    /// Creates a job for the list, sending the live newsletter.
    pub fn job(&self) -> i32 {
        self.dispatcher
            .create_job(&self.group(), Some(self.newsletter.id), "spring")
            .unwrap()
            .id
    }

    pub fn sent_flags(&self, job_id: i32) -> Vec<bool> {
        self.db
            .mails(job_id)
            .unwrap()
            .into_iter()
            .map(|mail| mail.sent)
            .collect()
    }
}

/// Accepts messages until the `fail_on`th one (counting from 1), which it refuses.
#[derive(Debug, Default)]
pub struct FailingTransport {
    pub fail_on: usize,
    pub attempts: usize,
    pub sent: Vec<Message>,
    pub open: bool,
    pub closed: usize,
}

impl FailingTransport {
    pub fn new(fail_on: usize) -> FailingTransport {
        FailingTransport {
            fail_on,
            ..FailingTransport::default()
        }
    }
}

impl Transport for FailingTransport {
    fn open(&mut self) -> Result<()> {
        self.open = true;
        Ok(())
    }

    fn send(&mut self, message: &Message) -> Result<()> {
        self.attempts += 1;
        if self.attempts == self.fail_on {
            return Err(ErrorKind::Transport("550 mailbox unavailable".to_string()).into());
        }
        self.sent.push(message.clone());
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.open = false;
        self.closed += 1;
        Ok(())
    }
}

/// Pulls the first `<base>ping/<hash>` hash out of a rendered body.
pub fn ping_hash(html: &str) -> String {
    let prefix = format!("{}ping/", BASE_URL);
    let start = html.find(&prefix).unwrap() + prefix.len();
    html[start..start + 32].to_string()
}
