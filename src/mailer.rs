//! Transports: where rendered messages go.

use lettre::{
    smtp::{authentication::Credentials, ConnectionReuseParameters},
    EmailTransport, SmtpTransport,
};
use lettre_email::{Email, EmailBuilder};

use errors::{Error, ErrorKind, Result};

/// A rendered message, ready to be handed to a transport.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Message {
    pub from_address: String,
    pub from_name: String,
    pub to: String,
    pub reply_to: Option<String>,
    pub subject: String,
    /// The body, as HTML.
    pub html: String,
}

impl Message {
    /// Builds the email Lettre sends.
    pub fn to_email(&self) -> Result<Email> {
        let mut builder = EmailBuilder::new()
            .from((self.from_address.as_str(), self.from_name.as_str()))
            .to(self.to.as_str())
            .subject(self.subject.as_str())
            .html(self.html.as_str());
        if let Some(ref reply_to) = self.reply_to {
            builder = builder.reply_to(reply_to.as_str());
        }
        builder.build().map_err(Error::from)
    }
}

/// A connection to something that delivers mail. A job opens it once, sends its mails one at a
/// time, and closes it again whether or not sending worked.
pub trait Transport {
    /// Opens the connection.
    fn open(&mut self) -> Result<()>;

    /// Sends one message. Returning `Ok` means the message was accepted.
    fn send(&mut self, message: &Message) -> Result<()>;

    /// Sends several messages, stopping at the first failure. Returns how many were sent.
    fn send_all(&mut self, messages: &[Message]) -> Result<usize> {
        for message in messages {
            self.send(message)?;
        }
        Ok(messages.len())
    }

    /// Closes the connection.
    fn close(&mut self) -> Result<()>;
}

/// The SMTP mailer.
pub struct Mailer {
    addr: String,
    user: String,
    pass: String,
    transport: Option<SmtpTransport>,
}

impl Mailer {
    /// Creates a new `Mailer`. Nothing is connected until `open` is called.
    pub fn new(addr: String, user: String, pass: String) -> Mailer {
        Mailer {
            addr,
            user,
            pass,
            transport: None,
        }
    }
}

impl Transport for Mailer {
    fn open(&mut self) -> Result<()> {
        let transport = SmtpTransport::simple_builder(&self.addr)?
            .credentials(Credentials::new(self.user.clone(), self.pass.clone()))
            .smtp_utf8(true)
            .connection_reuse(ConnectionReuseParameters::ReuseUnlimited)
            .build();
        self.transport = Some(transport);
        debug!("Opened SMTP transport to {}", self.addr);
        Ok(())
    }

    fn send(&mut self, message: &Message) -> Result<()> {
        let email = message.to_email()?;
        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| ErrorKind::Transport("the SMTP transport is not open".to_string()))?;
        let response = transport.send(&email)?;
        if response.is_positive() {
            Ok(())
        } else {
            Err(ErrorKind::Smtp(response.into()).into())
        }
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut transport) = self.transport.take() {
            transport.close();
            debug!("Closed SMTP transport to {}", self.addr);
        }
        Ok(())
    }
}

/// A transport that keeps every message it is given. Used for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    open: bool,
    opened: usize,
    sent: Vec<Message>,
}

impl MemoryTransport {
    pub fn new() -> MemoryTransport {
        MemoryTransport::default()
    }

    /// The messages sent so far.
    pub fn messages(&self) -> &[Message] {
        &self.sent
    }

    /// Whether the connection is currently open.
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// How many times the connection was opened.
    pub fn times_opened(&self) -> usize {
        self.opened
    }
}

impl Transport for MemoryTransport {
    fn open(&mut self) -> Result<()> {
        self.open = true;
        self.opened += 1;
        Ok(())
    }

    fn send(&mut self, message: &Message) -> Result<()> {
        if !self.open {
            return Err(ErrorKind::Transport("the memory transport is not open".to_string()).into());
        }
        info!("Would send {:?} to {}", message.subject, message.to);
        self.sent.push(message.clone());
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.open = false;
        Ok(())
    }
}
