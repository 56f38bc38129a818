//! Matching bounced mail back to the mails that caused it.
//!
//! Fetching bounces from a mailbox is someone else's job; this takes the raw bytes of one message.

use once_cell::sync::Lazy;
use regex::Regex;

use hash::HASH_LEN;
use models::Mail;
use urls::SiteUrls;
use {Result, DB};

/// How a message bounced.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum Bounce {
    /// The address won't ever accept mail.
    Permanent,

    /// Delivery was delayed or failed for now.
    Transient,
}

/// Decides whether a raw message is a bounce.
pub trait BounceClassifier {
    /// Returns `None` if the message isn't a bounce.
    fn classify(&self, raw: &[u8]) -> Option<Bounce>;
}

static DSN_STATUS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?mi)^status:\s*([245])\.\d{1,3}\.\d{1,3}").unwrap());
static DSN_ACTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?mi)^action:\s*(failed|delayed|delivered|relayed|expanded)").unwrap()
});
static DAEMON_FROM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?mi)^from:.*\b(mailer-daemon|postmaster)\b").unwrap());

/// Recognizes delivery status notifications (RFC 3464) and mail from mailer daemons.
#[derive(Clone, Copy, Debug, Default)]
pub struct DsnClassifier;

impl BounceClassifier for DsnClassifier {
    fn classify(&self, raw: &[u8]) -> Option<Bounce> {
        let text = String::from_utf8_lossy(raw);
        let lower = text.to_ascii_lowercase();
        let is_report = lower.contains("multipart/report") && lower.contains("delivery-status");
        if !is_report && !DAEMON_FROM.is_match(&text) {
            return None;
        }

        if let Some(caps) = DSN_STATUS.captures(&text) {
            return match &caps[1] {
                "5" => Some(Bounce::Permanent),
                "4" => Some(Bounce::Transient),
                _ => None,
            };
        }
        if let Some(caps) = DSN_ACTION.captures(&text) {
            return match caps[1].to_ascii_lowercase().as_str() {
                "failed" => Some(Bounce::Permanent),
                "delayed" => Some(Bounce::Transient),
                _ => None,
            };
        }
        Some(Bounce::Permanent)
    }
}

/// Finds the hash of the mail a bounce is about, from the ping URL in the returned content.
pub fn find_mail_hash(urls: &SiteUrls, raw: &[u8]) -> Option<String> {
    // Quoted-printable soft line breaks can split the URL.
    let text = String::from_utf8_lossy(raw)
        .replace("=\r\n", "")
        .replace("=\n", "");
    let prefix = match urls.ping("") {
        Ok(url) => url.into_string(),
        Err(_) => return None,
    };
    let re = Regex::new(&format!(
        r"{}([0-9a-f]{{{}}})",
        ::regex::escape(&prefix),
        HASH_LEN
    ))
    .ok()?;
    re.captures(&text).map(|caps| caps[1].to_string())
}

/// What processing one message found.
#[derive(Clone, Debug)]
pub struct ProcessedBounce {
    pub bounce: Bounce,
    /// The mail the bounce was matched to, if any.
    pub mail: Option<Mail>,
}

/// Classifies a message and, for a permanent bounce, marks the mail it is about as bounced.
/// Returns `None` if the message isn't a bounce at all.
pub fn process_bounce(
    db: &DB,
    urls: &SiteUrls,
    classifier: &dyn BounceClassifier,
    raw: &[u8],
) -> Result<Option<ProcessedBounce>> {
    let bounce = match classifier.classify(raw) {
        Some(bounce) => bounce,
        None => return Ok(None),
    };
    let mail = match find_mail_hash(urls, raw) {
        Some(hash) => db.mail_by_hash(&hash)?,
        None => None,
    };

    match mail {
        Some(ref mail) if bounce == Bounce::Permanent => {
            db.mark_bounced(&mail.hash)?;
            info!("Mail {} of job {} bounced", mail.id, mail.job_id);
        }
        Some(ref mail) => debug!("Mail {} was delayed", mail.id),
        None => warn!("Got a {:?} bounce that matches no mail", bounce),
    }
    Ok(Some(ProcessedBounce { bounce, mail }))
}
