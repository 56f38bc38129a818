//! The public URLs the tracking endpoints live at.

use url::Url;

use Result;

/// Placeholder for the mail hash in rewritten links. Every recipient's copy replaces it with the
/// hash of their own mail, so one link record serves the whole job.
pub const MAIL_HASH_PLACEHOLDER: &str = "{{mail_hash}}";

/// Builds the URLs of the redirect, ping, view and unsubscribe endpoints under a base URL.
#[derive(Clone, Debug)]
pub struct SiteUrls {
    base: Url,
}

impl SiteUrls {
    /// The base URL is where the web endpoints are mounted, e.g. `https://news.example.com/`.
    pub fn new(mut base: Url) -> SiteUrls {
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        SiteUrls { base }
    }

    /// Parses the base URL.
    pub fn parse(base: &str) -> Result<SiteUrls> {
        Ok(SiteUrls::new(Url::parse(base)?))
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Every redirect URL starts with this.
    pub fn redirect_prefix(&self) -> String {
        format!("{}redirect/", self.base)
    }

    /// The redirect URL of a link, with the mail hash left as a placeholder.
    pub fn redirect_template(&self, link_hash: &str) -> String {
        format!(
            "{}{}/{}",
            self.redirect_prefix(),
            MAIL_HASH_PLACEHOLDER,
            link_hash
        )
    }

    /// The redirect URL of a link as seen by the recipient of one mail.
    pub fn redirect(&self, mail_hash: &str, link_hash: &str) -> Result<Url> {
        Ok(self
            .base
            .join(&format!("redirect/{}/{}", mail_hash, link_hash))?)
    }

    /// The open-tracking URL of a mail.
    pub fn ping(&self, mail_hash: &str) -> Result<Url> {
        Ok(self.base.join(&format!("ping/{}", mail_hash))?)
    }

    /// The URL a mail can be read at in a browser.
    pub fn view(&self, mail_hash: &str) -> Result<Url> {
        Ok(self.base.join(&format!("view/{}", mail_hash))?)
    }

    /// The URL that unsubscribes the recipient of a mail.
    pub fn unsubscribe(&self, mail_hash: &str) -> Result<Url> {
        Ok(self.base.join(&format!("unsubscribe/{}", mail_hash))?)
    }
}

/// Appends the campaign parameters to a link target, keeping any the target already has.
pub fn with_campaign(target: &str, source: &str, medium: &str, campaign: &str) -> String {
    let mut url = match Url::parse(target) {
        Ok(url) => url,
        Err(_) => return target.to_string(),
    };
    let present = url
        .query_pairs()
        .map(|(k, _)| k.into_owned())
        .collect::<Vec<_>>();
    {
        let mut pairs = url.query_pairs_mut();
        for &(key, value) in &[
            ("utm_source", source),
            ("utm_medium", medium),
            ("utm_campaign", campaign),
        ] {
            if !value.is_empty() && !present.iter().any(|k| k == key) {
                pairs.append_pair(key, value);
            }
        }
    }
    url.into_string()
}
