//! Rewriting the links of a snapshot so clicks go through the redirect endpoint.

use std::collections::HashMap;

use diesel::{self, prelude::*, sqlite::SqliteConnection};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use db::{self, schema::links};
use models::{Job, Link, NewLink};
use snapshot::Snapshot;
use urls::SiteUrls;
use Result;

static HTML_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)(?P<pre>\bhref\s*=\s*["'])(?P<url>[^"'\s>]+)"#).unwrap());

static MARKDOWN_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?P<pre>\]\(\s*<?)(?P<url>[^)\s>]+)"#).unwrap());

/// `[label]: url` reference definitions, used by `[text][label]` links.
static MARKDOWN_REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)(?P<pre>^[ ]{0,3}\[[^\]]+\]:[ \t]*<?)(?P<url>[^\s>]+)"#).unwrap()
});

/// `<https://...>` autolinks.
static MARKDOWN_AUTOLINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)(?P<pre><)(?P<url>https?://[^>\s]+)"#).unwrap());

static CHAR_REF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"&(?:#(?P<dec>[0-9]{1,7})|#[xX](?P<hex>[0-9a-fA-F]{1,6})",
        r"|(?P<name>amp|quot|apos|lt|gt));"
    ))
    .unwrap()
});

/// Finds link targets in content and swaps them for redirect URLs.
#[derive(Clone, Debug)]
pub struct LinkRewriter {
    urls: SiteUrls,
}

impl LinkRewriter {
    pub fn new(urls: SiteUrls) -> LinkRewriter {
        LinkRewriter { urls }
    }

    /// Whether a link target should be tracked: absolute web URLs that aren't already ours.
    pub fn is_rewritable(&self, target: &str) -> bool {
        let lower = target.to_ascii_lowercase();
        (lower.starts_with("http://") || lower.starts_with("https://"))
            && !target.starts_with(&self.urls.redirect_prefix())
    }

    /// Returns the distinct rewritable link targets in a block body, in order of appearance.
    pub fn targets(&self, body: &str, markdown: bool) -> Vec<String> {
        let mut targets = Vec::new();
        for re in patterns(markdown) {
            for caps in re.captures_iter(body) {
                let target = decode_char_refs(&caps["url"]);
                if self.is_rewritable(&target) && !targets.contains(&target) {
                    targets.push(target);
                }
            }
        }
        targets
    }

    /// Rewrites the links of every content block of the snapshot for the given job, creating one
    /// `Link` per distinct target. Returns the job's links for the rewritten targets.
    pub fn replace_links(
        &self,
        conn: &SqliteConnection,
        snapshot: &Snapshot,
        job: &Job,
    ) -> Result<Vec<Link>> {
        let mut created = HashMap::new();
        for block in snapshot.blocks() {
            let targets = self.targets(&block.body, block.markdown);
            if targets.is_empty() {
                continue;
            }

            let mut replacements = HashMap::new();
            for target in targets {
                let link = add_link(conn, job.id, &target)?;
                replacements.insert(target, self.urls.redirect_template(&link.hash));
                created.insert(link.id, link);
            }

            let body = rewrite(&block.body, block.markdown, &replacements);
            db::set_block_body(conn, block.id, &body)?;
            debug!(
                "Rewrote {} link(s) in block {} of job {}",
                replacements.len(),
                block.id,
                job.id
            );
        }

        let mut links = created.into_iter().map(|(_, link)| link).collect::<Vec<_>>();
        links.sort_by_key(|link| link.id);
        info!("Job {} tracks {} link(s)", job.id, links.len());
        Ok(links)
    }
}

fn patterns(markdown: bool) -> Vec<&'static Regex> {
    if markdown {
        vec![
            &*HTML_LINK,
            &*MARKDOWN_LINK,
            &*MARKDOWN_REFERENCE,
            &*MARKDOWN_AUTOLINK,
        ]
    } else {
        vec![&*HTML_LINK]
    }
}

/// Replaces every link target that has a replacement.
fn rewrite(body: &str, markdown: bool, replacements: &HashMap<String, String>) -> String {
    let mut body = body.to_string();
    for re in patterns(markdown) {
        body = re
            .replace_all(&body, |caps: &Captures| {
                let url = match replacements.get(&decode_char_refs(&caps["url"])) {
                    Some(url) => url.as_str(),
                    None => &caps["url"],
                };
                format!("{}{}", &caps["pre"], url)
            })
            .into_owned();
    }
    body
}

/// Decodes the character references that show up in link targets (`&amp;` and friends), so the
/// stored target is the URL a browser would follow.
fn decode_char_refs(url: &str) -> String {
    if !url.contains('&') {
        return url.to_string();
    }
    CHAR_REF
        .replace_all(url, |caps: &Captures| {
            let ch = if let Some(dec) = caps.name("dec") {
                dec.as_str().parse().ok().and_then(::std::char::from_u32)
            } else if let Some(hex) = caps.name("hex") {
                u32::from_str_radix(hex.as_str(), 16)
                    .ok()
                    .and_then(::std::char::from_u32)
            } else {
                match caps.name("name").map(|m| m.as_str()) {
                    Some("amp") => Some('&'),
                    Some("quot") => Some('"'),
                    Some("apos") => Some('\''),
                    Some("lt") => Some('<'),
                    Some("gt") => Some('>'),
                    _ => None,
                }
            };
            match ch {
                Some(ch) => ch.to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Returns the job's link for a target, creating it if this is the first time the target is seen.
pub fn add_link(conn: &SqliteConnection, job_id: i32, target: &str) -> Result<Link> {
    let existing = links::table
        .filter(links::job_id.eq(job_id))
        .filter(links::target.eq(target))
        .first::<Link>(conn)
        .optional()?;
    if let Some(link) = existing {
        return Ok(link);
    }

    diesel::insert_into(links::table)
        .values(&NewLink::new(job_id, target))
        .execute(conn)?;
    let id = db::last_id(conn)?;
    Ok(links::table.find(id).first(conn)?)
}
