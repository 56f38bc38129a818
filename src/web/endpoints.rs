use tera::Context;
use warp::http::{
    header::{HeaderValue, CACHE_CONTROL, LOCATION},
    status::StatusCode,
    Response,
};

use hash;
use lists;
use recipients::Registry;
use render::Renderer;
use urls::with_campaign;
use web::{bytes, Pages};
use {Result, DB};

/// A transparent 1x1 GIF.
pub const PIXEL: &[u8] = &[
    0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0x01, 0x00, 0x01, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00,
    0x00, 0xFF, 0xFF, 0xFF, 0x21, 0xF9, 0x04, 0x01, 0x00, 0x00, 0x00, 0x00, 0x2C, 0x00, 0x00,
    0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x02, 0x02, 0x44, 0x01, 0x00, 0x3B,
];

fn not_found() -> Response<Vec<u8>> {
    bytes(StatusCode::NOT_FOUND, "text/plain", b"Not Found".to_vec())
}

/// Counts a click, if the mail and the link are from the same job, and sends the visitor on to
/// the link's target.
pub fn redirect(db: &DB, mail_hash: &str, link_hash: &str) -> Result<Response<Vec<u8>>> {
    let link = match db.link_by_hash(link_hash)? {
        Some(link) => link,
        None => return Ok(not_found()),
    };
    let mail = if hash::is_well_formed(mail_hash) {
        db.mail_by_hash(mail_hash)?
    } else {
        None
    };
    match mail {
        Some(ref mail) if mail.job_id == link.job_id => db.record_click(link.id)?,
        _ => debug!("Click on link {} doesn't come from one of its mails", link.id),
    }

    let job = db.get_job(link.job_id)?;
    let newsletter = match job.newsletter_id {
        Some(id) => db.get_newsletter(id)?,
        None => None,
    };
    let target = match newsletter {
        Some(newsletter) => with_campaign(
            &link.target,
            &newsletter.utm_source,
            &newsletter.utm_medium,
            &job.utm_campaign,
        ),
        None => link.target.clone(),
    };

    let location = match HeaderValue::from_str(&target) {
        Ok(location) => location,
        Err(_) => {
            warn!("Link {} has an unusable target {:?}", link.id, target);
            return Ok(not_found());
        }
    };
    let mut res = bytes(StatusCode::FOUND, "text/plain", Vec::new());
    res.headers_mut().insert(LOCATION, location);
    Ok(res)
}

/// Marks a mail as viewed. Answers with the pixel whether or not the mail exists.
pub fn ping(db: &DB, mail_hash: &str) -> Result<Response<Vec<u8>>> {
    if hash::is_well_formed(mail_hash) && db.mark_viewed(mail_hash)? {
        debug!("Mail {} was viewed", mail_hash);
    }
    let mut res = bytes(StatusCode::OK, "image/gif", PIXEL.to_vec());
    res.headers_mut()
        .insert(CACHE_CONTROL, HeaderValue::from_static("no-cache, no-store"));
    Ok(res)
}

/// Shows a mail as a web page. This counts as viewing it.
pub fn view(
    db: &DB,
    renderer: &Renderer,
    pages: &Pages,
    mail_hash: &str,
) -> Result<Response<Vec<u8>>> {
    let mail = if hash::is_well_formed(mail_hash) {
        db.mail_by_hash(mail_hash)?
    } else {
        None
    };
    let mail = match mail {
        Some(mail) => mail,
        None => return Ok(pages.render("not-found.html", StatusCode::NOT_FOUND, &Context::new())),
    };

    let job = db.get_job(mail.job_id)?;
    let ctx = renderer.load(db, &job)?;
    let recipient = renderer.registry().recipient(&mail.person())?;
    let html = renderer.render_body(&ctx, &mail, &*recipient)?;
    db.mark_viewed(&mail.hash)?;
    Ok(bytes(StatusCode::OK, "text/html; charset=utf-8", html.into_bytes()))
}

/// Unsubscribes the recipient of a mail from the job's mailing list.
pub fn unsubscribe(
    db: &DB,
    registry: &Registry,
    pages: &Pages,
    mail_hash: &str,
) -> Result<Response<Vec<u8>>> {
    let done = hash::is_well_formed(mail_hash) && lists::unsubscribe(db, registry, mail_hash)?;
    Ok(pages.render("unsubscribe.html", StatusCode::OK, &context! { done: done }))
}
