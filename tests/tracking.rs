extern crate bulkmail;
extern crate tera;
extern crate warp;

mod support;

use bulkmail::{
    bounce::{process_bounce, Bounce, DsnClassifier},
    models::{NewContentBlock, TemplateContents},
    web::{self, Pages, PIXEL},
    MemoryTransport, SiteUrls,
};
use warp::http::{header::LOCATION, StatusCode};

use support::{Fixture, BASE_URL};

const THREE: &[&str] = &["alice@example.com", "bob@example.com", "carol@example.com"];

/// A fixture with one job that has been sent.
fn sent() -> (Fixture, i32) {
    let f = Fixture::new(THREE);
    let job = f.job();
    f.dispatcher.send(job, &mut MemoryTransport::new()).unwrap();
    (f, job)
}

#[test]
fn clicks_are_counted_and_redirected_with_campaign_parameters() {
    let (f, job) = sent();
    let mail = &f.db.mails(job).unwrap()[0];
    let link = f.db.links(job).unwrap()[1].clone();
    assert_eq!(link.target, "https://example.org/b?x=1");

    let res = web::redirect(&f.db, &mail.hash, &link.hash).unwrap();
    assert_eq!(res.status(), StatusCode::FOUND);
    assert_eq!(
        res.headers()[LOCATION].to_str().unwrap(),
        "https://example.org/b?x=1&utm_source=newsletter&utm_medium=cpc&utm_campaign=spring"
    );
    web::redirect(&f.db, &mail.hash, &link.hash).unwrap();

    assert_eq!(f.db.link_by_hash(&link.hash).unwrap().unwrap().click_count, 2);
    assert_eq!(f.dispatcher.stats(job).unwrap().clicks, 2);
}

#[test]
fn escaped_ampersands_keep_every_parameter() {
    let f = Fixture::new(THREE);
    f.db.add_content_block(&NewContentBlock::new(
        f.newsletter.id,
        "main",
        1,
        TemplateContents::Html(
            r#"<a href="https://example.org/p?a=1&amp;b=2&amp;c=3">P</a>"#.to_string(),
        ),
    ))
    .unwrap();
    let job = f.job();
    f.dispatcher.send(job, &mut MemoryTransport::new()).unwrap();

    let mail = &f.db.mails(job).unwrap()[0];
    let link = f
        .db
        .links(job)
        .unwrap()
        .into_iter()
        .find(|link| link.target.starts_with("https://example.org/p"))
        .unwrap();
    assert_eq!(link.target, "https://example.org/p?a=1&b=2&c=3");

    let res = web::redirect(&f.db, &mail.hash, &link.hash).unwrap();
    assert_eq!(
        res.headers()[LOCATION].to_str().unwrap(),
        "https://example.org/p?a=1&b=2&c=3&utm_source=newsletter&utm_medium=cpc&utm_campaign=spring"
    );
}

#[test]
fn clicks_from_other_jobs_are_not_counted() {
    let (f, job) = sent();
    let other = f.job();
    f.dispatcher.send(other, &mut MemoryTransport::new()).unwrap();

    let stranger = &f.db.mails(other).unwrap()[0];
    let link = &f.db.links(job).unwrap()[0];
    let res = web::redirect(&f.db, &stranger.hash, &link.hash).unwrap();
    assert_eq!(res.status(), StatusCode::FOUND);
    let res = web::redirect(&f.db, "garbage", &link.hash).unwrap();
    assert_eq!(res.status(), StatusCode::FOUND);
    assert_eq!(f.dispatcher.stats(job).unwrap().clicks, 0);

    let res = web::redirect(&f.db, &stranger.hash, "nope").unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[test]
fn pings_mark_mails_viewed() {
    let (f, job) = sent();
    let mail = f.db.mails(job).unwrap()[2].clone();

    let res = web::ping(&f.db, &mail.hash).unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(&res.body()[..], PIXEL);
    web::ping(&f.db, &mail.hash).unwrap();

    assert!(f.db.get_mail(mail.id).unwrap().viewed);
    assert_eq!(f.dispatcher.stats(job).unwrap().viewed, 1);

    let res = web::ping(&f.db, "0123456789abcdef0123456789abcdef").unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[test]
fn mails_can_be_viewed_in_a_browser() {
    let (f, job) = sent();
    let mail = f.db.mails(job).unwrap()[1].clone();
    let pages = Pages::new().unwrap();

    let res = web::view(&f.db, f.dispatcher.renderer(), &pages, &mail.hash).unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let html = String::from_utf8(res.body().clone()).unwrap();
    assert!(html.contains("Dear bob,"));
    assert!(html.contains(&format!("{}redirect/{}/", BASE_URL, mail.hash)));
    assert!(f.db.get_mail(mail.id).unwrap().viewed);

    let res = web::view(&f.db, f.dispatcher.renderer(), &pages, "nope").unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[test]
fn unsubscribing_removes_the_address_from_later_jobs() {
    let (f, job) = sent();
    let mail = &f.db.mails(job).unwrap()[0];
    let pages = Pages::new().unwrap();

    let res = web::unsubscribe(
        &f.db,
        f.dispatcher.renderer().registry(),
        &pages,
        &mail.hash,
    )
    .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert!(String::from_utf8(res.body().clone())
        .unwrap()
        .contains("Unsubscribed"));

    let later = f.job();
    let mut transport = MemoryTransport::new();
    f.dispatcher.send(later, &mut transport).unwrap();
    let recipients = transport
        .messages()
        .iter()
        .map(|m| m.to.as_str())
        .collect::<Vec<_>>();
    assert_eq!(recipients, vec!["bob@example.com", "carol@example.com"]);
}

fn dsn(status: &str, hash: &str) -> String {
    format!(
        "From: MAILER-DAEMON@mx.example.org\r\n\
         Content-Type: multipart/report; report-type=delivery-status; boundary=\"x\"\r\n\
         \r\n\
         --x\r\n\
         Content-Type: message/delivery-status\r\n\
         \r\n\
         Status: {}\r\n\
         --x\r\n\
         Content-Type: text/html\r\n\
         \r\n\
         <img src=\"{}ping/{}\">\r\n\
         --x--\r\n",
        status, BASE_URL, hash
    )
}

#[test]
fn bounces_are_traced_back_to_their_mail() {
    let (f, job) = sent();
    let mail = f.db.mails(job).unwrap()[1].clone();
    let urls = SiteUrls::parse(BASE_URL).unwrap();

    let delayed = process_bounce(&f.db, &urls, &DsnClassifier, dsn("4.4.1", &mail.hash).as_bytes())
        .unwrap()
        .unwrap();
    assert_eq!(delayed.bounce, Bounce::Transient);
    assert!(!f.db.get_mail(mail.id).unwrap().bounced);

    let failed = process_bounce(&f.db, &urls, &DsnClassifier, dsn("5.1.1", &mail.hash).as_bytes())
        .unwrap()
        .unwrap();
    assert_eq!(failed.bounce, Bounce::Permanent);
    assert_eq!(failed.mail.map(|m| m.id), Some(mail.id));
    assert!(f.db.get_mail(mail.id).unwrap().bounced);
    assert_eq!(f.dispatcher.stats(job).unwrap().bounced, 1);

    let plain = b"Subject: hi\r\n\r\nhello";
    let unrelated = process_bounce(&f.db, &urls, &DsnClassifier, plain).unwrap();
    assert!(unrelated.is_none());
}
