//! The tracking endpoints: redirects, pings, web views and unsubscribes.

mod endpoints;

use std::io;
use std::sync::Arc;

use futures::{future::poll_fn, prelude::*};
use tera::{Context, Tera};
use tokio_threadpool::blocking;
use warp::{
    self,
    filters::BoxedFilter,
    http::{
        header::{HeaderValue, CONTENT_TYPE},
        status::StatusCode,
        Response,
    },
    Filter, Rejection,
};

pub use web::endpoints::{ping, redirect, unsubscribe, view, PIXEL};

use render::Renderer;
use {log_err, Error, ErrorKind, Result, DB};

/// The pages the endpoints show, as opposed to the newsletters they render.
pub struct Pages {
    tera: Tera,
}

impl Pages {
    pub fn new() -> Result<Pages> {
        let mut tera = Tera::default();
        tera.add_raw_templates(vec![
            ("base.html", include_str!("base.html")),
            ("not-found.html", include_str!("not-found.html")),
            ("unsubscribe.html", include_str!("unsubscribe.html")),
        ])?;
        Ok(Pages { tera })
    }

    /// Renders a page. Errors become a plain-text 500.
    pub fn render(&self, name: &str, status: StatusCode, context: &Context) -> Response<Vec<u8>> {
        match self.tera.render(name, context) {
            Ok(html) => bytes(status, "text/html; charset=utf-8", html.into_bytes()),
            Err(e) => {
                let s = e
                    .iter()
                    .map(|e| e.to_string())
                    .collect::<Vec<String>>()
                    .join("\n");
                error!("{}", s);
                bytes(StatusCode::INTERNAL_SERVER_ERROR, "text/plain", s.into_bytes())
            }
        }
    }
}

/// A response with the given body and content type.
pub fn bytes(status: StatusCode, content_type: &'static str, body: Vec<u8>) -> Response<Vec<u8>> {
    let mut res = Response::new(body);
    res.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    *res.status_mut() = status;
    res
}

/// Runs a query on the thread pool's blocking section, so it doesn't stall the reactor.
fn blocking_query<F>(func: F) -> impl Future<Item = Response<Vec<u8>>, Error = Rejection>
where
    F: Fn() -> Result<Response<Vec<u8>>>,
{
    poll_fn(move || {
        blocking(|| func()).map_err(|_| {
            let err = io::Error::new(io::ErrorKind::Other, "not running on a thread pool");
            Error::from(ErrorKind::Io(err))
        })
    })
    .and_then(|r| r)
    .then(|r| {
        Ok::<_, Rejection>(match r {
            Ok(res) => res,
            Err(e) => {
                log_err(e.into());
                bytes(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "text/plain",
                    b"Internal Server Error".to_vec(),
                )
            }
        })
    })
}

/// Returns all the routes.
pub fn routes(db: DB, renderer: Arc<Renderer>) -> Result<BoxedFilter<(impl warp::Reply,)>> {
    let pages = Arc::new(Pages::new()?);

    let db1 = db.clone();
    let redirects = path!("redirect" / String / String)
        .and(warp::index())
        .and(warp::get2())
        .and_then(move |mail: String, link: String| {
            let db = db1.clone();
            blocking_query(move || endpoints::redirect(&db, &mail, &link))
        });

    let db2 = db.clone();
    let pings = path!("ping" / String)
        .and(warp::index())
        .and(warp::get2())
        .and_then(move |mail: String| {
            let db = db2.clone();
            blocking_query(move || endpoints::ping(&db, &mail))
        });

    let (db3, renderer3, pages3) = (db.clone(), renderer.clone(), pages.clone());
    let views = path!("view" / String)
        .and(warp::index())
        .and(warp::get2())
        .and_then(move |mail: String| {
            let (db, renderer, pages) = (db3.clone(), renderer3.clone(), pages3.clone());
            blocking_query(move || endpoints::view(&db, &renderer, &pages, &mail))
        });

    let unsubscribes = path!("unsubscribe" / String)
        .and(warp::index())
        .and(warp::get2())
        .and_then(move |mail: String| {
            let (db, renderer, pages) = (db.clone(), renderer.clone(), pages.clone());
            blocking_query(move || endpoints::unsubscribe(&db, renderer.registry(), &pages, &mail))
        });

    Ok(redirects.or(pings).or(views).or(unsubscribes).boxed())
}
