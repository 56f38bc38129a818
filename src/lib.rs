extern crate chrono;
#[macro_use]
extern crate diesel;
#[macro_use]
extern crate failure;
extern crate futures;
extern crate hex;
extern crate lettre;
extern crate lettre_email;
#[macro_use]
extern crate log;
extern crate once_cell;
extern crate pulldown_cmark;
extern crate rand;
extern crate regex;
extern crate serde;
#[macro_use]
extern crate serde_derive;
#[macro_use]
extern crate serde_json;
extern crate sha2;
extern crate tera;
extern crate tokio_threadpool;
extern crate url;
#[macro_use]
extern crate warp;

#[macro_use]
mod macros;

pub mod bounce;
pub mod db;
pub mod delivery;
mod errors;
pub mod hash;
pub mod jobs;
pub mod links;
pub mod lists;
pub mod mailer;
pub mod models;
pub mod recipients;
pub mod render;
pub mod snapshot;
pub mod urls;
pub mod util;
pub mod web;

pub use db::DB;
pub use delivery::{CancelToken, DeliveryReport};
pub use errors::{Error, ErrorKind, Result};
pub use jobs::Dispatcher;
pub use mailer::{Mailer, MemoryTransport, Message, Transport};
pub use models::{EntityRef, JobStatus};
pub use recipients::Registry;
pub use render::Renderer;
pub use urls::SiteUrls;
pub use util::log_err;
