use std::fmt::{Display, Formatter, Result as FmtResult};

use failure::{Backtrace, Context, Fail, SyncFailure};

/// A convenient alias for Result.
pub type Result<T> = ::std::result::Result<T, Error>;

/// The kind of an application error.
#[derive(Debug, Fail)]
pub enum ErrorKind {
    /// A job was asked to do something its current status (or its newsletter) doesn't allow.
    #[fail(display = "Invalid job state: {}", _0)]
    InvalidJobState(String),

    /// The job is already being delivered by this process.
    #[fail(display = "Job {} is already being delivered", _0)]
    JobBusy(i32),

    /// Delivery was cancelled between two mails.
    #[fail(display = "Delivery of job {} was cancelled", _0)]
    Cancelled(i32),

    /// The group object of a job can't enumerate recipients.
    #[fail(display = "{:?} is not a recipient source", _0)]
    UnsupportedRecipientSource(String),

    /// The person a mail is addressed to can't be resolved to an address.
    #[fail(display = "{:?} is not a recipient", _0)]
    UnsupportedRecipient(String),

    /// A recipient's address doesn't look like an email address.
    #[fail(display = "Invalid recipient address {:?}", _0)]
    InvalidRecipientAddress(String),

    /// A record that was looked up doesn't exist.
    #[fail(display = "{} {} not found", _0, _1)]
    NotFound(&'static str, String),

    /// The transport refused or failed to send a message.
    #[fail(display = "Transport error: {}", _0)]
    Transport(String),

    /// An error from Diesel.
    #[fail(display = "Diesel error: {}", _0)]
    Diesel(::diesel::result::Error),

    /// An I/O error.
    #[fail(display = "I/O error: {}", _0)]
    Io(::std::io::Error),

    /// An error from Lettre's mail builder.
    #[fail(display = "Mail builder error: {}", _0)]
    Mail(::lettre_email::error::Error),

    /// An error from R2D2.
    #[fail(display = "R2D2 error: {}", _0)]
    R2D2(::diesel::r2d2::PoolError),

    /// An error serializing template data.
    #[fail(display = "JSON error: {}", _0)]
    SerdeJson(::serde_json::error::Error),

    /// An error from Lettre's SMTP transport.
    #[fail(display = "SMTP error: {}", _0)]
    Smtp(::lettre::smtp::error::Error),

    /// An error from the Tera template engine.
    #[fail(display = "Template error: {}", _0)]
    Tera(SyncFailure<::tera::Error>),

    /// An error when constructing a URL.
    #[fail(display = "URL error: {}", _0)]
    Url(::url::ParseError),
}

impl From<::diesel::result::Error> for ErrorKind {
    fn from(err: ::diesel::result::Error) -> ErrorKind {
        ErrorKind::Diesel(err)
    }
}

impl From<::std::io::Error> for ErrorKind {
    fn from(err: ::std::io::Error) -> ErrorKind {
        ErrorKind::Io(err)
    }
}

impl From<::lettre_email::error::Error> for ErrorKind {
    fn from(err: ::lettre_email::error::Error) -> ErrorKind {
        ErrorKind::Mail(err)
    }
}

impl From<::diesel::r2d2::PoolError> for ErrorKind {
    fn from(err: ::diesel::r2d2::PoolError) -> ErrorKind {
        ErrorKind::R2D2(err)
    }
}

impl From<::serde_json::error::Error> for ErrorKind {
    fn from(err: ::serde_json::error::Error) -> ErrorKind {
        ErrorKind::SerdeJson(err)
    }
}

impl From<::lettre::smtp::error::Error> for ErrorKind {
    fn from(err: ::lettre::smtp::error::Error) -> ErrorKind {
        ErrorKind::Smtp(err)
    }
}

impl From<::tera::Error> for ErrorKind {
    fn from(err: ::tera::Error) -> ErrorKind {
        ErrorKind::Tera(SyncFailure::new(err))
    }
}

impl From<::url::ParseError> for ErrorKind {
    fn from(err: ::url::ParseError) -> ErrorKind {
        ErrorKind::Url(err)
    }
}

/// An application error.
#[derive(Debug)]
pub struct Error {
    inner: Context<ErrorKind>,
}

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        &self.inner.get_context()
    }

    /// Whether the error came from the mail transport rather than from our own bookkeeping.
    pub fn is_transport(&self) -> bool {
        match *self.kind() {
            ErrorKind::Transport(_) | ErrorKind::Smtp(_) => true,
            _ => false,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        Display::fmt(&self.inner, f)
    }
}

impl Fail for Error {
    fn cause(&self) -> Option<&dyn Fail> {
        self.inner.cause()
    }

    fn backtrace(&self) -> Option<&Backtrace> {
        self.inner.backtrace()
    }
}

impl<E: Into<ErrorKind>> From<E> for Error {
    fn from(err: E) -> Error {
        Context::new(err.into()).into()
    }
}

impl From<Context<ErrorKind>> for Error {
    fn from(inner: Context<ErrorKind>) -> Error {
        Error { inner: inner }
    }
}
