use std::fmt;

/// Error taxonomy shared by the storage adapter, the engine, and handlers.
///
/// Storage primitives never return this for a missing row or a no-op update —
/// only for true backend failures.
#[derive(Debug)]
pub enum Error {
    /// Connectivity or serialization failure from the storage adapter.
    Transient(anyhow::Error),
    /// A caller's authority relied on a lease that has since been lost.
    LostLease,
    /// A handler signaled a non-recoverable failure.
    HandlerPermanent(String),
    /// e.g. a duplicate outbox `message_id` on enqueue where divergent payloads
    /// were supplied.
    ConstraintViolation(String),
    /// Catch-all for context-carrying errors raised outside the taxonomy above.
    Other(anyhow::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Transient(err) => write!(f, "transient storage error: {err}"),
            Error::LostLease => write!(f, "lease lost"),
            Error::HandlerPermanent(msg) => write!(f, "handler permanent failure: {msg}"),
            Error::ConstraintViolation(msg) => write!(f, "constraint violation: {msg}"),
            Error::Other(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Transient(err) | Error::Other(err) => err.source(),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::Transient(err.into())
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Other(err)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
