//! Fundamental error type shared by the core, the resource store, and
//! every driver.

use std::fmt;
use tokio::sync::{mpsc, oneshot};

/// Enumerates the errors that can be reported anywhere in `gatewayd`.
/// Driver and backend authors should map their own failures into one
/// of these kinds rather than inventing a new variant per crate; add a
/// variant here only when none of the existing ones can carry the
/// detail a caller needs.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Error {
    /// A caller-supplied argument was malformed (bad URI, invalid
    /// mode transition, non-UTF8 id, ...). Rejected at the API
    /// boundary; never retried.
    InvalidArgument(String),

    /// The requested device, endpoint, resource, or metadata entry
    /// doesn't exist.
    NotFound,

    /// The operation isn't permitted given the resource's mode (write
    /// to a non-writeable resource, execute a non-executable one, or
    /// an attempt to clear SENSITIVE).
    UnauthorizedMode(String),

    /// A driver call failed. Carries the driver name for the log
    /// line.
    DriverFailure(String),

    /// The device stopped responding; raised by the communication
    /// watchdog.
    CommunicationLost,

    /// The persistence backend failed to read or write.
    StoreFailure(String),

    /// A driver call (or a collaborator we're blocking on) didn't
    /// complete in time.
    Timeout,

    /// The peer end of an internal request/reply channel is gone —
    /// the core or the driver has already shut down.
    MissingPeer(String),

    /// A value didn't have the type the caller expected.
    TypeError,

    /// A configuration file or `[[driver]] cfg` table was malformed.
    ConfigError(String),
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::InvalidArgument(v) => write!(f, "invalid argument: {}", v),
            Error::NotFound => write!(f, "not found"),
            Error::UnauthorizedMode(v) => write!(f, "unauthorized: {}", v),
            Error::DriverFailure(v) => write!(f, "driver failure: {}", v),
            Error::CommunicationLost => write!(f, "communication lost"),
            Error::StoreFailure(v) => write!(f, "store failure: {}", v),
            Error::Timeout => write!(f, "timed out"),
            Error::MissingPeer(v) => write!(f, "missing peer: {}", v),
            Error::TypeError => write!(f, "incorrect type"),
            Error::ConfigError(v) => write!(f, "config error: {}", v),
        }
    }
}

// These let any code that drives an mpsc/oneshot request-reply pair
// (core <-> driver, core <-> client) use `?` directly instead of
// matching on the channel error.

impl<T> From<mpsc::error::SendError<T>> for Error {
    fn from(_: mpsc::error::SendError<T>) -> Self {
        Error::MissingPeer(String::from("request channel is closed"))
    }
}

impl From<oneshot::error::RecvError> for Error {
    fn from(_: oneshot::error::RecvError) -> Self {
        Error::MissingPeer(String::from("reply was dropped"))
    }
}
