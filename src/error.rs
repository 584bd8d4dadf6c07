//! All the errors that this crate can emit are defined in the
//! [`error::Error`] enum.

use std::num::ParseIntError;

use thiserror::Error;

/// The fixed, closed set of status classifications a caller can react to.
///
/// Every [`Error`] maps to exactly one of these via [`Error::kind`]. This is
/// the boundary a future C ABI shim would use to pick the numeric VISA status
/// code; the core itself never exposes numeric codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Read ended on device EOM or termination character.
    SuccessTermChar,
    /// Read filled the caller buffer without a terminator.
    SuccessMaxCount,
    /// Unknown session or find-list handle.
    InvalidObject,
    /// Parser rejected the resource string.
    InvalidResourceName,
    /// Discovery empty; host unresolved; device absent.
    ResourceNotFound,
    /// USB interface claim rejected.
    ResourceLocked,
    /// Deadline exceeded on any I/O.
    Timeout,
    /// Protocol violation, wire corruption, or device-reported error.
    Io,
    /// Peer closed or socket is not open.
    ConnectionLost,
    /// Memory exhaustion.
    AllocationFailure,
    /// Operation unavailable on this transport.
    NotSupported,
    /// Attribute id not recognized for this session.
    UnsupportedAttribute,
}

/// Define errors that originate from this crate.
#[derive(Error, Debug)]
#[allow(clippy::module_name_repetitions)]
pub enum Error {
    /// The string passed to the resource parser could not be tokenized into
    /// a valid descriptor.
    #[error("invalid resource name: {0}")]
    InvalidResourceName(String),

    /// A session or find-list handle that is not currently live was used.
    #[error("invalid object handle: {0}")]
    InvalidObject(u32),

    /// Discovery produced no matching resources, a hostname failed to
    /// resolve, or the addressed device is not present.
    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    /// A USB interface claim was rejected, usually because another process
    /// already holds it.
    #[error("resource locked: {0}")]
    ResourceLocked(String),

    /// A caller-supplied or session-default deadline elapsed before the
    /// operation completed.
    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// A protocol violation, wire-level corruption, or device-reported
    /// error occurred.
    #[error("I/O protocol error: {0}")]
    Protocol(String),

    /// The peer closed the connection, or the transport's socket is not
    /// open.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// The requested transport or discovery mechanism is unavailable,
    /// typically because its native dependency was not compiled in.
    #[error("operation not supported: {0}")]
    NotSupported(String),

    /// An attribute id was not recognized for the session it was applied
    /// to.
    #[error("unsupported attribute: {0}")]
    UnsupportedAttribute(String),

    /// Converts a [`std::io::Error`] into an [`Error`].
    #[error("I/O error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// An address string could not be parsed.
    #[error("address parsing error: {0}")]
    AddrParse(#[from] std::net::AddrParseError),

    /// An integer field in a resource string could not be parsed.
    #[error("integer parsing error: {0}")]
    ParseInt(#[from] ParseIntError),

    /// An uncategorized error, retained for cases that do not cleanly map
    /// onto a more specific variant.
    #[error("{0}")]
    Other(String),

    /// The session table or a find list has no free slots left.
    #[error("table exhausted: {0}")]
    TableExhausted(String),
}

impl Error {
    /// Map this error onto the closed [`ErrorKind`] taxonomy a caller can
    /// branch on.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidResourceName(_) => ErrorKind::InvalidResourceName,
            Self::InvalidObject(_) => ErrorKind::InvalidObject,
            Self::ResourceNotFound(_) => ErrorKind::ResourceNotFound,
            Self::ResourceLocked(_) => ErrorKind::ResourceLocked,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Protocol(_) => ErrorKind::Io,
            Self::ConnectionLost(_) => ErrorKind::ConnectionLost,
            Self::NotSupported(_) => ErrorKind::NotSupported,
            Self::UnsupportedAttribute(_) => ErrorKind::UnsupportedAttribute,
            Self::Io { source } => match source.kind() {
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                    ErrorKind::Timeout
                }
                std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::BrokenPipe
                | std::io::ErrorKind::NotConnected => ErrorKind::ConnectionLost,
                std::io::ErrorKind::OutOfMemory => ErrorKind::AllocationFailure,
                _ => ErrorKind::Io,
            },
            Self::AddrParse(_) | Self::ParseInt(_) => ErrorKind::InvalidResourceName,
            Self::Other(_) => ErrorKind::Io,
            Self::TableExhausted(_) => ErrorKind::AllocationFailure,
        }
    }
}

/// The crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;
