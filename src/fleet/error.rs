//! Error types for fleet service operations.

use camino::Utf8PathBuf;
use thiserror::Error;

use crate::command::CommandError;

/// Errors raised while talking to the fleet service.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum FleetError {
    /// Raised when an operation needs a session that has not been opened.
    #[error("not authenticated with the fleet service")]
    NotAuthenticated,
    /// Raised when the request could not be delivered.
    #[error("{operation} request failed: {message}")]
    Http {
        /// Fleet operation being performed.
        operation: &'static str,
        /// Transport error message.
        message: String,
    },
    /// Raised when the service answers with a non-success status.
    #[error("{operation} failed with HTTP {status}: {body}")]
    Status {
        /// Fleet operation being performed.
        operation: &'static str,
        /// HTTP status code.
        status: u16,
        /// Response body returned by the service.
        body: String,
    },
    /// Raised when the service response cannot be decoded.
    #[error("{operation} returned an unexpected payload: {message}")]
    Decode {
        /// Fleet operation being performed.
        operation: &'static str,
        /// Decoder error message.
        message: String,
    },
    /// Raised when a queried resource does not exist.
    #[error("{kind} '{name}' not found")]
    NotFound {
        /// Resource kind, for example `device`.
        kind: &'static str,
        /// Resource identifier that was looked up.
        name: String,
    },
    /// Raised when a local file involved in the operation fails.
    #[error("{path}: {message}")]
    Io {
        /// File being read or written.
        path: Utf8PathBuf,
        /// Operating system error message.
        message: String,
    },
    /// Raised when an external helper (`ssh`, `ssh-keygen`) fails.
    #[error(transparent)]
    Command(#[from] CommandError),
}
