//! Error types for the remote backend

use miette::Diagnostic;
use thiserror::Error;

/// Error type for remote cache operations
#[derive(Error, Debug, Diagnostic)]
pub enum RemoteError {
    /// The backend could not be reached at all
    #[error("Remote cache unreachable at {url}: {message}")]
    #[diagnostic(
        code(recache::remote::unreachable),
        help("The build continues with the local cache only")
    )]
    Unreachable {
        /// Endpoint that failed
        url: String,
        /// Transport-level failure description
        message: String,
    },

    /// The backend answered, but not in a way we can use
    #[error("Remote protocol error during {operation}: {message}")]
    #[diagnostic(code(recache::remote::protocol))]
    Protocol {
        /// Operation that failed (e.g., "lookup", "add")
        operation: String,
        /// What went wrong
        message: String,
    },

    /// Errors from the shared core (I/O, corrupt payloads)
    #[error(transparent)]
    #[diagnostic(transparent)]
    Core(#[from] recache_core::Error),
}

impl RemoteError {
    /// Create an unreachable error
    #[must_use]
    pub fn unreachable(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unreachable {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Create a protocol error
    #[must_use]
    pub fn protocol(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Protocol {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

/// Result type for remote cache operations
pub type Result<T> = std::result::Result<T, RemoteError>;
