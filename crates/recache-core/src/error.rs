//! Error types shared across the recache crates

use miette::Diagnostic;
use std::path::Path;
use thiserror::Error;

/// Error type for core operations
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// I/O error with optional path context
    #[error("I/O {operation} failed{}", path.as_ref().map_or(String::new(), |p| format!(": {}", p.display())))]
    #[diagnostic(
        code(recache::io),
        help("Check file permissions and ensure the path exists")
    )]
    Io {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
        /// Path that caused the error, if available
        path: Option<Box<Path>>,
        /// Operation that failed (e.g., "read", "write", "create")
        operation: String,
    },

    /// Configuration or validation error
    #[error("Configuration error: {message}")]
    #[diagnostic(code(recache::config))]
    Configuration {
        /// Error message describing the configuration issue
        message: String,
    },

    /// Cache entry metadata or payload is unreadable
    #[error("Corrupt cache entry: {reason}")]
    #[diagnostic(
        code(recache::corrupt),
        help("The entry is treated as a cache miss and removed from the store")
    )]
    CorruptEntry {
        /// What made the entry unreadable
        reason: String,
    },

    /// A hash string was not valid lowercase hex of the right width
    #[error("Invalid hash string: {input:?}")]
    #[diagnostic(code(recache::hash))]
    InvalidHash {
        /// The offending input
        input: String,
    },
}

impl Error {
    /// Create an I/O error with path context
    #[must_use]
    pub fn io(
        source: std::io::Error,
        path: impl AsRef<Path>,
        operation: impl Into<String>,
    ) -> Self {
        Self::Io {
            source,
            path: Some(path.as_ref().into()),
            operation: operation.into(),
        }
    }

    /// Create an I/O error without path context
    #[must_use]
    pub fn io_no_path(source: std::io::Error, operation: impl Into<String>) -> Self {
        Self::Io {
            source,
            path: None,
            operation: operation.into(),
        }
    }

    /// Create a configuration error
    #[must_use]
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

    /// Create a corrupt-entry error
    #[must_use]
    pub fn corrupt(reason: impl Into<String>) -> Self {
        Self::CorruptEntry {
            reason: reason.into(),
        }
    }
}

/// Result type for core operations
pub type Result<T> = std::result::Result<T, Error>;
