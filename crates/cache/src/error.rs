//! Error types for the cache crate

use miette::Diagnostic;
use thiserror::Error;

/// Error type for store and engine operations
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// Errors from the shared core (I/O, corrupt entries, configuration)
    #[error(transparent)]
    #[diagnostic(transparent)]
    Core(#[from] recache_core::Error),

    /// Errors from the remote tier
    #[error(transparent)]
    #[diagnostic(transparent)]
    Remote(#[from] recache_remote::RemoteError),

    /// The cached entry's file set is incompatible with the caller's
    /// expectations. The entry is left in place; a caller with different
    /// expectations may legitimately use it.
    #[error("Cached entry lists unexpected file id: {file_id}")]
    #[diagnostic(code(recache::cache::mismatch))]
    Mismatch {
        /// The file id present in the entry but not in the expected set
        file_id: String,
    },

    /// Serialization error for manifests and statistics documents
    #[error("Serialization error: {message}")]
    #[diagnostic(code(recache::cache::serialization))]
    Serialization {
        /// Error message describing the serialization issue
        message: String,
    },
}

impl Error {
    /// Create an I/O error with path context
    #[must_use]
    pub fn io(
        source: std::io::Error,
        path: impl AsRef<std::path::Path>,
        operation: impl Into<String>,
    ) -> Self {
        Self::Core(recache_core::Error::io(source, path, operation))
    }

    /// Create a mismatch error
    #[must_use]
    pub fn mismatch(file_id: impl Into<String>) -> Self {
        Self::Mismatch {
            file_id: file_id.into(),
        }
    }

    /// True for errors that mark the entry itself as unusable, as
    /// opposed to environmental failures. The store removes such
    /// entries on sight.
    #[must_use]
    pub fn is_corrupt_entry(&self) -> bool {
        matches!(self, Self::Core(recache_core::Error::CorruptEntry { .. }))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}

/// Result type for store and engine operations
pub type Result<T> = std::result::Result<T, Error>;
