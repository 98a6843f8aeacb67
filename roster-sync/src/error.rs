//! Error types for roster-sync.

use std::path::PathBuf;

use thiserror::Error;

/// Failures talking to a remote document store.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON encode/decode failure for a remote document.
    #[error("remote document JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Change-notification backend failure.
    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    /// An id cannot be used as a document path segment.
    #[error("invalid document path segment '{0}'")]
    InvalidSegment(String),

    /// The store is unreachable (network down, permissions, quota).
    #[error("remote store unavailable: {0}")]
    Unavailable(String),
}

/// Convenience constructor for [`RemoteError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> RemoteError {
    RemoteError::Io {
        path: path.into(),
        source,
    }
}
