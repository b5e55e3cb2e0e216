//! Common error types for AutoSync.

use thiserror::Error;

/// Top-level error type for AutoSync operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Directory is not a valid working tree or is inaccessible.
    #[error("not a version-controlled working tree: {0}")]
    NotARepository(String),

    /// Configuration source could not be reached.
    ///
    /// Callers fall back to documented defaults; this variant never
    /// reaches the host.
    #[error("configuration unavailable: {0}")]
    Config(String),

    /// Staging or committing local changes failed.
    #[error("commit failed: {0}")]
    Commit(String),

    /// Any other working-tree operation failed.
    #[error("working tree error: {0}")]
    Tree(String),

    /// A remote operation (pull or push) failed.
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Classification of a remote failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
    /// The remote had nothing new; not a real failure.
    UpToDate,
    /// The pull produced merge conflicts that need manual resolution.
    Conflict,
    /// Any other remote failure.
    Other,
}

/// A failed remote operation, carrying its classification.
///
/// Backends produce these from whatever their transport reports; the sync
/// engine may reclassify based on the message (some backends only surface
/// conflicts as text).
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
}

impl RemoteError {
    /// A pull that found the tree already current.
    pub fn up_to_date() -> Self {
        Self {
            kind: RemoteErrorKind::UpToDate,
            message: "already up to date".to_string(),
        }
    }

    /// A pull that stopped on merge conflicts.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self {
            kind: RemoteErrorKind::Conflict,
            message: message.into(),
        }
    }

    /// Any other remote failure.
    pub fn other(message: impl Into<String>) -> Self {
        Self {
            kind: RemoteErrorKind::Other,
            message: message.into(),
        }
    }
}
