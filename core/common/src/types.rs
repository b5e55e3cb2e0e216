//! Common types used throughout AutoSync.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// The kind of sync operation a worker task performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// Pull upstream changes into a working tree.
    Pull,
    /// Commit and push a single file.
    Push,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Pull => write!(f, "pull"),
            OperationKind::Push => write!(f, "push"),
        }
    }
}

/// The unit of mutual exclusion: (kind, directory, optional file).
///
/// Identity is structural. At most one operation per key is ever in
/// flight: one pull per directory, one push per (directory, file).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OperationKey {
    kind: OperationKind,
    dir: PathBuf,
    file: Option<PathBuf>,
}

impl OperationKey {
    /// Key for a pull of the given working tree.
    pub fn pull(dir: impl Into<PathBuf>) -> Self {
        Self {
            kind: OperationKind::Pull,
            dir: dir.into(),
            file: None,
        }
    }

    /// Key for a commit-and-push of one file inside a working tree.
    ///
    /// `file` is the path relative to `dir`.
    pub fn push(dir: impl Into<PathBuf>, file: impl Into<PathBuf>) -> Self {
        Self {
            kind: OperationKind::Push,
            dir: dir.into(),
            file: Some(file.into()),
        }
    }

    /// The operation kind.
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// The target directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The relative file path, for push keys.
    pub fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }
}

impl fmt::Display for OperationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.file {
            Some(file) => write!(f, "{}:{}:{}", self.kind, self.dir.display(), file.display()),
            None => write!(f, "{}:{}", self.kind, self.dir.display()),
        }
    }
}

/// A user-facing message produced by a background operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    /// Text to display.
    pub text: String,
    /// Whether the host should render this as an error.
    pub is_error: bool,
}

impl Notice {
    /// An informational notice.
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: false,
        }
    }

    /// An error notice.
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: true,
        }
    }
}

/// An element of the notification channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncMessage {
    /// A displayable notice.
    Notice(Notice),
    /// Control marker: files changed on disk, the host should reload any
    /// open views once it drains this. Never suppressed by silent mode.
    ReloadRequest,
}
