//! Version-control backend trait definitions.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

use autosync_common::Result;

/// Outcome of a successful pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullOutcome {
    /// New upstream commits were integrated; files may have changed on disk.
    Updated,
    /// The tree was already current; nothing changed.
    AlreadyUpToDate,
}

/// An open handle to one version-controlled working tree.
///
/// All operations are async; implementations backed by blocking libraries
/// must move the work off the calling task themselves. Every method may be
/// called from multiple worker tasks concurrently.
#[async_trait]
pub trait WorkingTree: Send + Sync {
    /// Absolute root directory of the working tree.
    fn root(&self) -> &Path;

    /// Whether the tree has uncommitted modifications.
    ///
    /// With `pathspec`, asks about that single path (relative to the
    /// root); without, about the whole tree. Untracked files do not count
    /// as dirty.
    async fn is_dirty(&self, pathspec: Option<&Path>) -> Result<bool>;

    /// Whether `path` (relative to the root) exists on disk but has never
    /// been committed.
    async fn is_untracked(&self, path: &Path) -> Result<bool>;

    /// Stage every pending change in the tree.
    async fn stage_all(&self) -> Result<()>;

    /// Stage a single path (relative to the root).
    async fn stage_path(&self, path: &Path) -> Result<()>;

    /// Commit whatever is staged.
    ///
    /// # Errors
    /// - Nothing staged, no identity configured, or the object store
    ///   rejects the write.
    async fn commit(&self, message: &str) -> Result<()>;

    /// Pull from the tracked remote and integrate into the current branch.
    ///
    /// # Errors
    /// - `Error::Remote` with `Conflict` kind when the merge stops on
    ///   conflicts (the tree is left clean; nothing is half-merged)
    /// - `Error::Remote` with `Other` kind for transport failures
    async fn pull(&self) -> Result<PullOutcome>;

    /// Push the current branch to the tracked remote.
    async fn push(&self) -> Result<()>;
}

/// Factory for working-tree handles.
#[async_trait]
pub trait VcsBackend: Send + Sync {
    /// Open the working tree rooted at `dir`.
    ///
    /// # Errors
    /// - `Error::NotARepository` when `dir` is not a valid working tree or
    ///   is inaccessible
    async fn open(&self, dir: &Path) -> Result<Arc<dyn WorkingTree>>;
}
