//! In-memory version-control backend for testing.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;

use autosync_common::{Error, RemoteError, Result};

use crate::backend::{PullOutcome, VcsBackend, WorkingTree};

/// In-memory backend.
///
/// Useful for testing the coordinator without real repositories: trees are
/// registered up front with scripted state and failures, and every
/// operation a tree performs is recorded for assertions.
#[derive(Default)]
pub struct MemoryBackend {
    inner: Mutex<BackendState>,
}

#[derive(Default)]
struct BackendState {
    trees: HashMap<PathBuf, Arc<MemoryWorkingTree>>,
    fail_open: HashSet<PathBuf>,
    open_calls: Vec<PathBuf>,
}

impl MemoryBackend {
    /// Create a new empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or fetch) the tree rooted at `dir`.
    pub fn add_tree(&self, dir: impl Into<PathBuf>) -> Arc<MemoryWorkingTree> {
        let dir = dir.into();
        let mut inner = self.inner.lock().unwrap();
        inner
            .trees
            .entry(dir.clone())
            .or_insert_with(|| Arc::new(MemoryWorkingTree::new(dir)))
            .clone()
    }

    /// Make `open(dir)` fail until the tree is registered again.
    pub fn fail_open(&self, dir: impl Into<PathBuf>) {
        self.inner.lock().unwrap().fail_open.insert(dir.into());
    }

    /// Stop failing `open(dir)`.
    pub fn allow_open(&self, dir: &Path) {
        self.inner.lock().unwrap().fail_open.remove(dir);
    }

    /// How many times `open` was called for `dir`.
    pub fn open_count(&self, dir: &Path) -> usize {
        self.inner
            .lock()
            .unwrap()
            .open_calls
            .iter()
            .filter(|d| d.as_path() == dir)
            .count()
    }
}

#[async_trait]
impl VcsBackend for MemoryBackend {
    async fn open(&self, dir: &Path) -> Result<Arc<dyn WorkingTree>> {
        let mut inner = self.inner.lock().unwrap();
        inner.open_calls.push(dir.to_path_buf());
        if inner.fail_open.contains(dir) {
            return Err(Error::NotARepository(format!(
                "{}: scripted open failure",
                dir.display()
            )));
        }
        match inner.trees.get(dir) {
            Some(tree) => Ok(tree.clone() as Arc<dyn WorkingTree>),
            None => Err(Error::NotARepository(format!(
                "{}: no such tree",
                dir.display()
            ))),
        }
    }
}

/// One scripted working tree.
pub struct MemoryWorkingTree {
    root: PathBuf,
    state: Mutex<TreeState>,
}

struct TreeState {
    dirty_paths: HashSet<PathBuf>,
    untracked_paths: HashSet<PathBuf>,
    tree_dirty: bool,
    pull_outcome: PullOutcome,
    pull_error: Option<RemoteError>,
    commit_error: Option<String>,
    push_error: Option<RemoteError>,
    delay: Option<Duration>,
    log: Vec<String>,
}

impl MemoryWorkingTree {
    fn new(root: PathBuf) -> Self {
        Self {
            root,
            state: Mutex::new(TreeState {
                dirty_paths: HashSet::new(),
                untracked_paths: HashSet::new(),
                tree_dirty: false,
                pull_outcome: PullOutcome::Updated,
                pull_error: None,
                commit_error: None,
                push_error: None,
                delay: None,
                log: Vec::new(),
            }),
        }
    }

    /// Mark a single tracked path as modified.
    pub fn mark_dirty(&self, path: impl Into<PathBuf>) {
        self.state.lock().unwrap().dirty_paths.insert(path.into());
    }

    /// Mark the whole tree as having uncommitted modifications.
    pub fn mark_tree_dirty(&self) {
        self.state.lock().unwrap().tree_dirty = true;
    }

    /// Mark a path as present but never committed.
    pub fn mark_untracked(&self, path: impl Into<PathBuf>) {
        self.state.lock().unwrap().untracked_paths.insert(path.into());
    }

    /// What the next successful pull reports.
    pub fn set_pull_outcome(&self, outcome: PullOutcome) {
        self.state.lock().unwrap().pull_outcome = outcome;
    }

    /// Make pulls fail.
    pub fn fail_pull(&self, error: RemoteError) {
        self.state.lock().unwrap().pull_error = Some(error);
    }

    /// Make commits fail.
    pub fn fail_commit(&self, message: impl Into<String>) {
        self.state.lock().unwrap().commit_error = Some(message.into());
    }

    /// Make pushes fail.
    pub fn fail_push(&self, error: RemoteError) {
        self.state.lock().unwrap().push_error = Some(error);
    }

    /// Delay every pull and push, to keep an operation in flight while a
    /// test fires a second one.
    pub fn set_operation_delay(&self, delay: Duration) {
        self.state.lock().unwrap().delay = Some(delay);
    }

    /// Every operation performed so far, in order: `"stage_all"`,
    /// `"stage:<path>"`, `"commit:<message>"`, `"pull"`, `"push"`.
    pub fn operations(&self) -> Vec<String> {
        self.state.lock().unwrap().log.clone()
    }

    /// Operations of one kind, e.g. `ops_named("push")`.
    pub fn ops_named(&self, prefix: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .log
            .iter()
            .filter(|op| op.as_str() == prefix || op.starts_with(&format!("{prefix}:")))
            .count()
    }

    fn scripted_delay(&self) -> Option<Duration> {
        self.state.lock().unwrap().delay
    }
}

#[async_trait]
impl WorkingTree for MemoryWorkingTree {
    fn root(&self) -> &Path {
        &self.root
    }

    async fn is_dirty(&self, pathspec: Option<&Path>) -> Result<bool> {
        let state = self.state.lock().unwrap();
        Ok(match pathspec {
            Some(path) => state.dirty_paths.contains(path),
            None => state.tree_dirty || !state.dirty_paths.is_empty(),
        })
    }

    async fn is_untracked(&self, path: &Path) -> Result<bool> {
        Ok(self.state.lock().unwrap().untracked_paths.contains(path))
    }

    async fn stage_all(&self) -> Result<()> {
        self.state.lock().unwrap().log.push("stage_all".to_string());
        Ok(())
    }

    async fn stage_path(&self, path: &Path) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .log
            .push(format!("stage:{}", path.display()));
        Ok(())
    }

    async fn commit(&self, message: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.log.push(format!("commit:{message}"));
        if let Some(err) = state.commit_error.clone() {
            return Err(Error::Commit(err));
        }
        // A commit captures everything that was pending.
        state.dirty_paths.clear();
        state.untracked_paths.clear();
        state.tree_dirty = false;
        Ok(())
    }

    async fn pull(&self) -> Result<PullOutcome> {
        let result = {
            let mut state = self.state.lock().unwrap();
            state.log.push("pull".to_string());
            match state.pull_error.clone() {
                Some(err) => Err(err),
                None => Ok(state.pull_outcome),
            }
        };
        if let Some(delay) = self.scripted_delay() {
            sleep(delay).await;
        }
        result.map_err(Into::into)
    }

    async fn push(&self) -> Result<()> {
        let result = {
            let mut state = self.state.lock().unwrap();
            state.log.push("push".to_string());
            match state.push_error.clone() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        };
        if let Some(delay) = self.scripted_delay() {
            sleep(delay).await;
        }
        result.map_err(Into::into)
    }
}
