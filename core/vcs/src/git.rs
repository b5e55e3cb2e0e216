//! libgit2-backed working trees.

use async_trait::async_trait;
use git2::build::CheckoutBuilder;
use git2::{
    Commit, ErrorCode, FetchOptions, IndexAddOption, ObjectType, PushOptions, RemoteCallbacks,
    Repository, ResetType, Status, StatusOptions,
};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

use autosync_common::{Error, RemoteError, Result};

use crate::backend::{PullOutcome, VcsBackend, WorkingTree};

/// The tracked remote every managed tree is expected to have.
const REMOTE_NAME: &str = "origin";

/// Status bits that make a tracked file count as modified.
const DIRTY_STATUS: Status = Status::WT_MODIFIED
    .union(Status::WT_DELETED)
    .union(Status::WT_TYPECHANGE)
    .union(Status::WT_RENAMED)
    .union(Status::INDEX_NEW)
    .union(Status::INDEX_MODIFIED)
    .union(Status::INDEX_DELETED)
    .union(Status::INDEX_TYPECHANGE)
    .union(Status::INDEX_RENAMED);

/// Backend that opens working trees through libgit2.
#[derive(Debug, Clone, Default)]
pub struct GitBackend;

impl GitBackend {
    /// Create a new git backend.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl VcsBackend for GitBackend {
    async fn open(&self, dir: &Path) -> Result<Arc<dyn WorkingTree>> {
        let dir = dir.to_path_buf();
        let tree = run_blocking(move || {
            let repo = Repository::open(&dir).map_err(|e| {
                Error::NotARepository(format!("{}: {}", dir.display(), e.message()))
            })?;
            let root = repo
                .workdir()
                .ok_or_else(|| {
                    Error::NotARepository(format!("{}: bare repository", dir.display()))
                })?
                .to_path_buf();
            Ok(GitWorkingTree {
                root,
                repo: Arc::new(Mutex::new(repo)),
            })
        })
        .await?;
        Ok(Arc::new(tree))
    }
}

/// One open libgit2 repository.
///
/// `git2::Repository` is Send but not Sync, so the handle lives behind a
/// mutex; each operation takes it for the duration of its libgit2 calls,
/// which run on the blocking pool.
pub struct GitWorkingTree {
    root: PathBuf,
    repo: Arc<Mutex<Repository>>,
}

impl GitWorkingTree {
    /// Run `f` with the repository on the blocking pool.
    async fn with_repo<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Repository) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let repo = Arc::clone(&self.repo);
        run_blocking(move || {
            let repo = repo.lock().unwrap();
            f(&repo)
        })
        .await
    }
}

#[async_trait]
impl WorkingTree for GitWorkingTree {
    fn root(&self) -> &Path {
        &self.root
    }

    async fn is_dirty(&self, pathspec: Option<&Path>) -> Result<bool> {
        let pathspec = pathspec.map(Path::to_path_buf);
        self.with_repo(move |repo| match pathspec {
            Some(path) => match repo.status_file(&path) {
                Ok(status) => Ok(status.intersects(DIRTY_STATUS)),
                Err(e) if e.code() == ErrorCode::NotFound => Ok(false),
                Err(e) => Err(tree_error(e)),
            },
            None => {
                let mut opts = StatusOptions::new();
                opts.include_untracked(false).include_ignored(false);
                let statuses = repo.statuses(Some(&mut opts)).map_err(tree_error)?;
                Ok(!statuses.is_empty())
            }
        })
        .await
    }

    async fn is_untracked(&self, path: &Path) -> Result<bool> {
        let path = path.to_path_buf();
        self.with_repo(move |repo| match repo.status_file(&path) {
            Ok(status) => Ok(status.contains(Status::WT_NEW)),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(false),
            Err(e) => Err(tree_error(e)),
        })
        .await
    }

    async fn stage_all(&self) -> Result<()> {
        self.with_repo(|repo| {
            let mut index = repo.index().map_err(commit_error)?;
            index
                .add_all(["*"].iter(), IndexAddOption::DEFAULT, None)
                .map_err(commit_error)?;
            index.write().map_err(commit_error)?;
            Ok(())
        })
        .await
    }

    async fn stage_path(&self, path: &Path) -> Result<()> {
        let path = path.to_path_buf();
        self.with_repo(move |repo| {
            let mut index = repo.index().map_err(commit_error)?;
            index.add_path(&path).map_err(commit_error)?;
            index.write().map_err(commit_error)?;
            Ok(())
        })
        .await
    }

    async fn commit(&self, message: &str) -> Result<()> {
        let message = message.to_string();
        self.with_repo(move |repo| {
            let signature = repo.signature().map_err(commit_error)?;
            let mut index = repo.index().map_err(commit_error)?;
            let tree_id = index.write_tree().map_err(commit_error)?;
            let tree = repo.find_tree(tree_id).map_err(commit_error)?;

            // HEAD may be unborn in a freshly initialized repository.
            let parent = match repo.head() {
                Ok(head) => Some(head.peel_to_commit().map_err(commit_error)?),
                Err(e) if e.code() == ErrorCode::UnbornBranch || e.code() == ErrorCode::NotFound => {
                    None
                }
                Err(e) => return Err(commit_error(e)),
            };
            let parents: Vec<&Commit> = parent.iter().collect();

            repo.commit(Some("HEAD"), &signature, &signature, &message, &tree, &parents)
                .map_err(commit_error)?;
            Ok(())
        })
        .await
    }

    async fn pull(&self) -> Result<PullOutcome> {
        self.with_repo(|repo| {
            let branch = current_branch(repo)?;
            debug!("fetching {} from {}", branch, REMOTE_NAME);

            let mut remote = repo.find_remote(REMOTE_NAME).map_err(remote_error)?;
            let mut options = FetchOptions::new();
            options.remote_callbacks(credential_callbacks(repo.config().ok()));
            remote
                .fetch(&[branch.as_str()], Some(&mut options), None)
                .map_err(remote_error)?;

            let fetch_head = repo.find_reference("FETCH_HEAD").map_err(tree_error)?;
            let fetched = repo
                .reference_to_annotated_commit(&fetch_head)
                .map_err(tree_error)?;
            let (analysis, _) = repo.merge_analysis(&[&fetched]).map_err(tree_error)?;

            if analysis.is_up_to_date() {
                return Ok(PullOutcome::AlreadyUpToDate);
            }

            if analysis.is_fast_forward() {
                let refname = format!("refs/heads/{branch}");
                let mut reference = repo.find_reference(&refname).map_err(tree_error)?;
                reference
                    .set_target(fetched.id(), "autosync: fast-forward")
                    .map_err(tree_error)?;
                repo.set_head(&refname).map_err(tree_error)?;
                let mut checkout = CheckoutBuilder::default();
                checkout.force();
                repo.checkout_head(Some(&mut checkout)).map_err(tree_error)?;
                return Ok(PullOutcome::Updated);
            }

            // Normal merge: integrate in the index, commit if it is clean.
            repo.merge(&[&fetched], None, None).map_err(remote_error)?;
            let mut index = repo.index().map_err(tree_error)?;
            if index.has_conflicts() {
                // Put the tree back the way it was; conflicts are for the
                // operator to resolve with full tooling, not half-merged
                // files on disk.
                repo.cleanup_state().ok();
                if let Ok(head) = repo.head().and_then(|h| h.peel(ObjectType::Commit)) {
                    repo.reset(&head, ResetType::Hard, None).ok();
                }
                return Err(RemoteError::conflict(format!(
                    "merging {REMOTE_NAME}/{branch} produced conflicts"
                ))
                .into());
            }

            let tree_id = index.write_tree().map_err(tree_error)?;
            let tree = repo.find_tree(tree_id).map_err(tree_error)?;
            let signature = repo.signature().map_err(commit_error)?;
            let head_commit = repo
                .head()
                .and_then(|h| h.peel_to_commit())
                .map_err(tree_error)?;
            let fetched_commit = repo.find_commit(fetched.id()).map_err(tree_error)?;
            repo.commit(
                Some("HEAD"),
                &signature,
                &signature,
                &format!("Merge remote-tracking branch '{REMOTE_NAME}/{branch}'"),
                &tree,
                &[&head_commit, &fetched_commit],
            )
            .map_err(commit_error)?;
            repo.cleanup_state().map_err(tree_error)?;
            Ok(PullOutcome::Updated)
        })
        .await
    }

    async fn push(&self) -> Result<()> {
        self.with_repo(|repo| {
            let branch = current_branch(repo)?;
            debug!("pushing {} to {}", branch, REMOTE_NAME);

            let mut remote = repo.find_remote(REMOTE_NAME).map_err(remote_error)?;
            let mut options = PushOptions::new();
            options.remote_callbacks(credential_callbacks(repo.config().ok()));
            let refspec = format!("refs/heads/{branch}:refs/heads/{branch}");
            remote
                .push(&[refspec.as_str()], Some(&mut options))
                .map_err(remote_error)?;
            Ok(())
        })
        .await
    }
}

/// Name of the currently checked-out branch.
fn current_branch(repo: &Repository) -> Result<String> {
    let head = repo.head().map_err(tree_error)?;
    head.shorthand()
        .map(str::to_owned)
        .ok_or_else(|| Error::Tree("detached HEAD".to_string()))
}

/// Credential chain: ssh agent, then the configured credential helper,
/// then whatever default the transport offers.
fn credential_callbacks(config: Option<git2::Config>) -> RemoteCallbacks<'static> {
    let mut callbacks = RemoteCallbacks::new();
    callbacks.credentials(move |url, username_from_url, allowed| {
        if allowed.is_ssh_key() {
            if let Some(user) = username_from_url {
                return git2::Cred::ssh_key_from_agent(user);
            }
        }
        if allowed.is_user_pass_plaintext() {
            if let Some(cfg) = config.as_ref() {
                if let Ok(cred) = git2::Cred::credential_helper(cfg, url, username_from_url) {
                    return Ok(cred);
                }
            }
        }
        git2::Cred::default()
    });
    callbacks
}

async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result,
        Err(join) => Err(std::io::Error::other(join.to_string()).into()),
    }
}

fn remote_error(err: git2::Error) -> Error {
    RemoteError::other(err.message().to_string()).into()
}

fn commit_error(err: git2::Error) -> Error {
    Error::Commit(err.message().to_string())
}

fn tree_error(err: git2::Error) -> Error {
    Error::Tree(err.message().to_string())
}
