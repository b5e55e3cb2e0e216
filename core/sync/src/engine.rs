//! Core sync engine: the pull and commit-and-push workflows.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use autosync_common::{Error, OperationKey, RemoteErrorKind};
use autosync_vcs::{PullOutcome, VcsBackend, WorkingTree};

use crate::config::{SyncSettings, PREFLIGHT_COMMIT_MESSAGE};
use crate::ledger::{OperationGuard, OperationLedger};
use crate::notify::NotificationChannel;
use crate::registry::RepositoryRegistry;
use crate::throttle::PullThrottle;

/// Runs sync operations on background tasks.
///
/// This is the coordinator state for one host session: the working-tree
/// handle cache, the pull throttle, the in-flight ledger and the producer
/// half of the notification channel. Construct one per session (or per
/// test) and share it behind an `Arc`.
///
/// Operations are gated at spawn time: the ledger key is claimed on the
/// calling thread, so a duplicate request is dropped before any task is
/// created. The spawned task owns the guard and releases the key on every
/// exit path. Denied requests are not queued; a later triggering event
/// retries naturally. There is no cancellation: once a task starts it
/// runs to completion.
pub struct SyncEngine {
    registry: RepositoryRegistry,
    throttle: PullThrottle,
    ledger: OperationLedger,
    channel: NotificationChannel,
}

impl SyncEngine {
    /// Create an engine over `backend`, publishing results to `channel`.
    pub fn new(backend: Arc<dyn VcsBackend>, channel: NotificationChannel) -> Self {
        Self {
            registry: RepositoryRegistry::new(backend),
            throttle: PullThrottle::new(),
            ledger: OperationLedger::new(),
            channel,
        }
    }

    /// The working-tree registry.
    pub fn registry(&self) -> &RepositoryRegistry {
        &self.registry
    }

    /// The pull throttle.
    pub fn throttle(&self) -> &PullThrottle {
        &self.throttle
    }

    /// The in-flight operation ledger.
    pub fn ledger(&self) -> &OperationLedger {
        &self.ledger
    }

    /// The producer half of the notification channel.
    pub fn channel(&self) -> &NotificationChannel {
        &self.channel
    }

    /// Start a pull of `dir` unless one is already in flight.
    ///
    /// Returns the task handle, or `None` when the duplicate was dropped.
    pub fn try_spawn_pull(
        self: &Arc<Self>,
        dir: &Path,
        tree: Arc<dyn WorkingTree>,
        settings: SyncSettings,
    ) -> Option<JoinHandle<()>> {
        let key = OperationKey::pull(dir);
        let Some(guard) = self.ledger.try_acquire(key.clone()) else {
            debug!("{key} already in flight; dropping duplicate");
            return None;
        };

        let engine = Arc::clone(self);
        let dir = dir.to_path_buf();
        Some(tokio::spawn(async move {
            engine.run_pull(guard, dir, tree, settings).await;
        }))
    }

    /// Start a commit-and-push of `file` (relative to `dir`) unless one is
    /// already in flight for that file.
    pub fn try_spawn_push(
        self: &Arc<Self>,
        dir: &Path,
        file: &Path,
        tree: Arc<dyn WorkingTree>,
        settings: SyncSettings,
    ) -> Option<JoinHandle<()>> {
        let key = OperationKey::push(dir, file);
        let Some(guard) = self.ledger.try_acquire(key.clone()) else {
            debug!("{key} already in flight; dropping duplicate");
            return None;
        };

        let engine = Arc::clone(self);
        let dir = dir.to_path_buf();
        let file = file.to_path_buf();
        Some(tokio::spawn(async move {
            engine.run_push(guard, dir, file, tree, settings).await;
        }))
    }

    /// The pull workflow. `_guard` holds the ledger key until this task
    /// is done, whichever way it exits.
    async fn run_pull(
        &self,
        _guard: OperationGuard,
        dir: PathBuf,
        tree: Arc<dyn WorkingTree>,
        settings: SyncSettings,
    ) {
        let label = dir_label(&dir);

        // Preflight: a dirty tree is either committed out of the way or
        // blocks the pull, depending on configuration.
        match tree.is_dirty(None).await {
            Ok(false) => {}
            Ok(true) if settings.commit_before_pull => {
                let staged = match tree.stage_all().await {
                    Ok(()) => tree.commit(PREFLIGHT_COMMIT_MESSAGE).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = staged {
                    error!("auto-commit before pull failed for {}: {e}", dir.display());
                    if !settings.silent {
                        self.channel
                            .error(format!("Auto-commit before pull failed for {label}: {e}"));
                    }
                    return;
                }
                info!("committed local changes in {} before pull", dir.display());
            }
            Ok(true) => {
                // Not an error: the operator chose to keep local changes
                // out of automatic commits.
                debug!("pull of {} skipped: tree is dirty", dir.display());
                if !settings.silent {
                    self.channel
                        .info(format!("Pull skipped for {label}: uncommitted local changes"));
                }
                return;
            }
            Err(e) => {
                error!("pull preflight failed for {}: {e}", dir.display());
                if !settings.silent {
                    self.channel
                        .error(format!("Pull preflight failed for {label}: {e}"));
                }
                return;
            }
        }

        match tree.pull().await {
            Ok(PullOutcome::Updated) => {
                self.throttle.record_pull(&dir, PullThrottle::now()).await;
                info!("pulled updates for {}", dir.display());
                if !settings.silent {
                    self.channel.info(format!("Pulled updates for {label}"));
                }
                // Files changed under the host; it must reload open views
                // once it drains this. Never suppressed.
                self.channel.request_reload();
            }
            Ok(PullOutcome::AlreadyUpToDate) => {
                self.throttle.record_pull(&dir, PullThrottle::now()).await;
                debug!("{} already up to date", dir.display());
            }
            Err(e) => match classify_remote_failure(&e) {
                RemoteErrorKind::UpToDate => {
                    self.throttle.record_pull(&dir, PullThrottle::now()).await;
                    debug!("{} already up to date", dir.display());
                }
                RemoteErrorKind::Conflict => {
                    error!("pull of {} hit merge conflicts: {e}", dir.display());
                    if !settings.silent {
                        self.channel.error(format!(
                            "Pull failed for {}: merge conflicts require manual resolution",
                            dir.display()
                        ));
                    }
                }
                RemoteErrorKind::Other => {
                    error!("pull failed for {}: {e}", dir.display());
                    if !settings.silent {
                        self.channel
                            .error(format!("Pull failed for {}: {e}", dir.display()));
                    }
                }
            },
        }
    }

    /// The commit-and-push workflow for one saved file.
    async fn run_push(
        &self,
        _guard: OperationGuard,
        dir: PathBuf,
        file: PathBuf,
        tree: Arc<dyn WorkingTree>,
        settings: SyncSettings,
    ) {
        let label = file.display().to_string();

        let state = async {
            let dirty = tree.is_dirty(Some(&file)).await?;
            let untracked = tree.is_untracked(&file).await?;
            Ok::<_, Error>((dirty, untracked))
        }
        .await;
        let (dirty, untracked) = match state {
            Ok(state) => state,
            Err(e) => {
                error!("sync check failed for {label}: {e}");
                if !settings.silent {
                    self.channel
                        .error(format!("Sync check failed for {label}: {e}"));
                }
                return;
            }
        };

        if !dirty && !untracked {
            // Nothing to sync; not worth a message.
            debug!("{label} has no changes to sync");
            return;
        }

        let committed = async {
            tree.stage_path(&file).await?;
            tree.commit(&settings.commit_message(&file)).await
        }
        .await;
        if let Err(e) = committed {
            error!("commit failed for {label} in {}: {e}", dir.display());
            if !settings.silent {
                self.channel.error(format!("Commit failed for {label}: {e}"));
            }
            return;
        }

        match tree.push().await {
            Ok(()) => {
                info!("pushed {label} from {}", dir.display());
                if !settings.silent {
                    let text = if untracked {
                        format!("Auto-synced: {label} (new file)")
                    } else {
                        format!("Auto-synced: {label}")
                    };
                    self.channel.info(text);
                }
            }
            Err(e) => {
                error!("push failed for {label} in {}: {e}", dir.display());
                if !settings.silent {
                    self.channel.error(format!("Push failed for {label}: {e}"));
                }
            }
        }
    }
}

/// Classify a failed remote operation.
///
/// A structured classification from the backend wins; otherwise the
/// message is sniffed case-insensitively, because some backends only
/// report conflicts and no-op pulls as text.
pub fn classify_remote_failure(err: &Error) -> RemoteErrorKind {
    if let Error::Remote(remote) = err {
        if remote.kind != RemoteErrorKind::Other {
            return remote.kind;
        }
    }

    let message = err.to_string().to_lowercase();
    if message.contains("conflict") {
        RemoteErrorKind::Conflict
    } else if message.contains("up to date") || message.contains("up-to-date") {
        RemoteErrorKind::UpToDate
    } else {
        RemoteErrorKind::Other
    }
}

fn dir_label(dir: &Path) -> String {
    dir.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| dir.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{HostHooks, NotificationReceiver};
    use autosync_common::RemoteError;
    use autosync_vcs::{MemoryBackend, MemoryWorkingTree};
    use proptest::prelude::*;
    use std::time::Duration;

    struct Fixture {
        engine: Arc<SyncEngine>,
        backend: Arc<MemoryBackend>,
        receiver: NotificationReceiver,
    }

    fn fixture() -> (Fixture, Arc<MemoryWorkingTree>) {
        let backend = Arc::new(MemoryBackend::new());
        let tree = backend.add_tree("/repo");
        let (channel, receiver) = NotificationChannel::new();
        let engine = Arc::new(SyncEngine::new(backend.clone(), channel));
        (
            Fixture {
                engine,
                backend,
                receiver,
            },
            tree,
        )
    }

    async fn open(fixture: &Fixture) -> Arc<dyn WorkingTree> {
        use autosync_vcs::VcsBackend;
        fixture.backend.open(Path::new("/repo")).await.unwrap()
    }

    /// Drained messages: `("text", is_error)` notices and `("<reload>",
    /// false)` markers, in order.
    fn drain(receiver: &mut NotificationReceiver) -> Vec<(String, bool)> {
        struct Collect(Vec<(String, bool)>);
        impl HostHooks for Collect {
            fn show_message(&mut self, text: &str, is_error: bool) {
                self.0.push((text.to_string(), is_error));
            }
            fn reload_changed_files(&mut self) {
                self.0.push(("<reload>".to_string(), false));
            }
        }
        let mut host = Collect(Vec::new());
        receiver.drain(usize::MAX, &mut host);
        host.0
    }

    fn settings() -> SyncSettings {
        SyncSettings::default()
    }

    #[tokio::test]
    async fn test_pull_of_clean_tree_records_and_notifies() {
        let (mut fx, tree) = fixture();
        let handle = fx
            .engine
            .try_spawn_pull(Path::new("/repo"), open(&fx).await, settings())
            .unwrap();
        handle.await.unwrap();

        assert_eq!(tree.operations(), vec!["pull"]);
        assert!(fx.engine.throttle().last_pull_time(Path::new("/repo")).await > 0.0);
        assert_eq!(
            drain(&mut fx.receiver),
            vec![
                ("Pulled updates for repo".to_string(), false),
                ("<reload>".to_string(), false),
            ]
        );
        assert!(fx.engine.ledger().is_idle());
    }

    #[tokio::test]
    async fn test_dirty_tree_with_auto_commit_disabled_skips_remote() {
        let (mut fx, tree) = fixture();
        tree.mark_tree_dirty();
        let handle = fx
            .engine
            .try_spawn_pull(
                Path::new("/repo"),
                open(&fx).await,
                SyncSettings {
                    commit_before_pull: false,
                    ..settings()
                },
            )
            .unwrap();
        handle.await.unwrap();

        // Zero remote calls, exactly one informational notice.
        assert!(tree.operations().is_empty());
        let messages = drain(&mut fx.receiver);
        assert_eq!(messages.len(), 1);
        assert!(!messages[0].1);
        assert!(messages[0].0.contains("uncommitted local changes"));
        assert_eq!(
            fx.engine.throttle().last_pull_time(Path::new("/repo")).await,
            0.0
        );
    }

    #[tokio::test]
    async fn test_dirty_tree_with_auto_commit_enabled_commits_then_pulls() {
        let (mut fx, tree) = fixture();
        tree.mark_tree_dirty();
        let handle = fx
            .engine
            .try_spawn_pull(Path::new("/repo"), open(&fx).await, settings())
            .unwrap();
        handle.await.unwrap();

        assert_eq!(
            tree.operations(),
            vec![
                "stage_all",
                "commit:Auto-sync: local changes before pull",
                "pull",
            ]
        );
        let messages = drain(&mut fx.receiver);
        assert_eq!(messages[0], ("Pulled updates for repo".to_string(), false));
    }

    #[tokio::test]
    async fn test_preflight_commit_failure_aborts_the_pull() {
        let (mut fx, tree) = fixture();
        tree.mark_tree_dirty();
        tree.fail_commit("empty identity");
        let handle = fx
            .engine
            .try_spawn_pull(Path::new("/repo"), open(&fx).await, settings())
            .unwrap();
        handle.await.unwrap();

        assert_eq!(tree.ops_named("pull"), 0);
        let messages = drain(&mut fx.receiver);
        assert_eq!(messages.len(), 1);
        assert!(messages[0].1);
        assert!(messages[0].0.contains("Auto-commit before pull failed"));
    }

    #[tokio::test]
    async fn test_up_to_date_pull_is_quiet_but_recorded() {
        let (mut fx, tree) = fixture();
        tree.set_pull_outcome(PullOutcome::AlreadyUpToDate);
        let handle = fx
            .engine
            .try_spawn_pull(Path::new("/repo"), open(&fx).await, settings())
            .unwrap();
        handle.await.unwrap();

        assert!(drain(&mut fx.receiver).is_empty());
        assert!(fx.engine.throttle().last_pull_time(Path::new("/repo")).await > 0.0);
    }

    #[tokio::test]
    async fn test_conflict_message_is_surfaced_distinctly() {
        let (mut fx, tree) = fixture();
        // Kind is Other; the classification must come from the message.
        tree.fail_pull(RemoteError::other("CONFLICT (content): merge conflict in a.txt"));
        let handle = fx
            .engine
            .try_spawn_pull(Path::new("/repo"), open(&fx).await, settings())
            .unwrap();
        handle.await.unwrap();

        let messages = drain(&mut fx.receiver);
        assert_eq!(messages.len(), 1);
        assert!(messages[0].1);
        assert!(messages[0].0.contains("manual resolution"));
    }

    #[tokio::test]
    async fn test_generic_pull_failure_is_reported() {
        let (mut fx, tree) = fixture();
        tree.fail_pull(RemoteError::other("connection refused"));
        let handle = fx
            .engine
            .try_spawn_pull(Path::new("/repo"), open(&fx).await, settings())
            .unwrap();
        handle.await.unwrap();

        let messages = drain(&mut fx.receiver);
        assert_eq!(messages.len(), 1);
        assert!(messages[0].1);
        assert!(messages[0].0.contains("connection refused"));
        assert_eq!(
            fx.engine.throttle().last_pull_time(Path::new("/repo")).await,
            0.0
        );
    }

    #[tokio::test]
    async fn test_silent_mode_suppresses_notices_but_not_reload() {
        let (mut fx, _tree) = fixture();
        let handle = fx
            .engine
            .try_spawn_pull(
                Path::new("/repo"),
                open(&fx).await,
                SyncSettings {
                    silent: true,
                    ..settings()
                },
            )
            .unwrap();
        handle.await.unwrap();

        assert_eq!(drain(&mut fx.receiver), vec![("<reload>".to_string(), false)]);
    }

    #[tokio::test]
    async fn test_duplicate_pull_is_dropped() {
        let (fx, tree) = fixture();
        tree.set_operation_delay(Duration::from_millis(50));
        let tree_handle = open(&fx).await;

        let first = fx
            .engine
            .try_spawn_pull(Path::new("/repo"), tree_handle.clone(), settings());
        let second = fx
            .engine
            .try_spawn_pull(Path::new("/repo"), tree_handle, settings());
        assert!(first.is_some());
        assert!(second.is_none());

        first.unwrap().await.unwrap();
        assert_eq!(tree.ops_named("pull"), 1);
    }

    #[tokio::test]
    async fn test_push_with_nothing_to_sync_is_a_silent_no_op() {
        let (mut fx, tree) = fixture();
        let handle = fx
            .engine
            .try_spawn_push(
                Path::new("/repo"),
                Path::new("a.txt"),
                open(&fx).await,
                settings(),
            )
            .unwrap();
        handle.await.unwrap();

        assert!(tree.operations().is_empty());
        assert!(drain(&mut fx.receiver).is_empty());
    }

    #[tokio::test]
    async fn test_push_of_modified_file_commits_from_template() {
        let (mut fx, tree) = fixture();
        tree.mark_dirty("a.txt");
        let handle = fx
            .engine
            .try_spawn_push(
                Path::new("/repo"),
                Path::new("a.txt"),
                open(&fx).await,
                settings(),
            )
            .unwrap();
        handle.await.unwrap();

        assert_eq!(
            tree.operations(),
            vec!["stage:a.txt", "commit:Auto-sync: Updated a.txt", "push"]
        );
        assert_eq!(
            drain(&mut fx.receiver),
            vec![("Auto-synced: a.txt".to_string(), false)]
        );
    }

    #[tokio::test]
    async fn test_push_of_untracked_file_notes_it_is_new() {
        let (mut fx, tree) = fixture();
        tree.mark_untracked("fresh.md");
        let handle = fx
            .engine
            .try_spawn_push(
                Path::new("/repo"),
                Path::new("fresh.md"),
                open(&fx).await,
                settings(),
            )
            .unwrap();
        handle.await.unwrap();

        assert_eq!(tree.ops_named("push"), 1);
        assert_eq!(
            drain(&mut fx.receiver),
            vec![("Auto-synced: fresh.md (new file)".to_string(), false)]
        );
    }

    #[tokio::test]
    async fn test_push_failure_is_reported_and_not_retried() {
        let (mut fx, tree) = fixture();
        tree.mark_dirty("a.txt");
        tree.fail_push(RemoteError::other("remote hung up"));
        let handle = fx
            .engine
            .try_spawn_push(
                Path::new("/repo"),
                Path::new("a.txt"),
                open(&fx).await,
                settings(),
            )
            .unwrap();
        handle.await.unwrap();

        assert_eq!(tree.ops_named("push"), 1);
        let messages = drain(&mut fx.receiver);
        assert_eq!(messages.len(), 1);
        assert!(messages[0].1);
        assert!(messages[0].0.contains("remote hung up"));
    }

    // Two saves of the same file before the first push completes: the
    // second is dropped, one commit/push pair total.
    #[tokio::test]
    async fn test_rapid_saves_of_one_file_push_once() {
        let (fx, tree) = fixture();
        tree.mark_dirty("a.txt");
        tree.set_operation_delay(Duration::from_millis(50));
        let tree_handle = open(&fx).await;

        let first = fx.engine.try_spawn_push(
            Path::new("/repo"),
            Path::new("a.txt"),
            tree_handle.clone(),
            settings(),
        );
        let second = fx.engine.try_spawn_push(
            Path::new("/repo"),
            Path::new("a.txt"),
            tree_handle,
            settings(),
        );
        assert!(first.is_some());
        assert!(second.is_none());
        first.unwrap().await.unwrap();

        assert_eq!(tree.ops_named("commit"), 1);
        assert_eq!(tree.ops_named("push"), 1);
    }

    #[tokio::test]
    async fn test_pushes_to_different_files_run_independently() {
        let (fx, tree) = fixture();
        tree.mark_dirty("a.txt");
        tree.mark_dirty("b.txt");
        let tree_handle = open(&fx).await;

        let first = fx.engine.try_spawn_push(
            Path::new("/repo"),
            Path::new("a.txt"),
            tree_handle.clone(),
            settings(),
        );
        let second = fx.engine.try_spawn_push(
            Path::new("/repo"),
            Path::new("b.txt"),
            tree_handle,
            settings(),
        );
        assert!(first.is_some());
        assert!(second.is_some());
        first.unwrap().await.unwrap();
        second.unwrap().await.unwrap();
        assert_eq!(tree.ops_named("push"), 2);
    }

    #[test]
    fn test_classification_prefers_structured_kind() {
        let err: Error = RemoteError::conflict("automatic merge failed").into();
        assert_eq!(classify_remote_failure(&err), RemoteErrorKind::Conflict);

        let err: Error = RemoteError::up_to_date().into();
        assert_eq!(classify_remote_failure(&err), RemoteErrorKind::UpToDate);
    }

    #[test]
    fn test_classification_sniffs_messages() {
        let err: Error = RemoteError::other("Already up to date.").into();
        assert_eq!(classify_remote_failure(&err), RemoteErrorKind::UpToDate);

        let err: Error = RemoteError::other("everything is up-to-date").into();
        assert_eq!(classify_remote_failure(&err), RemoteErrorKind::UpToDate);

        let err: Error = RemoteError::other("network unreachable").into();
        assert_eq!(classify_remote_failure(&err), RemoteErrorKind::Other);
    }

    proptest! {
        // Any failure message containing "conflict", in any case and any
        // surroundings, classifies as a conflict.
        #[test]
        fn prop_conflict_substring_always_classifies_as_conflict(
            prefix in "[ -~]{0,16}",
            needle in "(?i)conflict",
            suffix in "[ -~]{0,16}",
        ) {
            let err: Error = RemoteError::other(format!("{prefix}{needle}{suffix}")).into();
            prop_assert_eq!(classify_remote_failure(&err), RemoteErrorKind::Conflict);
        }
    }
}
