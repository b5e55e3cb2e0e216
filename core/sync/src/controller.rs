//! Host-facing entry points.
//!
//! The host wires its event hooks ("before file read", "after file
//! write", manual commands) to one of these methods. Each reads the
//! configuration once on the calling thread, resolves the target, applies
//! the gates, and hands immutable parameters to an engine task. Nothing
//! here blocks on remote work, and nothing propagates an error back into
//! the host: failures degrade to notifications.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::config::{ConfigSource, SyncSettings};
use crate::engine::SyncEngine;
use crate::registry::absolutize;

/// The thin boundary between host event hooks and the sync engine.
pub struct SyncController {
    engine: Arc<SyncEngine>,
    config: Box<dyn ConfigSource>,
}

impl SyncController {
    /// Create a controller over `engine`, reading `config` on each event.
    pub fn new(engine: Arc<SyncEngine>, config: Box<dyn ConfigSource>) -> Self {
        Self { engine, config }
    }

    /// The engine this controller drives.
    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    /// Host hook: `file` is about to be read.
    ///
    /// Pulls the managing directory if its interval has elapsed. Files
    /// outside every managed directory are ignored.
    pub async fn on_file_read(&self, file: &Path) {
        let settings = self.snapshot();
        let Some((tree, dir)) = self
            .engine
            .registry()
            .resolve(file, &settings, self.engine.channel())
            .await
        else {
            return;
        };

        if !self
            .engine
            .throttle()
            .should_pull(&dir, settings.pull_interval)
            .await
        {
            debug!("pull interval for {} not yet elapsed", dir.display());
            return;
        }

        self.engine.try_spawn_pull(&dir, tree, settings);
    }

    /// Host hook: `file` was just written.
    ///
    /// Commits and pushes the file in the background. Files outside every
    /// managed directory are ignored.
    pub async fn on_file_saved(&self, file: &Path) {
        let settings = self.snapshot();
        let Some((tree, dir)) = self
            .engine
            .registry()
            .resolve(file, &settings, self.engine.channel())
            .await
        else {
            return;
        };
        let Some(rel) = relative_to(file, &dir) else {
            return;
        };

        self.engine.try_spawn_push(&dir, &rel, tree, settings);
    }

    /// Manual command: pull the repository containing `file` now,
    /// regardless of the interval.
    pub async fn manual_pull(&self, file: &Path) {
        let settings = self.snapshot();
        let Some((tree, dir)) = self
            .engine
            .registry()
            .resolve(file, &settings, self.engine.channel())
            .await
        else {
            self.report_unmanaged(file);
            return;
        };

        if !settings.silent {
            self.engine
                .channel()
                .info(format!("Pulling changes for {}...", dir.display()));
        }
        self.engine.try_spawn_pull(&dir, tree, settings);
    }

    /// Manual command: commit and push `file` now.
    pub async fn manual_push(&self, file: &Path) {
        let settings = self.snapshot();
        let Some((tree, dir)) = self
            .engine
            .registry()
            .resolve(file, &settings, self.engine.channel())
            .await
        else {
            self.report_unmanaged(file);
            return;
        };
        let Some(rel) = relative_to(file, &dir) else {
            self.report_unmanaged(file);
            return;
        };

        if !settings.silent {
            self.engine
                .channel()
                .info(format!("Committing and pushing {}...", rel.display()));
        }
        self.engine.try_spawn_push(&dir, &rel, tree, settings);
    }

    /// Configuration snapshot, taken on the calling thread.
    fn snapshot(&self) -> SyncSettings {
        SyncSettings::from_source(self.config.as_ref())
    }

    fn report_unmanaged(&self, file: &Path) {
        self.engine.channel().error(format!(
            "{} is not inside a managed directory",
            file.display()
        ));
    }
}

/// `file` relative to the managed directory containing it.
fn relative_to(file: &Path, dir: &Path) -> Option<PathBuf> {
    absolutize(file)
        .strip_prefix(dir)
        .map(Path::to_path_buf)
        .ok()
}
