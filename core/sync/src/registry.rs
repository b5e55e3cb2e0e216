//! File path to working tree resolution.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, error};

use autosync_vcs::{VcsBackend, WorkingTree};

use crate::config::SyncSettings;
use crate::notify::NotificationChannel;

/// Resolves a file path to the working tree managing it.
///
/// Handles are opened lazily, one per managed directory, and cached for
/// the life of the process. Open failures are reported and retried on the
/// next lookup; they are never cached.
pub struct RepositoryRegistry {
    backend: Arc<dyn VcsBackend>,
    cache: Mutex<HashMap<PathBuf, Arc<dyn WorkingTree>>>,
}

impl RepositoryRegistry {
    /// Create a registry over `backend`.
    pub fn new(backend: Arc<dyn VcsBackend>) -> Self {
        Self {
            backend,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Find the managed directory containing `file` and its working tree.
    ///
    /// The managed-directory list is order-sensitive: the first directory
    /// whose absolute form is a prefix of the file's absolute path wins.
    /// Returns the handle and the directory it is cached under, or `None`
    /// when the path is empty or no managed directory matches.
    pub async fn resolve(
        &self,
        file: &Path,
        settings: &SyncSettings,
        channel: &NotificationChannel,
    ) -> Option<(Arc<dyn WorkingTree>, PathBuf)> {
        if file.as_os_str().is_empty() {
            return None;
        }
        let file = absolutize(file);

        for dir in &settings.managed_dirs {
            let dir = absolutize(dir);
            if !file.starts_with(&dir) {
                continue;
            }

            if let Some(tree) = self.cache.lock().unwrap().get(&dir) {
                return Some((tree.clone(), dir));
            }

            // Cache miss: open outside the lock (opening does I/O).
            match self.backend.open(&dir).await {
                Ok(tree) => {
                    let tree = self
                        .cache
                        .lock()
                        .unwrap()
                        .entry(dir.clone())
                        .or_insert(tree)
                        .clone();
                    debug!("opened working tree at {}", dir.display());
                    return Some((tree, dir));
                }
                Err(e) => {
                    // Skipped for this call only; the next lookup retries.
                    error!("failed to open working tree at {}: {e}", dir.display());
                    if !settings.silent {
                        channel.error(format!(
                            "Error opening repository for {}: {e}",
                            dir.display()
                        ));
                    }
                    continue;
                }
            }
        }

        None
    }
}

pub(crate) fn absolutize(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}
