//! Per-directory pull throttling.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs;
use tracing::warn;

/// Marker file kept inside each managed directory, holding the Unix
/// timestamp of the last successful pull as one decimal number.
pub const LAST_PULL_FILE: &str = ".last_pull_timestamp";

/// Decides whether enough time has passed to pull a directory again.
///
/// Timestamps are mirrored in memory and in the marker file; the file is
/// read once per directory per process and rewritten (best effort) after
/// every successful pull. A missing or unparsable file reads as zero, so
/// the directory is immediately eligible.
#[derive(Debug, Clone, Default)]
pub struct PullThrottle {
    cache: Arc<Mutex<HashMap<PathBuf, f64>>>,
}

impl PullThrottle {
    /// Create an empty throttle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current time as Unix seconds.
    pub fn now() -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }

    /// Unix timestamp of the last recorded pull for `dir`.
    pub async fn last_pull_time(&self, dir: &Path) -> f64 {
        if let Some(cached) = self.cache.lock().unwrap().get(dir) {
            return *cached;
        }

        let value = match fs::read_to_string(marker_path(dir)).await {
            Ok(content) => content.trim().parse::<f64>().unwrap_or(0.0),
            Err(_) => 0.0,
        };
        self.cache.lock().unwrap().insert(dir.to_path_buf(), value);
        value
    }

    /// Record a pull at `timestamp`, updating memory and (best effort)
    /// the marker file. A write failure is logged and otherwise ignored.
    pub async fn record_pull(&self, dir: &Path, timestamp: f64) {
        self.cache
            .lock()
            .unwrap()
            .insert(dir.to_path_buf(), timestamp);

        if let Err(e) = fs::write(marker_path(dir), timestamp.to_string()).await {
            warn!("failed to persist last pull time for {}: {e}", dir.display());
        }
    }

    /// Whether at least `interval_secs` have passed since the last pull
    /// of `dir`. Manual pulls bypass this check entirely.
    pub async fn should_pull(&self, dir: &Path, interval_secs: u64) -> bool {
        let last = self.last_pull_time(dir).await;
        Self::now() - last >= interval_secs as f64
    }
}

fn marker_path(dir: &Path) -> PathBuf {
    dir.join(LAST_PULL_FILE)
}
