//! Host configuration access and the per-event settings snapshot.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;

use autosync_common::Result;

/// Default seconds between automatic pulls of one directory.
pub const DEFAULT_PULL_INTERVAL: u64 = 60;

/// Default commit message template; `%s` is replaced with the file path
/// relative to its working tree.
pub const DEFAULT_COMMIT_TEMPLATE: &str = "Auto-sync: Updated %s";

/// Fixed message for the maintenance commit created when a dirty tree is
/// auto-committed ahead of a pull.
pub const PREFLIGHT_COMMIT_MESSAGE: &str = "Auto-sync: local changes before pull";

/// Read access to the host's configuration.
///
/// Deliberately not `Send`/`Sync`: hosts typically only allow
/// configuration reads from their event-loop thread, so the controller
/// snapshots everything into [`SyncSettings`] before any task is spawned.
/// Getter errors are never propagated; each key falls back to its
/// documented default.
pub trait ConfigSource {
    /// Ordered list of managed directories. Order matters: the first
    /// directory containing a file wins.
    fn managed_dirs(&self) -> Result<Vec<PathBuf>>;

    /// Minimum seconds between automatic pulls per directory.
    fn pull_interval(&self) -> Result<u64>;

    /// Commit message template with one `%s` slot.
    fn commit_template(&self) -> Result<String>;

    /// Whether debug diagnostics were requested.
    fn debug(&self) -> Result<bool>;

    /// Whether user-facing notifications are suppressed.
    fn silent(&self) -> Result<bool>;

    /// Whether a dirty tree is committed automatically before a pull.
    fn commit_before_pull(&self) -> Result<bool>;
}

/// Immutable snapshot of the configuration, taken on the control thread
/// and handed to worker tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Managed directories, in configured order.
    pub managed_dirs: Vec<PathBuf>,
    /// Seconds between automatic pulls per directory.
    pub pull_interval: u64,
    /// Commit message template with one `%s` slot.
    pub commit_template: String,
    /// Debug diagnostics requested.
    pub debug: bool,
    /// Suppress user-facing notifications.
    pub silent: bool,
    /// Commit a dirty tree before pulling.
    pub commit_before_pull: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            managed_dirs: Vec::new(),
            pull_interval: DEFAULT_PULL_INTERVAL,
            commit_template: DEFAULT_COMMIT_TEMPLATE.to_string(),
            debug: false,
            silent: false,
            commit_before_pull: true,
        }
    }
}

impl SyncSettings {
    /// Snapshot `source`, substituting the documented default for any key
    /// the source cannot provide.
    pub fn from_source(source: &dyn ConfigSource) -> Self {
        let defaults = Self::default();
        Self {
            managed_dirs: source.managed_dirs().unwrap_or_else(|e| {
                warn!("managed directory list unavailable: {e}");
                defaults.managed_dirs.clone()
            }),
            pull_interval: source.pull_interval().unwrap_or(defaults.pull_interval),
            commit_template: source
                .commit_template()
                .unwrap_or_else(|_| defaults.commit_template.clone()),
            debug: source.debug().unwrap_or(defaults.debug),
            silent: source.silent().unwrap_or(defaults.silent),
            commit_before_pull: source
                .commit_before_pull()
                .unwrap_or(defaults.commit_before_pull),
        }
    }

    /// Commit message for a saved file, from the template's `%s` slot.
    pub fn commit_message(&self, rel_path: &std::path::Path) -> String {
        self.commit_template
            .replacen("%s", &rel_path.display().to_string(), 1)
    }
}

/// A [`ConfigSource`] holding fixed values, for tests and hosts that read
/// configuration some other way (files, CLI flags).
#[derive(Debug, Clone, Default)]
pub struct StaticConfig {
    pub settings: SyncSettings,
}

impl StaticConfig {
    /// Wrap an existing snapshot.
    pub fn new(settings: SyncSettings) -> Self {
        Self { settings }
    }
}

impl ConfigSource for StaticConfig {
    fn managed_dirs(&self) -> Result<Vec<PathBuf>> {
        Ok(self.settings.managed_dirs.clone())
    }

    fn pull_interval(&self) -> Result<u64> {
        Ok(self.settings.pull_interval)
    }

    fn commit_template(&self) -> Result<String> {
        Ok(self.settings.commit_template.clone())
    }

    fn debug(&self) -> Result<bool> {
        Ok(self.settings.debug)
    }

    fn silent(&self) -> Result<bool> {
        Ok(self.settings.silent)
    }

    fn commit_before_pull(&self) -> Result<bool> {
        Ok(self.settings.commit_before_pull)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autosync_common::Error;
    use std::path::Path;

    /// A source whose every getter fails.
    struct BrokenConfig;

    impl ConfigSource for BrokenConfig {
        fn managed_dirs(&self) -> Result<Vec<PathBuf>> {
            Err(Error::Config("unreachable".to_string()))
        }
        fn pull_interval(&self) -> Result<u64> {
            Err(Error::Config("unreachable".to_string()))
        }
        fn commit_template(&self) -> Result<String> {
            Err(Error::Config("unreachable".to_string()))
        }
        fn debug(&self) -> Result<bool> {
            Err(Error::Config("unreachable".to_string()))
        }
        fn silent(&self) -> Result<bool> {
            Err(Error::Config("unreachable".to_string()))
        }
        fn commit_before_pull(&self) -> Result<bool> {
            Err(Error::Config("unreachable".to_string()))
        }
    }

    #[test]
    fn test_unreachable_source_falls_back_to_defaults() {
        let settings = SyncSettings::from_source(&BrokenConfig);
        assert!(settings.managed_dirs.is_empty());
        assert_eq!(settings.pull_interval, DEFAULT_PULL_INTERVAL);
        assert_eq!(settings.commit_template, DEFAULT_COMMIT_TEMPLATE);
        assert!(!settings.debug);
        assert!(!settings.silent);
        assert!(settings.commit_before_pull);
    }

    #[test]
    fn test_static_config_round_trip() {
        let mut settings = SyncSettings::default();
        settings.managed_dirs = vec![PathBuf::from("/repo")];
        settings.pull_interval = 15;
        settings.silent = true;

        let snapshot = SyncSettings::from_source(&StaticConfig::new(settings.clone()));
        assert_eq!(snapshot.managed_dirs, settings.managed_dirs);
        assert_eq!(snapshot.pull_interval, 15);
        assert!(snapshot.silent);
    }

    #[test]
    fn test_commit_message_substitution() {
        let settings = SyncSettings::default();
        assert_eq!(
            settings.commit_message(Path::new("notes/a.txt")),
            "Auto-sync: Updated notes/a.txt"
        );
    }

    #[test]
    fn test_commit_message_substitutes_only_first_slot() {
        let settings = SyncSettings {
            commit_template: "%s synced (%s)".to_string(),
            ..SyncSettings::default()
        };
        assert_eq!(settings.commit_message(Path::new("a.txt")), "a.txt synced (%s)");
    }

    #[test]
    fn test_settings_serialization_round_trip() {
        let settings = SyncSettings {
            managed_dirs: vec![PathBuf::from("/repo")],
            ..SyncSettings::default()
        };
        let json = serde_json::to_string(&settings).unwrap();
        let restored: SyncSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.managed_dirs, settings.managed_dirs);
        assert_eq!(restored.pull_interval, settings.pull_interval);
    }
}
