//! AutoSync coordinator.
//!
//! This module keeps a set of version-controlled working trees aligned
//! with their remotes in the background:
//! - pulls upstream changes before a managed file is read, throttled per
//!   directory
//! - commits and pushes a file after it is saved
//! - at most one operation in flight per target, duplicates dropped
//! - results reported to the host through a single-consumer channel
//!
//! The host wires its event hooks to [`SyncController`] and drains the
//! [`NotificationReceiver`] from the one context allowed to touch its UI.

pub mod config;
pub mod controller;
pub mod engine;
pub mod ledger;
pub mod notify;
pub mod registry;
pub mod throttle;

// Re-export main types
pub use config::{ConfigSource, StaticConfig, SyncSettings};
pub use controller::SyncController;
pub use engine::SyncEngine;
pub use ledger::{OperationGuard, OperationLedger};
pub use notify::{HostHooks, NotificationChannel, NotificationReceiver};
pub use registry::RepositoryRegistry;
pub use throttle::PullThrottle;
