//! Mutual exclusion for in-flight sync operations.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::debug;

use autosync_common::OperationKey;

/// Tracks which operations are currently in flight.
///
/// A key is a member exactly while a task executes that operation.
/// Acquiring an already-held key fails without side effects: the
/// duplicate is dropped, not queued, and a later triggering event retries
/// naturally.
///
/// Invariant: at any instant a key has 0 or 1 holders.
#[derive(Debug, Clone, Default)]
pub struct OperationLedger {
    in_flight: Arc<Mutex<HashSet<OperationKey>>>,
}

impl OperationLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically claim `key` if no operation holds it.
    ///
    /// Returns a guard that releases the key when dropped, so release
    /// happens on every exit path of the owning task. Returns `None`,
    /// with no side effects, when the key is already held.
    pub fn try_acquire(&self, key: OperationKey) -> Option<OperationGuard> {
        let mut in_flight = self.in_flight.lock().unwrap();
        if in_flight.insert(key.clone()) {
            Some(OperationGuard {
                ledger: self.clone(),
                key,
            })
        } else {
            None
        }
    }

    /// Number of operations currently in flight.
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().unwrap().len()
    }

    /// Whether nothing is in flight.
    pub fn is_idle(&self) -> bool {
        self.in_flight.lock().unwrap().is_empty()
    }

    /// Whether `key` specifically is held.
    pub fn holds(&self, key: &OperationKey) -> bool {
        self.in_flight.lock().unwrap().contains(key)
    }

    fn release(&self, key: &OperationKey) {
        let removed = self.in_flight.lock().unwrap().remove(key);
        // Double release would mean a second guard existed for the key.
        debug_assert!(removed, "released a key that was not held: {key}");
        debug!("released {key}");
    }
}

/// Holds one ledger key for the lifetime of an operation.
#[derive(Debug)]
pub struct OperationGuard {
    ledger: OperationLedger,
    key: OperationKey,
}

impl OperationGuard {
    /// The key this guard holds.
    pub fn key(&self) -> &OperationKey {
        &self.key
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        self.ledger.release(&self.key);
    }
}
