//! AutoSync version-control backends.
//!
//! This module defines the seam between the sync coordinator and the
//! underlying version-control system, plus two implementations:
//! - a libgit2-backed backend for real working trees
//! - an in-memory scripted backend for testing

pub mod backend;
pub mod git;
pub mod memory;

// Re-export main types
pub use backend::{PullOutcome, VcsBackend, WorkingTree};
pub use git::GitBackend;
pub use memory::{MemoryBackend, MemoryWorkingTree};
