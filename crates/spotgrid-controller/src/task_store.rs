//! In-progress tracking keyed by group name.
//!
//! A group is in progress from a successful [`TaskStore::try_acquire`] until
//! the matching [`TaskStore::release`]. Both polling loops acquire before
//! enqueueing, so at most one task per group is ever queued or running.
//! The lock is held only for the map access, never across a cloud call.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

/// Shared, cheaply cloneable dedup set.
#[derive(Debug, Clone, Default)]
pub struct TaskStore {
    in_progress: Arc<Mutex<HashSet<String>>>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        self.in_progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark `group` in progress. Returns `false` if it already was.
    pub fn try_acquire(&self, group: &str) -> bool {
        self.lock().insert(group.to_string())
    }

    /// Clear the in-progress mark for `group`. Released groups leave no
    /// entry behind.
    pub fn release(&self, group: &str) {
        if !self.lock().remove(group) {
            debug!(%group, "released a group that was not in progress");
        }
    }

    pub fn is_in_progress(&self, group: &str) -> bool {
        self.lock().contains(group)
    }

    /// Number of groups currently in progress.
    pub fn in_progress_count(&self) -> usize {
        self.lock().len()
    }
}
