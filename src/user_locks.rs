//! # Per-User Lock Registry
//!
//! Serializes reconciliation cycles of one user while letting different
//! users proceed concurrently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

use crate::collaborators::UserId;

/// Registry of per-user async mutexes
///
/// A lock handle is created on first request for a user and reused for every
/// later request. Handles nobody holds any more can be dropped with
/// [`UserLocks::prune`].
///
/// # Thread Safety
///
/// The registry map is behind a short-lived `std::sync::Mutex`; the returned
/// guards are `tokio` guards that may be held across `.await` points.
#[derive(Debug, Default)]
pub struct UserLocks {
    locks: Mutex<HashMap<UserId, Arc<AsyncMutex<()>>>>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, user_id: UserId) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(user_id).or_default())
    }

    /// Wait for exclusive access to `user_id`
    ///
    /// The access lasts until the returned guard is dropped.
    pub async fn acquire(&self, user_id: UserId) -> OwnedMutexGuard<()> {
        let handle = self.handle(user_id);
        debug!(user_id = %user_id, "Waiting for user lock");
        handle.lock_owned().await
    }

    /// Drop handles that are neither held nor awaited
    pub fn prune(&self) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        let before = locks.len();
        locks.retain(|_, handle| Arc::strong_count(handle) > 1);
        let pruned = before - locks.len();
        if pruned > 0 {
            debug!(pruned, "Pruned idle user locks");
        }
    }

    /// Number of registered handles
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
