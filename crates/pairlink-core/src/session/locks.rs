//! Per-user async locks.
//!
//! A user's entry lives only while someone holds or waits for its lock;
//! the last guard to drop removes it, so ids that come and go (status
//! polls for unknown users included) do not accumulate.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use super::state::UserId;

#[derive(Default)]
pub struct UserLocks {
    locks: Mutex<HashMap<UserId, Arc<AsyncMutex<()>>>>,
}

/// Exclusive hold on one user's lifecycle.
pub struct UserGuard<'a> {
    locks: &'a UserLocks,
    user_id: UserId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the user's lock.
    pub async fn lock(&self, user_id: &UserId) -> UserGuard<'_> {
        let mutex = self.entry(user_id);
        let guard = mutex.lock_owned().await;
        UserGuard {
            locks: self,
            user_id: user_id.clone(),
            guard: Some(guard),
        }
    }

    /// Take the user's lock only if nobody holds it.
    pub fn try_lock(&self, user_id: &UserId) -> Option<UserGuard<'_>> {
        let mutex = self.entry(user_id);
        match mutex.try_lock_owned() {
            Ok(guard) => Some(UserGuard {
                locks: self,
                user_id: user_id.clone(),
                guard: Some(guard),
            }),
            // The holder's guard prunes the entry when it drops.
            Err(_) => None,
        }
    }

    /// Users with a held or awaited lock.
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entry(&self, user_id: &UserId) -> Arc<AsyncMutex<()>> {
        Arc::clone(self.locks.lock().entry(user_id.clone()).or_default())
    }

    fn release(&self, user_id: &UserId) {
        let mut locks = self.locks.lock();
        // Clones are only taken under this map lock, so a count of one
        // means nobody holds or waits for this user.
        if locks
            .get(user_id)
            .is_some_and(|mutex| Arc::strong_count(mutex) == 1)
        {
            locks.remove(user_id);
        }
    }
}

impl Drop for UserGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks.release(&self.user_id);
    }
}
