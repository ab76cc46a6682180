//! Per-account single-flight locks
//!
//! One async mutex per account identifier, created on demand and dropped once
//! nobody holds or waits on it. Different accounts never share a lock.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OwnedMutexGuard;

type PendingLock = Pin<Box<dyn Future<Output = OwnedMutexGuard<()>> + Send>>;

#[derive(Default)]
pub struct KeyedLocks {
    entries: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

/// Held lock for one key. Dropping it releases the key and prunes the entry
/// when it is idle.
pub struct KeyGuard<'a> {
    locks: &'a KeyedLocks,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

/// A wait for a key. Dropping it, granted or abandoned, releases its claim
/// on the entry and prunes the entry when it is idle.
struct Waiter<'a> {
    locks: &'a KeyedLocks,
    key: &'a str,
    pending: Option<PendingLock>,
}

impl Waiter<'_> {
    async fn acquire(&mut self) -> Option<OwnedMutexGuard<()>> {
        Some(self.pending.as_mut()?.await)
    }
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        drop(self.pending.take());
        self.locks.prune(self.key);
    }
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub async fn lock(&self, key: &str) -> KeyGuard<'_> {
        let entry = {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            entries.entry(key.to_owned()).or_default().clone()
        };
        let mut waiter = Waiter {
            locks: self,
            key,
            pending: Some(Box::pin(entry.lock_owned())),
        };
        let guard = waiter.acquire().await;
        KeyGuard {
            locks: self,
            key: key.to_owned(),
            guard,
        }
    }

    /// Drop the entry for `key` once nothing but the map refers to it.
    fn prune(&self, key: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries
            .get(key)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            entries.remove(key);
        }
    }

    /// Keys with a live lock entry (held or awaited).
    pub fn active(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        // Release first so the strong count reflects only the map and waiters.
        drop(self.guard.take());
        self.locks.prune(&self.key);
    }
}
