//! In-process keyed async locks.

use crate::domain::MemberId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Holds the lock on one key until dropped.
#[derive(Debug)]
pub struct KeyGuard {
    key: MemberId,
    _guard: OwnedMutexGuard<()>,
}

impl KeyGuard {
    pub fn key(&self) -> &MemberId {
        &self.key
    }
}

/// One async mutex per member id, created on demand.
///
/// Idle entries are pruned whenever a new lock is handed out.
#[derive(Debug, Default)]
pub struct KeyedLocks {
    slots: Mutex<HashMap<MemberId, Arc<AsyncMutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &MemberId) -> Arc<AsyncMutex<()>> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.retain(|k, slot| k == key || Arc::strong_count(slot) > 1);
        slots.entry(key.clone()).or_default().clone()
    }

    pub async fn lock(&self, key: &MemberId) -> KeyGuard {
        let slot = self.slot(key);
        KeyGuard {
            key: key.clone(),
            _guard: slot.lock_owned().await,
        }
    }

    /// Lock every key, in sorted order and once per key, so two callers with
    /// overlapping key sets cannot deadlock.
    pub async fn lock_many<'a, I>(&self, keys: I) -> Vec<KeyGuard>
    where
        I: IntoIterator<Item = &'a MemberId>,
    {
        let mut keys: Vec<&MemberId> = keys.into_iter().collect();
        keys.sort();
        keys.dedup();

        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            guards.push(self.lock(key).await);
        }
        guards
    }

    /// Number of keys currently tracked.
    pub fn tracked(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
