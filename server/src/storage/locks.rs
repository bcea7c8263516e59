//! Per-path mutation locks
//!
//! Mutating operations hold one async mutex per relpath they touch. Guards
//! for several paths are always taken in sorted order so two operations
//! that touch the same pair of paths cannot deadlock.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockMap = HashMap<String, Arc<AsyncMutex<()>>>;

#[derive(Clone, Default)]
pub struct PathLocks {
    map: Arc<Mutex<LockMap>>,
}

/// Held locks; released (and pruned from the map when idle) on drop.
pub struct PathGuard {
    map: Arc<Mutex<LockMap>>,
    keys: Vec<String>,
    guards: Vec<OwnedMutexGuard<()>>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, paths: &[&str]) -> PathGuard {
        let mut keys: Vec<String> = paths.iter().map(|p| p.to_string()).collect();
        keys.sort();
        keys.dedup();

        let mut guards = Vec::with_capacity(keys.len());
        for key in &keys {
            let lock = {
                let mut map = self.map.lock();
                map.entry(key.clone()).or_default().clone()
            };
            guards.push(lock.lock_owned().await);
        }

        PathGuard {
            map: self.map.clone(),
            keys,
            guards,
        }
    }

    /// Number of paths with a live lock entry.
    pub fn len(&self) -> usize {
        self.map.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for PathGuard {
    fn drop(&mut self) {
        self.guards.clear();
        let mut map = self.map.lock();
        for key in &self.keys {
            // Only the map itself still references an idle lock
            if map.get(key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
                map.remove(key);
            }
        }
    }
}
