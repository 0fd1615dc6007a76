//! Per-session mutual exclusion.
//!
//! Two concurrent events for the same session must not interleave
//! appends in a way that breaks turn boundaries. A map of per-key locks
//! (rather than one global lock) preserves cross-session concurrency.
//!
//! Idle locks are pruned by TTL, and the map is capped: when full, the
//! oldest unlocked entry is evicted. A held lock is never pruned.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

const DEFAULT_KEY: &str = "__default__";

struct LockEntry {
    lock: Arc<tokio::sync::Mutex<()>>,
    last_used: Instant,
}

/// Manages one async lock per session key.
pub struct SessionLockManager {
    locks: Mutex<HashMap<String, LockEntry>>,
    max_locks: usize,
    ttl: Duration,
}

impl SessionLockManager {
    pub fn new(max_locks: usize, ttl: Duration) -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            max_locks: max_locks.max(1),
            ttl,
        }
    }

    /// Get the lock for a session key, creating it on first use.
    /// Repeated calls with the same key return the same lock instance.
    /// Blank keys share one default slot.
    pub fn get_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let key = {
            let trimmed = key.trim();
            if trimmed.is_empty() {
                DEFAULT_KEY
            } else {
                trimmed
            }
        };

        let mut locks = self.locks.lock().expect("lock map poisoned");
        Self::prune_expired(&mut locks, self.ttl);

        if let Some(entry) = locks.get_mut(key) {
            entry.last_used = Instant::now();
            return Arc::clone(&entry.lock);
        }

        if locks.len() >= self.max_locks {
            Self::evict_oldest_unlocked(&mut locks);
        }

        let lock = Arc::new(tokio::sync::Mutex::new(()));
        locks.insert(
            key.to_string(),
            LockEntry {
                lock: Arc::clone(&lock),
                last_used: Instant::now(),
            },
        );
        lock
    }

    /// Number of tracked locks (for monitoring).
    pub fn len(&self) -> usize {
        self.locks.lock().expect("lock map poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn prune_expired(locks: &mut HashMap<String, LockEntry>, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }
        let before = locks.len();
        locks.retain(|_, entry| {
            entry.last_used.elapsed() < ttl || entry.lock.try_lock().is_err()
        });
        let pruned = before - locks.len();
        if pruned > 0 {
            debug!(pruned, "Pruned expired session locks");
        }
    }

    fn evict_oldest_unlocked(locks: &mut HashMap<String, LockEntry>) {
        let oldest = locks
            .iter()
            .filter(|(_, entry)| entry.lock.try_lock().is_ok())
            .min_by_key(|(_, entry)| entry.last_used)
            .map(|(key, _)| key.clone());
        if let Some(key) = oldest {
            locks.remove(&key);
            debug!(session_key = %key, "Evicted oldest unlocked session lock");
        }
    }
}
