//! Per-key storage for reserved nonces.
//!
//! The nonce manager keeps its per-address reservation sets behind the
//! [`KeyValueStore`] trait so that hosts can plug in a persistent backend.
//! The trait carries an optional mutual-exclusion extension: `lock` takes an
//! exclusive per-key lock (bounded by an acquisition timeout), and every
//! acquired lock arms an auto-release watchdog so that a crashed or
//! cancelled holder cannot wedge the key forever.
//!
//! [`InMemoryStore`] is the default backend: a process-local map with the
//! full locking discipline. `get` reads the entry map directly and never
//! waits on key locks.

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// The set of nonces currently reserved for one address.
pub type NonceSet = BTreeSet<u64>;

/// Errors surfaced by store implementations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// `lock` did not acquire the key within the acquisition budget.
    #[error("lock on {key} not acquired within {waited:?}")]
    LockTimeout { key: String, waited: Duration },
}

/// Per-key mutable storage with optional mutual-exclusion locking.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Reads the value under `key`. Never blocks waiting on writers.
    async fn get(&self, key: &str) -> Option<NonceSet>;

    /// Replaces the value under `key`. Releases the key's lock if one is
    /// held.
    async fn put(&self, key: &str, value: NonceSet);

    /// Removes the value under `key`.
    async fn delete(&self, key: &str);

    /// All keys with a stored value.
    async fn keys(&self) -> Vec<String>;

    /// Drops every stored value. Held locks are left to their holders (or
    /// the watchdog).
    async fn clear(&self);

    /// Acquires the exclusive lock on `key`, waiting up to the store's
    /// acquisition timeout. The lock is released by `put`, [`Self::release`],
    /// or the expiry watchdog.
    async fn lock(&self, key: &str) -> Result<(), StoreError>;

    /// Releases the lock on `key` without writing.
    async fn release(&self, key: &str);
}

/// Lock timing knobs for [`InMemoryStore`].
#[derive(Debug, Clone, Copy)]
pub struct LockOptions {
    /// How long `lock` waits for a contended key before failing.
    pub acquire_timeout: Duration,
    /// Poll interval while waiting for a contended key.
    pub check_interval: Duration,
    /// Watchdog budget: a lock held longer than this is force-released.
    pub hold_timeout: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            acquire_timeout: Duration::from_millis(45_000),
            check_interval: Duration::from_millis(100),
            hold_timeout: Duration::from_millis(5_000),
        }
    }
}

struct LockHolder {
    generation: u64,
    watchdog: Option<JoinHandle<()>>,
}

/// Process-local [`KeyValueStore`] with per-key locks.
pub struct InMemoryStore {
    entries: DashMap<String, NonceSet>,
    locks: Arc<DashMap<String, LockHolder>>,
    generation: AtomicU64,
    options: LockOptions,
}

impl InMemoryStore {
    pub fn new(options: LockOptions) -> Self {
        Self {
            entries: DashMap::new(),
            locks: Arc::new(DashMap::new()),
            generation: AtomicU64::new(0),
            options,
        }
    }

    /// Attempts a single non-blocking acquisition of `key`. On success,
    /// arms the expiry watchdog and returns `true`.
    fn try_lock(&self, key: &str) -> bool {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        match self.locks.entry(key.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(vacant) => {
                vacant.insert(LockHolder {
                    generation,
                    watchdog: None,
                });
                let locks = Arc::clone(&self.locks);
                let owned_key = key.to_string();
                let hold_timeout = self.options.hold_timeout;
                let watchdog = tokio::spawn(async move {
                    tokio::time::sleep(hold_timeout).await;
                    // The generation check keeps an expired watchdog from
                    // releasing a lock re-acquired by somebody else.
                    let removed = locks.remove_if(&owned_key, |_, holder| {
                        holder.generation == generation
                    });
                    if removed.is_some() {
                        tracing::warn!(
                            key = %owned_key,
                            held_for = ?hold_timeout,
                            "store lock expired without put or release, force-releasing"
                        );
                    }
                });
                if let Some(mut holder) = self.locks.get_mut(key) {
                    if holder.generation == generation {
                        holder.watchdog = Some(watchdog);
                    }
                }
                true
            }
        }
    }

    fn unlock(&self, key: &str) {
        if let Some((_, holder)) = self.locks.remove(key) {
            if let Some(watchdog) = holder.watchdog {
                watchdog.abort();
            }
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(LockOptions::default())
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get(&self, key: &str) -> Option<NonceSet> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    async fn put(&self, key: &str, value: NonceSet) {
        self.entries.insert(key.to_string(), value);
        self.unlock(key);
    }

    async fn delete(&self, key: &str) {
        self.entries.remove(key);
    }

    async fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }

    async fn clear(&self) {
        self.entries.clear();
    }

    async fn lock(&self, key: &str) -> Result<(), StoreError> {
        let started = Instant::now();
        loop {
            if self.try_lock(key) {
                return Ok(());
            }
            if started.elapsed() >= self.options.acquire_timeout {
                return Err(StoreError::LockTimeout {
                    key: key.to_string(),
                    waited: started.elapsed(),
                });
            }
            tokio::time::sleep(self.options.check_interval).await;
        }
    }

    async fn release(&self, key: &str) {
        self.unlock(key);
    }
}
