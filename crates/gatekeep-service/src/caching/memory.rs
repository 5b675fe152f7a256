use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::SetOptions;

/// Shortest interval the sweeper runs at.
const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(1);

/// An item saved in the cache.
#[derive(Clone, Debug)]
struct CacheEntry {
    /// The actual data.
    value: String,
    /// When this item logically disappears, if ever.
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| now > deadline)
    }
}

/// A key/value store with per-key expiration.
///
/// See the [module level docs](super) for how expiration and locking work.
#[derive(Debug, Default)]
pub struct TtlCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl TtlCache {
    pub fn new() -> Self {
        Self::default()
    }

    // A panicking writer can not leave the map in an inconsistent state, so poisoning is ignored.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the value stored for `key`, unless it is absent or expired.
    pub fn get(&self, key: &str) -> Option<String> {
        let entries = self.read();
        let entry = entries.get(key)?;
        (!entry.is_expired(Instant::now())).then(|| entry.value.clone())
    }

    /// Stores `value` for `key`.
    ///
    /// With [`SetOptions::only_if_absent`], nothing is written if the key already holds an
    /// unexpired entry, and `false` is returned. Otherwise the entry is overwritten, its
    /// expiration replaced according to [`SetOptions::ttl`], and `true` is returned.
    pub fn set(&self, key: &str, value: impl Into<String>, options: SetOptions) -> bool {
        let now = Instant::now();
        let mut entries = self.write();

        if options.only_if_absent && entries.get(key).is_some_and(|e| !e.is_expired(now)) {
            return false;
        }

        let expires_at = options
            .ttl
            .filter(|ttl| !ttl.is_zero())
            .map(|ttl| now + ttl);
        let entry = CacheEntry {
            value: value.into(),
            expires_at,
        };
        entries.insert(key.to_owned(), entry);
        true
    }

    /// Removes the entry for `key`, if there is one.
    pub fn delete(&self, key: &str) {
        self.write().remove(key);
    }

    /// Removes the entry for `key` if its value matches `predicate`.
    ///
    /// Checking and removing happens under a single write lock. Returns whether an entry was
    /// removed. Expired entries are matched like any other.
    pub fn delete_if(&self, key: &str, predicate: impl FnOnce(&str) -> bool) -> bool {
        let mut entries = self.write();
        match entries.get(key) {
            Some(entry) if predicate(&entry.value) => {
                entries.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Removes all expired entries and returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.write();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    /// The number of stored entries, including expired ones that were not swept yet.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Spawns a task that runs [`sweep`](Self::sweep) every `interval`.
    ///
    /// The task only holds a weak reference to the cache and finishes once the cache is dropped.
    /// Intervals below one millisecond are raised to it.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let interval = interval.max(MIN_SWEEP_INTERVAL);
        let cache = Arc::downgrade(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else {
                    break;
                };

                let swept = cache.sweep();
                if swept > 0 {
                    tracing::trace!(swept, "Evicted expired cache entries");
                    metric!(counter("cache.swept") += swept as i64);
                    metric!(gauge("cache.entries") = cache.len() as u64);
                }
            }

            tracing::debug!("Cache dropped, stopping sweeper");
        })
    }
}
