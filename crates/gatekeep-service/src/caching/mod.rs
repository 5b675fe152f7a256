//! # In-memory TTL cache
//!
//! The [`TtlCache`] is a plain key/value store where each entry can carry an expiration deadline.
//! It is the storage layer of the request-coalescing protocol in
//! [`Resolver`](crate::services::Resolver), and doubles as its advisory lock:
//!
//! - [`TtlCache::set`] with [`SetOptions::only_if_absent`] only writes when no unexpired entry
//!   exists, and reports whether it did. Exactly one caller can observe `true` for a key until the
//!   entry expires or is overwritten.
//! - Giving such a lock entry a TTL bounds how long an abandoned lock blocks everyone else.
//!
//! ## Expiration
//!
//! Expiration is a logical deadline. An entry is treated as absent by [`TtlCache::get`] and
//! [`TtlCache::set`] as soon as its deadline has passed, whether or not it was physically removed
//! yet. Physical removal happens in [`TtlCache::sweep`], which is run periodically by the task
//! started with [`TtlCache::spawn_sweeper`].
//!
//! ## Concurrency
//!
//! A single [`RwLock`](std::sync::RwLock) guards the whole map. Reads share it, writes and sweeps
//! hold it exclusively. There is no per-key locking, so throughput is limited by that one lock.
//!
//! ### Metrics
//!
//! - `cache.swept`: Number of expired entries removed by the background sweeper.
//! - `cache.entries`: Gauge of stored entries, reported after each sweep.

use std::time::Duration;

mod memory;

pub use memory::TtlCache;

#[cfg(test)]
mod tests;

/// Options for [`TtlCache::set`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SetOptions {
    /// The time to live of the entry.
    ///
    /// `None` and a zero duration both mean the entry never expires.
    pub ttl: Option<Duration>,
    /// Only write the entry if the key holds no unexpired entry.
    pub only_if_absent: bool,
}

impl SetOptions {
    /// Sets the time to live of the entry.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Turns the write into a set-if-absent.
    pub fn only_if_absent(mut self) -> Self {
        self.only_if_absent = true;
        self
    }
}
