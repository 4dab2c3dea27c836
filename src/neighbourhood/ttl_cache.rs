//! Time-bounded set of recently seen keys.

use std::hash::Hash;
use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Keys expire once more than `ttl` has passed since their last insert.
/// Expired keys are purged lazily, on `active_entries`.
#[derive(Debug)]
pub struct TtlCache<K: Eq + Hash> {
    entries: DashMap<K, Instant>,
    ttl: Duration,
}

impl<K: Eq + Hash> TtlCache<K> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Insert or refresh `key`.
    pub fn insert(&self, key: K) {
        self.entries.insert(key, Instant::now() + self.ttl);
    }

    /// Purge expired keys and return how many remain.
    pub fn active_entries(&self) -> usize {
        let now = Instant::now();
        self.entries.retain(|_, expires| is_live(*expires, now));
        self.entries.len()
    }
}

/// An entry seen exactly `ttl` ago is still live.
fn is_live(expires: Instant, now: Instant) -> bool {
    expires >= now
}
