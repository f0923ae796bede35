//! Idempotency cache (§4.5): remembers which idempotency keys have already
//! been successfully processed so a retried send after a dropped response
//! doesn't double-apply server-side.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use syncd_schemas::IdempotencyKey;

const TTL_HOURS: i64 = 24;

pub struct IdempotencyCache {
    ttl: Duration,
    marked: Mutex<HashMap<IdempotencyKey, DateTime<Utc>>>,
}

impl Default for IdempotencyCache {
    fn default() -> Self {
        Self::new()
    }
}

impl IdempotencyCache {
    pub fn new() -> Self {
        Self {
            ttl: Duration::hours(TTL_HOURS),
            marked: Mutex::new(HashMap::new()),
        }
    }

    #[cfg(test)]
    fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            marked: Mutex::new(HashMap::new()),
        }
    }

    /// `true` if `key` was marked processed and hasn't expired as of `now`.
    /// Boundary: a key marked exactly `ttl` ago is still a duplicate — only
    /// strictly older entries have expired.
    pub fn is_duplicate(&self, key: &IdempotencyKey, now: DateTime<Utc>) -> bool {
        let marked = self.marked.lock().unwrap();
        match marked.get(key) {
            Some(marked_at) => now - *marked_at <= self.ttl,
            None => false,
        }
    }

    pub fn mark_processed(&self, key: IdempotencyKey, now: DateTime<Utc>) {
        self.marked.lock().unwrap().insert(key, now);
    }

    /// Drop every entry older than the TTL as of `now`. Safe to call
    /// concurrently with `is_duplicate`/`mark_processed` from other tasks.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut marked = self.marked.lock().unwrap();
        let before = marked.len();
        marked.retain(|_, marked_at| now - *marked_at <= self.ttl);
        before - marked.len()
    }

    pub fn len(&self) -> usize {
        self.marked.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
