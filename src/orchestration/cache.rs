//! Time-bounded store for task results.
//!
//! A `ResultCache` is an explicit object handed to the nodes that should
//! share it. Clones share the same entries.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// Default entry lifetime (4 hours).
pub const DEFAULT_CACHE_TTL_SECS: u64 = 4 * 60 * 60;

#[derive(Debug, Clone)]
struct Entry {
    stored_at: Instant,
    value: Value,
}

#[derive(Debug, Clone)]
pub struct ResultCache {
    ttl: Duration,
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_CACHE_TTL_SECS))
    }
}

impl ResultCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Keys are compared trimmed and case-insensitively.
    pub fn normalize_key(key: &str) -> String {
        key.trim().to_lowercase()
    }

    /// A fresh value for `key`. Expired entries are removed on lookup.
    pub fn get(&self, key: &str) -> Option<Value> {
        let key = Self::normalize_key(key);
        let mut entries = self.lock();
        match entries.get(&key) {
            Some(entry) if entry.stored_at.elapsed() < self.ttl => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(&key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: &str, value: Value) {
        self.lock().insert(
            Self::normalize_key(key),
            Entry {
                stored_at: Instant::now(),
                value,
            },
        );
    }

    pub fn invalidate(&self, key: &str) -> bool {
        self.lock().remove(&Self::normalize_key(key)).is_some()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Drop expired entries and return how many remain.
    pub fn purge_expired(&self) -> usize {
        let ttl = self.ttl;
        let mut entries = self.lock();
        entries.retain(|_, entry| entry.stored_at.elapsed() < ttl);
        entries.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
