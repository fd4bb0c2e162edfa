//! Cache LRU berkapasitas tetap untuk response submission, dengan key
//! idempotency key.
//!
//! Terpisah dari cache TTL milik gateway; entry hanya hilang saat tergusur
//! kapasitas.

use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;

use fabric_common::SubmissionResponse;

pub const DEFAULT_CACHE_CAPACITY: usize = 1000;

#[derive(Debug)]
pub struct ResponseCache {
    inner: Mutex<LruCache<String, SubmissionResponse>>,
}

impl ResponseCache {
    /// Kapasitas 0 diperlakukan sebagai 1.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Lookup juga menandai entry sebagai yang paling baru dipakai.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<SubmissionResponse> {
        self.inner.lock().get(key).cloned()
    }

    pub fn insert(&self, key: impl Into<String>, response: SubmissionResponse) {
        self.inner.lock().put(key.into(), response);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.lock().cap().get()
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}
