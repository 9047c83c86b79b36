//! Per-head inference caches keyed by content fingerprint.

use moka::future::Cache;
use rice_core::id;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// LRU-style cache for one model head.
///
/// Keys are `SHA-256(head | model | text)` fingerprints; batch lookups skip
/// hits and only send misses to the runtime, preserving input order.
pub struct HeadCache<V: Clone + Send + Sync + 'static> {
    head: &'static str,
    model: String,
    cache: Cache<String, Arc<V>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V: Clone + Send + Sync + 'static> HeadCache<V> {
    pub fn new(head: &'static str, model: impl Into<String>, capacity: u64) -> Self {
        Self {
            head,
            model: model.into(),
            cache: Cache::builder().max_capacity(capacity).build(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn fingerprint(&self, text: &str) -> String {
        id::ml_fingerprint(self.head, &self.model, text)
    }

    /// Look up every text; `None` marks a miss to be computed.
    pub async fn get_many(&self, texts: &[String]) -> Vec<Option<Arc<V>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            let cached = self.cache.get(&self.fingerprint(text)).await;
            match &cached {
                Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
                None => self.misses.fetch_add(1, Ordering::Relaxed),
            };
            results.push(cached);
        }
        results
    }

    pub async fn insert(&self, text: &str, value: V) {
        self.cache
            .insert(self.fingerprint(text), Arc::new(value))
            .await;
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}
