//! Translation cache.
//!
//! Bounded LRU keyed by (normalized text, source language, target language).
//! Entries are non-authoritative; the orchestrator only writes successes.

use crate::orchestrator::Provider;
use crate::utils;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub text: String,
    pub source_language: String,
    pub target_language: String,
}

impl CacheKey {
    pub fn new(text: &str, source_language: &str, target_language: &str) -> Self {
        Self {
            text: utils::normalize_cache_text(text),
            source_language: source_language.to_string(),
            target_language: target_language.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub translated_text: String,
    /// Provider that produced the translation.
    pub provider: Provider,
    pub alternatives: Vec<String>,
    /// Unix millis of the last read or write.
    pub last_access: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub capacity: usize,
    pub evictions: u64,
}

impl CacheStats {
    /// Hit rate as a percentage, None before the first access.
    pub fn hit_rate(&self) -> Option<f32> {
        let total = self.hits + self.misses;
        if total == 0 {
            None
        } else {
            Some(self.hits as f32 / total as f32 * 100.0)
        }
    }
}

struct Inner {
    entries: lru::LruCache<CacheKey, CacheEntry>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

pub struct TranslationCache {
    inner: Mutex<Inner>,
}

impl TranslationCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(Inner {
                entries: lru::LruCache::new(capacity),
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let mut inner = self.inner.lock().ok()?;
        let now = chrono::Utc::now().timestamp_millis();
        let found = inner.entries.get_mut(key).map(|entry| {
            entry.last_access = now;
            entry.clone()
        });
        match found {
            Some(entry) => {
                inner.hits += 1;
                Some(entry)
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Insert or replace. Concurrent writers of the same key: last wins.
    pub fn put(&self, key: CacheKey, mut entry: CacheEntry) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        entry.last_access = chrono::Utc::now().timestamp_millis();
        // `push` hands back the displaced entry: the old value for a replaced
        // key, or the LRU victim when full.
        if let Some((old_key, _)) = inner.entries.push(key.clone(), entry) {
            if old_key != key {
                inner.evictions += 1;
            }
        }
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.inner
            .lock()
            .map(|inner| inner.entries.contains(key))
            .unwrap_or(false)
    }

    pub fn clear(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.entries.clear();
            inner.hits = 0;
            inner.misses = 0;
            inner.evictions = 0;
        }
    }

    pub fn stats(&self) -> CacheStats {
        match self.inner.lock() {
            Ok(inner) => CacheStats {
                hits: inner.hits,
                misses: inner.misses,
                entries: inner.entries.len(),
                capacity: inner.entries.cap().get(),
                evictions: inner.evictions,
            },
            Err(_) => CacheStats::default(),
        }
    }
}
