//! Bidirectional lookup.
//!
//! Forward: a source-language surface form resolves to the meanings of every
//! word group carrying it, in cycle order. Reverse: a target-language word
//! resolves through the reverse index of the opposite pack to candidate
//! source words, best quality first.
//!
//! Results are cached in an LRU keyed by the normalized query, the pair, the
//! serving packs and the store generation, so any committed write (install,
//! remove, repair) invalidates stale entries without an explicit flush.

use crate::cycle::MeaningCycle;
use crate::error::StoreError;
use crate::pack_store::{PackStore, PackUsage};
use crate::store::DictionaryStore;
use crate::utils;
use ahash::AHashSet;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// One sense of a source word, from the forward direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardMeaning {
    pub word_group_id: i64,
    pub base_word: String,
    pub meaning_id: i64,
    /// 1-based position within the word group.
    pub meaning_order: u32,
    pub target_meaning: String,
    pub context: Option<String>,
    /// The meaning's own part of speech, falling back to the group's.
    pub part_of_speech: Option<String>,
    pub is_primary: bool,
}

/// A candidate source word for a target-language query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReverseMeaning {
    pub word_group_id: i64,
    pub meaning_id: Option<i64>,
    pub source_word: String,
    /// The gloss the reverse row was derived from, when linked to a meaning.
    pub gloss: Option<String>,
    pub context: Option<String>,
    pub part_of_speech: Option<String>,
    pub quality_score: i64,
    pub lookup_order: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MeaningEntry {
    Forward(ForwardMeaning),
    Reverse(ReverseMeaning),
}

impl MeaningEntry {
    /// Text shown to the reader for this entry.
    pub fn text(&self) -> &str {
        match self {
            MeaningEntry::Forward(m) => &m.target_meaning,
            MeaningEntry::Reverse(m) => &m.source_word,
        }
    }

    pub fn context(&self) -> Option<&str> {
        match self {
            MeaningEntry::Forward(m) => m.context.as_deref(),
            MeaningEntry::Reverse(m) => m.context.as_deref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupResult {
    pub query: String,
    pub source_language: String,
    pub target_language: String,
    pub forward: Vec<ForwardMeaning>,
    pub reverse: Vec<ReverseMeaning>,
}

impl LookupResult {
    pub fn is_empty(&self) -> bool {
        self.forward.is_empty() && self.reverse.is_empty()
    }

    /// Forward entries followed by reverse entries.
    pub fn entries(&self) -> Vec<MeaningEntry> {
        self.forward
            .iter()
            .cloned()
            .map(MeaningEntry::Forward)
            .chain(self.reverse.iter().cloned().map(MeaningEntry::Reverse))
            .collect()
    }

    pub fn cycle(&self) -> MeaningCycle<MeaningEntry> {
        MeaningCycle::new(self.entries())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LookupOutcome {
    /// No active, healthy pack serves the pair in either direction.
    NoData {
        source_language: String,
        target_language: String,
    },
    Resolved(LookupResult),
}

impl LookupOutcome {
    pub fn result(&self) -> Option<&LookupResult> {
        match self {
            LookupOutcome::Resolved(r) => Some(r),
            LookupOutcome::NoData { .. } => None,
        }
    }

    pub fn into_result(self) -> Option<LookupResult> {
        match self {
            LookupOutcome::Resolved(r) => Some(r),
            LookupOutcome::NoData { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchHit {
    /// A source-language surface form.
    Forward {
        form: String,
        base_word: String,
        word_group_id: i64,
        part_of_speech: Option<String>,
    },
    /// A target-language word from the reverse index.
    Reverse {
        target_word: String,
        source_word: String,
        word_group_id: i64,
    },
}

impl SearchHit {
    /// The matched text.
    pub fn text(&self) -> &str {
        match self {
            SearchHit::Forward { form, .. } => form,
            SearchHit::Reverse { target_word, .. } => target_word,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    query: String,
    source_language: String,
    target_language: String,
    forward_pack: Option<String>,
    reverse_pack: Option<String>,
    generation: u64,
}

/// Read-only lookup over installed packs.
pub struct LookupEngine {
    store: Arc<DictionaryStore>,
    packs: Arc<PackStore>,
    cache: Mutex<lru::LruCache<CacheKey, LookupResult>>,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

impl LookupEngine {
    pub fn new(store: Arc<DictionaryStore>, packs: Arc<PackStore>, cache_capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(cache_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            store,
            packs,
            cache: Mutex::new(lru::LruCache::new(capacity)),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
        }
    }

    /// Resolve `query` for `source_language -> target_language`.
    ///
    /// Forward meanings come from the pack serving the pair; reverse
    /// candidates from the pack serving the opposite pair. No match is an
    /// empty result, never an error.
    pub fn lookup(
        &self,
        query: &str,
        source_language: &str,
        target_language: &str,
    ) -> Result<LookupOutcome, StoreError> {
        let forward_pack = self.packs.active_pack_for(source_language, target_language)?;
        let reverse_pack = self.packs.active_pack_for(target_language, source_language)?;
        if forward_pack.is_none() && reverse_pack.is_none() {
            return Ok(LookupOutcome::NoData {
                source_language: source_language.to_string(),
                target_language: target_language.to_string(),
            });
        }

        let key = CacheKey {
            query: utils::normalize_form(query),
            source_language: source_language.to_string(),
            target_language: target_language.to_string(),
            forward_pack: forward_pack.as_ref().map(|r| r.id.clone()),
            reverse_pack: reverse_pack.as_ref().map(|r| r.id.clone()),
            generation: self.store.generation(),
        };

        if let Some(hit) = self
            .cache
            .lock()
            .map_err(|_| StoreError::Poisoned)?
            .get(&key)
            .cloned()
        {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(LookupOutcome::Resolved(hit));
        }
        self.cache_misses.fetch_add(1, Ordering::Relaxed);

        // Held until the rows are read so eviction cannot remove the packs.
        // Only reads that reach the store count as use.
        let mut guards: Vec<PackUsage<'_>> = Vec::with_capacity(2);
        for record in forward_pack.iter().chain(reverse_pack.iter()) {
            guards.push(self.packs.acquire(&record.id)?);
        }

        let mut result = LookupResult {
            query: query.to_string(),
            source_language: source_language.to_string(),
            target_language: target_language.to_string(),
            forward: Vec::new(),
            reverse: Vec::new(),
        };

        if let Some(pack) = &forward_pack {
            if !key.query.is_empty() {
                result.forward =
                    self.forward(&key.query, source_language, target_language, &pack.id)?;
            }
        }
        if let Some(pack) = &reverse_pack {
            let word = utils::normalize_reverse_word(query);
            if !word.is_empty() {
                result.reverse = self.reverse(&word, target_language, source_language, &pack.id)?;
            }
        }
        drop(guards);

        tracing::debug!(
            query = %key.query,
            forward = result.forward.len(),
            reverse = result.reverse.len(),
            "lookup"
        );
        self.cache
            .lock()
            .map_err(|_| StoreError::Poisoned)?
            .put(key, result.clone());
        Ok(LookupOutcome::Resolved(result))
    }

    fn forward(
        &self,
        form: &str,
        source_language: &str,
        target_language: &str,
        pack_id: &str,
    ) -> Result<Vec<ForwardMeaning>, StoreError> {
        let groups = self
            .store
            .forward_entries(form, source_language, target_language, pack_id)?;
        let mut out = Vec::new();
        for (group, meanings) in groups {
            for m in meanings {
                out.push(ForwardMeaning {
                    word_group_id: group.id,
                    base_word: group.base_word.clone(),
                    meaning_id: m.id,
                    meaning_order: m.meaning_order,
                    target_meaning: m.target_meaning,
                    context: m.context,
                    part_of_speech: m.part_of_speech.or_else(|| group.part_of_speech.clone()),
                    is_primary: m.is_primary,
                });
            }
        }
        Ok(out)
    }

    /// Rows arrive best first; keep the first row per word group.
    fn reverse(
        &self,
        word: &str,
        group_source: &str,
        group_target: &str,
        pack_id: &str,
    ) -> Result<Vec<ReverseMeaning>, StoreError> {
        let rows = self
            .store
            .reverse_entries(word, group_source, group_target, pack_id)?;
        let mut seen = AHashSet::new();
        Ok(rows
            .into_iter()
            .filter(|r| seen.insert(r.word_group_id))
            .map(|r| ReverseMeaning {
                word_group_id: r.word_group_id,
                meaning_id: r.meaning_id,
                source_word: r.source_word,
                gloss: r.gloss,
                context: r.context,
                part_of_speech: r.part_of_speech,
                quality_score: r.quality_score,
                lookup_order: r.lookup_order,
            })
            .collect())
    }

    /// Partial-match search over both directions.
    ///
    /// Up to `limit` hits whose surface form (forward) or target word
    /// (reverse) contains `needle`. Each direction contributes half the limit;
    /// a direction with fewer hits leaves its share to the other. The merged
    /// list is ordered by length, then text.
    pub fn search(
        &self,
        needle: &str,
        source_language: &str,
        target_language: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>, StoreError> {
        let needle = utils::normalize_form(needle);
        if needle.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let forward_pack = self.packs.active_pack_for(source_language, target_language)?;
        let reverse_pack = self.packs.active_pack_for(target_language, source_language)?;

        let forward: Vec<SearchHit> = match &forward_pack {
            Some(pack) => {
                let _usage = self.packs.acquire(&pack.id)?;
                self.store
                    .search_forward(&needle, source_language, target_language, &pack.id, limit)?
                    .into_iter()
                    .map(|m| SearchHit::Forward {
                        form: m.form,
                        base_word: m.base_word,
                        word_group_id: m.word_group_id,
                        part_of_speech: m.part_of_speech,
                    })
                    .collect()
            }
            None => Vec::new(),
        };
        let reverse: Vec<SearchHit> = match &reverse_pack {
            Some(pack) => {
                let _usage = self.packs.acquire(&pack.id)?;
                self.store
                    .search_reverse(&needle, target_language, source_language, &pack.id, limit)?
                    .into_iter()
                    .map(|m| SearchHit::Reverse {
                        target_word: m.target_word,
                        source_word: m.source_word,
                        word_group_id: m.word_group_id,
                    })
                    .collect()
            }
            None => Vec::new(),
        };

        Ok(pool_hits(forward, reverse, limit))
    }

    /// Get cache statistics for monitoring.
    ///
    /// Returns (hits, misses) tuple.
    pub fn cache_stats(&self) -> (u64, u64) {
        (
            self.cache_hits.load(Ordering::Relaxed),
            self.cache_misses.load(Ordering::Relaxed),
        )
    }

    /// Get cache hit rate as a percentage (0.0 to 100.0).
    ///
    /// Returns None if no cache accesses have been made yet.
    pub fn cache_hit_rate(&self) -> Option<f32> {
        let (hits, misses) = self.cache_stats();
        let total = hits + misses;
        if total == 0 {
            None
        } else {
            Some((hits as f32 / total as f32) * 100.0)
        }
    }

    pub fn cache_size(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn cache_capacity(&self) -> usize {
        self.cache.lock().map(|c| c.cap().get()).unwrap_or(0)
    }

    /// Clear the cache and reset its counters.
    pub fn clear_cache(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.clear();
        }
        self.cache_hits.store(0, Ordering::Relaxed);
        self.cache_misses.store(0, Ordering::Relaxed);
    }
}

/// Merge per-direction hits: half the limit each, leftovers to the other
/// side, then order by (char length, text).
fn pool_hits(forward: Vec<SearchHit>, reverse: Vec<SearchHit>, limit: usize) -> Vec<SearchHit> {
    let forward_share = limit.div_ceil(2);
    let reverse_share = limit / 2;
    let take_forward = forward.len().min(forward_share);
    let take_reverse = reverse.len().min(reverse_share);
    let spare = limit - take_forward - take_reverse;
    let extra_forward = forward.len().saturating_sub(take_forward).min(spare);
    let extra_reverse = reverse
        .len()
        .saturating_sub(take_reverse)
        .min(spare - extra_forward);

    let mut hits: Vec<SearchHit> = forward
        .into_iter()
        .take(take_forward + extra_forward)
        .chain(reverse.into_iter().take(take_reverse + extra_reverse))
        .collect();
    hits.sort_by(|a, b| {
        a.text()
            .chars()
            .count()
            .cmp(&b.text().chars().count())
            .then_with(|| a.text().cmp(b.text()))
    });
    hits
}
