//! Query-result cache kept consistent with the vector index.
//!
//! Keys compare the query embedding at a fixed decimal precision so that
//! floating-point jitter from re-encoding identical text still hits. Every
//! entry carries the index generation it was computed against and is never
//! served once the index has moved on.

use std::collections::BTreeSet;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use lru::LruCache;
use medrag_vector_store::{Generation, Specialty};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::query::{QueryRequest, RetrievedPassage, YearRange};

/// Cache key derived from a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    embedding: Vec<i64>,
    specialties: Option<BTreeSet<Specialty>>,
    years: Option<YearRange>,
    top_k: usize,
    min_confidence: u32,
}

impl CacheKey {
    /// Build the key for `request`, rounding each embedding component to
    /// `precision` decimal places.
    pub fn new(request: &QueryRequest, precision: u32) -> Self {
        let scale = 10f64.powi(precision as i32);
        let embedding = request
            .embedding
            .iter()
            .map(|&x| (f64::from(x) * scale).round() as i64)
            .collect();

        Self {
            embedding,
            specialties: request.filters.specialties.clone(),
            years: request.filters.years,
            top_k: request.top_k,
            // Thresholds are user input and compared exactly.
            min_confidence: request.min_confidence.to_bits(),
        }
    }
}

/// A cached result.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub passages: Vec<RetrievedPassage>,
    pub generation: Generation,
    pub cached_at: DateTime<Utc>,
}

/// Cache statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub stale: u64,
}

/// Bounded LRU cache of retrieval results, safe to share between threads.
pub struct QueryCache {
    entries: Mutex<LruCache<CacheKey, CacheEntry>>,
    precision: u32,
    hits: AtomicU64,
    misses: AtomicU64,
    stale: AtomicU64,
}

impl QueryCache {
    /// Create a cache holding at most `capacity` entries, keyed at
    /// `precision` decimal places.
    pub fn new(capacity: NonZeroUsize, precision: u32) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            precision,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            stale: AtomicU64::new(0),
        }
    }

    /// Cached passages for `request`, if computed against `generation`.
    ///
    /// An entry tagged with any other generation is dropped and reported as a
    /// miss.
    pub fn get(
        &self,
        request: &QueryRequest,
        generation: Generation,
    ) -> Option<Vec<RetrievedPassage>> {
        let key = CacheKey::new(request, self.precision);
        let mut entries = self.entries.lock();

        let cached_generation = entries.peek(&key).map(|entry| entry.generation);
        match cached_generation {
            Some(cached) if cached == generation => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                entries.get(&key).map(|entry| entry.passages.clone())
            }
            Some(cached) => {
                entries.pop(&key);
                self.stale.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!("Dropped cache entry from generation {cached}, index is at {generation}");
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store `passages` computed against `generation`. Last writer wins.
    pub fn put(
        &self,
        request: &QueryRequest,
        passages: Vec<RetrievedPassage>,
        generation: Generation,
    ) {
        let key = CacheKey::new(request, self.precision);
        let entry = CacheEntry {
            passages,
            generation,
            cached_at: Utc::now(),
        };
        self.entries.lock().put(key, entry);
    }

    /// Remove every entry.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.lock();
        CacheStats {
            entries: entries.len(),
            capacity: entries.cap().get(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::QueryFilters;
    use pretty_assertions::assert_eq;

    fn passage(id: &str) -> RetrievedPassage {
        RetrievedPassage {
            document_id: id.to_string(),
            similarity_score: 0.9,
            confidence: 0.98,
            rank: 1,
        }
    }

    fn cache(capacity: usize) -> QueryCache {
        QueryCache::new(NonZeroUsize::new(capacity).unwrap(), 4)
    }

    #[test]
    fn test_hit_at_same_generation() {
        let cache = cache(8);
        let request = QueryRequest::new(vec![0.1, 0.2], 3);
        cache.put(&request, vec![passage("a")], Generation::new(1));

        assert_eq!(
            cache.get(&request, Generation::new(1)),
            Some(vec![passage("a")])
        );
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn test_jitter_below_precision_still_hits() {
        let cache = cache(8);
        cache.put(
            &QueryRequest::new(vec![0.123_41, 0.5], 3),
            vec![passage("a")],
            Generation::new(1),
        );

        let jittered = QueryRequest::new(vec![0.123_412, 0.500_001], 3);
        assert!(cache.get(&jittered, Generation::new(1)).is_some());

        let different = QueryRequest::new(vec![0.1236, 0.5], 3);
        assert!(cache.get(&different, Generation::new(1)).is_none());
    }

    #[test]
    fn test_filters_top_k_and_threshold_are_part_of_key() {
        let cache = cache(8);
        let request = QueryRequest::new(vec![0.1, 0.2], 3);
        cache.put(&request, vec![passage("a")], Generation::new(1));

        let filtered = request
            .clone()
            .with_filters(QueryFilters::default().with_specialty(Specialty::Oncology));
        let wider = QueryRequest::new(vec![0.1, 0.2], 4);
        let stricter = request.clone().with_min_confidence(0.5);

        assert!(cache.get(&filtered, Generation::new(1)).is_none());
        assert!(cache.get(&wider, Generation::new(1)).is_none());
        assert!(cache.get(&stricter, Generation::new(1)).is_none());
    }

    #[test]
    fn test_stale_generation_is_never_served() {
        let cache = cache(8);
        let request = QueryRequest::new(vec![0.1, 0.2], 3);
        cache.put(&request, vec![passage("a")], Generation::new(1));

        assert!(cache.get(&request, Generation::new(2)).is_none());
        // The stale entry is gone even if asked for its own generation again.
        assert!(cache.get(&request, Generation::new(1)).is_none());

        let stats = cache.stats();
        assert_eq!(stats.stale, 1);
        assert_eq!(stats.entries, 0);
    }

    #[test]
    fn test_least_recently_used_entry_is_evicted() {
        let cache = cache(2);
        let a = QueryRequest::new(vec![1.0], 1);
        let b = QueryRequest::new(vec![2.0], 1);
        let c = QueryRequest::new(vec![3.0], 1);
        let generation = Generation::new(1);

        cache.put(&a, vec![passage("a")], generation);
        cache.put(&b, vec![passage("b")], generation);
        assert!(cache.get(&a, generation).is_some());
        cache.put(&c, vec![passage("c")], generation);

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&b, generation).is_none());
        assert!(cache.get(&a, generation).is_some());
        assert!(cache.get(&c, generation).is_some());
    }
}
