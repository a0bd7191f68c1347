//! Immutable vector index snapshot.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Result, VectorStoreError};
use crate::ivf::{IvfIndex, IvfParams};
use crate::record::{DocumentRecord, Specialty};
use crate::similarity::{SearchHit, dot_unchecked, normalize, normalized, select_top_k};

/// Identifier distinguishing successive builds of an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Generation(u64);

impl Generation {
    /// Generation of the first index a store publishes.
    pub const FIRST: Generation = Generation(1);

    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(self) -> u64 {
        self.0
    }

    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How nearest neighbours are found.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum SearchStrategy {
    /// Brute-force scan of every record.
    #[default]
    Exact,
    /// Inverted-file approximate search, verified against exact search at build.
    Ivf(IvfParams),
}

/// Options applied when an index is built or loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildOptions {
    /// Search structure to build.
    pub search: SearchStrategy,

    /// Number of probe queries used to verify approximate recall.
    pub recall_sample: usize,

    /// Result count the recall check is measured at.
    pub recall_k: usize,

    /// Number of record pairs sampled for the similarity profile.
    pub profile_pairs: usize,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            search: SearchStrategy::Exact,
            recall_sample: 32,
            recall_k: 10,
            profile_pairs: 2048,
        }
    }
}

/// Empirical distribution of document-to-document similarity in a corpus.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimilarityProfile {
    pub min: f32,
    pub max: f32,
    pub mean: f32,
}

impl SimilarityProfile {
    /// Profile used when the corpus has too few records to sample pairs.
    pub const FULL_RANGE: SimilarityProfile = SimilarityProfile {
        min: -1.0,
        max: 1.0,
        mean: 0.0,
    };
}

/// Summary statistics of an index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStats {
    pub generation: Generation,
    pub built_at: DateTime<Utc>,
    pub documents: usize,
    pub dimension: usize,
    pub specialties: BTreeMap<Specialty, usize>,
    pub year_range: Option<(i32, i32)>,
    pub approximate: bool,
}

/// An immutable, fully built index over a document corpus.
///
/// Embeddings are L2-normalized once at build time and stored contiguously,
/// so a query costs one normalization plus a dot product per scored record.
pub struct VectorIndex {
    generation: Generation,
    built_at: DateTime<Utc>,
    dimension: usize,
    records: Vec<DocumentRecord>,
    matrix: Vec<f32>,
    positions: HashMap<String, usize>,
    ivf: Option<IvfIndex>,
    profile: SimilarityProfile,
}

impl VectorIndex {
    /// Build an index from a batch of records.
    ///
    /// Fails with `EmptyCorpus` for an empty batch, `DimensionMismatch` when a
    /// record's dimension differs from the first record's, and
    /// `DuplicateDocumentId` when an id repeats.
    pub fn build(records: Vec<DocumentRecord>, options: &BuildOptions) -> Result<Self> {
        let dimension = records
            .first()
            .map(DocumentRecord::dimension)
            .ok_or(VectorStoreError::EmptyCorpus)?;

        let mut positions = HashMap::with_capacity(records.len());
        let mut matrix = Vec::with_capacity(records.len() * dimension);
        for (position, record) in records.iter().enumerate() {
            if record.dimension() != dimension {
                return Err(VectorStoreError::DimensionMismatch {
                    expected: dimension,
                    actual: record.dimension(),
                });
            }
            if positions.insert(record.id().to_string(), position).is_some() {
                return Err(VectorStoreError::DuplicateDocumentId(record.id().to_string()));
            }
            let start = matrix.len();
            matrix.extend_from_slice(record.embedding());
            normalize(&mut matrix[start..]);
        }

        let mut index = Self {
            generation: Generation::FIRST,
            built_at: Utc::now(),
            dimension,
            records,
            matrix,
            positions,
            ivf: None,
            profile: SimilarityProfile::FULL_RANGE,
        };
        index.profile = index.sample_profile(options.profile_pairs);

        if let SearchStrategy::Ivf(params) = &options.search {
            index.ivf = Some(IvfIndex::train(&index.matrix, dimension, index.len(), params));
            let probes = index.probe_queries(options.recall_sample);
            let recall = index.measure_recall(&probes, options.recall_k.max(1))?;
            if recall < params.recall_floor {
                warn!(
                    "IVF recall {recall:.3} below floor {:.3}; serving exact search",
                    params.recall_floor
                );
                index.ivf = None;
            } else {
                debug!("IVF recall {recall:.3} meets floor {:.3}", params.recall_floor);
            }
        }

        info!(
            "Built vector index: {} documents, dimension {dimension}, {}",
            index.len(),
            if index.is_approximate() { "ivf" } else { "exact" }
        );
        Ok(index)
    }

    pub(crate) fn with_generation(mut self, generation: Generation) -> Self {
        self.generation = generation;
        self
    }

    pub(crate) fn with_built_at(mut self, built_at: DateTime<Utc>) -> Self {
        self.built_at = built_at;
        self
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Always false for a built index; present for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Whether searches are served by the IVF structure.
    pub fn is_approximate(&self) -> bool {
        self.ivf.is_some()
    }

    pub fn profile(&self) -> SimilarityProfile {
        self.profile
    }

    pub fn records(&self) -> &[DocumentRecord] {
        &self.records
    }

    /// Look up a record by document id.
    pub fn get(&self, id: &str) -> Option<&DocumentRecord> {
        self.positions.get(id).map(|&position| &self.records[position])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.positions.contains_key(id)
    }

    /// Number of records accepted by `predicate`.
    pub fn count_matching(&self, predicate: impl Fn(&DocumentRecord) -> bool) -> usize {
        self.records.iter().filter(|record| predicate(record)).count()
    }

    /// Nearest neighbours of `query`, using IVF when it is active.
    ///
    /// Returns at most `k` hits sorted by descending similarity with ties
    /// broken by ascending document id.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        let query = self.prepare_query(query, k)?;
        match &self.ivf {
            Some(ivf) => Ok(self.score(&query, ivf.candidates(&query, k).into_iter(), k)),
            None => Ok(self.score(&query, 0..self.len(), k)),
        }
    }

    /// Nearest neighbours of `query` by brute-force scan.
    pub fn search_exact(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        let query = self.prepare_query(query, k)?;
        Ok(self.score(&query, 0..self.len(), k))
    }

    /// Exact nearest neighbours among the records accepted by `predicate`.
    pub fn search_within(
        &self,
        query: &[f32],
        k: usize,
        predicate: impl Fn(&DocumentRecord) -> bool,
    ) -> Result<Vec<SearchHit>> {
        let query = self.prepare_query(query, k)?;
        let subset = (0..self.len()).filter(|&position| predicate(&self.records[position]));
        Ok(self.score(&query, subset, k))
    }

    /// Mean recall@k of the active search path against exact search.
    pub fn measure_recall(&self, queries: &[Vec<f32>], k: usize) -> Result<f32> {
        if self.ivf.is_none() || queries.is_empty() {
            return Ok(1.0);
        }

        let mut total = 0.0f32;
        for query in queries {
            let exact = self.search_exact(query, k)?;
            if exact.is_empty() {
                total += 1.0;
                continue;
            }
            let expected: HashSet<&str> = exact.iter().map(|h| h.document_id.as_str()).collect();
            let found = self
                .search(query, k)?
                .iter()
                .filter(|h| expected.contains(h.document_id.as_str()))
                .count();
            total += found as f32 / expected.len() as f32;
        }
        Ok(total / queries.len() as f32)
    }

    /// Summary statistics for reporting.
    pub fn stats(&self) -> IndexStats {
        let mut specialties = BTreeMap::new();
        let mut year_range: Option<(i32, i32)> = None;
        for record in &self.records {
            *specialties.entry(record.specialty()).or_insert(0) += 1;
            let year = record.publication_year();
            year_range = Some(match year_range {
                Some((lo, hi)) => (lo.min(year), hi.max(year)),
                None => (year, year),
            });
        }

        IndexStats {
            generation: self.generation,
            built_at: self.built_at,
            documents: self.len(),
            dimension: self.dimension,
            specialties,
            year_range,
            approximate: self.is_approximate(),
        }
    }

    fn prepare_query(&self, query: &[f32], k: usize) -> Result<Vec<f32>> {
        if query.len() != self.dimension {
            return Err(VectorStoreError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        if k == 0 {
            return Err(VectorStoreError::InvalidK(k));
        }
        Ok(normalized(query))
    }

    fn row(&self, position: usize) -> &[f32] {
        &self.matrix[position * self.dimension..(position + 1) * self.dimension]
    }

    fn score(
        &self,
        query: &[f32],
        positions: impl Iterator<Item = usize>,
        k: usize,
    ) -> Vec<SearchHit> {
        let scored: Vec<(usize, f32)> = positions
            .map(|position| (position, dot_unchecked(self.row(position), query)))
            .collect();

        select_top_k(scored, k, |position| self.records[position].id())
            .into_iter()
            .map(|(position, similarity)| SearchHit::new(self.records[position].id(), similarity))
            .collect()
    }

    /// Deterministic probe queries: midpoints of strided record pairs.
    fn probe_queries(&self, count: usize) -> Vec<Vec<f32>> {
        let n = self.len();
        let count = count.min(n);
        (0..count)
            .map(|i| {
                let a = i * n / count;
                let b = (a + n / 2) % n;
                let mut query: Vec<f32> = self
                    .row(a)
                    .iter()
                    .zip(self.row(b))
                    .map(|(x, y)| x + y)
                    .collect();
                normalize(&mut query);
                query
            })
            .collect()
    }

    fn sample_profile(&self, pairs: usize) -> SimilarityProfile {
        let n = self.len();
        if n < 2 || pairs == 0 {
            return SimilarityProfile::FULL_RANGE;
        }

        let mut min = f32::INFINITY;
        let mut max = f32::NEG_INFINITY;
        let mut sum = 0.0f32;
        let mut sampled = 0usize;
        for i in 0..pairs {
            let a = (i * 7919) % n;
            let b = (a + 1 + (i * 104_729) % (n - 1)) % n;
            let similarity = dot_unchecked(self.row(a), self.row(b));
            min = min.min(similarity);
            max = max.max(similarity);
            sum += similarity;
            sampled += 1;
        }

        SimilarityProfile {
            min,
            max,
            mean: sum / sampled as f32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn record(id: &str, embedding: Vec<f32>, specialty: Specialty, year: i32) -> DocumentRecord {
        DocumentRecord::new(id, embedding, specialty, year).unwrap()
    }

    fn three_docs() -> Vec<DocumentRecord> {
        vec![
            record("doc1", vec![1.0, 0.0], Specialty::Cardiology, 2020),
            record("doc2", vec![0.0, 1.0], Specialty::Oncology, 2022),
            record("doc3", vec![0.9, 0.1], Specialty::Cardiology, 2024),
        ]
    }

    #[test]
    fn test_build_rejects_empty_corpus() {
        let result = VectorIndex::build(Vec::new(), &BuildOptions::default());
        assert!(matches!(result, Err(VectorStoreError::EmptyCorpus)));
    }

    #[test]
    fn test_build_rejects_dimension_mismatch() {
        let records = vec![
            record("a", vec![1.0, 0.0], Specialty::Cardiology, 2020),
            record("b", vec![1.0, 0.0, 0.0], Specialty::Cardiology, 2020),
        ];
        let result = VectorIndex::build(records, &BuildOptions::default());
        assert!(matches!(
            result,
            Err(VectorStoreError::DimensionMismatch {
                expected: 2,
                actual: 3
            })
        ));
    }

    #[test]
    fn test_build_rejects_duplicate_ids() {
        let records = vec![
            record("a", vec![1.0, 0.0], Specialty::Cardiology, 2020),
            record("a", vec![0.0, 1.0], Specialty::Cardiology, 2020),
        ];
        let result = VectorIndex::build(records, &BuildOptions::default());
        assert!(matches!(result, Err(VectorStoreError::DuplicateDocumentId(id)) if id == "a"));
    }

    #[test]
    fn test_search_orders_by_similarity() {
        let index = VectorIndex::build(three_docs(), &BuildOptions::default()).unwrap();
        let hits = index.search(&[1.0, 0.0], 2).unwrap();

        let ids: Vec<&str> = hits.iter().map(|h| h.document_id.as_str()).collect();
        assert_eq!(ids, vec!["doc1", "doc3"]);
        assert!((hits[0].similarity - 1.0).abs() < 1e-6);
        assert!((hits[1].similarity - 0.9939).abs() < 1e-3);
    }

    #[test]
    fn test_search_returns_all_when_k_exceeds_corpus() {
        let index = VectorIndex::build(three_docs(), &BuildOptions::default()).unwrap();
        assert_eq!(index.search(&[1.0, 0.0], 10).unwrap().len(), 3);
    }

    #[test]
    fn test_search_validates_query() {
        let index = VectorIndex::build(three_docs(), &BuildOptions::default()).unwrap();
        assert!(matches!(
            index.search(&[1.0, 0.0, 0.0], 1),
            Err(VectorStoreError::DimensionMismatch { .. })
        ));
        assert!(matches!(
            index.search(&[1.0, 0.0], 0),
            Err(VectorStoreError::InvalidK(0))
        ));
    }

    #[test]
    fn test_ties_break_by_ascending_id() {
        let records = vec![
            record("b", vec![1.0, 1.0], Specialty::Neurology, 2021),
            record("c", vec![1.0, 1.0], Specialty::Neurology, 2021),
            record("a", vec![1.0, 1.0], Specialty::Neurology, 2021),
        ];
        let index = VectorIndex::build(records, &BuildOptions::default()).unwrap();
        let ids: Vec<String> = index
            .search(&[1.0, 1.0], 3)
            .unwrap()
            .into_iter()
            .map(|h| h.document_id)
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_search_within_filters_before_scoring() {
        let index = VectorIndex::build(three_docs(), &BuildOptions::default()).unwrap();
        let hits = index
            .search_within(&[1.0, 0.0], 5, |r| r.specialty() == Specialty::Oncology)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document_id, "doc2");
    }

    #[test]
    fn test_stats() {
        let index = VectorIndex::build(three_docs(), &BuildOptions::default()).unwrap();
        let stats = index.stats();
        assert_eq!(stats.documents, 3);
        assert_eq!(stats.dimension, 2);
        assert_eq!(stats.specialties.get(&Specialty::Cardiology), Some(&2));
        assert_eq!(stats.year_range, Some((2020, 2024)));
        assert!(!stats.approximate);
    }

    #[test]
    fn test_profile_bounds_sampled_similarities() {
        let index = VectorIndex::build(three_docs(), &BuildOptions::default()).unwrap();
        let profile = index.profile();
        assert!(profile.min >= -1.0 - 1e-6);
        assert!(profile.max <= 1.0 + 1e-6);
        assert!(profile.min <= profile.mean && profile.mean <= profile.max);
    }

    #[test]
    fn test_zero_recall_k_still_builds_ivf() {
        let options = BuildOptions {
            search: SearchStrategy::Ivf(IvfParams::default()),
            recall_k: 0,
            ..BuildOptions::default()
        };
        let index = VectorIndex::build(three_docs(), &options).unwrap();
        assert_eq!(index.search(&[1.0, 0.0], 3).unwrap().len(), 3);
    }
}
