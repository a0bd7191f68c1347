//! Query execution against a single index snapshot.

use medrag_vector_store::{DocumentRecord, Generation, SearchHit, VectorIndex, VectorStoreError};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::confidence::{Calibration, ConfidenceBands, ConfidenceModel};
use crate::error::{Result, RetrievalError};
use crate::query::{QueryFilters, QueryRequest, RetrievedPassage};

/// Configuration for the retrieval engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Candidate window multiplier used when post-filtering.
    pub candidate_multiplier: usize,

    /// When the fraction of records accepted by the filters is at most this,
    /// the matching subset is scanned directly instead of post-filtering.
    pub prefilter_ratio: f32,

    /// Similarity-to-confidence mapping.
    pub calibration: Calibration,

    /// Confidence band thresholds.
    pub bands: ConfidenceBands,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            candidate_multiplier: 3,
            prefilter_ratio: 0.25,
            calibration: Calibration::default(),
            bands: ConfidenceBands::default(),
        }
    }
}

/// Why a retrieval came back the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalStatus {
    /// At least one passage was returned.
    Found,
    /// No document satisfies the metadata filters.
    NoMatchingDocuments,
    /// Candidates existed but none reached `min_confidence`.
    NoResultsAboveThreshold,
}

/// Ranked passages for one request, tagged with the generation they were
/// computed against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Retrieval {
    pub passages: Vec<RetrievedPassage>,
    pub status: RetrievalStatus,
    pub generation: Generation,
}

impl Retrieval {
    /// Rebuild a result from cached passages.
    pub fn from_cached(passages: Vec<RetrievedPassage>, generation: Generation) -> Self {
        let status = if passages.is_empty() {
            RetrievalStatus::NoResultsAboveThreshold
        } else {
            RetrievalStatus::Found
        };
        Self {
            passages,
            status,
            generation,
        }
    }

    fn empty(status: RetrievalStatus, generation: Generation) -> Self {
        Self {
            passages: Vec::new(),
            status,
            generation,
        }
    }
}

/// Turns a query request into ranked, confidence-scored passages.
///
/// The engine is stateless apart from its configuration: the same request
/// against the same index always produces the same result.
#[derive(Debug, Clone, Default)]
pub struct RetrievalEngine {
    config: EngineConfig,
}

impl RetrievalEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run `request` against `index`.
    pub fn retrieve(&self, index: &VectorIndex, request: &QueryRequest) -> Result<Retrieval> {
        request.validate()?;
        if request.embedding.len() != index.dimension() {
            return Err(RetrievalError::Store(VectorStoreError::DimensionMismatch {
                expected: index.dimension(),
                actual: request.embedding.len(),
            }));
        }

        let generation = index.generation();
        let Some(hits) = self.candidates(index, request)? else {
            debug!("No document matches filters {:?}", request.filters);
            return Ok(Retrieval::empty(
                RetrievalStatus::NoMatchingDocuments,
                generation,
            ));
        };

        let model = ConfidenceModel::new(self.config.calibration, index.profile());
        let candidates = hits.len();
        let passages: Vec<RetrievedPassage> = hits
            .into_iter()
            .map(|hit| {
                let confidence = model.confidence(hit.similarity);
                (hit, confidence)
            })
            .filter(|(_, confidence)| *confidence >= request.min_confidence)
            .take(request.top_k)
            .enumerate()
            .map(|(i, (hit, confidence))| RetrievedPassage {
                document_id: hit.document_id,
                similarity_score: hit.similarity,
                confidence,
                rank: i + 1,
            })
            .collect();

        debug!(
            "Retrieved {} of {candidates} candidates (top_k {}, min_confidence {}) at generation {generation}",
            passages.len(),
            request.top_k,
            request.min_confidence
        );

        if passages.is_empty() {
            return Ok(Retrieval::empty(
                RetrievalStatus::NoResultsAboveThreshold,
                generation,
            ));
        }
        Ok(Retrieval {
            passages,
            status: RetrievalStatus::Found,
            generation,
        })
    }

    /// Candidate hits in rank order, or `None` when no record passes the
    /// filters.
    fn candidates(
        &self,
        index: &VectorIndex,
        request: &QueryRequest,
    ) -> Result<Option<Vec<SearchHit>>> {
        let filters = &request.filters;
        let top_k = request.top_k;

        if filters.is_unrestricted() {
            return Ok(Some(index.search(&request.embedding, top_k)?));
        }

        let matching = index.count_matching(|record| filters.matches(record));
        if matching == 0 {
            return Ok(None);
        }

        let ratio = matching as f32 / index.len() as f32;
        if ratio <= self.config.prefilter_ratio {
            debug!("Pre-filtering {matching} of {} records", index.len());
            return Ok(Some(prefiltered(index, request)?));
        }

        let window = top_k.saturating_mul(self.config.candidate_multiplier.max(1));
        let mut hits: Vec<SearchHit> = index
            .search(&request.embedding, window)?
            .into_iter()
            .filter(|hit| accepts(index, filters, hit))
            .collect();

        if hits.len() < top_k.min(matching) {
            debug!(
                "Post-filter kept {} of window {window}; rescanning {matching} matching records",
                hits.len()
            );
            return Ok(Some(prefiltered(index, request)?));
        }

        hits.truncate(top_k);
        Ok(Some(hits))
    }
}

fn prefiltered(index: &VectorIndex, request: &QueryRequest) -> Result<Vec<SearchHit>> {
    let filters = &request.filters;
    Ok(index.search_within(&request.embedding, request.top_k, |record: &DocumentRecord| {
        filters.matches(record)
    })?)
}

fn accepts(index: &VectorIndex, filters: &QueryFilters, hit: &SearchHit) -> bool {
    index
        .get(&hit.document_id)
        .is_some_and(|record| filters.matches(record))
}

#[cfg(test)]
mod tests {
    use super::*;
    use medrag_vector_store::{BuildOptions, Specialty};
    use pretty_assertions::assert_eq;

    fn index(records: Vec<DocumentRecord>) -> VectorIndex {
        VectorIndex::build(records, &BuildOptions::default()).unwrap()
    }

    fn record(id: &str, embedding: Vec<f32>, specialty: Specialty, year: i32) -> DocumentRecord {
        DocumentRecord::new(id, embedding, specialty, year).unwrap()
    }

    fn ids(retrieval: &Retrieval) -> Vec<&str> {
        retrieval
            .passages
            .iter()
            .map(|p| p.document_id.as_str())
            .collect()
    }

    /// Ten cardiology papers close to the x axis, one oncology paper further
    /// away.
    fn mixed_corpus() -> VectorIndex {
        let mut records: Vec<DocumentRecord> = (0..10)
            .map(|i| {
                record(
                    &format!("c{i:02}"),
                    vec![1.0, 0.01 * i as f32],
                    Specialty::Cardiology,
                    2015 + i,
                )
            })
            .collect();
        records.push(record("o00", vec![0.5, 1.0], Specialty::Oncology, 2020));
        index(records)
    }

    #[test]
    fn test_ranks_are_contiguous_and_sorted() {
        let engine = RetrievalEngine::default();
        let result = engine
            .retrieve(&mixed_corpus(), &QueryRequest::new(vec![1.0, 0.0], 4))
            .unwrap();

        assert_eq!(result.status, RetrievalStatus::Found);
        assert_eq!(ids(&result), vec!["c00", "c01", "c02", "c03"]);
        let ranks: Vec<usize> = result.passages.iter().map(|p| p.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3, 4]);
        assert!(
            result
                .passages
                .windows(2)
                .all(|w| w[0].confidence >= w[1].confidence)
        );
    }

    #[test]
    fn test_rare_specialty_is_prefiltered() {
        let engine = RetrievalEngine::default();
        let request = QueryRequest::new(vec![1.0, 0.0], 3)
            .with_filters(QueryFilters::default().with_specialty(Specialty::Oncology));
        let result = engine.retrieve(&mixed_corpus(), &request).unwrap();

        assert_eq!(ids(&result), vec!["o00"]);
    }

    #[test]
    fn test_post_filter_rescans_when_window_is_exhausted() {
        // Years match 3 of 11 records (> 25%), so the engine post-filters a
        // window holding only the nearest record, which does not match.
        let engine = RetrievalEngine::new(EngineConfig {
            candidate_multiplier: 1,
            ..EngineConfig::default()
        });
        let request = QueryRequest::new(vec![1.0, 0.0], 1)
            .with_filters(QueryFilters::default().with_years(2022, 2024));
        let result = engine.retrieve(&mixed_corpus(), &request).unwrap();

        assert_eq!(ids(&result), vec!["c07"]);
    }

    #[test]
    fn test_filters_with_no_match() {
        let engine = RetrievalEngine::default();
        let request = QueryRequest::new(vec![1.0, 0.0], 3)
            .with_filters(QueryFilters::default().with_specialty(Specialty::Nephrology));
        let result = engine.retrieve(&mixed_corpus(), &request).unwrap();

        assert!(result.passages.is_empty());
        assert_eq!(result.status, RetrievalStatus::NoMatchingDocuments);
    }

    #[test]
    fn test_top_k_larger_than_corpus_is_not_padded() {
        let engine = RetrievalEngine::default();
        let result = engine
            .retrieve(&mixed_corpus(), &QueryRequest::new(vec![1.0, 0.0], 50))
            .unwrap();
        assert_eq!(result.passages.len(), 11);
    }

    #[test]
    fn test_threshold_drops_low_confidence() {
        let engine = RetrievalEngine::default();
        let corpus = mixed_corpus();
        let all = engine
            .retrieve(&corpus, &QueryRequest::new(vec![0.0, 1.0], 11))
            .unwrap();
        let cut = all.passages[0].confidence;

        let strict = engine
            .retrieve(
                &corpus,
                &QueryRequest::new(vec![0.0, 1.0], 11).with_min_confidence(cut),
            )
            .unwrap();
        assert!(strict.passages.iter().all(|p| p.confidence >= cut));
        assert_eq!(strict.passages[0].document_id, "o00");
    }

    #[test]
    fn test_dimension_mismatch_is_an_error() {
        let engine = RetrievalEngine::default();
        let err = engine
            .retrieve(&mixed_corpus(), &QueryRequest::new(vec![1.0, 0.0, 0.0], 3))
            .unwrap_err();
        assert!(matches!(
            err,
            RetrievalError::Store(VectorStoreError::DimensionMismatch {
                expected: 2,
                actual: 3
            })
        ));
    }

    #[test]
    fn test_retrieve_is_idempotent() {
        let engine = RetrievalEngine::default();
        let corpus = mixed_corpus();
        let request = QueryRequest::new(vec![0.7, 0.3], 5)
            .with_filters(QueryFilters::default().with_years(2016, 2022));

        let first = engine.retrieve(&corpus, &request).unwrap();
        let second = engine.retrieve(&corpus, &request).unwrap();
        assert_eq!(first, second);
    }
}
