//! The medical retrieval service.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Datelike, Utc};
use medrag_vector_store::{
    DocumentRecord, Generation, IndexStats, SnapshotDir, VectorIndex, VectorStore,
    VectorStoreError,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cache::{CacheStats, QueryCache};
use crate::citation::{CitationAssembler, CitationWarning, CitedPassage};
use crate::confidence::ConfidenceBand;
use crate::config::{CacheConfig, RetrievalConfig};
use crate::engine::{Retrieval, RetrievalEngine, RetrievalStatus};
use crate::error::{Result, RetrievalError};
use crate::provider::{QueryEncoder, SynthesisInput};
use crate::quality::SourceQuality;
use crate::query::QueryRequest;

/// Answer to a single query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResponse {
    /// Index generation every passage was computed and enriched against.
    pub generation: Generation,

    pub status: RetrievalStatus,

    /// Ranked, enriched passages.
    pub passages: Vec<CitedPassage>,

    /// Passages dropped during enrichment, then source-quality concerns.
    pub warnings: Vec<CitationWarning>,

    /// Band of the most confident passage, if any.
    pub band: Option<ConfidenceBand>,

    /// Whether the ranked passages came from the query cache.
    pub from_cache: bool,
}

/// Service statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStats {
    /// `None` until an index has been built or loaded.
    pub index: Option<IndexStats>,
    /// `None` when caching is disabled.
    pub cache: Option<CacheStats>,
}

/// Confidence-scored, cached, cited retrieval over a shared vector store.
///
/// Every query pins the current index snapshot once and uses it for the cache
/// lookup, the search and enrichment, so a concurrent rebuild can never mix
/// two generations inside one response.
pub struct MedicalRetrieval {
    store: Arc<VectorStore>,
    cache: Option<QueryCache>,
    engine: RetrievalEngine,
    assembler: CitationAssembler,
    quality: SourceQuality,
    snapshots: SnapshotDir,
}

impl MedicalRetrieval {
    /// Create a new service builder.
    pub fn builder() -> MedicalRetrievalBuilder {
        MedicalRetrievalBuilder::new()
    }

    /// Create a service with an empty store from `config`.
    pub fn from_config(config: RetrievalConfig) -> Result<Self> {
        config.validate()?;

        let mut store = VectorStore::new(config.store.build_options());
        if let Some(dimension) = config.store.dimension {
            store = store.with_expected_dimension(dimension);
        }

        Ok(Self::with_store(Arc::new(store), config))
    }

    /// Create a service around an existing shared `store`.
    pub fn with_store(store: Arc<VectorStore>, config: RetrievalConfig) -> Self {
        let cache = new_cache(&config.cache);
        let assembler = CitationAssembler::new(config.engine.bands);
        Self {
            store,
            cache,
            engine: RetrievalEngine::new(config.engine),
            assembler,
            quality: SourceQuality::new(config.quality),
            snapshots: SnapshotDir::new(config.store.snapshot_dir),
        }
    }

    pub fn store(&self) -> &Arc<VectorStore> {
        &self.store
    }

    pub fn assembler(&self) -> &CitationAssembler {
        &self.assembler
    }

    pub fn snapshot_dir(&self) -> &SnapshotDir {
        &self.snapshots
    }

    /// Answer `request` from the current index.
    pub fn query(&self, request: &QueryRequest) -> Result<RetrievalResponse> {
        request.validate()?;
        let index = self.store.snapshot()?;
        let generation = index.generation();

        let cached = self
            .cache
            .as_ref()
            .and_then(|cache| cache.get(request, generation));
        let from_cache = cached.is_some();
        let retrieval = match cached {
            Some(passages) => {
                debug!("Cache hit at generation {generation}");
                Retrieval::from_cached(passages, generation)
            }
            None => {
                let retrieval = self.engine.retrieve(&index, request)?;
                // Cached entries only carry passages, which cannot tell a
                // filter that matched nothing from an unmet threshold.
                if let Some(cache) = &self.cache
                    && retrieval.status != RetrievalStatus::NoMatchingDocuments
                {
                    cache.put(request, retrieval.passages.clone(), generation);
                }
                retrieval
            }
        };

        Ok(self.respond(&index, retrieval, from_cache))
    }

    /// Encode `text` with `encoder` and answer it.
    pub fn query_text(
        &self,
        encoder: &dyn QueryEncoder,
        text: &str,
        mut request: QueryRequest,
    ) -> Result<RetrievalResponse> {
        if let Some(index_dimension) = self.index_dimension() {
            if encoder.dimension() != index_dimension {
                return Err(RetrievalError::Store(VectorStoreError::DimensionMismatch {
                    expected: index_dimension,
                    actual: encoder.dimension(),
                }));
            }
        }
        request.embedding = encoder.encode(text)?;
        self.query(&request)
    }

    /// Replace the index with one built from `records`.
    pub fn rebuild(&self, records: Vec<DocumentRecord>) -> Result<Generation> {
        let generation = self.store.build(records)?;
        self.drop_cache();
        Ok(generation)
    }

    /// Replace the index with a persisted snapshot.
    pub fn load_snapshot(&self, path: &Path) -> Result<Generation> {
        let generation = self.store.load(path)?;
        self.drop_cache();
        Ok(generation)
    }

    /// Replace the index with the most recent snapshot in the snapshot
    /// directory.
    pub fn load_latest(&self) -> Result<Generation> {
        let generation = self.store.load_latest(&self.snapshots)?;
        self.drop_cache();
        Ok(generation)
    }

    /// Persist the current index into the snapshot directory.
    pub fn persist(&self) -> Result<PathBuf> {
        let path = self.store.save_to(&self.snapshots)?;
        info!("Persisted index snapshot to {}", path.display());
        Ok(path)
    }

    /// Input for an answer synthesizer.
    pub fn synthesis_input(&self, query: &str, response: &RetrievalResponse) -> SynthesisInput {
        SynthesisInput::new(query, response.passages.clone())
    }

    pub fn stats(&self) -> ServiceStats {
        ServiceStats {
            index: self.store.stats().ok(),
            cache: self.cache.as_ref().map(QueryCache::stats),
        }
    }

    fn respond(
        &self,
        index: &VectorIndex,
        retrieval: Retrieval,
        from_cache: bool,
    ) -> RetrievalResponse {
        let mut enrichment = self.assembler.enrich(index, &retrieval.passages);
        let concerns = self.quality.assess(&enrichment.passages, Utc::now().year());
        enrichment.warnings.extend(concerns);
        let band = enrichment.passages.first().map(|p| p.band);
        let status = match retrieval.status {
            RetrievalStatus::Found if enrichment.passages.is_empty() => {
                RetrievalStatus::NoResultsAboveThreshold
            }
            status => status,
        };

        RetrievalResponse {
            generation: retrieval.generation,
            status,
            passages: enrichment.passages,
            warnings: enrichment.warnings,
            band,
            from_cache,
        }
    }

    fn index_dimension(&self) -> Option<usize> {
        self.store.snapshot().ok().as_deref().map(VectorIndex::dimension)
    }

    // Entries are tagged with their generation and would never be served
    // again; clearing just releases the memory early.
    fn drop_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.clear();
        }
    }
}

fn new_cache(config: &CacheConfig) -> Option<QueryCache> {
    if !config.enabled {
        return None;
    }
    NonZeroUsize::new(config.max_entries)
        .map(|capacity| QueryCache::new(capacity, config.precision))
}

/// Builder for [`MedicalRetrieval`].
pub struct MedicalRetrievalBuilder {
    config: RetrievalConfig,
    store: Option<Arc<VectorStore>>,
}

impl MedicalRetrievalBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            config: RetrievalConfig::default(),
            store: None,
        }
    }

    /// Start from an existing configuration.
    pub fn with_config(mut self, config: RetrievalConfig) -> Self {
        self.config = config;
        self
    }

    /// Share an existing store instead of creating one.
    pub fn with_store(mut self, store: Arc<VectorStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the snapshot directory.
    pub fn with_snapshot_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.store.snapshot_dir = dir.into();
        self
    }

    /// Require this embedding dimension.
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.config.store.dimension = Some(dimension);
        self
    }

    /// Enable or disable the query cache.
    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.config.cache.enabled = enabled;
        self
    }

    /// Build the service.
    pub fn build(self) -> Result<MedicalRetrieval> {
        match self.store {
            Some(store) => {
                self.config.validate()?;
                Ok(MedicalRetrieval::with_store(store, self.config))
            }
            None => MedicalRetrieval::from_config(self.config),
        }
    }
}

impl Default for MedicalRetrievalBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quality::QualityConfig;
    use crate::query::QueryFilters;
    use medrag_vector_store::Specialty;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn records() -> Vec<DocumentRecord> {
        vec![
            DocumentRecord::new("1001", vec![1.0, 0.0], Specialty::Cardiology, 2021)
                .unwrap()
                .with_title("Beta blockers after infarction"),
            DocumentRecord::new("1002", vec![0.0, 1.0], Specialty::Oncology, 2022)
                .unwrap()
                .with_title("Checkpoint inhibitors"),
        ]
    }

    struct FixedEncoder(Vec<f32>);

    impl QueryEncoder for FixedEncoder {
        fn encode(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(self.0.clone())
        }

        fn dimension(&self) -> usize {
            self.0.len()
        }
    }

    #[test]
    fn test_query_before_build_fails() {
        let service = MedicalRetrieval::builder().build().unwrap();
        let err = service
            .query(&QueryRequest::new(vec![1.0, 0.0], 1))
            .unwrap_err();
        assert!(matches!(err, RetrievalError::Store(VectorStoreError::NotBuilt)));
    }

    #[test]
    fn test_second_query_is_served_from_cache() {
        let service = MedicalRetrieval::builder().build().unwrap();
        service.rebuild(records()).unwrap();
        let request = QueryRequest::new(vec![1.0, 0.1], 1);

        let first = service.query(&request).unwrap();
        let second = service.query(&request).unwrap();

        assert!(!first.from_cache);
        assert!(second.from_cache);
        assert_eq!(first.passages, second.passages);
        assert_eq!(second.passages[0].title, "Beta blockers after infarction");
        assert_eq!(service.stats().cache.map(|c| c.hits), Some(1));
    }

    #[test]
    fn test_disabled_cache() {
        let service = MedicalRetrieval::builder().with_cache(false).build().unwrap();
        service.rebuild(records()).unwrap();
        let request = QueryRequest::new(vec![1.0, 0.1], 1);

        service.query(&request).unwrap();
        assert!(!service.query(&request).unwrap().from_cache);
        assert!(service.stats().cache.is_none());
    }

    #[test]
    fn test_query_text_checks_encoder_dimension() {
        let service = MedicalRetrieval::builder().build().unwrap();
        service.rebuild(records()).unwrap();

        let response = service
            .query_text(
                &FixedEncoder(vec![0.0, 1.0]),
                "immunotherapy outcomes",
                QueryRequest::new(Vec::new(), 1),
            )
            .unwrap();
        assert_eq!(response.passages[0].document_id, "1002");

        let err = service
            .query_text(
                &FixedEncoder(vec![0.0, 1.0, 0.0]),
                "immunotherapy outcomes",
                QueryRequest::new(Vec::new(), 1),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            RetrievalError::Store(VectorStoreError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_persist_and_load_latest() {
        let dir = TempDir::new().unwrap();
        let writer = MedicalRetrieval::builder()
            .with_snapshot_dir(dir.path())
            .build()
            .unwrap();
        writer.rebuild(records()).unwrap();
        let path = writer.persist().unwrap();
        assert!(path.exists());

        let reader = MedicalRetrieval::builder()
            .with_snapshot_dir(dir.path())
            .with_dimension(2)
            .build()
            .unwrap();
        reader.load_latest().unwrap();

        let request = QueryRequest::new(vec![0.0, 1.0], 1)
            .with_filters(QueryFilters::default().with_specialty(Specialty::Oncology));
        let response = reader.query(&request).unwrap();
        assert_eq!(response.passages[0].document_id, "1002");
        assert_eq!(reader.stats().index.map(|s| s.documents), Some(2));
    }

    #[test]
    fn test_weak_and_dated_sources_are_flagged() {
        let this_year = Utc::now().year();
        let service = MedicalRetrieval::builder()
            .with_config(RetrievalConfig::default().with_quality(QualityConfig {
                min_sources: 3,
                ..QualityConfig::default()
            }))
            .build()
            .unwrap();
        service
            .rebuild(vec![
                DocumentRecord::new("2001", vec![1.0, 0.0], Specialty::Cardiology, this_year)
                    .unwrap(),
                DocumentRecord::new("2002", vec![0.0, 1.0], Specialty::Cardiology, 1998)
                    .unwrap(),
            ])
            .unwrap();

        let response = service.query(&QueryRequest::new(vec![1.0, 0.0], 2)).unwrap();
        assert_eq!(response.passages.len(), 2);
        assert_eq!(
            response.warnings,
            vec![
                CitationWarning::InsufficientSources {
                    found: 2,
                    required: 3
                },
                CitationWarning::LowSimilarity {
                    document_id: "2002".to_string(),
                    similarity_score: response.passages[1].similarity_score,
                },
                CitationWarning::OutdatedSource {
                    document_id: "2002".to_string(),
                    publication_year: 1998,
                    age_years: this_year - 1998,
                },
            ]
        );

        let quiet = MedicalRetrieval::builder()
            .with_config(RetrievalConfig::default().with_quality(QualityConfig {
                enabled: false,
                ..QualityConfig::default()
            }))
            .build()
            .unwrap();
        quiet.rebuild(records()).unwrap();
        let response = quiet.query(&QueryRequest::new(vec![0.0, 1.0], 2)).unwrap();
        assert!(response.warnings.is_empty());
    }

    #[test]
    fn test_synthesis_input_carries_context() {
        let service = MedicalRetrieval::builder().build().unwrap();
        service.rebuild(records()).unwrap();
        let response = service.query(&QueryRequest::new(vec![1.0, 0.0], 2)).unwrap();

        let input = service.synthesis_input("post-MI therapy", &response);
        assert_eq!(input.query, "post-MI therapy");
        assert!(input.context().starts_with("[Document 1]\nPMID: 1001\n"));
    }
}
