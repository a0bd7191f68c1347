//! Configuration for the medical retrieval service.

use std::path::{Path, PathBuf};

use medrag_vector_store::{BuildOptions, SearchStrategy};
use serde::{Deserialize, Serialize};

use crate::confidence::Calibration;
use crate::engine::EngineConfig;
use crate::error::{Result, RetrievalError};
use crate::quality::QualityConfig;

/// Top-level configuration, usually read from a TOML file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Vector store configuration.
    pub store: StoreConfig,

    /// Query processing configuration.
    pub engine: EngineConfig,

    /// Query cache configuration.
    pub cache: CacheConfig,

    /// Source-quality check thresholds.
    pub quality: QualityConfig,
}

impl RetrievalConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Set the store configuration.
    pub fn with_store(mut self, store: StoreConfig) -> Self {
        self.store = store;
        self
    }

    /// Set the engine configuration.
    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    /// Set the cache configuration.
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Set the source-quality configuration.
    pub fn with_quality(mut self, quality: QualityConfig) -> Self {
        self.quality = quality;
        self
    }

    /// Reject values the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.store.dimension == Some(0) {
            return Err(config_error("store.dimension must be positive"));
        }
        if let SearchStrategy::Ivf(params) = &self.store.search {
            if params.nlist == 0 || params.nprobe == 0 {
                return Err(config_error("store.search nlist and nprobe must be positive"));
            }
            if !(0.0..=1.0).contains(&params.recall_floor) {
                return Err(config_error("store.search.recall_floor must be within [0, 1]"));
            }
            if self.store.recall_k == 0 {
                return Err(config_error("store.recall_k must be at least 1"));
            }
        }
        if self.engine.candidate_multiplier == 0 {
            return Err(config_error("engine.candidate_multiplier must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.engine.prefilter_ratio) {
            return Err(config_error("engine.prefilter_ratio must be within [0, 1]"));
        }
        if let Calibration::Sigmoid { midpoint, steepness } = self.engine.calibration {
            if !midpoint.is_finite() {
                return Err(config_error("engine.calibration.midpoint must be finite"));
            }
            if !steepness.is_finite() || steepness <= 0.0 {
                return Err(config_error("engine.calibration.steepness must be positive"));
            }
        }
        let bands = &self.engine.bands;
        let unit = 0.0..=1.0;
        if !unit.contains(&bands.low_below) || !unit.contains(&bands.high_at_or_above) {
            return Err(config_error("engine.bands thresholds must be within [0, 1]"));
        }
        if bands.low_below > bands.high_at_or_above {
            return Err(config_error("engine.bands.low_below must not exceed high_at_or_above"));
        }
        if self.cache.enabled && self.cache.max_entries == 0 {
            return Err(config_error("cache.max_entries must be positive"));
        }
        if self.cache.precision > 9 {
            return Err(config_error("cache.precision must be at most 9"));
        }
        if !(-1.0..=1.0).contains(&self.quality.min_similarity) {
            return Err(config_error("quality.min_similarity must be within [-1, 1]"));
        }
        if self.quality.max_age_years < 0 {
            return Err(config_error("quality.max_age_years must not be negative"));
        }
        Ok(())
    }
}

fn config_error(message: &str) -> RetrievalError {
    RetrievalError::Config(message.to_string())
}

/// Configuration for the vector store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Embedding dimension every build, load and query must have.
    pub dimension: Option<usize>,

    /// Directory holding persisted index snapshots.
    pub snapshot_dir: PathBuf,

    /// Search structure.
    pub search: SearchStrategy,

    /// Probe queries used to verify approximate recall.
    pub recall_sample: usize,

    /// Result count the recall check is measured at.
    pub recall_k: usize,

    /// Record pairs sampled for the similarity profile.
    pub profile_pairs: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        let options = BuildOptions::default();
        Self {
            dimension: None,
            snapshot_dir: PathBuf::from("vector_database"),
            search: options.search,
            recall_sample: options.recall_sample,
            recall_k: options.recall_k,
            profile_pairs: options.profile_pairs,
        }
    }
}

impl StoreConfig {
    /// Index build options described by this configuration.
    pub fn build_options(&self) -> BuildOptions {
        BuildOptions {
            search: self.search,
            recall_sample: self.recall_sample,
            recall_k: self.recall_k,
            profile_pairs: self.profile_pairs,
        }
    }
}

/// Configuration for the query cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Whether query results are cached.
    pub enabled: bool,

    /// Maximum number of cached results.
    pub max_entries: usize,

    /// Decimal places each embedding component is rounded to in cache keys.
    pub precision: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 1024,
            precision: 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confidence::ConfidenceBands;
    use medrag_vector_store::IvfParams;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_full_document() {
        let config = RetrievalConfig::from_toml_str(
            r#"
[store]
dimension = 768
snapshot_dir = "/var/lib/medrag"

[store.search]
strategy = "ivf"
nlist = 16
nprobe = 4
recall_floor = 0.9

[engine]
candidate_multiplier = 5
prefilter_ratio = 0.1

[engine.calibration]
kind = "corpus_min_max"

[engine.bands]
low_below = 0.6
high_at_or_above = 0.9

[cache]
enabled = false
max_entries = 64
precision = 3
"#,
        )
        .unwrap();

        assert_eq!(config.store.dimension, Some(768));
        assert_eq!(config.store.snapshot_dir, PathBuf::from("/var/lib/medrag"));
        assert_eq!(
            config.store.search,
            SearchStrategy::Ivf(IvfParams {
                nlist: 16,
                nprobe: 4,
                recall_floor: 0.9,
                ..IvfParams::default()
            })
        );
        assert_eq!(config.engine.candidate_multiplier, 5);
        assert_eq!(config.engine.calibration, Calibration::CorpusMinMax);
        assert_eq!(
            config.engine.bands,
            ConfidenceBands {
                low_below: 0.6,
                high_at_or_above: 0.9
            }
        );
        assert_eq!(
            config.cache,
            CacheConfig {
                enabled: false,
                max_entries: 64,
                precision: 3
            }
        );
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = RetrievalConfig::from_toml_str("").unwrap();
        assert_eq!(config, RetrievalConfig::default());
        assert_eq!(config.store.search, SearchStrategy::Exact);
        assert_eq!(config.store.build_options(), BuildOptions::default());
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        for contents in [
            "[engine]\ncandidate_multiplier = 0",
            "[engine]\nprefilter_ratio = 1.5",
            "[engine.bands]\nlow_below = 0.9\nhigh_at_or_above = 0.5",
            "[cache]\nmax_entries = 0",
            "[store.search]\nstrategy = \"ivf\"\nnprobe = 0",
            "[store]\nrecall_k = 0\n[store.search]\nstrategy = \"ivf\"",
            "[engine.calibration]\nkind = \"sigmoid\"\nmidpoint = nan\nsteepness = 10.0",
            "[engine.calibration]\nkind = \"sigmoid\"\nmidpoint = 0.5\nsteepness = inf",
            "[engine.bands]\nlow_below = nan",
            "[engine.bands]\nlow_below = 0.7\nhigh_at_or_above = 1.5",
            "[quality]\nmin_similarity = 2.0",
            "[quality]\nmax_age_years = -1",
        ] {
            let err = RetrievalConfig::from_toml_str(contents).unwrap_err();
            assert!(matches!(err, RetrievalError::Config(_)), "{contents}: {err}");
        }

        assert!(matches!(
            RetrievalConfig::from_toml_str("[store]\ndimension = \"many\""),
            Err(RetrievalError::Toml(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("medrag.toml");
        std::fs::write(&path, "[cache]\nprecision = 6\n").unwrap();

        let config = RetrievalConfig::load(&path).unwrap();
        assert_eq!(config.cache.precision, 6);
    }
}
