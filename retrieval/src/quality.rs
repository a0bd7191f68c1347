//! Source-quality checks on the passages handed to the synthesizer.
//!
//! None of these checks drop passages. They attach warnings so callers can
//! flag weak or dated evidence next to the answer.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::citation::{CitationWarning, CitedPassage};

/// Thresholds for the source-quality checks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Whether the checks run at all.
    pub enabled: bool,

    /// Fewer cited passages than this raises `InsufficientSources`.
    pub min_sources: usize,

    /// Passages with raw similarity below this raise `LowSimilarity`.
    pub min_similarity: f32,

    /// Passages published more than this many years ago raise
    /// `OutdatedSource`.
    pub max_age_years: i32,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_sources: 1,
            min_similarity: 0.5,
            max_age_years: 5,
        }
    }
}

/// Applies [`QualityConfig`] to enriched passages.
#[derive(Debug, Clone, Default)]
pub struct SourceQuality {
    config: QualityConfig,
}

impl SourceQuality {
    pub fn new(config: QualityConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &QualityConfig {
        &self.config
    }

    /// Warnings for `passages`, judged as of `current_year`.
    pub fn assess(&self, passages: &[CitedPassage], current_year: i32) -> Vec<CitationWarning> {
        if !self.config.enabled {
            return Vec::new();
        }

        let mut warnings = Vec::new();
        if passages.len() < self.config.min_sources {
            warnings.push(CitationWarning::InsufficientSources {
                found: passages.len(),
                required: self.config.min_sources,
            });
        }

        for passage in passages {
            if passage.similarity_score < self.config.min_similarity {
                warnings.push(CitationWarning::LowSimilarity {
                    document_id: passage.document_id.clone(),
                    similarity_score: passage.similarity_score,
                });
            }
        }

        for passage in passages {
            let age_years = current_year - passage.publication_year;
            if age_years > self.config.max_age_years {
                warnings.push(CitationWarning::OutdatedSource {
                    document_id: passage.document_id.clone(),
                    publication_year: passage.publication_year,
                    age_years,
                });
            }
        }

        if !warnings.is_empty() {
            debug!("Source-quality checks raised {} warnings", warnings.len());
        }
        warnings
    }
}
