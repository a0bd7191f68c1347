//! Query requests and retrieved passages.

use std::collections::BTreeSet;

use medrag_vector_store::{DocumentRecord, Embedding, Specialty};
use serde::{Deserialize, Serialize};

use crate::error::{Result, RetrievalError};

/// Inclusive range of publication years.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct YearRange {
    pub from: i32,
    pub to: i32,
}

impl YearRange {
    pub fn new(from: i32, to: i32) -> Self {
        Self { from, to }
    }

    pub fn contains(&self, year: i32) -> bool {
        (self.from..=self.to).contains(&year)
    }
}

/// Metadata restrictions applied to candidate documents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryFilters {
    /// Accept only these specialties. An empty set accepts nothing.
    #[serde(default)]
    pub specialties: Option<BTreeSet<Specialty>>,

    /// Accept only documents published within this range.
    #[serde(default)]
    pub years: Option<YearRange>,
}

impl QueryFilters {
    /// Restrict to a single specialty (adds to any existing set).
    pub fn with_specialty(mut self, specialty: Specialty) -> Self {
        self.specialties
            .get_or_insert_with(BTreeSet::new)
            .insert(specialty);
        self
    }

    /// Restrict to the given specialties, replacing any existing set.
    pub fn with_specialties(mut self, specialties: impl IntoIterator<Item = Specialty>) -> Self {
        self.specialties = Some(specialties.into_iter().collect());
        self
    }

    /// Restrict to an inclusive publication-year range.
    pub fn with_years(mut self, from: i32, to: i32) -> Self {
        self.years = Some(YearRange::new(from, to));
        self
    }

    /// True when no restriction is set.
    pub fn is_unrestricted(&self) -> bool {
        self.specialties.is_none() && self.years.is_none()
    }

    pub fn matches(&self, record: &DocumentRecord) -> bool {
        let specialty_ok = self
            .specialties
            .as_ref()
            .is_none_or(|set| set.contains(&record.specialty()));
        let year_ok = self
            .years
            .is_none_or(|range| range.contains(record.publication_year()));
        specialty_ok && year_ok
    }
}

/// A retrieval request for one query embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    /// Query embedding produced by the external encoder.
    pub embedding: Embedding,

    /// Metadata filters.
    #[serde(default)]
    pub filters: QueryFilters,

    /// Maximum number of passages to return.
    pub top_k: usize,

    /// Passages below this confidence are dropped.
    #[serde(default)]
    pub min_confidence: f32,
}

impl QueryRequest {
    /// Create an unfiltered request with no confidence threshold.
    pub fn new(embedding: Embedding, top_k: usize) -> Self {
        Self {
            embedding,
            filters: QueryFilters::default(),
            top_k,
            min_confidence: 0.0,
        }
    }

    pub fn with_filters(mut self, filters: QueryFilters) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_min_confidence(mut self, min_confidence: f32) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    /// Check the request independently of any index.
    pub fn validate(&self) -> Result<()> {
        if self.top_k == 0 {
            return Err(RetrievalError::InvalidRequest(
                "top_k must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(RetrievalError::InvalidRequest(format!(
                "min_confidence must be within [0, 1], got {}",
                self.min_confidence
            )));
        }
        if self.embedding.is_empty() || self.embedding.iter().any(|x| !x.is_finite()) {
            return Err(RetrievalError::InvalidRequest(
                "query embedding must be non-empty and finite".to_string(),
            ));
        }
        if let Some(range) = self.filters.years {
            if range.from > range.to {
                return Err(RetrievalError::InvalidRequest(format!(
                    "year range {}..={} is inverted",
                    range.from, range.to
                )));
            }
        }
        Ok(())
    }
}

/// A passage selected for a query, before bibliographic enrichment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedPassage {
    /// Id of the source document (PMID).
    pub document_id: String,

    /// Raw cosine similarity in [-1, 1].
    pub similarity_score: f32,

    /// Calibrated confidence in [0, 1].
    pub confidence: f32,

    /// 1-based position in the result list.
    pub rank: usize,
}
