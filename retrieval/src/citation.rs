//! Mapping retrieved passages back to their bibliographic records.

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::sync::LazyLock;

use medrag_vector_store::{Specialty, VectorIndex};
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::confidence::{ConfidenceBand, ConfidenceBands};
use crate::query::RetrievedPassage;

const PUBMED_URL: &str = "https://pubmed.ncbi.nlm.nih.gov";

static PMID_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"PMID:\s*(\d+)").ok());

/// A retrieved passage with the bibliographic fields of its document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CitedPassage {
    pub document_id: String,
    pub rank: usize,
    pub similarity_score: f32,
    pub confidence: f32,
    pub band: ConfidenceBand,
    pub title: String,
    pub journal: String,
    pub publication_year: i32,
    pub specialty: Specialty,
    pub abstract_text: String,
    pub url: String,
}

/// A non-fatal problem with the passages behind a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CitationWarning {
    /// The passage names a document absent from the index it was checked
    /// against. The passage was dropped.
    UnknownDocumentId { document_id: String, rank: usize },

    /// Fewer passages than the configured minimum.
    InsufficientSources { found: usize, required: usize },

    /// Raw similarity below the configured floor.
    LowSimilarity {
        document_id: String,
        similarity_score: f32,
    },

    /// Published longer ago than the configured maximum age.
    OutdatedSource {
        document_id: String,
        publication_year: i32,
        age_years: i32,
    },
}

/// Enriched passages plus anything dropped along the way.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Enrichment {
    pub passages: Vec<CitedPassage>,
    pub warnings: Vec<CitationWarning>,
}

/// Outcome of checking the `PMID: nnn` references in a synthesized answer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CitationCheck {
    /// Every PMID the answer cites.
    pub cited: BTreeSet<String>,
    /// Cited PMIDs that are among the sources.
    pub valid: BTreeSet<String>,
    /// Cited PMIDs that are not among the sources.
    pub invalid: BTreeSet<String>,
    /// Sources the answer never cites.
    pub uncited: BTreeSet<String>,
    /// Percentage of citations that are valid; 0 when nothing is cited.
    pub accuracy: f32,
}

impl CitationCheck {
    pub fn is_valid(&self) -> bool {
        self.invalid.is_empty()
    }
}

/// Attaches bibliographic metadata to retrieved passages.
#[derive(Debug, Clone, Default)]
pub struct CitationAssembler {
    bands: ConfidenceBands,
}

impl CitationAssembler {
    pub fn new(bands: ConfidenceBands) -> Self {
        Self { bands }
    }

    /// Enrich `passages` from `index`.
    ///
    /// A passage whose document is missing from `index` is dropped with a
    /// warning instead of failing the request; the survivors are re-ranked
    /// contiguously in their original order.
    pub fn enrich(&self, index: &VectorIndex, passages: &[RetrievedPassage]) -> Enrichment {
        let mut enrichment = Enrichment::default();

        for passage in passages {
            let Some(record) = index.get(&passage.document_id) else {
                warn!(
                    "Dropping passage for unknown document {} (index generation {})",
                    passage.document_id,
                    index.generation()
                );
                enrichment.warnings.push(CitationWarning::UnknownDocumentId {
                    document_id: passage.document_id.clone(),
                    rank: passage.rank,
                });
                continue;
            };

            enrichment.passages.push(CitedPassage {
                document_id: passage.document_id.clone(),
                rank: enrichment.passages.len() + 1,
                similarity_score: passage.similarity_score,
                confidence: passage.confidence,
                band: self.bands.classify(passage.confidence),
                title: record.title().to_string(),
                journal: record.journal().to_string(),
                publication_year: record.publication_year(),
                specialty: record.specialty(),
                abstract_text: record.abstract_text().to_string(),
                url: pubmed_url(&passage.document_id),
            });
        }

        enrichment
    }

    /// Check the PMID citations of a synthesized `answer` against `sources`.
    pub fn verify_citations(&self, answer: &str, sources: &[CitedPassage]) -> CitationCheck {
        let cited: BTreeSet<String> = PMID_PATTERN
            .as_ref()
            .map(|re| {
                re.captures_iter(answer)
                    .filter_map(|caps| caps.get(1))
                    .map(|m| m.as_str().to_string())
                    .collect()
            })
            .unwrap_or_default();
        let source_ids: BTreeSet<String> = sources.iter().map(|s| s.document_id.clone()).collect();

        let valid: BTreeSet<String> = cited.intersection(&source_ids).cloned().collect();
        let invalid: BTreeSet<String> = cited.difference(&source_ids).cloned().collect();
        let uncited: BTreeSet<String> = source_ids.difference(&cited).cloned().collect();
        let accuracy = if cited.is_empty() {
            0.0
        } else {
            valid.len() as f32 / cited.len() as f32 * 100.0
        };

        CitationCheck {
            cited,
            valid,
            invalid,
            uncited,
            accuracy,
        }
    }
}

/// Public PubMed page of a PMID.
pub fn pubmed_url(pmid: &str) -> String {
    format!("{PUBMED_URL}/{pmid}/")
}

/// Numbered plain-text context block handed to the answer synthesizer.
pub fn render_context(passages: &[CitedPassage]) -> String {
    if passages.is_empty() {
        return "No relevant medical literature found.".to_string();
    }

    let mut context = String::new();
    for passage in passages {
        let _ = write!(
            context,
            "[Document {rank}]\nPMID: {id}\nTitle: {title}\nJournal: {journal}\nSpecialty: {specialty}\n\nAbstract:\n{text}\n\n---\n",
            rank = passage.rank,
            id = passage.document_id,
            title = passage.title,
            journal = passage.journal,
            specialty = passage.specialty,
            text = passage.abstract_text,
        );
    }
    context
}
