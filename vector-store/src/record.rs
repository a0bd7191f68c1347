//! Document records stored in the vector index.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Embedding;
use crate::error::{Result, VectorStoreError};

/// Medical specialty of an abstract. The corpus covers a closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Specialty {
    Diabetes,
    Cardiology,
    InfectiousDiseases,
    Neurology,
    Pulmonology,
    Oncology,
    Nephrology,
    Gastroenterology,
}

impl Specialty {
    /// Every specialty, in declaration order.
    pub const ALL: [Specialty; 8] = [
        Specialty::Diabetes,
        Specialty::Cardiology,
        Specialty::InfectiousDiseases,
        Specialty::Neurology,
        Specialty::Pulmonology,
        Specialty::Oncology,
        Specialty::Nephrology,
        Specialty::Gastroenterology,
    ];

    /// Stable machine name, as used in serialized records.
    pub fn as_str(self) -> &'static str {
        match self {
            Specialty::Diabetes => "diabetes",
            Specialty::Cardiology => "cardiology",
            Specialty::InfectiousDiseases => "infectious_diseases",
            Specialty::Neurology => "neurology",
            Specialty::Pulmonology => "pulmonology",
            Specialty::Oncology => "oncology",
            Specialty::Nephrology => "nephrology",
            Specialty::Gastroenterology => "gastroenterology",
        }
    }

    /// Human readable name.
    pub fn label(self) -> &'static str {
        match self {
            Specialty::Diabetes => "Diabetes",
            Specialty::Cardiology => "Cardiology",
            Specialty::InfectiousDiseases => "Infectious Diseases",
            Specialty::Neurology => "Neurology",
            Specialty::Pulmonology => "Pulmonology",
            Specialty::Oncology => "Oncology",
            Specialty::Nephrology => "Nephrology",
            Specialty::Gastroenterology => "Gastroenterology",
        }
    }
}

impl fmt::Display for Specialty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Specialty {
    type Err = VectorStoreError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        Specialty::ALL
            .into_iter()
            .find(|specialty| specialty.as_str() == normalized)
            .ok_or_else(|| VectorStoreError::InvalidRecord(format!("unknown specialty: {s}")))
    }
}

/// Bibliographic and classification fields of a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMetadata {
    /// Stable external identifier (PMID).
    pub id: String,

    /// Specialty the abstract was collected under.
    pub specialty: Specialty,

    /// Year of publication.
    pub publication_year: i32,

    /// Article title.
    #[serde(default)]
    pub title: String,

    /// Journal name.
    #[serde(default)]
    pub journal: String,

    /// Abstract body.
    #[serde(default, alias = "abstract")]
    pub abstract_text: String,
}

/// An immutable corpus entry: metadata plus its precomputed embedding.
///
/// Records are validated when constructed or deserialized, so every record
/// reaching an index has a non-empty id and a non-empty, finite embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawRecord", into = "RawRecord")]
pub struct DocumentRecord {
    metadata: RecordMetadata,
    embedding: Embedding,
}

#[derive(Serialize, Deserialize)]
struct RawRecord {
    #[serde(flatten)]
    metadata: RecordMetadata,
    embedding: Embedding,
}

impl DocumentRecord {
    /// Create a record with empty bibliographic text fields.
    pub fn new(
        id: impl Into<String>,
        embedding: Embedding,
        specialty: Specialty,
        publication_year: i32,
    ) -> Result<Self> {
        let metadata = RecordMetadata {
            id: id.into(),
            specialty,
            publication_year,
            title: String::new(),
            journal: String::new(),
            abstract_text: String::new(),
        };
        Self::from_parts(metadata, embedding)
    }

    /// Create a record from metadata and an embedding, validating both.
    pub fn from_parts(metadata: RecordMetadata, embedding: Embedding) -> Result<Self> {
        if metadata.id.trim().is_empty() {
            return Err(VectorStoreError::InvalidRecord(
                "document id must not be empty".to_string(),
            ));
        }
        if embedding.is_empty() {
            return Err(VectorStoreError::InvalidRecord(format!(
                "document {} has an empty embedding",
                metadata.id
            )));
        }
        if let Some(position) = embedding.iter().position(|x| !x.is_finite()) {
            return Err(VectorStoreError::InvalidRecord(format!(
                "document {} has a non-finite embedding component at {position}",
                metadata.id
            )));
        }
        Ok(Self {
            metadata,
            embedding,
        })
    }

    /// Set the article title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.metadata.title = title.into();
        self
    }

    /// Set the journal name.
    pub fn with_journal(mut self, journal: impl Into<String>) -> Self {
        self.metadata.journal = journal.into();
        self
    }

    /// Set the abstract body.
    pub fn with_abstract(mut self, abstract_text: impl Into<String>) -> Self {
        self.metadata.abstract_text = abstract_text.into();
        self
    }

    pub fn id(&self) -> &str {
        &self.metadata.id
    }

    /// The embedding as supplied at ingestion (not normalized).
    pub fn embedding(&self) -> &[f32] {
        &self.embedding
    }

    pub fn dimension(&self) -> usize {
        self.embedding.len()
    }

    pub fn specialty(&self) -> Specialty {
        self.metadata.specialty
    }

    pub fn publication_year(&self) -> i32 {
        self.metadata.publication_year
    }

    pub fn title(&self) -> &str {
        &self.metadata.title
    }

    pub fn journal(&self) -> &str {
        &self.metadata.journal
    }

    pub fn abstract_text(&self) -> &str {
        &self.metadata.abstract_text
    }

    pub fn metadata(&self) -> &RecordMetadata {
        &self.metadata
    }

    /// Split the record back into metadata and embedding.
    pub fn into_parts(self) -> (RecordMetadata, Embedding) {
        (self.metadata, self.embedding)
    }
}

impl TryFrom<RawRecord> for DocumentRecord {
    type Error = VectorStoreError;

    fn try_from(raw: RawRecord) -> Result<Self> {
        Self::from_parts(raw.metadata, raw.embedding)
    }
}

impl From<DocumentRecord> for RawRecord {
    fn from(record: DocumentRecord) -> Self {
        let (metadata, embedding) = record.into_parts();
        Self {
            metadata,
            embedding,
        }
    }
}
