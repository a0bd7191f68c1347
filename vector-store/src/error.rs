//! Error types for the vector store.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for vector store operations.
pub type Result<T> = std::result::Result<T, VectorStoreError>;

/// Errors that can occur while building, searching or persisting an index.
#[derive(Error, Debug)]
pub enum VectorStoreError {
    /// Dimension mismatch.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Build was called with no records.
    #[error("cannot build an index from an empty corpus")]
    EmptyCorpus,

    /// Search was called with a non-positive result count.
    #[error("invalid k: {0}, must be at least 1")]
    InvalidK(usize),

    /// The same document id appeared twice in one build.
    #[error("duplicate document id: {0}")]
    DuplicateDocumentId(String),

    /// A record failed construction-time validation.
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// No index has been built or loaded yet.
    #[error("vector index has not been built")]
    NotBuilt,

    /// No persisted snapshot exists at the given location.
    #[error("no index snapshot found in {0}")]
    SnapshotNotFound(PathBuf),

    /// Persisted snapshot was written by an incompatible format version.
    #[error("unsupported snapshot format version {found}, expected {expected}")]
    UnsupportedFormat { expected: u32, found: u32 },

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
