//! Error types for the retrieval engine.

use thiserror::Error;

/// Result type alias for retrieval operations.
pub type Result<T> = std::result::Result<T, RetrievalError>;

/// Errors that abort a single retrieval request.
///
/// Empty results and stale citations are not errors: they are reported
/// through `RetrievalStatus` and `CitationWarning` instead.
#[derive(Error, Debug)]
pub enum RetrievalError {
    /// Vector store error (dimension mismatch, empty corpus, invalid k, ...).
    #[error("vector store error: {0}")]
    Store(#[from] medrag_vector_store::VectorStoreError),

    /// Malformed query request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Query encoder failure.
    #[error("encoder error: {0}")]
    Encoder(String),

    /// TOML parse error.
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
