//! # Medical Retrieval
//!
//! Confidence-scored, cached and cited retrieval over the medical-literature
//! vector store:
//!
//! - **Engine**: filtering, calibrated confidence, thresholding and ranking
//! - **Query cache**: fixed-precision keys tagged with the index generation
//! - **Citations**: bibliographic enrichment and PMID verification
//! - **Source quality**: warnings for too few, weak or dated sources
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       MedicalRetrieval                          │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  query ──▶ pin snapshot (generation g)                          │
//! │                 │                                               │
//! │                 ▼                                               │
//! │          ┌──────────────┐  hit @ g                              │
//! │          │  QueryCache  │──────────────┐                        │
//! │          └──────────────┘              │                        │
//! │                 │ miss                 │                        │
//! │                 ▼                      │                        │
//! │          ┌──────────────┐              │                        │
//! │          │  Retrieval   │──put @ g─────┤                        │
//! │          │   Engine     │              │                        │
//! │          └──────────────┘              ▼                        │
//! │                                ┌──────────────┐                 │
//! │                                │  Citation    │──▶ response     │
//! │                                │  Assembler   │                 │
//! │                                └──────────────┘                 │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use medrag_retrieval::{MedicalRetrieval, QueryFilters, QueryRequest, Specialty};
//!
//! let service = MedicalRetrieval::builder()
//!     .with_snapshot_dir("vector_database")
//!     .build()?;
//! service.load_latest()?;
//!
//! let request = QueryRequest::new(embedding, 5)
//!     .with_filters(QueryFilters::default().with_specialty(Specialty::Cardiology))
//!     .with_min_confidence(0.7);
//! let response = service.query(&request)?;
//! ```

pub mod cache;
pub mod citation;
pub mod confidence;
pub mod config;
pub mod engine;
pub mod error;
pub mod provider;
pub mod quality;
pub mod query;
pub mod service;

pub use cache::{CacheStats, QueryCache};
pub use citation::{
    CitationAssembler, CitationCheck, CitationWarning, CitedPassage, Enrichment, render_context,
};
pub use confidence::{Calibration, ConfidenceBand, ConfidenceBands, ConfidenceModel};
pub use config::{CacheConfig, RetrievalConfig, StoreConfig};
pub use engine::{EngineConfig, Retrieval, RetrievalEngine, RetrievalStatus};
pub use error::{Result, RetrievalError};
pub use provider::{AnswerSynthesizer, QueryEncoder, SynthesisInput};
pub use quality::{QualityConfig, SourceQuality};
pub use query::{QueryFilters, QueryRequest, RetrievedPassage, YearRange};
pub use service::{MedicalRetrieval, MedicalRetrievalBuilder, RetrievalResponse, ServiceStats};

// Re-export from dependencies for convenience
pub use medrag_vector_store::{
    DocumentRecord, Embedding, Generation, SnapshotDir, Specialty, VectorIndex, VectorStore,
};
