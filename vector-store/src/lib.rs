//! # Vector Store
//!
//! This crate owns the document embeddings of the medical-literature corpus
//! and answers nearest-neighbour queries over them.
//!
//! ## Features
//!
//! - **Immutable snapshots**: a built [`VectorIndex`] never changes
//! - **Atomic rebuilds**: [`VectorStore`] swaps whole indices under a lock
//! - **Exact and approximate search**: brute force or IVF with a recall floor
//! - **Persistence**: JSON snapshots carrying generation and build time
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Vector Store                             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  DocumentRecord ──► VectorIndex ──► VectorStore                 │
//! │                        │    │            │                      │
//! │                        ▼    ▼            ▼                      │
//! │                 exact scan  IvfIndex   SnapshotDir              │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod index;
mod ivf;
pub mod persist;
pub mod record;
pub mod similarity;
pub mod store;

pub use error::{Result, VectorStoreError};
pub use index::{
    BuildOptions, Generation, IndexStats, SearchStrategy, SimilarityProfile, VectorIndex,
};
pub use ivf::IvfParams;
pub use persist::SnapshotDir;
pub use record::{DocumentRecord, RecordMetadata, Specialty};
pub use similarity::{SearchHit, cosine_similarity};
pub use store::VectorStore;

/// A dense vector embedding.
pub type Embedding = Vec<f32>;
