//! Shared vector store with atomic snapshot publication.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::error::{Result, VectorStoreError};
use crate::index::{BuildOptions, Generation, IndexStats, VectorIndex};
use crate::persist::{self, SnapshotDir};
use crate::record::DocumentRecord;
use crate::similarity::SearchHit;

/// The vector store shared by concurrent request handlers.
///
/// The current index is an immutable [`VectorIndex`] behind an `Arc`. Readers
/// clone the `Arc` and search without holding any lock; a rebuild constructs
/// the replacement off-lock and publishes it with a single pointer swap, so no
/// reader ever observes a partially built index and in-flight reads finish
/// against the snapshot they started with.
pub struct VectorStore {
    current: RwLock<Option<Arc<VectorIndex>>>,
    options: BuildOptions,
    expected_dimension: Option<usize>,
}

impl VectorStore {
    /// Create an empty store. Searches fail with `NotBuilt` until the first
    /// build or load.
    pub fn new(options: BuildOptions) -> Self {
        Self {
            current: RwLock::new(None),
            options,
            expected_dimension: None,
        }
    }

    /// Require every build and load to have this embedding dimension.
    pub fn with_expected_dimension(mut self, dimension: usize) -> Self {
        self.expected_dimension = Some(dimension);
        self
    }

    pub fn options(&self) -> &BuildOptions {
        &self.options
    }

    /// Replace the index with one built from `records`.
    ///
    /// On any error the previously published index stays in service.
    pub fn build(&self, records: Vec<DocumentRecord>) -> Result<Generation> {
        if let (Some(expected), Some(first)) = (self.expected_dimension, records.first()) {
            if first.dimension() != expected {
                return Err(VectorStoreError::DimensionMismatch {
                    expected,
                    actual: first.dimension(),
                });
            }
        }

        let index = VectorIndex::build(records, &self.options)?;
        Ok(self.publish(index, None))
    }

    /// Replace the index with a persisted snapshot.
    pub fn load(&self, path: &Path) -> Result<Generation> {
        let index = persist::load(path, self.expected_dimension, &self.options)?;
        let persisted = index.generation();
        Ok(self.publish(index, Some(persisted)))
    }

    /// Replace the index with the newest snapshot in `dir`.
    pub fn load_latest(&self, dir: &SnapshotDir) -> Result<Generation> {
        let path = dir.latest()?;
        self.load(&path)
    }

    /// Persist the current index to `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        let index = self.snapshot()?;
        persist::save(&index, path)
    }

    /// Persist the current index into a snapshot directory.
    pub fn save_to(&self, dir: &SnapshotDir) -> Result<PathBuf> {
        let index = self.snapshot()?;
        dir.save(&index)
    }

    /// The index valid at the time of the call.
    pub fn snapshot(&self) -> Result<Arc<VectorIndex>> {
        self.current.read().clone().ok_or(VectorStoreError::NotBuilt)
    }

    /// Generation of the published index, if any.
    pub fn generation(&self) -> Option<Generation> {
        self.current.read().as_ref().map(|index| index.generation())
    }

    /// Nearest neighbours of `query` in the current index.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        self.snapshot()?.search(query, k)
    }

    /// Look up a document by id in the current index.
    pub fn get(&self, id: &str) -> Option<DocumentRecord> {
        self.current
            .read()
            .as_ref()
            .and_then(|index| index.get(id).cloned())
    }

    pub fn stats(&self) -> Result<IndexStats> {
        Ok(self.snapshot()?.stats())
    }

    /// Swap in `index`, assigning a generation strictly greater than the
    /// current one. A persisted generation is kept when it already is.
    fn publish(&self, index: VectorIndex, persisted: Option<Generation>) -> Generation {
        let mut current = self.current.write();
        let next = current
            .as_ref()
            .map_or(Generation::FIRST, |published| published.generation().next());
        let generation = persisted.map_or(next, |persisted| persisted.max(next));

        let documents = index.len();
        *current = Some(Arc::new(index.with_generation(generation)));
        drop(current);

        info!("Published vector index generation {generation} ({documents} documents)");
        generation
    }
}
