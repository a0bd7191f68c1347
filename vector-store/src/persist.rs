//! Durable snapshots of a vector index.
//!
//! A snapshot is a single JSON document holding the embedding matrix, the
//! parallel metadata records, the generation and the build timestamp, so a
//! process can restart without re-embedding the corpus.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::Embedding;
use crate::error::{Result, VectorStoreError};
use crate::index::{BuildOptions, Generation, VectorIndex};
use crate::record::{DocumentRecord, RecordMetadata};

/// Current on-disk format version.
pub const FORMAT_VERSION: u32 = 1;

const SNAPSHOT_PREFIX: &str = "index-";
const SNAPSHOT_EXTENSION: &str = "json";

#[derive(Debug, Serialize, Deserialize)]
struct PersistedIndex {
    format_version: u32,
    generation: Generation,
    built_at: DateTime<Utc>,
    dimension: usize,
    embeddings: Vec<Embedding>,
    records: Vec<RecordMetadata>,
}

/// Write `index` to `path` atomically (temp file, then rename).
pub fn save(index: &VectorIndex, path: &Path) -> Result<()> {
    let (embeddings, records): (Vec<Embedding>, Vec<RecordMetadata>) = index
        .records()
        .iter()
        .map(|record| (record.embedding().to_vec(), record.metadata().clone()))
        .unzip();

    let persisted = PersistedIndex {
        format_version: FORMAT_VERSION,
        generation: index.generation(),
        built_at: index.built_at(),
        dimension: index.dimension(),
        embeddings,
        records,
    };
    let content = serde_json::to_string(&persisted)?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let temp_path = path.with_extension("json.tmp");
    fs::write(&temp_path, content)?;
    fs::rename(&temp_path, path)?;

    info!(
        "Saved index generation {} ({} documents) to {}",
        index.generation(),
        index.len(),
        path.display()
    );
    Ok(())
}

/// Load an index snapshot from `path`.
///
/// When `expected_dimension` is set, a snapshot of any other dimension fails
/// with `DimensionMismatch`; so does any row whose length disagrees with the
/// snapshot header. Vectors are never truncated or padded.
pub fn load(
    path: &Path,
    expected_dimension: Option<usize>,
    options: &BuildOptions,
) -> Result<VectorIndex> {
    let content = fs::read_to_string(path)?;
    let persisted: PersistedIndex = serde_json::from_str(&content)?;

    if persisted.format_version != FORMAT_VERSION {
        return Err(VectorStoreError::UnsupportedFormat {
            expected: FORMAT_VERSION,
            found: persisted.format_version,
        });
    }
    if let Some(expected) = expected_dimension {
        if persisted.dimension != expected {
            return Err(VectorStoreError::DimensionMismatch {
                expected,
                actual: persisted.dimension,
            });
        }
    }
    if persisted.embeddings.len() != persisted.records.len() {
        return Err(VectorStoreError::InvalidRecord(format!(
            "snapshot has {} embeddings for {} records",
            persisted.embeddings.len(),
            persisted.records.len()
        )));
    }

    let dimension = persisted.dimension;
    let records = persisted
        .records
        .into_iter()
        .zip(persisted.embeddings)
        .map(|(metadata, embedding)| {
            if embedding.len() != dimension {
                return Err(VectorStoreError::DimensionMismatch {
                    expected: dimension,
                    actual: embedding.len(),
                });
            }
            DocumentRecord::from_parts(metadata, embedding)
        })
        .collect::<Result<Vec<_>>>()?;

    let index = VectorIndex::build(records, options)?
        .with_generation(persisted.generation)
        .with_built_at(persisted.built_at);

    debug!(
        "Loaded index generation {} from {}",
        index.generation(),
        path.display()
    );
    Ok(index)
}

/// A directory of generation-numbered snapshots.
#[derive(Debug, Clone)]
pub struct SnapshotDir {
    root: PathBuf,
}

impl SnapshotDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path a snapshot of `generation` is saved under.
    pub fn path_for(&self, generation: Generation) -> PathBuf {
        self.root.join(format!(
            "{SNAPSHOT_PREFIX}{:010}.{SNAPSHOT_EXTENSION}",
            generation.value()
        ))
    }

    /// Save `index` under its generation number.
    pub fn save(&self, index: &VectorIndex) -> Result<PathBuf> {
        let path = self.path_for(index.generation());
        save(index, &path)?;
        Ok(path)
    }

    /// Snapshots in the directory, oldest generation first.
    pub fn list(&self) -> Result<Vec<(Generation, PathBuf)>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut snapshots = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if let Some(generation) = parse_generation(&path) {
                snapshots.push((generation, path));
            }
        }
        snapshots.sort_by_key(|(generation, _)| *generation);
        Ok(snapshots)
    }

    /// Path of the snapshot with the highest generation.
    pub fn latest(&self) -> Result<PathBuf> {
        self.list()?
            .pop()
            .map(|(_, path)| path)
            .ok_or_else(|| VectorStoreError::SnapshotNotFound(self.root.clone()))
    }
}

fn parse_generation(path: &Path) -> Option<Generation> {
    if path.extension()? != SNAPSHOT_EXTENSION {
        return None;
    }
    path.file_stem()?
        .to_str()?
        .strip_prefix(SNAPSHOT_PREFIX)?
        .parse::<u64>()
        .ok()
        .map(Generation::new)
}
