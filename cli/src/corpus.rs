//! JSON-lines corpus and query-embedding input.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result, bail};
use medrag_vector_store::{DocumentRecord, Embedding};

/// Read one `DocumentRecord` per non-blank line.
pub fn read_records(path: &Path) -> Result<Vec<DocumentRecord>> {
    let file = File::open(path).with_context(|| format!("opening corpus {}", path.display()))?;
    let mut records = Vec::new();

    for (number, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("reading {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let record: DocumentRecord = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: invalid record", path.display(), number + 1))?;
        records.push(record);
    }

    if records.is_empty() {
        bail!("corpus {} contains no records", path.display());
    }
    Ok(records)
}

/// Parse a query embedding given inline as a JSON array or as `@path` to a
/// file holding one.
pub fn read_embedding(arg: &str) -> Result<Embedding> {
    let json = match arg.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("reading query embedding from {path}"))?,
        None => arg.to_string(),
    };
    serde_json::from_str(&json).context("query embedding must be a JSON array of numbers")
}
