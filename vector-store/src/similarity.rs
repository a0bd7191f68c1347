//! Similarity computation and ranking of search hits.

use std::cmp::Ordering;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::error::{Result, VectorStoreError};

/// Compute the cosine similarity between two vectors.
///
/// Returns a value between -1.0 and 1.0, where:
/// - 1.0 means identical direction
/// - 0.0 means orthogonal vectors
/// - -1.0 means opposite vectors
///
/// A zero vector has similarity 0.0 with everything.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    let dot = dot_product(a, b)?;
    let magnitude_a = magnitude(a);
    let magnitude_b = magnitude(b);

    if magnitude_a == 0.0 || magnitude_b == 0.0 {
        return Ok(0.0);
    }

    Ok(dot / (magnitude_a * magnitude_b))
}

/// Compute the dot product between two vectors.
pub fn dot_product(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(VectorStoreError::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }

    Ok(dot_unchecked(a, b))
}

/// Dot product of two slices already known to have equal length.
pub(crate) fn dot_unchecked(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn magnitude(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Normalize a vector to unit length in place. Zero vectors are left as is.
pub fn normalize(vector: &mut [f32]) {
    let magnitude = magnitude(vector);
    if magnitude > 0.0 {
        for x in vector.iter_mut() {
            *x /= magnitude;
        }
    }
}

/// Return a unit-length copy of `vector`.
pub fn normalized(vector: &[f32]) -> Vec<f32> {
    let mut copy = vector.to_vec();
    normalize(&mut copy);
    copy
}

/// A single nearest-neighbour hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    /// Id of the matched document.
    pub document_id: String,

    /// Cosine similarity between the query and the document.
    pub similarity: f32,
}

impl SearchHit {
    pub fn new(document_id: impl Into<String>, similarity: f32) -> Self {
        Self {
            document_id: document_id.into(),
            similarity,
        }
    }
}

/// Result ordering: descending similarity, then ascending document id.
pub fn rank_order(a_score: f32, a_id: &str, b_score: f32, b_id: &str) -> Ordering {
    OrderedFloat(b_score)
        .cmp(&OrderedFloat(a_score))
        .then_with(|| a_id.cmp(b_id))
}

/// Keep the best `k` of `scored` positions under [`rank_order`].
///
/// `id_of` resolves a position to its document id for tie-breaking.
pub(crate) fn select_top_k<'a>(
    mut scored: Vec<(usize, f32)>,
    k: usize,
    id_of: impl Fn(usize) -> &'a str,
) -> Vec<(usize, f32)> {
    if k == 0 {
        return Vec::new();
    }
    let cmp = |a: &(usize, f32), b: &(usize, f32)| rank_order(a.1, id_of(a.0), b.1, id_of(b.0));
    if scored.len() > k {
        scored.select_nth_unstable_by(k - 1, cmp);
        scored.truncate(k);
    }
    scored.sort_unstable_by(cmp);
    scored
}

/// Component-wise mean of a set of equal-length vectors.
pub(crate) fn mean<'a>(vectors: impl Iterator<Item = &'a [f32]>, dimension: usize) -> Vec<f32> {
    let mut sum = vec![0.0f32; dimension];
    let mut count = 0usize;
    for vector in vectors {
        for (acc, value) in sum.iter_mut().zip(vector) {
            *acc += value;
        }
        count += 1;
    }
    if count > 0 {
        let n = count as f32;
        for value in &mut sum {
            *value /= n;
        }
    }
    sum
}
