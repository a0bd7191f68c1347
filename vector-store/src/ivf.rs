//! Inverted-file (IVF-Flat) approximate search structure.
//!
//! Normalized corpus vectors are partitioned into `nlist` cells by spherical
//! k-means. A query scores every centroid, probes the `nprobe` closest cells
//! and exact-scores only the vectors stored in them. Training is fully
//! deterministic: centroids are seeded from evenly strided corpus rows.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::similarity::{dot_unchecked, mean, normalize, rank_order};

/// Tuning parameters for the IVF structure.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IvfParams {
    /// Number of cells (k-means clusters).
    pub nlist: usize,

    /// Number of cells probed per query.
    pub nprobe: usize,

    /// Maximum k-means refinement rounds.
    pub iterations: usize,

    /// Minimum recall@k against exact search required to serve IVF results.
    pub recall_floor: f32,
}

impl Default for IvfParams {
    fn default() -> Self {
        Self {
            nlist: 32,
            nprobe: 8,
            iterations: 10,
            recall_floor: 0.95,
        }
    }
}

pub(crate) struct IvfIndex {
    centroids: Vec<Vec<f32>>,
    lists: Vec<Vec<usize>>,
    nprobe: usize,
}

impl IvfIndex {
    /// Train over a row-major matrix of `rows` normalized vectors.
    pub(crate) fn train(
        matrix: &[f32],
        dimension: usize,
        rows: usize,
        params: &IvfParams,
    ) -> Self {
        let nlist = params.nlist.clamp(1, rows.max(1));
        let row = |i: usize| row_of(matrix, dimension, i);

        let mut centroids: Vec<Vec<f32>> = (0..nlist)
            .map(|c| row(c * rows / nlist).to_vec())
            .collect();
        let mut assignment = vec![usize::MAX; rows];

        for round in 0..params.iterations.max(1) {
            let mut changed = 0usize;
            for (i, slot) in assignment.iter_mut().enumerate() {
                let nearest = nearest_centroid(&centroids, row(i));
                if *slot != nearest {
                    *slot = nearest;
                    changed += 1;
                }
            }
            if changed == 0 {
                debug!("IVF training converged after {round} rounds");
                break;
            }
            for (c, centroid) in centroids.iter_mut().enumerate() {
                let members = (0..rows).filter(|&i| assignment[i] == c).map(row);
                let mut updated = mean(members, dimension);
                normalize(&mut updated);
                // An empty cell keeps its previous centroid.
                if updated.iter().any(|x| *x != 0.0) {
                    *centroid = updated;
                }
            }
        }

        let mut lists = vec![Vec::new(); nlist];
        for (i, &c) in assignment.iter().enumerate() {
            lists[c].push(i);
        }

        Self {
            centroids,
            lists,
            nprobe: params.nprobe.clamp(1, nlist),
        }
    }

    /// Row positions stored in the cells closest to `query`.
    ///
    /// Probes `nprobe` cells, then keeps probing the next closest cells until
    /// the pool holds at least `min_pool` rows or every cell is used.
    pub(crate) fn candidates(&self, query: &[f32], min_pool: usize) -> Vec<usize> {
        let mut cells: Vec<(usize, f32)> = self
            .centroids
            .iter()
            .enumerate()
            .map(|(c, centroid)| (c, dot_unchecked(centroid, query)))
            .collect();
        cells.sort_unstable_by(|a, b| rank_order(a.1, "", b.1, "").then(a.0.cmp(&b.0)));

        let mut pool = Vec::new();
        for (probed, (c, _)) in cells.iter().enumerate() {
            if probed >= self.nprobe && pool.len() >= min_pool {
                break;
            }
            pool.extend_from_slice(&self.lists[*c]);
        }
        pool
    }

    pub(crate) fn nlist(&self) -> usize {
        self.lists.len()
    }

    pub(crate) fn nprobe(&self) -> usize {
        self.nprobe
    }
}

fn row_of(matrix: &[f32], dimension: usize, i: usize) -> &[f32] {
    &matrix[i * dimension..(i + 1) * dimension]
}

fn nearest_centroid(centroids: &[Vec<f32>], vector: &[f32]) -> usize {
    let mut best = 0;
    let mut best_score = f32::NEG_INFINITY;
    for (c, centroid) in centroids.iter().enumerate() {
        let score = dot_unchecked(centroid, vector);
        if score > best_score {
            best = c;
            best_score = score;
        }
    }
    best
}
