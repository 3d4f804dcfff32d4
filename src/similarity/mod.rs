//! Similarity search over dense, L2-normalized embedding matrices.
//!
//! Both consumers take an `ArrayView2<f32>` whose row `i` belongs to media item `i`:
//!
//! - [`SimilarityMiner`]: bounded top-k pair mining for the pairwise similarity report
//! - [`CommunityDetector`]: disjoint clusters of items above a similarity threshold
//!
//! Rows are assumed pre-normalized, so cosine similarity is a plain dot product.

pub mod community;
pub mod mining;

pub use community::{Community, CommunityDetector, CommunityParams};
pub use mining::{MiningParams, SimilarityMiner, SimilarityPair};

use ndarray::{Array2, ArrayView1, ArrayView2};
use std::cmp::Ordering;

/// Full similarity block: `out[i][j] = a[i] · b[j]`.
pub fn cos_sim(a: ArrayView2<f32>, b: ArrayView2<f32>) -> Array2<f32> {
    a.dot(&b.t())
}

/// The `k` largest entries of `row` as `(index, score)`, highest first.
///
/// Equal scores are ordered by lower index first so results are deterministic.
pub fn top_k(row: ArrayView1<f32>, k: usize) -> Vec<(usize, f32)> {
    let k = k.min(row.len());
    if k == 0 {
        return Vec::new();
    }

    let mut scored: Vec<(usize, f32)> = row.iter().copied().enumerate().collect();
    if k < scored.len() {
        scored.select_nth_unstable_by(k - 1, by_score_desc);
        scored.truncate(k);
    }
    scored.sort_by(by_score_desc);
    scored
}

fn by_score_desc(a: &(usize, f32), b: &(usize, f32)) -> Ordering {
    b.1.total_cmp(&a.1).then(a.0.cmp(&b.0))
}
