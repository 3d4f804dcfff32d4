//! Paraphrase-style pair mining.
//!
//! Compares every embedding against every other in memory-bounded chunks and keeps the
//! highest-scoring distinct pairs in a fixed-capacity min-heap. Once the heap is full,
//! each insertion evicts the current minimum and raises the pruning floor, so total
//! memory stays at `max_pairs` regardless of corpus size. The result is an approximate
//! top-k: pairs that lose an eviction race are gone for good.

use ndarray::{s, ArrayView2};
use serde::Serialize;
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet};

use super::{cos_sim, top_k};

#[derive(Debug, Clone)]
pub struct MiningParams {
    /// Neighbours kept per query row, not counting the row itself.
    pub top_k: usize,
    pub query_chunk_size: usize,
    pub corpus_chunk_size: usize,
    /// Capacity of the pair heap.
    pub max_pairs: usize,
}

impl Default for MiningParams {
    fn default() -> Self {
        Self {
            top_k: 10,
            query_chunk_size: 500,
            corpus_chunk_size: 10_000,
            max_pairs: 500_000,
        }
    }
}

/// A scored pair of distinct row indices with `a < b`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SimilarityPair {
    pub score: f32,
    pub a: usize,
    pub b: usize,
}

/// Heap entry. Ordered by score, then indices, so evictions are deterministic.
#[derive(Debug, Clone, Copy)]
struct QueuedPair {
    score: f32,
    i: usize,
    j: usize,
}

impl PartialEq for QueuedPair {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueuedPair {}

impl PartialOrd for QueuedPair {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedPair {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then(self.i.cmp(&other.i))
            .then(self.j.cmp(&other.j))
    }
}

#[derive(Debug, Clone, Default)]
pub struct SimilarityMiner {
    params: MiningParams,
}

impl SimilarityMiner {
    pub fn new(params: MiningParams) -> Self {
        Self { params }
    }

    /// Mine the highest-scoring distinct pairs, sorted by score descending.
    ///
    /// Never returns `(i, i)`, and returns each unordered pair at most once.
    pub fn mine(&self, embeddings: ArrayView2<f32>) -> Vec<SimilarityPair> {
        let n = embeddings.nrows();
        let max_pairs = self.params.max_pairs.max(1);
        let query_chunk = self.params.query_chunk_size.max(1);
        let corpus_chunk = self.params.corpus_chunk_size.max(1);
        // +1 because every row's best match is itself.
        let neighbours = self.params.top_k + 1;

        let mut heap: BinaryHeap<Reverse<QueuedPair>> = BinaryHeap::new();
        let mut min_score = -1.0f32;

        for corpus_start in (0..n).step_by(corpus_chunk) {
            let corpus_end = (corpus_start + corpus_chunk).min(n);
            let corpus = embeddings.slice(s![corpus_start..corpus_end, ..]);
            let k = neighbours.min(corpus_end - corpus_start);

            for query_start in (0..n).step_by(query_chunk) {
                let query_end = (query_start + query_chunk).min(n);
                let query = embeddings.slice(s![query_start..query_end, ..]);
                let scores = cos_sim(query, corpus);

                for (offset, row) in scores.outer_iter().enumerate() {
                    let i = query_start + offset;
                    for (corpus_offset, score) in top_k(row, k) {
                        let j = corpus_start + corpus_offset;
                        if i == j || score <= min_score {
                            continue;
                        }

                        heap.push(Reverse(QueuedPair { score, i, j }));
                        if heap.len() > max_pairs {
                            if let Some(Reverse(evicted)) = heap.pop() {
                                min_score = evicted.score;
                            }
                        }
                    }
                }
            }
        }

        let mut queued: Vec<QueuedPair> = heap.into_iter().map(|Reverse(p)| p).collect();
        queued.sort();

        // A pair may have been queued from both directions; keep one.
        let mut seen = HashSet::with_capacity(queued.len());
        let mut pairs: Vec<SimilarityPair> = queued
            .into_iter()
            .filter_map(|p| {
                let (a, b) = if p.i < p.j { (p.i, p.j) } else { (p.j, p.i) };
                seen.insert((a, b)).then_some(SimilarityPair {
                    score: p.score,
                    a,
                    b,
                })
            })
            .collect();

        pairs.sort_by(|x, y| {
            y.score
                .total_cmp(&x.score)
                .then(x.a.cmp(&y.a))
                .then(x.b.cmp(&y.b))
        });

        tracing::debug!(items = n, pairs = pairs.len(), "mined similarity pairs");
        pairs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};

    fn unit_rows(rows: &[[f32; 3]]) -> Array2<f32> {
        let mut m = Array2::zeros((rows.len(), 3));
        for (i, r) in rows.iter().enumerate() {
            let norm = r.iter().map(|x| x * x).sum::<f32>().sqrt();
            for d in 0..3 {
                m[[i, d]] = r[d] / norm;
            }
        }
        m
    }

    #[test]
    fn empty_matrix_yields_no_pairs() {
        let m = Array2::<f32>::zeros((0, 8));
        assert!(SimilarityMiner::default().mine(m.view()).is_empty());
    }

    #[test]
    fn single_row_yields_no_pairs() {
        let m = array![[1.0f32, 0.0]];
        assert!(SimilarityMiner::default().mine(m.view()).is_empty());
    }

    #[test]
    fn duplicates_score_highest_and_are_reported_once() {
        let m = unit_rows(&[[1.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]]);
        let pairs = SimilarityMiner::default().mine(m.view());

        assert_eq!(pairs.len(), 3);
        assert_eq!((pairs[0].a, pairs[0].b), (0, 1));
        assert!((pairs[0].score - 1.0).abs() < 1e-5);
        for p in &pairs {
            assert!(p.a < p.b);
        }
        for p in pairs.iter().filter(|p| p.a == 2 || p.b == 2) {
            assert!(p.score < 0.5);
        }
    }

    #[test]
    fn top_k_larger_than_corpus_chunk_is_clamped() {
        let m = unit_rows(&[
            [1.0, 0.1, 0.0],
            [1.0, 0.2, 0.0],
            [0.0, 1.0, 0.1],
            [0.0, 1.0, 0.2],
        ]);
        let miner = SimilarityMiner::new(MiningParams {
            top_k: 50,
            query_chunk_size: 1,
            corpus_chunk_size: 2,
            max_pairs: 100,
        });
        let pairs = miner.mine(m.view());
        // every unordered pair is reachable through some corpus chunk
        assert_eq!(pairs.len(), 6);
        for w in pairs.windows(2) {
            assert!(w[0].score >= w[1].score);
        }
    }

    #[test]
    fn heap_capacity_bounds_output_and_keeps_the_best_pair() {
        let m = unit_rows(&[
            [1.0, 0.0, 0.0],
            [0.99, 0.01, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 0.9, 0.4],
            [0.0, 0.0, 1.0],
            [0.5, 0.5, 0.5],
        ]);
        let miner = SimilarityMiner::new(MiningParams {
            top_k: 5,
            max_pairs: 3,
            ..MiningParams::default()
        });
        let pairs = miner.mine(m.view());
        assert!(pairs.len() <= 3);
        assert_eq!((pairs[0].a, pairs[0].b), (0, 1));
    }
}
