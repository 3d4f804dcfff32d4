//! Fast community detection over an embedding matrix.
//!
//! Every row whose `min_size`-th best match clears the threshold seeds a candidate
//! community made of all rows at or above the threshold relative to that seed. Candidates
//! are then claimed greedily, largest first (equal sizes: lowest seed index first), and
//! an index already claimed by an accepted community is removed from later ones. This
//! makes the final communities pairwise disjoint.

use ndarray::{s, ArrayView2};
use serde::Serialize;

use super::{cos_sim, top_k};

#[derive(Debug, Clone)]
pub struct CommunityParams {
    /// Minimum cosine similarity to the seed for membership.
    pub threshold: f32,
    /// Smallest community kept. Clamped to the item count.
    pub min_size: usize,
    /// Rows scored against the full matrix per step.
    pub batch_size: usize,
}

impl Default for CommunityParams {
    fn default() -> Self {
        Self {
            threshold: 0.99,
            min_size: 2,
            batch_size: 128,
        }
    }
}

/// A set of row indices, ascending, all similar to `seed` above the threshold.
///
/// `seed` is the row the community was grown from. It may be absent from `members`
/// when a larger community claimed it first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Community {
    pub seed: usize,
    pub members: Vec<usize>,
}

impl Community {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommunityDetector {
    params: CommunityParams,
}

impl CommunityDetector {
    pub fn new(params: CommunityParams) -> Self {
        Self { params }
    }

    /// Disjoint communities, largest first.
    pub fn detect(&self, embeddings: ArrayView2<f32>) -> Vec<Community> {
        let n = embeddings.nrows();
        if n == 0 {
            return Vec::new();
        }

        let threshold = self.params.threshold;
        let min_size = self.params.min_size.clamp(1, n);
        let batch_size = self.params.batch_size.max(1);
        // Grows (never shrinks) whenever a window's tail still clears the threshold.
        let mut search_width = (2 * min_size).max(50).min(n);

        let mut candidates: Vec<Community> = Vec::new();

        for start in (0..n).step_by(batch_size) {
            let end = (start + batch_size).min(n);
            let scores = cos_sim(embeddings.slice(s![start..end, ..]), embeddings);

            for (offset, row) in scores.outer_iter().enumerate() {
                let seed = start + offset;

                let qualifies = top_k(row, min_size)
                    .last()
                    .is_some_and(|&(_, score)| score >= threshold);
                if !qualifies {
                    continue;
                }

                let mut window = top_k(row, search_width);
                while search_width < n && window.last().is_some_and(|&(_, score)| score > threshold)
                {
                    search_width = (2 * search_width).min(n);
                    window = top_k(row, search_width);
                }

                let members = window
                    .into_iter()
                    .take_while(|&(_, score)| score >= threshold)
                    .map(|(idx, _)| idx)
                    .collect();
                candidates.push(Community { seed, members });
            }
        }

        candidates.sort_by(|a, b| b.len().cmp(&a.len()).then(a.seed.cmp(&b.seed)));

        let mut claimed = vec![false; n];
        let mut communities = Vec::new();
        for mut candidate in candidates {
            candidate.members.sort_unstable();
            candidate.members.retain(|&idx| !claimed[idx]);
            if candidate.len() >= min_size {
                for &idx in &candidate.members {
                    claimed[idx] = true;
                }
                communities.push(candidate);
            }
        }

        communities.sort_by(|a, b| b.len().cmp(&a.len()).then(a.seed.cmp(&b.seed)));

        tracing::debug!(
            items = n,
            communities = communities.len(),
            search_width,
            "detected communities"
        );
        communities
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn angles(degrees: &[f32]) -> Array2<f32> {
        let mut m = Array2::zeros((degrees.len(), 2));
        for (i, deg) in degrees.iter().enumerate() {
            let rad = deg.to_radians();
            m[[i, 0]] = rad.cos();
            m[[i, 1]] = rad.sin();
        }
        m
    }

    fn detector(threshold: f32) -> CommunityDetector {
        CommunityDetector::new(CommunityParams {
            threshold,
            ..CommunityParams::default()
        })
    }

    #[test]
    fn empty_input_has_no_communities() {
        let m = Array2::<f32>::zeros((0, 4));
        assert!(detector(0.99).detect(m.view()).is_empty());
    }

    #[test]
    fn dissimilar_items_have_no_communities() {
        let m = angles(&[0.0, 90.0, 180.0, 270.0]);
        assert!(detector(0.99).detect(m.view()).is_empty());
    }

    #[test]
    fn identical_items_collapse_into_one_community() {
        let m = angles(&[30.0; 6]);
        let communities = detector(0.99).detect(m.view());
        assert_eq!(communities.len(), 1);
        assert_eq!(communities[0].members, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(communities[0].seed, 0);
    }

    #[test]
    fn duplicate_pair_and_unrelated_item() {
        let m = angles(&[10.0, 10.0, 100.0]);
        let communities = detector(0.99).detect(m.view());
        assert_eq!(communities.len(), 1);
        assert_eq!(communities[0].members, vec![0, 1]);
    }

    #[test]
    fn equal_size_overlap_goes_to_lowest_seed() {
        // neighbours 8 degrees apart: cos(8°) clears 0.98, cos(16°) does not
        let m = angles(&[0.0, 8.0, 16.0, 24.0]);
        let communities = detector(0.98).detect(m.view());
        assert_eq!(communities.len(), 1);
        assert_eq!(communities[0].seed, 1);
        assert_eq!(communities[0].members, vec![0, 1, 2]);
    }

    #[test]
    fn search_window_widens_past_initial_width() {
        // 120 identical rows: the initial window of 50 must double until it covers all.
        let m = angles(&[45.0; 120]);
        let communities = CommunityDetector::new(CommunityParams {
            threshold: 0.99,
            min_size: 2,
            batch_size: 16,
        })
        .detect(m.view());
        assert_eq!(communities.len(), 1);
        assert_eq!(communities[0].len(), 120);
    }

    #[test]
    fn communities_are_sorted_largest_first() {
        let m = angles(&[0.0, 0.0, 90.0, 90.0, 90.0, 200.0]);
        let communities = detector(0.99).detect(m.view());
        assert_eq!(communities.len(), 2);
        assert_eq!(communities[0].members, vec![2, 3, 4]);
        assert_eq!(communities[1].members, vec![0, 1]);
    }
}
