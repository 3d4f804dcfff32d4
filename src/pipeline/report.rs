//! The externally reported result: duplicate groups and the pairwise similarity map.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::media::types::MediaItem;
use crate::similarity::{Community, SimilarityPair};

/// `id → id → score`, symmetric.
pub type SimilarityMap = BTreeMap<String, BTreeMap<String, f32>>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateReport {
    pub similarity_map: SimilarityMap,
    pub groups: Vec<Group>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: String,
    pub media_item_ids: Vec<String>,
    pub original_media_item_id: String,
}

impl DuplicateReport {
    /// Render communities over `media_items` as groups, largest first.
    ///
    /// Communities with fewer than two members are not duplicates and are skipped.
    pub fn build(
        media_items: &[MediaItem],
        pairs: &[SimilarityPair],
        communities: &[Community],
        threshold: f32,
    ) -> Self {
        let groups = communities
            .iter()
            .filter(|c| c.len() >= 2)
            .enumerate()
            .map(|(index, community)| Group {
                id: index.to_string(),
                media_item_ids: community
                    .members
                    .iter()
                    .map(|&i| media_items[i].id.clone())
                    .collect(),
                original_media_item_id: original_id(media_items, &community.members),
            })
            .collect();

        Self {
            similarity_map: similarity_map(media_items, pairs, threshold),
            groups,
        }
    }
}

/// Index of the group's original: the largest pixel area, ties to the lowest index.
///
/// Items are ordered oldest first, so the tie-break prefers the earliest item.
/// `members` must be non-empty.
pub fn select_original(media_items: &[MediaItem], members: &[usize]) -> usize {
    members
        .iter()
        .copied()
        .max_by(|&a, &b| {
            media_items[a]
                .pixel_area()
                .cmp(&media_items[b].pixel_area())
                .then(b.cmp(&a))
        })
        .unwrap_or_default()
}

fn original_id(media_items: &[MediaItem], members: &[usize]) -> String {
    media_items[select_original(media_items, members)].id.clone()
}

/// Symmetric map of every mined pair scoring at or above `threshold`.
pub fn similarity_map(
    media_items: &[MediaItem],
    pairs: &[SimilarityPair],
    threshold: f32,
) -> SimilarityMap {
    let mut map = SimilarityMap::new();
    for pair in pairs.iter().filter(|p| p.score >= threshold) {
        let a = &media_items[pair.a].id;
        let b = &media_items[pair.b].id;
        map.entry(a.clone()).or_default().insert(b.clone(), pair.score);
        map.entry(b.clone()).or_default().insert(a.clone(), pair.score);
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, w: u32, h: u32) -> MediaItem {
        MediaItem {
            id: id.into(),
            mime_type: "image/jpeg".into(),
            width: Some(w),
            height: Some(h),
            ..Default::default()
        }
    }

    #[test]
    fn original_is_largest_area_with_lowest_index_tiebreak() {
        let items = [item("a", 10, 10), item("b", 20, 20), item("c", 20, 20)];
        assert_eq!(select_original(&items, &[0, 1, 2]), 1);
        assert_eq!(select_original(&items, &[2, 1, 0]), 1);
    }

    #[test]
    fn equal_areas_fall_back_to_first_item() {
        let items = [item("a", 5, 5), item("b", 5, 5), item("c", 5, 5)];
        assert_eq!(select_original(&items, &[1, 2]), 1);
        assert_eq!(select_original(&items, &[0, 1, 2]), 0);
    }

    #[test]
    fn similarity_map_is_symmetric_and_thresholded() {
        let items = [item("a", 1, 1), item("b", 1, 1), item("c", 1, 1)];
        let pairs = [
            SimilarityPair { score: 0.995, a: 0, b: 1 },
            SimilarityPair { score: 0.40, a: 0, b: 2 },
        ];
        let map = similarity_map(&items, &pairs, 0.99);
        assert_eq!(map["a"]["b"], 0.995);
        assert_eq!(map["b"]["a"], 0.995);
        assert!(!map.contains_key("c"));
        assert!(!map["a"].contains_key("c"));
    }

    #[test]
    fn build_renders_groups_in_camel_case() {
        let items = [item("a", 10, 10), item("b", 30, 30), item("c", 1, 1)];
        let communities = [
            Community { seed: 0, members: vec![0, 1] },
            Community { seed: 2, members: vec![2] },
        ];
        let pairs = [SimilarityPair { score: 1.0, a: 0, b: 1 }];
        let report = DuplicateReport::build(&items, &pairs, &communities, 0.99);

        assert_eq!(
            report.groups,
            vec![Group {
                id: "0".into(),
                media_item_ids: vec!["a".into(), "b".into()],
                original_media_item_id: "b".into(),
            }]
        );

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["groups"][0]["originalMediaItemId"], "b");
        assert_eq!(json["groups"][0]["mediaItemIds"][1], "b");
        assert_eq!(json["similarityMap"]["a"]["b"], 1.0);
    }
}
