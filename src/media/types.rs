//! Media item record shared by the library, the provider client, and the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One photo or video from the user's library, plus the locally cached state for it.
///
/// Within a pipeline run this is a read-only value. Identity is `id`; two items are never
/// considered equal for dedup purposes because their fields match.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaItem {
    pub id: String,
    pub filename: Option<String>,
    pub mime_type: String,
    /// Provider-generated link that eventually expires.
    pub product_url: Option<String>,
    /// Short-lived base URL; size suffixes such as `=w250-h250` are appended to it.
    pub base_url: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub creation_time: Option<DateTime<Utc>>,
    /// The provider reported video metadata for this item.
    pub is_video: bool,
    /// Key of the locally cached image, set once the image store has downloaded it.
    pub storage_filename: Option<String>,
    /// Original file size in bytes, from the download URL's `content-length`.
    pub size_bytes: Option<u64>,
}

impl MediaItem {
    /// Still images only. Video thumbnails alone give too many false positives.
    pub fn is_photo(&self) -> bool {
        self.mime_type.starts_with("image/") && !self.is_video
    }

    /// `width * height`, or 0 when either dimension is unknown.
    pub fn pixel_area(&self) -> u64 {
        match (self.width, self.height) {
            (Some(w), Some(h)) => w as u64 * h as u64,
            _ => 0,
        }
    }

    pub fn is_cached(&self) -> bool {
        self.storage_filename.is_some()
    }
}

/// One page of items from the provider's listing endpoint.
#[derive(Debug, Clone, Default)]
pub struct MediaPage {
    pub items: Vec<MediaItem>,
    /// `None` on the last page.
    pub next_page_token: Option<String>,
}
