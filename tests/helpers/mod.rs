#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use image::{DynamicImage, Rgb, RgbImage};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use photo_dedup::config::DedupConfig;
use photo_dedup::db;
use photo_dedup::embedding::ImageEmbedder;
use photo_dedup::error::ProviderError;
use photo_dedup::media::{LocalLibrary, MediaItem, MediaPage};
use photo_dedup::photos::RetryPolicy;
use photo_dedup::pipeline::{
    Collaborators, ImageStore, ItemSource, PipelineOrchestrator, ProgressEvent, ProgressSink,
};
use photo_dedup::tasks::{LocalTaskQueue, SizeLookup};

pub const RED: [u8; 3] = [255, 0, 0];
pub const GREEN: [u8; 3] = [0, 255, 0];
pub const BLUE: [u8; 3] = [0, 0, 255];
pub const YELLOW: [u8; 3] = [255, 255, 0];

/// A library over a fresh in-memory database with schema and migrations applied.
pub fn test_library() -> LocalLibrary {
    LocalLibrary::new(db::open_in_memory().unwrap(), "test-user")
}

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

/// A photo created `minutes` after a fixed epoch, so list order is predictable.
pub fn photo(id: &str, width: u32, height: u32, minutes: i64) -> MediaItem {
    MediaItem {
        id: id.into(),
        filename: Some(format!("{id}.jpg")),
        mime_type: "image/jpeg".into(),
        base_url: format!("https://photos.example/{id}"),
        width: Some(width),
        height: Some(height),
        creation_time: Some(base_time() + Duration::minutes(minutes)),
        ..Default::default()
    }
}

pub fn video(id: &str, minutes: i64) -> MediaItem {
    MediaItem {
        mime_type: "video/mp4".into(),
        is_video: true,
        ..photo(id, 1920, 1080, minutes)
    }
}

/// `count` photos named `p000`, `p001`, ...
pub fn numbered_photos(count: usize) -> Vec<MediaItem> {
    (0..count)
        .map(|i| photo(&format!("p{i:03}"), 100, 100, i as i64))
        .collect()
}

pub fn solid_image(color: [u8; 3]) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb(color)))
}

/// Config tuned so test runs poll fast and never back off for long.
pub fn test_config() -> DedupConfig {
    let mut config = DedupConfig::default();
    config.pipeline.batch_size = 50;
    config.pipeline.poll_interval_ms = 5;
    config.pipeline.max_wait_secs = 30;
    config.pipeline.retry_delay_ms = 0;
    config.pipeline.rate_limit_backoff_secs = 0;
    config
}

// ── Fakes ───────────────────────────────────────────────────────────────────

/// Serves `items` in pages of `page_size`. Page tokens are page indices.
pub struct PagedSource {
    pages: Vec<Vec<MediaItem>>,
    library: LocalLibrary,
    rate_limited_page: Option<usize>,
    pub pages_served: AtomicUsize,
}

impl PagedSource {
    pub fn new(library: LocalLibrary, items: Vec<MediaItem>, page_size: usize) -> Self {
        Self {
            pages: items.chunks(page_size).map(|c| c.to_vec()).collect(),
            library,
            rate_limited_page: None,
            pages_served: AtomicUsize::new(0),
        }
    }

    /// Answer this page with a 429.
    pub fn rate_limit_page(mut self, page: usize) -> Self {
        self.rate_limited_page = Some(page);
        self
    }
}

#[async_trait]
impl ItemSource for PagedSource {
    async fn list_page(&self, page_token: Option<String>) -> Result<MediaPage, ProviderError> {
        let index = page_token.map_or(0, |t| t.parse::<usize>().unwrap());
        if self.rate_limited_page == Some(index) {
            return Err(ProviderError::RateLimited("quota exhausted".into()));
        }
        self.pages_served.fetch_add(1, Ordering::SeqCst);

        let items = self.pages.get(index).cloned().unwrap_or_default();
        let next_page_token = (index + 1 < self.pages.len()).then(|| (index + 1).to_string());
        Ok(MediaPage {
            items,
            next_page_token,
        })
    }

    fn library(&self) -> &LocalLibrary {
        &self.library
    }
}

/// In-memory image cache keyed by media item id.
///
/// Items without a registered image get a white square. Ids in `rate_limited` answer
/// with a 429 and ids in `broken` with a permanent error until cleared.
#[derive(Default)]
pub struct MemoryImageStore {
    images: Mutex<HashMap<String, DynamicImage>>,
    rate_limited: Mutex<HashSet<String>>,
    broken: Mutex<HashSet<String>>,
    pub cached: AtomicUsize,
}

impl MemoryImageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_image(self, id: &str, color: [u8; 3]) -> Self {
        self.images
            .lock()
            .unwrap()
            .insert(id.to_string(), solid_image(color));
        self
    }

    pub fn rate_limit(&self, id: &str) {
        self.rate_limited.lock().unwrap().insert(id.to_string());
    }

    pub fn break_item(&self, id: &str) {
        self.broken.lock().unwrap().insert(id.to_string());
    }

    pub fn clear_failures(&self) {
        self.rate_limited.lock().unwrap().clear();
        self.broken.lock().unwrap().clear();
    }
}

#[async_trait]
impl ImageStore for MemoryImageStore {
    async fn cache(&self, item: &MediaItem) -> Result<String, ProviderError> {
        if self.rate_limited.lock().unwrap().contains(&item.id) {
            return Err(ProviderError::RateLimited("daily quota".into()));
        }
        if self.broken.lock().unwrap().contains(&item.id) {
            return Err(ProviderError::Permanent {
                status: 404,
                message: format!("{} not found", item.id),
            });
        }
        self.cached.fetch_add(1, Ordering::SeqCst);
        Ok(item.id.clone())
    }

    fn resolve(&self, storage_key: &str) -> Result<DynamicImage, ProviderError> {
        Ok(self
            .images
            .lock()
            .unwrap()
            .get(storage_key)
            .cloned()
            .unwrap_or_else(|| solid_image([255, 255, 255])))
    }
}

/// Embeds an image as its mean RGB color.
pub struct MeanColorEmbedder;

impl ImageEmbedder for MeanColorEmbedder {
    fn embed(&self, image: &DynamicImage) -> anyhow::Result<Vec<f32>> {
        let rgb = image.to_rgb8();
        let mut sum = [0f32; 3];
        for pixel in rgb.pixels() {
            for (s, &c) in sum.iter_mut().zip(pixel.0.iter()) {
                *s += c as f32;
            }
        }
        let n = (rgb.width() * rgb.height()).max(1) as f32;
        Ok(sum.iter().map(|s| s / n).collect())
    }

    fn model_name(&self) -> &str {
        "mean-color"
    }
}

/// Sizes derived from the id length; ids in `failing` never resolve.
#[derive(Default)]
pub struct FixedSizes {
    pub failing: HashSet<String>,
    pub calls: AtomicUsize,
}

#[async_trait]
impl SizeLookup for FixedSizes {
    async fn content_length(&self, item: &MediaItem) -> Result<u64, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(&item.id) {
            return Err(ProviderError::Transient("connection reset".into()));
        }
        Ok(1000 + item.id.len() as u64)
    }
}

/// Keeps every published event for later inspection.
#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<ProgressEvent>>,
}

#[async_trait]
impl ProgressSink for RecordingSink {
    async fn publish(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Everything a pipeline test needs to drive and inspect one run.
pub struct Harness {
    pub library: LocalLibrary,
    pub source: Arc<PagedSource>,
    pub images: Arc<MemoryImageStore>,
    pub sizes: Arc<FixedSizes>,
    pub sink: Arc<RecordingSink>,
    pub config: DedupConfig,
}

impl Harness {
    pub fn new(items: Vec<MediaItem>, images: MemoryImageStore) -> Self {
        let library = test_library();
        Self {
            source: Arc::new(PagedSource::new(library.clone(), items, 20)),
            library,
            images: Arc::new(images),
            sizes: Arc::new(FixedSizes::default()),
            sink: Arc::new(RecordingSink::default()),
            config: test_config(),
        }
    }

    pub fn with_source(mut self, source: PagedSource) -> Self {
        self.source = Arc::new(source);
        self
    }

    pub fn orchestrator(&self) -> PipelineOrchestrator {
        let retry = RetryPolicy::from(&self.config.pipeline);
        let queue = LocalTaskQueue::new(
            self.library.clone(),
            self.images.clone(),
            self.sizes.clone(),
            retry,
            4,
        );
        let services = Collaborators {
            source: self.source.clone(),
            images: self.images.clone(),
            queue: Arc::new(queue),
            embedder: Arc::new(MeanColorEmbedder),
            progress: self.sink.clone(),
        };
        PipelineOrchestrator::new(&self.config, services)
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.sink.events.lock().unwrap().clone()
    }
}
