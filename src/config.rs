use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::similarity::{CommunityParams, MiningParams};

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct DedupConfig {
    pub log: LogConfig,
    pub storage: StorageConfig,
    pub photos: PhotosConfig,
    pub embedding: EmbeddingConfig,
    pub detection: DetectionConfig,
    pub mining: MiningConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LogConfig {
    /// `tracing_subscriber::EnvFilter` directive, e.g. `info` or `photo_dedup=debug`.
    pub level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
    pub image_dir: String,
    pub user_id: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PhotosConfig {
    pub api_base_url: String,
    pub access_token: String,
    pub page_size: usize,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: String,
    pub model: String,
    pub cache_dir: String,
    pub input_size: u32,
    pub input_name: String,
    pub model_url: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DetectionConfig {
    pub threshold: f32,
    pub min_community_size: usize,
    pub batch_size: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MiningConfig {
    pub top_k: usize,
    pub query_chunk_size: usize,
    pub corpus_chunk_size: usize,
    pub max_pairs: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PipelineConfig {
    pub batch_size: usize,
    pub poll_interval_ms: u64,
    pub max_wait_secs: u64,
    pub worker_concurrency: usize,
    pub image_resolution: u32,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    pub rate_limit_backoff_secs: u64,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let base = default_dedup_dir();
        Self {
            db_path: base.join("library.db").to_string_lossy().into_owned(),
            image_dir: base.join("images").to_string_lossy().into_owned(),
            user_id: "default".into(),
        }
    }
}

impl Default for PhotosConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://photoslibrary.googleapis.com".into(),
            access_token: String::new(),
            page_size: 100,
            request_timeout_secs: 20,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        let cache_dir = default_dedup_dir()
            .join("models")
            .to_string_lossy()
            .into_owned();
        Self {
            provider: "local".into(),
            model: "mobilenet_v3_large".into(),
            cache_dir,
            input_size: 224,
            input_name: "input".into(),
            model_url: String::new(),
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            threshold: 0.99,
            min_community_size: 2,
            batch_size: 128,
        }
    }
}

impl Default for MiningConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            query_chunk_size: 500,
            corpus_chunk_size: 10_000,
            max_pairs: 500_000,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            poll_interval_ms: 1000,
            max_wait_secs: 24 * 60 * 60,
            worker_concurrency: 4,
            image_resolution: 250,
            retry_attempts: 3,
            retry_delay_ms: 1000,
            rate_limit_backoff_secs: 60,
        }
    }
}

impl DetectionConfig {
    pub fn community_params(&self) -> CommunityParams {
        CommunityParams {
            threshold: self.threshold,
            min_size: self.min_community_size,
            batch_size: self.batch_size,
        }
    }
}

impl MiningConfig {
    pub fn mining_params(&self) -> MiningParams {
        MiningParams {
            top_k: self.top_k,
            query_chunk_size: self.query_chunk_size,
            corpus_chunk_size: self.corpus_chunk_size,
            max_pairs: self.max_pairs,
        }
    }
}

impl PipelineConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn rate_limit_backoff(&self) -> Duration {
        Duration::from_secs(self.rate_limit_backoff_secs)
    }
}

/// Returns `~/.photo-dedup/`
pub fn default_dedup_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".photo-dedup")
}

/// Returns the default config file path: `~/.photo-dedup/config.toml`
pub fn default_config_path() -> PathBuf {
    default_dedup_dir().join("config.toml")
}

impl DedupConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            DedupConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("PHOTO_DEDUP_DB") {
            self.storage.db_path = val;
        }
        if let Ok(val) = std::env::var("PHOTO_DEDUP_IMAGE_DIR") {
            self.storage.image_dir = val;
        }
        if let Ok(val) = std::env::var("PHOTO_DEDUP_USER") {
            self.storage.user_id = val;
        }
        if let Ok(val) = std::env::var("PHOTO_DEDUP_ACCESS_TOKEN") {
            self.photos.access_token = val;
        }
        if let Ok(val) = std::env::var("PHOTO_DEDUP_LOG_LEVEL") {
            self.log.level = val;
        }
    }

    /// Reject settings that would make a run meaningless or loop forever.
    pub fn validate(&self) -> Result<()> {
        let d = &self.detection;
        anyhow::ensure!(
            (-1.0..=1.0).contains(&d.threshold),
            "detection.threshold must be within [-1, 1], got {}",
            d.threshold
        );
        anyhow::ensure!(d.min_community_size >= 1, "detection.min_community_size must be >= 1");
        anyhow::ensure!(d.batch_size > 0, "detection.batch_size must be > 0");

        let m = &self.mining;
        anyhow::ensure!(m.top_k > 0, "mining.top_k must be > 0");
        anyhow::ensure!(
            m.query_chunk_size > 0 && m.corpus_chunk_size > 0,
            "mining chunk sizes must be > 0"
        );
        anyhow::ensure!(m.max_pairs > 0, "mining.max_pairs must be > 0");

        let p = &self.pipeline;
        anyhow::ensure!(p.batch_size > 0, "pipeline.batch_size must be > 0");
        anyhow::ensure!(p.poll_interval_ms > 0, "pipeline.poll_interval_ms must be > 0");
        anyhow::ensure!(p.worker_concurrency > 0, "pipeline.worker_concurrency must be > 0");
        anyhow::ensure!(p.retry_attempts > 0, "pipeline.retry_attempts must be > 0");
        anyhow::ensure!(self.photos.page_size > 0, "photos.page_size must be > 0");
        Ok(())
    }

    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }

    pub fn resolved_image_dir(&self) -> PathBuf {
        expand_tilde(&self.storage.image_dir)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}
