//! Filesystem image cache.
//!
//! Thumbnails are downloaded once at a fixed resolution and stored as
//! `{image_dir}/{media_item_id}-{resolution}.jpg`. The storage key handed back to
//! callers is the bare file name.

use async_trait::async_trait;
use image::DynamicImage;
use reqwest::Client;
use std::io;
use std::path::{Path, PathBuf};

use super::client::check_status;
use super::retry::{retry_transient, RetryPolicy};
use crate::error::ProviderError;
use crate::media::types::MediaItem;
use crate::pipeline::ImageStore;

pub struct FsImageStore {
    dir: PathBuf,
    resolution: u32,
    http: Client,
    retry: RetryPolicy,
}

impl FsImageStore {
    pub fn new(
        dir: impl Into<PathBuf>,
        resolution: u32,
        http: Client,
        retry: RetryPolicy,
    ) -> io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            resolution,
            http,
            retry,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Videos resolve to their thumbnail, so every key is a JPEG.
    pub fn storage_filename(&self, item: &MediaItem) -> String {
        format!("{}-{}.jpg", item.id, self.resolution)
    }

    fn image_url(&self, item: &MediaItem) -> String {
        format!("{}=w{res}-h{res}", item.base_url, res = self.resolution)
    }

    /// Keys are bare file names; anything that could escape the cache dir is rejected.
    fn path_for(&self, key: &str) -> Result<PathBuf, ProviderError> {
        if key.is_empty() || Path::new(key).file_name().and_then(|n| n.to_str()) != Some(key) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid storage key: {key:?}"),
            )
            .into());
        }
        Ok(self.dir.join(key))
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, ProviderError> {
        let http = &self.http;
        retry_transient(&self.retry, "downloading image", || async move {
            let response = check_status(http.get(url).send().await?)?;
            Ok::<_, ProviderError>(response.bytes().await?.to_vec())
        })
        .await
    }
}

#[async_trait]
impl ImageStore for FsImageStore {
    async fn cache(&self, item: &MediaItem) -> Result<String, ProviderError> {
        let key = self.storage_filename(item);
        let path = self.path_for(&key)?;

        if tokio::fs::try_exists(&path).await? {
            return Ok(key);
        }

        let bytes = self.download(&self.image_url(item)).await?;

        let tmp_path = path.with_extension("tmp");
        tokio::fs::write(&tmp_path, &bytes).await?;
        tokio::fs::rename(&tmp_path, &path).await?;

        tracing::debug!(media_item = %item.id, bytes = bytes.len(), "cached image");
        Ok(key)
    }

    fn resolve(&self, storage_key: &str) -> Result<DynamicImage, ProviderError> {
        let path = self.path_for(storage_key)?;
        Ok(image::open(path)?)
    }
}
