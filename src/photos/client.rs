//! Google Photos Library API client.
//!
//! Lists media items page by page and looks up original file sizes. The access token is
//! supplied by configuration; obtaining or refreshing it is the host's job.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::CONTENT_LENGTH;
use reqwest::{Client, Response, Url};
use serde::Deserialize;
use std::time::Duration;

use super::retry::{retry_transient, RetryPolicy};
use crate::config::PhotosConfig;
use crate::error::ProviderError;
use crate::media::types::{MediaItem, MediaPage};
use crate::tasks::media_sizes::SizeLookup;

pub struct GooglePhotosClient {
    http: Client,
    list_url: Url,
    access_token: String,
    page_size: usize,
    retry: RetryPolicy,
}

// ── Wire format ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListMediaItemsResponse {
    #[serde(default)]
    media_items: Vec<ApiMediaItem>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiMediaItem {
    id: String,
    filename: Option<String>,
    #[serde(default)]
    mime_type: String,
    product_url: Option<String>,
    #[serde(default)]
    base_url: String,
    #[serde(default)]
    media_metadata: ApiMediaMetadata,
}

/// Width and height arrive as decimal strings.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiMediaMetadata {
    creation_time: Option<DateTime<Utc>>,
    width: Option<String>,
    height: Option<String>,
    video: Option<serde_json::Value>,
}

impl From<ApiMediaItem> for MediaItem {
    fn from(api: ApiMediaItem) -> Self {
        let meta = api.media_metadata;
        MediaItem {
            id: api.id,
            filename: api.filename,
            mime_type: api.mime_type,
            product_url: api.product_url,
            base_url: api.base_url,
            width: meta.width.and_then(|w| w.parse().ok()),
            height: meta.height.and_then(|h| h.parse().ok()),
            creation_time: meta.creation_time,
            is_video: meta.video.is_some(),
            storage_filename: None,
            size_bytes: None,
        }
    }
}

fn parse_list_response(body: &str) -> Result<MediaPage, ProviderError> {
    let parsed: ListMediaItemsResponse =
        serde_json::from_str(body).map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
    Ok(MediaPage {
        items: parsed.media_items.into_iter().map(MediaItem::from).collect(),
        next_page_token: parsed.next_page_token.filter(|t| !t.is_empty()),
    })
}

// ── Client ───────────────────────────────────────────────────────────────────

impl GooglePhotosClient {
    pub fn new(config: &PhotosConfig, retry: RetryPolicy) -> Result<Self> {
        let base = config.api_base_url.trim_end_matches('/');
        let list_url = Url::parse(&format!("{base}/v1/mediaItems"))
            .with_context(|| format!("invalid photos.api_base_url: {}", config.api_base_url))?;

        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            http,
            list_url,
            access_token: config.access_token.clone(),
            page_size: config.page_size,
            retry,
        })
    }

    /// The underlying HTTP client, shared with the image store.
    pub fn http(&self) -> &Client {
        &self.http
    }

    /// Fetch one page of the library listing. Retries 5xx and network errors.
    pub async fn list_media_items(
        &self,
        page_token: Option<&str>,
    ) -> Result<MediaPage, ProviderError> {
        let mut url = self.list_url.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("pageSize", &self.page_size.to_string());
            if let Some(token) = page_token {
                query.append_pair("pageToken", token);
            }
        }

        let (http, url, token) = (&self.http, &url, &self.access_token);
        let body = retry_transient(&self.retry, "listing media items", || async move {
            let response = http.get(url.clone()).bearer_auth(token).send().await?;
            check_status(response)?.text().await.map_err(ProviderError::from)
        })
        .await?;

        let page = parse_list_response(&body)?;
        tracing::debug!(
            items = page.items.len(),
            has_more = page.next_page_token.is_some(),
            "fetched media items page"
        );
        Ok(page)
    }

    /// `HEAD` the item's download URL and read `content-length`. Single attempt.
    pub async fn fetch_size(&self, item: &MediaItem) -> Result<u64, ProviderError> {
        let response = self.http.head(download_url(item)).send().await?;
        let response = check_status(response)?;
        response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| ProviderError::InvalidResponse("missing content-length header".into()))
    }
}

/// Original-quality download URL: `=d` for photos, `=dv` for videos.
pub fn download_url(item: &MediaItem) -> String {
    let suffix = if item.is_video { "dv" } else { "d" };
    format!("{}={suffix}", item.base_url)
}

/// Map non-success statuses to typed errors.
pub(crate) fn check_status(response: Response) -> Result<Response, ProviderError> {
    response.error_for_status().map_err(ProviderError::from)
}

#[async_trait]
impl SizeLookup for GooglePhotosClient {
    async fn content_length(&self, item: &MediaItem) -> Result<u64, ProviderError> {
        self.fetch_size(item).await
    }
}
