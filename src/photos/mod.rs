//! Google Photos integration: the HTTP client, the on-disk image cache, and the
//! [`ItemSource`] that pairs the remote listing with the local library.

pub mod client;
pub mod image_store;
pub mod retry;

pub use client::GooglePhotosClient;
pub use image_store::FsImageStore;
pub use retry::RetryPolicy;

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::ProviderError;
use crate::media::{LocalLibrary, MediaPage};
use crate::pipeline::ItemSource;

/// Remote listing from Google Photos, local state from the library.
pub struct PhotosLibrarySource {
    client: Arc<GooglePhotosClient>,
    library: LocalLibrary,
}

impl PhotosLibrarySource {
    pub fn new(client: Arc<GooglePhotosClient>, library: LocalLibrary) -> Self {
        Self { client, library }
    }
}

#[async_trait]
impl ItemSource for PhotosLibrarySource {
    async fn list_page(&self, page_token: Option<String>) -> Result<MediaPage, ProviderError> {
        self.client.list_media_items(page_token.as_deref()).await
    }

    fn library(&self) -> &LocalLibrary {
        &self.library
    }
}
