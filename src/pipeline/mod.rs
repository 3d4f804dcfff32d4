//! Run orchestration: fetch the library, fan out per-batch subtasks, wait for them, then
//! cluster the cached photos into duplicate groups.
//!
//! The orchestrator talks to the outside world only through the collaborator traits in
//! this module, so every stage can be driven by in-memory fakes:
//!
//! - [`ItemSource`]: paged remote listing plus the local library
//! - [`ImageStore`]: caches and resolves thumbnails
//! - [`TaskQueue`]: schedules subtasks and hands back pollable handles
//! - [`ProgressSink`]: receives state snapshots and the terminal status

pub mod orchestrator;
pub mod progress;
pub mod report;
pub mod state;
pub mod subtask;

pub use orchestrator::{Collaborators, PipelineOrchestrator};
pub use progress::{ChannelProgressSink, ProgressEvent, RunStatus};
pub use report::{DuplicateReport, Group};
pub use state::{PipelineState, Step, StepProgress};
pub use subtask::{Subtask, SubtaskHandle, SubtaskJob, SubtaskKind, SubtaskReport, SubtaskStatus};

use async_trait::async_trait;
use image::DynamicImage;

use crate::error::ProviderError;
use crate::media::{LocalLibrary, MediaItem, MediaPage};

/// Where media items come from.
///
/// Listing must signal quota exhaustion as [`ProviderError::RateLimited`]. Local reads go
/// through the shared library and are safe to repeat.
#[async_trait]
pub trait ItemSource: Send + Sync {
    /// One page of the remote listing. `None` starts from the beginning.
    async fn list_page(&self, page_token: Option<String>) -> Result<MediaPage, ProviderError>;

    fn library(&self) -> &LocalLibrary;

    async fn local_count(&self) -> anyhow::Result<usize> {
        self.library().count().await
    }

    /// Every locally known item, oldest first.
    async fn local_items(&self) -> anyhow::Result<Vec<MediaItem>> {
        self.library().all().await
    }
}

/// Local image cache. Implementations retry transient failures themselves.
#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Make sure the item's image is available locally and return its storage key.
    async fn cache(&self, item: &MediaItem) -> Result<String, ProviderError>;

    /// Load a previously cached image. Blocking; call from a blocking context.
    fn resolve(&self, storage_key: &str) -> Result<DynamicImage, ProviderError>;
}

/// Schedules subtasks without blocking the caller.
pub trait TaskQueue: Send + Sync {
    fn dispatch(&self, job: SubtaskJob) -> Subtask;
}

/// Receives progress events. Publishing never fails the run.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn publish(&self, event: ProgressEvent);
}
