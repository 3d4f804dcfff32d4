//! In-process task queue.
//!
//! Every dispatched job runs on its own `tokio` task. A semaphore caps how many run at
//! once; the rest wait in `Pending`. Handles observe status through a `watch` channel.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::Instrument;

use super::{fetch_sizes, store_images, SizeLookup};
use crate::error::SubtaskError;
use crate::media::LocalLibrary;
use crate::photos::RetryPolicy;
use crate::pipeline::subtask::{self, SubtaskHandle, SubtaskStatus};
use crate::pipeline::{ImageStore, Subtask, SubtaskJob, TaskQueue};

pub struct LocalTaskQueue {
    library: LocalLibrary,
    images: Arc<dyn ImageStore>,
    sizes: Arc<dyn SizeLookup>,
    retry: RetryPolicy,
    permits: Arc<Semaphore>,
}

impl LocalTaskQueue {
    pub fn new(
        library: LocalLibrary,
        images: Arc<dyn ImageStore>,
        sizes: Arc<dyn SizeLookup>,
        retry: RetryPolicy,
        concurrency: usize,
    ) -> Self {
        Self {
            library,
            images,
            sizes,
            retry,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    /// Spawn `work` once a permit is free and report its result through the handle.
    fn spawn<T, F>(&self, kind: &'static str, total: usize, work: F) -> SubtaskHandle<T>
    where
        T: Clone + Send + Sync + 'static,
        F: Future<Output = Result<T, SubtaskError>> + Send + 'static,
    {
        let (tx, handle) = subtask::channel(total);
        let permits = Arc::clone(&self.permits);
        let span = tracing::info_span!("subtask", id = %handle.id(), kind, total);

        tokio::spawn(
            async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    tx.send_replace(SubtaskStatus::Failed(SubtaskError::failed(
                        "task queue shut down",
                        0,
                        total,
                    )));
                    return;
                };
                tx.send_replace(SubtaskStatus::Running);
                let status = match work.await {
                    Ok(outcome) => SubtaskStatus::Succeeded(outcome),
                    Err(e) => {
                        tracing::warn!("{e}");
                        SubtaskStatus::Failed(e)
                    }
                };
                tx.send_replace(status);
            }
            .instrument(span),
        );

        handle
    }
}

impl TaskQueue for LocalTaskQueue {
    fn dispatch(&self, job: SubtaskJob) -> Subtask {
        let total = job.media_item_ids().len();
        let kind = job.kind().as_str();
        let library = self.library.clone();

        match job {
            SubtaskJob::StoreImages { media_item_ids } => {
                let images = Arc::clone(&self.images);
                Subtask::StoreImages(self.spawn(kind, total, async move {
                    store_images(&library, images.as_ref(), &media_item_ids).await
                }))
            }
            SubtaskJob::FetchSizes { media_item_ids } => {
                let sizes = Arc::clone(&self.sizes);
                let retry = self.retry.clone();
                Subtask::FetchSizes(self.spawn(kind, total, async move {
                    fetch_sizes(&library, sizes.as_ref(), &media_item_ids, &retry).await
                }))
            }
        }
    }
}
