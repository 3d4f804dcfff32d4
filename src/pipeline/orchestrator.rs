//! The pipeline state machine.
//!
//! A run walks `fetch_media_items → process_duplicates` exactly once:
//!
//! 1. **fetch_media_items**: unless the library is populated and its last listing ran to
//!    the final page, stream the remote listing page by page (always, on refresh), save
//!    each page, and fan out one image-caching and one size-lookup subtask per full batch
//!    (the remainder is flushed at the end). Otherwise only items without a cached image
//!    are re-dispatched, which is how a run resumes after a quota failure. Then poll every
//!    subtask until all are terminal and classify the result.
//! 2. **process_duplicates**: embed the cached photos once, mine similar pairs, detect
//!    communities over the same matrix, and render the [`DuplicateReport`].
//!
//! Every step transition and log line is published to the [`ProgressSink`] as a fresh
//! [`PipelineState`] snapshot; the terminal status follows as the last event.

use anyhow::anyhow;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::progress::{ProgressEvent, RunStatus};
use super::report::DuplicateReport;
use super::state::{PipelineState, Step};
use super::subtask::{classify_reports, Subtask, SubtaskJob, SubtaskReport};
use super::{ImageStore, ItemSource, ProgressSink, TaskQueue};
use crate::config::{DedupConfig, PipelineConfig};
use crate::embedding::{EmbeddingMatrix, ImageEmbedder};
use crate::error::PipelineError;
use crate::similarity::{CommunityDetector, CommunityParams, MiningParams, SimilarityMiner};

const LOG_INTERVAL: Duration = Duration::from_secs(3);

/// External services a run depends on.
#[derive(Clone)]
pub struct Collaborators {
    pub source: Arc<dyn ItemSource>,
    pub images: Arc<dyn ImageStore>,
    pub queue: Arc<dyn TaskQueue>,
    pub embedder: Arc<dyn ImageEmbedder>,
    pub progress: Arc<dyn ProgressSink>,
}

pub struct PipelineOrchestrator {
    settings: PipelineConfig,
    detection: CommunityParams,
    mining: MiningParams,
    services: Collaborators,
    state: PipelineState,
}

impl PipelineOrchestrator {
    /// One orchestrator per run; state is never shared between runs.
    pub fn new(config: &DedupConfig, services: Collaborators) -> Self {
        Self {
            settings: config.pipeline.clone(),
            detection: config.detection.community_params(),
            mining: config.mining.mining_params(),
            services,
            state: PipelineState::new(),
        }
    }

    /// Current progress, as an independent copy.
    pub fn snapshot(&self) -> PipelineState {
        self.state.snapshot()
    }

    /// Run both steps and publish the terminal status.
    ///
    /// `refresh` forces a full refetch even when the local library is populated.
    pub async fn run(&mut self, refresh: bool) -> Result<DuplicateReport, PipelineError> {
        let result = self.execute(refresh).await;

        let status = RunStatus::from_result(&result);
        match &result {
            Ok(report) => tracing::info!(groups = report.groups.len(), "run succeeded"),
            Err(e) if e.is_resumable() => tracing::warn!("{e}"),
            Err(e) => tracing::error!("run failed: {e}"),
        }
        self.services
            .progress
            .publish(ProgressEvent::Finished {
                status,
                result: result.as_ref().ok().cloned(),
            })
            .await;

        result
    }

    async fn execute(&mut self, refresh: bool) -> Result<DuplicateReport, PipelineError> {
        self.start_step(Step::FetchMediaItems).await;

        let local_count = self.services.source.local_count().await?;
        let listing_complete = self.services.source.library().listing_complete().await?;
        let subtasks = if refresh || local_count == 0 || !listing_complete {
            self.fetch_media_items().await?
        } else {
            self.resume_uncached().await?
        };
        self.await_subtasks(subtasks).await?;

        let media_items_count = self.services.source.local_count().await?;
        self.complete_step(Step::FetchMediaItems, Some(media_items_count))
            .await;

        self.start_step(Step::ProcessDuplicates).await;
        self.log(format!(
            "Processing duplicates for {media_items_count} media items..."
        ))
        .await;

        let report = self.process_duplicates().await?;

        self.complete_step(Step::ProcessDuplicates, Some(report.groups.len()))
            .await;
        Ok(report)
    }

    // ── fetch_media_items ────────────────────────────────────────────────────

    async fn fetch_media_items(&mut self) -> Result<Vec<Subtask>, PipelineError> {
        self.log("Fetching media items...").await;
        let library = self.services.source.library().clone();
        library.set_listing_complete(false).await?;

        let batch_size = self.settings.batch_size.max(1);
        let mut seen = HashSet::new();
        let mut batch = Vec::with_capacity(batch_size);
        let mut subtasks = Vec::new();
        let mut page_token = None;
        let mut fetched = 0usize;
        let mut last_log = Instant::now();

        loop {
            let page = match self.services.source.list_page(page_token.take()).await {
                Ok(page) => page,
                Err(e) if e.is_rate_limit() => {
                    tracing::warn!(fetched, "rate limited while listing media items: {e}");
                    return Err(PipelineError::ListingQuotaExceeded { fetched });
                }
                Err(e) => return Err(e.into()),
            };
            library.upsert(page.items.clone()).await?;

            for item in page.items {
                seen.insert(item.id.clone());
                batch.push(item.id);
                fetched += 1;
                if batch.len() >= batch_size {
                    subtasks.extend(self.dispatch_batch(std::mem::take(&mut batch)));
                }
            }

            if last_log.elapsed() > LOG_INTERVAL {
                self.log(format!("Fetched {fetched} media items so far")).await;
                last_log = Instant::now();
            }

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        if !batch.is_empty() {
            subtasks.extend(self.dispatch_batch(batch));
        }

        let pruned = library.prune_missing(seen).await?;
        if pruned > 0 {
            self.log(format!(
                "Deleted {pruned} local media items not found during fetch"
            ))
            .await;
        }

        library.set_listing_complete(true).await?;
        self.log(format!("Done fetching media items, {fetched} total"))
            .await;
        Ok(subtasks)
    }

    /// Re-dispatch image caching for items a previous run never cached.
    async fn resume_uncached(&mut self) -> Result<Vec<Subtask>, PipelineError> {
        let uncached = self.services.source.library().uncached_ids().await?;
        if uncached.is_empty() {
            return Ok(Vec::new());
        }

        self.log(format!(
            "Resuming image caching for {} media items",
            uncached.len()
        ))
        .await;

        let subtasks = uncached
            .chunks(self.settings.batch_size.max(1))
            .map(|chunk| {
                self.services.queue.dispatch(SubtaskJob::StoreImages {
                    media_item_ids: chunk.to_vec(),
                })
            })
            .collect();
        Ok(subtasks)
    }

    fn dispatch_batch(&self, media_item_ids: Vec<String>) -> [Subtask; 2] {
        tracing::debug!(batch = media_item_ids.len(), "dispatching subtasks");
        let queue = &self.services.queue;
        [
            queue.dispatch(SubtaskJob::StoreImages {
                media_item_ids: media_item_ids.clone(),
            }),
            queue.dispatch(SubtaskJob::FetchSizes { media_item_ids }),
        ]
    }

    /// Poll until every subtask is terminal, then classify the outcome.
    async fn await_subtasks(&mut self, subtasks: Vec<Subtask>) -> Result<(), PipelineError> {
        if subtasks.is_empty() {
            return Ok(());
        }

        let total = subtasks.len();
        let poll_interval = self.settings.poll_interval();
        let max_wait = self.settings.max_wait();
        let started = Instant::now();
        let mut last_done = usize::MAX;

        loop {
            let done = subtasks.iter().filter(|s| s.is_done()).count();
            if done == total {
                break;
            }
            if done != last_done {
                self.log(format!("Waiting for subtasks: {done} of {total} complete"))
                    .await;
                last_done = done;
            }
            if started.elapsed() >= max_wait {
                return Err(PipelineError::WaitTimedOut {
                    pending: total - done,
                    waited_secs: started.elapsed().as_secs(),
                });
            }
            tokio::time::sleep(poll_interval).await;
        }

        let reports: Vec<SubtaskReport> = subtasks.iter().map(Subtask::report).collect();
        for (subtask, report) in subtasks.iter().zip(&reports) {
            if let Some(error) = &report.error {
                tracing::error!(
                    subtask = %subtask.id(),
                    kind = %report.kind,
                    "subtask failed: {error}"
                );
            }
        }

        classify_reports(&reports)?;
        self.log(format!("All {total} subtasks complete")).await;
        Ok(())
    }

    // ── process_duplicates ───────────────────────────────────────────────────

    async fn process_duplicates(&mut self) -> Result<DuplicateReport, PipelineError> {
        let media_items: Vec<_> = self
            .services
            .source
            .local_items()
            .await?
            .into_iter()
            .filter(|item| item.is_photo())
            .collect();

        if media_items.is_empty() {
            self.log("No photos to compare").await;
            return Ok(DuplicateReport::default());
        }

        self.log(format!(
            "Calculating embeddings for {} photos...",
            media_items.len()
        ))
        .await;

        let images = Arc::clone(&self.services.images);
        let embedder = Arc::clone(&self.services.embedder);
        let detection = self.detection.clone();
        let mining = self.mining.clone();

        // Embedding and clustering are CPU-bound; keep them off the async workers.
        let process = move || -> Result<DuplicateReport, PipelineError> {
            let matrix =
                EmbeddingMatrix::compute(&media_items, images.as_ref(), embedder.as_ref())?;
            let pairs = SimilarityMiner::new(mining).mine(matrix.view());
            let threshold = detection.threshold;
            let communities = CommunityDetector::new(detection).detect(matrix.view());
            Ok(DuplicateReport::build(&media_items, &pairs, &communities, threshold))
        };
        let report = tokio::task::spawn_blocking(process)
            .await
            .map_err(|e| anyhow!("duplicate processing task failed: {e}"))??;

        self.log(format!(
            "Found {} duplicate groups across {} similar pairs",
            report.groups.len(),
            report.similarity_map.values().map(|m| m.len()).sum::<usize>() / 2
        ))
        .await;
        Ok(report)
    }

    // ── state updates ────────────────────────────────────────────────────────

    async fn start_step(&mut self, step: Step) {
        tracing::info!(%step, "step started");
        self.state.start_step(step);
        self.publish_state().await;
    }

    async fn complete_step(&mut self, step: Step, count: Option<usize>) {
        tracing::info!(%step, count, "step completed");
        self.state.complete_step(step, count);
        self.publish_state().await;
    }

    async fn log(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!("{message}");
        self.state.set_log_message(message);
        self.publish_state().await;
    }

    async fn publish_state(&self) {
        self.services
            .progress
            .publish(ProgressEvent::State(self.state.snapshot()))
            .await;
    }
}
