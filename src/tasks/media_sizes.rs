use async_trait::async_trait;
use std::time::{Duration, Instant};

use crate::error::{ProviderError, SubtaskError};
use crate::media::{LocalLibrary, MediaItem};
use crate::photos::RetryPolicy;
use crate::pipeline::subtask::FetchSizesOutcome;

/// Looks up an item's original file size in bytes. One attempt per call.
#[async_trait]
pub trait SizeLookup: Send + Sync {
    async fn content_length(&self, item: &MediaItem) -> Result<u64, ProviderError>;
}

/// Record the file size of every item in the batch that does not have one yet.
///
/// Sizes are nice-to-have, so a lookup that keeps failing is logged and skipped rather
/// than failing the batch. Only library errors fail the subtask.
pub async fn fetch_sizes(
    library: &LocalLibrary,
    sizes: &dyn SizeLookup,
    media_item_ids: &[String],
    retry: &RetryPolicy,
) -> Result<FetchSizesOutcome, SubtaskError> {
    let total = media_item_ids.len();
    let items = library
        .get_id_map(media_item_ids.to_vec())
        .await
        .map_err(|e| SubtaskError::failed(format!("{e:#}"), 0, total))?;

    let mut outcome = FetchSizesOutcome::default();
    let mut last_log = Instant::now();

    for (done, id) in media_item_ids.iter().enumerate() {
        match items.get(id) {
            None => outcome.skipped += 1,
            Some(item) if item.size_bytes.is_some() => outcome.already_known += 1,
            Some(item) => match lookup_with_retry(sizes, item, retry).await {
                Some(size) => {
                    library
                        .update_size(id.clone(), size)
                        .await
                        .map_err(|e| SubtaskError::failed(format!("{e:#}"), done, total))?;
                    outcome.sized += 1;
                }
                None => outcome.skipped += 1,
            },
        }

        if last_log.elapsed() > Duration::from_secs(3) {
            tracing::info!("Retrieved sizes for {} of {total} media items", done + 1);
            last_log = Instant::now();
        }
    }

    tracing::info!("Done retrieving sizes for {total} media items");
    Ok(outcome)
}

/// `None` once every attempt has failed. A 429 waits the rate-limit backoff first.
async fn lookup_with_retry(
    sizes: &dyn SizeLookup,
    item: &MediaItem,
    retry: &RetryPolicy,
) -> Option<u64> {
    let mut attempts_left = retry.attempts;
    loop {
        let error = match sizes.content_length(item).await {
            Ok(size) => return Some(size),
            Err(e) => e,
        };
        attempts_left = attempts_left.saturating_sub(1);

        if attempts_left == 0 {
            tracing::warn!(
                media_item = %item.id,
                error = %error,
                "failed to get media item size, skipping"
            );
            return None;
        }

        if error.is_rate_limit() {
            tracing::warn!(
                media_item = %item.id,
                backoff_secs = retry.rate_limit_backoff.as_secs(),
                "rate limited getting media item size, backing off"
            );
            tokio::time::sleep(retry.rate_limit_backoff).await;
        } else {
            tracing::warn!(
                media_item = %item.id,
                error = %error,
                attempts_left,
                "failed to get media item size"
            );
            tokio::time::sleep(retry.delay).await;
        }
    }
}
