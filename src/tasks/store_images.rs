use std::time::{Duration, Instant};

use crate::error::SubtaskError;
use crate::media::LocalLibrary;
use crate::pipeline::subtask::StoreImagesOutcome;
use crate::pipeline::ImageStore;

/// Cache the image of every item in the batch and record its storage key.
///
/// Stops at the first rate limit and reports how many items were cached before it.
/// Any other image-store or library failure fails the batch the same way.
pub async fn store_images(
    library: &LocalLibrary,
    images: &dyn ImageStore,
    media_item_ids: &[String],
) -> Result<StoreImagesOutcome, SubtaskError> {
    let total = media_item_ids.len();
    let items = library
        .get_id_map(media_item_ids.to_vec())
        .await
        .map_err(|e| SubtaskError::failed(format!("{e:#}"), 0, total))?;

    let mut outcome = StoreImagesOutcome::default();
    let mut last_log = Instant::now();

    for id in media_item_ids {
        let Some(item) = items.get(id) else {
            tracing::warn!(media_item = %id, "media item no longer in library, skipping");
            outcome.missing += 1;
            continue;
        };

        let storage_filename = match images.cache(item).await {
            Ok(key) => key,
            Err(e) if e.is_rate_limit() => {
                tracing::warn!(
                    media_item = %id,
                    "rate limited after storing {} of {total} images",
                    outcome.stored
                );
                return Err(SubtaskError::rate_limited(outcome.stored, total));
            }
            Err(e) => {
                return Err(SubtaskError::failed(e.to_string(), outcome.stored, total));
            }
        };

        library
            .update_storage_filename(id.clone(), storage_filename)
            .await
            .map_err(|e| SubtaskError::failed(format!("{e:#}"), outcome.stored, total))?;
        outcome.stored += 1;

        if last_log.elapsed() > Duration::from_secs(3) {
            tracing::info!("Stored images for {} of {total} media items", outcome.stored);
            last_log = Instant::now();
        }
    }

    tracing::info!("Done storing images for {total} media items");
    Ok(outcome)
}
