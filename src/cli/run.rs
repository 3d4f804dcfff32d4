use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use photo_dedup::config::DedupConfig;
use photo_dedup::embedding::{self, ImageEmbedder};
use photo_dedup::error::PipelineError;
use photo_dedup::media::LocalLibrary;
use photo_dedup::photos::{FsImageStore, GooglePhotosClient, PhotosLibrarySource, RetryPolicy};
use photo_dedup::pipeline::{
    ChannelProgressSink, Collaborators, DuplicateReport, ImageStore, PipelineOrchestrator,
    ProgressEvent, RunStatus,
};
use photo_dedup::tasks::LocalTaskQueue;

/// Run the full pipeline, showing progress on stderr and writing the report as JSON.
pub async fn run(config: DedupConfig, refresh: bool, output: Option<&Path>) -> Result<()> {
    anyhow::ensure!(
        !config.photos.access_token.is_empty(),
        "no access token configured; set photos.access_token or PHOTO_DEDUP_ACCESS_TOKEN"
    );

    let conn = photo_dedup::db::open_database(config.resolved_db_path())?;
    let library = LocalLibrary::new(conn, config.storage.user_id.clone());
    let retry = RetryPolicy::from(&config.pipeline);

    let client = Arc::new(GooglePhotosClient::new(&config.photos, retry.clone())?);
    let images: Arc<dyn ImageStore> = Arc::new(
        FsImageStore::new(
            config.resolved_image_dir(),
            config.pipeline.image_resolution,
            client.http().clone(),
            retry.clone(),
        )
        .context("failed to create image directory")?,
    );
    let embedder: Arc<dyn ImageEmbedder> =
        Arc::from(embedding::create_embedder(&config.embedding)?);
    tracing::info!(model = embedder.model_name(), "embedding model ready");

    let queue = Arc::new(LocalTaskQueue::new(
        library.clone(),
        Arc::clone(&images),
        client.clone(),
        retry,
        config.pipeline.worker_concurrency,
    ));
    let (progress, mut events) = ChannelProgressSink::channel(64);

    let services = Collaborators {
        source: Arc::new(PhotosLibrarySource::new(client, library)),
        images,
        queue,
        embedder,
        progress: Arc::new(progress),
    };
    let mut orchestrator = PipelineOrchestrator::new(&config, services);
    let run = tokio::spawn(async move { orchestrator.run(refresh).await });

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner} {msg}").expect("valid template"));
    spinner.enable_steady_tick(Duration::from_millis(120));

    let mut finished = None;
    while let Some(event) = events.recv().await {
        match event {
            ProgressEvent::State(state) => {
                if let Some(message) = state.log_message {
                    spinner.set_message(message);
                }
            }
            ProgressEvent::Finished { status, result } => finished = Some((status, result)),
        }
    }
    spinner.finish_and_clear();

    let result = run.await.context("pipeline task panicked")?;
    let report = outcome(finished, result)?;
    write_report(&report, output)?;
    eprintln!("Found {} duplicate groups.", report.groups.len());
    Ok(())
}

/// Settle the run from its `Finished` event, falling back to the task's own result when
/// the event never arrived.
fn outcome(
    finished: Option<(RunStatus, Option<DuplicateReport>)>,
    result: Result<DuplicateReport, PipelineError>,
) -> Result<DuplicateReport> {
    match finished {
        Some((RunStatus::Succeeded { .. }, Some(report))) => Ok(report),
        Some((RunStatus::QuotaExceeded { message, .. }, _)) => bail!(message),
        Some((RunStatus::Failed { message }, _)) => bail!(message),
        _ => Ok(result?),
    }
}

fn write_report(report: &DuplicateReport, output: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    match output {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("failed to write report to {}", path.display()))?;
            eprintln!("Report written to {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use photo_dedup::pipeline::Group;

    fn report_with_one_group() -> DuplicateReport {
        DuplicateReport {
            groups: vec![Group {
                id: "0".into(),
                media_item_ids: vec!["a".into(), "b".into()],
                original_media_item_id: "a".into(),
            }],
            ..Default::default()
        }
    }

    #[test]
    fn finished_event_decides_the_outcome() {
        let finished = Some((RunStatus::Succeeded { groups: 1 }, Some(report_with_one_group())));
        let report = outcome(finished, Ok(DuplicateReport::default())).unwrap();
        assert_eq!(report.groups.len(), 1);

        let failed = Some((
            RunStatus::Failed {
                message: "no embeddings".into(),
            },
            None,
        ));
        let err = outcome(failed, Ok(DuplicateReport::default())).unwrap_err();
        assert_eq!(err.to_string(), "no embeddings");
    }

    #[test]
    fn missing_event_falls_back_to_task_result() {
        let report = outcome(None, Ok(report_with_one_group())).unwrap();
        assert_eq!(report.groups.len(), 1);

        let err = outcome(None, Err(PipelineError::ListingQuotaExceeded { fetched: 7 }))
            .unwrap_err();
        assert!(err.to_string().contains("fetched 7"), "{err}");
    }
}
