//! Progress events and the channel-backed sink.
//!
//! The orchestrator pushes a [`ProgressEvent::State`] snapshot on every step transition and
//! log line, then exactly one [`ProgressEvent::Finished`]. Hosts drain the receiver at
//! their own pace; the bounded channel applies backpressure instead of dropping state.

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;

use super::report::DuplicateReport;
use super::state::PipelineState;
use super::ProgressSink;
use crate::error::PipelineError;

/// The three user-visible outcomes of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded { groups: usize },
    /// Partial progress was saved; running again later resumes.
    ///
    /// `total` counts the items known when the quota ran out. A listing cut short only
    /// knows the items fetched so far, so there both counts are equal.
    QuotaExceeded {
        completed: usize,
        total: usize,
        message: String,
    },
    /// Something is broken; the message points at where to look.
    Failed { message: String },
}

impl RunStatus {
    pub fn from_result(result: &Result<DuplicateReport, PipelineError>) -> Self {
        match result {
            Ok(report) => Self::Succeeded {
                groups: report.groups.len(),
            },
            Err(err @ PipelineError::QuotaExceeded { completed, total }) => Self::QuotaExceeded {
                completed: *completed,
                total: *total,
                message: err.to_string(),
            },
            Err(err @ PipelineError::ListingQuotaExceeded { fetched }) => Self::QuotaExceeded {
                completed: *fetched,
                total: *fetched,
                message: err.to_string(),
            },
            Err(err) if err.is_resumable() => Self::QuotaExceeded {
                completed: 0,
                total: 0,
                message: err.to_string(),
            },
            Err(err) => Self::Failed {
                message: err.to_string(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }
}

#[derive(Debug, Clone)]
pub enum ProgressEvent {
    State(PipelineState),
    Finished {
        status: RunStatus,
        /// Present on success.
        result: Option<DuplicateReport>,
    },
}

/// [`ProgressSink`] over a bounded `mpsc` channel.
#[derive(Clone)]
pub struct ChannelProgressSink {
    tx: mpsc::Sender<ProgressEvent>,
}

impl ChannelProgressSink {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ProgressEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl ProgressSink for ChannelProgressSink {
    async fn publish(&self, event: ProgressEvent) {
        // A host that stopped listening must not fail the run.
        if self.tx.send(event).await.is_err() {
            tracing::trace!("progress receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_distinguishes_outcomes() {
        let ok: Result<DuplicateReport, PipelineError> = Ok(DuplicateReport::default());
        assert_eq!(RunStatus::from_result(&ok), RunStatus::Succeeded { groups: 0 });

        let quota = Err(PipelineError::QuotaExceeded {
            completed: 220,
            total: 250,
        });
        match RunStatus::from_result(&quota) {
            RunStatus::QuotaExceeded {
                completed, total, ..
            } => assert_eq!((completed, total), (220, 250)),
            other => panic!("expected quota status, got {other:?}"),
        }

        let listing = Err(PipelineError::ListingQuotaExceeded { fetched: 40 });
        match RunStatus::from_result(&listing) {
            RunStatus::QuotaExceeded {
                completed,
                total,
                message,
            } => {
                assert_eq!((completed, total), (40, 40));
                assert!(message.contains("resume"));
            }
            other => panic!("expected quota status, got {other:?}"),
        }

        let failed = Err(PipelineError::SubtasksFailed { failed: 1, total: 4 });
        assert!(matches!(
            RunStatus::from_result(&failed),
            RunStatus::Failed { .. }
        ));
    }

    #[test]
    fn status_serializes_with_tag() {
        let json = serde_json::to_value(RunStatus::Succeeded { groups: 3 }).unwrap();
        assert_eq!(json["status"], "succeeded");
        assert_eq!(json["groups"], 3);
    }

    #[tokio::test]
    async fn channel_sink_delivers_in_order_and_tolerates_closed_receiver() {
        let (sink, mut rx) = ChannelProgressSink::channel(4);
        sink.publish(ProgressEvent::State(PipelineState::new())).await;
        sink.publish(ProgressEvent::Finished {
            status: RunStatus::Succeeded { groups: 0 },
            result: None,
        })
        .await;

        assert!(matches!(rx.recv().await, Some(ProgressEvent::State(_))));
        assert!(matches!(rx.recv().await, Some(ProgressEvent::Finished { .. })));

        drop(rx);
        sink.publish(ProgressEvent::State(PipelineState::new())).await;
    }
}
