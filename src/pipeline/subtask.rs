//! Subtask handles and failure classification.
//!
//! A dispatched job comes back as a [`Subtask`], one variant per kind, each wrapping a
//! [`SubtaskHandle`] typed by that kind's outcome. Workers report through a
//! `tokio::sync::watch` channel, so polling a handle never blocks. Once every handle is
//! terminal, [`classify_reports`] turns the collected reports into the run's verdict.

use serde::Serialize;
use tokio::sync::watch;
use uuid::Uuid;

use crate::error::{PipelineError, SubtaskError};

/// Work the orchestrator can fan out for one batch of media items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubtaskJob {
    StoreImages { media_item_ids: Vec<String> },
    FetchSizes { media_item_ids: Vec<String> },
}

impl SubtaskJob {
    pub fn kind(&self) -> SubtaskKind {
        match self {
            Self::StoreImages { .. } => SubtaskKind::StoreImages,
            Self::FetchSizes { .. } => SubtaskKind::FetchSizes,
        }
    }

    pub fn media_item_ids(&self) -> &[String] {
        match self {
            Self::StoreImages { media_item_ids } | Self::FetchSizes { media_item_ids } => {
                media_item_ids
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskKind {
    StoreImages,
    FetchSizes,
}

impl SubtaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StoreImages => "store_images",
            Self::FetchSizes => "fetch_sizes",
        }
    }
}

impl std::fmt::Display for SubtaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreImagesOutcome {
    /// Items whose image is now cached.
    pub stored: usize,
    /// Ids that were no longer in the library when the worker ran.
    pub missing: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchSizesOutcome {
    pub sized: usize,
    /// Already had a size from an earlier run.
    pub already_known: usize,
    /// Lookups that failed every attempt and were skipped.
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubtaskStatus<T> {
    Pending,
    Running,
    Succeeded(T),
    Failed(SubtaskError),
}

impl<T> SubtaskStatus<T> {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded(_) | Self::Failed(_))
    }
}

/// Pollable view of one subtask.
#[derive(Debug, Clone)]
pub struct SubtaskHandle<T> {
    id: Uuid,
    total: usize,
    rx: watch::Receiver<SubtaskStatus<T>>,
}

/// Create a pending handle for a subtask over `total` items, plus the sender the worker
/// reports through.
pub fn channel<T>(total: usize) -> (watch::Sender<SubtaskStatus<T>>, SubtaskHandle<T>) {
    let (tx, rx) = watch::channel(SubtaskStatus::Pending);
    let handle = SubtaskHandle {
        id: Uuid::now_v7(),
        total,
        rx,
    };
    (tx, handle)
}

impl<T: Clone> SubtaskHandle<T> {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Number of media items the subtask was given.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Current status. A worker that went away without a terminal status counts as failed.
    pub fn status(&self) -> SubtaskStatus<T> {
        let current = self.rx.borrow().clone();
        if current.is_terminal() || self.rx.has_changed().is_ok() {
            return current;
        }
        // The sender is gone, so whatever it sent last is final.
        let last = self.rx.borrow().clone();
        if last.is_terminal() {
            return last;
        }
        SubtaskStatus::Failed(SubtaskError::failed(
            "worker exited without reporting a result",
            0,
            self.total,
        ))
    }

    pub fn is_done(&self) -> bool {
        self.status().is_terminal()
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status(), SubtaskStatus::Failed(_))
    }

    pub fn error(&self) -> Option<SubtaskError> {
        match self.status() {
            SubtaskStatus::Failed(e) => Some(e),
            _ => None,
        }
    }

    pub fn outcome(&self) -> Option<T> {
        match self.status() {
            SubtaskStatus::Succeeded(outcome) => Some(outcome),
            _ => None,
        }
    }
}

/// A dispatched subtask, tagged by kind.
#[derive(Debug, Clone)]
pub enum Subtask {
    StoreImages(SubtaskHandle<StoreImagesOutcome>),
    FetchSizes(SubtaskHandle<FetchSizesOutcome>),
}

impl Subtask {
    pub fn kind(&self) -> SubtaskKind {
        match self {
            Self::StoreImages(_) => SubtaskKind::StoreImages,
            Self::FetchSizes(_) => SubtaskKind::FetchSizes,
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            Self::StoreImages(h) => h.id(),
            Self::FetchSizes(h) => h.id(),
        }
    }

    pub fn is_done(&self) -> bool {
        match self {
            Self::StoreImages(h) => h.is_done(),
            Self::FetchSizes(h) => h.is_done(),
        }
    }

    pub fn is_failed(&self) -> bool {
        match self {
            Self::StoreImages(h) => h.is_failed(),
            Self::FetchSizes(h) => h.is_failed(),
        }
    }

    pub fn error(&self) -> Option<SubtaskError> {
        match self {
            Self::StoreImages(h) => h.error(),
            Self::FetchSizes(h) => h.error(),
        }
    }

    /// Snapshot for classification. Meaningful once [`Subtask::is_done`] is true.
    pub fn report(&self) -> SubtaskReport {
        let (total, completed, error) = match self {
            Self::StoreImages(h) => match h.status() {
                SubtaskStatus::Succeeded(o) => (h.total(), o.stored, None),
                SubtaskStatus::Failed(e) => (h.total(), e.completed, Some(e)),
                _ => (h.total(), 0, None),
            },
            Self::FetchSizes(h) => match h.status() {
                SubtaskStatus::Succeeded(_) => (h.total(), h.total(), None),
                SubtaskStatus::Failed(e) => (h.total(), e.completed, Some(e)),
                _ => (h.total(), 0, None),
            },
        };
        SubtaskReport {
            kind: self.kind(),
            total,
            completed,
            error,
        }
    }
}

/// What a finished subtask contributed, independent of how it ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtaskReport {
    pub kind: SubtaskKind,
    pub total: usize,
    pub completed: usize,
    pub error: Option<SubtaskError>,
}

impl SubtaskReport {
    pub fn succeeded(kind: SubtaskKind, total: usize, completed: usize) -> Self {
        Self {
            kind,
            total,
            completed,
            error: None,
        }
    }

    pub fn failed(kind: SubtaskKind, error: SubtaskError) -> Self {
        Self {
            kind,
            total: error.total,
            completed: error.completed,
            error: Some(error),
        }
    }
}

/// Decide a run's fate from its finished subtasks.
///
/// Any rate-limited failure makes the whole run [`PipelineError::QuotaExceeded`], counting
/// cached images across every image-caching subtask. Other failures yield
/// [`PipelineError::SubtasksFailed`]. No failures means the run may continue.
pub fn classify_reports(reports: &[SubtaskReport]) -> Result<(), PipelineError> {
    let failed = reports.iter().filter(|r| r.error.is_some()).count();
    if failed == 0 {
        return Ok(());
    }

    let rate_limited = reports
        .iter()
        .filter_map(|r| r.error.as_ref())
        .any(SubtaskError::is_rate_limit);

    if rate_limited {
        let (completed, total) = reports
            .iter()
            .filter(|r| r.kind == SubtaskKind::StoreImages)
            .fold((0, 0), |(done, all), r| (done + r.completed, all + r.total));
        return Err(PipelineError::QuotaExceeded { completed, total });
    }

    Err(PipelineError::SubtasksFailed {
        failed,
        total: reports.len(),
    })
}
