//! Error taxonomy for provider calls, clustering inputs, subtasks, and pipeline runs.
//!
//! Per-item transient failures are absorbed near their source (see [`crate::tasks`]).
//! Batch-level and quota failures surface as [`PipelineError`] at the top of a run.

use thiserror::Error;

/// Failure talking to the upstream media provider or the local image cache.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// HTTP 429 from the media provider. Never retried immediately.
    #[error("rate limited by media provider: {0}")]
    RateLimited(String),

    /// 5xx responses and network errors. Retryable a bounded number of times.
    #[error("transient provider error: {0}")]
    Transient(String),

    /// Any other non-success response.
    #[error("provider request failed with HTTP {status}: {message}")]
    Permanent { status: u16, message: String },

    /// HTTP 401. Credentials must be refreshed outside this crate.
    #[error("media provider rejected the access token")]
    Unauthorized,

    /// A 2xx response whose body could not be understood.
    #[error("unexpected response from media provider: {0}")]
    InvalidResponse(String),

    #[error("failed to decode cached image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("image store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProviderError {
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::RateLimited(_))
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) if status.as_u16() == 429 => Self::RateLimited(err.to_string()),
            Some(status) if status.as_u16() == 401 => Self::Unauthorized,
            Some(status) if status.is_server_error() => Self::Transient(err.to_string()),
            Some(status) => Self::Permanent {
                status: status.as_u16(),
                message: err.to_string(),
            },
            None => Self::Transient(err.to_string()),
        }
    }
}

/// Contract violations on clustering inputs. Not retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InputError {
    #[error("no media items to embed")]
    EmptyItems,

    #[error("embeddings have zero dimensions")]
    ZeroDimension,

    #[error("embedding matrix has {rows} rows but {items} media items were supplied")]
    LengthMismatch { items: usize, rows: usize },

    #[error("embedding row {row} has {found} dimensions, expected {expected}")]
    RaggedRows {
        row: usize,
        expected: usize,
        found: usize,
    },
}

/// Why a single subtask failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubtaskFailure {
    /// The provider's quota ran out part-way through the batch.
    RateLimited,
    Failed(String),
}

/// Failure record observed when polling a subtask handle.
///
/// `completed` counts the items the subtask finished before failing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtaskError {
    pub failure: SubtaskFailure,
    pub completed: usize,
    pub total: usize,
}

impl std::fmt::Display for SubtaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.failure {
            SubtaskFailure::RateLimited => write!(
                f,
                "rate limited after {} of {} items",
                self.completed, self.total
            ),
            SubtaskFailure::Failed(msg) => write!(
                f,
                "failed after {} of {} items: {msg}",
                self.completed, self.total
            ),
        }
    }
}

impl std::error::Error for SubtaskError {}

impl SubtaskError {
    pub fn rate_limited(completed: usize, total: usize) -> Self {
        Self {
            failure: SubtaskFailure::RateLimited,
            completed,
            total,
        }
    }

    pub fn failed(message: impl Into<String>, completed: usize, total: usize) -> Self {
        Self {
            failure: SubtaskFailure::Failed(message.into()),
            completed,
            total,
        }
    }

    pub fn is_rate_limit(&self) -> bool {
        self.failure == SubtaskFailure::RateLimited
    }
}

/// Terminal failure of a pipeline run.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(
        "daily media provider quota exceeded: cached images for {completed} of {total} \
         media items. Progress is saved; run again later to resume"
    )]
    QuotaExceeded { completed: usize, total: usize },

    #[error(
        "daily media provider quota exceeded while listing media items: fetched {fetched} so far. \
         Progress is saved; run again later to resume"
    )]
    ListingQuotaExceeded { fetched: usize },

    #[error("{failed} of {total} subtasks failed; check the worker logs for details")]
    SubtasksFailed { failed: usize, total: usize },

    #[error("gave up waiting after {waited_secs}s with {pending} subtasks still pending")]
    WaitTimedOut { pending: usize, waited_secs: u64 },

    #[error("invalid clustering input: {0}")]
    InvalidInput(#[from] InputError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PipelineError {
    /// `true` when the run stopped on the provider's quota and can be resumed later.
    pub fn is_resumable(&self) -> bool {
        match self {
            Self::QuotaExceeded { .. } | Self::ListingQuotaExceeded { .. } => true,
            Self::Provider(e) => e.is_rate_limit(),
            _ => false,
        }
    }
}
