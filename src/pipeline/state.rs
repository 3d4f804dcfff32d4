//! Run-scoped progress record.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// The two steps of a run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    FetchMediaItems,
    ProcessDuplicates,
}

impl Step {
    pub const ALL: [Step; 2] = [Step::FetchMediaItems, Step::ProcessDuplicates];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FetchMediaItems => "fetch_media_items",
            Self::ProcessDuplicates => "process_duplicates",
        }
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepProgress {
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Items fetched, or groups found.
    pub count: Option<usize>,
}

impl StepProgress {
    pub fn is_started(&self) -> bool {
        self.started_at.is_some()
    }

    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }
}

/// Steps with timestamps and counts, plus the latest log line.
///
/// Owned and mutated by the orchestrator only; everyone else sees clones.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineState {
    pub log_message: Option<String>,
    pub steps: BTreeMap<Step, StepProgress>,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self {
            log_message: None,
            steps: Step::ALL
                .iter()
                .map(|&step| (step, StepProgress::default()))
                .collect(),
        }
    }
}

impl PipelineState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step(&self, step: Step) -> &StepProgress {
        // every step is inserted at construction
        &self.steps[&step]
    }

    /// Mark `step` started. A step starts at most once; repeats are ignored.
    pub fn start_step(&mut self, step: Step) {
        let progress = self.steps.entry(step).or_default();
        if progress.is_started() {
            tracing::warn!(%step, "step already started");
            return;
        }
        progress.started_at = Some(Utc::now());
    }

    pub fn complete_step(&mut self, step: Step, count: Option<usize>) {
        let progress = self.steps.entry(step).or_default();
        if progress.is_completed() {
            tracing::warn!(%step, "step already completed");
            return;
        }
        progress.completed_at = Some(Utc::now());
        if count.is_some() {
            progress.count = count;
        }
    }

    pub fn set_log_message(&mut self, message: impl Into<String>) {
        self.log_message = Some(message.into());
    }

    /// Independent copy for observers.
    pub fn snapshot(&self) -> Self {
        self.clone()
    }
}
