//! Data types for batch enrichment.

use crate::config::AiRequestConfig;
use crate::prompts::{PromptTemplate, RenderOptions};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Lifecycle state of a single row task.
///
/// `Pending` is the only non-terminal state; every task moves out of it exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowStatus {
    /// Not yet processed.
    Pending,
    /// Primary input was empty; no request was made.
    Skipped,
    /// The upstream answered and the reply was usable.
    Success,
    /// The upstream call or reply interpretation failed.
    Failed,
    /// Something unexpected broke while processing the row.
    Errored,
}

impl RowStatus {
    /// Whether this status is terminal.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Human-readable label used in the output artifact.
    pub fn label(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Skipped => "Skipped",
            Self::Success => "Success",
            Self::Failed => "Failed",
            Self::Errored => "Errored",
        }
    }
}

impl fmt::Display for RowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Location of a row's result cell in the output artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellRef {
    /// Zero-based data row index.
    pub row: usize,
    /// Zero-based column index of the appended result column.
    pub column: usize,
}

/// One unit of enrichment work, corresponding to one input record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowTask {
    /// Stable row identity into the output.
    pub index: usize,
    /// Named input fields of the record, in column order.
    pub inputs: Vec<(String, String)>,
    /// Value of the primary (content) field.
    pub primary: String,
    /// Value of the secondary (heading) field.
    pub secondary: String,
    /// Where the result is written in the artifact.
    pub output: CellRef,
    /// Current status.
    pub status: RowStatus,
    /// Result text, or a short diagnostic for non-success outcomes.
    pub result: Option<String>,
    /// Structured interpretation of a successful reply, when one was found.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parsed: Option<serde_json::Value>,
    /// Error detail for failed or errored rows.
    pub error: Option<String>,
    /// Number of upstream attempts made for this row.
    pub attempts: u32,
    /// When processing started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the task settled.
    pub finished_at: Option<DateTime<Utc>>,
}

impl RowTask {
    /// Create a pending task.
    pub fn new(
        index: usize,
        inputs: Vec<(String, String)>,
        primary: String,
        secondary: String,
        output: CellRef,
    ) -> Self {
        Self {
            index,
            inputs,
            primary,
            secondary,
            output,
            status: RowStatus::Pending,
            result: None,
            parsed: None,
            error: None,
            attempts: 0,
            started_at: None,
            finished_at: None,
        }
    }

    /// Whether the primary input is empty or whitespace only.
    pub fn has_empty_primary(&self) -> bool {
        self.primary.trim().is_empty()
    }

    /// Whether the task reached a terminal state.
    pub fn is_settled(&self) -> bool {
        self.status.is_terminal()
    }

    /// Mark the task as started.
    pub fn start(&mut self) {
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
    }

    /// Move the task into a terminal state.
    ///
    /// Returns `false` and leaves the task untouched if it already settled or if
    /// `status` is not terminal.
    pub fn settle(&mut self, status: RowStatus, result: Option<String>, error: Option<String>) -> bool {
        if self.is_settled() || !status.is_terminal() {
            warn!(row = self.index, current = %self.status, requested = %status, "Ignoring invalid row transition");
            return false;
        }
        self.status = status;
        self.result = result;
        self.error = error;
        self.start();
        self.finished_at = Some(Utc::now());
        true
    }

    /// Wall-clock processing time, when both timestamps are known.
    pub fn duration(&self) -> Option<Duration> {
        let (start, end) = (self.started_at?, self.finished_at?);
        (end - start).to_std().ok()
    }
}

/// Retry policy for upstream requests.
///
/// This is the single retry policy of the engine: only the AI client adapter retries,
/// the dispatcher never does.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,
    /// Exponential base.
    pub backoff_base: f64,
    /// Multiplier in seconds applied to `backoff_base^attempt`.
    pub backoff_multiplier: f64,
    /// Maximum delay between retries.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: 2.0,
            backoff_multiplier: 1.0,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Create a new retry policy.
    pub fn new(max_retries: u32, backoff_base: f64, backoff_multiplier: f64, max_delay: Duration) -> Self {
        Self { max_retries, backoff_base, backoff_multiplier, max_delay }
    }

    /// Calculate the delay after the failed attempt `attempt` (0-based).
    ///
    /// Uses `backoff_base^attempt * backoff_multiplier` seconds, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let secs = self.backoff_base.powi(attempt as i32) * self.backoff_multiplier;
        if !secs.is_finite() || secs <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }
}

/// Outcome of one call through the AI client adapter, after retries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AiResponse {
    /// Raw reply text (`choices[0].message.content`), empty on failure.
    pub raw_text: String,
    /// Whether the upstream produced a usable reply.
    pub success: bool,
    /// Structured interpretation of the reply, when one was found.
    pub parsed: Option<serde_json::Value>,
    /// Diagnostic for unsuccessful responses.
    pub error: Option<String>,
    /// Upstream attempts made, including the first.
    pub attempts: u32,
}

impl AiResponse {
    /// Successful reply.
    pub fn ok(raw_text: String, attempts: u32) -> Self {
        Self { raw_text, success: true, attempts, ..Self::default() }
    }

    /// Failed call with a diagnostic.
    pub fn failed(error: String, attempts: u32) -> Self {
        Self { error: Some(error), attempts, ..Self::default() }
    }
}

/// A batch of rows to enrich, with everything each row task needs.
#[derive(Debug, Clone)]
pub struct BatchJob {
    /// Ordered row tasks.
    pub tasks: Vec<RowTask>,
    /// Request configuration shared by every task.
    pub request: Arc<AiRequestConfig>,
    /// Concurrency limit for this job.
    pub concurrency: usize,
    /// Template rendered once per row.
    pub template: PromptTemplate,
    /// How unmatched placeholders are handled.
    pub render: RenderOptions,
}

/// Per-status row counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    /// Rows that succeeded.
    pub success: usize,
    /// Rows whose request or reply failed.
    pub failed: usize,
    /// Rows skipped for empty input.
    pub skipped: usize,
    /// Rows that hit an unexpected error.
    pub errored: usize,
}

impl StatusCounts {
    /// Count the statuses of settled tasks.
    pub fn from_tasks<'a>(tasks: impl IntoIterator<Item = &'a RowTask>) -> Self {
        let mut counts = Self::default();
        for task in tasks {
            counts.add(task.status);
        }
        counts
    }

    /// Add one status.
    pub fn add(&mut self, status: RowStatus) {
        match status {
            RowStatus::Success => self.success += 1,
            RowStatus::Failed => self.failed += 1,
            RowStatus::Skipped => self.skipped += 1,
            RowStatus::Errored => self.errored += 1,
            RowStatus::Pending => {}
        }
    }

    /// Total of all terminal statuses.
    pub fn total(&self) -> usize {
        self.success + self.failed + self.skipped + self.errored
    }
}

/// Progress notification emitted as each row settles.
#[derive(Debug, Clone, Copy)]
pub struct RowProgress {
    /// Row that just settled.
    pub index: usize,
    /// Status it settled in.
    pub status: RowStatus,
    /// Rows settled so far.
    pub completed: usize,
    /// Rows in the batch.
    pub total: usize,
}

/// Progress callback function type.
pub type ProgressCallback = Arc<dyn Fn(RowProgress) + Send + Sync>;
