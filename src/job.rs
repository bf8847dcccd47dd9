//! The job record and its state machine.
//!
//! ```text
//! PENDING --(worker dequeues)--> RUNNING
//! RUNNING --(pipeline succeeds)--> DONE         [terminal]
//! RUNNING --(pipeline fails)-----> FAILED       [terminal]
//! RUNNING --(process restart)----> PENDING      [re-queued by recovery]
//! ```
//!
//! Every status change goes through one of the `mark_*` / `reset_*` methods
//! below so an illegal edge is rejected instead of silently written to the
//! registry.

use crate::error::Pdf2MdError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Opaque, unique job identifier (UUID v4 text).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Allocate a fresh identifier.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for JobId {
    type Err = Pdf2MdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Pdf2MdError::JobNotFound { id: String::new() });
        }
        Ok(Self(s.to_string()))
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Lifecycle state of a [`Job`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Waiting in the task queue.
    Pending,
    /// Owned by a worker.
    Running,
    /// Artifact written; terminal.
    Done,
    /// Pipeline failed; terminal.
    Failed,
}

impl JobStatus {
    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// `Pending → Pending` is accepted because recovery resets every
    /// unfinished job, including ones that never left the queue.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Pending)
                | (Running, Done)
                | (Running, Failed)
                | (Running, Pending)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }

    /// Whether recovery should put a job in this state back on the queue.
    pub fn is_unfinished(self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Running)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Done => "DONE",
            JobStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// One document-to-Markdown conversion request and its tracked progress.
///
/// This is exactly what the registry snapshot stores, so every field must
/// survive a JSON round-trip unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    /// `<workDir>/input.pdf`, owned by this job.
    pub source_path: PathBuf,
    /// `<storage_dir>/<id>/`, owned by this job.
    pub work_dir: PathBuf,
    /// Pages per generation call. Always ≥ 1.
    pub batch_size: usize,
    /// Additional attempts per batch after the first one.
    pub retry_limit: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batches_total: Option<usize>,
    #[serde(default)]
    pub batches_done: usize,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Sanitised name used for downloads.
    pub display_name: String,
    /// Name of the file as the submitter provided it.
    pub original_name: String,
}

impl Job {
    /// Create a fresh `PENDING` job.
    pub fn new(
        id: JobId,
        work_dir: PathBuf,
        source_path: PathBuf,
        batch_size: usize,
        retry_limit: u32,
    ) -> Self {
        Self {
            id,
            status: JobStatus::Pending,
            source_path,
            work_dir,
            batch_size: batch_size.max(1),
            retry_limit,
            page_count: None,
            batches_total: None,
            batches_done: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result_path: None,
            error: None,
            display_name: String::new(),
            original_name: String::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Percentage of batches finished, once the total is known.
    pub fn progress_percent(&self) -> Option<u8> {
        match self.batches_total {
            Some(total) if total > 0 => {
                let pct = self.batches_done.min(total) * 100 / total;
                Some(pct as u8)
            }
            _ => None,
        }
    }

    /// The artifact path, available only once the job is `DONE`.
    pub fn artifact_path(&self) -> Result<&Path, Pdf2MdError> {
        match (self.status, self.result_path.as_deref()) {
            (JobStatus::Done, Some(path)) => Ok(path),
            (status, _) => Err(Pdf2MdError::JobNotFinished {
                id: self.id.to_string(),
                status,
            }),
        }
    }

    /// `PENDING → RUNNING` at dequeue time.
    ///
    /// A requeued job restarts from page 1, so the batch counter restarts
    /// with it. `started_at` keeps the first run's timestamp.
    pub fn mark_running(&mut self) -> Result<(), Pdf2MdError> {
        self.transition(JobStatus::Running)?;
        self.batches_done = 0;
        Ok(())
    }

    /// Record the start of pipeline work; a no-op on later runs.
    pub fn mark_started(&mut self) {
        self.started_at.get_or_insert_with(Utc::now);
    }

    /// Record one more finished batch out of `total`.
    pub fn record_batch(&mut self, total: usize) {
        self.batches_total = Some(total);
        self.batches_done = (self.batches_done + 1).min(total);
    }

    /// `RUNNING → DONE`.
    pub fn mark_done(&mut self, result_path: PathBuf) -> Result<(), Pdf2MdError> {
        self.transition(JobStatus::Done)?;
        self.result_path = Some(result_path);
        self.error = None;
        self.completed_at.get_or_insert_with(Utc::now);
        Ok(())
    }

    /// `RUNNING → FAILED`, capturing the error text verbatim.
    pub fn mark_failed(&mut self, error: impl Into<String>) -> Result<(), Pdf2MdError> {
        self.transition(JobStatus::Failed)?;
        let error = error.into();
        self.error = Some(if error.is_empty() {
            "unknown error".to_string()
        } else {
            error
        });
        self.result_path = None;
        self.completed_at.get_or_insert_with(Utc::now);
        Ok(())
    }

    /// `PENDING | RUNNING → PENDING`, used only by recovery.
    pub fn reset_to_pending(&mut self) -> Result<(), Pdf2MdError> {
        self.transition(JobStatus::Pending)
    }

    fn transition(&mut self, to: JobStatus) -> Result<(), Pdf2MdError> {
        if !self.status.can_transition_to(to) {
            return Err(Pdf2MdError::InvalidTransition {
                id: self.id.to_string(),
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }
}
