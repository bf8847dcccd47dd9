//! Progress-callback trait for job and batch events.
//!
//! Inject an [`Arc<dyn JobProgressCallback>`] via
//! [`crate::config::ServiceConfigBuilder::progress_callback`] to observe the
//! pipeline as workers move through jobs.
//!
//! Callbacks complement the registry rather than replace it: the registry's
//! `batches_done` / `batches_total` fields are what pollers read, while a
//! callback lets a host push the same events to a terminal progress bar or
//! a WebSocket without polling.
//!
//! # Example
//!
//! ```rust
//! use edgequake_pdf2md_jobs::{JobId, JobProgressCallback, ServiceConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct BatchCounter(AtomicUsize);
//!
//! impl JobProgressCallback for BatchCounter {
//!     fn on_batch_complete(&self, _job: &JobId, done: usize, total: usize, _attempts: u32) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("batch {done}/{total}");
//!     }
//! }
//!
//! let config = ServiceConfig::builder()
//!     .progress_callback(Arc::new(BatchCounter(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use crate::job::JobId;
use std::path::Path;
use std::sync::Arc;

/// Called by workers as they process jobs.
///
/// Implementations must be `Send + Sync`: several workers run at once and
/// each calls into the same callback. Events for one job arrive in order;
/// events for different jobs interleave freely.
pub trait JobProgressCallback: Send + Sync {
    /// Called once the job's pages are rendered and batched.
    ///
    /// # Arguments
    /// * `job`: job id
    /// * `page_count`: pages rendered
    /// * `batches_total`: generation calls that will be made (excluding retries)
    fn on_job_start(&self, job: &JobId, page_count: usize, batches_total: usize) {
        let _ = (job, page_count, batches_total);
    }

    /// Called after each batch is appended, whether it produced output or a
    /// placeholder.
    ///
    /// # Arguments
    /// * `done`: batches finished so far (1-based)
    /// * `total`: batches in the job
    /// * `attempts`: generation calls spent on this batch
    fn on_batch_complete(&self, job: &JobId, done: usize, total: usize, attempts: u32) {
        let _ = (job, done, total, attempts);
    }

    /// Called when a batch exhausted its attempts and was replaced by the
    /// placeholder. Followed by `on_batch_complete` for the same batch.
    fn on_batch_exhausted(&self, job: &JobId, batch: usize, total: usize, error: &str) {
        let _ = (job, batch, total, error);
    }

    /// Called once the artifact is written and the job is `DONE`.
    fn on_job_complete(&self, job: &JobId, result_path: &Path) {
        let _ = (job, result_path);
    }

    /// Called once the job is `FAILED`.
    fn on_job_failed(&self, job: &JobId, error: &str) {
        let _ = (job, error);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl JobProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ServiceConfig`].
pub type ProgressCallback = Arc<dyn JobProgressCallback>;
