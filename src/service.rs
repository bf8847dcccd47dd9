//! The job service: registry, queue, recovery and workers wired together.
//!
//! [`JobService::start`] is the only way to bring the system up, and it
//! fixes the startup order:
//!
//! 1. load the registry snapshot;
//! 2. re-queue interrupted jobs ([`crate::recovery::recover`]);
//! 3. start the worker pool;
//! 4. return the handle that accepts submissions.
//!
//! Recovery therefore always scans before any new job can be submitted, and
//! before any worker can dequeue.

use crate::config::ServiceConfig;
use crate::error::Pdf2MdError;
use crate::job::{Job, JobId};
use crate::pipeline::batch::batch_count;
use crate::pipeline::input::{sanitize_display_name, stage_source, DocumentSource};
use crate::pipeline::render::Rasterizer;
use crate::pool::WorkerPool;
use crate::queue::TaskQueue;
use crate::recovery::recover;
use crate::registry::JobRegistry;
use crate::runner::{Collaborators, JobRunner};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// File name of every job's staged document inside its working directory.
pub const SOURCE_FILE: &str = "input.pdf";

fn shut_down() -> Pdf2MdError {
    Pdf2MdError::Internal("service is shut down".into())
}

/// A request to convert one document.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub source: DocumentSource,
    /// Pages per generation call; `None` or `0` uses the service default.
    pub batch_size: Option<usize>,
    /// Extra attempts per batch; `None` uses the service default.
    pub retry_limit: Option<u32>,
    /// Name shown to users; defaults to the source's file name.
    pub display_name: Option<String>,
}

impl SubmitRequest {
    pub fn new(source: DocumentSource) -> Self {
        Self {
            source,
            batch_size: None,
            retry_limit: None,
            display_name: None,
        }
    }

    pub fn batch_size(mut self, n: usize) -> Self {
        self.batch_size = Some(n);
        self
    }

    pub fn retry_limit(mut self, n: u32) -> Self {
        self.retry_limit = Some(n);
        self
    }

    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }
}

/// Handle to a running job service.
pub struct JobService {
    config: Arc<ServiceConfig>,
    registry: Arc<JobRegistry>,
    queue: TaskQueue,
    rasterizer: Arc<dyn Rasterizer>,
    pool: Mutex<Option<WorkerPool>>,
    recovered: usize,
}

impl JobService {
    /// Start with pdfium and the configured LLM provider.
    pub async fn start(config: ServiceConfig) -> Result<Self, Pdf2MdError> {
        let config = Arc::new(config);
        let collaborators = Collaborators::production(Arc::clone(&config));
        Self::start_shared(config, collaborators).await
    }

    /// Start with caller-supplied collaborators.
    pub async fn start_with(
        config: ServiceConfig,
        collaborators: Collaborators,
    ) -> Result<Self, Pdf2MdError> {
        Self::start_shared(Arc::new(config), collaborators).await
    }

    async fn start_shared(
        config: Arc<ServiceConfig>,
        collaborators: Collaborators,
    ) -> Result<Self, Pdf2MdError> {
        tokio::fs::create_dir_all(&config.storage_dir)
            .await
            .map_err(|source| Pdf2MdError::WorkDirFailed {
                path: config.storage_dir.clone(),
                source,
            })?;

        let registry = Arc::new(JobRegistry::open(config.registry_path()).await?);
        let queue = TaskQueue::new();
        let recovered = recover(&registry, &queue).await;

        let rasterizer = Arc::clone(&collaborators.rasterizer);
        let runner = Arc::new(JobRunner::new(
            Arc::clone(&config),
            Arc::clone(&registry),
            collaborators,
        ));
        let pool = WorkerPool::start(
            config.workers,
            runner,
            Arc::clone(&registry),
            queue.clone(),
        );

        info!(
            "Job service started: {} workers, storage {}",
            pool.size(),
            config.storage_dir.display()
        );
        Ok(Self {
            config,
            registry,
            queue,
            rasterizer,
            pool: Mutex::new(Some(pool)),
            recovered,
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Jobs re-queued by startup recovery.
    pub fn recovered(&self) -> usize {
        self.recovered
    }

    /// Items currently waiting in the queue.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Accept a document, register it as `PENDING` and queue it.
    ///
    /// # Errors
    /// Validation errors from staging (`FileNotFound`, `NotAPdf`,
    /// `EmptyDocument`, download errors), or `Internal` once
    /// [`shutdown`](Self::shutdown) has run. Nothing is registered in either
    /// case.
    pub async fn submit(&self, request: SubmitRequest) -> Result<JobId, Pdf2MdError> {
        if self.pool.lock().await.is_none() {
            return Err(shut_down());
        }
        let id = JobId::new();
        let work_dir = self.config.job_dir(&id);
        let source_path = work_dir.join(SOURCE_FILE);

        if let Err(e) = stage_source(
            &request.source,
            &source_path,
            self.config.download_timeout_secs,
        )
        .await
        {
            if let Err(cleanup) = tokio::fs::remove_dir_all(&work_dir).await {
                debug!("No work dir to clean up at {}: {}", work_dir.display(), cleanup);
            }
            return Err(e);
        }

        let original_name = request.source.original_name();
        let display_name =
            sanitize_display_name(request.display_name.as_deref().unwrap_or(&original_name));
        let batch_size = request
            .batch_size
            .filter(|n| *n > 0)
            .unwrap_or(self.config.default_batch_size);
        let retry_limit = request
            .retry_limit
            .unwrap_or(self.config.default_retry_limit);

        let page_count = match self.rasterizer.page_count(&source_path).await {
            Ok(n) => Some(n),
            Err(e) => {
                warn!(job_id = %id, "Page count unavailable at submission: {}", e);
                None
            }
        };

        let mut job = Job::new(id.clone(), work_dir, source_path, batch_size, retry_limit);
        job.page_count = page_count;
        job.batches_total = page_count.map(|n| batch_count(n, batch_size));
        job.display_name = display_name;
        job.original_name = original_name;

        // Held until the job is queued, so shutdown's Stop items land behind it.
        let pool = self.pool.lock().await;
        if pool.is_none() {
            drop(pool);
            if let Err(cleanup) = tokio::fs::remove_dir_all(&job.work_dir).await {
                debug!("No work dir to clean up at {}: {}", job.work_dir.display(), cleanup);
            }
            return Err(shut_down());
        }
        self.registry.insert(job).await?;
        self.registry.enqueue(&id, &self.queue).await;
        drop(pool);
        info!(
            job_id = %id,
            "Job PENDING: {} pages, batch size {}, retry limit {}",
            page_count.map_or_else(|| "?".to_string(), |n| n.to_string()),
            batch_size,
            retry_limit
        );
        Ok(id)
    }

    /// Current record for `id`.
    pub async fn status(&self, id: &JobId) -> Option<Job> {
        self.registry.get(id).await
    }

    /// All jobs, newest first.
    pub async fn list(&self) -> Vec<Job> {
        self.registry.list().await
    }

    /// Artifact location of a `DONE` job.
    ///
    /// # Errors
    /// `JobNotFound` for an unknown id, `JobNotFinished` otherwise.
    pub async fn result_path(&self, id: &JobId) -> Result<PathBuf, Pdf2MdError> {
        let job = self
            .registry
            .get(id)
            .await
            .ok_or_else(|| Pdf2MdError::JobNotFound { id: id.to_string() })?;
        job.artifact_path().map(PathBuf::from)
    }

    /// Contents of a `DONE` job's artifact.
    pub async fn read_result(&self, id: &JobId) -> Result<String, Pdf2MdError> {
        let path = self.result_path(id).await?;
        tokio::fs::read_to_string(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Pdf2MdError::FileNotFound { path }
            } else {
                Pdf2MdError::Internal(format!("reading {}: {}", path.display(), e))
            }
        })
    }

    /// Poll until `id` is `DONE` or `FAILED`.
    pub async fn wait_for(&self, id: &JobId, poll: Duration) -> Result<Job, Pdf2MdError> {
        loop {
            let job = self
                .registry
                .get(id)
                .await
                .ok_or_else(|| Pdf2MdError::JobNotFound { id: id.to_string() })?;
            if job.is_terminal() {
                return Ok(job);
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// Stop the workers. Queued jobs are drained first; running jobs are
    /// never interrupted. Calling it twice is harmless; `submit` fails from
    /// here on.
    pub async fn shutdown(&self) {
        let Some(pool) = self.pool.lock().await.take() else {
            return;
        };
        pool.stop(Duration::from_secs(self.config.shutdown_timeout_secs))
            .await;
    }
}
