//! Fixed-size pool of workers consuming the task queue.
//!
//! Each worker loops: pop an item, stop on [`WorkItem::Stop`], otherwise
//! claim the job in the registry and run its pipeline to completion. One
//! worker owns one job at a time, so `workers` bounds the number of jobs in
//! flight.
//!
//! The pipeline runs in its own task. Whatever happens inside it, an error
//! or a panic, the worker sees it through the task's result and marks the
//! job `FAILED`; a job never stays `RUNNING` because its pipeline blew up.

use crate::job::{Job, JobId};
use crate::queue::{TaskQueue, WorkItem};
use crate::registry::JobRegistry;
use crate::runner::JobRunner;
use futures::future::join_all;
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

/// Running workers and the handles needed to stop them.
pub struct WorkerPool {
    queue: TaskQueue,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `workers` consumers of `queue`.
    pub fn start(
        workers: usize,
        runner: Arc<JobRunner>,
        registry: Arc<JobRegistry>,
        queue: TaskQueue,
    ) -> Self {
        let workers = workers.max(1);
        let handles = (0..workers)
            .map(|n| {
                tokio::spawn(worker_loop(
                    n,
                    Arc::clone(&runner),
                    Arc::clone(&registry),
                    queue.clone(),
                ))
            })
            .collect();
        info!("Started {} workers", workers);
        Self { queue, handles }
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Ask every worker to exit after its current job, then wait up to
    /// `grace` for each.
    ///
    /// One `Stop` is pushed per worker behind whatever is already queued, so
    /// queued jobs are still drained first. Nothing is cancelled: a worker
    /// that outlives the grace period is detached and finishes on its own.
    pub async fn stop(self, grace: Duration) {
        for _ in &self.handles {
            self.queue.push(WorkItem::Stop);
        }

        let waits = self.handles.into_iter().enumerate().map(|(n, handle)| async move {
            match tokio::time::timeout(grace, handle).await {
                Ok(Ok(())) => debug!("Worker {} stopped", n),
                Ok(Err(e)) => error!("Worker {} ended abnormally: {}", n, e),
                Err(_) => warn!("Worker {} still busy after {:?}, detaching", n, grace),
            }
        });
        join_all(waits).await;
        info!("Worker pool stopped");
    }
}

async fn worker_loop(
    n: usize,
    runner: Arc<JobRunner>,
    registry: Arc<JobRegistry>,
    queue: TaskQueue,
) {
    debug!("Worker {} ready", n);
    loop {
        let id = match queue.pop().await {
            WorkItem::Stop => break,
            WorkItem::Job(id) => id,
        };
        let Some(job) = registry.claim(&id).await else {
            continue;
        };
        info!(job_id = %id, worker = n, "Job RUNNING");
        execute(&runner, job).await;
    }
    debug!("Worker {} exiting", n);
}

/// Run one claimed job and convert any escape into `FAILED`.
async fn execute(runner: &Arc<JobRunner>, job: Job) {
    let id: JobId = job.id.clone();
    let task_runner = Arc::clone(runner);
    let outcome = tokio::spawn(async move { task_runner.run(&job).await }).await;

    match outcome {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => runner.fail(&id, &e.to_string()).await,
        Err(e) => runner.fail(&id, &describe_join_error(e)).await,
    }
}

fn describe_join_error(e: JoinError) -> String {
    if !e.is_panic() {
        return "job task was cancelled".to_string();
    }
    let payload: Box<dyn Any + Send> = e.into_panic();
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("pipeline panicked: {}", detail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn panic_payload_is_reported() {
        let err = tokio::spawn(async { panic!("bitmap too large") })
            .await
            .unwrap_err();
        assert_eq!(describe_join_error(err), "pipeline panicked: bitmap too large");
    }

    #[tokio::test]
    async fn formatted_panic_payload() {
        let page = 7;
        let err = tokio::spawn(async move { panic!("page {page} overflow") })
            .await
            .unwrap_err();
        assert_eq!(describe_join_error(err), "pipeline panicked: page 7 overflow");
    }
}
