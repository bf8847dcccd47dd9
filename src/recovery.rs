//! Startup recovery: put interrupted jobs back on the queue.
//!
//! A job that was `PENDING` or `RUNNING` when the previous process exited
//! has no worker any more. Recovery resets it to `PENDING` and enqueues it
//! so the pipeline runs again from page 1. Terminal jobs are left alone.
//!
//! Must run before the worker pool starts consuming and before the service
//! accepts submissions; [`crate::service::JobService::start_with`] enforces
//! that ordering.

use crate::job::JobId;
use crate::queue::TaskQueue;
use crate::registry::JobRegistry;
use tracing::{info, warn};

/// Re-queue every unfinished job, oldest first. Returns how many were queued.
///
/// The whole scan happens under one registry lock and the snapshot is
/// written once at the end, not once per job.
pub async fn recover(registry: &JobRegistry, queue: &TaskQueue) -> usize {
    let mut guard = registry.lock().await;

    let mut unfinished: Vec<(chrono::DateTime<chrono::Utc>, JobId)> = guard
        .jobs()
        .filter(|job| job.status.is_unfinished())
        .map(|job| (job.created_at, job.id.clone()))
        .collect();
    unfinished.sort();

    let mut requeued = 0;
    for (_, id) in unfinished {
        let Some(job) = guard.job_mut(&id) else {
            continue;
        };
        let previous = job.status;
        if let Err(e) = job.reset_to_pending() {
            warn!(job_id = %id, "Skipping recovery: {}", e);
            continue;
        }
        if guard.enqueue(&id, queue) {
            info!(job_id = %id, from = %previous, "Re-queued interrupted job");
            requeued += 1;
        }
    }

    if requeued > 0 {
        guard.persist().await;
        info!("Recovery: {} job(s) re-queued", requeued);
    }
    requeued
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{Job, JobStatus};
    use crate::queue::WorkItem;
    use crate::registry::REGISTRY_FILE;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn job(id: &str, status: JobStatus, age_secs: i64) -> Job {
        let mut j = Job::new(
            JobId::from(id),
            PathBuf::from(format!("/tmp/{id}")),
            PathBuf::from(format!("/tmp/{id}/input.pdf")),
            10,
            2,
        );
        j.status = status;
        j.created_at -= chrono::Duration::seconds(age_secs);
        if status == JobStatus::Done {
            j.result_path = Some(PathBuf::from("/tmp/out.md"));
        }
        j
    }

    #[tokio::test]
    async fn requeues_pending_and_running_oldest_first() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(REGISTRY_FILE);
        let reg = JobRegistry::open(&path).await.unwrap();
        reg.insert(job("running", JobStatus::Running, 30)).await.unwrap();
        reg.insert(job("pending", JobStatus::Pending, 60)).await.unwrap();
        reg.insert(job("done", JobStatus::Done, 90)).await.unwrap();
        reg.insert(job("failed", JobStatus::Failed, 120)).await.unwrap();

        let queue = TaskQueue::new();
        assert_eq!(recover(&reg, &queue).await, 2);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop().await, WorkItem::Job(JobId::from("pending")));
        assert_eq!(queue.pop().await, WorkItem::Job(JobId::from("running")));

        let reloaded = JobRegistry::open(&path).await.unwrap();
        let running = reloaded.get(&JobId::from("running")).await.unwrap();
        assert_eq!(running.status, JobStatus::Pending);
        let done = reloaded.get(&JobId::from("done")).await.unwrap();
        assert_eq!(done.status, JobStatus::Done);
    }

    #[tokio::test]
    async fn second_scan_does_not_double_queue() {
        let dir = TempDir::new().unwrap();
        let reg = JobRegistry::open(dir.path().join(REGISTRY_FILE)).await.unwrap();
        reg.insert(job("a", JobStatus::Running, 0)).await.unwrap();

        let queue = TaskQueue::new();
        assert_eq!(recover(&reg, &queue).await, 1);
        assert_eq!(recover(&reg, &queue).await, 0);
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn nothing_to_recover() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(REGISTRY_FILE);
        let reg = JobRegistry::open(&path).await.unwrap();
        assert_eq!(recover(&reg, &TaskQueue::new()).await, 0);
        assert!(!path.exists(), "empty recovery should not write a snapshot");
    }
}
