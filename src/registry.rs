//! Durable job registry: the single source of truth for job state.
//!
//! ## Locking and durability
//!
//! All jobs live in one map behind one [`tokio::sync::Mutex`]. Every mutation
//! takes the lock, applies the change, and rewrites the whole JSON snapshot
//! *before* releasing it. A status that a poller can observe has therefore
//! always been written to disk first.
//!
//! A failed snapshot write is logged and otherwise ignored: the in-memory map
//! stays authoritative for the rest of the run. After a crash the worst case
//! is lost progress counters, never a lost job, because recovery re-queues
//! anything that was not terminal.
//!
//! ## Duplicate dispatch
//!
//! The registry also owns the set of job ids that currently sit in the
//! [`TaskQueue`]. [`JobRegistry::enqueue`] checks and updates that set under
//! the same lock before pushing, and [`JobRegistry::claim`] clears it when a
//! worker picks the job up, so a job can never be queued twice at once.

use crate::error::Pdf2MdError;
use crate::job::{Job, JobId, JobStatus};
use crate::queue::{TaskQueue, WorkItem};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

/// Default snapshot file name inside the storage directory.
pub const REGISTRY_FILE: &str = "jobs.json";

#[derive(Default)]
struct RegistryState {
    jobs: BTreeMap<JobId, Job>,
    queued: HashSet<JobId>,
}

/// In-memory job map mirrored to a JSON snapshot on every mutation.
pub struct JobRegistry {
    path: PathBuf,
    state: Mutex<RegistryState>,
}

impl JobRegistry {
    /// Load the snapshot at `path`, or start empty if it does not exist yet.
    ///
    /// # Errors
    /// [`Pdf2MdError::RegistryLoad`] if the file exists but cannot be read
    /// or parsed. Refusing to start is preferable to overwriting a registry
    /// we failed to understand with an empty one.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, Pdf2MdError> {
        let path = path.into();
        let jobs = match tokio::fs::read(&path).await {
            Ok(bytes) => parse_snapshot(&path, &bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No registry snapshot at {}, starting empty", path.display());
                BTreeMap::new()
            }
            Err(e) => {
                return Err(Pdf2MdError::RegistryLoad {
                    path,
                    detail: e.to_string(),
                })
            }
        };

        info!("Loaded {} jobs from {}", jobs.len(), path.display());
        Ok(Self {
            path,
            state: Mutex::new(RegistryState {
                jobs,
                queued: HashSet::new(),
            }),
        })
    }

    /// Location of the durable snapshot.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A copy of the job record, if it exists.
    pub async fn get(&self, id: &JobId) -> Option<Job> {
        self.state.lock().await.jobs.get(id).cloned()
    }

    /// All jobs, most recently created first.
    pub async fn list(&self) -> Vec<Job> {
        let state = self.state.lock().await;
        let mut jobs: Vec<Job> = state.jobs.values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        jobs
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.jobs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Register a freshly submitted job and persist.
    pub async fn insert(&self, job: Job) -> Result<(), Pdf2MdError> {
        let mut state = self.state.lock().await;
        if state.jobs.contains_key(&job.id) {
            return Err(Pdf2MdError::Internal(format!(
                "job id {} is already registered",
                job.id
            )));
        }
        state.jobs.insert(job.id.clone(), job);
        self.persist(&state.jobs).await;
        Ok(())
    }

    /// Apply `mutate` to one job under the lock, then persist the snapshot.
    ///
    /// # Errors
    /// [`Pdf2MdError::JobNotFound`] if no such job exists.
    pub async fn update<F, R>(&self, id: &JobId, mutate: F) -> Result<R, Pdf2MdError>
    where
        F: FnOnce(&mut Job) -> R,
    {
        self.try_update(id, |job| Ok(mutate(job))).await
    }

    /// Like [`update`](Self::update) for mutations that can be rejected,
    /// such as status transitions. A rejected mutation is not persisted.
    pub async fn try_update<F, R>(&self, id: &JobId, mutate: F) -> Result<R, Pdf2MdError>
    where
        F: FnOnce(&mut Job) -> Result<R, Pdf2MdError>,
    {
        let mut state = self.state.lock().await;
        let job = state
            .jobs
            .get_mut(id)
            .ok_or_else(|| Pdf2MdError::JobNotFound { id: id.to_string() })?;
        let out = mutate(job)?;
        self.persist(&state.jobs).await;
        Ok(out)
    }

    /// Push `id` onto `queue` unless it is already waiting there.
    ///
    /// Only `PENDING` jobs are accepted. Returns whether an entry was pushed.
    pub async fn enqueue(&self, id: &JobId, queue: &TaskQueue) -> bool {
        let mut guard = self.lock().await;
        guard.enqueue(id, queue)
    }

    /// Take ownership of a dequeued job: `PENDING → RUNNING`, persisted.
    ///
    /// Returns `None` when the entry is stale (job unknown or no longer
    /// `PENDING`); the worker should skip it.
    pub async fn claim(&self, id: &JobId) -> Option<Job> {
        let mut state = self.state.lock().await;
        state.queued.remove(id);

        let Some(job) = state.jobs.get_mut(id) else {
            warn!(job_id = %id, "Dequeued unknown job, skipping");
            return None;
        };
        if job.status != JobStatus::Pending {
            warn!(job_id = %id, status = %job.status, "Dequeued job is not PENDING, skipping");
            return None;
        }
        if let Err(e) = job.mark_running() {
            warn!(job_id = %id, "Cannot start job: {}", e);
            return None;
        }
        let claimed = job.clone();
        self.persist(&state.jobs).await;
        Some(claimed)
    }

    /// Whether `id` currently has an outstanding queue entry.
    pub async fn is_queued(&self, id: &JobId) -> bool {
        self.state.lock().await.queued.contains(id)
    }

    /// Hold the registry lock across a multi-job operation.
    ///
    /// Nothing is persisted until [`RegistryGuard::persist`] is called.
    pub(crate) async fn lock(&self) -> RegistryGuard<'_> {
        RegistryGuard {
            registry: self,
            state: self.state.lock().await,
        }
    }

    /// Write the snapshot; failures are logged, never returned.
    async fn persist(&self, jobs: &BTreeMap<JobId, Job>) {
        if let Err(e) = write_snapshot(&self.path, jobs).await {
            error!("{}", e);
        }
    }
}

/// Exclusive access to the registry for a multi-job operation.
pub(crate) struct RegistryGuard<'a> {
    registry: &'a JobRegistry,
    state: MutexGuard<'a, RegistryState>,
}

impl RegistryGuard<'_> {
    pub(crate) fn jobs(&self) -> impl Iterator<Item = &Job> + '_ {
        self.state.jobs.values()
    }

    pub(crate) fn job_mut(&mut self, id: &JobId) -> Option<&mut Job> {
        self.state.jobs.get_mut(id)
    }

    pub(crate) fn enqueue(&mut self, id: &JobId, queue: &TaskQueue) -> bool {
        match self.state.jobs.get(id) {
            Some(job) if job.status == JobStatus::Pending => {}
            Some(job) => {
                debug!(job_id = %id, status = %job.status, "Not enqueueing non-pending job");
                return false;
            }
            None => return false,
        }
        if !self.state.queued.insert(id.clone()) {
            debug!(job_id = %id, "Job already queued");
            return false;
        }
        queue.push(WorkItem::Job(id.clone()));
        true
    }

    pub(crate) async fn persist(&self) {
        self.registry.persist(&self.state.jobs).await;
    }
}

fn parse_snapshot(path: &Path, bytes: &[u8]) -> Result<BTreeMap<JobId, Job>, Pdf2MdError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(BTreeMap::new());
    }
    let raw: BTreeMap<JobId, Job> =
        serde_json::from_slice(bytes).map_err(|e| Pdf2MdError::RegistryLoad {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;

    // The record's own id wins over its map key.
    Ok(raw
        .into_values()
        .map(|job| (job.id.clone(), job))
        .collect())
}

/// Atomic snapshot write: temp file in the same directory, then rename.
async fn write_snapshot(path: &Path, jobs: &BTreeMap<JobId, Job>) -> Result<(), Pdf2MdError> {
    let persist_err = |source| Pdf2MdError::RegistryPersist {
        path: path.to_path_buf(),
        source,
    };

    let json = serde_json::to_vec_pretty(jobs)
        .map_err(|e| persist_err(std::io::Error::other(e)))?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.map_err(persist_err)?;
        }
    }

    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, &json).await.map_err(persist_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(persist_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn job(id: &str) -> Job {
        Job::new(
            JobId::from(id),
            PathBuf::from(format!("/tmp/{id}")),
            PathBuf::from(format!("/tmp/{id}/input.pdf")),
            10,
            2,
        )
    }

    #[tokio::test]
    async fn missing_snapshot_starts_empty() {
        let dir = TempDir::new().unwrap();
        let reg = JobRegistry::open(dir.path().join(REGISTRY_FILE)).await.unwrap();
        assert!(reg.is_empty().await);
    }

    #[tokio::test]
    async fn corrupt_snapshot_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(REGISTRY_FILE);
        std::fs::write(&path, b"{ not json").unwrap();
        let err = JobRegistry::open(&path).await.err().expect("should fail");
        assert!(matches!(err, Pdf2MdError::RegistryLoad { .. }));
    }

    #[tokio::test]
    async fn every_mutation_is_written_through() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(REGISTRY_FILE);
        let reg = JobRegistry::open(&path).await.unwrap();

        reg.insert(job("a")).await.unwrap();
        let on_disk = JobRegistry::open(&path).await.unwrap();
        assert!(on_disk.get(&JobId::from("a")).await.is_some());

        reg.update(&JobId::from("a"), |j| j.page_count = Some(7))
            .await
            .unwrap();
        let on_disk = JobRegistry::open(&path).await.unwrap();
        assert_eq!(
            on_disk.get(&JobId::from("a")).await.unwrap().page_count,
            Some(7)
        );
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn failed_persist_keeps_in_memory_change() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();
        let reg = JobRegistry::open(blocker.join(REGISTRY_FILE)).await.unwrap();

        reg.insert(job("a")).await.unwrap();
        reg.update(&JobId::from("a"), |j| j.batches_done = 1)
            .await
            .unwrap();
        assert_eq!(reg.get(&JobId::from("a")).await.unwrap().batches_done, 1);
    }

    #[tokio::test]
    async fn update_unknown_job() {
        let dir = TempDir::new().unwrap();
        let reg = JobRegistry::open(dir.path().join(REGISTRY_FILE)).await.unwrap();
        let err = reg.update(&JobId::from("nope"), |_| ()).await.unwrap_err();
        assert!(matches!(err, Pdf2MdError::JobNotFound { .. }));
    }

    #[tokio::test]
    async fn rejected_transition_leaves_job_untouched() {
        let dir = TempDir::new().unwrap();
        let reg = JobRegistry::open(dir.path().join(REGISTRY_FILE)).await.unwrap();
        reg.insert(job("a")).await.unwrap();

        let err = reg
            .try_update(&JobId::from("a"), |j| j.mark_done(PathBuf::from("x")))
            .await
            .unwrap_err();
        assert!(matches!(err, Pdf2MdError::InvalidTransition { .. }));
        let j = reg.get(&JobId::from("a")).await.unwrap();
        assert_eq!(j.status, JobStatus::Pending);
        assert!(j.result_path.is_none());
    }

    #[tokio::test]
    async fn enqueue_is_at_most_once_until_claimed() {
        let dir = TempDir::new().unwrap();
        let reg = JobRegistry::open(dir.path().join(REGISTRY_FILE)).await.unwrap();
        let queue = TaskQueue::new();
        let id = JobId::from("a");
        reg.insert(job("a")).await.unwrap();

        assert!(reg.enqueue(&id, &queue).await);
        assert!(!reg.enqueue(&id, &queue).await);
        assert_eq!(queue.len(), 1);
        assert!(reg.is_queued(&id).await);

        assert_eq!(queue.pop().await, WorkItem::Job(id.clone()));
        let claimed = reg.claim(&id).await.expect("claim");
        assert_eq!(claimed.status, JobStatus::Running);
        assert!(!reg.is_queued(&id).await);

        // RUNNING jobs are not re-queued outside recovery.
        assert!(!reg.enqueue(&id, &queue).await);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn stale_claim_is_skipped() {
        let dir = TempDir::new().unwrap();
        let reg = JobRegistry::open(dir.path().join(REGISTRY_FILE)).await.unwrap();
        reg.insert(job("a")).await.unwrap();
        let id = JobId::from("a");

        assert!(reg.claim(&id).await.is_some());
        assert!(reg.claim(&id).await.is_none());
        assert!(reg.claim(&JobId::from("ghost")).await.is_none());
    }

    #[tokio::test]
    async fn list_is_newest_first() {
        let dir = TempDir::new().unwrap();
        let reg = JobRegistry::open(dir.path().join(REGISTRY_FILE)).await.unwrap();
        let mut old = job("old");
        old.created_at -= chrono::Duration::seconds(60);
        reg.insert(old).await.unwrap();
        reg.insert(job("new")).await.unwrap();

        let ids: Vec<String> = reg.list().await.into_iter().map(|j| j.id.to_string()).collect();
        assert_eq!(ids, vec!["new", "old"]);
    }
}
