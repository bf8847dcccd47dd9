//! Unbounded FIFO of work for the worker pool.
//!
//! Stop requests travel on the same channel as real work, as a distinct
//! [`WorkItem::Stop`] variant, so a worker drains everything queued ahead of
//! its stop signal before exiting.
//!
//! The queue does not deduplicate. Callers push job ids through
//! [`crate::registry::JobRegistry::enqueue`], which guarantees at most one
//! outstanding entry per job.

use crate::job::JobId;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// One entry in the [`TaskQueue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkItem {
    /// Run the pipeline for this job.
    Job(JobId),
    /// The receiving worker should exit.
    Stop,
}

/// Multi-producer, multi-consumer FIFO of [`WorkItem`]s.
///
/// Cloning is cheap; all clones share the same channel.
#[derive(Clone)]
pub struct TaskQueue {
    tx: mpsc::UnboundedSender<WorkItem>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<WorkItem>>>,
    depth: Arc<AtomicUsize>,
}

impl TaskQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            depth: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Append an item. Never blocks.
    pub fn push(&self, item: WorkItem) {
        // Count first: a consumer may receive the item before `send` returns.
        self.depth.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(item).is_err() {
            self.depth.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Wait for the next item.
    ///
    /// Consumers take turns on the receiver: the first waiter gets the
    /// next item, the rest wait behind it.
    pub async fn pop(&self) -> WorkItem {
        let mut rx = self.rx.lock().await;
        // `self.tx` keeps the channel open, so `recv` only returns `None`
        // if every sender has gone, which cannot happen while we hold one.
        match rx.recv().await {
            Some(item) => {
                self.depth.fetch_sub(1, Ordering::SeqCst);
                item
            }
            None => WorkItem::Stop,
        }
    }

    /// Number of items currently waiting.
    pub fn len(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}
