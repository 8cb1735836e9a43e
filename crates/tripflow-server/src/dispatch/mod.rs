//! Sequential job dispatch
//!
//! Accepted events go onto an unbounded in-memory FIFO ([`queue`]) that a
//! single [`worker::DispatchWorker`] drains, launching one external job per
//! event through a [`launcher::JobLauncher`]. Jobs never overlap.
//!
//! ```text
//! POST /ingest-event ─┐
//! POST /ingest-event ─┼─> DispatchQueue ─> DispatchWorker ─> JobLauncher
//! POST /eventbridge  ─┘       (FIFO)        (one at a time)
//! ```

pub mod launcher;
pub mod queue;
pub mod worker;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tripflow_common::IngestionEvent;

use crate::config::JobConfig;
use launcher::JobLauncher;
use queue::{DispatchQueue, QueueClosed};
use worker::{DispatchWorker, WorkerStatus};

/// Handle shared by the HTTP layer
#[derive(Debug, Clone)]
pub struct Dispatcher {
    queue: DispatchQueue,
    status: watch::Receiver<WorkerStatus>,
}

impl Dispatcher {
    /// Spawn the worker and return the producer handle.
    ///
    /// The worker stops once every clone of the returned `Dispatcher` has been
    /// dropped and the queue is drained.
    pub fn start(job: JobConfig, launcher: Arc<dyn JobLauncher>) -> (Self, JoinHandle<()>) {
        let (queue, receiver) = queue::channel();
        let (status_tx, status_rx) = watch::channel(WorkerStatus::default());

        let worker = DispatchWorker::new(receiver, launcher, job, status_tx);
        let handle = tokio::spawn(worker.run());

        (
            Self {
                queue,
                status: status_rx,
            },
            handle,
        )
    }

    /// Queue an event for launch. Returns the queue depth after insertion.
    pub fn submit(&self, event: IngestionEvent) -> Result<usize, QueueClosed> {
        let depth = self.queue.enqueue(event)?;
        tracing::debug!(depth, "Event queued");
        Ok(depth)
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.depth()
    }

    /// Latest worker snapshot
    pub fn worker_status(&self) -> WorkerStatus {
        self.status.borrow().clone()
    }

    /// Subscribe to worker status changes
    pub fn watch_status(&self) -> watch::Receiver<WorkerStatus> {
        self.status.clone()
    }

    /// Wait until no job is running, up to `timeout`.
    ///
    /// Returns `false` if a job was still running when the timeout elapsed.
    /// A stopped worker counts as idle.
    pub async fn wait_for_idle(&self, timeout: Duration) -> bool {
        let mut status = self.status.clone();
        let idle = match tokio::time::timeout(timeout, status.wait_for(|s| s.current.is_none())).await {
            Ok(_) => true,
            Err(_) => false,
        };
        idle
    }
}
