//! In-process FIFO of accepted ingestion events
//!
//! The queue is unbounded and lives only in memory: events accepted but not
//! yet launched are lost if the process dies. There is exactly one
//! [`DispatchReceiver`], owned by the dispatch worker.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::mpsc;
use tripflow_common::IngestionEvent;

/// The worker side of the queue has shut down
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("dispatch queue is closed")]
pub struct QueueClosed;

/// An accepted event waiting for its job launch
#[derive(Debug, Clone)]
pub struct QueuedEvent {
    /// Arrival order, starting at 1
    pub sequence: u64,
    pub accepted_at: DateTime<Utc>,
    pub event: IngestionEvent,
}

/// Producer handle, cloned into every request handler
#[derive(Debug, Clone)]
pub struct DispatchQueue {
    tx: mpsc::UnboundedSender<QueuedEvent>,
    depth: Arc<AtomicUsize>,
    // Held across sequence assignment and send so sequence order is channel order
    next_sequence: Arc<Mutex<u64>>,
}

/// Consumer handle for the single dispatch worker
#[derive(Debug)]
pub struct DispatchReceiver {
    rx: mpsc::UnboundedReceiver<QueuedEvent>,
    depth: Arc<AtomicUsize>,
}

/// Create a connected queue pair
pub fn channel() -> (DispatchQueue, DispatchReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let depth = Arc::new(AtomicUsize::new(0));

    (
        DispatchQueue {
            tx,
            depth: depth.clone(),
            next_sequence: Arc::new(Mutex::new(0)),
        },
        DispatchReceiver { rx, depth },
    )
}

impl DispatchQueue {
    /// Append an event. Returns the number of events waiting, this one included.
    pub fn enqueue(&self, event: IngestionEvent) -> Result<usize, QueueClosed> {
        let mut next_sequence = self
            .next_sequence
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let item = QueuedEvent {
            sequence: *next_sequence + 1,
            accepted_at: Utc::now(),
            event,
        };

        // Count before sending so the receiver can never observe a negative depth
        let depth = self.depth.fetch_add(1, Ordering::SeqCst) + 1;
        if self.tx.send(item).is_err() {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            return Err(QueueClosed);
        }

        *next_sequence += 1;
        Ok(depth)
    }

    /// Events accepted but not yet picked up by the worker
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }
}

impl DispatchReceiver {
    /// Wait for the next event. `None` once every producer is dropped.
    pub async fn dequeue(&mut self) -> Option<QueuedEvent> {
        let item = self.rx.recv().await?;
        self.depth.fetch_sub(1, Ordering::SeqCst);
        Some(item)
    }
}
