//! Single-flight job worker
//!
//! Exactly one [`DispatchWorker`] owns the receiving half of the dispatch
//! queue. It launches one job per event and waits for that job to exit before
//! dequeuing the next event, so at most one job is running at any time.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, info, warn};

use super::launcher::{JobLauncher, JobSpec};
use super::queue::{DispatchReceiver, QueuedEvent};
use crate::config::JobConfig;

/// Where the worker is in its loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// Waiting for the next event
    Idle,
    /// Building the command line and spawning the job
    Launching,
    /// Job spawned, forwarding output until it exits
    Running,
}

/// Snapshot published after every state change
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerStatus {
    pub state: WorkerState,
    /// Jobs successfully spawned
    pub launched: u64,
    /// Jobs that could not be spawned, exited non-zero or were lost
    pub failed: u64,
    pub last_exit_code: Option<i32>,
    /// Input URI of the job being launched or run
    pub current: Option<String>,
}

impl Default for WorkerStatus {
    fn default() -> Self {
        Self {
            state: WorkerState::Idle,
            launched: 0,
            failed: 0,
            last_exit_code: None,
            current: None,
        }
    }
}

pub struct DispatchWorker {
    receiver: DispatchReceiver,
    launcher: Arc<dyn JobLauncher>,
    job: JobConfig,
    status: watch::Sender<WorkerStatus>,
}

impl DispatchWorker {
    pub fn new(
        receiver: DispatchReceiver,
        launcher: Arc<dyn JobLauncher>,
        job: JobConfig,
        status: watch::Sender<WorkerStatus>,
    ) -> Self {
        Self {
            receiver,
            launcher,
            job,
            status,
        }
    }

    /// Drain the queue until every sender is gone
    pub async fn run(mut self) {
        info!("Dispatch worker started");

        while let Some(queued) = self.receiver.dequeue().await {
            self.process(queued).await;
        }

        info!("Dispatch queue closed, worker stopping");
    }

    async fn process(&mut self, queued: QueuedEvent) {
        let spec = JobSpec::for_event(&self.job, &queued.event);
        let input = spec.input.clone();

        self.status.send_modify(|s| {
            s.state = WorkerState::Launching;
            s.current = Some(input.clone());
        });

        info!(
            sequence = queued.sequence,
            bucket = %queued.event.bucket,
            key = %queued.event.key,
            waited_ms = (chrono::Utc::now() - queued.accepted_at).num_milliseconds(),
            command = %spec.command_line(),
            "Launching job"
        );

        let mut handle = match self.launcher.launch(&spec).await {
            Ok(handle) => handle,
            Err(e) => {
                error!(sequence = queued.sequence, input = %input, error = %e, "Job launch failed");
                self.finish(None, false);
                return;
            }
        };

        self.status.send_modify(|s| {
            s.state = WorkerState::Running;
            s.launched += 1;
        });

        while let Some(line) = handle.next_line().await {
            info!(target: "job_output", input = %input, "{}", line);
        }

        match handle.wait().await {
            Ok(exit) if exit.success() => {
                info!(sequence = queued.sequence, input = %input, "Job finished");
                self.finish(exit.code, true);
            }
            Ok(exit) => {
                match exit.code {
                    Some(code) => error!(
                        sequence = queued.sequence,
                        input = %input,
                        exit_code = code,
                        "Job exited with non-zero status"
                    ),
                    None => error!(
                        sequence = queued.sequence,
                        input = %input,
                        "Job terminated by signal"
                    ),
                }
                self.finish(exit.code, false);
            }
            Err(e) => {
                warn!(sequence = queued.sequence, input = %input, error = %e, "Lost track of job");
                self.finish(None, false);
            }
        }
    }

    fn finish(&self, exit_code: Option<i32>, success: bool) {
        self.status.send_modify(|s| {
            s.state = WorkerState::Idle;
            s.current = None;
            s.last_exit_code = exit_code;
            if !success {
                s.failed += 1;
            }
        });
    }
}
