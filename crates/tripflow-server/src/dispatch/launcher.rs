//! External job launching
//!
//! The worker talks to a [`JobLauncher`]; [`ProcessLauncher`] is the real
//! implementation and spawns the configured binary. A launch yields a
//! [`RunHandle`] that streams the job's combined stdout/stderr line by line
//! and then resolves to its exit status.

use std::io;
use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tripflow_common::IngestionEvent;

use crate::config::JobConfig;

/// Job launch and supervision errors
#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("failed waiting for job exit: {0}")]
    Wait(#[source] io::Error),

    #[error("job supervisor went away before reporting an exit status")]
    Lost,
}

/// Fully resolved command line for one job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Object URI handed to `--input`
    pub input: String,
}

impl JobSpec {
    /// `<bin> --master <m> --driver-memory <mem> [extra..] <entry> --input <uri>`
    pub fn for_event(config: &JobConfig, event: &IngestionEvent) -> Self {
        let input = event.object_uri(&config.input_scheme);

        let mut args = vec![
            "--master".to_string(),
            config.master.clone(),
            "--driver-memory".to_string(),
            config.driver_memory.clone(),
        ];
        args.extend(config.extra_args.iter().cloned());
        args.push(config.entry.clone());
        args.push("--input".to_string());
        args.push(input.clone());

        Self {
            program: config.binary.clone(),
            args,
            input,
        }
    }

    /// Printable form for logs
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// How a job ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobExit {
    /// `None` when the process was terminated by a signal
    pub code: Option<i32>,
}

impl JobExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<ExitStatus> for JobExit {
    fn from(status: ExitStatus) -> Self {
        Self {
            code: status.code(),
        }
    }
}

/// Output stream and exit status of a running job
#[derive(Debug)]
pub struct RunHandle {
    output: mpsc::UnboundedReceiver<String>,
    exit: oneshot::Receiver<Result<JobExit, LaunchError>>,
}

impl RunHandle {
    pub fn new(
        output: mpsc::UnboundedReceiver<String>,
        exit: oneshot::Receiver<Result<JobExit, LaunchError>>,
    ) -> Self {
        Self { output, exit }
    }

    /// Next output line; `None` once the job closed its output streams
    pub async fn next_line(&mut self) -> Option<String> {
        self.output.recv().await
    }

    /// Wait for the job to exit
    pub async fn wait(self) -> Result<JobExit, LaunchError> {
        self.exit.await.map_err(|_| LaunchError::Lost)?
    }
}

/// Starts one external job per call
#[async_trait]
pub trait JobLauncher: Send + Sync {
    async fn launch(&self, spec: &JobSpec) -> Result<RunHandle, LaunchError>;
}

/// Spawns jobs as child processes
#[derive(Debug, Clone, Default)]
pub struct ProcessLauncher;

#[async_trait]
impl JobLauncher for ProcessLauncher {
    async fn launch(&self, spec: &JobSpec) -> Result<RunHandle, LaunchError> {
        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| LaunchError::Spawn {
                program: spec.program.clone(),
                source,
            })?;

        let (line_tx, line_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = oneshot::channel();

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, line_tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, line_tx));
        }

        tokio::spawn(async move {
            let result = child.wait().await.map(JobExit::from).map_err(LaunchError::Wait);
            let _ = exit_tx.send(result);
        });

        Ok(RunHandle::new(line_rx, exit_rx))
    }
}

async fn forward_lines<R>(reader: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']).to_string();
                if tx.send(line).is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Stopped reading job output");
                break;
            }
        }
    }
}

/// Unbalanced quote or trailing backslash in a shell-style argument string
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unbalanced quote or trailing escape in '{0}'")]
pub struct SplitArgsError(String);

/// Split a shell-style argument string with POSIX quoting rules
pub fn split_args(raw: &str) -> Result<Vec<String>, SplitArgsError> {
    shlex::split(raw).ok_or_else(|| SplitArgsError(raw.to_string()))
}
