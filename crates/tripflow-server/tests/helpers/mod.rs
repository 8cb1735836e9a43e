//! Test helpers for tripflow server integration tests
//!
//! This module provides:
//! - A scripted `JobLauncher` that records when each job started and ended
//! - A launcher whose jobs never finish, for observing a busy worker
//! - Router construction and request helpers

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tower::ServiceExt;

use tripflow_server::{
    api::{create_router, AppState},
    config::Config,
    dispatch::{
        launcher::{JobExit, JobLauncher, JobSpec, LaunchError, RunHandle},
        Dispatcher,
    },
};

pub const TEST_TOKEN: &str = "test-token";

/// What the next launch should do
#[derive(Debug, Clone)]
pub enum Step {
    /// Emit `lines`, run for `duration`, then exit with `code`
    Exit {
        code: i32,
        lines: Vec<String>,
        duration: Duration,
    },
    /// Fail to spawn
    SpawnFailure,
}

impl Step {
    pub fn ok(duration_ms: u64) -> Self {
        Step::Exit {
            code: 0,
            lines: vec!["job started".to_string(), "job done".to_string()],
            duration: Duration::from_millis(duration_ms),
        }
    }

    pub fn exit(code: i32, duration_ms: u64) -> Self {
        Step::Exit {
            code,
            lines: vec![format!("failing with {}", code)],
            duration: Duration::from_millis(duration_ms),
        }
    }
}

/// One observed launch
#[derive(Debug, Clone)]
pub struct LaunchRecord {
    pub input: String,
    pub started: Instant,
    /// `None` for spawn failures and for jobs still running
    pub ended: Option<Instant>,
}

/// Replays a fixed script of job outcomes, defaulting to quick successes
#[derive(Default)]
pub struct ScriptedLauncher {
    script: Mutex<VecDeque<Step>>,
    records: Arc<Mutex<Vec<LaunchRecord>>>,
}

impl ScriptedLauncher {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            script: Mutex::new(steps.into_iter().collect()),
            records: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn records(&self) -> Vec<LaunchRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobLauncher for ScriptedLauncher {
    async fn launch(&self, spec: &JobSpec) -> Result<RunHandle, LaunchError> {
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Step::ok(5));

        let index = {
            let mut records = self.records.lock().unwrap();
            records.push(LaunchRecord {
                input: spec.input.clone(),
                started: Instant::now(),
                ended: None,
            });
            records.len() - 1
        };

        let (code, lines, duration) = match step {
            Step::SpawnFailure => {
                return Err(LaunchError::Spawn {
                    program: spec.program.clone(),
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such binary"),
                })
            }
            Step::Exit {
                code,
                lines,
                duration,
            } => (code, lines, duration),
        };

        let (line_tx, line_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = oneshot::channel();
        let records = self.records.clone();

        tokio::spawn(async move {
            for line in lines {
                let _ = line_tx.send(line);
            }
            tokio::time::sleep(duration).await;
            drop(line_tx);
            records.lock().unwrap()[index].ended = Some(Instant::now());
            let _ = exit_tx.send(Ok(JobExit { code: Some(code) }));
        });

        Ok(RunHandle::new(line_rx, exit_rx))
    }
}

/// Jobs launched by this launcher run until the launcher is dropped
#[derive(Default)]
pub struct StuckLauncher {
    held: Mutex<Vec<(mpsc::UnboundedSender<String>, oneshot::Sender<Result<JobExit, LaunchError>>)>>,
}

#[async_trait]
impl JobLauncher for StuckLauncher {
    async fn launch(&self, _spec: &JobSpec) -> Result<RunHandle, LaunchError> {
        let (line_tx, line_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = oneshot::channel();
        self.held.lock().unwrap().push((line_tx, exit_tx));
        Ok(RunHandle::new(line_rx, exit_rx))
    }
}

pub fn test_config() -> Arc<Config> {
    let mut config = Config::default();
    config.webhook.token = TEST_TOKEN.to_string();
    config.job.binary = "tripflow-ingest".to_string();
    Arc::new(config)
}

/// Router wired to a fresh dispatcher using `launcher`
pub fn test_app(launcher: Arc<dyn JobLauncher>) -> (Router, Dispatcher) {
    let config = test_config();
    let (dispatcher, _worker) = Dispatcher::start(config.job.clone(), launcher);
    let state = AppState {
        dispatcher: dispatcher.clone(),
        config,
    };
    (create_router(state), dispatcher)
}

/// Send a request and return status plus parsed JSON body
pub async fn send(app: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = app.clone().oneshot(request).await.unwrap();

    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if body.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };

    (status, json)
}

/// `POST` a notification body with an optional webhook token
pub fn post_event(uri: &str, token: Option<&str>, body: impl Into<Body>) -> Request<Body> {
    let mut builder = Request::builder()
        .uri(uri)
        .method("POST")
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("x-webhook-token", token);
    }
    builder.body(body.into()).unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

/// Wait until the worker status satisfies `done`
pub async fn wait_for_worker<F>(dispatcher: &Dispatcher, done: F)
where
    F: FnMut(&tripflow_server::dispatch::worker::WorkerStatus) -> bool,
{
    let mut status = dispatcher.watch_status();
    tokio::time::timeout(Duration::from_secs(5), status.wait_for(done))
        .await
        .expect("worker did not reach expected state in time")
        .expect("worker status channel closed");
}
