//! Dispatcher ordering and failure handling
//!
//! These tests verify:
//! - Jobs launch in arrival order
//! - No two jobs ever overlap
//! - A failing or unspawnable job does not stop the worker

use std::sync::Arc;

use tripflow_common::IngestionEvent;
use tripflow_server::config::JobConfig;
use tripflow_server::dispatch::worker::WorkerState;
use tripflow_server::dispatch::Dispatcher;

mod helpers;

use helpers::*;

fn event(key: &str) -> IngestionEvent {
    IngestionEvent::new("trips", key).unwrap()
}

#[tokio::test]
async fn test_jobs_run_in_order_without_overlap() {
    let launcher = Arc::new(ScriptedLauncher::new(
        [30, 5, 20, 5, 10].into_iter().map(Step::ok),
    ));
    let (dispatcher, _worker) = Dispatcher::start(JobConfig::default(), launcher.clone());

    let keys: Vec<String> = (1..=5).map(|i| format!("2024/01/part-{}.csv", i)).collect();
    for key in &keys {
        assert!(dispatcher.submit(event(key)).unwrap() >= 1);
    }

    wait_for_worker(&dispatcher, |s| s.launched == 5 && s.state == WorkerState::Idle).await;

    let records = launcher.records();
    let inputs: Vec<&str> = records.iter().map(|r| r.input.as_str()).collect();
    let expected: Vec<String> = keys.iter().map(|k| format!("s3://trips/{}", k)).collect();
    assert_eq!(inputs, expected.iter().map(String::as_str).collect::<Vec<_>>());

    for pair in records.windows(2) {
        let previous_end = pair[0].ended.expect("job finished");
        assert!(
            pair[1].started >= previous_end,
            "{} started before {} ended",
            pair[1].input,
            pair[0].input
        );
    }

    let status = dispatcher.worker_status();
    assert_eq!(status.failed, 0);
    assert_eq!(status.last_exit_code, Some(0));
    assert_eq!(dispatcher.queue_depth(), 0);
}

#[tokio::test]
async fn test_non_zero_exit_does_not_stop_worker() {
    let launcher = Arc::new(ScriptedLauncher::new([
        Step::ok(5),
        Step::exit(3, 5),
        Step::ok(5),
    ]));
    let (dispatcher, _worker) = Dispatcher::start(JobConfig::default(), launcher.clone());

    for key in ["a.csv", "b.csv", "c.csv"] {
        dispatcher.submit(event(key)).unwrap();
    }

    wait_for_worker(&dispatcher, |s| s.launched == 3 && s.state == WorkerState::Idle).await;

    let status = dispatcher.worker_status();
    assert_eq!(status.failed, 1);
    assert_eq!(status.last_exit_code, Some(0));
    assert_eq!(launcher.records().len(), 3);
    assert_eq!(launcher.records()[2].input, "s3://trips/c.csv");
}

#[tokio::test]
async fn test_spawn_failure_is_counted_and_skipped() {
    let launcher = Arc::new(ScriptedLauncher::new([
        Step::SpawnFailure,
        Step::ok(5),
        Step::SpawnFailure,
        Step::ok(5),
    ]));
    let (dispatcher, _worker) = Dispatcher::start(JobConfig::default(), launcher.clone());

    for key in ["a.csv", "b.csv", "c.csv", "d.csv"] {
        dispatcher.submit(event(key)).unwrap();
    }

    wait_for_worker(&dispatcher, |s| {
        s.launched == 2 && s.failed == 2 && s.state == WorkerState::Idle
    })
    .await;

    let inputs: Vec<String> = launcher.records().into_iter().map(|r| r.input).collect();
    assert_eq!(
        inputs,
        vec![
            "s3://trips/a.csv",
            "s3://trips/b.csv",
            "s3://trips/c.csv",
            "s3://trips/d.csv"
        ]
    );
}

#[tokio::test]
async fn test_command_line_uses_job_config() {
    let launcher = Arc::new(ScriptedLauncher::default());
    let job = JobConfig {
        input_scheme: "s3a".to_string(),
        ..JobConfig::default()
    };
    let (dispatcher, _worker) = Dispatcher::start(job, launcher.clone());

    dispatcher.submit(event("2024/01/rides.csv")).unwrap();
    wait_for_worker(&dispatcher, |s| s.launched == 1 && s.state == WorkerState::Idle).await;

    assert_eq!(launcher.records()[0].input, "s3a://trips/2024/01/rides.csv");
}

#[tokio::test]
async fn test_worker_stops_when_dispatcher_dropped() {
    let launcher = Arc::new(ScriptedLauncher::default());
    let (dispatcher, worker) = Dispatcher::start(JobConfig::default(), launcher.clone());

    dispatcher.submit(event("a.csv")).unwrap();
    drop(dispatcher);

    tokio::time::timeout(std::time::Duration::from_secs(5), worker)
        .await
        .expect("worker did not stop")
        .unwrap();

    assert_eq!(launcher.records().len(), 1);
}

#[tokio::test]
async fn test_wait_for_idle_times_out_on_running_job() {
    let launcher = Arc::new(StuckLauncher::default());
    let (dispatcher, _worker) = Dispatcher::start(JobConfig::default(), launcher);

    dispatcher.submit(event("2024/01/rides.csv")).unwrap();
    wait_for_worker(&dispatcher, |s| s.current.is_some()).await;

    assert!(!dispatcher.wait_for_idle(std::time::Duration::from_millis(50)).await);
    assert_eq!(
        dispatcher.worker_status().current.as_deref(),
        Some("s3a://trips/2024/01/rides.csv")
    );
}

#[tokio::test]
async fn test_wait_for_idle_returns_once_job_finishes() {
    let launcher = Arc::new(ScriptedLauncher::default());
    let (dispatcher, _worker) = Dispatcher::start(JobConfig::default(), launcher);

    assert!(dispatcher.wait_for_idle(std::time::Duration::from_millis(50)).await);

    dispatcher.submit(event("a.csv")).unwrap();
    wait_for_worker(&dispatcher, |s| s.launched == 1).await;
    assert!(dispatcher.wait_for_idle(std::time::Duration::from_secs(5)).await);
    assert!(dispatcher.worker_status().current.is_none());
}
