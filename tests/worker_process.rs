//! End-to-end runs that spawn real worker processes of the `dagrun` binary.

mod common;
use crate::common::builders::{JobFileBuilder, TaskConfigBuilder};
use crate::common::{fast_options, init_tracing, run_graph, with_timeout, RecordingObserver};

use std::collections::BTreeMap;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use dagrun::engine::Orchestrator;
use dagrun::exec::ProcessLauncher;
use dagrun::types::ExecutionState::*;
use dagrun::types::Severity;
use serde_json::json;
use tokio_util::sync::CancellationToken;

type TestResult = Result<(), Box<dyn Error>>;

fn launcher() -> Arc<ProcessLauncher> {
    Arc::new(
        ProcessLauncher::new(env!("CARGO_BIN_EXE_dagrun"), ["__worker"])
            .with_abort_grace(Duration::from_secs(5)),
    )
}

#[tokio::test]
async fn builtin_variants_run_in_worker_processes() -> TestResult {
    init_tracing();

    let graph = JobFileBuilder::new()
        .with_task(
            "nap",
            TaskConfigBuilder::new("Sleep").param("seconds", 0.05).build(),
        )
        .with_task(
            "produce",
            TaskConfigBuilder::new("Store")
                .after("nap")
                .param("set", json!({ "rows": 3 }))
                .build(),
        )
        .with_task(
            "consume",
            TaskConfigBuilder::new("Store")
                .after("produce")
                .param("require", json!(["rows"]))
                .build(),
        )
        .build_graph();

    let (summary, recorder) = with_timeout(run_graph(
        graph,
        launcher(),
        fast_options(0),
        BTreeMap::new(),
    ))
    .await;

    assert_eq!(summary.exit_code(), 0);
    for task in ["nap", "produce", "consume"] {
        assert_eq!(summary.state_of(task), Some(Completed), "{task}");
    }
    assert!(recorder.logs_of("consume").contains(&"rows = 3".to_string()));
    Ok(())
}

#[tokio::test]
async fn failing_task_defaults_its_dependents() -> TestResult {
    init_tracing();

    let graph = JobFileBuilder::new()
        .with_task(
            "boom",
            TaskConfigBuilder::new("Fail")
                .param("message", "disk full")
                .build(),
        )
        .with_task(
            "after",
            TaskConfigBuilder::new("Sleep").after("boom").build(),
        )
        .build_graph();

    let (summary, recorder) = with_timeout(run_graph(
        graph,
        launcher(),
        fast_options(0),
        BTreeMap::new(),
    ))
    .await;

    assert_eq!(summary.state_of("boom"), Some(Failed));
    assert_eq!(summary.state_of("after"), Some(Defaulted));
    assert_eq!(summary.exit_code(), 2);
    assert!(recorder.logs_of("boom").iter().any(|m| m.contains("disk full")));
    Ok(())
}

#[tokio::test]
async fn flaky_task_passes_on_a_later_attempt() -> TestResult {
    init_tracing();

    let graph = JobFileBuilder::new()
        .with_task(
            "flaky",
            TaskConfigBuilder::new("Flaky")
                .max_attempts(3)
                .param("succeed_on_attempt", 2)
                .build(),
        )
        .build_graph();

    let (summary, recorder) = with_timeout(run_graph(
        graph,
        launcher(),
        fast_options(0),
        BTreeMap::new(),
    ))
    .await;

    assert_eq!(summary.state_of("flaky"), Some(Completed));
    assert_eq!(summary.attempts_of("flaky"), Some(2));
    assert_eq!(
        recorder.states_of("flaky"),
        vec![Pending, Running, Pending, Running, Completed]
    );
    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn shell_output_becomes_task_logs() -> TestResult {
    init_tracing();

    let graph = JobFileBuilder::new()
        .with_task(
            "sh",
            TaskConfigBuilder::new("Shell")
                .param("cmd", "echo hello; echo oops 1>&2")
                .build(),
        )
        .with_task(
            "bad",
            TaskConfigBuilder::new("Shell").param("cmd", "exit 3").build(),
        )
        .build_graph();

    let (summary, recorder) = with_timeout(run_graph(
        graph,
        launcher(),
        fast_options(0),
        BTreeMap::new(),
    ))
    .await;

    assert_eq!(summary.state_of("sh"), Some(Completed));
    assert_eq!(summary.state_of("bad"), Some(Failed));

    let logs = recorder.logs();
    assert!(logs
        .iter()
        .any(|l| l.task == "sh" && l.severity == Severity::Info && l.message == "hello"));
    assert!(logs
        .iter()
        .any(|l| l.task == "sh" && l.severity == Severity::Warning && l.message == "oops"));
    Ok(())
}

#[tokio::test]
async fn unknown_variant_fails_inside_the_worker() -> TestResult {
    init_tracing();

    let graph = JobFileBuilder::new()
        .with_task("ghost", TaskConfigBuilder::new("Teleport").build())
        .build_graph();

    let (summary, recorder) = with_timeout(run_graph(
        graph,
        launcher(),
        fast_options(0),
        BTreeMap::new(),
    ))
    .await;

    assert_eq!(summary.state_of("ghost"), Some(Failed));
    assert!(recorder
        .logs()
        .iter()
        .any(|l| l.task == "ghost" && l.severity == Severity::Critical));
    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn cancellation_aborts_a_running_worker() -> TestResult {
    init_tracing();

    let graph = JobFileBuilder::new()
        .with_task(
            "long",
            TaskConfigBuilder::new("Sleep").param("seconds", 30).build(),
        )
        .with_task(
            "next",
            TaskConfigBuilder::new("Sleep").after("long").build(),
        )
        .build_graph();

    let recorder = RecordingObserver::new();
    let cancel = CancellationToken::new();
    let run = tokio::spawn(
        Orchestrator::new(graph, launcher())
            .with_options(fast_options(0))
            .with_observer(recorder.clone())
            .run(cancel.clone()),
    );

    with_timeout(async {
        while !recorder.states_of("long").contains(&Running) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    // Give the worker time to read its start frame.
    tokio::time::sleep(Duration::from_millis(300)).await;
    cancel.cancel();

    let summary = with_timeout(run).await??;
    assert_eq!(summary.state_of("long"), Some(Aborted));
    assert_eq!(summary.state_of("next"), Some(Aborted));
    assert_eq!(summary.exit_code(), 0);

    let abort_logs = recorder
        .logs_of("long")
        .into_iter()
        .filter(|m| m == "abort requested")
        .count();
    assert_eq!(abort_logs, 1);
    Ok(())
}
