mod common;
use crate::common::builders::graph;
use crate::common::{fast_options, init_tracing, with_timeout, RecordingObserver, ScriptedLauncher};

use std::collections::BTreeMap;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use dagrun::checkpoint::{
    plan_restore, CheckpointSnapshot, Checkpointer, FileCheckpointer, FinalCheckpoint,
    MemoryCheckpointer,
};
use dagrun::engine::{Orchestrator, SharedStore, StateMap};
use dagrun::errors::DagrunError;
use dagrun::types::ExecutionState::*;
use serde_json::json;
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

type TestResult = Result<(), Box<dyn Error>>;

#[tokio::test]
async fn failed_run_leaves_a_resumable_checkpoint() -> TestResult {
    init_tracing();

    let dir = tempdir()?;
    let checkpointer = Arc::new(FileCheckpointer::new(dir.path(), "job"));
    let launcher = Arc::new(
        ScriptedLauncher::new()
            .always_fail("x")
            .writes("y", &[("from_y", json!("hello"))]),
    );

    let summary = with_timeout(
        Orchestrator::new(graph(&[("x", &[]), ("y", &[])]), launcher)
            .with_options(fast_options(0))
            .with_checkpointer(checkpointer.clone())
            .run(CancellationToken::new()),
    )
    .await?;

    assert_eq!(summary.checkpoint, Some(FinalCheckpoint::Written));
    let saved = checkpointer.read()?;
    assert_eq!(saved.states.state_of("x"), Some(Failed));
    assert_eq!(saved.states.state_of("y"), Some(Completed));
    assert_eq!(saved.store.get("from_y"), Some(&json!("hello")));
    Ok(())
}

#[tokio::test]
async fn restart_reruns_only_unfinished_tasks() -> TestResult {
    init_tracing();

    let mut states = StateMap::default();
    states.insert("x".into(), Failed);
    states.insert("y".into(), Completed);
    let snapshot = CheckpointSnapshot {
        states,
        store: BTreeMap::from([("from_y".to_string(), json!("hello"))]),
    };
    let checkpointer = Arc::new(MemoryCheckpointer::with_snapshot(&snapshot)?);

    let g = graph(&[("x", &[]), ("y", &[])]);
    let plan = plan_restore(&checkpointer.read()?, &g)?;
    let store = SharedStore::from_map(plan.store.clone());

    let launcher = Arc::new(ScriptedLauncher::new());
    let recorder = RecordingObserver::new();
    let summary = with_timeout(
        Orchestrator::new(g, launcher.clone())
            .with_options(fast_options(0))
            .with_seeds(plan.seeds)
            .with_store(store)
            .with_checkpointer(checkpointer.clone())
            .with_observer(recorder.clone())
            .run(CancellationToken::new()),
    )
    .await?;

    // y keeps its result and never runs again.
    assert!(launcher.launches_of("y").is_empty());
    assert_eq!(recorder.states_of("y"), vec![Completed]);

    // x starts again from attempt 1, flagged as a restart, seeing the store.
    let x = launcher.launches_of("x");
    assert_eq!(x.len(), 1);
    assert_eq!(x[0].attempt, 1);
    assert!(x[0].is_restart);
    assert_eq!(x[0].store.get("from_y"), Some(&json!("hello")));

    assert_eq!(summary.exit_code(), 0);
    assert_eq!(summary.checkpoint, Some(FinalCheckpoint::Cleared));
    assert!(checkpointer.is_empty());
    Ok(())
}

#[test]
fn checkpoint_for_a_different_graph_is_rejected() -> TestResult {
    let snapshot = CheckpointSnapshot {
        states: StateMap::with_all_in(["x", "old"], Completed),
        store: BTreeMap::new(),
    };

    let err = plan_restore(&snapshot, &graph(&[("x", &[]), ("new", &[])])).unwrap_err();
    assert!(matches!(err, DagrunError::CheckpointMismatch { .. }));
    let msg = err.to_string();
    assert!(msg.contains("missing in checkpoint: new"));
    assert!(msg.contains("unknown in checkpoint: old"));
    Ok(())
}

#[tokio::test]
async fn periodic_writes_happen_while_running() -> TestResult {
    init_tracing();

    let checkpointer = Arc::new(MemoryCheckpointer::new());
    let launcher = Arc::new(
        ScriptedLauncher::new()
            .with_delay(Duration::from_millis(200))
            .always_fail("slow"),
    );

    let mut options = fast_options(0);
    options.checkpoint_interval = Duration::from_millis(20);

    let summary = with_timeout(
        Orchestrator::new(graph(&[("slow", &[])]), launcher)
            .with_options(options)
            .with_checkpointer(checkpointer.clone())
            .run(CancellationToken::new()),
    )
    .await?;

    assert_eq!(summary.state_of("slow"), Some(Failed));
    // Several periodic writes plus the final one.
    assert!(checkpointer.write_count() >= 3, "only {} writes", checkpointer.write_count());
    assert_eq!(checkpointer.read()?.states.state_of("slow"), Some(Failed));
    Ok(())
}

#[test]
fn file_checkpoint_round_trips_every_state() -> TestResult {
    let dir = tempdir()?;
    let cp = FileCheckpointer::new(dir.path(), "all-states");

    let mut states = StateMap::default();
    for (i, state) in dagrun::types::ExecutionState::ALL.iter().enumerate() {
        states.insert(format!("t{i}"), *state);
    }
    let snapshot = CheckpointSnapshot {
        states,
        store: BTreeMap::from([
            ("n".to_string(), json!(1.5)),
            ("list".to_string(), json!(["a", "b"])),
        ]),
    };

    cp.write(&snapshot)?;
    assert_eq!(cp.read()?, snapshot);
    Ok(())
}
