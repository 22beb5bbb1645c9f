#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use dagrun::dag::TaskGraph;
use dagrun::engine::{Orchestrator, RunOptions, RunSummary, Seed};
use dagrun::exec::TaskLauncher;
use tokio_util::sync::CancellationToken;

pub use dagrun_test_utils::builders;
pub use dagrun_test_utils::{
    RecordingObserver, ScriptedLauncher, init_tracing, with_timeout,
};

/// Options with short intervals so tests settle quickly.
pub fn fast_options(max_concurrency: usize) -> RunOptions {
    RunOptions {
        max_concurrency,
        checkpoint_interval: Duration::from_millis(50),
        tick_interval: Duration::from_millis(10),
    }
}

/// Run `graph` to completion and return the summary plus everything an
/// observer saw.
pub async fn run_graph(
    graph: TaskGraph,
    launcher: Arc<dyn TaskLauncher>,
    options: RunOptions,
    seeds: BTreeMap<String, Seed>,
) -> (RunSummary, RecordingObserver) {
    let recorder = RecordingObserver::new();
    let summary = Orchestrator::new(graph, launcher)
        .with_options(options)
        .with_seeds(seeds)
        .with_observer(recorder.clone())
        .run(CancellationToken::new())
        .await
        .expect("run failed");
    (summary, recorder)
}
