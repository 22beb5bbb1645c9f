use std::collections::{BTreeMap, HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dagrun::engine::{EventSender, StoreWrite};
use dagrun::errors::{DagrunError, Result};
use dagrun::exec::{AttemptReport, AttemptRequest, TaskLauncher};
use dagrun::types::Severity;
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// One call to `launch`.
#[derive(Debug, Clone)]
pub struct LaunchRecord {
    pub name: String,
    pub attempt: u32,
    pub is_restart: bool,
    pub store: BTreeMap<String, Value>,
    pub started_at: Instant,
}

#[derive(Debug, Clone)]
enum Scripted {
    Report(AttemptReport),
    SpawnError,
}

/// A fake launcher that never spawns processes:
/// - pops a scripted result per attempt (default: success)
/// - optionally "runs" for a while, respecting cancellation
/// - records every launch and the peak number of concurrent attempts
#[derive(Default)]
pub struct ScriptedLauncher {
    scripts: Mutex<HashMap<String, VecDeque<Scripted>>>,
    writes: Mutex<HashMap<String, Vec<StoreWrite>>>,
    delay: Duration,
    launches: Mutex<Vec<LaunchRecord>>,
    running: AtomicUsize,
    peak: AtomicUsize,
    aborts: AtomicUsize,
}

impl ScriptedLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every attempt of every task takes this long.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn push(self, name: &str, steps: impl IntoIterator<Item = Scripted>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default()
            .extend(steps);
        self
    }

    /// Fail the first `n` attempts of `name`.
    pub fn fail_times(self, name: &str, n: usize) -> Self {
        self.push(name, (0..n).map(|_| Scripted::Report(AttemptReport::failed())))
    }

    /// Fail every attempt of `name`.
    pub fn always_fail(self, name: &str) -> Self {
        self.fail_times(name, 1_000)
    }

    /// Report a launch error for the next attempt of `name`.
    pub fn spawn_error(self, name: &str) -> Self {
        self.push(name, [Scripted::SpawnError])
    }

    /// Successful attempts of `name` write these values to the shared store.
    pub fn writes(self, name: &str, values: &[(&str, Value)]) -> Self {
        self.writes.lock().unwrap().insert(
            name.to_string(),
            values
                .iter()
                .map(|(k, v)| StoreWrite::Set {
                    key: k.to_string(),
                    value: v.clone(),
                })
                .collect(),
        );
        self
    }

    pub fn launches(&self) -> Vec<LaunchRecord> {
        self.launches.lock().unwrap().clone()
    }

    pub fn launches_of(&self, name: &str) -> Vec<LaunchRecord> {
        self.launches()
            .into_iter()
            .filter(|l| l.name == name)
            .collect()
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn abort_count(&self) -> usize {
        self.aborts.load(Ordering::SeqCst)
    }

    fn next_step(&self, name: &str) -> Scripted {
        self.scripts
            .lock()
            .unwrap()
            .get_mut(name)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Scripted::Report(AttemptReport::succeeded()))
    }
}

impl TaskLauncher for ScriptedLauncher {
    fn launch(
        &self,
        request: AttemptRequest,
        events: EventSender,
        cancel: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<AttemptReport>> + Send + '_>> {
        Box::pin(async move {
            self.launches.lock().unwrap().push(LaunchRecord {
                name: request.name.clone(),
                attempt: request.attempt,
                is_restart: request.is_restart,
                store: request.store.clone(),
                started_at: Instant::now(),
            });

            let mut report = match self.next_step(&request.name) {
                Scripted::Report(report) => report,
                Scripted::SpawnError => {
                    return Err(DagrunError::Spawn {
                        task: request.name.clone(),
                        source: std::io::Error::other("scripted spawn failure"),
                    });
                }
            };

            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            events.log(
                &request.name,
                Severity::Info,
                format!("attempt {} started", request.attempt),
            );

            let aborted = tokio::select! {
                _ = tokio::time::sleep(self.delay) => false,
                _ = cancel.cancelled() => true,
            };
            self.running.fetch_sub(1, Ordering::SeqCst);

            if aborted {
                self.aborts.fetch_add(1, Ordering::SeqCst);
                return Ok(AttemptReport::aborted());
            }

            if !report.failed {
                if let Some(writes) = self.writes.lock().unwrap().get(&request.name) {
                    report.store_writes = writes.clone();
                }
            }
            Ok(report)
        })
    }
}

/// Shared handle so tests can keep inspecting the launcher after handing it
/// to the orchestrator.
pub fn shared(launcher: ScriptedLauncher) -> Arc<ScriptedLauncher> {
    Arc::new(launcher)
}
