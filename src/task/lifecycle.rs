// src/task/lifecycle.rs

//! The task trait, the context handed to task code, and the fixed hook
//! sequence run inside a worker process.

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;

use crate::exec::protocol::{ChildFrame, FrameSink};
use crate::types::{Severity, TaskName};

/// User task code.
///
/// Only [`Task::run`] is required; every other hook defaults to a no-op.
/// Hooks run in this order inside the worker process:
///
/// `on_create` → `on_restart` (retries and resumed runs only) → `run` →
/// `on_success` or `on_failure` → `on_destroy`
///
/// `on_abort` runs on a separate thread when the orchestrator cancels the
/// attempt, possibly while another hook is still executing.
pub trait Task: Send + Sync {
    fn on_create(&self, _ctx: &TaskContext) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_restart(&self, _ctx: &TaskContext) -> anyhow::Result<()> {
        Ok(())
    }

    fn run(&self, ctx: &TaskContext) -> anyhow::Result<()>;

    fn on_success(&self, _ctx: &TaskContext) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_failure(&self, _ctx: &TaskContext) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_destroy(&self, _ctx: &TaskContext) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_abort(&self, _ctx: &TaskContext) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Static facts about the task being executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskMetadata {
    pub name: TaskName,
    pub variant: String,
    pub depends_on: Vec<TaskName>,
}

/// Process-local copy of the shared key/value store.
///
/// Reads see the snapshot taken when the attempt started plus this task's own
/// writes. Every write is also streamed to the orchestrator, which merges it
/// into the run-wide store once the attempt ends.
pub struct TaskStore {
    values: Mutex<BTreeMap<String, Value>>,
    sink: Arc<dyn FrameSink>,
}

impl TaskStore {
    fn new(values: BTreeMap<String, Value>, sink: Arc<dyn FrameSink>) -> Self {
        Self {
            values: Mutex::new(values),
            sink,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Value>> {
        self.values.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.lock().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        let key = key.into();
        self.lock().insert(key.clone(), value.clone());
        self.sink.send(ChildFrame::StoreSet { key, value });
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        let old = self.lock().remove(key);
        self.sink.send(ChildFrame::StoreRemove {
            key: key.to_string(),
        });
        old
    }
}

/// Everything task code can see and touch during one attempt.
pub struct TaskContext {
    metadata: TaskMetadata,
    attempt: u32,
    is_restart: bool,
    store: TaskStore,
    sink: Arc<dyn FrameSink>,
    failed: AtomicBool,
    aborted: AtomicBool,
    finished: AtomicBool,
}

impl TaskContext {
    pub fn new(
        metadata: TaskMetadata,
        attempt: u32,
        is_restart: bool,
        store: BTreeMap<String, Value>,
        sink: Arc<dyn FrameSink>,
    ) -> Self {
        Self {
            metadata,
            attempt,
            is_restart,
            store: TaskStore::new(store, Arc::clone(&sink)),
            sink,
            failed: AtomicBool::new(false),
            aborted: AtomicBool::new(false),
            finished: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn variant(&self) -> &str {
        &self.metadata.variant
    }

    pub fn depends_on(&self) -> &[TaskName] {
        &self.metadata.depends_on
    }

    pub fn metadata(&self) -> &TaskMetadata {
        &self.metadata
    }

    /// 1-based attempt number within this run.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// True on retries and on the first attempt of a resumed run.
    pub fn is_restart(&self) -> bool {
        self.is_restart
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    pub fn log(&self, severity: Severity, message: impl Into<String>) {
        self.sink.send(ChildFrame::Log {
            severity,
            message: message.into(),
        });
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log(Severity::Debug, message);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(Severity::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(Severity::Warning, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(Severity::Error, message);
    }

    /// Mark this attempt as failed without returning an error.
    pub fn fail(&self) {
        self.failed.store(true, Ordering::SeqCst);
    }

    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    /// Set once the orchestrator has asked this attempt to stop.
    ///
    /// Long-running `run` bodies should poll this and return early.
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Claim the right to run `on_abort`. Returns false if the lifecycle has
    /// already finished or an abort is already in progress.
    pub(crate) fn begin_abort(&self) -> bool {
        if self.finished.load(Ordering::SeqCst) {
            return false;
        }
        !self.aborted.swap(true, Ordering::SeqCst)
    }
}

/// Run the hook sequence for one attempt. Returns `true` if the attempt failed.
///
/// Each stage is guarded on its own: an error or panic in one hook is logged
/// and fails the attempt, but later hooks still run.
pub fn run_lifecycle(task: &dyn Task, ctx: &TaskContext) -> bool {
    guarded(ctx, "on_create", || task.on_create(ctx));

    if ctx.is_restart() {
        guarded(ctx, "on_restart", || task.on_restart(ctx));
    }

    guarded(ctx, "run", || task.run(ctx));

    if ctx.is_failed() {
        guarded(ctx, "on_failure", || task.on_failure(ctx));
    } else {
        guarded(ctx, "on_success", || task.on_success(ctx));
    }

    guarded(ctx, "on_destroy", || task.on_destroy(ctx));

    ctx.finished.store(true, Ordering::SeqCst);
    ctx.is_failed()
}

/// Run `on_abort` at most once for this attempt.
///
/// Returns false if the abort was ignored because the lifecycle had already
/// finished or another abort got there first.
pub fn run_abort(task: &dyn Task, ctx: &TaskContext) -> bool {
    if !ctx.begin_abort() {
        return false;
    }
    guarded(ctx, "on_abort", || task.on_abort(ctx));
    ctx.fail();
    true
}

fn guarded<F>(ctx: &TaskContext, stage: &str, hook: F)
where
    F: FnOnce() -> anyhow::Result<()>,
{
    match panic::catch_unwind(AssertUnwindSafe(hook)) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            ctx.error(format!("{stage} failed: {err:#}"));
            ctx.fail();
        }
        Err(payload) => {
            let msg = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            ctx.error(format!("{stage} panicked: {msg}"));
            ctx.fail();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::protocol::MemorySink;

    struct Recorder {
        fail_in: Option<&'static str>,
    }

    impl Recorder {
        fn hook(&self, ctx: &TaskContext, stage: &'static str) -> anyhow::Result<()> {
            ctx.info(stage);
            if self.fail_in == Some(stage) {
                anyhow::bail!("boom in {stage}");
            }
            Ok(())
        }
    }

    impl Task for Recorder {
        fn on_create(&self, ctx: &TaskContext) -> anyhow::Result<()> {
            self.hook(ctx, "on_create")
        }
        fn on_restart(&self, ctx: &TaskContext) -> anyhow::Result<()> {
            self.hook(ctx, "on_restart")
        }
        fn run(&self, ctx: &TaskContext) -> anyhow::Result<()> {
            self.hook(ctx, "run")
        }
        fn on_success(&self, ctx: &TaskContext) -> anyhow::Result<()> {
            self.hook(ctx, "on_success")
        }
        fn on_failure(&self, ctx: &TaskContext) -> anyhow::Result<()> {
            self.hook(ctx, "on_failure")
        }
        fn on_destroy(&self, ctx: &TaskContext) -> anyhow::Result<()> {
            self.hook(ctx, "on_destroy")
        }
        fn on_abort(&self, ctx: &TaskContext) -> anyhow::Result<()> {
            self.hook(ctx, "on_abort")
        }
    }

    fn context(is_restart: bool, sink: &Arc<MemorySink>) -> TaskContext {
        let sink: Arc<dyn FrameSink> = sink.clone();
        TaskContext::new(
            TaskMetadata {
                name: "t".into(),
                variant: "Recorder".into(),
                depends_on: vec![],
            },
            1,
            is_restart,
            BTreeMap::new(),
            sink,
        )
    }

    fn info_lines(sink: &MemorySink) -> Vec<String> {
        sink.frames()
            .into_iter()
            .filter_map(|f| match f {
                ChildFrame::Log {
                    severity: Severity::Info,
                    message,
                } => Some(message),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn successful_sequence_skips_restart_and_failure_hooks() {
        let sink = Arc::new(MemorySink::default());
        let ctx = context(false, &sink);
        let failed = run_lifecycle(&Recorder { fail_in: None }, &ctx);

        assert!(!failed);
        assert_eq!(
            info_lines(&sink),
            vec!["on_create", "run", "on_success", "on_destroy"]
        );
    }

    #[test]
    fn restart_runs_on_restart_before_run() {
        let sink = Arc::new(MemorySink::default());
        let ctx = context(true, &sink);
        run_lifecycle(&Recorder { fail_in: None }, &ctx);

        assert_eq!(
            info_lines(&sink),
            vec!["on_create", "on_restart", "run", "on_success", "on_destroy"]
        );
    }

    #[test]
    fn failing_hook_does_not_skip_later_hooks() {
        let sink = Arc::new(MemorySink::default());
        let ctx = context(false, &sink);
        let failed = run_lifecycle(
            &Recorder {
                fail_in: Some("on_create"),
            },
            &ctx,
        );

        assert!(failed);
        assert_eq!(
            info_lines(&sink),
            vec!["on_create", "run", "on_failure", "on_destroy"]
        );
        assert!(sink.frames().iter().any(|f| matches!(
            f,
            ChildFrame::Log { severity: Severity::Error, message } if message.contains("boom in on_create")
        )));
    }

    #[test]
    fn panics_are_contained() {
        struct Panicky;
        impl Task for Panicky {
            fn run(&self, _ctx: &TaskContext) -> anyhow::Result<()> {
                panic!("kaboom");
            }
        }

        let sink = Arc::new(MemorySink::default());
        let ctx = context(false, &sink);
        assert!(run_lifecycle(&Panicky, &ctx));
        assert!(sink.frames().iter().any(|f| matches!(
            f,
            ChildFrame::Log { message, .. } if message.contains("run panicked: kaboom")
        )));
    }

    #[test]
    fn abort_runs_once_and_not_after_finish() {
        let sink = Arc::new(MemorySink::default());
        let ctx = context(false, &sink);
        let task = Recorder { fail_in: None };

        assert!(run_abort(&task, &ctx));
        assert!(!run_abort(&task, &ctx));
        assert!(ctx.is_aborted());
        assert!(ctx.is_failed());

        let done = context(false, &sink);
        run_lifecycle(&task, &done);
        assert!(!run_abort(&task, &done));
    }

    #[test]
    fn store_writes_are_streamed() {
        let sink = Arc::new(MemorySink::default());
        let ctx = context(false, &sink);
        ctx.store().set("k", Value::from(3));
        assert_eq!(ctx.store().get("k"), Some(Value::from(3)));
        ctx.store().remove("k");
        assert!(!ctx.store().contains("k"));

        let frames = sink.frames();
        assert!(matches!(&frames[0], ChildFrame::StoreSet { key, .. } if key == "k"));
        assert!(matches!(&frames[1], ChildFrame::StoreRemove { key } if key == "k"));
    }
}
