// src/exec/process.rs

//! Parent side of the worker process protocol.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use std::future::Future;
use std::pin::Pin;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::events::EventSender;
use crate::engine::store::StoreWrite;
use crate::errors::{DagrunError, Result};
use crate::exec::launcher::{AttemptReport, TaskLauncher};
use crate::exec::protocol::{
    AttemptRequest, ChildFrame, ParentFrame, StdoutLine, decode_stdout_line, encode_parent_frame,
};
use crate::exec::worker::WORKER_ARG;
use crate::types::Severity;

/// Default wait between the cooperative abort request and a forced kill.
pub const DEFAULT_ABORT_GRACE: Duration = Duration::from_secs(30);

/// Runs every attempt in a new worker process.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<OsString>,
    abort_grace: Duration,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>, args: impl IntoIterator<Item = impl Into<OsString>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            abort_grace: DEFAULT_ABORT_GRACE,
        }
    }

    /// Re-execute the running binary in worker mode.
    pub fn current_exe() -> Result<Self> {
        let exe = std::env::current_exe()?;
        Ok(Self::new(exe, [WORKER_ARG]))
    }

    pub fn with_abort_grace(mut self, grace: Duration) -> Self {
        self.abort_grace = grace;
        self
    }

    async fn run_attempt(
        &self,
        request: AttemptRequest,
        events: EventSender,
        cancel: CancellationToken,
    ) -> Result<AttemptReport> {
        let task = request.name.clone();

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| DagrunError::Spawn {
                task: task.clone(),
                source,
            })?;

        debug!(task = %task, pid = ?child.id(), attempt = request.attempt, "worker process started");

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| DagrunError::Protocol("worker stdin was not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DagrunError::Protocol("worker stdout was not captured".to_string()))?;

        let stdout_pump = tokio::spawn(pump_stdout(stdout, task.clone(), events.clone()));
        let stderr_pump = child.stderr.take().map(|stderr| {
            let task = task.clone();
            let events = events.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    events.log(&task, Severity::Error, line);
                }
            })
        });

        write_frame(&mut stdin, &ParentFrame::Start(request)).await?;

        let mut cancelled = false;
        let status = tokio::select! {
            status = child.wait() => status?,
            _ = cancel.cancelled() => {
                cancelled = true;
                self.abort_child(&task, &mut child, &mut stdin).await?
            }
        };
        drop(stdin);

        let outcome = join_pump(stdout_pump).await;
        if let Some(handle) = stderr_pump {
            if let Err(e) = handle.await {
                warn!(task = %task, error = %e, "stderr reader task failed");
            }
        }

        let finished = match outcome.finished {
            Some(finished) => finished,
            None => {
                events.log(
                    &task,
                    Severity::Error,
                    format!("worker exited ({status}) without reporting a result"),
                );
                (true, false)
            }
        };
        let (reported_failed, reported_aborted) = finished;
        let failed = reported_failed || !status.success();

        info!(
            task = %task,
            exit_code = status.code().unwrap_or(-1),
            failed,
            "worker process exited"
        );

        Ok(AttemptReport {
            failed,
            aborted: cancelled || reported_aborted,
            store_writes: outcome.store_writes,
        })
    }

    /// Ask the worker to stop, then force it after the grace period.
    async fn abort_child(
        &self,
        task: &str,
        child: &mut Child,
        stdin: &mut ChildStdin,
    ) -> Result<std::process::ExitStatus> {
        info!(task = %task, "cancellation requested; asking worker to abort");
        if let Err(e) = write_frame(stdin, &ParentFrame::Abort).await {
            // The worker may already be on its way out.
            debug!(task = %task, error = %e, "could not deliver abort frame");
        }

        match tokio::time::timeout(self.abort_grace, child.wait()).await {
            Ok(status) => Ok(status?),
            Err(_) => {
                warn!(
                    task = %task,
                    grace_secs = self.abort_grace.as_secs_f64(),
                    "worker ignored abort request; killing process"
                );
                child.kill().await?;
                Ok(child.wait().await?)
            }
        }
    }
}

impl TaskLauncher for ProcessLauncher {
    fn launch(
        &self,
        request: AttemptRequest,
        events: EventSender,
        cancel: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<AttemptReport>> + Send + '_>> {
        Box::pin(self.run_attempt(request, events, cancel))
    }
}

async fn write_frame(stdin: &mut ChildStdin, frame: &ParentFrame) -> Result<()> {
    let line = encode_parent_frame(frame)?;
    stdin.write_all(line.as_bytes()).await?;
    stdin.flush().await?;
    Ok(())
}

#[derive(Debug, Default)]
struct StdoutOutcome {
    finished: Option<(bool, bool)>,
    store_writes: Vec<StoreWrite>,
}

async fn pump_stdout(stdout: ChildStdout, task: String, events: EventSender) -> StdoutOutcome {
    let mut outcome = StdoutOutcome::default();
    let mut lines = BufReader::new(stdout).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        match decode_stdout_line(&line) {
            Ok(StdoutLine::Text(text)) => events.log(&task, Severity::Info, text),
            Ok(StdoutLine::Frame(frame)) => {
                if let Some(write) = frame.store_write() {
                    outcome.store_writes.push(write);
                    continue;
                }
                match frame {
                    ChildFrame::Log { severity, message } => events.log(&task, severity, message),
                    ChildFrame::Finished { failed, aborted } => {
                        outcome.finished = Some((failed, aborted));
                    }
                    ChildFrame::StoreSet { .. } | ChildFrame::StoreRemove { .. } => {}
                }
            }
            Err(e) => events.log(&task, Severity::Error, e.to_string()),
        }
    }

    outcome
}

async fn join_pump(handle: JoinHandle<StdoutOutcome>) -> StdoutOutcome {
    match handle.await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(error = %e, "stdout reader task failed");
            StdoutOutcome::default()
        }
    }
}
