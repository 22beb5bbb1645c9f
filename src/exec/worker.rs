// src/exec/worker.rs

//! Child side of the worker process protocol.
//!
//! A worker runs exactly one attempt: it reads the `Start` frame from stdin,
//! builds the task from the registry, runs the hook sequence and reports a
//! `Finished` frame on stdout. A watcher thread waits for the orchestrator's
//! `Abort` frame (or SIGTERM) and runs `on_abort` when it arrives.

use std::io::BufRead;
use std::sync::Arc;
use std::thread;

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::errors::{DagrunError, Result};
use crate::exec::protocol::{
    AttemptRequest, ChildFrame, FrameSink, ParentFrame, StdoutSink, decode_parent_frame,
};
use crate::task::{Task, TaskContext, TaskMetadata, TaskRegistry, run_abort, run_lifecycle};
use crate::types::Severity;

/// Hidden command-line argument that switches the binary into worker mode.
pub const WORKER_ARG: &str = "__worker";

/// Exit status used when the attempt was aborted.
pub const ABORT_EXIT_CODE: i32 = 130;

/// Exit status when the worker could not even start the attempt.
pub const PROTOCOL_EXIT_CODE: i32 = 2;

/// Serve one attempt over stdin/stdout and return the process exit code.
pub fn serve(registry: &TaskRegistry) -> i32 {
    let sink: Arc<dyn FrameSink> = Arc::new(StdoutSink);

    let request = match read_start_frame() {
        Ok(request) => request,
        Err(e) => {
            eprintln!("dagrun worker: {e}");
            return PROTOCOL_EXIT_CODE;
        }
    };

    let task: Arc<dyn Task> = match registry.construct(&request.variant, &request.parameters) {
        Ok(task) => Arc::from(task),
        Err(e) => {
            sink.send(ChildFrame::Log {
                severity: Severity::Critical,
                message: format!("could not construct task '{}': {e:#}", request.name),
            });
            sink.send(ChildFrame::Finished {
                failed: true,
                aborted: false,
            });
            return 1;
        }
    };

    let ctx = Arc::new(TaskContext::new(
        TaskMetadata {
            name: request.name,
            variant: request.variant,
            depends_on: request.depends_on,
        },
        request.attempt,
        request.is_restart,
        request.store,
        Arc::clone(&sink),
    ));

    spawn_abort_watcher(Arc::clone(&task), Arc::clone(&ctx), Arc::clone(&sink));

    let failed = run_lifecycle(task.as_ref(), &ctx);
    if ctx.is_aborted() {
        // The watcher owns the exit path once an abort has started.
        park_forever();
    }

    sink.send(ChildFrame::Finished {
        failed,
        aborted: false,
    });
    if failed { 1 } else { 0 }
}

fn read_start_frame() -> Result<AttemptRequest> {
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    if line.trim().is_empty() {
        return Err(DagrunError::Protocol(
            "stdin closed before a start frame arrived".to_string(),
        ));
    }
    match decode_parent_frame(&line)? {
        ParentFrame::Start(request) => Ok(request),
        ParentFrame::Abort => Err(DagrunError::Protocol(
            "received abort before start".to_string(),
        )),
    }
}

fn spawn_abort_watcher(task: Arc<dyn Task>, ctx: Arc<TaskContext>, sink: Arc<dyn FrameSink>) {
    thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(rt) => rt,
            Err(e) => {
                sink.send(ChildFrame::Log {
                    severity: Severity::Warning,
                    message: format!("abort watcher unavailable: {e}"),
                });
                return;
            }
        };

        runtime.block_on(wait_for_abort());

        if run_abort(task.as_ref(), &ctx) {
            sink.send(ChildFrame::Finished {
                failed: true,
                aborted: true,
            });
            std::process::exit(ABORT_EXIT_CODE);
        }
    });
}

/// Resolves once the orchestrator asks this attempt to stop.
async fn wait_for_abort() {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    #[cfg(unix)]
    let mut sigterm =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();

    loop {
        #[cfg(unix)]
        let terminate = async {
            match sigterm.as_mut() {
                Some(s) => {
                    s.recv().await;
                }
                None => std::future::pending::<()>().await,
            }
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => match decode_parent_frame(&line) {
                    Ok(ParentFrame::Abort) => return,
                    Ok(ParentFrame::Start(_)) | Err(_) => continue,
                },
                // Orchestrator went away without asking; keep running.
                Ok(None) | Err(_) => stdin_open = false,
            },
            _ = terminate => return,
            // Ctrl-C reaches the whole process group; only the orchestrator
            // decides whether this attempt stops.
            _ = tokio::signal::ctrl_c() => continue,
        }
    }
}

fn park_forever() -> ! {
    loop {
        thread::park();
    }
}
