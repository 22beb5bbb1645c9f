// src/lib.rs

pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod task;
pub mod types;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::checkpoint::{Checkpointer, FileCheckpointer, plan_restore};
use crate::cli::CliArgs;
use crate::config::{JobFile, load_and_validate, validate_variants};
use crate::engine::{Orchestrator, ProgressObserver, RunOptions, Seed, SharedStore};
use crate::errors::DagrunError;
use crate::exec::ProcessLauncher;
use crate::task::TaskRegistry;
use crate::types::TaskName;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - job definition loading and validation against `registry`
/// - task selection and checkpoint restore
/// - the orchestrator with a process launcher re-executing this binary
/// - Ctrl-C / SIGTERM handling
///
/// Returns the number of tasks that ended `FAILED` or `DEFAULTED`.
pub async fn run(args: CliArgs, registry: &TaskRegistry) -> Result<usize> {
    let job = load_and_validate(&args.jobdef)
        .with_context(|| format!("loading job definition {}", args.jobdef.display()))?;
    validate_variants(job.graph(), registry)?;

    let skipped = args.selection().skipped(job.graph())?;

    let mut options = RunOptions::from(job.config());
    if let Some(n) = args.max_concurrency {
        options.max_concurrency = n;
    }

    if args.dry_run {
        print_dry_run(&job, &options, &skipped.iter().cloned().collect::<Vec<_>>());
        return Ok(0);
    }

    let checkpoint_dir = resolve_checkpoint_dir(&args.jobdef, &job.config().checkpoint_dir);
    let checkpointer: Arc<dyn Checkpointer> =
        Arc::new(FileCheckpointer::new(checkpoint_dir, &job.config().name));

    let store = SharedStore::new();
    let mut seeds: BTreeMap<TaskName, Seed> = BTreeMap::new();

    if args.restart {
        match checkpointer.read() {
            Ok(snapshot) => {
                let plan = plan_restore(&snapshot, job.graph())?;
                info!(
                    path = %checkpointer.describe(),
                    rerun = ?plan.rerun().collect::<Vec<_>>(),
                    "resuming from checkpoint"
                );
                store.extend(plan.store);
                seeds.extend(plan.seeds);
            }
            Err(DagrunError::NoCheckpoint(path)) => {
                warn!(path = %path.display(), "no checkpoint to restart from; starting a fresh run");
            }
            Err(e) => return Err(e).context("reading checkpoint"),
        }
    }

    for name in skipped {
        // Tasks already finished in an earlier run keep their state.
        let seed = seeds.entry(name).or_default();
        if matches!(seed, Seed::Fresh { .. }) {
            *seed = Seed::Skip;
        }
    }

    let launcher = ProcessLauncher::current_exe()
        .context("locating the dagrun executable")?
        .with_abort_grace(job.config().abort_grace());

    let cancel = CancellationToken::new();
    spawn_signal_listener(cancel.clone());

    let (_, graph) = job.into_parts();
    let summary = Orchestrator::new(graph, Arc::new(launcher))
        .with_options(options)
        .with_seeds(seeds)
        .with_store(store)
        .with_checkpointer(checkpointer)
        .with_observer(ProgressObserver)
        .run(cancel)
        .await?;

    Ok(summary.exit_code())
}

/// Cancel `token` on Ctrl-C, or SIGTERM on unix.
fn spawn_signal_listener(token: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut s) => {
                    s.recv().await;
                }
                Err(e) => {
                    warn!(error = %e, "failed to listen for SIGTERM");
                    std::future::pending::<()>().await;
                }
            }
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                if let Err(e) = res {
                    warn!(error = %e, "failed to listen for Ctrl+C");
                    return;
                }
            }
            _ = terminate => {}
        }

        info!("termination requested; aborting running tasks");
        token.cancel();
    });
}

/// Relative checkpoint directories are taken from the job definition's
/// directory, not the current working directory.
///
/// - If the jobdef path has a non-empty parent (e.g. "jobs/Dagrun.toml"),
///   that directory is used as the base.
/// - For a bare filename like "Dagrun.toml" the current directory is used.
fn resolve_checkpoint_dir(jobdef: &Path, checkpoint_dir: &Path) -> PathBuf {
    if checkpoint_dir.is_absolute() {
        return checkpoint_dir.to_path_buf();
    }
    match jobdef.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.join(checkpoint_dir),
        _ => checkpoint_dir.to_path_buf(),
    }
}

/// Simple dry-run output: print settings and the task graph.
fn print_dry_run(job: &JobFile, options: &RunOptions, skipped: &[TaskName]) {
    let cfg = job.config();
    println!("dagrun dry-run");
    println!("  config.name = {}", cfg.name);
    println!("  config.max_concurrency = {}", options.max_concurrency);
    println!(
        "  config.checkpoint_interval_seconds = {}",
        cfg.checkpoint_interval_seconds
    );
    println!("  config.checkpoint_dir = {}", cfg.checkpoint_dir.display());
    println!();

    println!("tasks ({}):", job.graph().len());
    for node in job.graph().nodes() {
        println!("  - {}", node.name);
        println!("      variant: {}", node.variant);
        if !node.depends_on.is_empty() {
            println!("      depends_on: {:?}", node.depends_on);
        }
        if node.max_attempts > 1 {
            println!(
                "      max_attempts: {} (backoff {}s)",
                node.max_attempts,
                node.backoff.as_secs_f64()
            );
        }
        if skipped.contains(&node.name) {
            println!("      skipped: true");
        }
    }

    debug!("dry-run complete (no execution)");
}
