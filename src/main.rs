// src/main.rs

use dagrun::exec::worker;
use dagrun::task::builtin;
use dagrun::{cli, logging, run};

/// Exit status when the run could not start at all.
const ERROR_EXIT_CODE: i32 = 255;

/// Failure counts above this are reported as this value so they never wrap
/// around to a success status.
const MAX_FAILURE_EXIT_CODE: usize = 254;

fn main() {
    let args = cli::parse();

    let registry = match builtin::registry() {
        Ok(registry) => registry,
        Err(err) => {
            eprintln!("dagrun error: {err}");
            std::process::exit(ERROR_EXIT_CODE);
        }
    };

    // Worker mode owns stdout for the protocol and must not start the
    // orchestrator runtime or logging.
    if args.is_worker() {
        std::process::exit(worker::serve(&registry));
    }

    match run_main(args, &registry) {
        Ok(failures) => std::process::exit(failures.min(MAX_FAILURE_EXIT_CODE) as i32),
        Err(err) => {
            eprintln!("dagrun error: {err:?}");
            std::process::exit(ERROR_EXIT_CODE);
        }
    }
}

fn run_main(args: cli::CliArgs, registry: &dagrun::task::TaskRegistry) -> anyhow::Result<usize> {
    logging::init_logging(args.log_level)?;
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run(args, registry))
}
