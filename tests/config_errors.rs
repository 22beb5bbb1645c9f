use std::io::Write;

use dagrun::config::{load_and_validate, validate_variants};
use dagrun::dag::Selection;
use dagrun::errors::{DagrunError, Result};
use dagrun::task::builtin;
use tempfile::NamedTempFile;

fn load(toml: &str) -> Result<dagrun::config::JobFile> {
    let mut file = NamedTempFile::new()?;
    file.write_all(toml.as_bytes())?;
    load_and_validate(file.path())
}

#[test]
fn dependency_cycle_is_rejected() {
    let err = load(
        r#"
[task.a]
variant = "Sleep"
depends_on = ["c"]

[task.b]
variant = "Sleep"
depends_on = ["a"]

[task.c]
variant = "Sleep"
depends_on = ["b"]
"#,
    )
    .unwrap_err();

    assert!(matches!(err, DagrunError::DagCycle(_)), "got {err}");
}

#[test]
fn unknown_dependency_is_rejected() {
    let err = load(
        r#"
[task.a]
variant = "Sleep"
depends_on = ["ghost"]
"#,
    )
    .unwrap_err();

    match err {
        DagrunError::UnknownDependency { task, dep } => {
            assert_eq!(task, "a");
            assert_eq!(dep, "ghost");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn self_dependency_is_rejected() {
    let err = load(
        r#"
[task.a]
variant = "Sleep"
depends_on = ["a"]
"#,
    )
    .unwrap_err();

    assert!(matches!(err, DagrunError::SelfDependency(ref t) if t == "a"));
}

#[test]
fn unknown_variant_is_reported_by_name() {
    let job = load(
        r#"
[task.a]
variant = "Teleport"
"#,
    )
    .unwrap();

    let registry = builtin::registry().unwrap();
    let err = validate_variants(job.graph(), &registry).unwrap_err();
    assert!(
        matches!(err, DagrunError::UnknownVariant { ref variant, .. } if variant == "Teleport")
    );
}

#[test]
fn bad_parameters_for_builtin_variant_are_reported() {
    let job = load(
        r#"
[task.nap]
variant = "Sleep"
parameters = { seconds = "soon" }
"#,
    )
    .unwrap();

    let registry = builtin::registry().unwrap();
    let err = validate_variants(job.graph(), &registry).unwrap_err();
    assert!(matches!(err, DagrunError::InvalidParameters { ref task, .. } if task == "nap"));
}

#[test]
fn well_formed_job_passes_every_check() {
    let job = load(
        r#"
[config]
name = "nightly"
max_concurrency = 4

[task.extract]
variant = "Shell"
parameters = { cmd = "echo extract" }

[task.transform]
variant = "Sleep"
depends_on = ["extract"]
max_attempts = 3
backoff = 0.5
parameters = { seconds = 0.1 }

[task.load]
variant = "Store"
depends_on = ["transform"]
parameters = { set = { loaded = true } }
"#,
    )
    .unwrap();

    let registry = builtin::registry().unwrap();
    validate_variants(job.graph(), &registry).unwrap();
    assert_eq!(job.graph().len(), 3);
    assert_eq!(job.config().name, "nightly");
}

#[test]
fn out_of_range_durations_are_config_errors() {
    let err = load(
        r#"
[task.a]
variant = "Sleep"
backoff = 1e30
"#,
    )
    .unwrap_err();
    assert!(matches!(err, DagrunError::ConfigError(ref m) if m.contains("backoff")), "got {err}");

    let err = load(
        r#"
[config]
checkpoint_interval_seconds = 1e300

[task.a]
variant = "Sleep"
"#,
    )
    .unwrap_err();
    assert!(
        matches!(err, DagrunError::ConfigError(ref m) if m.contains("checkpoint_interval_seconds")),
        "got {err}"
    );
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = load_and_validate(dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, DagrunError::IoError(_)));
}

#[test]
fn selection_of_unknown_task_is_rejected() {
    let job = load(
        r#"
[task.a]
variant = "Sleep"
"#,
    )
    .unwrap();

    let selection = Selection {
        run_to: Some("zzz".into()),
        ..Selection::default()
    };
    let err = selection.skipped(job.graph()).unwrap_err();
    assert!(matches!(err, DagrunError::TaskNotFound(ref t) if t == "zzz"));
}
