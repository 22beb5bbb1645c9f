// src/task/builtin.rs

//! Task variants shipped with the `dagrun` binary.

use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, bail};
use serde::Deserialize;
use serde_json::Value;

use crate::errors::Result;
use crate::task::{Task, TaskContext, TaskRegistry};
use crate::types::Severity;

/// Registry holding every built-in variant.
pub fn registry() -> Result<TaskRegistry> {
    let mut registry = TaskRegistry::new();
    registry
        .register::<Shell>("Shell")?
        .register::<Sleep>("Sleep")?
        .register::<Fail>("Fail")?
        .register::<Flaky>("Flaky")?
        .register::<Store>("Store")?;
    Ok(registry)
}

/// Run a shell command, streaming its output as log events.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Shell {
    pub cmd: String,
    #[serde(skip)]
    child: Mutex<Option<Child>>,
}

impl Shell {
    fn command(&self) -> Command {
        #[cfg(target_os = "windows")]
        {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(&self.cmd);
            c
        }

        #[cfg(not(target_os = "windows"))]
        {
            let mut c = Command::new("sh");
            c.arg("-c").arg(&self.cmd);
            c
        }
    }
}

impl Task for Shell {
    fn run(&self, ctx: &TaskContext) -> anyhow::Result<()> {
        ctx.debug(format!("running shell command: {}", self.cmd));

        let mut child = self
            .command()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to spawn `{}`", self.cmd))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        *self.child.lock().unwrap_or_else(|p| p.into_inner()) = Some(child);

        thread::scope(|s| {
            if let Some(err) = stderr {
                s.spawn(|| forward_lines(err, ctx, Severity::Warning));
            }
            if let Some(out) = stdout {
                forward_lines(out, ctx, Severity::Info);
            }
        });

        let status = match self.child.lock().unwrap_or_else(|p| p.into_inner()).take() {
            Some(mut child) => child.wait().context("failed to wait for shell command")?,
            None => bail!("shell command was killed"),
        };

        if !status.success() {
            bail!("`{}` exited with {status}", self.cmd);
        }
        Ok(())
    }

    fn on_abort(&self, ctx: &TaskContext) -> anyhow::Result<()> {
        if let Some(child) = self
            .child
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_mut()
        {
            ctx.warn(format!("killing shell command: {}", self.cmd));
            child.kill().context("failed to kill shell command")?;
        }
        Ok(())
    }
}

fn forward_lines<R: Read>(reader: R, ctx: &TaskContext, severity: Severity) {
    for line in BufReader::new(reader).lines() {
        match line {
            Ok(line) => ctx.log(severity, line),
            Err(_) => break,
        }
    }
}

/// Sleep for a while, returning early when aborted.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Sleep {
    #[serde(default)]
    pub seconds: f64,
}

impl Task for Sleep {
    fn run(&self, ctx: &TaskContext) -> anyhow::Result<()> {
        if !self.seconds.is_finite() || self.seconds < 0.0 {
            bail!("seconds must be a non-negative number (got {})", self.seconds);
        }

        let deadline = Instant::now() + Duration::from_secs_f64(self.seconds);
        while Instant::now() < deadline {
            if ctx.is_aborted() {
                return Ok(());
            }
            let left = deadline.saturating_duration_since(Instant::now());
            thread::sleep(left.min(Duration::from_millis(50)));
        }
        ctx.debug(format!("slept {}s", self.seconds));
        Ok(())
    }

    fn on_abort(&self, ctx: &TaskContext) -> anyhow::Result<()> {
        ctx.warn("abort requested");
        Ok(())
    }
}

/// Always fails.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Fail {
    #[serde(default = "default_fail_message")]
    pub message: String,
}

fn default_fail_message() -> String {
    "task failed on purpose".to_string()
}

impl Task for Fail {
    fn run(&self, _ctx: &TaskContext) -> anyhow::Result<()> {
        bail!("{}", self.message)
    }
}

/// Fails every attempt before `succeed_on_attempt`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Flaky {
    pub succeed_on_attempt: u32,
}

impl Task for Flaky {
    fn run(&self, ctx: &TaskContext) -> anyhow::Result<()> {
        if ctx.attempt() < self.succeed_on_attempt {
            ctx.warn(format!(
                "attempt {} of a flaky task, succeeding on {}",
                ctx.attempt(),
                self.succeed_on_attempt
            ));
            ctx.fail();
        }
        Ok(())
    }
}

/// Write values into the shared store, optionally requiring keys written
/// by upstream tasks.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Store {
    #[serde(default)]
    pub set: BTreeMap<String, Value>,
    #[serde(default)]
    pub require: Vec<String>,
}

impl Task for Store {
    fn run(&self, ctx: &TaskContext) -> anyhow::Result<()> {
        let missing: Vec<&str> = self
            .require
            .iter()
            .filter(|k| !ctx.store().contains(k))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            bail!("missing shared store keys: {}", missing.join(", "));
        }

        for key in &self.require {
            if let Some(value) = ctx.store().get(key) {
                ctx.info(format!("{key} = {value}"));
            }
        }
        for (key, value) in &self.set {
            ctx.store().set(key.clone(), value.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::exec::protocol::{ChildFrame, FrameSink, MemorySink};
    use crate::task::{TaskMetadata, run_lifecycle};

    fn context(attempt: u32, store: BTreeMap<String, Value>) -> (TaskContext, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::default());
        let dyn_sink: Arc<dyn FrameSink> = sink.clone();
        let ctx = TaskContext::new(
            TaskMetadata {
                name: "t".into(),
                variant: "test".into(),
                depends_on: vec![],
            },
            attempt,
            attempt > 1,
            store,
            dyn_sink,
        );
        (ctx, sink)
    }

    fn build(variant: &str, params: Value) -> Box<dyn Task> {
        registry().unwrap().construct(variant, &params).unwrap()
    }

    #[test]
    fn registry_has_all_variants() {
        let reg = registry().unwrap();
        let names: Vec<_> = reg.variants().collect();
        assert_eq!(names, vec!["Fail", "Flaky", "Shell", "Sleep", "Store"]);
    }

    #[test]
    fn fail_always_fails() {
        let (ctx, _) = context(1, BTreeMap::new());
        assert!(run_lifecycle(&*build("Fail", json!({})), &ctx));
    }

    #[test]
    fn flaky_succeeds_on_configured_attempt() {
        let task = build("Flaky", json!({ "succeed_on_attempt": 3 }));
        for attempt in 1..=2 {
            let (ctx, _) = context(attempt, BTreeMap::new());
            assert!(run_lifecycle(&*task, &ctx));
        }
        let (ctx, _) = context(3, BTreeMap::new());
        assert!(!run_lifecycle(&*task, &ctx));
    }

    #[test]
    fn store_requires_and_sets_keys() {
        let task = build(
            "Store",
            json!({ "set": { "out": 2 }, "require": ["in"] }),
        );

        let (ctx, _) = context(1, BTreeMap::new());
        assert!(run_lifecycle(&*task, &ctx));

        let (ctx, sink) = context(1, BTreeMap::from([("in".to_string(), json!(1))]));
        assert!(!run_lifecycle(&*task, &ctx));
        assert!(sink.frames().iter().any(|f| matches!(
            f,
            ChildFrame::StoreSet { key, value } if key == "out" && *value == json!(2)
        )));
    }

    #[test]
    fn sleep_rejects_negative_seconds() {
        let (ctx, _) = context(1, BTreeMap::new());
        assert!(run_lifecycle(&*build("Sleep", json!({ "seconds": -1.0 })), &ctx));
    }

    #[cfg(unix)]
    #[test]
    fn shell_streams_output_and_reports_exit_status() {
        let ok = build("Shell", json!({ "cmd": "echo hello; echo oops >&2" }));
        let (ctx, sink) = context(1, BTreeMap::new());
        assert!(!run_lifecycle(&*ok, &ctx));

        let frames = sink.frames();
        assert!(frames.iter().any(|f| matches!(
            f,
            ChildFrame::Log { severity: Severity::Info, message } if message == "hello"
        )));
        assert!(frames.iter().any(|f| matches!(
            f,
            ChildFrame::Log { severity: Severity::Warning, message } if message == "oops"
        )));

        let bad = build("Shell", json!({ "cmd": "exit 3" }));
        let (ctx, _) = context(1, BTreeMap::new());
        assert!(run_lifecycle(&*bad, &ctx));
    }

    #[test]
    fn unknown_parameters_are_rejected() {
        let reg = registry().unwrap();
        assert!(reg.construct("Sleep", &json!({ "secs": 1 })).is_err());
    }
}
