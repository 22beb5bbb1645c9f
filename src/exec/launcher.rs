// src/exec/launcher.rs

//! The seam between execution units and whatever actually runs task code.
//!
//! Production uses [`ProcessLauncher`](super::ProcessLauncher), which runs
//! each attempt in a fresh worker process. Tests plug in launchers that never
//! touch the OS.

use std::future::Future;
use std::pin::Pin;

use tokio_util::sync::CancellationToken;

use crate::engine::events::EventSender;
use crate::engine::store::StoreWrite;
use crate::errors::Result;
use crate::exec::protocol::AttemptRequest;

/// What came back from one attempt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttemptReport {
    pub failed: bool,
    /// The attempt stopped because `cancel` fired.
    pub aborted: bool,
    /// Shared store writes, in the order the task made them.
    pub store_writes: Vec<StoreWrite>,
}

impl AttemptReport {
    pub fn succeeded() -> Self {
        Self::default()
    }

    pub fn failed() -> Self {
        Self {
            failed: true,
            ..Self::default()
        }
    }

    pub fn aborted() -> Self {
        Self {
            failed: true,
            aborted: true,
            ..Self::default()
        }
    }
}

/// Runs one attempt of one task.
///
/// Implementations must:
/// - tag every log line they forward through `events` with `request.name`
/// - react to `cancel` by asking the task to stop and reporting
///   `aborted: true` once it has
///
/// An `Err` means the attempt could not be started or supervised at all
/// (spawn failure, broken pipe). The owning unit treats that as fatal for
/// the unit rather than retrying.
pub trait TaskLauncher: Send + Sync {
    fn launch(
        &self,
        request: AttemptRequest,
        events: EventSender,
        cancel: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<AttemptReport>> + Send + '_>>;
}
