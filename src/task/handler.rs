// src/task/handler.rs

//! The per-kind seam the worker and the recovery controller call into.

use std::path::Path;
use std::time::Duration;

use super::Task;
use crate::engine::Engine;
use crate::errors::Result;
use crate::exec::{DataSync, ResourceCapabilities, WorkArea};
use crate::status::{Phase, StatusHook};

/// Collaborators handed to phase handlers by the worker.
pub struct PhaseContext<'a> {
    pub engine: &'a Engine,
    pub sync: &'a dyn DataSync,
    pub capabilities: &'a ResourceCapabilities,
    /// Root under which every task of this resource gets its work area.
    pub work_root: &'a Path,
}

impl PhaseContext<'_> {
    pub fn work_area(&self, task: &Task) -> Result<WorkArea> {
        WorkArea::for_task(self.work_root, task)
    }
}

/// Phase callbacks of one task kind.
///
/// Recovery and restart are opt-in per phase: the defaults refuse, and the
/// refusal is written to the task's log by the caller.
pub trait PhaseHandler: Send + Sync {
    /// Prepare the work area. `Ok(false)` or an error fails the setup.
    fn setup(&self, task: &mut Task, ctx: &PhaseContext<'_>) -> Result<bool>;

    /// Shell lines the remote job runs. `None` means there is no remote
    /// work and the cluster phase completes immediately.
    fn remote_commands(&self, task: &Task, ctx: &PhaseContext<'_>) -> Result<Option<Vec<String>>>;

    /// Collect results once the remote work is over.
    fn save_results(&self, task: &mut Task, ctx: &PhaseContext<'_>) -> Result<bool>;

    /// Upper bound on the remote job's duration, if known.
    fn walltime(&self, _task: &Task, _engine: &Engine) -> Result<Option<Duration>> {
        Ok(None)
    }

    fn recoverable(&self, _phase: Phase) -> bool {
        false
    }

    /// Clean up after a failure in `phase` so it can be attempted again.
    fn recover_from(&self, _engine: &Engine, _task: &mut Task, phase: Phase) -> Result<bool> {
        Ok(self.recoverable(phase))
    }

    fn restartable(&self, _phase: Phase) -> bool {
        false
    }

    /// Prepare a new run starting at `phase`.
    fn prepare_restart(&self, _engine: &Engine, _task: &mut Task, phase: Phase) -> Result<bool> {
        Ok(self.restartable(phase))
    }

    /// Log lines explaining why a restart at `phase` is refused.
    fn restart_refusal(&self, _phase: Phase) -> Vec<String> {
        vec!["This task is not programmed for restarts.".to_string()]
    }

    /// Hooks that apply to tasks of this kind only.
    fn status_hooks(&self) -> Vec<StatusHook> {
        Vec::new()
    }
}
