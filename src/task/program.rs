// src/task/program.rs

//! Plain program tasks, driven entirely by their parameters.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::handler::{PhaseContext, PhaseHandler};
use super::Task;
use crate::engine::Engine;
use crate::errors::Result;
use crate::status::Phase;

/// Shell lines run remotely.
pub const COMMANDS_PARAM: &str = "commands";
/// Items synchronized into the local cache before setup completes.
pub const INPUTS_PARAM: &str = "inputs";
/// Items pushed back to central storage during post-processing.
pub const OUTPUTS_PARAM: &str = "outputs";
/// Expected remote run time in seconds.
pub const WALLTIME_PARAM: &str = "walltime_secs";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramSpec {
    pub tool: String,
    #[serde(default)]
    pub recoverable: BTreeSet<Phase>,
    #[serde(default)]
    pub restartable: BTreeSet<Phase>,
}

impl ProgramSpec {
    pub fn new(tool: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            recoverable: BTreeSet::new(),
            restartable: BTreeSet::new(),
        }
    }

    pub fn recoverable_at(mut self, phases: impl IntoIterator<Item = Phase>) -> Self {
        self.recoverable.extend(phases);
        self
    }

    pub fn restartable_at(mut self, phases: impl IntoIterator<Item = Phase>) -> Self {
        self.restartable.extend(phases);
        self
    }
}

impl PhaseHandler for ProgramSpec {
    fn setup(&self, task: &mut Task, ctx: &PhaseContext<'_>) -> Result<bool> {
        let inputs: Vec<String> = task.param(INPUTS_PARAM)?.unwrap_or_default();
        for item in &inputs {
            ctx.sync.sync_in(item)?;
            debug!(task = %task.fullname(), item = %item, "input synchronized");
        }
        if !inputs.is_empty() {
            task.addlog(format!("Synchronized {} input(s).", inputs.len()));
        }
        Ok(true)
    }

    fn remote_commands(&self, task: &Task, _ctx: &PhaseContext<'_>) -> Result<Option<Vec<String>>> {
        let commands: Vec<String> = task.param(COMMANDS_PARAM)?.unwrap_or_default();
        Ok(Some(commands))
    }

    fn save_results(&self, task: &mut Task, ctx: &PhaseContext<'_>) -> Result<bool> {
        let outputs: Vec<String> = task.param(OUTPUTS_PARAM)?.unwrap_or_default();
        for item in &outputs {
            ctx.sync.sync_out(item)?;
        }
        if !outputs.is_empty() {
            task.addlog(format!("Saved {} output(s).", outputs.len()));
        }
        Ok(true)
    }

    fn walltime(&self, task: &Task, _engine: &Engine) -> Result<Option<Duration>> {
        Ok(task.param::<u64>(WALLTIME_PARAM)?.map(Duration::from_secs))
    }

    fn recoverable(&self, phase: Phase) -> bool {
        self.recoverable.contains(&phase)
    }

    fn restartable(&self, phase: Phase) -> bool {
        self.restartable.contains(&phase)
    }
}
