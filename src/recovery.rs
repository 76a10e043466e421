// src/recovery.rs

//! Recovery and restart of settled tasks.
//!
//! Both actions are opt-in per task kind and per phase. A refused action
//! returns `false` and leaves the reason in the task's audit log. An
//! accepted one claims the task by moving it into the matching
//! `Recover ...` / `Restart ...` status, runs the kind's preparation on a
//! working copy, and then resolves to the phase's entry status (success) or
//! back to where the task came from (failure).

use tracing::{info, warn};

use crate::engine::Engine;
use crate::errors::Result;
use crate::status::{Phase, Status};
use crate::task::TaskId;

pub struct RecoveryController<'a> {
    engine: &'a Engine,
}

impl<'a> RecoveryController<'a> {
    pub fn new(engine: &'a Engine) -> Self {
        Self { engine }
    }

    /// Retry the phase a task failed in, keeping its run number.
    ///
    /// Tasks that failed on prerequisites are reset directly, so that the
    /// prerequisites are checked again.
    pub fn recover(&self, id: TaskId) -> Result<bool> {
        let task = self.engine.read(id)?;
        let origin = task.status;

        let reset = match origin {
            Status::FailedSetupPrerequisites => Some(Phase::Setup),
            Status::FailedPostProcessPrerequisites => Some(Phase::PostProcessing),
            _ => None,
        };
        if let Some(phase) = reset {
            return self.engine.transition_with_log(
                id,
                origin,
                phase.entry_status(),
                &format!("Resetting prerequisites checking for '{}'.", phase.label()),
            );
        }

        let Some(phase) = origin.failed_phase() else {
            self.refuse(id, &[format!("Cannot recover a task in state '{origin}'.")])?;
            return Ok(false);
        };
        if !task.handler().recoverable(phase) {
            self.refuse(
                id,
                &[format!(
                    "This task is not programmed for recovery from '{}'.",
                    phase.label()
                )],
            )?;
            return Ok(false);
        }

        let recovering = phase.recover_status();
        let claimed = self.engine.update(id, |t| {
            if t.status != origin {
                return Ok(false);
            }
            t.addlog(format!("Attempting recovery from '{origin}'."));
            t.status = recovering;
            Ok(true)
        })?;
        let Some(mut work) = claimed else {
            return Ok(false);
        };

        let mark = work.log.len();
        let kind = work.kind.clone();
        let recovered = match kind.handler().recover_from(self.engine, &mut work, phase) {
            Ok(ok) => ok,
            Err(e) => {
                work.addlog(format!("Recovery from '{}' raised an error: {e}", phase.label()));
                false
            }
        };

        let to = if recovered {
            work.addlog(format!("Successful recovery from '{origin}', now we retry it."));
            if phase == Phase::Cluster {
                work.job = None;
            }
            phase.entry_status()
        } else {
            work.addlog(format!("Cannot recover from '{origin}'. Returning task to its failed state."));
            origin
        };

        let saved = self.engine.commit_work(&work, recovering, mark, to)?;
        info!(task = %work.fullname(), from = %origin, recovered, "recovery resolved");
        Ok(recovered && saved.is_some())
    }

    /// Start a new run of a settled task at `phase`, incrementing its run
    /// number.
    ///
    /// Terminated and duplicated tasks can only be restarted from setup.
    pub fn restart(&self, id: TaskId, phase: Phase) -> Result<bool> {
        let task = self.engine.read(id)?;
        let origin = task.status;

        if !origin.is_settled() {
            self.refuse(id, &[format!("Cannot restart a task in state '{origin}'.")])?;
            return Ok(false);
        }

        let handler = task.handler();
        if !handler.restartable(phase) {
            self.refuse(id, &handler.restart_refusal(phase))?;
            return Ok(false);
        }
        let phase = match origin {
            Status::Terminated | Status::Duplicated if phase != Phase::Setup => {
                if !handler.restartable(Phase::Setup) {
                    self.refuse(id, &handler.restart_refusal(Phase::Setup))?;
                    return Ok(false);
                }
                Phase::Setup
            }
            _ => phase,
        };

        let restarting = phase.restart_status();
        let claimed = self.engine.update(id, |t| {
            if t.status != origin {
                return Ok(false);
            }
            t.addlog(format!("Attempting restart at '{}'.", phase.label()));
            t.status = restarting;
            Ok(true)
        })?;
        let Some(mut work) = claimed else {
            return Ok(false);
        };

        let mark = work.log.len();
        let kind = work.kind.clone();
        let prepared = match kind.handler().prepare_restart(self.engine, &mut work, phase) {
            Ok(ok) => ok,
            Err(e) => {
                work.addlog(format!("Restart preparation raised an error: {e}"));
                false
            }
        };

        let to = if prepared {
            work.run_number += 1;
            work.job = None;
            work.addlog(format!("This task's run number was increased to {}.", work.run_number));
            phase.entry_status()
        } else {
            work.addlog(format!(
                "Cannot restart at '{}'. Returning task status to '{origin}'.",
                phase.label()
            ));
            origin
        };

        let saved = self.engine.commit_work(&work, restarting, mark, to)?;
        info!(task = %work.fullname(), from = %origin, phase = %phase, prepared, "restart resolved");
        Ok(prepared && saved.is_some())
    }

    fn refuse(&self, id: TaskId, lines: &[String]) -> Result<()> {
        warn!(task = id, reason = ?lines, "request refused");
        self.engine.update(id, |t| {
            for line in lines {
                t.addlog(line.as_str());
            }
            Ok(true)
        })?;
        Ok(())
    }
}
