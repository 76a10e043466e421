// src/engine/gate.rs

//! Phase gating: prerequisites decide whether a task may leave a phase's
//! entry status, and the move into the phase's first status is written
//! conditionally so that only one worker ever starts a given phase.

use tracing::{debug, info};

use super::Engine;
use crate::errors::Result;
use crate::prereq::Verdict;
use crate::status::{Phase, Status};
use crate::task::{Task, TaskId};

/// Result of trying to start a phase.
#[derive(Debug, Clone)]
pub enum PhaseEntry {
    /// The task now sits in the phase's first status; the caller owns it.
    Entered(Task),
    /// Prerequisites not met yet (or the task is held for a coordinator).
    /// Nothing was written.
    Deferred,
    /// A prerequisite can never be met; the task was moved to the phase's
    /// prerequisite-failure status.
    PrerequisitesFailed(Task),
    /// The task was not in the phase's entry status, or another actor moved
    /// it first.
    NotApplicable(Status),
}

impl Engine {
    /// Try to move `id` from `phase`'s entry status into its first status.
    pub fn try_enter_phase(&self, id: TaskId, phase: Phase) -> Result<PhaseEntry> {
        let task = self.read(id)?;
        let entry = phase.entry_status();
        if task.status != entry {
            return Ok(PhaseEntry::NotApplicable(task.status));
        }

        if phase == Phase::Cluster && task.configure_only {
            debug!(task = %task.fullname(), "held for its coordinator");
            return Ok(PhaseEntry::Deferred);
        }

        let evaluation = self.evaluator().evaluate(&task, phase)?;
        match evaluation.verdict {
            Verdict::Wait => {
                debug!(
                    task = %task.fullname(),
                    phase = %phase,
                    reasons = ?evaluation.reasons,
                    "prerequisites not met yet"
                );
                Ok(PhaseEntry::Deferred)
            }
            Verdict::Go => {
                let first = phase.first_status();
                let saved = self.update(id, |t| {
                    if t.status != entry {
                        return Ok(false);
                    }
                    t.status = first;
                    Ok(true)
                })?;
                match saved {
                    Some(task) => Ok(PhaseEntry::Entered(task)),
                    None => Ok(PhaseEntry::NotApplicable(self.read(id)?.status)),
                }
            }
            Verdict::Fail => {
                let Some(failed) = phase.prerequisites_failed_status() else {
                    return Ok(PhaseEntry::Deferred);
                };
                let saved = self.update(id, |t| {
                    if t.status != entry {
                        return Ok(false);
                    }
                    for reason in &evaluation.reasons {
                        t.addlog(reason.as_str());
                    }
                    t.addlog(format!("Prerequisites for '{}' can never be met.", phase.label()));
                    t.status = failed;
                    Ok(true)
                })?;
                match saved {
                    Some(task) => {
                        info!(task = %task.fullname(), phase = %phase, "prerequisites failed");
                        Ok(PhaseEntry::PrerequisitesFailed(task))
                    }
                    None => Ok(PhaseEntry::NotApplicable(self.read(id)?.status)),
                }
            }
        }
    }
}
