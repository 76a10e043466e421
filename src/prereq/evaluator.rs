// src/prereq/evaluator.rs

use std::fmt;

use tracing::trace;

use crate::errors::{EngineError, Result};
use crate::status::Phase;
use crate::store::TaskStore;
use crate::task::Task;

/// Outcome of checking a task's prerequisites for one phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Every edge is satisfied.
    Go,
    /// Some edge is not satisfied yet but may still be.
    Wait,
    /// Some edge can never be satisfied.
    Fail,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Verdict::Go => "go",
            Verdict::Wait => "wait",
            Verdict::Fail => "fail",
        })
    }
}

/// A verdict with one human-readable line per unmet edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub verdict: Verdict,
    pub reasons: Vec<String>,
}

impl Evaluation {
    fn go() -> Self {
        Self {
            verdict: Verdict::Go,
            reasons: Vec::new(),
        }
    }
}

/// Read-only view over the store answering "may this task enter that
/// phase?".
pub struct PrerequisiteEvaluator<'a> {
    store: &'a dyn TaskStore,
}

impl<'a> PrerequisiteEvaluator<'a> {
    pub fn new(store: &'a dyn TaskStore) -> Self {
        Self { store }
    }

    /// Check every edge gating `phase`.
    ///
    /// An edge fails when the other task is missing, is the task itself,
    /// or has settled in a status the pattern rejects. It waits while the
    /// other task is still moving.
    pub fn evaluate(&self, task: &Task, phase: Phase) -> Result<Evaluation> {
        let Some(edges) = task.prerequisites.for_phase(phase) else {
            return Ok(Evaluation::go());
        };

        let mut failed = Vec::new();
        let mut waiting = Vec::new();

        for (&other_id, pattern) in edges {
            if task.id == Some(other_id) {
                failed.push(format!("Task {other_id} is a prerequisite of itself."));
                continue;
            }
            let other = match self.store.read(other_id) {
                Ok(other) => other,
                Err(EngineError::TaskNotFound(_)) => {
                    failed.push(format!("Prerequisite task {other_id} no longer exists."));
                    continue;
                }
                Err(e) => return Err(e),
            };

            if pattern.matches(other.status) {
                continue;
            }
            let line = format!(
                "Task {} is in state '{}' while we wanted it in '{}'.",
                other.fullname(),
                other.status,
                pattern
            );
            if other.status.is_settled() {
                failed.push(line);
            } else {
                waiting.push(line);
            }
        }

        let evaluation = if !failed.is_empty() {
            Evaluation {
                verdict: Verdict::Fail,
                reasons: failed,
            }
        } else if !waiting.is_empty() {
            Evaluation {
                verdict: Verdict::Wait,
                reasons: waiting,
            }
        } else {
            Evaluation::go()
        };

        trace!(task = ?task.id, phase = %phase, verdict = %evaluation.verdict, "prerequisites evaluated");
        Ok(evaluation)
    }

    /// True only when every edge gating `phase` is satisfied.
    pub fn can_enter(&self, task: &Task, phase: Phase) -> Result<bool> {
        Ok(self.evaluate(task, phase)?.verdict == Verdict::Go)
    }
}
