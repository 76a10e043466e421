// src/prereq/mod.rs

//! Inter-task prerequisites: "task X may start phase P only once task Y
//! is in a status matching a pattern".
//!
//! Edges live on the dependent task, one map per gated phase. The cluster
//! phase has no map of its own; a task held for a coordinator is gated by
//! its `configure_only` flag instead.

mod evaluator;
mod pattern;

pub use evaluator::{Evaluation, PrerequisiteEvaluator, Verdict};
pub use pattern::StatusPattern;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::{EngineError, Result};
use crate::status::Phase;
use crate::task::{Task, TaskId};

/// Prerequisite edges of one task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prerequisites {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub for_setup: BTreeMap<TaskId, StatusPattern>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub for_post_processing: BTreeMap<TaskId, StatusPattern>,
}

impl Prerequisites {
    pub fn is_empty(&self) -> bool {
        self.for_setup.is_empty() && self.for_post_processing.is_empty()
    }

    /// Edge map gating `phase`, if the phase can be gated at all.
    pub fn for_phase(&self, phase: Phase) -> Option<&BTreeMap<TaskId, StatusPattern>> {
        match phase {
            Phase::Setup => Some(&self.for_setup),
            Phase::Cluster => None,
            Phase::PostProcessing => Some(&self.for_post_processing),
        }
    }

    fn for_phase_mut(&mut self, phase: Phase) -> Option<&mut BTreeMap<TaskId, StatusPattern>> {
        match phase {
            Phase::Setup => Some(&mut self.for_setup),
            Phase::Cluster => None,
            Phase::PostProcessing => Some(&mut self.for_post_processing),
        }
    }
}

/// Add (or replace) the edge "`task` waits in `phase` for `other` to match
/// `pattern`".
///
/// Idempotent. Works on tasks not yet persisted; the self-reference check
/// only applies once the task has an id.
pub fn add_prerequisite(
    task: &mut Task,
    other: TaskId,
    phase: Phase,
    pattern: StatusPattern,
) -> Result<()> {
    if task.id == Some(other) {
        return Err(EngineError::InvalidPrerequisite(format!(
            "task {other} cannot depend on itself"
        )));
    }
    let Some(edges) = task.prerequisites.for_phase_mut(phase) else {
        return Err(EngineError::InvalidPrerequisite(format!(
            "phase '{phase}' does not take prerequisites"
        )));
    };
    edges.insert(other, pattern);
    Ok(())
}

/// Remove the edge on `other` for `phase`. Absent edges are ignored.
pub fn remove_prerequisite(task: &mut Task, other: TaskId, phase: Phase) {
    if let Some(edges) = task.prerequisites.for_phase_mut(phase) {
        edges.remove(&other);
    }
}
