// src/task/kind.rs

use serde::{Deserialize, Serialize};

use super::handler::PhaseHandler;
use super::program::ProgramSpec;
use crate::coordinator::{ParallelCoordinator, SerialCoordinator};

/// What a task does. Dispatches to the matching [`PhaseHandler`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskKind {
    /// An ordinary program run on the resource.
    Program(ProgramSpec),
    /// Runs its members one after another inside a single remote job.
    Serializer,
    /// Releases its members to run as independent remote jobs.
    Parallelizer,
}

impl TaskKind {
    pub fn program(tool: impl Into<String>) -> Self {
        TaskKind::Program(ProgramSpec::new(tool))
    }

    pub fn name(&self) -> &str {
        match self {
            TaskKind::Program(spec) => &spec.tool,
            TaskKind::Serializer => "Serializer",
            TaskKind::Parallelizer => "Parallelizer",
        }
    }

    pub fn is_coordinator(&self) -> bool {
        matches!(self, TaskKind::Serializer | TaskKind::Parallelizer)
    }

    pub fn handler(&self) -> &dyn PhaseHandler {
        match self {
            TaskKind::Program(spec) => spec,
            TaskKind::Serializer => &SerialCoordinator,
            TaskKind::Parallelizer => &ParallelCoordinator,
        }
    }
}
