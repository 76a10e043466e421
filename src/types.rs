// src/types.rs

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use crate::task::TaskKind;

/// Which coordinator the batch factory creates for each group.
///
/// - `Serial`: members run one after another inside a single remote job.
/// - `Parallel`: members run as independent remote jobs; the coordinator
///   only fences their start and reports on their completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordinatorKind {
    Serial,
    Parallel,
}

impl Default for CoordinatorKind {
    fn default() -> Self {
        CoordinatorKind::Serial
    }
}

impl CoordinatorKind {
    pub fn task_kind(self) -> TaskKind {
        match self {
            CoordinatorKind::Serial => TaskKind::Serializer,
            CoordinatorKind::Parallel => TaskKind::Parallelizer,
        }
    }

    /// Name of the tool coordinator tasks of this kind run under.
    pub fn tool_name(self) -> &'static str {
        match self {
            CoordinatorKind::Serial => "Serializer",
            CoordinatorKind::Parallel => "Parallelizer",
        }
    }

    /// Default description of the tool config created on first use.
    pub fn tool_config_description(self) -> String {
        let role = match self {
            CoordinatorKind::Serial => {
                "the serialization factor is determined by the batch options"
            }
            CoordinatorKind::Parallel => {
                "the number of members per group is determined by the batch options"
            }
        };
        format!(
            "Standard {}\n\nAutomatically created by taskgate.\n\
             Note that the suggested number of CPUs defined here is not in fact used.\n\
             Instead, {role}.\n",
            self.tool_name()
        )
    }
}

impl fmt::Display for CoordinatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tool_name())
    }
}

impl FromStr for CoordinatorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "serial" | "serializer" => Ok(CoordinatorKind::Serial),
            "parallel" | "parallelizer" => Ok(CoordinatorKind::Parallel),
            other => Err(format!(
                "invalid coordinator: {other} (expected \"serial\" or \"parallel\")"
            )),
        }
    }
}
