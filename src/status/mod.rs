// src/status/mod.rs

//! Task statuses, execution phases and the legal moves between them.
//!
//! Every task walks the same three-phase life cycle:
//!
//! ```text
//! Standby -> New -> Setting Up -> Configured -> Queued -> On CPU
//!         -> Data Ready -> Post Processing -> Completed
//! ```
//!
//! Each phase has a failure status, a recovery sub-state and a restart
//! sub-state. Statuses serialize as their human-readable names
//! (`"Failed To Setup"`, `"On CPU"`, ...), which is also what status
//! patterns match against.

mod hooks;
mod transitions;

pub use hooks::{HookFn, HookTable, StatusHook};
pub(crate) use hooks::fire as fire_hooks;
pub use transitions::{ensure_legal, is_legal};

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One of the three execution phases of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Setup,
    Cluster,
    PostProcessing,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::Setup, Phase::Cluster, Phase::PostProcessing];

    /// Status a task waits in before this phase may begin.
    pub fn entry_status(self) -> Status {
        match self {
            Phase::Setup => Status::New,
            Phase::Cluster => Status::Configured,
            Phase::PostProcessing => Status::DataReady,
        }
    }

    /// First in-flight status of the phase, written when the gate opens.
    pub fn first_status(self) -> Status {
        match self {
            Phase::Setup => Status::SettingUp,
            Phase::Cluster => Status::Queued,
            Phase::PostProcessing => Status::PostProcessing,
        }
    }

    pub fn failed_status(self) -> Status {
        match self {
            Phase::Setup => Status::FailedToSetup,
            Phase::Cluster => Status::FailedOnCluster,
            Phase::PostProcessing => Status::FailedToPostProcess,
        }
    }

    /// Status written when a prerequisite of this phase can never be met.
    ///
    /// The cluster phase carries no prerequisite map of its own.
    pub fn prerequisites_failed_status(self) -> Option<Status> {
        match self {
            Phase::Setup => Some(Status::FailedSetupPrerequisites),
            Phase::Cluster => None,
            Phase::PostProcessing => Some(Status::FailedPostProcessPrerequisites),
        }
    }

    pub fn recover_status(self) -> Status {
        match self {
            Phase::Setup => Status::RecoverSetup,
            Phase::Cluster => Status::RecoverCluster,
            Phase::PostProcessing => Status::RecoverPostProcess,
        }
    }

    pub fn restart_status(self) -> Status {
        match self {
            Phase::Setup => Status::RestartSetup,
            Phase::Cluster => Status::RestartCluster,
            Phase::PostProcessing => Status::RestartPostProcess,
        }
    }

    /// Short label used inside status names and log lines.
    pub fn label(self) -> &'static str {
        match self {
            Phase::Setup => "Setup",
            Phase::Cluster => "Cluster",
            Phase::PostProcessing => "PostProcess",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
            "setup" => Ok(Phase::Setup),
            "cluster" => Ok(Phase::Cluster),
            "post_processing" | "postprocess" | "post_process" => Ok(Phase::PostProcessing),
            other => Err(format!(
                "invalid phase: {other} (expected \"setup\", \"cluster\" or \"post_processing\")"
            )),
        }
    }
}

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Status {
    Standby,
    New,
    SettingUp,
    Configured,
    FailedToSetup,
    FailedSetupPrerequisites,
    Queued,
    OnHold,
    OnCpu,
    Suspended,
    DataReady,
    FailedOnCluster,
    PostProcessing,
    Completed,
    FailedToPostProcess,
    FailedPostProcessPrerequisites,
    Terminated,
    Duplicated,
    RecoverSetup,
    RecoverCluster,
    RecoverPostProcess,
    RestartSetup,
    RestartCluster,
    RestartPostProcess,
}

impl Status {
    pub const ALL: [Status; 24] = [
        Status::Standby,
        Status::New,
        Status::SettingUp,
        Status::Configured,
        Status::FailedToSetup,
        Status::FailedSetupPrerequisites,
        Status::Queued,
        Status::OnHold,
        Status::OnCpu,
        Status::Suspended,
        Status::DataReady,
        Status::FailedOnCluster,
        Status::PostProcessing,
        Status::Completed,
        Status::FailedToPostProcess,
        Status::FailedPostProcessPrerequisites,
        Status::Terminated,
        Status::Duplicated,
        Status::RecoverSetup,
        Status::RecoverCluster,
        Status::RecoverPostProcess,
        Status::RestartSetup,
        Status::RestartCluster,
        Status::RestartPostProcess,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Standby => "Standby",
            Status::New => "New",
            Status::SettingUp => "Setting Up",
            Status::Configured => "Configured",
            Status::FailedToSetup => "Failed To Setup",
            Status::FailedSetupPrerequisites => "Failed Setup Prerequisites",
            Status::Queued => "Queued",
            Status::OnHold => "On Hold",
            Status::OnCpu => "On CPU",
            Status::Suspended => "Suspended",
            Status::DataReady => "Data Ready",
            Status::FailedOnCluster => "Failed On Cluster",
            Status::PostProcessing => "Post Processing",
            Status::Completed => "Completed",
            Status::FailedToPostProcess => "Failed To PostProcess",
            Status::FailedPostProcessPrerequisites => "Failed PostProcess Prerequisites",
            Status::Terminated => "Terminated",
            Status::Duplicated => "Duplicated",
            Status::RecoverSetup => "Recover Setup",
            Status::RecoverCluster => "Recover Cluster",
            Status::RecoverPostProcess => "Recover PostProcess",
            Status::RestartSetup => "Restart Setup",
            Status::RestartCluster => "Restart Cluster",
            Status::RestartPostProcess => "Restart PostProcess",
        }
    }

    /// Phase this status belongs to, if any.
    ///
    /// `Standby`, `Completed`, `Terminated` and `Duplicated` sit outside the
    /// three phases.
    pub fn phase(self) -> Option<Phase> {
        use Status::*;
        match self {
            New | SettingUp | Configured | FailedToSetup | FailedSetupPrerequisites
            | RecoverSetup | RestartSetup => Some(Phase::Setup),
            Queued | OnHold | OnCpu | Suspended | FailedOnCluster | RecoverCluster
            | RestartCluster => Some(Phase::Cluster),
            DataReady | PostProcessing | FailedToPostProcess | FailedPostProcessPrerequisites
            | RecoverPostProcess | RestartPostProcess => Some(Phase::PostProcessing),
            Standby | Completed | Terminated | Duplicated => None,
        }
    }

    pub fn is_failed(self) -> bool {
        matches!(
            self,
            Status::FailedToSetup
                | Status::FailedSetupPrerequisites
                | Status::FailedOnCluster
                | Status::FailedToPostProcess
                | Status::FailedPostProcessPrerequisites
        )
    }

    /// Terminal for the purpose of prerequisite evaluation: the task will
    /// not move again without an explicit recover or restart.
    pub fn is_settled(self) -> bool {
        self.is_failed()
            || matches!(self, Status::Completed | Status::Terminated | Status::Duplicated)
    }

    /// Phase of a `Failed ...` status that supports recovery.
    pub fn failed_phase(self) -> Option<Phase> {
        match self {
            Status::FailedToSetup => Some(Phase::Setup),
            Status::FailedOnCluster => Some(Phase::Cluster),
            Status::FailedToPostProcess => Some(Phase::PostProcessing),
            _ => None,
        }
    }

    pub fn is_recovering(self) -> bool {
        matches!(
            self,
            Status::RecoverSetup | Status::RecoverCluster | Status::RecoverPostProcess
        )
    }

    pub fn is_restarting(self) -> bool {
        matches!(
            self,
            Status::RestartSetup | Status::RestartCluster | Status::RestartPostProcess
        )
    }

    /// Statuses during which a remote job exists and may be polled.
    pub fn is_remote_active(self) -> bool {
        matches!(
            self,
            Status::Queued | Status::OnHold | Status::OnCpu | Status::Suspended
        )
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        if wanted.eq_ignore_ascii_case("setup") {
            return Ok(Status::SettingUp);
        }
        Status::ALL
            .iter()
            .copied()
            .find(|st| st.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| format!("unknown task status: {wanted:?}"))
    }
}

impl TryFrom<String> for Status {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Status> for String {
    fn from(value: Status) -> Self {
        value.as_str().to_string()
    }
}
