// src/status/transitions.rs

//! The table of legal status moves.
//!
//! Only the engine's write path consults this table; every status change
//! goes through it, so a move that is not listed here can never be
//! persisted.

use super::Status;
use crate::errors::{EngineError, Result};

/// Whether a task may move from `from` to `to` in a single write.
///
/// Re-entering the current status is not a move and is handled by the
/// caller as a no-op.
pub fn is_legal(from: Status, to: Status) -> bool {
    use Status::*;

    match (from, to) {
        // Administrative moves.
        (_, Terminated) => from != Terminated,
        (_, Duplicated) => !from.is_settled(),

        // Setup phase.
        (Standby, New) => true,
        (New, SettingUp | FailedSetupPrerequisites) => true,
        (SettingUp, Configured | FailedToSetup) => true,

        // Cluster phase. A configured task may also be flipped straight to
        // Data Ready when a serial coordinator ran its work, or failed when
        // a coordinator it was waiting on could not start.
        (Configured, Queued | DataReady | FailedSetupPrerequisites) => true,
        (Queued, OnHold | OnCpu | Suspended | DataReady | FailedOnCluster) => true,
        (OnHold, Queued | OnCpu | DataReady | FailedOnCluster) => true,
        (OnCpu, Suspended | DataReady | FailedOnCluster) => true,
        (Suspended, OnCpu | DataReady | FailedOnCluster) => true,

        // Post-processing phase.
        (DataReady, PostProcessing | FailedPostProcessPrerequisites) => true,
        (PostProcessing, Completed | FailedToPostProcess) => true,

        // Recovery.
        (FailedToSetup, RecoverSetup) => true,
        (FailedOnCluster, RecoverCluster) => true,
        (FailedToPostProcess, RecoverPostProcess) => true,
        (FailedSetupPrerequisites, New) => true,
        (FailedPostProcessPrerequisites, DataReady) => true,
        (RecoverSetup, New | FailedToSetup) => true,
        (RecoverCluster, Configured | FailedOnCluster) => true,
        (RecoverPostProcess, DataReady | FailedToPostProcess) => true,

        // A coordinator rewinding a failed member to the start of its run.
        (FailedOnCluster | FailedToPostProcess, FailedToSetup) => true,

        // Restarts leave a settled state and either begin the phase again
        // or fall back to where they came from.
        (_, RestartSetup | RestartCluster | RestartPostProcess) => from.is_settled(),
        (RestartSetup, New) => true,
        (RestartCluster, Configured) => true,
        (RestartPostProcess, DataReady) => true,
        (RestartSetup | RestartCluster | RestartPostProcess, _) => to.is_settled(),

        _ => false,
    }
}

/// Like [`is_legal`], but reports an illegal move as an error.
pub fn ensure_legal(from: Status, to: Status) -> Result<()> {
    if from == to || is_legal(from, to) {
        Ok(())
    } else {
        Err(EngineError::IllegalTransition { from, to })
    }
}
