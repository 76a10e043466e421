// src/coordinator/mod.rs

//! Coordinator tasks and the member bookkeeping they share.
//!
//! A coordinator's params hold its ordered member list and the members that
//! were disabled. Enabled members are fenced by a `for_setup` edge
//! requiring them to be `Configured`; disabled ones are not.

mod parallel;
mod serial;

pub use parallel::ParallelCoordinator;
pub use serial::SerialCoordinator;

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::engine::Engine;
use crate::errors::{EngineError, Result};
use crate::prereq::{self, StatusPattern};
use crate::recovery::RecoveryController;
use crate::status::{Phase, Status, StatusHook};
use crate::task::{Task, TaskId};

pub const MEMBERSHIP_PARAM: &str = "membership";

/// Estimate used for members that do not declare one.
pub(crate) const DEFAULT_MEMBER_WALLTIME: Duration = Duration::from_secs(60);

/// Members of a coordinator, in submission order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub members: Vec<TaskId>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub disabled: BTreeSet<TaskId>,
}

impl Membership {
    pub fn new(members: Vec<TaskId>) -> Self {
        Self {
            members,
            disabled: BTreeSet::new(),
        }
    }

    pub fn load(task: &Task) -> Result<Self> {
        Ok(task.param(MEMBERSHIP_PARAM)?.unwrap_or_default())
    }

    pub fn store_in(&self, task: &mut Task) -> Result<()> {
        task.set_param(MEMBERSHIP_PARAM, self)
    }

    pub fn is_enabled(&self, id: TaskId) -> bool {
        self.members.contains(&id) && !self.disabled.contains(&id)
    }

    pub fn enabled(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.members
            .iter()
            .copied()
            .filter(|id| !self.disabled.contains(id))
    }
}

/// Enabled members of `coordinator`, freshly read, in submission order.
///
/// Members that no longer exist are skipped.
pub fn enabled_members(engine: &Engine, coordinator: &Task) -> Result<Vec<Task>> {
    let membership = Membership::load(coordinator)?;
    let mut members = Vec::new();
    for id in membership.enabled() {
        match engine.read(id) {
            Ok(member) => members.push(member),
            Err(EngineError::TaskNotFound(_)) => {
                warn!(coordinator = %coordinator.fullname(), member = id, "member vanished");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(members)
}

/// Make the coordinator's `for_setup` edges agree with its membership:
/// enabled members are required to be `Configured`, disabled ones are
/// dropped.
pub fn sync_member_edges(coordinator: &mut Task) -> Result<()> {
    let membership = Membership::load(coordinator)?;
    for &id in &membership.members {
        if membership.is_enabled(id) {
            prereq::add_prerequisite(coordinator, id, Phase::Setup, StatusPattern::from(Status::Configured))?;
        } else {
            prereq::remove_prerequisite(coordinator, id, Phase::Setup);
        }
    }
    Ok(())
}

/// Enable or disable one member. Returns whether anything changed.
pub fn set_member_enabled(
    engine: &Engine,
    coordinator_id: TaskId,
    member_id: TaskId,
    enabled: bool,
) -> Result<bool> {
    let saved = engine.update(coordinator_id, |coordinator| {
        let mut membership = Membership::load(coordinator)?;
        if !membership.members.contains(&member_id) {
            return Err(EngineError::Config(format!(
                "task {member_id} is not a member of {}",
                coordinator.fullname()
            )));
        }
        let changed = if enabled {
            membership.disabled.remove(&member_id)
        } else {
            membership.disabled.insert(member_id)
        };
        if !changed {
            return Ok(false);
        }
        membership.store_in(coordinator)?;
        sync_member_edges(coordinator)?;
        coordinator.addlog(format!(
            "Member {member_id} {}.",
            if enabled { "enabled" } else { "disabled" }
        ));
        Ok(true)
    })?;
    Ok(saved.is_some())
}

/// Walltime of each enabled member, defaulting where unknown.
pub(crate) fn member_walltimes(engine: &Engine, coordinator: &Task) -> Result<Vec<Duration>> {
    enabled_members(engine, coordinator)?
        .iter()
        .map(|member| {
            Ok(member
                .handler()
                .walltime(member, engine)?
                .unwrap_or(DEFAULT_MEMBER_WALLTIME))
        })
        .collect()
}

/// True if every enabled member matches `pattern`; otherwise logs why not
/// on the coordinator.
pub(crate) fn all_members_are(engine: &Engine, coordinator: &mut Task, pattern: &StatusPattern) -> Result<bool> {
    let members = enabled_members(engine, coordinator)?;
    if members.iter().all(|m| pattern.matches(m.status)) {
        return Ok(true);
    }
    coordinator.addlog(format!(
        "Cannot proceed, as members are not in states matching '{pattern}'."
    ));
    Ok(false)
}

/// Log lines explaining why a coordinator never restarts at the cluster
/// boundary.
pub(crate) fn cluster_restart_refusal() -> Vec<String> {
    vec![
        "This task cannot be restarted at the Cluster stage.".to_string(),
        "It can be restarted at Setup if members are all either Completed, Failed or Terminated."
            .to_string(),
        "It can be restarted at Post Processing if all members are Completed.".to_string(),
    ]
}

/// Put every enabled member back under the coordinator's control and
/// restart (or recover) it from setup.
///
/// Aborts at the first member that cannot be brought back.
pub(crate) fn restart_members_at_setup(engine: &Engine, coordinator: &mut Task) -> Result<bool> {
    let settled = StatusPattern::parse("Completed|Failed|Terminated")?;
    if !all_members_are(engine, coordinator, &settled)? {
        coordinator.addlog(
            "This task can only be restarted at Setup if its members are all either Completed, Failed, or Terminated.",
        );
        return Ok(false);
    }

    let coordinator_id = saved_id(coordinator)?;
    let recovery = RecoveryController::new(engine);
    let fullname = coordinator.fullname();

    for member in enabled_members(engine, coordinator)? {
        let member_id = saved_id(&member)?;
        engine.update(member_id, |t| {
            prereq::add_prerequisite(
                t,
                coordinator_id,
                Phase::PostProcessing,
                StatusPattern::from(Status::Completed),
            )?;
            t.configure_only = true;
            t.addlog(format!("{fullname} taking me back under its control."));
            Ok(true)
        })?;

        let brought_back = match member.status {
            Status::Completed | Status::Terminated => recovery.restart(member_id, Phase::Setup)?,
            Status::FailedOnCluster | Status::FailedToPostProcess => {
                engine.transition_with_log(
                    member_id,
                    member.status,
                    Status::FailedToSetup,
                    &format!("{fullname} rewinding me to the start of my run."),
                )?;
                recovery.recover(member_id)?
            }
            _ => recovery.recover(member_id)?,
        };

        if !brought_back {
            coordinator.addlog(format!(
                "Could not recover or restart member {}.",
                member.fullname()
            ));
            return Ok(false);
        }
        debug!(coordinator = %fullname, member = %member.fullname(), "member brought back to setup");
    }
    Ok(true)
}

/// Release every enabled member from the coordinator's post-processing
/// fence and ask it to redo its own post-processing.
///
/// The coordinator has nothing of its own to redo, so this always reports
/// `false` once the members were notified.
pub(crate) fn restart_members_at_post_processing(engine: &Engine, coordinator: &mut Task) -> Result<bool> {
    if !all_members_are(engine, coordinator, &StatusPattern::from(Status::Completed))? {
        coordinator.addlog(
            "This task can only be restarted at Post Processing if its members are all Completed.",
        );
        return Ok(false);
    }

    let coordinator_id = saved_id(coordinator)?;
    let recovery = RecoveryController::new(engine);

    for member in enabled_members(engine, coordinator)? {
        let member_id = saved_id(&member)?;
        engine.update(member_id, |t| {
            prereq::remove_prerequisite(t, coordinator_id, Phase::PostProcessing);
            t.configure_only = false;
            Ok(true)
        })?;
        if !recovery.restart(member_id, Phase::PostProcessing)? {
            coordinator.addlog(format!(
                "Member {} could not be restarted at Post Processing.",
                member.fullname()
            ));
        }
    }

    coordinator.addlog(format!(
        "This {} doesn't need to restart its own post processing.",
        coordinator.name()
    ));
    coordinator.addlog("Its members, however, were properly notified to do so.");
    Ok(false)
}

/// Hook that takes a coordinator's waiting members down with it once it
/// can never start.
pub(crate) fn prerequisite_failure_cascade(name: &str) -> StatusHook {
    StatusHook::new(
        name,
        StatusPattern::any(),
        Status::FailedSetupPrerequisites,
        fail_waiting_members,
    )
}

/// Fail every enabled member still in `New` or `Configured` and drop its
/// `configure_only` hold, since no coordinator will release it any more.
fn fail_waiting_members(engine: &Engine, coordinator: &Task, _from: Status) -> Result<()> {
    let fullname = coordinator.fullname();
    for member in enabled_members(engine, coordinator)? {
        let Some(member_id) = member.id else {
            continue;
        };
        engine.update(member_id, |t| {
            if !matches!(t.status, Status::New | Status::Configured) {
                return Ok(false);
            }
            t.addlog(format!(
                "Coordinator {fullname} failed its setup prerequisites; failing as well."
            ));
            t.status = Status::FailedSetupPrerequisites;
            t.configure_only = false;
            Ok(true)
        })?;
        debug!(coordinator = %fullname, member = %member.fullname(), "member failed with its coordinator");
    }
    Ok(())
}

fn saved_id(task: &Task) -> Result<TaskId> {
    task.id
        .ok_or_else(|| EngineError::Config(format!("task {} has not been saved", task.fullname())))
}
