// src/coordinator/serial.rs

//! Serial coordinator: runs its members back to back inside one remote job.

use std::time::Duration;

use tracing::info;

use super::{
    cluster_restart_refusal, enabled_members, member_walltimes, prerequisite_failure_cascade,
    restart_members_at_post_processing, restart_members_at_setup, sync_member_edges,
    DEFAULT_MEMBER_WALLTIME,
};
use crate::engine::Engine;
use crate::errors::Result;
use crate::exec::WorkArea;
use crate::prereq;
use crate::status::{Phase, Status, StatusHook};
use crate::task::{PhaseContext, PhaseHandler, Task};

#[derive(Debug, Clone, Copy, Default)]
pub struct SerialCoordinator;

impl PhaseHandler for SerialCoordinator {
    fn setup(&self, task: &mut Task, ctx: &PhaseContext<'_>) -> Result<bool> {
        sync_member_edges(task)?;
        let members = enabled_members(ctx.engine, task)?;
        task.addlog(format!("Coordinating {} members in sequence.", members.len()));
        Ok(true)
    }

    fn remote_commands(&self, task: &Task, ctx: &PhaseContext<'_>) -> Result<Option<Vec<String>>> {
        let members = enabled_members(ctx.engine, task)?;
        let shell = &ctx.capabilities.shell;

        let mut commands = vec![
            "#".to_string(),
            format!("# Serial execution of {} tasks.", members.len()),
            "#".to_string(),
        ];

        for member in &members {
            let area = ctx.work_area(member)?;
            let dir = area.path.display();
            let name = member.fullname();
            commands.extend([
                String::new(),
                format!("# Run task {name}"),
                format!("if test -d '{dir}' ; then"),
                format!("  echo Starting script for task '{name}'."),
                format!("  cd '{dir}'"),
                format!(
                    "  {shell} {} > '{}' 2> '{}'",
                    WorkArea::script_name(member),
                    WorkArea::stdout_name(member),
                    WorkArea::stderr_name(member)
                ),
                "else".to_string(),
                format!("  echo Could not find the work area of task '{name}'. Skipping."),
                "fi".to_string(),
            ]);
        }

        commands.extend([
            String::new(),
            "echo All tasks completed at `date`.".to_string(),
        ]);
        Ok(Some(commands))
    }

    fn save_results(&self, task: &mut Task, ctx: &PhaseContext<'_>) -> Result<bool> {
        let Some(coordinator_id) = task.id else {
            return Ok(false);
        };
        let fullname = task.fullname();
        let node = task
            .job
            .as_ref()
            .and_then(|job| job.node.clone())
            .unwrap_or_else(|| "an unknown node".to_string());

        task.addlog("Marking all members as ready.");
        for member in enabled_members(ctx.engine, task)? {
            let Some(member_id) = member.id else {
                continue;
            };
            let flipped = ctx.engine.update(member_id, |t| {
                if t.status != Status::Configured {
                    return Ok(false);
                }
                prereq::remove_prerequisite(t, coordinator_id, Phase::PostProcessing);
                t.configure_only = false;
                t.addlog(format!("{fullname} marking me as \"Data Ready\"."));
                t.status = Status::DataReady;
                Ok(true)
            })?;

            match flipped {
                Some(_) => task.addlog(format!("Member {} ran on {node}.", member.fullname())),
                None => {
                    let current = ctx.engine.read(member_id)?;
                    task.addlog(format!(
                        "Member {} is in state '{}'; left untouched.",
                        current.fullname(),
                        current.status
                    ));
                }
            }
        }

        info!(coordinator = %fullname, "members released to post-processing");
        Ok(true)
    }

    /// Sum of the members' estimates.
    fn walltime(&self, task: &Task, engine: &Engine) -> Result<Option<Duration>> {
        let total: Duration = member_walltimes(engine, task)?.into_iter().sum();
        Ok(Some(total.max(DEFAULT_MEMBER_WALLTIME)))
    }

    fn recoverable(&self, phase: Phase) -> bool {
        phase == Phase::Setup
    }

    fn restartable(&self, phase: Phase) -> bool {
        matches!(phase, Phase::Setup | Phase::PostProcessing)
    }

    fn prepare_restart(&self, engine: &Engine, task: &mut Task, phase: Phase) -> Result<bool> {
        match phase {
            Phase::Setup => restart_members_at_setup(engine, task),
            Phase::Cluster => Ok(false),
            Phase::PostProcessing => restart_members_at_post_processing(engine, task),
        }
    }

    fn restart_refusal(&self, phase: Phase) -> Vec<String> {
        match phase {
            Phase::Cluster => cluster_restart_refusal(),
            _ => vec!["This task is not programmed for restarts.".to_string()],
        }
    }

    fn status_hooks(&self) -> Vec<StatusHook> {
        vec![prerequisite_failure_cascade("serial-cascade-prerequisite-failure")]
    }
}
