// src/coordinator/parallel.rs

//! Parallel coordinator: a fan-out point.
//!
//! Once every member is configured, setup releases them to run as
//! independent remote jobs. The coordinator itself submits nothing; its
//! post-processing waits for the members' remote work to finish and then
//! reports on them, which in turn lets the members post-process.

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::info;

use super::{
    cluster_restart_refusal, enabled_members, member_walltimes, prerequisite_failure_cascade,
    restart_members_at_post_processing, restart_members_at_setup, sync_member_edges,
    DEFAULT_MEMBER_WALLTIME,
};
use crate::engine::Engine;
use crate::errors::Result;
use crate::prereq::{self, StatusPattern};
use crate::status::{Phase, Status, StatusHook};
use crate::task::{PhaseContext, PhaseHandler, Task};

/// Member statuses the coordinator's post-processing waits for.
const MEMBERS_DONE: [Status; 3] = [Status::DataReady, Status::PostProcessing, Status::Completed];

#[derive(Debug, Clone, Copy, Default)]
pub struct ParallelCoordinator;

impl PhaseHandler for ParallelCoordinator {
    fn setup(&self, task: &mut Task, ctx: &PhaseContext<'_>) -> Result<bool> {
        sync_member_edges(task)?;
        let fullname = task.fullname();
        let mut released = 0usize;

        for member in enabled_members(ctx.engine, task)? {
            let Some(member_id) = member.id else {
                continue;
            };
            let saved = ctx.engine.update(member_id, |t| {
                if t.status != Status::Configured || !t.configure_only {
                    return Ok(false);
                }
                t.configure_only = false;
                t.addlog(format!("{fullname} released me for independent execution."));
                Ok(true)
            })?;
            if saved.is_some() {
                released += 1;
            }
            prereq::add_prerequisite(
                task,
                member_id,
                Phase::PostProcessing,
                StatusPattern::of(&MEMBERS_DONE),
            )?;
        }

        task.addlog(format!("Released {released} members for parallel execution."));
        info!(coordinator = %fullname, released, "members released");
        Ok(true)
    }

    fn remote_commands(&self, _task: &Task, _ctx: &PhaseContext<'_>) -> Result<Option<Vec<String>>> {
        Ok(None)
    }

    fn save_results(&self, task: &mut Task, ctx: &PhaseContext<'_>) -> Result<bool> {
        let members = enabled_members(ctx.engine, task)?;
        let mut counts: BTreeMap<Status, usize> = BTreeMap::new();
        for member in &members {
            *counts.entry(member.status).or_default() += 1;
        }
        let summary = counts
            .iter()
            .map(|(status, n)| format!("{n} {status}"))
            .collect::<Vec<_>>()
            .join(", ");
        task.addlog(format!("All {} members finished their remote work: {summary}.", members.len()));
        Ok(true)
    }

    /// Longest member estimate plus ten percent.
    fn walltime(&self, task: &Task, engine: &Engine) -> Result<Option<Duration>> {
        let longest = member_walltimes(engine, task)?
            .into_iter()
            .max()
            .unwrap_or(DEFAULT_MEMBER_WALLTIME)
            .max(DEFAULT_MEMBER_WALLTIME);
        Ok(Some(longest + longest / 10))
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
        vec![prerequisite_failure_cascade("parallel-cascade-prerequisite-failure")]
    }
}
