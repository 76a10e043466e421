// src/worker/phases.rs

//! The individual steps a worker takes, one per actionable status.
//!
//! Handlers always run on a working copy of a task that the worker has
//! already claimed by moving it into the phase's in-flight status; their
//! outcome is then committed conditionally on that status.

use chrono::Utc;
use tracing::{debug, info, warn};

use super::{Step, Worker};
use crate::engine::PhaseEntry;
use crate::errors::Result;
use crate::exec::{apply_remote_state, JobControl, JobRequest, WorkArea};
use crate::status::{Phase, Status};
use crate::task::{PhaseContext, RemoteJob, Task, TaskId};

impl Worker {
    pub(super) async fn run_setup(&self, id: TaskId) -> Result<Step> {
        let task = match self.engine.try_enter_phase(id, Phase::Setup)? {
            PhaseEntry::Entered(task) => task,
            other => return Ok(step_for(other)),
        };

        let ctx = self.context();
        let mut work = task.clone();
        let mark = work.log.len();
        let kind = work.kind.clone();

        let mut ok = match kind.handler().setup(&mut work, &ctx) {
            Ok(ok) => ok,
            Err(e) => {
                work.addlog(format!("Setup raised an error: {e}"));
                false
            }
        };
        if ok {
            ok = self.stage(&mut work, &ctx).await;
        }

        let to = if ok {
            work.addlog("Setup completed.");
            Status::Configured
        } else {
            work.addlog("Setup failed.");
            Status::FailedToSetup
        };
        Ok(self.commit(&work, Status::SettingUp, mark, to)?)
    }

    pub(super) async fn run_submission(&self, id: TaskId) -> Result<Step> {
        let task = match self.engine.try_enter_phase(id, Phase::Cluster)? {
            PhaseEntry::Entered(task) => task,
            other => return Ok(step_for(other)),
        };

        let ctx = self.context();
        let mut work = task.clone();
        let mark = work.log.len();

        let to = match self.submit(&work, &ctx).await {
            Ok(Some(job_id)) => {
                work.addlog(format!("Submitted remote job {job_id}."));
                work.job = Some(RemoteJob {
                    id: job_id,
                    node: None,
                });
                Status::Queued
            }
            Ok(None) => {
                work.addlog("No remote work needed.");
                Status::DataReady
            }
            Err(e) => {
                work.addlog(format!("Submission failed: {e}"));
                Status::FailedOnCluster
            }
        };

        let step = self.commit(&work, Status::Queued, mark, to)?;
        if step == Step::Skipped {
            if let Some(job) = &work.job {
                // Someone else moved the task (e.g. terminated it) while we
                // were submitting; the job would otherwise run unowned.
                warn!(task = id, job = %job.id, "task moved during submission; cancelling job");
                if let Err(e) = self.remote.control(job.id.clone(), JobControl::Terminate).await {
                    warn!(task = id, job = %job.id, error = %e, "could not cancel orphaned job");
                }
            }
        }
        Ok(step)
    }

    pub(super) async fn poll_remote(&self, task: &Task) -> Result<Step> {
        let Some(id) = task.id else {
            return Ok(Step::Skipped);
        };
        if self.monitors.is_active(id) {
            return Ok(Step::Skipped);
        }
        let Some(job) = task.job.clone() else {
            if task.status == Status::Queued && self.submission_in_flight(task) {
                debug!(task = %task.fullname(), "submission in flight elsewhere");
                return Ok(Step::Skipped);
            }
            let moved = self.engine.transition_with_log(
                id,
                task.status,
                Status::FailedOnCluster,
                "No remote job is recorded for this task.",
            )?;
            return Ok(if moved {
                Step::Advanced(Status::FailedOnCluster)
            } else {
                Step::Skipped
            });
        };

        let state = match self.remote.status(job.id.clone()).await {
            Ok(state) => state,
            Err(e) => {
                warn!(task = id, job = %job.id, error = %e, "polling remote job failed");
                return Ok(Step::Skipped);
            }
        };
        Ok(match apply_remote_state(&self.engine, id, &state)? {
            Some(status) if status != task.status => Step::Advanced(status),
            _ => Step::Skipped,
        })
    }

    pub(super) async fn run_post_processing(&self, id: TaskId) -> Result<Step> {
        let task = match self.engine.try_enter_phase(id, Phase::PostProcessing)? {
            PhaseEntry::Entered(task) => task,
            other => return Ok(step_for(other)),
        };

        let ctx = self.context();
        let mut work = task.clone();
        let mark = work.log.len();
        let kind = work.kind.clone();

        let ok = match kind.handler().save_results(&mut work, &ctx) {
            Ok(ok) => ok,
            Err(e) => {
                work.addlog(format!("Post processing raised an error: {e}"));
                false
            }
        };
        let to = if ok {
            work.addlog("Post processing completed.");
            Status::Completed
        } else {
            Status::FailedToPostProcess
        };
        Ok(self.commit(&work, Status::PostProcessing, mark, to)?)
    }

    /// Write the task's remote script into its work area. Tasks without
    /// remote work stage nothing.
    async fn stage(&self, work: &mut Task, ctx: &PhaseContext<'_>) -> bool {
        let commands = match work.handler().remote_commands(work, ctx) {
            Ok(Some(commands)) => commands,
            Ok(None) => return true,
            Err(e) => {
                work.addlog(format!("Could not generate the remote script: {e}"));
                return false;
            }
        };
        let area = match ctx.work_area(work) {
            Ok(area) => area,
            Err(e) => {
                work.addlog(format!("No work area: {e}"));
                return false;
            }
        };
        match self
            .remote
            .stage_script(area, WorkArea::script_name(work), commands)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                work.addlog(format!("Could not stage the remote script: {e}"));
                false
            }
        }
    }

    /// Stage and submit the task's remote script. `None` when the task has
    /// no remote work.
    async fn submit(&self, work: &Task, ctx: &PhaseContext<'_>) -> Result<Option<String>> {
        let Some(commands) = work.handler().remote_commands(work, ctx)? else {
            return Ok(None);
        };
        let area = ctx.work_area(work)?;
        self.remote
            .stage_script(area.clone(), WorkArea::script_name(work), commands)
            .await?;

        let walltime = work.handler().walltime(work, &self.engine)?;
        let request = JobRequest::for_task(work, area, walltime)?;
        let job_id = self.remote.submit(request).await?;
        debug!(task = %work.fullname(), job = %job_id, ?walltime, "job submitted");
        Ok(Some(job_id))
    }

    /// A claimed task only gets its job recorded once the submitting worker
    /// hears back from the resource.
    fn submission_in_flight(&self, task: &Task) -> bool {
        let Ok(grace) = chrono::Duration::from_std(self.options.submission_grace) else {
            return true;
        };
        Utc::now() - task.updated_at < grace
    }

    fn commit(&self, work: &Task, expected: Status, mark: usize, to: Status) -> Result<Step> {
        match self.engine.commit_work(work, expected, mark, to)? {
            Some(saved) => {
                info!(task = %saved.fullname(), status = %saved.status, "task advanced");
                Ok(Step::Advanced(saved.status))
            }
            None => {
                debug!(task = %work.fullname(), expected = %expected, "task moved by someone else");
                Ok(Step::Skipped)
            }
        }
    }
}

fn step_for(entry: PhaseEntry) -> Step {
    match entry {
        PhaseEntry::Entered(task) | PhaseEntry::PrerequisitesFailed(task) => Step::Advanced(task.status),
        PhaseEntry::Deferred => Step::Deferred,
        PhaseEntry::NotApplicable(_) => Step::Skipped,
    }
}
