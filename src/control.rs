// src/control.rs

//! Operator actions on individual tasks: terminate, and the remote
//! sub-state moves (hold/release, suspend/resume).
//!
//! Each action commits its status move first and only then talks to the
//! resource. If the resource refuses, the status move is undone.

use std::sync::Arc;

use tracing::{info, warn};

use crate::engine::Engine;
use crate::errors::Result;
use crate::exec::{JobControl, MonitorRegistry, RemoteExecutor, ResourceCapabilities};
use crate::status::Status;
use crate::task::{RemoteJob, TaskId};

#[derive(Clone)]
pub struct TaskControl {
    engine: Arc<Engine>,
    remote: Arc<dyn RemoteExecutor>,
    monitors: Arc<MonitorRegistry>,
    capabilities: ResourceCapabilities,
}

impl TaskControl {
    pub fn new(
        engine: Arc<Engine>,
        remote: Arc<dyn RemoteExecutor>,
        monitors: Arc<MonitorRegistry>,
        capabilities: ResourceCapabilities,
    ) -> Self {
        Self {
            engine,
            remote,
            monitors,
            capabilities,
        }
    }

    /// Move a task to `Terminated` from whatever status it is in, stop its
    /// job monitor and cancel its remote job if one is running.
    pub async fn terminate(&self, id: TaskId) -> Result<bool> {
        let mut previous: Option<(Status, Option<RemoteJob>)> = None;
        let saved = self.engine.update(id, |task| {
            if task.status == Status::Terminated {
                return Ok(false);
            }
            previous = Some((task.status, task.job.clone()));
            task.addlog(format!("Terminated by request (was '{}').", task.status));
            task.status = Status::Terminated;
            Ok(true)
        })?;
        if saved.is_none() {
            return Ok(false);
        }

        self.monitors.stop(id);

        if let Some((status, Some(job))) = previous {
            if status.is_remote_active() {
                if let Err(e) = self.remote.control(job.id.clone(), JobControl::Terminate).await {
                    warn!(task = id, job = %job.id, error = %e, "could not cancel remote job");
                    self.engine
                        .addlog(id, format!("Could not cancel remote job {}: {e}", job.id))?;
                }
            }
        }

        info!(task = id, "task terminated");
        Ok(true)
    }

    pub async fn hold(&self, id: TaskId) -> Result<bool> {
        let supported = self.capabilities.supports_hold;
        self.job_action(id, Status::Queued, Status::OnHold, JobControl::Hold, supported)
            .await
    }

    pub async fn release(&self, id: TaskId) -> Result<bool> {
        let supported = self.capabilities.supports_hold;
        self.job_action(id, Status::OnHold, Status::Queued, JobControl::Release, supported)
            .await
    }

    pub async fn suspend(&self, id: TaskId) -> Result<bool> {
        let supported = self.capabilities.supports_suspend;
        self.job_action(id, Status::OnCpu, Status::Suspended, JobControl::Suspend, supported)
            .await
    }

    pub async fn resume(&self, id: TaskId) -> Result<bool> {
        let supported = self.capabilities.supports_suspend;
        self.job_action(id, Status::Suspended, Status::OnCpu, JobControl::Resume, supported)
            .await
    }

    async fn job_action(
        &self,
        id: TaskId,
        from: Status,
        to: Status,
        action: JobControl,
        supported: bool,
    ) -> Result<bool> {
        if !supported {
            self.engine
                .addlog(id, format!("This resource cannot {action} jobs."))?;
            return Ok(false);
        }

        let task = self.engine.read(id)?;
        let Some(job) = task.job.clone() else {
            self.engine
                .addlog(id, format!("There is no remote job to {action}."))?;
            return Ok(false);
        };

        let message = format!("Requested {action} of remote job {}.", job.id);
        if !self.engine.transition_with_log(id, from, to, &message)? {
            return Ok(false);
        }

        if let Err(e) = self.remote.control(job.id.clone(), action).await {
            warn!(task = id, job = %job.id, error = %e, action = %action, "job control failed");
            self.engine.transition_with_log(
                id,
                to,
                from,
                &format!("Could not {action} remote job {}: {e}", job.id),
            )?;
            return Ok(false);
        }
        Ok(true)
    }
}
