// src/exec/monitor.rs

//! Detached activities that follow a running remote job.
//!
//! A monitor polls the resource at a fixed interval and writes what it sees
//! through the engine. It holds nothing on the task between polls, and
//! stops when the job leaves the remote phase or when asked to.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::remote::{RemoteExecutor, RemoteState};
use crate::engine::Engine;
use crate::errors::Result;
use crate::status::{self, Status};
use crate::task::TaskId;

/// Write a polled remote state onto the task.
///
/// Returns the task's status if anything was written. States that do not fit the
/// task's current status (a stale report, a task that was terminated in
/// the meantime) are ignored.
pub fn apply_remote_state(engine: &Engine, id: TaskId, state: &RemoteState) -> Result<Option<Status>> {
    let saved = engine.update(id, |task| {
        if !task.status.is_remote_active() {
            return Ok(false);
        }
        let job_id = task.job.as_ref().map(|j| j.id.clone()).unwrap_or_default();
        let mut node_changed = false;
        let next = match state {
            RemoteState::Queued => Status::Queued,
            RemoteState::OnHold => Status::OnHold,
            RemoteState::Suspended => Status::Suspended,
            RemoteState::Running { node } => {
                node_changed = match (task.job.as_mut(), node) {
                    (Some(job), Some(node)) if job.node.as_ref() != Some(node) => {
                        job.node = Some(node.clone());
                        true
                    }
                    _ => false,
                };
                if node_changed {
                    task.addlog(format!(
                        "Remote job {job_id} running on node '{}'.",
                        node.as_deref().unwrap_or_default()
                    ));
                }
                Status::OnCpu
            }
            RemoteState::Finished { success: true } => {
                task.addlog(format!("Remote job {job_id} finished."));
                Status::DataReady
            }
            RemoteState::Finished { success: false } => {
                task.addlog(format!("Remote job {job_id} ended with an error."));
                Status::FailedOnCluster
            }
            RemoteState::Unknown => return Ok(false),
        };

        if next == task.status {
            return Ok(node_changed);
        }
        if !status::is_legal(task.status, next) {
            debug!(task = id, from = %task.status, to = %next, "ignoring out-of-order remote state");
            return Ok(false);
        }
        task.status = next;
        Ok(true)
    })?;

    Ok(saved.map(|t| t.status))
}

struct ActiveMonitor {
    cancel: Option<oneshot::Sender<()>>,
    handle: tokio::task::JoinHandle<()>,
}

/// At most one monitor per task.
#[derive(Default)]
pub struct MonitorRegistry {
    active: Mutex<HashMap<TaskId, ActiveMonitor>>,
}

impl MonitorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start following `job_id` for `task_id` unless a monitor is already
    /// running. Requires a Tokio runtime; returns `false` without one.
    pub fn start(
        &self,
        engine: Arc<Engine>,
        remote: Arc<dyn RemoteExecutor>,
        task_id: TaskId,
        job_id: String,
        interval: Duration,
    ) -> bool {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(task = task_id, "no async runtime; job monitor not started");
            return false;
        };
        let Ok(mut active) = self.active.lock() else {
            warn!(task = task_id, "monitor registry poisoned");
            return false;
        };
        if active.get(&task_id).is_some_and(|m| !m.handle.is_finished()) {
            debug!(task = task_id, "job monitor already running");
            return false;
        }

        let (cancel_tx, cancel_rx) = oneshot::channel();
        let handle = runtime.spawn(follow_job(engine, remote, task_id, job_id, interval, cancel_rx));
        active.insert(
            task_id,
            ActiveMonitor {
                cancel: Some(cancel_tx),
                handle,
            },
        );
        true
    }

    /// Ask the monitor of `task_id` to stop. Cooperative: the monitor exits
    /// at its next wake-up.
    pub fn stop(&self, task_id: TaskId) -> bool {
        let Ok(mut active) = self.active.lock() else {
            return false;
        };
        match active.remove(&task_id) {
            Some(mut monitor) => {
                if let Some(cancel) = monitor.cancel.take() {
                    let _ = cancel.send(());
                }
                !monitor.handle.is_finished()
            }
            None => false,
        }
    }

    pub fn is_active(&self, task_id: TaskId) -> bool {
        self.active
            .lock()
            .map(|active| active.get(&task_id).is_some_and(|m| !m.handle.is_finished()))
            .unwrap_or(false)
    }

    /// Ask every monitor to stop.
    pub fn stop_all(&self) {
        if let Ok(mut active) = self.active.lock() {
            for (_, mut monitor) in active.drain() {
                if let Some(cancel) = monitor.cancel.take() {
                    let _ = cancel.send(());
                }
            }
        }
    }

    pub fn active_count(&self) -> usize {
        self.active
            .lock()
            .map(|active| active.values().filter(|m| !m.handle.is_finished()).count())
            .unwrap_or(0)
    }
}

async fn follow_job(
    engine: Arc<Engine>,
    remote: Arc<dyn RemoteExecutor>,
    task_id: TaskId,
    job_id: String,
    interval: Duration,
    mut cancel_rx: oneshot::Receiver<()>,
) {
    debug!(task = task_id, job = %job_id, "job monitor started");

    loop {
        tokio::select! {
            _ = &mut cancel_rx => {
                info!(task = task_id, job = %job_id, "job monitor stopped");
                return;
            }
            _ = tokio::time::sleep(interval) => {}
        }

        let state = match remote.status(job_id.clone()).await {
            Ok(state) => state,
            Err(e) => {
                warn!(task = task_id, job = %job_id, error = %e, "polling remote job failed");
                continue;
            }
        };

        if let Err(e) = apply_remote_state(&engine, task_id, &state) {
            warn!(task = task_id, error = %e, "recording remote state failed");
            return;
        }

        match engine.read(task_id) {
            Ok(task) if task.status.is_remote_active() => {}
            Ok(task) => {
                debug!(task = task_id, status = %task.status, "job monitor finished");
                return;
            }
            Err(e) => {
                warn!(task = task_id, error = %e, "job monitor lost its task");
                return;
            }
        }
    }
}
