// src/worker/mod.rs

//! Polling worker that advances the tasks of one execution resource.
//!
//! There is no central scheduler: any number of workers may poll the same
//! resource. Each scan reads the tasks that are ready to move and tries to
//! advance each of them by one step. Every step starts with a conditional
//! status write, so a task is only ever advanced by one worker at a time
//! and a step that loses the race is simply skipped.
//!
//! The per-status steps live in [`phases`].

mod phases;

use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::control::TaskControl;
use crate::engine::Engine;
use crate::errors::Result;
use crate::exec::{DataSync, MonitorRegistry, RemoteExecutor, ResourceCapabilities};
use crate::prereq::StatusPattern;
use crate::status::{Status, StatusHook};
use crate::store::TaskFilter;
use crate::task::{PhaseContext, ResourceId, Task};

/// Statuses a worker looks at on every scan.
const ACTIONABLE: [Status; 7] = [
    Status::New,
    Status::Configured,
    Status::Queued,
    Status::OnHold,
    Status::OnCpu,
    Status::Suspended,
    Status::DataReady,
];

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub poll_interval: Duration,
    /// Consecutive scans without progress before switching to `idle_sleep`.
    pub idle_scans_before_sleep: u32,
    pub idle_sleep: Duration,
    /// Tasks updated more recently than this are left for the next scan.
    pub settle: Duration,
    pub monitor_interval: Duration,
    /// A `Queued` task without a job is left alone this long, since another
    /// worker may still be waiting on its submission.
    pub submission_grace: Duration,
    pub work_root: PathBuf,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            idle_scans_before_sleep: 3,
            idle_sleep: Duration::from_secs(30),
            settle: Duration::ZERO,
            monitor_interval: Duration::from_secs(1),
            submission_grace: Duration::from_secs(600),
            work_root: std::env::temp_dir().join("taskgate").join("work"),
        }
    }
}

/// What one step did to a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// The task moved; carries its new status.
    Advanced(Status),
    /// Prerequisites not met yet.
    Deferred,
    /// Nothing to do now (owned by a monitor, lost a race, not actionable).
    Skipped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub examined: usize,
    pub advanced: usize,
    pub deferred: usize,
}

pub struct Worker {
    name: String,
    resource: ResourceId,
    engine: Arc<Engine>,
    remote: Arc<dyn RemoteExecutor>,
    sync: Arc<dyn DataSync>,
    capabilities: ResourceCapabilities,
    monitors: Arc<MonitorRegistry>,
    options: WorkerOptions,
}

impl Worker {
    /// Probe the resource and register the worker's status hooks.
    pub async fn start(
        resource: impl Into<ResourceId>,
        engine: Arc<Engine>,
        remote: Arc<dyn RemoteExecutor>,
        sync: Arc<dyn DataSync>,
        options: WorkerOptions,
    ) -> Result<Self> {
        let resource = resource.into();
        let capabilities = remote.probe().await?;
        info!(
            resource = %resource,
            hold = capabilities.supports_hold,
            suspend = capabilities.supports_suspend,
            "resource probed"
        );

        let worker = Self {
            name: format!("worker-{resource}"),
            resource,
            engine,
            remote,
            sync,
            capabilities,
            monitors: Arc::new(MonitorRegistry::new()),
            options,
        };
        worker.register_hooks();
        Ok(worker)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn capabilities(&self) -> &ResourceCapabilities {
        &self.capabilities
    }

    pub fn monitors(&self) -> &Arc<MonitorRegistry> {
        &self.monitors
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn control(&self) -> TaskControl {
        TaskControl::new(
            Arc::clone(&self.engine),
            Arc::clone(&self.remote),
            Arc::clone(&self.monitors),
            self.capabilities.clone(),
        )
    }

    /// Start a job monitor when one of our tasks reaches `On CPU`, and stop
    /// it when the task is terminated.
    fn register_hooks(&self) {
        let weak: Weak<Engine> = Arc::downgrade(&self.engine);
        let remote = Arc::clone(&self.remote);
        let monitors = Arc::clone(&self.monitors);
        let resource = self.resource.clone();
        let interval = self.options.monitor_interval;

        self.engine.register_hook(StatusHook::new(
            format!("{}-start-monitor", self.name),
            StatusPattern::any(),
            Status::OnCpu,
            move |_, task: &Task, _| {
                if task.resource != resource {
                    return Ok(());
                }
                let (Some(id), Some(job), Some(engine)) = (task.id, task.job.as_ref(), weak.upgrade())
                else {
                    return Ok(());
                };
                monitors.start(engine, Arc::clone(&remote), id, job.id.clone(), interval);
                Ok(())
            },
        ));

        let monitors = Arc::clone(&self.monitors);
        self.engine.register_hook(StatusHook::new(
            format!("{}-stop-monitor", self.name),
            StatusPattern::any(),
            Status::Terminated,
            move |_, task: &Task, _| {
                if let Some(id) = task.id {
                    monitors.stop(id);
                }
                Ok(())
            },
        ));
    }

    pub(crate) fn context(&self) -> PhaseContext<'_> {
        PhaseContext {
            engine: &self.engine,
            sync: self.sync.as_ref(),
            capabilities: &self.capabilities,
            work_root: &self.options.work_root,
        }
    }

    /// One pass over the resource's actionable tasks, in id order.
    pub async fn scan(&self) -> Result<ScanReport> {
        let mut filter = TaskFilter::default()
            .with_statuses(&ACTIONABLE)
            .on_resource(self.resource.clone());
        if !self.options.settle.is_zero() {
            if let Ok(settle) = chrono::Duration::from_std(self.options.settle) {
                filter = filter.updated_before(Utc::now() - settle);
            }
        }

        let mut report = ScanReport::default();
        for task in self.engine.query(&filter)? {
            report.examined += 1;
            match self.step(&task).await {
                Ok(Step::Advanced(_)) => report.advanced += 1,
                Ok(Step::Deferred) => report.deferred += 1,
                Ok(Step::Skipped) => {}
                Err(e) => warn!(worker = %self.name, task = %task.fullname(), error = %e, "step failed"),
            }
        }

        debug!(worker = %self.name, ?report, "scan finished");
        Ok(report)
    }

    /// Try to move one task forward by a single step.
    pub async fn step(&self, task: &Task) -> Result<Step> {
        let Some(id) = task.id else {
            return Ok(Step::Skipped);
        };
        match task.status {
            Status::New => self.run_setup(id).await,
            Status::Configured => self.run_submission(id).await,
            Status::Queued | Status::OnHold | Status::OnCpu | Status::Suspended => {
                self.poll_remote(task).await
            }
            Status::DataReady => self.run_post_processing(id).await,
            _ => Ok(Step::Skipped),
        }
    }

    /// Scan until `shutdown` flips to `true`, backing off after several
    /// scans without progress.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(worker = %self.name, resource = %self.resource, "worker started");
        let mut idle_scans = 0u32;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let report = match self.scan().await {
                Ok(report) => report,
                Err(e) => {
                    warn!(worker = %self.name, error = %e, "scan failed");
                    ScanReport::default()
                }
            };
            if report.advanced == 0 {
                idle_scans = idle_scans.saturating_add(1);
            } else {
                idle_scans = 0;
            }
            let pause = if idle_scans >= self.options.idle_scans_before_sleep {
                self.options.idle_sleep
            } else {
                self.options.poll_interval
            };

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(pause) => {}
            }
        }

        self.monitors.stop_all();
        info!(worker = %self.name, "worker stopped");
        Ok(())
    }
}
