// src/exec/remote.rs

//! Contract with a remote execution resource.
//!
//! The worker hands a resource a staged script plus a work area and gets a
//! job identifier back, which it then polls. How the job actually reaches a
//! machine is up to the implementation; tests plug in a fake that records
//! submissions and reports scripted states.

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{EngineError, Result};
use crate::task::{Task, TaskId};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// What a resource supports, probed once when its worker starts and passed
/// explicitly to whoever needs it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceCapabilities {
    pub supports_hold: bool,
    pub supports_suspend: bool,
    /// Interpreter used for staged scripts.
    pub shell: String,
}

impl Default for ResourceCapabilities {
    fn default() -> Self {
        Self {
            supports_hold: false,
            supports_suspend: false,
            shell: "/bin/bash".to_string(),
        }
    }
}

/// Per-run directory of a task on its resource: `<root>/<id>-<run>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkArea {
    pub path: PathBuf,
}

impl WorkArea {
    pub fn for_task(root: &Path, task: &Task) -> Result<Self> {
        let id = task.id.ok_or_else(|| {
            EngineError::Config(format!(
                "task {} needs an id before it gets a work area",
                task.fullname()
            ))
        })?;
        Ok(Self {
            path: root.join(format!("{id}-{}", task.run_number)),
        })
    }

    pub fn script_name(task: &Task) -> String {
        format!("taskgate.{}.{}.sh", label(task), task.run_number)
    }

    pub fn stdout_name(task: &Task) -> String {
        format!("taskgate.{}.{}.out", label(task), task.run_number)
    }

    pub fn stderr_name(task: &Task) -> String {
        format!("taskgate.{}.{}.err", label(task), task.run_number)
    }
}

fn label(task: &Task) -> String {
    task.id.map_or_else(|| "new".to_string(), |id| id.to_string())
}

/// Everything a resource needs to start one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    pub task_id: TaskId,
    pub work_area: WorkArea,
    pub script_name: String,
    pub stdout_name: String,
    pub stderr_name: String,
    pub walltime: Option<Duration>,
}

impl JobRequest {
    pub fn for_task(task: &Task, work_area: WorkArea, walltime: Option<Duration>) -> Result<Self> {
        let task_id = task.id.ok_or_else(|| {
            EngineError::Config(format!("task {} cannot be submitted unsaved", task.fullname()))
        })?;
        Ok(Self {
            task_id,
            work_area,
            script_name: WorkArea::script_name(task),
            stdout_name: WorkArea::stdout_name(task),
            stderr_name: WorkArea::stderr_name(task),
            walltime,
        })
    }
}

/// State of a remote job as reported by the resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteState {
    Queued,
    OnHold,
    Running { node: Option<String> },
    Suspended,
    Finished { success: bool },
    /// The resource could not tell; nothing should change.
    Unknown,
}

/// Job-level control actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobControl {
    Terminate,
    Hold,
    Release,
    Suspend,
    Resume,
}

impl fmt::Display for JobControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JobControl::Terminate => "terminate",
            JobControl::Hold => "hold",
            JobControl::Release => "release",
            JobControl::Suspend => "suspend",
            JobControl::Resume => "resume",
        })
    }
}

/// A remote execution resource.
///
/// Methods take owned arguments so the returned futures only borrow
/// `self`.
pub trait RemoteExecutor: Send + Sync {
    fn probe(&self) -> BoxFuture<'_, Result<ResourceCapabilities>>;

    /// Write `commands` as script `script_name` inside `area`, creating the
    /// area if needed. Staging the same script twice overwrites it.
    fn stage_script(
        &self,
        area: WorkArea,
        script_name: String,
        commands: Vec<String>,
    ) -> BoxFuture<'_, Result<()>>;

    /// Start a staged script; returns the job identifier.
    fn submit(&self, request: JobRequest) -> BoxFuture<'_, Result<String>>;

    fn status(&self, job_id: String) -> BoxFuture<'_, Result<RemoteState>>;

    fn control(&self, job_id: String, action: JobControl) -> BoxFuture<'_, Result<()>>;
}
