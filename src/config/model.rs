// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::batch::BatchOptions;
use crate::exec::ResourceCapabilities;
use crate::status::Phase;
use crate::types::CoordinatorKind;
use crate::worker::WorkerOptions;

/// Configuration exactly as read from TOML:
///
/// ```toml
/// [worker]
/// poll_interval_ms = 2000
///
/// [batch]
/// coordinator = "serial"
/// group_size = 2
///
/// [resource.local]
/// work_root = "/tmp/taskgate/work"
/// cache_root = "/tmp/taskgate/cache"
/// data_root = "/tmp/taskgate/data"
///
/// [task.align]
/// resource = "local"
/// commands = ["echo aligning"]
/// count = 4
/// ```
///
/// Nothing is checked beyond the shape; see [`ConfigFile`].
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub worker: WorkerSection,

    #[serde(default)]
    pub batch: BatchSection,

    /// Execution resources from `[resource.<name>]`.
    #[serde(default)]
    pub resource: BTreeMap<String, ResourceConfig>,

    /// Program tasks from `[task.<name>]`.
    #[serde(default)]
    pub task: BTreeMap<String, TaskConfig>,
}

/// `[worker]` section: polling behaviour of every worker loop.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerSection {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Consecutive scans without progress before backing off.
    #[serde(default = "default_idle_scans_before_sleep")]
    pub idle_scans_before_sleep: u32,

    #[serde(default = "default_idle_sleep_ms")]
    pub idle_sleep_ms: u64,

    /// Tasks updated more recently than this are left alone for a scan.
    #[serde(default)]
    pub settle_ms: u64,

    #[serde(default = "default_monitor_interval_ms")]
    pub monitor_interval_ms: u64,

    /// How long a `Queued` task may sit without a recorded job before it is
    /// considered abandoned by the worker that claimed it.
    #[serde(default = "default_submission_grace_ms")]
    pub submission_grace_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_idle_scans_before_sleep() -> u32 {
    3
}

fn default_idle_sleep_ms() -> u64 {
    30_000
}

fn default_monitor_interval_ms() -> u64 {
    1000
}

fn default_submission_grace_ms() -> u64 {
    600_000
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            idle_scans_before_sleep: default_idle_scans_before_sleep(),
            idle_sleep_ms: default_idle_sleep_ms(),
            settle_ms: 0,
            monitor_interval_ms: default_monitor_interval_ms(),
            submission_grace_ms: default_submission_grace_ms(),
        }
    }
}

/// `[batch]` section: how submitted tasks are grouped.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchSection {
    #[serde(default)]
    pub coordinator: CoordinatorKind,

    #[serde(default = "default_group_size")]
    pub group_size: usize,

    /// Defaults to `group_size`; clamped to it when larger.
    #[serde(default)]
    pub min_group_size: Option<usize>,

    #[serde(default)]
    pub initial_rank: i64,

    #[serde(default = "default_subtask_level")]
    pub subtask_level: i32,

    #[serde(default)]
    pub coordinator_level: i32,

    #[serde(default = "default_start_state")]
    pub subtask_start_state: String,

    #[serde(default = "default_start_state")]
    pub coordinator_start_state: String,
}

fn default_group_size() -> usize {
    2
}

fn default_subtask_level() -> i32 {
    1
}

fn default_start_state() -> String {
    "New".to_string()
}

impl Default for BatchSection {
    fn default() -> Self {
        Self {
            coordinator: CoordinatorKind::default(),
            group_size: default_group_size(),
            min_group_size: None,
            initial_rank: 0,
            subtask_level: default_subtask_level(),
            coordinator_level: 0,
            subtask_start_state: default_start_state(),
            coordinator_start_state: default_start_state(),
        }
    }
}

/// `[resource.<name>]` section: a local execution resource.
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceConfig {
    /// Parent of every task's per-run work area.
    pub work_root: PathBuf,

    /// Resource-local cache that inputs are synchronized into.
    pub cache_root: PathBuf,

    /// Central storage that inputs come from and outputs go to.
    pub data_root: PathBuf,

    /// Interpreter for staged scripts; `/bin/bash` when unset.
    #[serde(default)]
    pub shell: Option<String>,
}

impl ResourceConfig {
    pub fn capabilities(&self) -> ResourceCapabilities {
        let mut caps = ResourceCapabilities::default();
        if let Some(shell) = &self.shell {
            caps.shell = shell.clone();
        }
        caps
    }
}

/// `[task.<name>]` section: a program to submit, possibly several times.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskConfig {
    /// Name of a `[resource.<name>]` section.
    pub resource: String,

    /// Shell lines run remotely.
    #[serde(default)]
    pub commands: Vec<String>,

    #[serde(default)]
    pub inputs: Vec<String>,

    #[serde(default)]
    pub outputs: Vec<String>,

    #[serde(default)]
    pub walltime_secs: Option<u64>,

    /// Phases this task may be recovered from after a failure.
    #[serde(default)]
    pub recoverable: Vec<Phase>,

    /// Phases this task may be restarted at.
    #[serde(default)]
    pub restartable: Vec<Phase>,

    /// Number of copies to submit.
    #[serde(default = "default_count")]
    pub count: usize,
}

fn default_count() -> usize {
    1
}

/// Validated configuration. Built only through
/// `TryFrom<RawConfigFile>`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub worker: WorkerSection,
    pub coordinator: CoordinatorKind,
    pub batch: BatchOptions,
    pub resources: BTreeMap<String, ResourceConfig>,
    pub tasks: BTreeMap<String, TaskConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        worker: WorkerSection,
        coordinator: CoordinatorKind,
        batch: BatchOptions,
        resources: BTreeMap<String, ResourceConfig>,
        tasks: BTreeMap<String, TaskConfig>,
    ) -> Self {
        Self {
            worker,
            coordinator,
            batch,
            resources,
            tasks,
        }
    }

    /// Worker options for one resource.
    pub fn worker_options(&self, resource: &ResourceConfig) -> WorkerOptions {
        WorkerOptions {
            poll_interval: Duration::from_millis(self.worker.poll_interval_ms),
            idle_scans_before_sleep: self.worker.idle_scans_before_sleep,
            idle_sleep: Duration::from_millis(self.worker.idle_sleep_ms),
            settle: Duration::from_millis(self.worker.settle_ms),
            monitor_interval: Duration::from_millis(self.worker.monitor_interval_ms),
            submission_grace: Duration::from_millis(self.worker.submission_grace_ms),
            work_root: resource.work_root.clone(),
        }
    }

    /// Total number of program tasks the config asks for.
    pub fn task_count(&self) -> usize {
        self.tasks.values().map(|t| t.count).sum()
    }
}
