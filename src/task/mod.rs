// src/task/mod.rs

//! The task record and its per-kind behaviour.

mod handler;
mod kind;
mod program;

pub use handler::{PhaseContext, PhaseHandler};
pub use kind::TaskKind;
pub use program::{ProgramSpec, COMMANDS_PARAM, INPUTS_PARAM, OUTPUTS_PARAM, WALLTIME_PARAM};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::Result;
use crate::prereq::Prerequisites;
use crate::status::Status;

pub type TaskId = u64;
pub type BatchId = u64;
pub type ToolId = u64;
pub type ToolConfigId = u64;
pub type ResourceId = String;

/// One timestamped line of a task's audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub at: DateTime<Utc>,
    pub message: String,
}

/// Handle on the remote job currently executing a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteJob {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
}

/// A unit of work scheduled onto a remote resource.
///
/// `version` is owned by the store and bumped on every successful save;
/// a save carrying a stale version is rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Option<TaskId>,
    #[serde(default)]
    pub version: u64,
    pub kind: TaskKind,
    pub status: Status,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub prerequisites: Prerequisites,
    #[serde(default)]
    pub rank: Option<i64>,
    #[serde(default)]
    pub level: Option<i32>,
    #[serde(default)]
    pub batch_id: Option<BatchId>,
    pub resource: ResourceId,
    #[serde(default)]
    pub tool_config: Option<ToolConfigId>,
    #[serde(default)]
    pub run_number: u32,
    /// Set while a coordinator owns this task's remote execution.
    #[serde(default)]
    pub configure_only: bool,
    #[serde(default)]
    pub job: Option<RemoteJob>,
    #[serde(default)]
    pub log: Vec<LogEntry>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// A fresh, unsaved task in status `New`.
    pub fn new(kind: TaskKind, resource: impl Into<ResourceId>) -> Self {
        Self {
            id: None,
            version: 0,
            kind,
            status: Status::New,
            description: String::new(),
            params: Value::Object(Map::new()),
            prerequisites: Prerequisites::default(),
            rank: None,
            level: None,
            batch_id: None,
            resource: resource.into(),
            tool_config: None,
            run_number: 1,
            configure_only: false,
            job: None,
            log: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn name(&self) -> &str {
        self.kind.name()
    }

    /// `Name#id`, or `Name#new` before the first save.
    pub fn fullname(&self) -> String {
        match self.id {
            Some(id) => format!("{}#{}", self.name(), id),
            None => format!("{}#new", self.name()),
        }
    }

    pub fn handler(&self) -> &dyn PhaseHandler {
        self.kind.handler()
    }

    pub fn addlog(&mut self, message: impl Into<String>) {
        self.log.push(LogEntry {
            at: Utc::now(),
            message: message.into(),
        });
    }

    /// Typed read of a parameter; `None` when absent or null.
    pub fn param<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.params.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
        }
    }

    pub fn set_param<T: Serialize>(&mut self, key: &str, value: T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        if !self.params.is_object() {
            self.params = Value::Object(Map::new());
        }
        if let Value::Object(map) = &mut self.params {
            map.insert(key.to_string(), value);
        }
        Ok(())
    }
}
