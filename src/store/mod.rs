// src/store/mod.rs

//! Task persistence with optimistic concurrency.
//!
//! Every read hands out a copy carrying the record's version. A save is
//! accepted only if that version is still current; otherwise it fails with
//! [`EngineError::Conflict`] and the caller re-reads and retries.

mod memory;

pub use memory::MemoryStore;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{EngineError, Result};
use crate::status::Status;
use crate::task::{BatchId, ResourceId, Task, TaskId, ToolConfigId, ToolId};

/// A named tool that tasks (including coordinators) run under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tool {
    pub id: ToolId,
    pub name: String,
}

/// Per-resource configuration of a tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolConfig {
    pub id: Option<ToolConfigId>,
    pub tool_id: ToolId,
    pub resource: ResourceId,
    pub ncpus: u32,
    pub description: String,
}

/// Conjunctive task query. `None` fields do not filter.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub statuses: Option<Vec<Status>>,
    pub resource: Option<ResourceId>,
    pub batch_id: Option<BatchId>,
    pub updated_before: Option<DateTime<Utc>>,
}

impl TaskFilter {
    pub fn with_statuses(mut self, statuses: &[Status]) -> Self {
        self.statuses = Some(statuses.to_vec());
        self
    }

    pub fn on_resource(mut self, resource: impl Into<ResourceId>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn in_batch(mut self, batch_id: BatchId) -> Self {
        self.batch_id = Some(batch_id);
        self
    }

    pub fn updated_before(mut self, at: DateTime<Utc>) -> Self {
        self.updated_before = Some(at);
        self
    }

    pub fn accepts(&self, task: &Task) -> bool {
        self.statuses
            .as_ref()
            .is_none_or(|statuses| statuses.contains(&task.status))
            && self.resource.as_ref().is_none_or(|r| *r == task.resource)
            && self.batch_id.is_none_or(|b| task.batch_id == Some(b))
            && self.updated_before.is_none_or(|at| task.updated_at < at)
    }
}

/// Storage backend for tasks, tools and tool configs.
pub trait TaskStore: Send + Sync + fmt::Debug {
    fn read(&self, id: TaskId) -> Result<Task>;

    /// Persist a new task, assigning its id and first version.
    fn create(&self, task: Task) -> Result<Task>;

    /// Conditional write: succeeds only if `task.version` is current.
    /// Returns the saved copy with its new version.
    fn save(&self, task: &Task) -> Result<Task>;

    /// Matching tasks ordered by id.
    fn query(&self, filter: &TaskFilter) -> Result<Vec<Task>>;

    fn next_batch_id(&self) -> Result<BatchId>;

    fn find_tool(&self, name: &str) -> Result<Option<Tool>>;

    fn find_tool_config(&self, tool_id: ToolId, resource: &str) -> Result<Option<ToolConfig>>;

    /// Fails with [`EngineError::Duplicate`] if a config for the same tool
    /// and resource already exists.
    fn create_tool_config(&self, config: ToolConfig) -> Result<ToolConfig>;
}

/// Fetch the tool config of `tool_id` on `resource`, creating it from
/// `defaults` on first use.
///
/// Concurrent creators race on the store's uniqueness check; the loser
/// re-reads the winner's record.
pub fn tool_config_for(store: &dyn TaskStore, defaults: ToolConfig) -> Result<ToolConfig> {
    if let Some(existing) = store.find_tool_config(defaults.tool_id, &defaults.resource)? {
        return Ok(existing);
    }

    let tool_id = defaults.tool_id;
    let resource = defaults.resource.clone();
    match store.create_tool_config(defaults) {
        Ok(created) => {
            debug!(tool_id, resource = %resource, "tool config created");
            Ok(created)
        }
        Err(EngineError::Duplicate(_)) => store
            .find_tool_config(tool_id, &resource)?
            .ok_or_else(|| {
                EngineError::Config(format!(
                    "tool config for tool {tool_id} on '{resource}' vanished after a duplicate insert"
                ))
            }),
        Err(e) => Err(e),
    }
}
