// src/store/memory.rs

//! In-process [`TaskStore`] used by the binary and the test suite.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use anyhow::anyhow;
use chrono::Utc;

use super::{TaskFilter, TaskStore, Tool, ToolConfig};
use crate::errors::{EngineError, Result};
use crate::task::{BatchId, Task, TaskId, ToolId};

#[derive(Debug, Default)]
struct Inner {
    tasks: BTreeMap<TaskId, Task>,
    tools: BTreeMap<ToolId, Tool>,
    tool_configs: Vec<ToolConfig>,
    next_task_id: TaskId,
    next_batch_id: BatchId,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool by name, returning the existing one if present.
    pub fn register_tool(&self, name: &str) -> Result<Tool> {
        let mut inner = self.lock()?;
        if let Some(tool) = inner.tools.values().find(|t| t.name == name) {
            return Ok(tool.clone());
        }
        let tool = Tool {
            id: inner.tools.len() as ToolId + 1,
            name: name.to_string(),
        };
        inner.tools.insert(tool.id, tool.clone());
        Ok(tool)
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.tasks.len())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| EngineError::Other(anyhow!("task store lock poisoned")))
    }
}

impl TaskStore for MemoryStore {
    fn read(&self, id: TaskId) -> Result<Task> {
        self.lock()?
            .tasks
            .get(&id)
            .cloned()
            .ok_or(EngineError::TaskNotFound(id))
    }

    fn create(&self, mut task: Task) -> Result<Task> {
        let mut inner = self.lock()?;
        inner.next_task_id += 1;
        let id = inner.next_task_id;
        task.id = Some(id);
        task.version = 1;
        task.updated_at = Utc::now();
        inner.tasks.insert(id, task.clone());
        Ok(task)
    }

    fn save(&self, task: &Task) -> Result<Task> {
        let id = task.id.ok_or_else(|| {
            EngineError::Other(anyhow!("cannot save task '{}' before it is created", task.name()))
        })?;
        let mut inner = self.lock()?;
        let current = inner.tasks.get_mut(&id).ok_or(EngineError::TaskNotFound(id))?;
        if current.version != task.version {
            return Err(EngineError::Conflict {
                id,
                expected: task.version,
                found: current.version,
            });
        }
        let mut saved = task.clone();
        saved.version += 1;
        saved.updated_at = Utc::now();
        *current = saved.clone();
        Ok(saved)
    }

    fn query(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        Ok(self
            .lock()?
            .tasks
            .values()
            .filter(|t| filter.accepts(t))
            .cloned()
            .collect())
    }

    fn next_batch_id(&self) -> Result<BatchId> {
        let mut inner = self.lock()?;
        inner.next_batch_id += 1;
        Ok(inner.next_batch_id)
    }

    fn find_tool(&self, name: &str) -> Result<Option<Tool>> {
        Ok(self.lock()?.tools.values().find(|t| t.name == name).cloned())
    }

    fn find_tool_config(&self, tool_id: ToolId, resource: &str) -> Result<Option<ToolConfig>> {
        Ok(self
            .lock()?
            .tool_configs
            .iter()
            .find(|c| c.tool_id == tool_id && c.resource == resource)
            .cloned())
    }

    fn create_tool_config(&self, mut config: ToolConfig) -> Result<ToolConfig> {
        let mut inner = self.lock()?;
        if inner
            .tool_configs
            .iter()
            .any(|c| c.tool_id == config.tool_id && c.resource == config.resource)
        {
            return Err(EngineError::Duplicate(format!(
                "tool config for tool {} on '{}'",
                config.tool_id, config.resource
            )));
        }
        config.id = Some(inner.tool_configs.len() as u64 + 1);
        inner.tool_configs.push(config.clone());
        Ok(config)
    }
}
