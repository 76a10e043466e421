// src/engine/mod.rs

//! The single write path for task state.
//!
//! Every mutation of a persisted task goes through [`Engine::update`]:
//! read a fresh copy, apply a closure, save conditionally on the version
//! read, and retry the whole read-apply-save cycle on conflict. Status
//! moves are checked against the transition table before saving, and
//! hooks fire once the new status is committed.
//!
//! Phase gating (prerequisites plus the conditional move into a phase's
//! first status) lives in [`gate`].

mod gate;

pub use gate::PhaseEntry;

use std::sync::Arc;

use tracing::{debug, warn};

use crate::errors::{EngineError, Result};
use crate::prereq::PrerequisiteEvaluator;
use crate::status::{self, HookTable, Status, StatusHook};
use crate::store::{TaskFilter, TaskStore};
use crate::task::{Task, TaskId};

/// Attempts before a contended write gives up with the last conflict.
const MAX_WRITE_ATTEMPTS: usize = 32;

#[derive(Debug)]
pub struct Engine {
    store: Arc<dyn TaskStore>,
    hooks: HookTable,
}

impl Engine {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self {
            store,
            hooks: HookTable::new(),
        }
    }

    pub fn store(&self) -> &dyn TaskStore {
        self.store.as_ref()
    }

    pub fn hooks(&self) -> &HookTable {
        &self.hooks
    }

    pub fn register_hook(&self, hook: StatusHook) {
        debug!(hook = %hook.name, from = %hook.from, to = %hook.to, "status hook registered");
        self.hooks.register(hook);
    }

    pub fn evaluator(&self) -> PrerequisiteEvaluator<'_> {
        PrerequisiteEvaluator::new(self.store.as_ref())
    }

    pub fn read(&self, id: TaskId) -> Result<Task> {
        self.store.read(id)
    }

    pub fn query(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        self.store.query(filter)
    }

    pub fn create(&self, task: Task) -> Result<Task> {
        let created = self.store.create(task)?;
        debug!(task = %created.fullname(), status = %created.status, "task created");
        Ok(created)
    }

    /// Read-modify-write with retry on conflict.
    ///
    /// `apply` sees a fresh copy on every attempt and returns whether to
    /// write; `Ok(false)` leaves the record untouched and yields `None`.
    /// An error from `apply` aborts without writing.
    pub fn update<F>(&self, id: TaskId, mut apply: F) -> Result<Option<Task>>
    where
        F: FnMut(&mut Task) -> Result<bool>,
    {
        let mut last_conflict = None;

        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let current = self.store.read(id)?;
            let mut next = current.clone();
            if !apply(&mut next)? {
                return Ok(None);
            }
            status::ensure_legal(current.status, next.status)?;

            match self.store.save(&next) {
                Ok(saved) => {
                    if saved.status != current.status {
                        debug!(
                            task = %saved.fullname(),
                            from = %current.status,
                            to = %saved.status,
                            "status changed"
                        );
                        self.fire_hooks(&saved, current.status);
                    }
                    return Ok(Some(saved));
                }
                Err(e) if e.is_conflict() => {
                    debug!(task = id, attempt, "conflicting write; retrying");
                    last_conflict = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        warn!(task = id, "giving up on contended write");
        Err(last_conflict.unwrap_or(EngineError::Conflict {
            id,
            expected: 0,
            found: 0,
        }))
    }

    /// Conditional status move: succeeds only if the task is still in
    /// `from` when the write lands.
    ///
    /// Moving to the current status is a successful no-op. Returns
    /// `Ok(false)` when the task had already left `from`.
    pub fn transition(&self, id: TaskId, from: Status, to: Status) -> Result<bool> {
        if from == to {
            return Ok(self.store.read(id)?.status == from);
        }
        status::ensure_legal(from, to)?;
        let saved = self.update(id, |task| {
            if task.status != from {
                return Ok(false);
            }
            task.status = to;
            Ok(true)
        })?;
        Ok(saved.is_some())
    }

    /// Like [`Engine::transition`], with a log line recorded in the same
    /// write.
    pub fn transition_with_log(
        &self,
        id: TaskId,
        from: Status,
        to: Status,
        message: &str,
    ) -> Result<bool> {
        status::ensure_legal(from, to)?;
        let saved = self.update(id, |task| {
            if task.status != from {
                return Ok(false);
            }
            task.status = to;
            task.addlog(message);
            Ok(true)
        })?;
        Ok(saved.is_some())
    }

    /// Write back the outcome of a handler that ran on a working copy.
    ///
    /// The handler-owned fields of `work` (params, prerequisites, run number,
    /// log lines added after `log_mark`, remote job) are applied to a fresh
    /// read,
    /// together with the new status. Nothing is written if the task has
    /// left `expected` in the meantime.
    pub fn commit_work(
        &self,
        work: &Task,
        expected: Status,
        log_mark: usize,
        to: Status,
    ) -> Result<Option<Task>> {
        let id = work.id.ok_or_else(|| {
            EngineError::Config(format!("task {} has not been saved", work.fullname()))
        })?;
        let added = work.log.get(log_mark..).unwrap_or_default();
        self.update(id, |task| {
            if task.status != expected {
                return Ok(false);
            }
            task.params = work.params.clone();
            task.prerequisites = work.prerequisites.clone();
            task.job = work.job.clone();
            task.run_number = work.run_number;
            task.log.extend(added.iter().cloned());
            task.status = to;
            Ok(true)
        })
    }

    /// Append a line to a task's audit log.
    pub fn addlog(&self, id: TaskId, message: impl AsRef<str>) -> Result<()> {
        self.update(id, |task| {
            task.addlog(message.as_ref());
            Ok(true)
        })?;
        Ok(())
    }

    fn fire_hooks(&self, task: &Task, from: Status) {
        let mut hooks = self.hooks.matching(from, task.status);
        hooks.extend(
            task.handler()
                .status_hooks()
                .into_iter()
                .filter(|h| h.matches(from, task.status)),
        );
        status::fire_hooks(&hooks, self, task, from);
    }
}
