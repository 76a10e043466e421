// src/batch/mod.rs

//! Batch coordinator factory.
//!
//! Takes a list of `Standby` tasks bound for one execution resource, cuts it
//! into fixed-size chunks and puts each chunk large enough under a new
//! coordinator task. The coordinator waits (`for_setup`) for its members to
//! be configured; the members wait (`for_post_processing`) for the
//! coordinator to complete and are held after setup (`configure_only`).
//! Chunks too small to be worth coordinating are started on their own.

use tracing::{debug, info};

use crate::coordinator::Membership;
use crate::engine::Engine;
use crate::errors::{EngineError, Result};
use crate::prereq::{self, StatusPattern};
use crate::status::{self, Phase, Status};
use crate::store::{self, ToolConfig};
use crate::task::{BatchId, Task, TaskId};
use crate::types::CoordinatorKind;

/// Default CPU hint recorded on auto-created coordinator tool configs.
const COORDINATOR_NCPUS: u32 = 512;

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub group_size: usize,
    /// Defaults to `group_size`; larger values are clamped to it.
    pub min_group_size: Option<usize>,
    pub initial_rank: i64,
    pub subtask_level: i32,
    pub coordinator_level: i32,
    pub subtask_start_state: Status,
    pub coordinator_start_state: Status,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            group_size: 2,
            min_group_size: None,
            initial_rank: 0,
            subtask_level: 1,
            coordinator_level: 0,
            subtask_start_state: Status::New,
            coordinator_start_state: Status::New,
        }
    }
}

impl BatchOptions {
    pub fn with_group_size(mut self, group_size: usize) -> Self {
        self.group_size = group_size;
        self
    }

    pub fn with_min_group_size(mut self, min_group_size: usize) -> Self {
        self.min_group_size = Some(min_group_size);
        self
    }

    /// Smallest chunk that gets a coordinator.
    ///
    /// An inconsistent minimum is clamped to the group size rather than
    /// rejected. With a group size of 1 every task gets its own coordinator.
    pub fn effective_min_group_size(&self) -> usize {
        self.min_group_size
            .unwrap_or(self.group_size)
            .min(self.group_size)
    }
}

/// What the factory did.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    /// Human-readable summary, possibly empty.
    pub message: String,
    pub coordinators: Vec<Task>,
    /// Tasks started directly, without a coordinator.
    pub ungrouped: Vec<Task>,
}

pub struct BatchFactory<'a> {
    engine: &'a Engine,
    kind: CoordinatorKind,
}

impl<'a> BatchFactory<'a> {
    pub fn new(engine: &'a Engine, kind: CoordinatorKind) -> Self {
        Self { engine, kind }
    }

    pub fn create_from_task_list(&self, tasks: &[Task], options: &BatchOptions) -> Result<BatchOutcome> {
        self.create_with_callback(tasks, options, |_, _| {})
    }

    /// Group `tasks`, calling `on_group(coordinator, members)` once per
    /// coordinator created.
    ///
    /// Preconditions are checked before anything is written. A failure in a
    /// later chunk leaves earlier chunks saved.
    pub fn create_with_callback<F>(
        &self,
        tasks: &[Task],
        options: &BatchOptions,
        mut on_group: F,
    ) -> Result<BatchOutcome>
    where
        F: FnMut(&Task, &[Task]),
    {
        if tasks.is_empty() {
            return Ok(BatchOutcome {
                message: String::new(),
                coordinators: Vec::new(),
                ungrouped: Vec::new(),
            });
        }

        let ids = self.check_preconditions(tasks, options)?;
        let resource = tasks[0].resource.clone();
        let tool_config = self.coordinator_tool_config(&resource)?;
        let batch_id = match tasks[0].batch_id {
            Some(id) => id,
            None => self.engine.store().next_batch_id()?,
        };

        let min_group_size = options.effective_min_group_size();
        let mut rank = options.initial_rank;
        let mut coordinators = Vec::new();
        let mut ungrouped = Vec::new();
        let mut covered = 0usize;

        for (chunk_ids, chunk) in ids.chunks(options.group_size).zip(tasks.chunks(options.group_size)) {
            if chunk.len() < min_group_size {
                for &id in chunk_ids {
                    let task = self.start_ungrouped(id, rank, batch_id, options)?;
                    rank += 1;
                    ungrouped.push(task);
                }
                continue;
            }

            let mut draft = Task::new(self.kind.task_kind(), resource.clone());
            draft.status = options.coordinator_start_state;
            draft.description = describe_group(self.kind, coordinators.len() + 1, chunk, tasks.len());
            draft.tool_config = tool_config.id;
            draft.batch_id = Some(batch_id);
            draft.rank = Some(rank);
            draft.level = Some(options.coordinator_level);
            Membership::new(chunk_ids.to_vec()).store_in(&mut draft)?;
            for &member in chunk_ids {
                prereq::add_prerequisite(
                    &mut draft,
                    member,
                    Phase::Setup,
                    StatusPattern::from(Status::Configured),
                )?;
            }
            rank += 1;

            let coordinator = self.engine.create(draft)?;
            let coordinator_id = coordinator
                .id
                .ok_or_else(|| EngineError::Config("coordinator was saved without an id".into()))?;

            let mut members = Vec::with_capacity(chunk_ids.len());
            for &id in chunk_ids {
                let member = self.start_member(id, coordinator_id, rank, batch_id, options)?;
                rank += 1;
                members.push(member);
            }
            covered += members.len();

            debug!(
                coordinator = %coordinator.fullname(),
                members = ?chunk_ids,
                "coordinator created"
            );
            on_group(&coordinator, &members);
            coordinators.push(coordinator);
        }

        let message = summary_message(self.kind, coordinators.len(), covered, ungrouped.len());
        info!(
            batch = batch_id,
            coordinators = coordinators.len(),
            covered,
            ungrouped = ungrouped.len(),
            "batch created"
        );

        Ok(BatchOutcome {
            message,
            coordinators,
            ungrouped,
        })
    }

    fn check_preconditions(&self, tasks: &[Task], options: &BatchOptions) -> Result<Vec<TaskId>> {
        if options.group_size == 0 {
            return Err(EngineError::Config("group size must be at least 1".into()));
        }
        status::ensure_legal(Status::Standby, options.subtask_start_state)?;

        let resource = &tasks[0].resource;
        let mut ids = Vec::with_capacity(tasks.len());
        for task in tasks {
            if task.status != Status::Standby {
                return Err(EngineError::Config(format!(
                    "trying to group task {} which is not in Standby (found '{}')",
                    task.fullname(),
                    task.status
                )));
            }
            if &task.resource != resource {
                return Err(EngineError::Config(format!(
                    "trying to group tasks bound for different resources ('{}' and '{}')",
                    resource, task.resource
                )));
            }
            let id = task.id.ok_or_else(|| {
                EngineError::Config(format!("task {} has not been saved yet", task.fullname()))
            })?;
            ids.push(id);
        }
        Ok(ids)
    }

    fn coordinator_tool_config(&self, resource: &str) -> Result<ToolConfig> {
        let store = self.engine.store();
        let tool = store.find_tool(self.kind.tool_name())?.ok_or_else(|| {
            EngineError::Config(format!("no tool configured for {} tasks", self.kind.tool_name()))
        })?;
        store::tool_config_for(
            store,
            ToolConfig {
                id: None,
                tool_id: tool.id,
                resource: resource.to_string(),
                ncpus: COORDINATOR_NCPUS,
                description: self.kind.tool_config_description(),
            },
        )
    }

    fn start_ungrouped(&self, id: TaskId, rank: i64, batch_id: BatchId, options: &BatchOptions) -> Result<Task> {
        self.engine
            .update(id, |task| {
                ensure_standby(task)?;
                task.status = options.subtask_start_state;
                task.rank.get_or_insert(rank);
                task.level.get_or_insert(options.subtask_level);
                task.batch_id.get_or_insert(batch_id);
                Ok(true)
            })?
            .ok_or(EngineError::TaskNotFound(id))
    }

    fn start_member(
        &self,
        id: TaskId,
        coordinator_id: TaskId,
        rank: i64,
        batch_id: BatchId,
        options: &BatchOptions,
    ) -> Result<Task> {
        self.engine
            .update(id, |task| {
                ensure_standby(task)?;
                prereq::add_prerequisite(
                    task,
                    coordinator_id,
                    Phase::PostProcessing,
                    StatusPattern::from(Status::Completed),
                )?;
                task.status = options.subtask_start_state;
                task.rank.get_or_insert(rank);
                task.level.get_or_insert(options.subtask_level);
                task.batch_id.get_or_insert(batch_id);
                task.configure_only = true;
                Ok(true)
            })?
            .ok_or(EngineError::TaskNotFound(id))
    }
}

fn ensure_standby(task: &Task) -> Result<()> {
    if task.status == Status::Standby {
        Ok(())
    } else {
        Err(EngineError::Config(format!(
            "task {} left Standby while being grouped (now '{}')",
            task.fullname(),
            task.status
        )))
    }
}

fn describe_group(kind: CoordinatorKind, number: usize, members: &[Task], total: usize) -> String {
    let name = members.first().map(Task::name).unwrap_or("task");
    let mut description = format!("{} #{} for {} x {}", kind.tool_name(), number, name, members.len());
    if members.len() < total {
        description.push_str(&format!(
            "\nThis task runs a subset of {} out of a larger batch of {} tasks.",
            members.len(),
            total
        ));
    }
    description
}

fn summary_message(kind: CoordinatorKind, coordinators: usize, covered: usize, ungrouped: usize) -> String {
    let label = kind.tool_name();
    let mut message = String::new();

    match coordinators {
        0 => {}
        1 => message.push_str(&format!(
            "Launched a {label} task (covering a total of {covered} tasks).\n"
        )),
        n => message.push_str(&format!(
            "Launched {n} {label} tasks (covering a total of {covered} tasks).\n"
        )),
    }

    if coordinators > 0 {
        match ungrouped {
            0 => {}
            1 => message.push_str(&format!(
                "In addition, 1 leftover task was started separately (without a {label}).\n"
            )),
            n => message.push_str(&format!(
                "In addition, {n} leftover tasks were started separately (without a {label}).\n"
            )),
        }
    }

    message
}
