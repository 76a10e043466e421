#![allow(dead_code)]

use std::sync::Arc;

use taskgate::engine::Engine;
use taskgate::status::{Phase, Status};
use taskgate::store::MemoryStore;
use taskgate::task::{
    ProgramSpec, Task, TaskId, TaskKind, COMMANDS_PARAM, INPUTS_PARAM, OUTPUTS_PARAM,
    WALLTIME_PARAM,
};
use taskgate::types::CoordinatorKind;

/// Resource every builder task lands on unless told otherwise.
pub const RESOURCE: &str = "local";

/// Builder for program `Task` drafts.
pub struct TaskBuilder {
    task: Task,
    spec: ProgramSpec,
}

impl TaskBuilder {
    /// A program task in `Standby` on [`RESOURCE`].
    pub fn new(tool: &str) -> Self {
        let mut task = Task::new(TaskKind::program(tool), RESOURCE);
        task.status = Status::Standby;
        task.description = tool.to_string();
        Self {
            task,
            spec: ProgramSpec::new(tool),
        }
    }

    pub fn status(mut self, status: Status) -> Self {
        self.task.status = status;
        self
    }

    pub fn resource(mut self, resource: &str) -> Self {
        self.task.resource = resource.to_string();
        self
    }

    pub fn commands(mut self, commands: &[&str]) -> Self {
        self.task
            .set_param(COMMANDS_PARAM, commands)
            .expect("commands serialize");
        self
    }

    pub fn inputs(mut self, items: &[&str]) -> Self {
        self.task.set_param(INPUTS_PARAM, items).expect("inputs serialize");
        self
    }

    pub fn outputs(mut self, items: &[&str]) -> Self {
        self.task.set_param(OUTPUTS_PARAM, items).expect("outputs serialize");
        self
    }

    pub fn walltime_secs(mut self, secs: u64) -> Self {
        self.task.set_param(WALLTIME_PARAM, secs).expect("walltime serializes");
        self
    }

    pub fn recoverable(mut self, phases: &[Phase]) -> Self {
        self.spec = self.spec.recoverable_at(phases.iter().copied());
        self
    }

    pub fn restartable(mut self, phases: &[Phase]) -> Self {
        self.spec = self.spec.restartable_at(phases.iter().copied());
        self
    }

    pub fn rank(mut self, rank: i64) -> Self {
        self.task.rank = Some(rank);
        self
    }

    pub fn level(mut self, level: i32) -> Self {
        self.task.level = Some(level);
        self
    }

    pub fn build(mut self) -> Task {
        self.task.kind = TaskKind::Program(self.spec);
        self.task
    }
}

/// An in-memory store with both coordinator tools registered, and an
/// engine on top of it.
pub struct StoreFixture {
    pub store: Arc<MemoryStore>,
    pub engine: Arc<Engine>,
}

impl StoreFixture {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        for kind in [CoordinatorKind::Serial, CoordinatorKind::Parallel] {
            store
                .register_tool(kind.tool_name())
                .expect("tool registers");
        }
        let engine = Arc::new(Engine::new(store.clone()));
        Self { store, engine }
    }

    pub fn insert(&self, builder: TaskBuilder) -> Task {
        self.engine.create(builder.build()).expect("task is created")
    }

    /// `n` saved Standby program tasks that each echo their tool name.
    pub fn standby_programs(&self, tool: &str, n: usize) -> Vec<Task> {
        (0..n)
            .map(|i| {
                let cmd = format!("echo {tool} {i}");
                self.insert(TaskBuilder::new(tool).commands(&[cmd.as_str()]))
            })
            .collect()
    }

    pub fn read(&self, id: TaskId) -> Task {
        self.engine.read(id).expect("task exists")
    }

    pub fn status_of(&self, id: TaskId) -> Status {
        self.read(id).status
    }

    pub fn log_of(&self, id: TaskId) -> Vec<String> {
        self.read(id).log.into_iter().map(|e| e.message).collect()
    }

    /// Force a status, bypassing transition rules. Test setup only.
    pub fn force_status(&self, id: TaskId, status: Status) {
        let mut task = self.read(id);
        task.status = status;
        taskgate::store::TaskStore::save(self.store.as_ref(), &task).expect("forced save");
    }
}

impl Default for StoreFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Id of a saved task.
pub fn id(task: &Task) -> TaskId {
    task.id.expect("task has been saved")
}
