// src/status/hooks.rs

//! Callbacks fired after a status change has been committed.

use std::fmt;
use std::sync::{Arc, RwLock};

use tracing::warn;

use super::Status;
use crate::engine::Engine;
use crate::errors::Result;
use crate::prereq::StatusPattern;
use crate::task::Task;

/// Hook callback. Receives the engine, the task as saved and the status
/// it left.
pub type HookFn = Arc<dyn Fn(&Engine, &Task, Status) -> Result<()> + Send + Sync>;

/// A callback keyed by (source pattern, destination status).
#[derive(Clone)]
pub struct StatusHook {
    pub name: String,
    pub from: StatusPattern,
    pub to: Status,
    pub callback: HookFn,
}

impl StatusHook {
    pub fn new(
        name: impl Into<String>,
        from: StatusPattern,
        to: Status,
        callback: impl Fn(&Engine, &Task, Status) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            from,
            to,
            callback: Arc::new(callback),
        }
    }

    pub fn matches(&self, from: Status, to: Status) -> bool {
        self.to == to && self.from.matches(from)
    }
}

impl fmt::Debug for StatusHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusHook")
            .field("name", &self.name)
            .field("from", &self.from)
            .field("to", &self.to)
            .finish()
    }
}

/// Process-wide hook registry shared by every task.
///
/// Hooks may be registered after the engine has been shared, so the list
/// sits behind a lock.
#[derive(Debug, Default)]
pub struct HookTable {
    hooks: RwLock<Vec<StatusHook>>,
}

impl HookTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, hook: StatusHook) {
        match self.hooks.write() {
            Ok(mut hooks) => hooks.push(hook),
            Err(poisoned) => poisoned.into_inner().push(hook),
        }
    }

    pub fn len(&self) -> usize {
        match self.hooks.read() {
            Ok(hooks) => hooks.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the hooks matching a move, so callbacks run without the
    /// lock held and may register further hooks.
    pub fn matching(&self, from: Status, to: Status) -> Vec<StatusHook> {
        let hooks = match self.hooks.read() {
            Ok(hooks) => hooks,
            Err(poisoned) => poisoned.into_inner(),
        };
        hooks
            .iter()
            .filter(|h| h.matches(from, to))
            .cloned()
            .collect()
    }
}

/// Run every hook in order. A failing hook is logged and does not stop the
/// others; the status change it reacts to is already committed.
pub(crate) fn fire(hooks: &[StatusHook], engine: &Engine, task: &Task, from: Status) {
    for hook in hooks {
        if let Err(e) = (hook.callback)(engine, task, from) {
            warn!(
                hook = %hook.name,
                task = ?task.id,
                from = %from,
                to = %task.status,
                error = %e,
                "status hook failed"
            );
        }
    }
}
