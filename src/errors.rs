// src/errors.rs

//! Crate-wide error type and result alias.

use thiserror::Error;

use crate::status::Status;
use crate::task::TaskId;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Task {id} was modified concurrently (expected version {expected}, found {found})")]
    Conflict { id: TaskId, expected: u64, found: u64 },

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Duplicate record: {0}")]
    Duplicate(String),

    #[error("Invalid prerequisite: {0}")]
    InvalidPrerequisite(String),

    #[error("Illegal status transition from '{from}' to '{to}'")]
    IllegalTransition { from: Status, to: Status },

    #[error("Remote execution error: {0}")]
    Remote(String),

    #[error("Data synchronization error: {0}")]
    Sync(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid status pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    /// True for optimistic-concurrency failures that a caller may retry.
    pub fn is_conflict(&self) -> bool {
        matches!(self, EngineError::Conflict { .. })
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
