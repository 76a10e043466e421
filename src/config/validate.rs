// src/config/validate.rs

use crate::batch::BatchOptions;
use crate::config::model::{BatchSection, ConfigFile, RawConfigFile};
use crate::errors::{EngineError, Result};
use crate::status::{self, Status};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = EngineError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        ensure_has_resources(&raw)?;
        ensure_has_tasks(&raw)?;
        validate_worker(&raw)?;
        validate_tasks(&raw)?;
        let batch = batch_options(&raw.batch)?;
        Ok(ConfigFile::new_unchecked(
            raw.worker,
            raw.batch.coordinator,
            batch,
            raw.resource,
            raw.task,
        ))
    }
}

fn ensure_has_resources(cfg: &RawConfigFile) -> Result<()> {
    if cfg.resource.is_empty() {
        return Err(EngineError::Config(
            "config must contain at least one [resource.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn ensure_has_tasks(cfg: &RawConfigFile) -> Result<()> {
    if cfg.task.is_empty() {
        return Err(EngineError::Config(
            "config must contain at least one [task.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_worker(cfg: &RawConfigFile) -> Result<()> {
    let worker = &cfg.worker;
    for (name, value) in [
        ("poll_interval_ms", worker.poll_interval_ms),
        ("idle_sleep_ms", worker.idle_sleep_ms),
        ("monitor_interval_ms", worker.monitor_interval_ms),
    ] {
        if value == 0 {
            return Err(EngineError::Config(format!(
                "[worker].{name} must be >= 1 (got 0)"
            )));
        }
    }
    Ok(())
}

fn validate_tasks(cfg: &RawConfigFile) -> Result<()> {
    for (name, task) in &cfg.task {
        if !cfg.resource.contains_key(&task.resource) {
            return Err(EngineError::Config(format!(
                "task '{}' refers to unknown resource '{}'",
                name, task.resource
            )));
        }
        if task.count == 0 {
            return Err(EngineError::Config(format!(
                "task '{name}' must have count >= 1 (got 0)"
            )));
        }
    }
    Ok(())
}

/// Start states must be reachable from `Standby` in one move.
fn start_state(field: &str, value: &str) -> Result<Status> {
    let status: Status = value
        .parse()
        .map_err(|e| EngineError::Config(format!("[batch].{field}: {e}")))?;
    status::ensure_legal(Status::Standby, status).map_err(|_| {
        EngineError::Config(format!(
            "[batch].{field}: '{status}' cannot be entered from Standby"
        ))
    })?;
    Ok(status)
}

fn batch_options(batch: &BatchSection) -> Result<BatchOptions> {
    if batch.group_size == 0 {
        return Err(EngineError::Config(
            "[batch].group_size must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(BatchOptions {
        group_size: batch.group_size,
        min_group_size: batch.min_group_size,
        initial_rank: batch.initial_rank,
        subtask_level: batch.subtask_level,
        coordinator_level: batch.coordinator_level,
        subtask_start_state: start_state("subtask_start_state", &batch.subtask_start_state)?,
        coordinator_start_state: start_state(
            "coordinator_start_state",
            &batch.coordinator_start_state,
        )?,
    })
}
