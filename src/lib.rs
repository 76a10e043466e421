// src/lib.rs

pub mod batch;
pub mod cli;
pub mod config;
pub mod control;
pub mod coordinator;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod prereq;
pub mod recovery;
pub mod status;
pub mod store;
pub mod task;
pub mod types;
pub mod worker;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::batch::BatchFactory;
use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::config::model::{ConfigFile, TaskConfig};
use crate::engine::Engine;
use crate::exec::{LocalExecutor, LocalSync};
use crate::status::Status;
use crate::store::{MemoryStore, TaskFilter};
use crate::task::{
    ProgramSpec, Task, TaskKind, COMMANDS_PARAM, INPUTS_PARAM, OUTPUTS_PARAM, WALLTIME_PARAM,
};
use crate::types::CoordinatorKind;
use crate::worker::Worker;

/// High-level entry point used by `main.rs`.
///
/// Loads the config, submits every configured task in batches per
/// resource, then runs one worker per resource until every task has
/// settled or Ctrl-C is pressed.
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = PathBuf::from(&args.config);
    let cfg = load_and_validate(&config_path)?;

    if args.dry_run {
        print_dry_run(&cfg);
        return Ok(());
    }

    let store = Arc::new(MemoryStore::new());
    for kind in [CoordinatorKind::Serial, CoordinatorKind::Parallel] {
        store.register_tool(kind.tool_name())?;
    }
    let engine = Arc::new(Engine::new(store.clone()));

    for (resource, _) in cfg.resources.iter() {
        let drafts = standby_tasks(&engine, &cfg, resource)?;
        if drafts.is_empty() {
            continue;
        }
        let outcome = BatchFactory::new(&engine, cfg.coordinator)
            .create_from_task_list(&drafts, &cfg.batch)?;
        if !outcome.message.is_empty() {
            println!("{}", outcome.message);
        }
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut handles = Vec::new();
    for (name, resource) in cfg.resources.iter() {
        let capabilities = resource.capabilities();
        let remote = Arc::new(LocalExecutor::new(capabilities));
        let sync = Arc::new(LocalSync::new(&resource.data_root, &resource.cache_root));
        let worker = Worker::start(
            name.clone(),
            engine.clone(),
            remote,
            sync,
            cfg.worker_options(resource),
        )
        .await?;
        let rx = shutdown_rx.clone();
        handles.push(tokio::spawn(async move { worker.run(rx).await }));
    }

    // Ctrl-C → graceful shutdown.
    {
        let tx = shutdown_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            let _ = tx.send(true);
        });
    }

    let poll = Duration::from_millis(cfg.worker.poll_interval_ms);
    loop {
        if *shutdown_tx.borrow() {
            break;
        }
        let tasks = engine.query(&TaskFilter::default())?;
        if tasks.iter().all(|t| t.status.is_settled()) {
            info!(tasks = tasks.len(), "all tasks settled");
            let _ = shutdown_tx.send(true);
            break;
        }
        tokio::time::sleep(poll).await;
    }

    for handle in handles {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "worker exited with error"),
            Err(e) => warn!(error = %e, "worker task panicked"),
        }
    }

    print_report(&engine)?;
    Ok(())
}

/// Create `count` Standby copies of every task configured on `resource`.
fn standby_tasks(engine: &Engine, cfg: &ConfigFile, resource: &str) -> Result<Vec<Task>> {
    let mut created = Vec::new();
    for (name, task_cfg) in cfg.tasks.iter().filter(|(_, t)| t.resource == resource) {
        for copy in 0..task_cfg.count {
            let mut draft = program_task(name, task_cfg)?;
            if task_cfg.count > 1 {
                draft.description = format!("{name} ({} of {})", copy + 1, task_cfg.count);
            }
            created.push(engine.create(draft)?);
        }
    }
    debug!(resource, tasks = created.len(), "standby tasks created");
    Ok(created)
}

fn program_task(name: &str, task_cfg: &TaskConfig) -> Result<Task> {
    let spec = ProgramSpec::new(name)
        .recoverable_at(task_cfg.recoverable.iter().copied())
        .restartable_at(task_cfg.restartable.iter().copied());
    let mut task = Task::new(TaskKind::Program(spec), task_cfg.resource.clone());
    task.status = Status::Standby;
    task.description = name.to_string();
    task.set_param(COMMANDS_PARAM, &task_cfg.commands)?;
    task.set_param(INPUTS_PARAM, &task_cfg.inputs)?;
    task.set_param(OUTPUTS_PARAM, &task_cfg.outputs)?;
    if let Some(secs) = task_cfg.walltime_secs {
        task.set_param(WALLTIME_PARAM, secs)?;
    }
    Ok(task)
}

fn print_report(engine: &Engine) -> Result<()> {
    let tasks = engine.query(&TaskFilter::default())?;
    println!("taskgate report ({} tasks):", tasks.len());
    for task in &tasks {
        println!("  {:<28} {}", task.fullname(), task.status);
    }
    Ok(())
}

/// Print the planned tasks without creating or running anything.
fn print_dry_run(cfg: &ConfigFile) {
    println!("taskgate dry-run");
    println!("  coordinator = {}", cfg.coordinator);
    println!("  group_size = {}", cfg.batch.group_size);
    println!(
        "  min_group_size = {}",
        cfg.batch.effective_min_group_size()
    );
    println!();

    println!("resources ({}):", cfg.resources.len());
    for (name, resource) in cfg.resources.iter() {
        println!("  - {name}");
        println!("      work_root: {}", resource.work_root.display());
        println!("      data_root: {}", resource.data_root.display());
        println!("      cache_root: {}", resource.cache_root.display());
    }
    println!();

    println!("tasks ({}):", cfg.task_count());
    for (name, task) in cfg.tasks.iter() {
        println!("  - {name} x {} on {}", task.count, task.resource);
        for cmd in &task.commands {
            println!("      cmd: {cmd}");
        }
        if !task.inputs.is_empty() {
            println!("      inputs: {:?}", task.inputs);
        }
        if !task.outputs.is_empty() {
            println!("      outputs: {:?}", task.outputs);
        }
        if let Some(secs) = task.walltime_secs {
            println!("      walltime: {secs}s");
        }
    }

    debug!("dry-run complete (no execution)");
}
