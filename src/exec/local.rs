// src/exec/local.rs

//! Execution resource backed by processes on the local machine.
//!
//! Each submitted job is a staged script run by the configured shell in its
//! work area, with stdout/stderr redirected to the per-run files. A Tokio
//! task waits for the process and records how it ended.

use std::collections::HashMap;
use std::fs::File;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context};
use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::remote::{
    BoxFuture, JobControl, JobRequest, RemoteExecutor, RemoteState, ResourceCapabilities, WorkArea,
};
use crate::errors::{EngineError, Result};

const LOCAL_NODE: &str = "localhost";

struct LocalJob {
    state: RemoteState,
    cancel: Option<oneshot::Sender<()>>,
}

type JobTable = Arc<Mutex<HashMap<String, LocalJob>>>;

pub struct LocalExecutor {
    capabilities: ResourceCapabilities,
    jobs: JobTable,
    next_job: AtomicU64,
}

impl Default for LocalExecutor {
    fn default() -> Self {
        Self::new(ResourceCapabilities::default())
    }
}

impl LocalExecutor {
    pub fn new(capabilities: ResourceCapabilities) -> Self {
        Self {
            capabilities,
            jobs: Arc::new(Mutex::new(HashMap::new())),
            next_job: AtomicU64::new(1),
        }
    }

    fn set_state(jobs: &JobTable, job_id: &str, state: RemoteState) {
        match jobs.lock() {
            Ok(mut jobs) => {
                if let Some(job) = jobs.get_mut(job_id) {
                    job.state = state;
                    job.cancel = None;
                }
            }
            Err(_) => warn!(job = %job_id, "local job table poisoned"),
        }
    }

    fn spawn_job(&self, request: JobRequest) -> anyhow::Result<String> {
        let job_id = format!("local-{}", self.next_job.fetch_add(1, Ordering::SeqCst));
        let dir = &request.work_area.path;
        let stdout = File::create(dir.join(&request.stdout_name))
            .with_context(|| format!("creating stdout file in {:?}", dir))?;
        let stderr = File::create(dir.join(&request.stderr_name))
            .with_context(|| format!("creating stderr file in {:?}", dir))?;

        let mut cmd = Command::new(&self.capabilities.shell);
        cmd.arg(&request.script_name)
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawning script for task {}", request.task_id))?;

        let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();
        self.jobs
            .lock()
            .map_err(|_| anyhow!("local job table poisoned"))?
            .insert(
                job_id.clone(),
                LocalJob {
                    state: RemoteState::Running {
                        node: Some(LOCAL_NODE.to_string()),
                    },
                    cancel: Some(cancel_tx),
                },
            );

        info!(task = request.task_id, job = %job_id, "local job started");

        let jobs = Arc::clone(&self.jobs);
        let walltime = request.walltime;
        let id = job_id.clone();
        tokio::spawn(async move {
            let limit = async {
                match walltime {
                    Some(limit) => tokio::time::sleep(limit).await,
                    None => std::future::pending::<()>().await,
                }
            };

            let success = tokio::select! {
                status = child.wait() => match status {
                    Ok(status) => {
                        debug!(job = %id, code = ?status.code(), "local job exited");
                        status.success()
                    }
                    Err(e) => {
                        warn!(job = %id, error = %e, "waiting for local job failed");
                        false
                    }
                },
                _ = &mut cancel_rx => {
                    info!(job = %id, "terminating local job");
                    if let Err(e) = child.kill().await {
                        warn!(job = %id, error = %e, "failed to kill local job");
                    }
                    false
                }
                _ = limit => {
                    warn!(job = %id, walltime = ?walltime, "local job exceeded its walltime");
                    let _ = child.kill().await;
                    false
                }
            };

            LocalExecutor::set_state(&jobs, &id, RemoteState::Finished { success });
        });

        Ok(job_id)
    }
}

impl RemoteExecutor for LocalExecutor {
    fn probe(&self) -> BoxFuture<'_, Result<ResourceCapabilities>> {
        Box::pin(async move { Ok(self.capabilities.clone()) })
    }

    fn stage_script(
        &self,
        area: WorkArea,
        script_name: String,
        commands: Vec<String>,
    ) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            tokio::fs::create_dir_all(&area.path)
                .await
                .with_context(|| format!("creating work area {:?}", area.path))?;

            let mut script = format!("#!{}\n", self.capabilities.shell);
            for line in &commands {
                script.push_str(line);
                script.push('\n');
            }
            let path = area.path.join(&script_name);
            tokio::fs::write(&path, script)
                .await
                .with_context(|| format!("writing script {:?}", path))?;
            Ok(())
        })
    }

    fn submit(&self, request: JobRequest) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move { Ok(self.spawn_job(request)?) })
    }

    fn status(&self, job_id: String) -> BoxFuture<'_, Result<RemoteState>> {
        Box::pin(async move {
            let jobs = self
                .jobs
                .lock()
                .map_err(|_| EngineError::Remote("local job table poisoned".into()))?;
            Ok(jobs
                .get(&job_id)
                .map(|job| job.state.clone())
                .unwrap_or(RemoteState::Unknown))
        })
    }

    fn control(&self, job_id: String, action: JobControl) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if action != JobControl::Terminate {
                return Err(EngineError::Remote(format!(
                    "the local resource cannot {action} jobs"
                )));
            }
            let cancel = self
                .jobs
                .lock()
                .map_err(|_| EngineError::Remote("local job table poisoned".into()))?
                .get_mut(&job_id)
                .and_then(|job| job.cancel.take());
            match cancel {
                Some(cancel) => {
                    let _ = cancel.send(());
                    Ok(())
                }
                None => {
                    debug!(job = %job_id, "terminate requested for a job that is not running");
                    Ok(())
                }
            }
        })
    }
}
