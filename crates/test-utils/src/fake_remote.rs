#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use taskgate::errors::{EngineError, Result};
use taskgate::exec::{
    BoxFuture, DataSync, JobControl, JobRequest, RemoteExecutor, RemoteState,
    ResourceCapabilities, WorkArea,
};

/// A script staged through [`FakeRemote::stage_script`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedScript {
    pub area: PathBuf,
    pub name: String,
    pub commands: Vec<String>,
}

#[derive(Debug, Default)]
struct Inner {
    staged: Vec<StagedScript>,
    submissions: Vec<JobRequest>,
    controls: Vec<(String, JobControl)>,
    states: HashMap<String, RemoteState>,
    next_job: u64,
    fail_submit: bool,
    fail_control: bool,
}

/// A remote resource that:
/// - records every staged script, submission and control request
/// - reports whatever state a test scripted for each job (`Queued` at
///   first, `Unknown` for ids it never issued).
#[derive(Debug, Default)]
pub struct FakeRemote {
    capabilities: ResourceCapabilities,
    inner: Mutex<Inner>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// A resource that supports holding and suspending jobs.
    pub fn with_job_control() -> Self {
        Self {
            capabilities: ResourceCapabilities {
                supports_hold: true,
                supports_suspend: true,
                ..ResourceCapabilities::default()
            },
            inner: Mutex::default(),
        }
    }

    pub fn set_state(&self, job_id: &str, state: RemoteState) {
        self.inner
            .lock()
            .unwrap()
            .states
            .insert(job_id.to_string(), state);
    }

    /// Report every issued job as finished.
    pub fn finish_all(&self, success: bool) {
        let mut inner = self.inner.lock().unwrap();
        for state in inner.states.values_mut() {
            *state = RemoteState::Finished { success };
        }
    }

    /// Report every issued job as running on `node`.
    pub fn run_all_on(&self, node: &str) {
        let mut inner = self.inner.lock().unwrap();
        for state in inner.states.values_mut() {
            *state = RemoteState::Running {
                node: Some(node.to_string()),
            };
        }
    }

    pub fn fail_submissions(&self, fail: bool) {
        self.inner.lock().unwrap().fail_submit = fail;
    }

    pub fn fail_controls(&self, fail: bool) {
        self.inner.lock().unwrap().fail_control = fail;
    }

    pub fn staged(&self) -> Vec<StagedScript> {
        self.inner.lock().unwrap().staged.clone()
    }

    /// Latest script staged under `name`.
    pub fn staged_script(&self, name: &str) -> Option<StagedScript> {
        self.inner
            .lock()
            .unwrap()
            .staged
            .iter()
            .rev()
            .find(|s| s.name == name)
            .cloned()
    }

    pub fn submissions(&self) -> Vec<JobRequest> {
        self.inner.lock().unwrap().submissions.clone()
    }

    pub fn controls(&self) -> Vec<(String, JobControl)> {
        self.inner.lock().unwrap().controls.clone()
    }
}

impl RemoteExecutor for FakeRemote {
    fn probe(&self) -> BoxFuture<'_, Result<ResourceCapabilities>> {
        let caps = self.capabilities.clone();
        Box::pin(async move { Ok(caps) })
    }

    fn stage_script(
        &self,
        area: WorkArea,
        script_name: String,
        commands: Vec<String>,
    ) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.inner.lock().unwrap().staged.push(StagedScript {
                area: area.path,
                name: script_name,
                commands,
            });
            Ok(())
        })
    }

    fn submit(&self, request: JobRequest) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            if inner.fail_submit {
                return Err(EngineError::Remote("submission rejected".to_string()));
            }
            inner.next_job += 1;
            let job_id = format!("fake-{}", inner.next_job);
            inner.states.insert(job_id.clone(), RemoteState::Queued);
            inner.submissions.push(request);
            Ok(job_id)
        })
    }

    fn status(&self, job_id: String) -> BoxFuture<'_, Result<RemoteState>> {
        Box::pin(async move {
            Ok(self
                .inner
                .lock()
                .unwrap()
                .states
                .get(&job_id)
                .cloned()
                .unwrap_or(RemoteState::Unknown))
        })
    }

    fn control(&self, job_id: String, action: JobControl) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            inner.controls.push((job_id.clone(), action));
            if inner.fail_control {
                return Err(EngineError::Remote(format!("cannot {action} {job_id}")));
            }
            if action == JobControl::Terminate {
                inner
                    .states
                    .insert(job_id, RemoteState::Finished { success: false });
            }
            Ok(())
        })
    }
}

/// A [`DataSync`] that only records what it was asked to move.
#[derive(Debug, Default)]
pub struct RecordingSync {
    moves: Mutex<Vec<(String, String)>>,
    fail_items: Mutex<Vec<String>>,
}

impl RecordingSync {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make any later request for `item` fail.
    pub fn fail_on(&self, item: &str) {
        self.fail_items.lock().unwrap().push(item.to_string());
    }

    /// `(direction, item)` pairs, direction being `"in"` or `"out"`.
    pub fn moves(&self) -> Vec<(String, String)> {
        self.moves.lock().unwrap().clone()
    }

    fn record(&self, direction: &str, item: &str) -> Result<()> {
        if self.fail_items.lock().unwrap().iter().any(|i| i == item) {
            return Err(EngineError::Sync(format!("cannot move '{item}'")));
        }
        self.moves
            .lock()
            .unwrap()
            .push((direction.to_string(), item.to_string()));
        Ok(())
    }
}

impl DataSync for RecordingSync {
    fn sync_in(&self, item: &str) -> Result<()> {
        self.record("in", item)
    }

    fn sync_out(&self, item: &str) -> Result<()> {
        self.record("out", item)
    }
}
