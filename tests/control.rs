// tests/control.rs

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use taskgate::control::TaskControl;
use taskgate::exec::{JobControl, MonitorRegistry, RemoteExecutor};
use taskgate::status::Status;
use taskgate::task::{RemoteJob, Task, TaskId};
use taskgate::worker::{Worker, WorkerOptions};
use taskgate_test_utils::builders::{id, StoreFixture, TaskBuilder, RESOURCE};
use taskgate_test_utils::fake_remote::{FakeRemote, RecordingSync};
use taskgate_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

fn submitted(fx: &StoreFixture, status: Status, job: &str) -> Task {
    let mut draft = TaskBuilder::new("align").status(status).build();
    draft.job = Some(RemoteJob {
        id: job.to_string(),
        node: None,
    });
    fx.engine.create(draft).expect("task is created")
}

async fn control_for(fx: &StoreFixture, remote: &Arc<FakeRemote>) -> Result<TaskControl, Box<dyn Error>> {
    let capabilities = remote.probe().await?;
    Ok(TaskControl::new(
        Arc::clone(&fx.engine),
        remote.clone(),
        Arc::new(MonitorRegistry::new()),
        capabilities,
    ))
}

#[tokio::test]
async fn terminate_cancels_the_remote_job() -> TestResult {
    init_tracing();
    let fx = StoreFixture::new();
    let remote = Arc::new(FakeRemote::new());
    let task = submitted(&fx, Status::Queued, "fake-9");
    let control = control_for(&fx, &remote).await?;

    assert!(control.terminate(id(&task)).await?);
    assert_eq!(fx.status_of(id(&task)), Status::Terminated);
    assert_eq!(remote.controls(), vec![("fake-9".to_string(), JobControl::Terminate)]);
    assert!(fx
        .log_of(id(&task))
        .contains(&"Terminated by request (was 'Queued').".to_string()));

    assert!(!control.terminate(id(&task)).await?);
    assert_eq!(remote.controls().len(), 1);
    Ok(())
}

#[tokio::test]
async fn terminating_an_idle_task_leaves_the_resource_alone() -> TestResult {
    let fx = StoreFixture::new();
    let remote = Arc::new(FakeRemote::new());
    let task = fx.insert(TaskBuilder::new("align").status(Status::New));
    let control = control_for(&fx, &remote).await?;

    assert!(control.terminate(id(&task)).await?);
    assert_eq!(fx.status_of(id(&task)), Status::Terminated);
    assert!(remote.controls().is_empty());
    Ok(())
}

#[tokio::test]
async fn terminate_stops_the_job_monitor() -> TestResult {
    init_tracing();
    let fx = StoreFixture::new();
    let task = fx.insert(TaskBuilder::new("align").status(Status::New).commands(&["sleep 60"]));
    let remote = Arc::new(FakeRemote::new());
    let options = WorkerOptions {
        monitor_interval: Duration::from_millis(5),
        work_root: PathBuf::from("/work"),
        ..WorkerOptions::default()
    };
    let worker = Worker::start(
        RESOURCE,
        Arc::clone(&fx.engine),
        remote.clone(),
        Arc::new(RecordingSync::new()),
        options,
    )
    .await?;
    let task_id: TaskId = id(&task);

    worker.scan().await?;
    worker.scan().await?;
    remote.run_all_on("n01");
    worker.scan().await?;
    assert_eq!(fx.status_of(task_id), Status::OnCpu);
    assert!(worker.monitors().is_active(task_id));

    assert!(worker.control().terminate(task_id).await?);
    assert!(!worker.monitors().is_active(task_id));
    assert_eq!(remote.controls(), vec![("fake-1".to_string(), JobControl::Terminate)]);

    // A late poll cannot resurrect the task.
    with_timeout(tokio::time::sleep(Duration::from_millis(30))).await;
    worker.scan().await?;
    assert_eq!(fx.status_of(task_id), Status::Terminated);
    Ok(())
}

#[tokio::test]
async fn hold_is_refused_without_resource_support() -> TestResult {
    let fx = StoreFixture::new();
    let remote = Arc::new(FakeRemote::new());
    let task = submitted(&fx, Status::Queued, "fake-1");
    let control = control_for(&fx, &remote).await?;

    assert!(!control.hold(id(&task)).await?);
    assert!(!control.suspend(id(&task)).await?);
    assert_eq!(fx.status_of(id(&task)), Status::Queued);
    assert_eq!(
        fx.log_of(id(&task)),
        vec![
            "This resource cannot hold jobs.".to_string(),
            "This resource cannot suspend jobs.".to_string(),
        ]
    );
    assert!(remote.controls().is_empty());
    Ok(())
}

#[tokio::test]
async fn hold_and_release_round_trip() -> TestResult {
    let fx = StoreFixture::new();
    let remote = Arc::new(FakeRemote::with_job_control());
    let task = submitted(&fx, Status::Queued, "fake-1");
    let control = control_for(&fx, &remote).await?;

    assert!(control.hold(id(&task)).await?);
    assert_eq!(fx.status_of(id(&task)), Status::OnHold);
    assert!(control.release(id(&task)).await?);
    assert_eq!(fx.status_of(id(&task)), Status::Queued);
    assert_eq!(
        remote.controls(),
        vec![
            ("fake-1".to_string(), JobControl::Hold),
            ("fake-1".to_string(), JobControl::Release),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn suspend_requires_a_running_job() -> TestResult {
    let fx = StoreFixture::new();
    let remote = Arc::new(FakeRemote::with_job_control());
    let queued = submitted(&fx, Status::Queued, "fake-1");
    let running = submitted(&fx, Status::OnCpu, "fake-2");
    let control = control_for(&fx, &remote).await?;

    assert!(!control.suspend(id(&queued)).await?);
    assert!(control.suspend(id(&running)).await?);
    assert_eq!(fx.status_of(id(&running)), Status::Suspended);
    assert!(control.resume(id(&running)).await?);
    assert_eq!(fx.status_of(id(&running)), Status::OnCpu);
    Ok(())
}

#[tokio::test]
async fn refused_job_control_is_rolled_back() -> TestResult {
    let fx = StoreFixture::new();
    let remote = Arc::new(FakeRemote::with_job_control());
    remote.fail_controls(true);
    let task = submitted(&fx, Status::Queued, "fake-1");
    let control = control_for(&fx, &remote).await?;

    assert!(!control.hold(id(&task)).await?);
    assert_eq!(fx.status_of(id(&task)), Status::Queued);
    assert!(fx
        .log_of(id(&task))
        .iter()
        .any(|l| l.starts_with("Could not hold remote job fake-1:")));
    Ok(())
}

#[tokio::test]
async fn job_control_without_a_job_is_refused() -> TestResult {
    let fx = StoreFixture::new();
    let remote = Arc::new(FakeRemote::with_job_control());
    let task = fx.insert(TaskBuilder::new("align").status(Status::Queued));
    let control = control_for(&fx, &remote).await?;

    assert!(!control.hold(id(&task)).await?);
    assert_eq!(
        fx.log_of(id(&task)),
        vec!["There is no remote job to hold.".to_string()]
    );
    Ok(())
}
