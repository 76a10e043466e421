// tests/worker_serial.rs

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use taskgate::batch::{BatchFactory, BatchOptions};
use taskgate::recovery::RecoveryController;
use taskgate::status::{Phase, Status};
use taskgate::task::TaskId;
use taskgate::types::CoordinatorKind;
use taskgate::worker::{Step, Worker, WorkerOptions};
use taskgate_test_utils::builders::{id, StoreFixture, TaskBuilder, RESOURCE};
use taskgate_test_utils::fake_remote::{FakeRemote, RecordingSync};
use taskgate_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

fn options() -> WorkerOptions {
    WorkerOptions {
        poll_interval: Duration::from_millis(5),
        monitor_interval: Duration::from_millis(5),
        work_root: PathBuf::from("/work"),
        ..WorkerOptions::default()
    }
}

async fn start(fx: &StoreFixture, remote: &Arc<FakeRemote>, sync: &Arc<RecordingSync>) -> Result<Worker, Box<dyn Error>> {
    let worker = Worker::start(
        RESOURCE,
        Arc::clone(&fx.engine),
        remote.clone(),
        sync.clone(),
        options(),
    )
    .await?;
    Ok(worker)
}

/// Scan until every listed task reaches `status`.
async fn scan_until(fx: &StoreFixture, worker: &Worker, ids: &[TaskId], status: Status) -> TestResult {
    for _ in 0..100 {
        if ids.iter().all(|&id| fx.status_of(id) == status) {
            return Ok(());
        }
        worker.scan().await?;
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    let seen: Vec<Status> = ids.iter().map(|&id| fx.status_of(id)).collect();
    Err(format!("tasks never reached '{status}': {seen:?}").into())
}

#[tokio::test]
async fn serial_group_runs_in_a_single_remote_job() -> TestResult {
    init_tracing();
    let fx = StoreFixture::new();
    let members = fx.standby_programs("align", 2);
    let outcome = BatchFactory::new(&fx.engine, CoordinatorKind::Serial)
        .create_from_task_list(&members, &BatchOptions::default())?;
    let coordinator = id(&outcome.coordinators[0]);
    let remote = Arc::new(FakeRemote::new());
    let sync = Arc::new(RecordingSync::new());
    let worker = start(&fx, &remote, &sync).await?;

    let report = worker.scan().await?;
    assert_eq!(report.advanced, 3);
    assert_eq!(fx.status_of(coordinator), Status::Configured);

    worker.scan().await?;
    assert_eq!(fx.status_of(coordinator), Status::Queued);
    for member in &members {
        assert_eq!(fx.status_of(id(member)), Status::Configured);
    }

    let submissions = remote.submissions();
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].task_id, coordinator);
    // Sum of two default member estimates.
    assert_eq!(submissions[0].walltime, Some(Duration::from_secs(120)));

    let script = remote
        .staged_script(&submissions[0].script_name)
        .ok_or("coordinator script was not staged")?;
    let member_script = format!("/bin/bash taskgate.{}.1.sh", id(&members[0]));
    assert!(script.commands.iter().any(|l| l.contains(&member_script)));
    assert!(script
        .commands
        .iter()
        .any(|l| l.contains(&format!("cd '/work/{}-1'", id(&members[1])))));

    remote.finish_all(true);
    let all: Vec<TaskId> = members.iter().map(id).chain([coordinator]).collect();
    with_timeout(scan_until(&fx, &worker, &all, Status::Completed)).await?;

    assert_eq!(remote.submissions().len(), 1);
    let log = fx.log_of(coordinator);
    assert!(log.contains(&format!(
        "Member {} ran on an unknown node.",
        fx.read(id(&members[0])).fullname()
    )));
    for member in &members {
        let member = fx.read(id(member));
        assert!(!member.configure_only);
        assert!(member.job.is_none());
    }
    Ok(())
}

#[tokio::test]
async fn members_wait_for_the_coordinator_before_post_processing() -> TestResult {
    let fx = StoreFixture::new();
    let members = fx.standby_programs("align", 2);
    let outcome = BatchFactory::new(&fx.engine, CoordinatorKind::Serial)
        .create_from_task_list(&members, &BatchOptions::default())?;
    let coordinator = id(&outcome.coordinators[0]);
    let remote = Arc::new(FakeRemote::new());
    let sync = Arc::new(RecordingSync::new());
    let worker = start(&fx, &remote, &sync).await?;

    worker.scan().await?;
    worker.scan().await?;
    for _ in 0..3 {
        worker.scan().await?;
    }
    assert_eq!(fx.status_of(coordinator), Status::Queued);
    for member in &members {
        let member = fx.read(id(member));
        assert_eq!(member.status, Status::Configured);
        assert!(matches!(worker.step(&member).await?, Step::Deferred));
    }
    Ok(())
}

#[tokio::test]
async fn running_node_is_reported_back_to_members() -> TestResult {
    init_tracing();
    let fx = StoreFixture::new();
    let members = fx.standby_programs("align", 2);
    let outcome = BatchFactory::new(&fx.engine, CoordinatorKind::Serial)
        .create_from_task_list(&members, &BatchOptions::default())?;
    let coordinator = id(&outcome.coordinators[0]);
    let remote = Arc::new(FakeRemote::new());
    let sync = Arc::new(RecordingSync::new());
    let worker = start(&fx, &remote, &sync).await?;

    worker.scan().await?;
    worker.scan().await?;
    remote.run_all_on("n07");
    with_timeout(scan_until(&fx, &worker, &[coordinator], Status::OnCpu)).await?;
    assert_eq!(
        fx.read(coordinator).job.and_then(|j| j.node).as_deref(),
        Some("n07")
    );

    remote.finish_all(true);
    let all: Vec<TaskId> = members.iter().map(id).chain([coordinator]).collect();
    with_timeout(scan_until(&fx, &worker, &all, Status::Completed)).await?;

    let member = fx.read(id(&members[1]));
    assert!(fx
        .log_of(coordinator)
        .contains(&format!("Member {} ran on n07.", member.fullname())));
    assert!(fx
        .log_of(id(&member))
        .iter()
        .any(|l| l.ends_with("marking me as \"Data Ready\".")));
    Ok(())
}

#[tokio::test]
async fn restarted_group_is_submitted_once_per_run() -> TestResult {
    init_tracing();
    let fx = StoreFixture::new();
    let members: Vec<_> = (0..2)
        .map(|_| fx.insert(TaskBuilder::new("align").commands(&["true"]).restartable(&[Phase::Setup])))
        .collect();
    let outcome = BatchFactory::new(&fx.engine, CoordinatorKind::Serial)
        .create_from_task_list(&members, &BatchOptions::default())?;
    let coordinator = id(&outcome.coordinators[0]);
    let remote = Arc::new(FakeRemote::new());
    let sync = Arc::new(RecordingSync::new());
    let worker = start(&fx, &remote, &sync).await?;
    let all: Vec<TaskId> = members.iter().map(id).chain([coordinator]).collect();

    worker.scan().await?;
    worker.scan().await?;
    remote.finish_all(true);
    with_timeout(scan_until(&fx, &worker, &all, Status::Completed)).await?;

    assert!(RecoveryController::new(&fx.engine).restart(coordinator, Phase::Setup)?);
    assert!(all.iter().all(|&t| fx.status_of(t) == Status::New));

    with_timeout(scan_until(&fx, &worker, &[coordinator], Status::Queued)).await?;
    remote.finish_all(true);
    with_timeout(scan_until(&fx, &worker, &all, Status::Completed)).await?;

    let submissions = remote.submissions();
    assert_eq!(submissions.len(), 2);
    assert_eq!(submissions[1].script_name, format!("taskgate.{coordinator}.2.sh"));
    assert!(submissions[1].work_area.path.ends_with(format!("{coordinator}-2")));
    Ok(())
}

#[tokio::test]
async fn standalone_task_synchronizes_inputs_and_outputs() -> TestResult {
    let fx = StoreFixture::new();
    let task = fx.insert(
        TaskBuilder::new("align")
            .status(Status::New)
            .commands(&["align raw.dat"])
            .inputs(&["raw.dat"])
            .outputs(&["aligned.dat"])
            .walltime_secs(30),
    );
    let remote = Arc::new(FakeRemote::new());
    let sync = Arc::new(RecordingSync::new());
    let worker = start(&fx, &remote, &sync).await?;

    with_timeout(scan_until(&fx, &worker, &[id(&task)], Status::Queued)).await?;
    assert_eq!(remote.submissions()[0].walltime, Some(Duration::from_secs(30)));
    remote.finish_all(true);
    with_timeout(scan_until(&fx, &worker, &[id(&task)], Status::Completed)).await?;

    assert_eq!(
        sync.moves(),
        vec![
            ("in".to_string(), "raw.dat".to_string()),
            ("out".to_string(), "aligned.dat".to_string())
        ]
    );
    Ok(())
}

#[tokio::test]
async fn setup_errors_fail_the_task() -> TestResult {
    let fx = StoreFixture::new();
    let task = fx.insert(TaskBuilder::new("align").status(Status::New).inputs(&["missing.dat"]));
    let remote = Arc::new(FakeRemote::new());
    let sync = Arc::new(RecordingSync::new());
    sync.fail_on("missing.dat");
    let worker = start(&fx, &remote, &sync).await?;

    worker.scan().await?;
    assert_eq!(fx.status_of(id(&task)), Status::FailedToSetup);
    let log = fx.log_of(id(&task));
    assert!(log.iter().any(|l| l.starts_with("Setup raised an error:")));
    assert_eq!(log.last().map(String::as_str), Some("Setup failed."));
    assert!(remote.staged().is_empty());
    Ok(())
}

#[tokio::test]
async fn rejected_submission_fails_on_cluster() -> TestResult {
    let fx = StoreFixture::new();
    let task = fx.insert(TaskBuilder::new("align").status(Status::Configured).commands(&["true"]));
    let remote = Arc::new(FakeRemote::new());
    remote.fail_submissions(true);
    let sync = Arc::new(RecordingSync::new());
    let worker = start(&fx, &remote, &sync).await?;

    worker.scan().await?;
    assert_eq!(fx.status_of(id(&task)), Status::FailedOnCluster);
    assert!(fx
        .log_of(id(&task))
        .iter()
        .any(|l| l.starts_with("Submission failed:")));
    Ok(())
}

#[tokio::test]
async fn failed_remote_job_fails_on_cluster() -> TestResult {
    let fx = StoreFixture::new();
    let task = fx.insert(TaskBuilder::new("align").status(Status::Configured).commands(&["false"]));
    let remote = Arc::new(FakeRemote::new());
    let sync = Arc::new(RecordingSync::new());
    let worker = start(&fx, &remote, &sync).await?;

    worker.scan().await?;
    remote.finish_all(false);
    worker.scan().await?;
    assert_eq!(fx.status_of(id(&task)), Status::FailedOnCluster);
    assert!(fx
        .log_of(id(&task))
        .contains(&"Remote job fake-1 ended with an error.".to_string()));
    Ok(())
}

#[tokio::test]
async fn worker_run_stops_on_shutdown() -> TestResult {
    let fx = StoreFixture::new();
    let task = fx.insert(TaskBuilder::new("align").status(Status::New).commands(&["true"]));
    let remote = Arc::new(FakeRemote::new());
    let sync = Arc::new(RecordingSync::new());
    let worker = Arc::new(start(&fx, &remote, &sync).await?);

    let (tx, rx) = tokio::sync::watch::channel(false);
    let running = Arc::clone(&worker);
    let handle = tokio::spawn(async move { running.run(rx).await });

    with_timeout(async {
        while fx.status_of(id(&task)) != Status::Queued {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    tx.send(true)?;
    with_timeout(handle).await??;
    assert_eq!(worker.monitors().active_count(), 0);
    Ok(())
}

#[tokio::test]
async fn queued_task_without_a_job_is_left_to_its_submitter() -> TestResult {
    init_tracing();
    let fx = StoreFixture::new();
    let task = fx.insert(TaskBuilder::new("align").status(Status::Configured).commands(&["true"]));
    let remote = Arc::new(FakeRemote::new());
    let sync = Arc::new(RecordingSync::new());

    // Another worker has claimed the task and is still waiting on the
    // resource to hand back a job id.
    fx.engine.try_enter_phase(id(&task), Phase::Cluster)?;
    assert_eq!(fx.status_of(id(&task)), Status::Queued);

    let neighbour = start(&fx, &remote, &sync).await?;
    let report = neighbour.scan().await?;
    assert_eq!(report.advanced, 0);
    assert_eq!(fx.status_of(id(&task)), Status::Queued);
    assert!(!fx
        .log_of(id(&task))
        .contains(&"No remote job is recorded for this task.".to_string()));
    assert!(remote.submissions().is_empty());

    // Past the grace period the claim counts as abandoned.
    let impatient = Worker::start(
        RESOURCE,
        Arc::clone(&fx.engine),
        remote.clone(),
        sync.clone(),
        WorkerOptions {
            submission_grace: Duration::ZERO,
            ..options()
        },
    )
    .await?;
    impatient.scan().await?;
    assert_eq!(fx.status_of(id(&task)), Status::FailedOnCluster);
    assert!(fx
        .log_of(id(&task))
        .contains(&"No remote job is recorded for this task.".to_string()));
    Ok(())
}

#[tokio::test]
async fn two_workers_share_one_resource() -> TestResult {
    init_tracing();
    let fx = StoreFixture::new();
    let tasks: Vec<TaskId> = (0..3)
        .map(|_| id(&fx.insert(TaskBuilder::new("align").status(Status::New).commands(&["true"]))))
        .collect();
    let remote = Arc::new(FakeRemote::new());
    let sync = Arc::new(RecordingSync::new());
    let first = start(&fx, &remote, &sync).await?;
    let second = start(&fx, &remote, &sync).await?;

    let mut finished = false;
    for _ in 0..100 {
        if tasks.iter().all(|&t| fx.status_of(t) == Status::Completed) {
            break;
        }
        if !finished && tasks.iter().all(|&t| fx.status_of(t) == Status::Queued) {
            remote.finish_all(true);
            finished = true;
        }
        let (a, b) = tokio::join!(first.scan(), second.scan());
        a?;
        b?;
    }

    for &task in &tasks {
        assert_eq!(fx.status_of(task), Status::Completed);
    }
    let mut submitted: Vec<TaskId> = remote.submissions().iter().map(|s| s.task_id).collect();
    submitted.sort_unstable();
    assert_eq!(submitted, tasks);
    assert!(remote.controls().is_empty());
    Ok(())
}
