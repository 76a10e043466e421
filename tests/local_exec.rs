// tests/local_exec.rs

use std::error::Error;
use std::fs;
use std::time::Duration;

use taskgate::exec::{
    DataSync, JobControl, JobRequest, LocalExecutor, LocalSync, RemoteExecutor, RemoteState,
    ResourceCapabilities, WorkArea,
};
use taskgate::task::Task;
use taskgate_test_utils::builders::TaskBuilder;
use taskgate_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

fn saved_task(id: u64) -> Task {
    let mut task = TaskBuilder::new("align").build();
    task.id = Some(id);
    task
}

async fn wait_finished(exec: &LocalExecutor, job: &str) -> RemoteState {
    loop {
        let state = exec.status(job.to_string()).await.expect("status");
        if matches!(state, RemoteState::Finished { .. }) {
            return state;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn stage_and_submit(
    exec: &LocalExecutor,
    root: &std::path::Path,
    task: &Task,
    commands: &[&str],
    walltime: Option<Duration>,
) -> Result<(WorkArea, String), Box<dyn Error>> {
    let area = WorkArea::for_task(root, task)?;
    exec.stage_script(
        area.clone(),
        WorkArea::script_name(task),
        commands.iter().map(|c| c.to_string()).collect(),
    )
    .await?;
    let request = JobRequest::for_task(task, area.clone(), walltime)?;
    let job = exec.submit(request).await?;
    Ok((area, job))
}

#[tokio::test]
async fn local_job_runs_in_its_work_area() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let exec = LocalExecutor::default();
    let task = saved_task(7);

    let (area, job) = stage_and_submit(&exec, dir.path(), &task, &["echo hello from $PWD"], None).await?;
    assert!(area.path.ends_with("7-1"));
    assert_eq!(
        exec.status(job.clone()).await?,
        RemoteState::Running {
            node: Some("localhost".to_string())
        }
    );

    let state = with_timeout(wait_finished(&exec, &job)).await;
    assert_eq!(state, RemoteState::Finished { success: true });
    let out = fs::read_to_string(area.path.join("taskgate.7.1.out"))?;
    assert!(out.starts_with("hello from"));
    assert!(area.path.join("taskgate.7.1.err").exists());
    Ok(())
}

#[tokio::test]
async fn failing_script_is_reported() -> TestResult {
    let dir = tempfile::tempdir()?;
    let exec = LocalExecutor::default();
    let (_, job) = stage_and_submit(&exec, dir.path(), &saved_task(1), &["exit 3"], None).await?;
    let state = with_timeout(wait_finished(&exec, &job)).await;
    assert_eq!(state, RemoteState::Finished { success: false });
    Ok(())
}

#[tokio::test]
async fn terminate_kills_the_job() -> TestResult {
    let dir = tempfile::tempdir()?;
    let exec = LocalExecutor::default();
    let (_, job) = stage_and_submit(&exec, dir.path(), &saved_task(1), &["sleep 30"], None).await?;

    exec.control(job.clone(), JobControl::Terminate).await?;
    let state = with_timeout(wait_finished(&exec, &job)).await;
    assert_eq!(state, RemoteState::Finished { success: false });
    Ok(())
}

#[tokio::test]
async fn walltime_limit_kills_the_job() -> TestResult {
    let dir = tempfile::tempdir()?;
    let exec = LocalExecutor::default();
    let (_, job) = stage_and_submit(
        &exec,
        dir.path(),
        &saved_task(1),
        &["sleep 30"],
        Some(Duration::from_millis(50)),
    )
    .await?;
    let state = with_timeout(wait_finished(&exec, &job)).await;
    assert_eq!(state, RemoteState::Finished { success: false });
    Ok(())
}

#[tokio::test]
async fn local_resource_only_supports_terminate() -> TestResult {
    let exec = LocalExecutor::new(ResourceCapabilities::default());
    let caps = exec.probe().await?;
    assert!(!caps.supports_hold);
    assert!(!caps.supports_suspend);
    assert!(exec.control("local-1".into(), JobControl::Hold).await.is_err());
    assert_eq!(exec.status("local-99".into()).await?, RemoteState::Unknown);
    Ok(())
}

#[test]
fn local_sync_copies_files_and_trees_both_ways() -> TestResult {
    let data = tempfile::tempdir()?;
    let cache = tempfile::tempdir()?;
    fs::write(data.path().join("raw.dat"), "raw")?;
    fs::create_dir_all(data.path().join("frames/a"))?;
    fs::write(data.path().join("frames/a/f1"), "frame")?;
    let sync = LocalSync::new(data.path(), cache.path());

    sync.sync_in("raw.dat")?;
    sync.sync_in("frames")?;
    assert_eq!(fs::read_to_string(cache.path().join("raw.dat"))?, "raw");
    assert_eq!(fs::read_to_string(cache.path().join("frames/a/f1"))?, "frame");

    fs::write(cache.path().join("result.dat"), "result")?;
    sync.sync_out("result.dat")?;
    assert_eq!(fs::read_to_string(data.path().join("result.dat"))?, "result");
    Ok(())
}

#[test]
fn local_sync_rejects_escaping_and_missing_items() {
    let data = tempfile::tempdir().unwrap();
    let cache = tempfile::tempdir().unwrap();
    let sync = LocalSync::new(data.path(), cache.path());

    assert!(sync.sync_in("../etc/passwd").is_err());
    assert!(sync.sync_in("/etc/passwd").is_err());
    assert!(sync.sync_in("").is_err());
    assert!(sync.sync_in("nothing-here.dat").is_err());
}
