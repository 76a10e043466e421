// tests/worker_parallel.rs

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use taskgate::batch::{BatchFactory, BatchOptions};
use taskgate::status::{Phase, Status};
use taskgate::task::{Task, TaskId};
use taskgate::types::CoordinatorKind;
use taskgate::worker::{Worker, WorkerOptions};
use taskgate_test_utils::builders::{id, StoreFixture, TaskBuilder, RESOURCE};
use taskgate_test_utils::fake_remote::{FakeRemote, RecordingSync};
use taskgate_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

struct Rig {
    fx: StoreFixture,
    remote: Arc<FakeRemote>,
    sync: Arc<RecordingSync>,
    members: Vec<Task>,
    coordinator: TaskId,
}

impl Rig {
    fn new(members: impl FnOnce(&StoreFixture) -> Vec<Task>) -> Result<Self, Box<dyn Error>> {
        let fx = StoreFixture::new();
        let members = members(&fx);
        let outcome = BatchFactory::new(&fx.engine, CoordinatorKind::Parallel).create_from_task_list(
            &members,
            &BatchOptions::default().with_group_size(members.len()),
        )?;
        let coordinator = id(&outcome.coordinators[0]);
        Ok(Self {
            fx,
            remote: Arc::new(FakeRemote::new()),
            sync: Arc::new(RecordingSync::new()),
            members,
            coordinator,
        })
    }

    async fn worker(&self) -> Result<Worker, Box<dyn Error>> {
        let options = WorkerOptions {
            monitor_interval: Duration::from_millis(5),
            work_root: PathBuf::from("/work"),
            ..WorkerOptions::default()
        };
        Ok(Worker::start(
            RESOURCE,
            Arc::clone(&self.fx.engine),
            self.remote.clone(),
            self.sync.clone(),
            options,
        )
        .await?)
    }

    fn member_ids(&self) -> Vec<TaskId> {
        self.members.iter().map(id).collect()
    }

    fn status_of(&self, id: TaskId) -> Status {
        self.fx.status_of(id)
    }
}

#[tokio::test]
async fn parallel_group_fans_out_into_independent_jobs() -> TestResult {
    init_tracing();
    let rig = Rig::new(|fx| fx.standby_programs("align", 3))?;
    let worker = rig.worker().await?;

    worker.scan().await?;
    assert_eq!(rig.status_of(rig.coordinator), Status::Configured);
    for member in rig.member_ids() {
        let member = rig.fx.read(member);
        assert_eq!(member.status, Status::Configured);
        assert!(!member.configure_only, "setup should release the members");
    }
    let coord = rig.fx.read(rig.coordinator);
    let post = coord.prerequisites.for_phase(Phase::PostProcessing).unwrap();
    assert_eq!(post.len(), 3);
    assert!(post.values().all(|p| p.as_str() == "Data Ready|Post Processing|Completed"));

    worker.scan().await?;
    assert_eq!(rig.remote.submissions().len(), 3);
    assert_eq!(rig.status_of(rig.coordinator), Status::DataReady);
    assert!(rig
        .remote
        .submissions()
        .iter()
        .all(|s| s.task_id != rig.coordinator));

    // The coordinator cannot finish while its members are still out.
    worker.scan().await?;
    assert_eq!(rig.status_of(rig.coordinator), Status::DataReady);

    rig.remote.finish_all(true);
    worker.scan().await?;
    for member in rig.member_ids() {
        assert_eq!(rig.status_of(member), Status::DataReady);
    }
    assert_eq!(rig.status_of(rig.coordinator), Status::Completed);
    assert!(rig
        .fx
        .log_of(rig.coordinator)
        .contains(&"All 3 members finished their remote work: 3 Data Ready.".to_string()));

    worker.scan().await?;
    for member in rig.member_ids() {
        assert_eq!(rig.status_of(member), Status::Completed);
    }
    Ok(())
}

#[tokio::test]
async fn coordinator_walltime_is_the_longest_member_plus_a_margin() -> TestResult {
    let rig = Rig::new(|fx| {
        vec![
            fx.insert(TaskBuilder::new("align").commands(&["true"]).walltime_secs(100)),
            fx.insert(TaskBuilder::new("align").commands(&["true"]).walltime_secs(300)),
        ]
    })?;
    let coordinator = rig.fx.read(rig.coordinator);

    let walltime = coordinator.handler().walltime(&coordinator, &rig.fx.engine)?;
    assert_eq!(walltime, Some(Duration::from_secs(330)));
    Ok(())
}

#[tokio::test]
async fn failed_member_setup_cascades_through_the_coordinator() -> TestResult {
    init_tracing();
    let rig = Rig::new(|fx| {
        vec![
            fx.insert(TaskBuilder::new("align").commands(&["true"]).inputs(&["broken.dat"])),
            fx.insert(TaskBuilder::new("align").commands(&["true"])),
        ]
    })?;
    rig.sync.fail_on("broken.dat");
    let worker = rig.worker().await?;
    let ids = rig.member_ids();

    worker.scan().await?;

    assert_eq!(rig.status_of(ids[0]), Status::FailedToSetup);
    assert_eq!(rig.status_of(rig.coordinator), Status::FailedSetupPrerequisites);
    assert_eq!(rig.status_of(ids[1]), Status::FailedSetupPrerequisites);
    assert!(rig
        .fx
        .log_of(ids[1])
        .iter()
        .any(|l| l.ends_with("failed its setup prerequisites; failing as well.")));
    assert!(rig
        .fx
        .log_of(rig.coordinator)
        .contains(&"Prerequisites for 'Setup' can never be met.".to_string()));

    // Nothing was left to submit.
    with_timeout(async {
        for _ in 0..3 {
            worker.scan().await.ok();
        }
    })
    .await;
    assert!(rig.remote.submissions().is_empty());
    Ok(())
}

#[tokio::test]
async fn serial_coordinators_release_waiting_members_when_they_fail() -> TestResult {
    let fx = StoreFixture::new();
    let members = vec![
        fx.insert(TaskBuilder::new("align").commands(&["true"]).inputs(&["broken.dat"])),
        fx.insert(TaskBuilder::new("align").commands(&["true"])),
    ];
    let outcome = BatchFactory::new(&fx.engine, CoordinatorKind::Serial)
        .create_from_task_list(&members, &BatchOptions::default())?;
    let coordinator = id(&outcome.coordinators[0]);
    let remote = Arc::new(FakeRemote::new());
    let sync = Arc::new(RecordingSync::new());
    sync.fail_on("broken.dat");
    let worker = Worker::start(
        RESOURCE,
        Arc::clone(&fx.engine),
        remote.clone(),
        sync,
        WorkerOptions::default(),
    )
    .await?;

    for _ in 0..3 {
        worker.scan().await?;
    }
    assert_eq!(fx.status_of(id(&members[0])), Status::FailedToSetup);
    assert_eq!(fx.status_of(coordinator), Status::FailedSetupPrerequisites);

    let waiting = fx.read(id(&members[1]));
    assert_eq!(waiting.status, Status::FailedSetupPrerequisites);
    assert!(!waiting.configure_only);
    assert!(waiting
        .log
        .iter()
        .any(|l| l.message.ends_with("failed its setup prerequisites; failing as well.")));

    // Everything has settled, so a driver waiting on the batch can stop.
    for task in [id(&members[0]), id(&members[1]), coordinator] {
        assert!(fx.status_of(task).is_settled());
    }
    assert!(remote.submissions().is_empty());
    Ok(())
}
