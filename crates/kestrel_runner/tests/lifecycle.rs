use kestrel_mock::*;
use kestrel_runner::prelude::*;
use rstest::rstest;
use std::io::{Cursor, Write};
use std::time::Duration;
use tempfile::TempDir;

const ACCOUNT: &str = "123456789012";
const JOBS: &str = "ai-executor-results-123456789012";
const LOGS: &str = "ai-executor-logs-123456789012";
const NAME: &str = "ai-executor-42";

type MockServices = CoreServices<
    StaticMetadata,
    MemoryStore,
    ScriptedRuntime,
    AnonymousRegistry,
    RecordingNotifier,
    RecordingHost,
>;

struct Harness {
    dir: TempDir,
    services: MockServices,
    config: RunnerConfig,
}

impl Harness {
    fn new(metadata: StaticMetadata, store: MemoryStore, runtime: ScriptedRuntime) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = RunnerConfig {
            log_path: dir.path().join("log/kestrel.log"),
            workdir: dir.path().join("workspace"),
            log_interval: Duration::from_millis(20),
            flush_grace: Duration::from_secs(5),
            identity_backoff: Duration::from_millis(1),
            notify_timeout: Duration::from_secs(2),
            ..Default::default()
        };

        Self {
            dir,
            services: CoreServices {
                metadata,
                store,
                runtime,
                registry: AnonymousRegistry,
                notifier: RecordingNotifier::new(),
                host: RecordingHost::new(),
            },
            config,
        }
    }

    async fn run(&self) -> LifecycleReport {
        let log = ExecutionLog::open(&self.config.log_path).await.unwrap();
        Lifecycle::new(self.services.clone(), self.config.clone(), log)
            .run()
            .await
    }

    fn notifier(&self) -> &RecordingNotifier {
        &self.services.notifier
    }
}

fn metadata() -> StaticMetadata {
    StaticMetadata::new("i-0abc", "us-east-1", ACCOUNT)
        .with_tag(tags::INSTANCE_NAME, NAME)
        .with_tag(tags::IMAGE_TAG, "runtime-7c1d")
}

fn inline_metadata() -> StaticMetadata {
    metadata()
        .with_tag(tags::TASK_PROMPT, "find the cheapest flight to Lisbon")
        .with_tag(tags::TASK_ID, "task-77")
}

fn indirect_metadata() -> StaticMetadata {
    metadata()
        .with_tag(tags::TASK_KEY, "tasks/task-77.txt")
        .with_tag(tags::SCRIPT_KEY, "scripts/task-77.py")
        .with_tag(tags::SCRAPERS_KEY, "scrapers/task-77.zip")
        .with_tag(tags::TASK_ID, "task-77")
}

fn bundle() -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    writer
        .start_file("scrapers/insights.py", zip::write::SimpleFileOptions::default())
        .unwrap();
    writer.write_all(b"def run(): pass\n").unwrap();
    writer.finish().unwrap().into_inner()
}

const RESULT: &str = "{\n  \"status\": \"success\",\n  \"result\": \"TP 1234, 89 EUR\"\n}\n";

#[tokio::test]
async fn scenario_a_success_path() {
    let runtime = ScriptedRuntime::exiting(0)
        .with_line(LogSource::Stdout, "Step 1: searching\n")
        .with_result(RESULT);
    let h = Harness::new(inline_metadata(), MemoryStore::new(), runtime);

    let report = h.run().await;

    assert_eq!(report.terminal, TerminalStatus::Success);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(
        report.history,
        vec![
            LifecycleState::Booting,
            LifecycleState::FetchingJob,
            LifecycleState::Running,
            LifecycleState::PublishingResult,
            LifecycleState::Terminating(TerminalStatus::Success),
        ]
    );
    assert!(report.failure.is_none());

    assert_eq!(h.notifier().count(Status::TaskCompleted), 1);
    assert_eq!(h.notifier().count(Status::TaskFailed), 0);
    assert_eq!(h.notifier().count(Status::ResultUploaded), 1);
    assert_eq!(
        h.notifier().find(Status::Terminating).unwrap().field("instance"),
        Some(NAME)
    );
    assert_eq!(h.services.host.shutdown_requests(), 1);

    let uploaded = h
        .services
        .store
        .object(JOBS, "ai-executor-42-result.json")
        .unwrap();
    assert_eq!(uploaded, RESULT);
}

#[tokio::test]
async fn scenario_b_bundle_download_fails() {
    let store = MemoryStore::new()
        .with_object(JOBS, "tasks/task-77.txt", "summarise the report")
        .with_object(JOBS, "scripts/task-77.py", "print('hi')")
        .failing_get("scrapers/task-77.zip");
    let h = Harness::new(indirect_metadata(), store, ScriptedRuntime::exiting(0));

    let report = h.run().await;

    assert_eq!(report.terminal, TerminalStatus::Failed);
    assert_eq!(report.exit_code(), 1);
    assert!(matches!(
        report.failure,
        Some(LifecycleError::JobFetchFailed(FetchError::AssetBundleMissing(_)))
    ));
    assert_eq!(
        report.history,
        vec![
            LifecycleState::Booting,
            LifecycleState::FetchingJob,
            LifecycleState::Failed,
            LifecycleState::Terminating(TerminalStatus::Failed),
        ]
    );

    assert!(h.services.runtime.pulls().is_empty());
    assert!(h.services.runtime.invocations().is_empty());

    let failed = h.notifier().find(Status::JobFetchFailed).unwrap();
    assert_eq!(failed.field("reason"), Some("asset_bundle_missing"));
    assert_eq!(h.services.host.shutdown_requests(), 1);
}

#[tokio::test]
async fn scenario_c_failed_task_still_publishes() {
    let runtime = ScriptedRuntime::exiting(1)
        .with_line(LogSource::Stderr, "Traceback (most recent call last):\n")
        .with_result("{\"status\": \"error\"}");
    let h = Harness::new(inline_metadata(), MemoryStore::new(), runtime);

    let report = h.run().await;

    assert_eq!(report.terminal, TerminalStatus::Failed);
    assert!(matches!(
        report.failure,
        Some(LifecycleError::TaskExecutionFailed(1))
    ));
    assert_eq!(
        report.history.last(),
        Some(&LifecycleState::Terminating(TerminalStatus::Failed))
    );
    assert!(report.history.contains(&LifecycleState::PublishingResult));

    let failed = h.notifier().find(Status::TaskFailed).unwrap();
    assert_eq!(failed.field("exit_code"), Some("1"));
    assert_eq!(
        h.services
            .store
            .object(JOBS, "ai-executor-42-result.json")
            .unwrap(),
        "{\"status\": \"error\"}"
    );
    assert_eq!(h.services.host.shutdown_requests(), 1);
}

#[tokio::test]
async fn indirect_job_runs_downloaded_payload_with_assets() {
    let store = MemoryStore::new()
        .with_object(JOBS, "tasks/task-77.txt", "summarise the report")
        .with_object(JOBS, "scripts/task-77.py", "print('hi')")
        .with_object(JOBS, "scrapers/task-77.zip", bundle());
    let h = Harness::new(indirect_metadata(), store, ScriptedRuntime::exiting(0));

    let report = h.run().await;
    assert_eq!(report.terminal, TerminalStatus::Success);

    let job = report.job.unwrap();
    assert_eq!(job.source, JobSourceKind::Indirect);
    assert_eq!(job.assets.unwrap().entries, 1);
    assert!(h.config.workdir.join("scrapers/insights.py").is_file());

    let invocation = &h.services.runtime.invocations()[0];
    assert_eq!(invocation.entrypoint, h.config.entrypoint);
    assert_eq!(invocation.args[0], "summarise the report");
    assert_eq!(invocation.args[1], NAME);
}

#[rstest]
#[case(0, TerminalStatus::Success)]
#[case(1, TerminalStatus::Failed)]
#[case(137, TerminalStatus::Failed)]
#[tokio::test]
async fn exit_code_decides_terminal_status(#[case] code: i64, #[case] expected: TerminalStatus) {
    let h = Harness::new(inline_metadata(), MemoryStore::new(), ScriptedRuntime::exiting(code));

    let report = h.run().await;

    assert_eq!(report.terminal, expected);
    assert_eq!(report.outcome.unwrap().exit, TaskExit::Exited(code));
}

#[tokio::test]
async fn missing_result_does_not_change_outcome() {
    let h = Harness::new(inline_metadata(), MemoryStore::new(), ScriptedRuntime::exiting(0));

    let report = h.run().await;

    assert_eq!(report.terminal, TerminalStatus::Success);
    assert!(matches!(report.publish, Some(PublishReport::Missing)));
    assert_eq!(h.notifier().count(Status::ResultMissing), 1);
}

#[tokio::test]
async fn result_upload_failure_is_not_fatal() {
    let store = MemoryStore::new().failing_put("ai-executor-42-result.json", usize::MAX);
    let runtime = ScriptedRuntime::exiting(0).with_result(RESULT);
    let h = Harness::new(inline_metadata(), store, runtime);

    let report = h.run().await;

    assert_eq!(report.terminal, TerminalStatus::Success);
    assert!(
        report
            .warnings
            .iter()
            .any(|w| matches!(w, LifecycleError::ResultPublishFailed(_)))
    );
    assert_eq!(h.notifier().count(Status::ResultUploadFailed), 1);
}

#[tokio::test]
async fn unreachable_metadata_fails_before_fetch() {
    let h = Harness::new(
        StaticMetadata::unreachable(),
        MemoryStore::new(),
        ScriptedRuntime::exiting(0),
    );

    let report = h.run().await;

    assert_eq!(report.terminal, TerminalStatus::Failed);
    assert!(matches!(
        report.failure,
        Some(LifecycleError::IdentityUnavailable(_))
    ));
    assert_eq!(
        report.history,
        vec![
            LifecycleState::Booting,
            LifecycleState::Failed,
            LifecycleState::Terminating(TerminalStatus::Failed),
        ]
    );
    assert_eq!(h.notifier().count(Status::IdentityUnavailable), 1);
    assert_eq!(h.services.host.shutdown_requests(), 1);
}

#[tokio::test]
async fn no_job_definition_fails() {
    let h = Harness::new(metadata(), MemoryStore::new(), ScriptedRuntime::exiting(0));

    let report = h.run().await;

    assert!(matches!(
        report.failure,
        Some(LifecycleError::JobFetchFailed(FetchError::NoJobDefinition))
    ));
    assert_eq!(
        h.notifier()
            .find(Status::JobFetchFailed)
            .unwrap()
            .field("reason"),
        Some("no_job_definition")
    );
}

#[tokio::test]
async fn image_pull_failure_is_fatal() {
    let h = Harness::new(
        inline_metadata(),
        MemoryStore::new(),
        ScriptedRuntime::exiting(0).failing_pull("manifest unknown"),
    );

    let report = h.run().await;

    assert_eq!(report.terminal, TerminalStatus::Failed);
    assert!(matches!(
        report.failure,
        Some(LifecycleError::ImagePullFailed(_))
    ));
    assert!(h.services.runtime.invocations().is_empty());
    assert_eq!(h.notifier().count(Status::ImagePullFailed), 1);
}

#[tokio::test]
async fn timed_out_task_is_killed_and_fails() {
    let mut h = Harness::new(inline_metadata(), MemoryStore::new(), ScriptedRuntime::hanging());
    h.config.task_timeout = Duration::from_millis(100);

    let report = h.run().await;

    assert_eq!(report.terminal, TerminalStatus::Failed);
    assert!(matches!(report.failure, Some(LifecycleError::TaskTimedOut(_))));
    assert_eq!(h.services.runtime.killed().len(), 1);
    assert_eq!(h.notifier().count(Status::TaskTimedOut), 1);
}

#[tokio::test]
async fn log_is_mirrored_and_only_grows() {
    let runtime = ScriptedRuntime::exiting(0)
        .with_line(LogSource::Stdout, "Step 1: open browser\n")
        .with_line(LogSource::Stdout, "Step 2: done\n");
    let h = Harness::new(inline_metadata(), MemoryStore::new(), runtime);

    h.run().await;

    let history = h.services.store.history(LOGS, "ai-executor-42.log");
    assert!(!history.is_empty());
    for pair in history.windows(2) {
        assert!(pair[0].len() < pair[1].len());
        assert!(pair[1].starts_with(&pair[0]));
    }

    let local = std::fs::read(&h.config.log_path).unwrap();
    let remote = h
        .services
        .store
        .object(LOGS, "ai-executor-42.log")
        .unwrap();
    assert_eq!(remote, local);
    assert!(
        String::from_utf8_lossy(&remote).contains("[task:stdout] Step 2: done"),
        "final flush includes task output"
    );
    assert!(h.services.store.has_container(LOGS));
}

#[tokio::test]
async fn final_log_upload_failure_is_reported() {
    let store = MemoryStore::new().failing_put("ai-executor-42.log", usize::MAX);
    let h = Harness::new(inline_metadata(), store, ScriptedRuntime::exiting(0));

    let report = h.run().await;

    assert_eq!(report.terminal, TerminalStatus::Success);
    assert!(
        report
            .warnings
            .iter()
            .any(|w| matches!(w, LifecycleError::LogUploadFailed(_)))
    );
    assert_eq!(h.notifier().count(Status::LogUploadFailed), 1);
}

#[tokio::test]
async fn stalled_log_upload_still_shuts_down() {
    let store = MemoryStore::new().stalling_put("ai-executor-42.log", 1);
    let runtime = ScriptedRuntime::hanging().with_line(LogSource::Stdout, "waiting for page load\n");
    let mut h = Harness::new(inline_metadata(), store, runtime);
    h.config.task_timeout = Duration::from_millis(300);
    h.config.flush_grace = Duration::from_millis(200);

    let report = tokio::time::timeout(Duration::from_secs(5), h.run())
        .await
        .expect("lifecycle must finish despite a stalled upload");

    assert_eq!(report.terminal, TerminalStatus::Failed);
    assert!(
        report
            .warnings
            .iter()
            .any(|w| matches!(w, LifecycleError::LogUploadFailed(_)))
    );
    assert_eq!(h.services.host.shutdown_requests(), 1);
}

#[tokio::test]
async fn container_start_failure_is_fatal() {
    let h = Harness::new(
        inline_metadata(),
        MemoryStore::new(),
        ScriptedRuntime::exiting(0).failing_start("no space left on device"),
    );

    let report = h.run().await;

    assert_eq!(report.terminal, TerminalStatus::Failed);
    assert!(matches!(report.failure, Some(LifecycleError::TaskRuntime(_))));
    assert_eq!(
        report.history,
        vec![
            LifecycleState::Booting,
            LifecycleState::FetchingJob,
            LifecycleState::Running,
            LifecycleState::Failed,
            LifecycleState::Terminating(TerminalStatus::Failed),
        ]
    );
    assert_eq!(h.services.runtime.pulls().len(), 1);
    assert!(h.services.runtime.invocations().is_empty());
    assert_eq!(h.notifier().count(Status::TaskFailed), 1);
    assert_eq!(h.notifier().count(Status::TaskStarted), 0);
    assert_eq!(h.services.host.shutdown_requests(), 1);
}

#[tokio::test]
async fn registry_credentials_reach_the_pull() {
    let dir = tempfile::tempdir().unwrap();
    let config = RunnerConfig {
        log_path: dir.path().join("kestrel.log"),
        workdir: dir.path().join("workspace"),
        log_interval: Duration::from_millis(20),
        identity_backoff: Duration::from_millis(1),
        ..Default::default()
    };
    let services = CoreServices {
        metadata: inline_metadata(),
        store: MemoryStore::new(),
        runtime: ScriptedRuntime::exiting(0),
        registry: StaticRegistry::new("AWS", "ecr-token"),
        notifier: RecordingNotifier::new(),
        host: RecordingHost::new(),
    };

    let log = ExecutionLog::open(&config.log_path).await.unwrap();
    let report = Lifecycle::new(services.clone(), config, log).run().await;
    assert_eq!(report.terminal, TerminalStatus::Success);

    assert_eq!(
        services.runtime.pulls(),
        ["123456789012.dkr.ecr.us-east-1.amazonaws.com/ai-executor-ec2:runtime-7c1d"]
    );
    let credentials = services.runtime.pull_credentials();
    let login = credentials[0].as_ref().unwrap();
    assert_eq!(login.username, "AWS");
    assert_eq!(login.password.expose(), "ecr-token");
    assert_eq!(
        login.server,
        "https://123456789012.dkr.ecr.us-east-1.amazonaws.com"
    );
}
