use anyhow::{Context, Result};
use aws_config::{BehaviorVersion, SdkConfig};
use clap::Parser;
use kestrel_aws::{EcrRegistryAuth, ImdsMetadata};
use kestrel_docker::DockerRuntime;
use kestrel_fs::FileSystemStore;
use kestrel_runner::prelude::*;
use kestrel_runner::telemetry;
use kestrel_s3::S3Store;
use kestrel_webhook::WebhookNotifier;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "kestrel")]
#[command(about = "Run the one job this instance was launched for, then power off", long_about = None)]
struct Cli {
    /// Local execution log, mirrored to the logs container
    #[arg(long, env = "KESTREL_LOG_PATH", default_value = "/var/log/kestrel.log")]
    log_path: PathBuf,

    /// Host directory mounted into the task container
    #[arg(long, env = "KESTREL_WORKDIR", default_value = "/opt/kestrel/workspace")]
    workdir: PathBuf,

    /// Logs container template; `{account_id}` is expanded
    #[arg(long, env = "KESTREL_LOGS_CONTAINER", default_value = defaults::LOGS_CONTAINER)]
    logs_container: String,

    /// Jobs container template; `{account_id}` is expanded
    #[arg(long, env = "KESTREL_JOBS_CONTAINER", default_value = defaults::JOBS_CONTAINER)]
    jobs_container: String,

    /// Status webhook. Notifications are disabled without it
    #[arg(long, env = "KESTREL_WEBHOOK_URL")]
    webhook_url: Option<String>,

    /// Registry host, defaults to the account's ECR registry
    #[arg(long, env = "KESTREL_REGISTRY")]
    registry: Option<String>,

    #[arg(long, env = "KESTREL_REPOSITORY", default_value = defaults::REPOSITORY)]
    repository: String,

    /// Image tag used when the IMAGE_TAG instance tag is absent
    #[arg(long, env = "KESTREL_DEFAULT_IMAGE_TAG", default_value = defaults::IMAGE_TAG)]
    default_image_tag: String,

    #[arg(long, env = "KESTREL_PAYLOAD_FILE_NAME", default_value = defaults::PAYLOAD_FILE)]
    payload_file_name: String,

    /// Command for a downloaded payload, split on whitespace
    #[arg(long, env = "KESTREL_ENTRYPOINT", default_value = "python3 /workspace/automation_task.py")]
    entrypoint: String,

    /// Command for the payload bundled in the image, split on whitespace
    #[arg(long, env = "KESTREL_BUNDLED_ENTRYPOINT", default_value = "python3 /app/automation_task.py")]
    bundled_entrypoint: String,

    /// Instance tags passed to the task as environment variables
    #[arg(long, env = "KESTREL_SECRET_TAGS", value_delimiter = ',', default_value = tags::GOOGLE_API_KEY)]
    secret_tags: Vec<String>,

    /// Wrap the task in `xvfb-run -a`
    #[arg(long, env = "KESTREL_VIRTUAL_DISPLAY")]
    virtual_display: bool,

    /// Shared memory for the task container in bytes, 0 leaves the runtime default
    #[arg(long, env = "KESTREL_SHM_SIZE", default_value_t = 2 * 1024 * 1024 * 1024)]
    shm_size: i64,

    #[arg(long, env = "KESTREL_LOG_INTERVAL_SECS", default_value_t = 10)]
    log_interval_secs: u64,

    #[arg(long, env = "KESTREL_FLUSH_GRACE_SECS", default_value_t = 30)]
    flush_grace_secs: u64,

    #[arg(long, env = "KESTREL_TASK_TIMEOUT_SECS", default_value_t = 72 * 3600)]
    task_timeout_secs: u64,

    #[arg(long, env = "KESTREL_METADATA_TIMEOUT_SECS", default_value_t = 5)]
    metadata_timeout_secs: u64,

    #[arg(long, env = "KESTREL_NOTIFY_TIMEOUT_SECS", default_value_t = 5)]
    notify_timeout_secs: u64,

    #[arg(long, env = "KESTREL_IDENTITY_ATTEMPTS", default_value_t = 3)]
    identity_attempts: u32,

    /// Hard ceiling on the executor's life, enforced by the watchdog
    #[arg(long, env = "KESTREL_MAX_LIFETIME_SECS", default_value_t = 72 * 3600 + 15 * 60)]
    max_lifetime_secs: u64,

    /// Skip the final host shutdown
    #[arg(long, env = "KESTREL_NO_SHUTDOWN")]
    no_shutdown: bool,

    /// Use a local directory instead of S3
    #[arg(long, env = "KESTREL_LOCAL_STORE")]
    local_store: Option<PathBuf>,
}

impl Cli {
    fn into_config(self) -> RunnerConfig {
        RunnerConfig {
            log_path: self.log_path,
            workdir: self.workdir,
            logs_container: self.logs_container,
            jobs_container: self.jobs_container,
            webhook_url: self.webhook_url,
            registry: self.registry,
            repository: self.repository,
            default_image_tag: self.default_image_tag,
            payload_file_name: self.payload_file_name,
            entrypoint: split_command(&self.entrypoint),
            bundled_entrypoint: split_command(&self.bundled_entrypoint),
            secret_tags: self
                .secret_tags
                .into_iter()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
            virtual_display: self.virtual_display,
            shm_size: (self.shm_size != 0).then_some(self.shm_size),
            log_interval: Duration::from_secs(self.log_interval_secs),
            flush_grace: Duration::from_secs(self.flush_grace_secs),
            task_timeout: Duration::from_secs(self.task_timeout_secs),
            metadata_timeout: Duration::from_secs(self.metadata_timeout_secs),
            notify_timeout: Duration::from_secs(self.notify_timeout_secs),
            identity_attempts: self.identity_attempts,
            max_lifetime: Duration::from_secs(self.max_lifetime_secs),
            no_shutdown: self.no_shutdown,
            local_store: self.local_store,
            ..RunnerConfig::default()
        }
    }
}

fn split_command(command: &str) -> Vec<String> {
    command.split_whitespace().map(str::to_string).collect()
}

#[tokio::main]
async fn main() {
    let config = Cli::parse().into_config();
    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {e}");
        std::process::exit(2);
    }

    let sdk = aws_config::load_defaults(BehaviorVersion::latest()).await;

    let code = match (config.local_store.clone(), config.no_shutdown) {
        (Some(root), true) => launch(config, &sdk, FileSystemStore::new(root), NoShutdown).await,
        (Some(root), false) => {
            launch(config, &sdk, FileSystemStore::new(root), SystemShutdown::default()).await
        }
        (None, true) => {
            let store = S3Store::new(aws_sdk_s3::Client::new(&sdk));
            launch(config, &sdk, store, NoShutdown).await
        }
        (None, false) => {
            let store = S3Store::new(aws_sdk_s3::Client::new(&sdk));
            launch(config, &sdk, store, SystemShutdown::default()).await
        }
    };

    std::process::exit(code);
}

type Services<St, H> =
    CoreServices<ImdsMetadata, St, DockerRuntime, EcrRegistryAuth, WebhookNotifier, H>;

/// Runs the lifecycle and returns the process exit code. The host is asked to
/// shut down even when the executor cannot start.
async fn launch<St, H>(config: RunnerConfig, sdk: &SdkConfig, store: St, host: H) -> i32
where
    St: ObjectStore,
    H: HostControl,
{
    let (services, log) = match bootstrap(&config, sdk, store, host.clone()).await {
        Ok(started) => started,
        Err(e) => return abort_startup(&host, e).await,
    };

    let report = Lifecycle::new(services, config, log).run().await;

    info!(
        exit_code = report.exit_code(),
        warnings = report.warnings.len(),
        "Executor finished"
    );
    report.exit_code()
}

async fn bootstrap<St, H>(
    config: &RunnerConfig,
    sdk: &SdkConfig,
    store: St,
    host: H,
) -> Result<(Services<St, H>, ExecutionLog)>
where
    St: ObjectStore,
    H: HostControl,
{
    telemetry::init(&config.log_path)
        .with_context(|| format!("Failed to open {}", config.log_path.display()))?;

    let services = CoreServices {
        metadata: ImdsMetadata::new(config.metadata_timeout),
        store,
        runtime: DockerRuntime::connect_local()?,
        registry: EcrRegistryAuth::new(sdk),
        notifier: WebhookNotifier::new(config.webhook_url.clone(), config.notify_timeout)?,
        host,
    };

    if !services.notifier.is_enabled() {
        info!("No webhook configured, status notifications disabled");
    }

    let log = ExecutionLog::open(&config.log_path).await?;
    Ok((services, log))
}

async fn abort_startup<H: HostControl>(host: &H, err: anyhow::Error) -> i32 {
    eprintln!("Executor failed to start: {err:#}");
    if let Err(e) = host.request_shutdown().await {
        eprintln!("Host shutdown request failed: {e}");
    }
    1
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_mock::{MemoryStore, RecordingHost};
    use rstest::rstest;

    fn parse(args: &[&str]) -> RunnerConfig {
        let argv = std::iter::once("kestrel").chain(args.iter().copied());
        Cli::try_parse_from(argv).unwrap().into_config()
    }

    #[test]
    fn defaults_match_runner_defaults() {
        let parsed = parse(&[]);
        let defaults = RunnerConfig::default();

        assert_eq!(parsed.entrypoint, defaults.entrypoint);
        assert_eq!(parsed.bundled_entrypoint, defaults.bundled_entrypoint);
        assert_eq!(parsed.secret_tags, defaults.secret_tags);
        assert_eq!(parsed.shm_size, defaults.shm_size);
        assert_eq!(parsed.task_timeout, defaults.task_timeout);
        assert_eq!(parsed.max_lifetime, defaults.max_lifetime);
        assert_eq!(parsed.logs_container, defaults.logs_container);
        assert!(parsed.validate().is_ok());
    }

    #[rstest]
    #[case(&["--log-interval-secs", "0"], ConfigError::Zero("log_interval"))]
    #[case(&["--identity-attempts", "0"], ConfigError::Zero("identity_attempts"))]
    #[case(&["--entrypoint", "  "], ConfigError::Empty("entrypoint"))]
    #[case(&["--repository", ""], ConfigError::Empty("repository"))]
    fn rejects_invalid_flags(#[case] args: &[&str], #[case] expected: ConfigError) {
        assert_eq!(parse(args).validate(), Err(expected));
    }

    #[test]
    fn parses_lists_and_switches() {
        let config = parse(&[
            "--secret-tags",
            "GOOGLE_API_KEY, OPENAI_API_KEY",
            "--shm-size",
            "0",
            "--virtual-display",
            "--no-shutdown",
            "--local-store",
            "/tmp/kestrel",
        ]);

        assert_eq!(config.secret_tags, ["GOOGLE_API_KEY", "OPENAI_API_KEY"]);
        assert_eq!(config.shm_size, None);
        assert!(config.virtual_display);
        assert!(config.no_shutdown);
        assert_eq!(config.local_store, Some(PathBuf::from("/tmp/kestrel")));
    }

    #[tokio::test]
    async fn failed_startup_requests_shutdown() {
        let host = RecordingHost::new();
        let code = abort_startup(&host, anyhow::anyhow!("docker socket unreachable")).await;

        assert_eq!(code, 1);
        assert_eq!(host.shutdown_requests(), 1);
    }

    #[tokio::test]
    async fn unwritable_log_path_still_shuts_down() {
        let dir = tempfile::tempdir().unwrap();
        let config = RunnerConfig {
            log_path: dir.path().to_path_buf(),
            ..RunnerConfig::default()
        };
        let host = RecordingHost::new();

        let code = launch(
            config,
            &SdkConfig::builder().build(),
            MemoryStore::new(),
            host.clone(),
        )
        .await;

        assert_eq!(code, 1);
        assert_eq!(host.shutdown_requests(), 1);
    }
}
