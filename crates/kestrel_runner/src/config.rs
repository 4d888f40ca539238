use kestrel_core::prelude::*;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("Invalid {0}: {1}")]
    Invalid(&'static str, String),
}

/// Everything the runner needs to know, fixed before the lifecycle starts.
#[derive(Clone, Debug)]
pub struct RunnerConfig {
    /// Local execution log, mirrored to the logs container.
    pub log_path: PathBuf,
    /// Host directory the job is fetched into and mounted into the container.
    pub workdir: PathBuf,
    /// Container name templates; see [`ExecutorIdentity::expand`].
    pub logs_container: String,
    pub jobs_container: String,

    pub webhook_url: Option<String>,

    /// Image registry host. Defaults to the account's ECR registry.
    pub registry: Option<String>,
    pub repository: String,
    pub default_image_tag: String,

    pub payload_file_name: String,
    /// Command for a downloaded payload.
    pub entrypoint: Vec<String>,
    /// Command for the payload baked into the image.
    pub bundled_entrypoint: Vec<String>,
    /// Instance tags handed to the task as secret environment values.
    pub secret_tags: Vec<String>,
    /// Wrap the entrypoint in `xvfb-run -a`.
    pub virtual_display: bool,
    pub shm_size: Option<i64>,

    pub log_interval: Duration,
    pub flush_grace: Duration,
    pub task_timeout: Duration,
    pub metadata_timeout: Duration,
    pub notify_timeout: Duration,
    pub identity_attempts: u32,
    pub identity_backoff: Duration,
    pub max_lifetime: Duration,

    /// Keep the host running after the lifecycle ends.
    pub no_shutdown: bool,
    /// Use a directory tree instead of S3 for object storage.
    pub local_store: Option<PathBuf>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            log_path: PathBuf::from("/var/log/kestrel.log"),
            workdir: PathBuf::from("/opt/kestrel/workspace"),
            logs_container: defaults::LOGS_CONTAINER.to_string(),
            jobs_container: defaults::JOBS_CONTAINER.to_string(),
            webhook_url: None,
            registry: None,
            repository: defaults::REPOSITORY.to_string(),
            default_image_tag: defaults::IMAGE_TAG.to_string(),
            payload_file_name: defaults::PAYLOAD_FILE.to_string(),
            entrypoint: vec!["python3".into(), "/workspace/automation_task.py".into()],
            bundled_entrypoint: vec!["python3".into(), "/app/automation_task.py".into()],
            secret_tags: vec![tags::GOOGLE_API_KEY.to_string()],
            virtual_display: false,
            shm_size: Some(2 * 1024 * 1024 * 1024),
            log_interval: Duration::from_secs(10),
            flush_grace: Duration::from_secs(30),
            task_timeout: Duration::from_secs(72 * 3600),
            metadata_timeout: Duration::from_secs(5),
            notify_timeout: Duration::from_secs(5),
            identity_attempts: 3,
            identity_backoff: Duration::from_secs(1),
            max_lifetime: Duration::from_secs(72 * 3600 + 15 * 60),
            no_shutdown: false,
            local_store: None,
        }
    }
}

impl RunnerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let durations = [
            ("log_interval", self.log_interval),
            ("task_timeout", self.task_timeout),
            ("metadata_timeout", self.metadata_timeout),
            ("notify_timeout", self.notify_timeout),
            ("max_lifetime", self.max_lifetime),
        ];
        if let Some((name, _)) = durations.iter().find(|(_, d)| d.is_zero()) {
            return Err(ConfigError::Zero(*name));
        }

        if self.identity_attempts == 0 {
            return Err(ConfigError::Zero("identity_attempts"));
        }

        let required = [
            ("logs_container", self.logs_container.as_str()),
            ("jobs_container", self.jobs_container.as_str()),
            ("repository", self.repository.as_str()),
            ("default_image_tag", self.default_image_tag.as_str()),
            ("payload_file_name", self.payload_file_name.as_str()),
        ];
        if let Some((name, _)) = required.iter().find(|(_, v)| v.trim().is_empty()) {
            return Err(ConfigError::Empty(*name));
        }

        if self.entrypoint.is_empty() {
            return Err(ConfigError::Empty("entrypoint"));
        }
        if self.bundled_entrypoint.is_empty() {
            return Err(ConfigError::Empty("bundled_entrypoint"));
        }

        if self.payload_file_name.contains(['/', '\\']) || self.payload_file_name == ".." {
            return Err(ConfigError::Invalid(
                "payload_file_name",
                format!("{} is not a plain file name", self.payload_file_name),
            ));
        }

        if self.shm_size.is_some_and(|s| s <= 0) {
            return Err(ConfigError::Zero("shm_size"));
        }

        Ok(())
    }

    /// `<account>.dkr.ecr.<region>.amazonaws.com` unless a registry is configured.
    pub fn registry_host(&self, identity: &ExecutorIdentity) -> String {
        self.registry.clone().unwrap_or_else(|| {
            format!(
                "{}.dkr.ecr.{}.amazonaws.com",
                identity.account_id, identity.region
            )
        })
    }

    /// `<registry>/<repository>:<image_tag>`
    pub fn image_reference(&self, identity: &ExecutorIdentity) -> String {
        format!(
            "{}/{}:{}",
            self.registry_host(identity).trim_end_matches('/'),
            self.repository,
            identity.image_tag
        )
    }

    pub fn logs_container(&self, identity: &ExecutorIdentity) -> String {
        identity.expand(&self.logs_container)
    }

    pub fn jobs_container(&self, identity: &ExecutorIdentity) -> String {
        identity.expand(&self.jobs_container)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn identity() -> ExecutorIdentity {
        ExecutorIdentity {
            instance_id: "i-0abc".into(),
            region: "eu-west-1".into(),
            account_id: "123456789012".into(),
            name: "ai-executor-7".into(),
            image_tag: "runtime-9f8e".into(),
        }
    }

    #[test]
    fn defaults_are_valid() {
        assert_eq!(RunnerConfig::default().validate(), Ok(()));
    }

    #[rstest]
    #[case::log_interval(RunnerConfig { log_interval: Duration::ZERO, ..Default::default() }, ConfigError::Zero("log_interval"))]
    #[case::task_timeout(RunnerConfig { task_timeout: Duration::ZERO, ..Default::default() }, ConfigError::Zero("task_timeout"))]
    #[case::attempts(RunnerConfig { identity_attempts: 0, ..Default::default() }, ConfigError::Zero("identity_attempts"))]
    #[case::logs_container(RunnerConfig { logs_container: " ".into(), ..Default::default() }, ConfigError::Empty("logs_container"))]
    #[case::jobs_container(RunnerConfig { jobs_container: String::new(), ..Default::default() }, ConfigError::Empty("jobs_container"))]
    #[case::entrypoint(RunnerConfig { entrypoint: vec![], ..Default::default() }, ConfigError::Empty("entrypoint"))]
    fn rejects_invalid_config(#[case] config: RunnerConfig, #[case] expected: ConfigError) {
        assert_eq!(config.validate(), Err(expected));
    }

    #[test]
    fn rejects_payload_path() {
        let config = RunnerConfig {
            payload_file_name: "../evil.py".into(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid("payload_file_name", _))
        ));
    }

    #[test]
    fn image_defaults_to_account_ecr() {
        let config = RunnerConfig::default();
        assert_eq!(
            config.image_reference(&identity()),
            "123456789012.dkr.ecr.eu-west-1.amazonaws.com/ai-executor-ec2:runtime-9f8e"
        );
    }

    #[test]
    fn configured_registry_wins() {
        let config = RunnerConfig {
            registry: Some("registry.internal:5000/".into()),
            repository: "worker".into(),
            ..Default::default()
        };
        assert_eq!(
            config.image_reference(&identity()),
            "registry.internal:5000/worker:runtime-9f8e"
        );
    }

    #[test]
    fn containers_expand_account() {
        let config = RunnerConfig::default();
        let id = identity();
        assert_eq!(config.logs_container(&id), "ai-executor-logs-123456789012");
        assert_eq!(config.jobs_container(&id), "ai-executor-results-123456789012");
    }
}
