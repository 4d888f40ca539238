use crate::job::SecretEnv;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Everything the [`TaskRuntime`](crate::traits::TaskRuntime) needs to start the task container.
#[derive(Debug, Clone)]
pub struct TaskInvocation {
    /// Fully qualified image reference, e.g. `1234.dkr.ecr.us-east-1.amazonaws.com/repo:tag`.
    pub image: String,
    /// Container name. Must be unique on the host.
    pub name: String,
    pub entrypoint: Vec<String>,
    pub args: Vec<String>,
    /// Plain environment values.
    pub env: Vec<(String, String)>,
    /// Credentials, injected as environment values and never logged.
    pub secrets: Vec<SecretEnv>,
    /// Host directory mounted into the container.
    pub workdir: PathBuf,
    /// Mount point of `workdir` inside the container.
    pub mount_point: String,
    /// Shared memory size in bytes. Browsers need more than Docker's default.
    pub shm_size: Option<i64>,
}

impl TaskInvocation {
    /// `NAME=value` pairs with secrets exposed; only for handing to the runtime.
    pub fn env_pairs(&self) -> Vec<String> {
        self.env
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .chain(
                self.secrets
                    .iter()
                    .map(|s| format!("{}={}", s.name, s.value.expose())),
            )
            .collect()
    }
}

/// Registry login for pulling the task image.
#[derive(Clone)]
pub struct RegistryCredentials {
    pub username: String,
    pub password: crate::job::SecretString,
    pub server: String,
}

impl std::fmt::Debug for RegistryCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryCredentials")
            .field("username", &self.username)
            .field("server", &self.server)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogSource {
    Stdout,
    Stderr,
    Console,
}

impl LogSource {
    pub fn tag(&self) -> &'static str {
        match self {
            LogSource::Stdout => "task:stdout",
            LogSource::Stderr => "task:stderr",
            LogSource::Console => "task:console",
        }
    }
}

/// A raw chunk of container output. May hold several lines or part of one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogOutput {
    pub source: LogSource,
    pub message: String,
}

/// How the task container ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskExit {
    /// The container's own exit code, as reported by the runtime.
    Exited(i64),
    /// The task ran past its ceiling and was killed.
    TimedOut,
}

impl TaskExit {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskExit::Exited(0))
    }
}

/// The structured result file a task leaves behind.
#[derive(Debug, Clone)]
pub struct ResultArtifact {
    /// The file as written, uploaded byte-for-byte.
    pub bytes: Bytes,
    /// Parsed JSON, if the file is valid JSON.
    pub document: Option<serde_json::Value>,
}

impl ResultArtifact {
    pub fn new(bytes: Bytes) -> Self {
        let document = serde_json::from_slice(&bytes).ok();
        Self { bytes, document }
    }

    /// The `status` field the automation script writes, if any.
    pub fn reported_status(&self) -> Option<&str> {
        self.document.as_ref()?.get("status")?.as_str()
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub exit: TaskExit,
    /// Absent when the task produced no result file.
    pub result: Option<ResultArtifact>,
    pub duration: Duration,
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        self.exit.is_success()
    }
}
