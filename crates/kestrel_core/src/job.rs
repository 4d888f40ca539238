use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// How the job definition reached this executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobSourceKind {
    /// Task text embedded directly in instance metadata.
    Inline,
    /// Metadata holds object keys; everything is downloaded from storage.
    Indirect,
}

impl fmt::Display for JobSourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobSourceKind::Inline => write!(f, "inline"),
            JobSourceKind::Indirect => write!(f, "indirect"),
        }
    }
}

/// The executable the container runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayloadRef {
    /// The entrypoint already baked into the image.
    Bundled,
    /// Downloaded from `key` and written to `path` inside the working directory.
    Downloaded { key: String, path: PathBuf },
}

/// An auxiliary archive that was downloaded and extracted into the working directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetBundleRef {
    pub key: String,
    pub extracted_to: PathBuf,
    pub entries: usize,
}

/// A string that never shows up in `Debug` or `Display` output.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretString(***)")
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// A credential handed to the container as an environment value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretEnv {
    pub name: String,
    pub value: SecretString,
}

/// The one task this executor runs. Fetched once, immutable afterwards.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub source: JobSourceKind,
    pub task_text: String,
    pub payload: PayloadRef,
    pub assets: Option<AssetBundleRef>,
    pub task_id: Option<String>,
    /// Optional sub-task selector (e.g., which scraper to run afterwards).
    pub sub_task: Option<String>,
    pub secrets: Vec<SecretEnv>,
}

impl JobSpec {
    /// Positional and flag arguments for the task entrypoint.
    pub fn entrypoint_args(&self, executor_name: &str, region: &str) -> Vec<String> {
        let mut args = vec![
            self.task_text.clone(),
            executor_name.to_string(),
            region.to_string(),
        ];

        if let Some(task_id) = &self.task_id {
            args.push("--task-id".to_string());
            args.push(task_id.clone());
        }

        if let Some(sub_task) = &self.sub_task {
            args.push("--scraper".to_string());
            args.push(sub_task.clone());
        }

        args
    }
}
