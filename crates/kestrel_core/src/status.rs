use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Machine-parsable status names posted to the notification sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Booting,
    IdentityResolved,
    IdentityUnavailable,
    FetchingJob,
    JobFetched,
    JobFetchFailed,
    PullingImage,
    ImagePullFailed,
    TaskStarted,
    TaskCompleted,
    TaskFailed,
    TaskTimedOut,
    PublishingResult,
    ResultUploaded,
    ResultMissing,
    ResultUploadFailed,
    LogUploadFailed,
    Terminating,
    WatchdogExpired,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Booting => "booting",
            Self::IdentityResolved => "identity_resolved",
            Self::IdentityUnavailable => "identity_unavailable",
            Self::FetchingJob => "fetching_job",
            Self::JobFetched => "job_fetched",
            Self::JobFetchFailed => "job_fetch_failed",
            Self::PullingImage => "pulling_image",
            Self::ImagePullFailed => "image_pull_failed",
            Self::TaskStarted => "task_started",
            Self::TaskCompleted => "task_completed",
            Self::TaskFailed => "task_failed",
            Self::TaskTimedOut => "task_timed_out",
            Self::PublishingResult => "publishing_result",
            Self::ResultUploaded => "result_uploaded",
            Self::ResultMissing => "result_missing",
            Self::ResultUploadFailed => "result_upload_failed",
            Self::LogUploadFailed => "log_upload_failed",
            Self::Terminating => "terminating",
            Self::WatchdogExpired => "watchdog_expired",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single status ping. `fields` become extra form fields next to `status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEvent {
    pub status: Status,
    pub fields: Vec<(String, String)>,
    pub at: DateTime<Utc>,
}

impl StatusEvent {
    pub fn new(status: Status) -> Self {
        Self {
            status,
            fields: Vec::new(),
            at: Utc::now(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.fields.push((key.into(), value.to_string()));
        self
    }

    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// The form body: `status` first, then the context fields in insertion order.
    pub fn form(&self) -> Vec<(String, String)> {
        std::iter::once(("status".to_string(), self.status.as_str().to_string()))
            .chain(self.fields.iter().cloned())
            .collect()
    }
}
