use crate::status::Status;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    /// Low-level I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The requested object or container does not exist.
    #[error("Object not found: {0}")]
    NotFound(String),

    /// The request was invalid (e.g., bad key or container name).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Generic system or backend-specific failure (e.g., S3 SDK error).
    #[error("Storage system failure: {0}")]
    System(String),
}

#[derive(Error, Debug)]
pub enum MetadataError {
    /// The metadata service could not be reached or timed out.
    /// Worth retrying.
    #[error("Metadata service unreachable: {0}")]
    Unreachable(String),

    /// The service answered with something that could not be understood.
    #[error("Malformed metadata: {0}")]
    Malformed(String),

    /// Any other failure reported by the service.
    #[error("Metadata system failure: {0}")]
    System(String),
}

impl MetadataError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unreachable(_))
    }
}

#[derive(Error, Debug)]
pub enum RuntimeError {
    /// The image could not be pulled (unknown tag, registry auth, network).
    #[error("Image pull failed: {0}")]
    Pull(String),

    /// The container could not be created or started.
    #[error("Container start failed: {0}")]
    Start(String),

    /// The container with the given id does not exist.
    #[error("Container {0} not found")]
    NotFound(String),

    /// Generic runtime failure (e.g., daemon unavailable).
    #[error("Runtime system failure: {0}")]
    System(String),
}

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Notification request failed: {0}")]
    Request(String),

    #[error("Notification sink rejected event with status {0}")]
    Rejected(u16),
}

/// Why a job could not be fetched. Each required input has its own reason so
/// the log and the notification sink show which one was missing.
#[derive(Error, Debug)]
pub enum FetchError {
    /// Neither inline task text nor storage keys were found in metadata.
    #[error("no job definition found in instance metadata")]
    NoJobDefinition,

    #[error("task text missing: {0}")]
    TaskTextMissing(String),

    #[error("payload missing: {0}")]
    PayloadMissing(String),

    #[error("asset bundle missing: {0}")]
    AssetBundleMissing(String),

    /// The asset bundle was downloaded but could not be fully extracted.
    #[error("asset bundle extraction failed: {0}")]
    AssetExtraction(String),

    /// Preparing the working directory failed.
    #[error("working directory error: {0}")]
    Workspace(#[from] std::io::Error),

    #[error("metadata lookup failed: {0}")]
    Metadata(#[from] MetadataError),
}

impl FetchError {
    /// Short machine-readable reason, sent with `job_fetch_failed`.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::NoJobDefinition => "no_job_definition",
            Self::TaskTextMissing(_) => "task_text_missing",
            Self::PayloadMissing(_) => "payload_missing",
            Self::AssetBundleMissing(_) => "asset_bundle_missing",
            Self::AssetExtraction(_) => "asset_extraction",
            Self::Workspace(_) => "workspace",
            Self::Metadata(_) => "metadata",
        }
    }
}

/// Errors surfaced to the lifecycle controller.
///
/// [`is_fatal`](Self::is_fatal) decides whether the lifecycle goes straight to
/// `Terminating(Failed)` or merely logs and continues.
#[derive(Error, Debug)]
pub enum LifecycleError {
    /// Fatal.
    #[error("executor identity unavailable: {0}")]
    IdentityUnavailable(#[source] MetadataError),

    /// Fatal.
    #[error("job fetch failed: {0}")]
    JobFetchFailed(#[from] FetchError),

    /// Fatal.
    #[error("image pull failed: {0}")]
    ImagePullFailed(#[source] RuntimeError),

    /// Fatal. Carries the container's own exit code.
    #[error("task execution failed with exit code {0}")]
    TaskExecutionFailed(i64),

    /// Fatal. The runtime failed before the container produced an exit code.
    #[error("task runtime failure: {0}")]
    TaskRuntime(#[source] RuntimeError),

    /// Fatal. The task ran past its ceiling and was killed.
    #[error("task timed out after {0}s")]
    TaskTimedOut(u64),

    /// Best effort.
    #[error("result publish failed: {0}")]
    ResultPublishFailed(#[source] StorageError),

    /// Best effort.
    #[error("log upload failed: {0}")]
    LogUploadFailed(#[source] StorageError),
}

impl LifecycleError {
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::ResultPublishFailed(_) | Self::LogUploadFailed(_)
        )
    }

    /// The notification status emitted for this error.
    pub fn status(&self) -> Status {
        match self {
            Self::IdentityUnavailable(_) => Status::IdentityUnavailable,
            Self::JobFetchFailed(_) => Status::JobFetchFailed,
            Self::ImagePullFailed(_) => Status::ImagePullFailed,
            Self::TaskExecutionFailed(_) | Self::TaskRuntime(_) => Status::TaskFailed,
            Self::TaskTimedOut(_) => Status::TaskTimedOut,
            Self::ResultPublishFailed(_) => Status::ResultUploadFailed,
            Self::LogUploadFailed(_) => Status::LogUploadFailed,
        }
    }
}
