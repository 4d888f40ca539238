//! # Kestrel Runner
//!
//! The lifecycle of a single-use executor: resolve identity, fetch the one
//! job, run it in a container while mirroring its log, publish the result,
//! then power the host off.
//!
//! ```text
//! Booting -> FetchingJob -> Running -> PublishingResult -> Terminating
//! ```
//!
//! Every backend is reached through a [`RunnerServices`](kestrel_core::traits::RunnerServices)
//! bundle, usually a [`CoreServices`](services::CoreServices).
//!
//! ## Example
//!
//! ```no_run
//! use kestrel_runner::prelude::*;
//! use kestrel_mock::*;
//!
//! # async fn run() -> std::io::Result<()> {
//! let config = RunnerConfig::default();
//! let services = CoreServices {
//!     metadata: StaticMetadata::new("i-0abc", "us-east-1", "123456789012")
//!         .with_tag(tags::TASK_PROMPT, "find the price of a kettle"),
//!     store: MemoryStore::new(),
//!     runtime: ScriptedRuntime::exiting(0),
//!     registry: AnonymousRegistry,
//!     notifier: RecordingNotifier::new(),
//!     host: NoShutdown,
//! };
//!
//! let log = ExecutionLog::open(&config.log_path).await?;
//! let report = Lifecycle::new(services, config, log).run().await;
//! std::process::exit(report.exit_code());
//! # }
//! ```

pub mod config;
pub mod fetch;
pub mod host;
pub mod identity;
pub mod lifecycle;
pub mod log;
pub mod notify;
pub mod publish;
pub mod services;
pub mod stream;
pub mod task;
pub mod telemetry;
pub mod watchdog;

pub mod prelude {
    pub use super::config::{ConfigError, RunnerConfig};
    pub use super::fetch::{JobFetcher, JobSource};
    pub use super::host::{NoShutdown, SystemShutdown};
    pub use super::identity::RetryPolicy;
    pub use super::lifecycle::{Lifecycle, LifecycleReport};
    pub use super::log::{ExecutionLog, LineAssembler};
    pub use super::notify::Notifications;
    pub use super::publish::{PublishReport, ResultPublisher};
    pub use super::services::CoreServices;
    pub use super::stream::{LogStreamHandle, LogStreamer, UploadOutcome};
    pub use super::task::TaskRunner;
    pub use super::watchdog::Watchdog;
    pub use kestrel_core::prelude::*;
}
