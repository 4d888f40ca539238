//! # Kestrel
//!
//!> *Lands once, does one job, leaves*
//!
//! A single-use task runner for disposable cloud instances. On boot it works out
//! who it is from instance metadata, fetches the one job it was launched for,
//! runs it in a container while mirroring the log to object storage, publishes
//! the result, and powers the host off.
//!
//! This crate serves as an entry point, re-exporting the core types and the
//! lifecycle controller, and optionally the backends via feature flags.
//!
//! ## Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | **`aws`** | EC2 instance metadata and ECR registry auth (`kestrel_aws`). |
//! | **`s3`** | Object store backed by AWS S3 (`kestrel_s3`). |
//! | **`docker`** | Docker task runtime (`kestrel_docker`). |
//! | **`webhook`** | Form-encoded status webhook (`kestrel_webhook`). |
//! | **`fs`** | Object store on the local filesystem (`kestrel_fs`). |
//! | **`mock`** | In-memory backends for tests and dry runs (`kestrel_mock`). |
//!
//! ## Example: Local Dry Run
//!
//! ```toml
//! [dependencies]
//! kestrel = "0.3"
//! kestrel_mock = "0.3"
//! ```
//!
//! ```rust,no_run
//! use kestrel::prelude::*;
//! use kestrel_mock::*;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = RunnerConfig::default();
//!     let services = CoreServices {
//!         metadata: StaticMetadata::new("i-0abc", "us-east-1", "123456789012")
//!             .with_tag(tags::TASK_PROMPT, "find the price of a kettle"),
//!         store: MemoryStore::new(),
//!         runtime: ScriptedRuntime::exiting(0),
//!         registry: AnonymousRegistry,
//!         notifier: RecordingNotifier::new(),
//!         host: NoShutdown,
//!     };
//!
//!     let log = ExecutionLog::open(&config.log_path).await.unwrap();
//!     let report = Lifecycle::new(services, config, log).run().await;
//!     println!("{:?}", report.terminal);
//! }
//! ```

pub use kestrel_core::*;

pub mod runner {
    pub use kestrel_runner::*;
}

#[cfg(feature = "aws")]
pub mod aws {
    pub use kestrel_aws::*;
}

#[cfg(feature = "s3")]
pub mod s3 {
    pub use kestrel_s3::*;
}

#[cfg(feature = "docker")]
pub mod docker {
    pub use kestrel_docker::*;
}

#[cfg(feature = "webhook")]
pub mod webhook {
    pub use kestrel_webhook::*;
}

#[cfg(feature = "fs")]
pub mod fs {
    pub use kestrel_fs::*;
}

#[cfg(feature = "mock")]
pub mod mock {
    pub use kestrel_mock::*;
}

pub mod prelude {
    pub use kestrel_runner::prelude::*;

    #[cfg(feature = "aws")]
    pub use kestrel_aws::{EcrRegistryAuth, ImdsMetadata};

    #[cfg(feature = "s3")]
    pub use kestrel_s3::S3Store;

    #[cfg(feature = "docker")]
    pub use kestrel_docker::DockerRuntime;

    #[cfg(feature = "webhook")]
    pub use kestrel_webhook::WebhookNotifier;

    #[cfg(feature = "fs")]
    pub use kestrel_fs::FileSystemStore;
}
