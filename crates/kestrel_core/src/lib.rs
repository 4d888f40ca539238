//! # Kestrel Core
//!
//! Types and traits shared by the runner and its backends.
//!
//! - **[`ExecutorIdentity`](identity::ExecutorIdentity)**: who this instance is; keys logs and results.
//! - **[`JobSpec`](job::JobSpec)**: the one task this instance runs.
//! - **[`LifecycleState`](lifecycle::LifecycleState)**: the forward-only state machine.
//! - **[`ObjectStore`](traits::ObjectStore)**, **[`TaskRuntime`](traits::TaskRuntime)**,
//!   **[`MetadataSource`](traits::MetadataSource)**, **[`Notifier`](traits::Notifier)**:
//!   traits for plugging in backends (e.g., S3, Docker, EC2 IMDS, a webhook).

pub mod constants;
pub mod error;
pub mod identity;
pub mod job;
pub mod lifecycle;
pub mod status;
pub mod task;
pub mod traits;

pub mod prelude {
    pub use super::constants::*;
    pub use super::error::*;
    pub use super::identity::*;
    pub use super::job::*;
    pub use super::lifecycle::*;
    pub use super::status::*;
    pub use super::task::*;
    pub use super::traits::*;
}
