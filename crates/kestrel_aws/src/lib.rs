//! # Kestrel AWS
//!
//! AWS backends for the parts of the executor that talk to the instance itself:
//!
//! - [`ImdsMetadata`]: identity document and instance tags from EC2 IMDS.
//! - [`EcrRegistryAuth`]: short-lived ECR login for pulling the task image.
//!
//! ## Usage
//!
//! ```no_run
//! # use kestrel_aws::{EcrRegistryAuth, ImdsMetadata};
//! # use std::time::Duration;
//! # async fn run() {
//! let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
//! let metadata = ImdsMetadata::new(Duration::from_secs(5));
//! let registry = EcrRegistryAuth::new(&config);
//! # }
//! ```

mod ecr;
mod imds;

pub use ecr::{EcrRegistryAuth, decode_token, is_ecr_registry};
pub use imds::ImdsMetadata;
