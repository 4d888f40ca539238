//! # Kestrel S3 Store
//!
//! An [`ObjectStore`] backed by AWS S3. Containers map to buckets.
//!
//! ## Usage
//!
//! ```no_run
//! # use kestrel_s3::S3Store;
//! # async fn run() {
//! let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
//! let store = S3Store::new(aws_sdk_s3::Client::new(&config));
//! # }
//! ```

use aws_sdk_s3::Client;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};
use bytes::Bytes;
use kestrel_core::prelude::*;
use tracing::{debug, info};

/// us-east-1 rejects an explicit location constraint.
const DEFAULT_REGION: &str = "us-east-1";

#[derive(Clone, Debug)]
pub struct S3Store {
    client: Client,
}

impl S3Store {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn region(&self) -> Option<String> {
        self.client
            .config()
            .region()
            .map(|r| r.as_ref().to_string())
    }
}

fn system_error<E, R>(op: &str, err: SdkError<E, R>) -> StorageError
where
    E: std::error::Error + 'static,
    R: std::fmt::Debug + 'static,
{
    StorageError::System(format!("S3 {op} failed: {}", DisplayErrorContext(&err)))
}

fn is_missing<E: ProvideErrorMetadata, R>(err: &SdkError<E, R>) -> bool {
    matches!(err.code(), Some("NoSuchBucket" | "NoSuchKey" | "NotFound"))
}

impl ObjectStore for S3Store {
    async fn ensure_container(&self, container: &str) -> Result<(), StorageError> {
        let mut req = self.client.create_bucket().bucket(container);

        if let Some(region) = self.region().filter(|r| r != DEFAULT_REGION) {
            req = req.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(region.as_str()))
                    .build(),
            );
        }

        match req.send().await {
            Ok(_) => {
                info!(bucket = container, "Created bucket");
                Ok(())
            }
            Err(e)
                if e.as_service_error().is_some_and(|s| {
                    s.is_bucket_already_owned_by_you() || s.is_bucket_already_exists()
                }) =>
            {
                debug!(bucket = container, "Bucket already exists");
                Ok(())
            }
            Err(e) => Err(system_error("CreateBucket", e)),
        }
    }

    async fn get(&self, container: &str, key: &str) -> Result<Bytes, StorageError> {
        let output = self
            .client
            .get_object()
            .bucket(container)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if is_missing(&e) {
                    StorageError::NotFound(format!("s3://{container}/{key}"))
                } else {
                    system_error("GetObject", e)
                }
            })?;

        let data = output
            .body
            .collect()
            .await
            .map_err(|e| StorageError::System(format!("S3 body read failed: {e}")))?;

        Ok(data.into_bytes())
    }

    async fn put(
        &self,
        container: &str,
        key: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<(), StorageError> {
        self.client
            .put_object()
            .bucket(container)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(data))
            .send()
            .await
            .map(|_| ())
            .map_err(|e| {
                if is_missing(&e) {
                    StorageError::NotFound(format!("s3://{container}"))
                } else {
                    system_error("PutObject", e)
                }
            })
    }
}
