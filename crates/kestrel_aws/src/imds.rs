use aws_config::imds::client::Client as ImdsClient;
use aws_config::imds::client::error::ImdsError;
use kestrel_core::prelude::*;
use std::time::Duration;
use tracing::debug;

const IDENTITY_DOCUMENT: &str = "/latest/dynamic/instance-identity/document";
const TAG_PREFIX: &str = "/latest/meta-data/tags/instance/";

/// [`MetadataSource`] backed by the EC2 instance metadata service (IMDSv2).
///
/// Tags are only visible when the instance was launched with
/// `InstanceMetadataTags=enabled`.
#[derive(Clone, Debug)]
pub struct ImdsMetadata {
    client: ImdsClient,
}

impl ImdsMetadata {
    /// `timeout` bounds both connect and read of every request. Retries are left
    /// to the caller so that failures surface promptly.
    pub fn new(timeout: Duration) -> Self {
        let client = ImdsClient::builder()
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .max_attempts(1)
            .build();

        Self { client }
    }

    async fn get(&self, path: &str) -> Result<String, ImdsError> {
        let value = self.client.get(path).await?;
        let value: &str = value.as_ref();
        Ok(value.to_string())
    }
}

fn is_not_found(err: &ImdsError) -> bool {
    match err {
        ImdsError::ErrorResponse(response) => response.response().status().as_u16() == 404,
        _ => false,
    }
}

fn classify(err: ImdsError) -> MetadataError {
    match err {
        ImdsError::IoError(_) | ImdsError::FailedToLoadToken(_) => {
            MetadataError::Unreachable(err.to_string())
        }
        ImdsError::ErrorResponse(ref response)
            if response.response().status().is_server_error() =>
        {
            MetadataError::Unreachable(err.to_string())
        }
        other => MetadataError::System(other.to_string()),
    }
}

impl MetadataSource for ImdsMetadata {
    async fn identity_document(&self) -> Result<IdentityDocument, MetadataError> {
        let raw = self.get(IDENTITY_DOCUMENT).await.map_err(classify)?;
        serde_json::from_str(&raw).map_err(|e| MetadataError::Malformed(e.to_string()))
    }

    async fn tag(&self, key: &str) -> Result<Option<String>, MetadataError> {
        match self.get(&format!("{TAG_PREFIX}{key}")).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if is_not_found(&e) => {
                debug!(tag = key, "Tag not set");
                Ok(None)
            }
            Err(e) => Err(classify(e)),
        }
    }
}
