use kestrel_core::prelude::*;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

/// What happened to the result artifact.
#[derive(Debug)]
pub enum PublishReport {
    Uploaded {
        key: String,
        sha256: String,
        bytes: usize,
    },
    /// The task wrote no result file.
    Missing,
}

impl PublishReport {
    pub fn status(&self) -> Status {
        match self {
            PublishReport::Uploaded { .. } => Status::ResultUploaded,
            PublishReport::Missing => Status::ResultMissing,
        }
    }
}

/// Uploads the result artifact to the jobs container, byte for byte.
pub struct ResultPublisher<'a, S> {
    store: &'a S,
    container: String,
}

impl<'a, S: ObjectStore> ResultPublisher<'a, S> {
    pub fn new(store: &'a S, container: impl Into<String>) -> Self {
        Self {
            store,
            container: container.into(),
        }
    }

    /// Best effort: the only error is [`LifecycleError::ResultPublishFailed`].
    pub async fn publish(
        &self,
        outcome: &ExecutionOutcome,
        identity: &ExecutorIdentity,
    ) -> Result<PublishReport, LifecycleError> {
        let Some(artifact) = &outcome.result else {
            warn!("Task produced no result file");
            return Ok(PublishReport::Missing);
        };

        let key = identity.result_key();
        let sha256 = hex::encode(Sha256::digest(&artifact.bytes));

        // Usually exists already. The put decides.
        if let Err(e) = self.store.ensure_container(&self.container).await {
            warn!(container = %self.container, "Could not ensure results container: {e}");
        }

        self.store
            .put(
                &self.container,
                &key,
                artifact.bytes.clone(),
                "application/json",
            )
            .await
            .map_err(LifecycleError::ResultPublishFailed)?;

        info!(container = %self.container, key = %key, sha256 = %sha256, "Result uploaded");
        Ok(PublishReport::Uploaded {
            key,
            sha256,
            bytes: artifact.bytes.len(),
        })
    }
}
