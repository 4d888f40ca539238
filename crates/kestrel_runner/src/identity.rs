use kestrel_core::prelude::*;
use std::time::Duration;
use tracing::{info, warn};

/// Bounded retries for metadata lookups.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_delay: Duration,
    /// Bounds each individual lookup.
    pub timeout: Duration,
}

impl RetryPolicy {
    /// Exponential backoff plus up to 50% jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_millis() as u64 * 2u64.pow(attempt.min(16));
        let jitter = match base / 2 {
            0 => 0,
            half => rand::random::<u64>() % half,
        };
        Duration::from_millis(base + jitter)
    }

    /// Runs `op` until it succeeds, fails permanently, or attempts run out.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, MetadataError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, MetadataError>>,
    {
        let mut attempt = 0;
        loop {
            let result = match tokio::time::timeout(self.timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(MetadataError::Unreachable(format!(
                    "{what} timed out after {}ms",
                    self.timeout.as_millis()
                ))),
            };

            attempt += 1;
            match result {
                Err(e) if e.is_transient() && attempt < self.attempts => {
                    let delay = self.delay(attempt - 1);
                    warn!(
                        attempt,
                        max_attempts = self.attempts,
                        delay_ms = delay.as_millis() as u64,
                        "{what} failed, retrying: {e}"
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Works out who this executor is from the instance identity document and tags.
///
/// The name comes from `INSTANCE_NAME`, then `Name`, then the instance id.
pub async fn resolve<M: MetadataSource>(
    metadata: &M,
    policy: &RetryPolicy,
    default_image_tag: &str,
) -> Result<ExecutorIdentity, LifecycleError> {
    let document = policy
        .run("identity document", || metadata.identity_document())
        .await
        .map_err(LifecycleError::IdentityUnavailable)?;

    let tag = |key: &'static str| policy.run(key, move || metadata.tag(key));

    let instance_name = non_empty(
        tag(tags::INSTANCE_NAME)
            .await
            .map_err(LifecycleError::IdentityUnavailable)?,
    );
    let name = match instance_name {
        Some(name) => name,
        None => non_empty(
            tag(tags::NAME)
                .await
                .map_err(LifecycleError::IdentityUnavailable)?,
        )
        .unwrap_or_else(|| document.instance_id.clone()),
    };

    let image_tag = non_empty(
        tag(tags::IMAGE_TAG)
            .await
            .map_err(LifecycleError::IdentityUnavailable)?,
    )
    .unwrap_or_else(|| default_image_tag.to_string());

    let identity = ExecutorIdentity {
        instance_id: document.instance_id,
        region: document.region,
        account_id: document.account_id,
        name,
        image_tag,
    };

    info!(
        instance = %identity.name,
        instance_id = %identity.instance_id,
        region = %identity.region,
        image_tag = %identity.image_tag,
        "Identity resolved"
    );

    Ok(identity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_mock::StaticMetadata;

    fn policy(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            initial_delay: Duration::from_millis(1),
            timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn prefers_instance_name_tag() {
        let metadata = StaticMetadata::new("i-0abc", "us-east-1", "123456789012")
            .with_tag(tags::NAME, "fallback")
            .with_tag(tags::INSTANCE_NAME, "ai-executor-17")
            .with_tag(tags::IMAGE_TAG, "runtime-1a2b");

        let identity = resolve(&metadata, &policy(3), "latest").await.unwrap();
        assert_eq!(identity.name, "ai-executor-17");
        assert_eq!(identity.image_tag, "runtime-1a2b");
        assert_eq!(identity.account_id, "123456789012");
    }

    #[tokio::test]
    async fn falls_back_to_name_tag_then_instance_id() {
        let metadata =
            StaticMetadata::new("i-0abc", "us-east-1", "1").with_tag(tags::NAME, "named");
        let identity = resolve(&metadata, &policy(3), "latest").await.unwrap();
        assert_eq!(identity.name, "named");
        assert_eq!(identity.image_tag, "latest");

        let metadata = StaticMetadata::new("i-0abc", "us-east-1", "1")
            .with_tag(tags::INSTANCE_NAME, "  ");
        let identity = resolve(&metadata, &policy(3), "latest").await.unwrap();
        assert_eq!(identity.name, "i-0abc");
    }

    #[tokio::test]
    async fn retries_transient_failures() {
        let metadata = StaticMetadata::new("i-0abc", "us-east-1", "1").failing_transiently(2);
        let identity = resolve(&metadata, &policy(3), "latest").await.unwrap();

        assert_eq!(identity.instance_id, "i-0abc");
        assert_eq!(metadata.document_reads(), 3);
    }

    #[tokio::test]
    async fn gives_up_after_attempts() {
        let metadata = StaticMetadata::new("i-0abc", "us-east-1", "1").failing_transiently(5);
        let err = resolve(&metadata, &policy(3), "latest").await.unwrap_err();

        assert!(matches!(err, LifecycleError::IdentityUnavailable(_)));
        assert!(err.is_fatal());
        assert_eq!(metadata.document_reads(), 3);
    }

    #[test]
    fn backoff_grows() {
        let policy = RetryPolicy {
            attempts: 3,
            initial_delay: Duration::from_secs(1),
            timeout: Duration::from_secs(5),
        };
        let first = policy.delay(0);
        let second = policy.delay(1);

        assert!(first >= Duration::from_secs(1) && first < Duration::from_millis(1500));
        assert!(second >= Duration::from_secs(2) && second < Duration::from_secs(3));
    }
}
