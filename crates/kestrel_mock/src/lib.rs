//! # Kestrel Mock
//!
//! In-memory backends for tests and local dry runs. Every backend records what
//! it was asked to do and can be told to fail.
//!
//! **Nothing here talks to a real cloud or container runtime.**
//!
//! ## Usage
//!
//! ```rust
//! # use kestrel_mock::*;
//! # use kestrel_core::prelude::*;
//! # fn main() {
//! let metadata = StaticMetadata::new("i-0abc", "us-east-1", "123456789012")
//!     .with_tag(tags::TASK_PROMPT, "find the price of a kettle");
//! let store = MemoryStore::new();
//! let runtime = ScriptedRuntime::exiting(0).with_line(LogSource::Stdout, "done\n");
//! # }
//! ```

use bytes::Bytes;
use futures::{StreamExt, stream::BoxStream};
use kestrel_core::prelude::*;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Metadata with a fixed identity document and tag set.
#[derive(Clone)]
pub struct StaticMetadata {
    document: Option<IdentityDocument>,
    tags: HashMap<String, String>,
    failing_tags: HashSet<String>,
    transient_failures: Arc<AtomicUsize>,
    document_reads: Arc<AtomicUsize>,
}

impl StaticMetadata {
    pub fn new(instance_id: &str, region: &str, account_id: &str) -> Self {
        Self {
            document: Some(IdentityDocument {
                instance_id: instance_id.into(),
                region: region.into(),
                account_id: account_id.into(),
            }),
            tags: HashMap::new(),
            failing_tags: HashSet::new(),
            transient_failures: Arc::new(AtomicUsize::new(0)),
            document_reads: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A metadata service that never answers.
    pub fn unreachable() -> Self {
        Self {
            document: None,
            ..Self::new("", "", "")
        }
    }

    pub fn with_tag(mut self, key: &str, value: &str) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Every read of tag `key` fails with [`MetadataError::Unreachable`].
    pub fn failing_tag(mut self, key: &str) -> Self {
        self.failing_tags.insert(key.into());
        self
    }

    /// The next `n` identity document reads fail with [`MetadataError::Unreachable`].
    pub fn failing_transiently(self, n: usize) -> Self {
        self.transient_failures.store(n, Ordering::SeqCst);
        self
    }

    pub fn document_reads(&self) -> usize {
        self.document_reads.load(Ordering::SeqCst)
    }
}

impl MetadataSource for StaticMetadata {
    async fn identity_document(&self) -> Result<IdentityDocument, MetadataError> {
        self.document_reads.fetch_add(1, Ordering::SeqCst);

        let failing = self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(MetadataError::Unreachable("injected failure".into()));
        }

        self.document
            .clone()
            .ok_or_else(|| MetadataError::Unreachable("metadata service unreachable".into()))
    }

    async fn tag(&self, key: &str) -> Result<Option<String>, MetadataError> {
        if self.document.is_none() {
            return Err(MetadataError::Unreachable("metadata service unreachable".into()));
        }
        if self.failing_tags.contains(key) {
            return Err(MetadataError::Unreachable(format!("injected failure reading {key}")));
        }
        Ok(self.tags.get(key).cloned())
    }
}

#[derive(Default)]
struct StoreState {
    containers: HashSet<String>,
    objects: HashMap<(String, String), Bytes>,
    history: HashMap<(String, String), Vec<Bytes>>,
    failing_gets: HashSet<String>,
    failing_puts: HashMap<String, usize>,
    stalling_puts: HashMap<String, usize>,
    ensure_calls: usize,
}

/// An [`ObjectStore`] held in memory. Writes into a missing container fail the
/// way S3 does.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds an object, creating its container.
    pub fn with_object(self, container: &str, key: &str, data: impl Into<Bytes>) -> Self {
        {
            let mut state = lock(&self.state);
            state.containers.insert(container.into());
            state
                .objects
                .insert((container.to_string(), key.to_string()), data.into());
        }
        self
    }

    pub fn with_container(self, container: &str) -> Self {
        lock(&self.state).containers.insert(container.into());
        self
    }

    /// Every read of `key` fails with a system error.
    pub fn failing_get(self, key: &str) -> Self {
        lock(&self.state).failing_gets.insert(key.into());
        self
    }

    /// The next `times` writes of `key` fail with a system error.
    pub fn failing_put(self, key: &str, times: usize) -> Self {
        lock(&self.state).failing_puts.insert(key.into(), times);
        self
    }

    /// After `succeeding` writes of `key`, every further write never completes.
    pub fn stalling_put(self, key: &str, succeeding: usize) -> Self {
        lock(&self.state)
            .stalling_puts
            .insert(key.into(), succeeding);
        self
    }

    pub fn object(&self, container: &str, key: &str) -> Option<Bytes> {
        lock(&self.state)
            .objects
            .get(&(container.to_string(), key.to_string()))
            .cloned()
    }

    /// Every successful write of `key`, oldest first.
    pub fn history(&self, container: &str, key: &str) -> Vec<Bytes> {
        lock(&self.state)
            .history
            .get(&(container.to_string(), key.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    pub fn has_container(&self, container: &str) -> bool {
        lock(&self.state).containers.contains(container)
    }

    pub fn ensure_calls(&self) -> usize {
        lock(&self.state).ensure_calls
    }
}

impl ObjectStore for MemoryStore {
    async fn ensure_container(&self, container: &str) -> Result<(), StorageError> {
        let mut state = lock(&self.state);
        state.ensure_calls += 1;
        state.containers.insert(container.into());
        Ok(())
    }

    async fn get(&self, container: &str, key: &str) -> Result<Bytes, StorageError> {
        let state = lock(&self.state);
        if state.failing_gets.contains(key) {
            return Err(StorageError::System(format!("injected read failure: {key}")));
        }
        state
            .objects
            .get(&(container.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("{container}/{key}")))
    }

    async fn put(
        &self,
        container: &str,
        key: &str,
        data: Bytes,
        _content_type: &str,
    ) -> Result<(), StorageError> {
        let stall = {
            let mut state = lock(&self.state);
            match state.stalling_puts.get_mut(key) {
                Some(0) => true,
                Some(remaining) => {
                    *remaining -= 1;
                    false
                }
                None => false,
            }
        };
        if stall {
            std::future::pending::<()>().await;
        }

        let mut state = lock(&self.state);

        if let Some(remaining) = state.failing_puts.get_mut(key) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(StorageError::System(format!("injected write failure: {key}")));
            }
        }

        if !state.containers.contains(container) {
            return Err(StorageError::NotFound(container.to_string()));
        }

        let id = (container.to_string(), key.to_string());
        state.history.entry(id.clone()).or_default().push(data.clone());
        state.objects.insert(id, data);
        Ok(())
    }
}

#[derive(Clone)]
struct Script {
    exit_code: i64,
    lines: Vec<LogOutput>,
    result: Option<Bytes>,
    pull_error: Option<String>,
    start_error: Option<String>,
    hang: bool,
}

#[derive(Default)]
struct RuntimeRecord {
    pulls: Vec<(String, Option<RegistryCredentials>)>,
    invocations: Vec<TaskInvocation>,
    killed: Vec<String>,
    removed: Vec<String>,
}

/// A [`TaskRuntime`] that plays back a fixed script instead of running a container.
///
/// On start it writes the scripted result file into the invocation's working
/// directory, the way a real task would through its bind mount.
#[derive(Clone)]
pub struct ScriptedRuntime {
    script: Arc<Script>,
    record: Arc<Mutex<RuntimeRecord>>,
    killed: Arc<Notify>,
}

impl ScriptedRuntime {
    pub fn exiting(exit_code: i64) -> Self {
        Self {
            script: Arc::new(Script {
                exit_code,
                lines: Vec::new(),
                result: None,
                pull_error: None,
                start_error: None,
                hang: false,
            }),
            record: Arc::default(),
            killed: Arc::new(Notify::new()),
        }
    }

    /// Runs until killed. A kill reports exit code 137.
    pub fn hanging() -> Self {
        let mut runtime = Self::exiting(137);
        Arc::make_mut(&mut runtime.script).hang = true;
        runtime
    }

    pub fn with_line(mut self, source: LogSource, message: &str) -> Self {
        Arc::make_mut(&mut self.script).lines.push(LogOutput {
            source,
            message: message.into(),
        });
        self
    }

    pub fn with_result(mut self, bytes: impl Into<Bytes>) -> Self {
        Arc::make_mut(&mut self.script).result = Some(bytes.into());
        self
    }

    pub fn failing_pull(mut self, reason: &str) -> Self {
        Arc::make_mut(&mut self.script).pull_error = Some(reason.into());
        self
    }

    pub fn failing_start(mut self, reason: &str) -> Self {
        Arc::make_mut(&mut self.script).start_error = Some(reason.into());
        self
    }

    pub fn pulls(&self) -> Vec<String> {
        lock(&self.record)
            .pulls
            .iter()
            .map(|(image, _)| image.clone())
            .collect()
    }

    /// The credentials handed to each pull, in order.
    pub fn pull_credentials(&self) -> Vec<Option<RegistryCredentials>> {
        lock(&self.record)
            .pulls
            .iter()
            .map(|(_, c)| c.clone())
            .collect()
    }

    pub fn invocations(&self) -> Vec<TaskInvocation> {
        lock(&self.record).invocations.clone()
    }

    pub fn killed(&self) -> Vec<String> {
        lock(&self.record).killed.clone()
    }

    pub fn removed(&self) -> Vec<String> {
        lock(&self.record).removed.clone()
    }
}

impl TaskRuntime for ScriptedRuntime {
    async fn init(&self) -> Result<(), RuntimeError> {
        Ok(())
    }

    async fn pull(
        &self,
        image: &str,
        credentials: Option<RegistryCredentials>,
    ) -> Result<(), RuntimeError> {
        lock(&self.record)
            .pulls
            .push((image.to_string(), credentials));

        match &self.script.pull_error {
            Some(reason) => Err(RuntimeError::Pull(format!("{image}: {reason}"))),
            None => Ok(()),
        }
    }

    async fn start(&self, invocation: &TaskInvocation) -> Result<String, RuntimeError> {
        if let Some(reason) = &self.script.start_error {
            return Err(RuntimeError::Start(reason.clone()));
        }

        if let Some(result) = &self.script.result {
            let path = invocation.workdir.join(keys::RESULT_FILE);
            tokio::fs::write(&path, result)
                .await
                .map_err(|e| RuntimeError::Start(format!("{}: {e}", path.display())))?;
        }

        let mut record = lock(&self.record);
        record.invocations.push(invocation.clone());
        Ok(format!("scripted-{}", record.invocations.len()))
    }

    async fn attach(
        &self,
        _id: &str,
    ) -> Result<BoxStream<'static, Result<LogOutput, RuntimeError>>, RuntimeError> {
        let lines = self.script.lines.clone();
        Ok(futures::stream::iter(lines.into_iter().map(Ok)).boxed())
    }

    async fn wait(&self, _id: &str) -> Result<i64, RuntimeError> {
        if self.script.hang {
            self.killed.notified().await;
        }
        Ok(self.script.exit_code)
    }

    async fn kill(&self, id: &str) -> Result<(), RuntimeError> {
        lock(&self.record).killed.push(id.to_string());
        self.killed.notify_waiters();
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), RuntimeError> {
        lock(&self.record).removed.push(id.to_string());
        Ok(())
    }
}

/// Pulls every image without credentials.
#[derive(Clone, Copy, Debug, Default)]
pub struct AnonymousRegistry;

impl RegistryAuth for AnonymousRegistry {
    async fn credentials(
        &self,
        _registry: &str,
    ) -> Result<Option<RegistryCredentials>, RuntimeError> {
        Ok(None)
    }
}

/// Hands out the same login for every registry.
#[derive(Clone, Debug)]
pub struct StaticRegistry {
    username: String,
    password: String,
}

impl StaticRegistry {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl RegistryAuth for StaticRegistry {
    async fn credentials(
        &self,
        registry: &str,
    ) -> Result<Option<RegistryCredentials>, RuntimeError> {
        Ok(Some(RegistryCredentials {
            username: self.username.clone(),
            password: SecretString::new(self.password.clone()),
            server: format!("https://{registry}"),
        }))
    }
}

/// Keeps every event it is handed. Optionally rejects them all after recording.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    events: Arc<Mutex<Vec<StatusEvent>>>,
    reject: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting() -> Self {
        Self {
            reject: true,
            ..Self::default()
        }
    }

    pub fn events(&self) -> Vec<StatusEvent> {
        lock(&self.events).clone()
    }

    pub fn statuses(&self) -> Vec<Status> {
        lock(&self.events).iter().map(|e| e.status).collect()
    }

    pub fn count(&self, status: Status) -> usize {
        lock(&self.events)
            .iter()
            .filter(|e| e.status == status)
            .count()
    }

    pub fn find(&self, status: Status) -> Option<StatusEvent> {
        lock(&self.events)
            .iter()
            .find(|e| e.status == status)
            .cloned()
    }
}

impl Notifier for RecordingNotifier {
    async fn notify(&self, event: StatusEvent) -> Result<(), NotifyError> {
        lock(&self.events).push(event);
        if self.reject {
            return Err(NotifyError::Rejected(500));
        }
        Ok(())
    }
}

/// Counts shutdown requests instead of powering anything off.
#[derive(Clone, Default)]
pub struct RecordingHost {
    requests: Arc<AtomicUsize>,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shutdown_requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl HostControl for RecordingHost {
    async fn request_shutdown(&self) -> Result<(), std::io::Error> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_requires_container() {
        let store = MemoryStore::new();
        let err = store
            .put("logs", "a.log", Bytes::from_static(b"x"), "text/plain")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));

        store.ensure_container("logs").await.unwrap();
        store
            .put("logs", "a.log", Bytes::from_static(b"x"), "text/plain")
            .await
            .unwrap();
        assert_eq!(store.history("logs", "a.log").len(), 1);
    }

    #[tokio::test]
    async fn transient_metadata_failures_run_out() {
        let metadata = StaticMetadata::new("i-1", "us-east-1", "1").failing_transiently(2);
        assert!(metadata.identity_document().await.is_err());
        assert!(metadata.identity_document().await.is_err());
        assert!(metadata.identity_document().await.is_ok());
        assert_eq!(metadata.document_reads(), 3);
    }
}
