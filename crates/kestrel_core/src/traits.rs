use crate::error::*;
use crate::identity::IdentityDocument;
use crate::status::StatusEvent;
use crate::task::{LogOutput, RegistryCredentials, TaskInvocation};

use bytes::Bytes;
use futures::stream::BoxStream;

/// A trait for injecting the instance metadata service.
pub trait MetadataSource: Send + Sync + 'static + Clone {
    /// Reads the instance identity document (instance id, region, account).
    fn identity_document(
        &self,
    ) -> impl Future<Output = Result<IdentityDocument, MetadataError>> + Send;

    /// Reads a single instance tag. `Ok(None)` when the tag is not set.
    fn tag(&self, key: &str) -> impl Future<Output = Result<Option<String>, MetadataError>> + Send;
}

/// A trait for injecting durable object storage.
///
/// Containers are buckets (or directories); keys are flat object names.
pub trait ObjectStore: Send + Sync + 'static + Clone {
    /// Creates the container if it does not exist. An existing container is success.
    fn ensure_container(
        &self,
        container: &str,
    ) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// Reads an object. Missing objects are [`StorageError::NotFound`].
    fn get(
        &self,
        container: &str,
        key: &str,
    ) -> impl Future<Output = Result<Bytes, StorageError>> + Send;

    /// Writes an object, replacing any previous content.
    fn put(
        &self,
        container: &str,
        key: &str,
        data: Bytes,
        content_type: &str,
    ) -> impl Future<Output = Result<(), StorageError>> + Send;
}

/// A trait for injecting the isolated execution runtime.
pub trait TaskRuntime: Send + Sync + 'static + Clone {
    /// Checks the runtime is reachable.
    fn init(&self) -> impl Future<Output = Result<(), RuntimeError>> + Send;

    /// Pulls the image, logging in with `credentials` if given.
    fn pull(
        &self,
        image: &str,
        credentials: Option<RegistryCredentials>,
    ) -> impl Future<Output = Result<(), RuntimeError>> + Send;

    /// Creates and starts the container. Returns its id.
    fn start(
        &self,
        invocation: &TaskInvocation,
    ) -> impl Future<Output = Result<String, RuntimeError>> + Send;

    /// Follows the container's stdout/stderr from the beginning.
    fn attach(
        &self,
        id: &str,
    ) -> impl Future<
        Output = Result<BoxStream<'static, Result<LogOutput, RuntimeError>>, RuntimeError>,
    > + Send;

    /// Blocks until the container exits and returns its own exit code.
    fn wait(&self, id: &str) -> impl Future<Output = Result<i64, RuntimeError>> + Send;

    /// Force-kills the container.
    fn kill(&self, id: &str) -> impl Future<Output = Result<(), RuntimeError>> + Send;

    /// Removes the container.
    fn remove(&self, id: &str) -> impl Future<Output = Result<(), RuntimeError>> + Send;
}

/// A trait for resolving registry credentials for the task image.
pub trait RegistryAuth: Send + Sync + 'static + Clone {
    /// `Ok(None)` means pull anonymously.
    fn credentials(
        &self,
        registry: &str,
    ) -> impl Future<Output = Result<Option<RegistryCredentials>, RuntimeError>> + Send;
}

/// A trait for the external notification sink. Callers treat every error as best effort.
pub trait Notifier: Send + Sync + 'static + Clone {
    fn notify(&self, event: StatusEvent) -> impl Future<Output = Result<(), NotifyError>> + Send;
}

/// A trait for asking the host to power off.
pub trait HostControl: Send + Sync + 'static + Clone {
    fn request_shutdown(&self) -> impl Future<Output = Result<(), std::io::Error>> + Send;
}

/// Bundles the backends the runner is built from.
pub trait RunnerServices: Send + Sync + 'static + Clone {
    type Metadata: MetadataSource;
    type Store: ObjectStore;
    type Runtime: TaskRuntime;
    type Registry: RegistryAuth;
    type Notifier: Notifier;
    type Host: HostControl;

    fn metadata(&self) -> &Self::Metadata;
    fn store(&self) -> &Self::Store;
    fn runtime(&self) -> &Self::Runtime;
    fn registry(&self) -> &Self::Registry;
    fn notifier(&self) -> &Self::Notifier;
    fn host(&self) -> &Self::Host;
}
