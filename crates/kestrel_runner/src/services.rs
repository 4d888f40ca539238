use kestrel_core::prelude::*;

/// The default [`RunnerServices`] bundle: one value per backend.
#[derive(Clone)]
pub struct CoreServices<M, S, R, G, N, H> {
    pub metadata: M,
    pub store: S,
    pub runtime: R,
    pub registry: G,
    pub notifier: N,
    pub host: H,
}

impl<M, S, R, G, N, H> RunnerServices for CoreServices<M, S, R, G, N, H>
where
    M: MetadataSource,
    S: ObjectStore,
    R: TaskRuntime,
    G: RegistryAuth,
    N: Notifier,
    H: HostControl,
{
    type Metadata = M;
    type Store = S;
    type Runtime = R;
    type Registry = G;
    type Notifier = N;
    type Host = H;

    fn metadata(&self) -> &M {
        &self.metadata
    }
    fn store(&self) -> &S {
        &self.store
    }
    fn runtime(&self) -> &R {
        &self.runtime
    }
    fn registry(&self) -> &G {
        &self.registry
    }
    fn notifier(&self) -> &N {
        &self.notifier
    }
    fn host(&self) -> &H {
        &self.host
    }
}
