use std::path::Path;
use std::sync::Arc;

use futures::future::try_join_all;
use tracing::info;
use trellis_assembler::{
    Assembler, Behavior, ComponentHandle, ComponentRef, Config, Context, Instance,
};
use trellis_loader::{Fetcher, HttpFetcher, LoadSpec, Resource, ResourceLoader};
use trellis_store::{Datastore, StoreBackends, StoreRegistry, StoreSettings};

use crate::config::TrellisConfig;
use crate::error::SdkResult;

/// Entry point for applications embedding Trellis.
///
/// Owns one [`Context`]: resource cache, component registry and datastore
/// registry. Cloning is cheap and shares the context.
#[derive(Clone, Debug)]
pub struct Trellis {
    config: TrellisConfig,
    assembler: Assembler,
}

impl Trellis {
    /// HTTP fetching and the backends named by `config.store`.
    pub fn new(config: TrellisConfig) -> Self {
        Self::with_fetcher(config, Arc::new(HttpFetcher::new()))
    }

    /// Load configuration from a TOML file and fetch over HTTP.
    pub fn from_file(path: impl AsRef<Path>) -> SdkResult<Self> {
        Ok(Self::new(TrellisConfig::from_file(path)?))
    }

    /// Use `fetcher` for every resource and the configured store backends.
    pub fn with_fetcher(config: TrellisConfig, fetcher: Arc<dyn Fetcher>) -> Self {
        let backends = StoreBackends::from_config(&config.store);
        Self::with_backends(config, fetcher, backends)
    }

    pub fn with_backends(config: TrellisConfig, fetcher: Arc<dyn Fetcher>, backends: StoreBackends) -> Self {
        let loader = Arc::new(ResourceLoader::new(fetcher, config.loader.clone()));
        let stores = StoreRegistry::new(Arc::clone(&loader), backends, config.store.replay_order);
        let context = Context::new(loader, stores, config.components.replay_order);
        Self {
            config,
            assembler: Assembler::new(context),
        }
    }

    pub fn config(&self) -> &TrellisConfig {
        &self.config
    }

    /// Context shared by everything this instance builds.
    pub fn context(&self) -> &Arc<Context> {
        self.assembler.context()
    }

    pub fn assembler(&self) -> &Assembler {
        &self.assembler
    }

    pub fn define_behavior(&self, name: impl Into<String>, behavior: Arc<dyn Behavior>) {
        self.context().components().define_behavior(name, behavior);
    }

    /// Register a component (inline spec, index or manifest URL) and get a
    /// handle that builds instances over `default_config`.
    pub async fn register(
        &self,
        component: impl Into<ComponentRef>,
        default_config: Config,
    ) -> SdkResult<ComponentHandle> {
        Ok(self.assembler.register(component, default_config).await?)
    }

    /// Load every manifest listed in the configuration. Returns how many
    /// components were registered.
    pub async fn preload(&self) -> SdkResult<usize> {
        let components = self.context().components();
        let refs: Vec<ComponentRef> = self
            .config
            .components
            .manifests
            .iter()
            .map(|url| ComponentRef::Url(url.clone()))
            .collect();
        let loaded = try_join_all(refs.iter().map(|r| components.resolve(r))).await?;
        info!(components = loaded.len(), "manifests preloaded");
        Ok(loaded.len())
    }

    /// Build an instance of `component`.
    pub async fn instance(&self, component: impl Into<ComponentRef>, config: Config) -> SdkResult<Arc<Instance>> {
        Ok(self.assembler.instance(component, config).await?)
    }

    /// Build an instance of `component` and start it.
    pub async fn start(&self, component: impl Into<ComponentRef>, config: Config) -> SdkResult<Arc<Instance>> {
        Ok(self.assembler.start(component, config).await?)
    }

    /// The datastore for `settings`, shared by everything using the same
    /// signature.
    pub async fn store(&self, settings: &StoreSettings) -> SdkResult<Arc<Datastore>> {
        Ok(self.context().stores().store(settings).await?)
    }

    pub async fn load(&self, spec: impl Into<LoadSpec>) -> SdkResult<Resource> {
        Ok(self.context().loader().load(spec).await?)
    }

    /// Drop cached resources and every open datastore.
    pub fn reset(&self) {
        self.context().reset();
    }
}
