use std::fmt;
use std::sync::Arc;

use tracing::info;
use trellis_loader::{Fetcher, LoaderConfig, ResourceLoader};
use trellis_store::{StoreBackends, StoreRegistry};
use trellis_types::ReplayOrder;

use crate::registry::ComponentRegistry;

/// Everything an assembly shares: the resource loader, the component
/// registry and the datastore registry.
pub struct Context {
    loader: Arc<ResourceLoader>,
    components: ComponentRegistry,
    stores: Arc<StoreRegistry>,
}

impl Context {
    /// Create a context over an existing loader and store registry.
    pub fn new(loader: Arc<ResourceLoader>, stores: Arc<StoreRegistry>, replay_order: ReplayOrder) -> Arc<Self> {
        Arc::new(Self {
            components: ComponentRegistry::new(Arc::clone(&loader), replay_order),
            loader,
            stores,
        })
    }

    /// A context with default loader settings and in-memory store backends.
    pub fn with_fetcher(fetcher: Arc<dyn Fetcher>) -> Arc<Self> {
        let loader = Arc::new(ResourceLoader::new(fetcher, LoaderConfig::default()));
        let stores = StoreRegistry::new(Arc::clone(&loader), StoreBackends::default(), ReplayOrder::default());
        Self::new(loader, stores, ReplayOrder::default())
    }

    /// Loader for `load` dependencies and component manifests.
    pub fn loader(&self) -> &Arc<ResourceLoader> {
        &self.loader
    }

    /// Registry of component definitions and named behaviors.
    pub fn components(&self) -> &ComponentRegistry {
        &self.components
    }

    /// Registry of shared datastores.
    pub fn stores(&self) -> &Arc<StoreRegistry> {
        &self.stores
    }

    /// Forget cached resources and open datastores. Registered components
    /// stay registered.
    pub fn reset(&self) {
        self.loader.reset();
        self.stores.reset();
        info!("context reset");
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("resources", &self.loader.cache_len())
            .field("components", &self.components.len())
            .field("stores", &self.stores.len())
            .finish()
    }
}
