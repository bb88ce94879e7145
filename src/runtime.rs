//! Process-wide proxy state
//!
//! `ProxyRuntime` bundles everything one bridge instance needs: the handle
//! layer, the capability catalog, the shape registry and the host heap.
//! Tests build isolated runtimes with `ProxyRuntime::new`; the embedding
//! process installs a single global one with `init`.

use crate::capability::{CapabilityCatalog, CapabilityFlags, Inspector};
use crate::config::BridgeConfig;
use crate::errors::ProxyError;
use crate::handle::{HandleLayer, RawHandle};
use crate::logging::{self, log_runtime_init};
use crate::proxy::{HostHeap, ProxyFactory, ProxyRef};
use crate::shape::{RegistryStats, ShapeRegistry};
use once_cell::sync::OnceCell;
use std::sync::Arc;

static RUNTIME: OnceCell<ProxyRuntime> = OnceCell::new();

/// Snapshot of runtime counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeStats {
    pub registry: RegistryStats,
    pub live_proxies: usize,
    pub total_proxies: u64,
}

#[derive(Debug)]
pub struct ProxyRuntime {
    config: BridgeConfig,
    factory: Arc<ProxyFactory>,
}

impl ProxyRuntime {
    /// Isolated runtime with the standard capability catalog
    pub fn new(layer: Arc<dyn HandleLayer>, config: BridgeConfig) -> Result<Self, ProxyError> {
        Self::with_catalog(layer, CapabilityCatalog::standard(), config)
    }

    /// Isolated runtime with a caller-extended catalog
    ///
    /// The registry starts with the plain shape; bitmasks listed under
    /// `registry.prewarm` are synthesized before this returns.
    pub fn with_catalog(
        layer: Arc<dyn HandleLayer>,
        catalog: CapabilityCatalog,
        config: BridgeConfig,
    ) -> Result<Self, ProxyError> {
        let catalog = Arc::new(catalog);
        let registry = Arc::new(ShapeRegistry::new(Arc::clone(&catalog), &config.registry)?);
        let heap = Arc::new(HostHeap::new(&config.heap));
        let factory = ProxyFactory::new(layer, Inspector::new(catalog), registry, heap);

        let runtime = Self { config, factory };
        runtime.prewarm()?;
        Ok(runtime)
    }

    fn prewarm(&self) -> Result<usize, ProxyError> {
        let registry = self.factory.registry();
        for bits in &self.config.registry.prewarm {
            registry.get_or_create_shape(CapabilityFlags::from_bits_retain(*bits))?;
        }
        Ok(self.config.registry.prewarm.len())
    }

    #[inline]
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    #[inline]
    pub fn factory(&self) -> &Arc<ProxyFactory> {
        &self.factory
    }

    #[inline]
    pub fn registry(&self) -> &ShapeRegistry {
        self.factory.registry()
    }

    pub fn create(&self, value: RawHandle) -> Result<ProxyRef, ProxyError> {
        self.factory.create(value)
    }

    pub fn create_with_this(
        &self,
        value: RawHandle,
        receiver: RawHandle,
    ) -> Result<ProxyRef, ProxyError> {
        self.factory.create_with_this(value, receiver)
    }

    pub fn create_with_type(
        &self,
        flags: CapabilityFlags,
        value: RawHandle,
        receiver: Option<RawHandle>,
    ) -> Result<ProxyRef, ProxyError> {
        self.factory.create_with_type(flags, value, receiver)
    }

    pub fn create_objmap(&self, value: RawHandle, objmap: bool) -> Result<ProxyRef, ProxyError> {
        self.factory.create_objmap(value, objmap)
    }

    pub fn stats(&self) -> RuntimeStats {
        let heap = self.factory.heap();
        RuntimeStats {
            registry: self.registry().stats(),
            live_proxies: heap.live(),
            total_proxies: heap.total_allocated(),
        }
    }
}

/// Install the process-wide runtime
///
/// Only the first successful call builds a runtime (and sets up logging from
/// `config.logging`); later calls return it and ignore their arguments.
pub fn init(
    layer: Arc<dyn HandleLayer>,
    config: BridgeConfig,
) -> Result<&'static ProxyRuntime, ProxyError> {
    RUNTIME.get_or_try_init(|| {
        logging::init_with_config(config.logging.to_log_config());
        let runtime = ProxyRuntime::new(layer, config)?;
        log_runtime_init(runtime.config.registry.prewarm.len());
        Ok(runtime)
    })
}

/// The process-wide runtime
pub fn global() -> Result<&'static ProxyRuntime, ProxyError> {
    RUNTIME.get().ok_or(ProxyError::NotInitialized)
}
