//! Proxy factory - foreign value to host proxy
//!
//! Pipeline: inspect, resolve shape, duplicate handles, reserve host memory,
//! build. Every resource taken along the way is owned by an RAII value, so
//! a failure at any step releases what earlier steps took and no partial
//! proxy escapes. No lock is held while foreign code runs: probes may
//! re-enter the factory.

use super::{ForeignProxy, HostHeap, ProxyRef};
use crate::capability::{CapabilityFlags, Inspector};
use crate::errors::ProxyError;
use crate::handle::{ForeignHandle, HandleLayer, RawHandle};
use crate::logging::{log_proxy_created, log_wrap_failed};
use crate::shape::{ShapeRef, ShapeRegistry};
use std::fmt;
use std::sync::Arc;

pub struct ProxyFactory {
    layer: Arc<dyn HandleLayer>,
    inspector: Inspector,
    registry: Arc<ShapeRegistry>,
    heap: Arc<HostHeap>,
}

impl ProxyFactory {
    pub fn new(
        layer: Arc<dyn HandleLayer>,
        inspector: Inspector,
        registry: Arc<ShapeRegistry>,
        heap: Arc<HostHeap>,
    ) -> Arc<Self> {
        Arc::new(Self {
            layer,
            inspector,
            registry,
            heap,
        })
    }

    #[inline]
    pub fn layer(&self) -> &Arc<dyn HandleLayer> {
        &self.layer
    }

    #[inline]
    pub fn inspector(&self) -> &Inspector {
        &self.inspector
    }

    #[inline]
    pub fn registry(&self) -> &Arc<ShapeRegistry> {
        &self.registry
    }

    #[inline]
    pub fn heap(&self) -> &Arc<HostHeap> {
        &self.heap
    }

    /// Capability bitmask of `value`
    pub fn compute_capabilities(&self, value: RawHandle) -> Result<CapabilityFlags, ProxyError> {
        self.inspector.compute_capabilities(&*self.layer, value)
    }

    /// Wrap `value` in a proxy of the shape its capabilities call for
    pub fn create(self: &Arc<Self>, value: RawHandle) -> Result<ProxyRef, ProxyError> {
        self.wrap(value, None, None, None)
    }

    /// Wrap `value` with `receiver` as the call binding
    pub fn create_with_this(
        self: &Arc<Self>,
        value: RawHandle,
        receiver: RawHandle,
    ) -> Result<ProxyRef, ProxyError> {
        self.wrap(value, Some(receiver), None, None)
    }

    /// Wrap `value` using a caller-chosen bitmask instead of inspecting it
    pub fn create_with_type(
        self: &Arc<Self>,
        flags: CapabilityFlags,
        value: RawHandle,
        receiver: Option<RawHandle>,
    ) -> Result<ProxyRef, ProxyError> {
        self.wrap(value, receiver, Some(flags), None)
    }

    /// Wrap `value`; with `objmap` set the proxy also offers string-keyed
    /// mapping access over the value's own members
    pub fn create_objmap(
        self: &Arc<Self>,
        value: RawHandle,
        objmap: bool,
    ) -> Result<ProxyRef, ProxyError> {
        let mut flags = self.compute_capabilities(value).map_err(|err| wrap_failed(value, err))?;
        if objmap {
            flags |= CapabilityFlags::OBJECT_MAP;
        }
        self.create_with_type(flags, value, None)
    }

    /// Wrap `value` with known capabilities, reusing `hint` as the shape
    /// when it matches
    pub(crate) fn create_with_hint(
        self: &Arc<Self>,
        hint: &ShapeRef,
        value: RawHandle,
        receiver: Option<RawHandle>,
    ) -> Result<ProxyRef, ProxyError> {
        self.wrap(value, receiver, Some(hint.flags()), Some(hint))
    }

    fn wrap(
        self: &Arc<Self>,
        value: RawHandle,
        receiver: Option<RawHandle>,
        flags: Option<CapabilityFlags>,
        hint: Option<&ShapeRef>,
    ) -> Result<ProxyRef, ProxyError> {
        self.try_wrap(value, receiver, flags, hint)
            .map_err(|err| wrap_failed(value, err))
    }

    fn try_wrap(
        self: &Arc<Self>,
        value: RawHandle,
        receiver: Option<RawHandle>,
        flags: Option<CapabilityFlags>,
        hint: Option<&ShapeRef>,
    ) -> Result<ProxyRef, ProxyError> {
        let flags = match flags {
            Some(flags) => flags,
            None => self.compute_capabilities(value)?,
        };

        let shape = match hint {
            Some(hint) => self.registry.get_or_create_shape_with_hint(flags, hint)?,
            None => self.registry.get_or_create_shape(flags)?,
        };

        let value = ForeignHandle::duplicate(&self.layer, value)?;
        let this = receiver
            .map(|receiver| ForeignHandle::duplicate(&self.layer, receiver))
            .transpose()?;
        let cell = self.heap.reserve()?;

        log_proxy_created(shape.name(), value.raw(), this.is_some());

        Ok(Arc::new(ForeignProxy {
            shape,
            value,
            this,
            factory: Arc::clone(self),
            _cell: cell,
        }))
    }
}

fn wrap_failed(value: RawHandle, err: ProxyError) -> ProxyError {
    log_wrap_failed(value, &err.to_string());
    err
}

impl fmt::Debug for ProxyFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyFactory")
            .field("registry", &self.registry)
            .field("live_proxies", &self.heap.live())
            .finish()
    }
}
