//! Host-side proxies for foreign values
//!
//! Design: a proxy is an ordinary host object whose behavior comes from its
//! shape. It owns one duplicated foreign handle (and optionally a receiver
//! handle for calls); both are released when the proxy is dropped, on every
//! path. The accessors below are the only way the rest of the bridge looks
//! inside a host value.

mod factory;
mod heap;
mod slots;


pub use factory::ProxyFactory;
pub use heap::{HeapCell, HostHeap};

use crate::capability::CapabilityFlags;
use crate::handle::ForeignHandle;
use crate::shape::ShapeRef;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Object living in the host interpreter
pub trait HostObject: Any + Send + Sync + fmt::Debug {
    /// Runtime type name as the host reports it
    fn type_name(&self) -> &str;

    fn as_any(&self) -> &dyn Any;
}

/// A value as seen by the host interpreter
#[derive(Debug, Clone)]
pub enum HostValue {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Object(Arc<dyn HostObject>),
}

impl HostValue {
    pub fn type_name(&self) -> &str {
        match self {
            Self::None => "NoneType",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::Object(obj) => obj.type_name(),
        }
    }

    #[inline]
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

impl From<ProxyRef> for HostValue {
    fn from(proxy: ProxyRef) -> Self {
        Self::Object(proxy)
    }
}

pub type ProxyRef = Arc<ForeignProxy>;

/// Host object wrapping a foreign value
pub struct ForeignProxy {
    shape: ShapeRef,
    value: ForeignHandle,
    /// Call binding: receiver used for every invocation through this proxy
    this: Option<ForeignHandle>,
    factory: Arc<ProxyFactory>,
    _cell: HeapCell,
}

impl ForeignProxy {
    #[inline]
    pub fn shape(&self) -> &ShapeRef {
        &self.shape
    }

    #[inline]
    pub fn flags(&self) -> CapabilityFlags {
        self.shape.flags()
    }

    /// The wrapped foreign value; borrowed, owned by the proxy
    #[inline]
    pub fn handle(&self) -> &ForeignHandle {
        &self.value
    }

    /// The call binding, when the proxy was created with one
    #[inline]
    pub fn this(&self) -> Option<&ForeignHandle> {
        self.this.as_ref()
    }

    #[inline]
    pub fn factory(&self) -> &Arc<ProxyFactory> {
        &self.factory
    }
}

impl HostObject for ForeignProxy {
    fn type_name(&self) -> &str {
        self.shape.name()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Debug for ForeignProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForeignProxy")
            .field("shape", &self.shape.name())
            .field("handle", &self.value.raw())
            .field("this", &self.this.as_ref().map(ForeignHandle::raw))
            .finish()
    }
}

/// True iff `value` is a proxy produced by this subsystem
///
/// Never fails; `None` and primitives are simply not proxies.
pub fn is_proxy(value: &HostValue) -> bool {
    as_proxy(value).is_some()
}

/// The proxy behind `value`, if it is one
pub fn as_proxy(value: &HostValue) -> Option<&ForeignProxy> {
    match value {
        HostValue::Object(obj) => obj.as_any().downcast_ref::<ForeignProxy>(),
        _ => None,
    }
}

/// Borrow the foreign handle wrapped by `value`
///
/// Non-proxies yield `None`. The handle stays owned by the proxy and is only
/// valid while `value` is alive.
pub fn extract_handle(value: &HostValue) -> Option<&ForeignHandle> {
    as_proxy(value).map(ForeignProxy::handle)
}
