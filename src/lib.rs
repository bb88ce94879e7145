//! Foreign proxy - host-native objects backed by foreign runtime values
//!
//! A foreign value is inspected once for the protocols it supports, the
//! resulting capability bitmask selects (or synthesizes) a cached shape, and
//! a proxy of that shape takes a duplicated handle to the value. The proxy
//! gives the handle back when it is dropped.

pub mod capability;
pub mod config;
pub mod errors;
pub mod handle;
pub mod logging;
pub mod proxy;
pub mod runtime;
pub mod shape;

// Re-export commonly used items
pub use capability::{CapabilityCatalog, CapabilityDef, CapabilityFlags, Inspector, Probe};
pub use config::BridgeConfig;
pub use errors::{ForeignError, ProxyError};
pub use handle::{ForeignHandle, HandleLayer, HandleTable, PropertyKey, RawHandle, TypeTag};
pub use proxy::{
    as_proxy, extract_handle, is_proxy, ForeignProxy, HostObject, HostValue, ProxyFactory, ProxyRef,
};
pub use runtime::{global, init, ProxyRuntime, RuntimeStats};
pub use shape::{Shape, ShapeRef, ShapeRegistry, SlotSet};
