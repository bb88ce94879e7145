//! Handle layer - the bridge's view of foreign values
//!
//! Design: the proxy core never touches foreign values directly. It talks to
//! a `HandleLayer` through opaque `RawHandle`s:
//! 1. Reference management (duplicate, release, equals)
//! 2. Structural probes used by capability detection
//! 3. Member access and invocation used by proxy slot behaviors
//!
//! `ForeignHandle` is the owning wrapper that pairs a raw handle with the
//! reference it holds. `HandleTable` is the in-process implementation.

mod owned;
mod table;

pub use owned::ForeignHandle;
pub use table::{ForeignObject, Getter, HandleTable, NativeFn, Property, Value};

use crate::errors::ForeignError;
use std::fmt;

/// Opaque identifier of a foreign value
///
/// Copying a `RawHandle` does not take a reference; only `duplicate` does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct RawHandle(u32);

impl RawHandle {
    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for RawHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Structural type tag reported by the foreign environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Undefined,
    Null,
    Boolean,
    Number,
    BigInt,
    String,
    Symbol,
    Function,
    Object,
    Array,
    TypedArray,
    ArrayBuffer,
    DataView,
    Error,
    Generator,
    AsyncGenerator,
    NodeList,
    /// Foreign wrapper around a host object travelling back to the host
    HostProxy,
}

/// Protocol symbols that are not plain string names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WellKnownSymbol {
    Iterator,
    AsyncIterator,
}

/// Member key on a foreign value
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PropertyKey {
    Named(String),
    Symbol(WellKnownSymbol),
}

impl PropertyKey {
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }

    pub fn as_name(&self) -> Option<&str> {
        match self {
            Self::Named(name) => Some(name),
            Self::Symbol(_) => None,
        }
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(name) => f.write_str(name),
            Self::Symbol(WellKnownSymbol::Iterator) => f.write_str("[Symbol.iterator]"),
            Self::Symbol(WellKnownSymbol::AsyncIterator) => f.write_str("[Symbol.asyncIterator]"),
        }
    }
}

/// Operations the bridge consumes from the foreign environment
///
/// Every handle returned by a method is a new reference owned by the caller.
/// Implementations must be safe to re-enter from inside foreign code they run
/// (getters and callables may wrap values themselves).
pub trait HandleLayer: Send + Sync {
    /// Take another reference to `handle`
    fn duplicate(&self, handle: RawHandle) -> Result<RawHandle, ForeignError>;

    /// Drop one reference to `handle`
    fn release(&self, handle: RawHandle);

    /// True iff both handles denote the same foreign value
    fn equals(&self, a: RawHandle, b: RawHandle) -> bool;

    fn type_tag(&self, handle: RawHandle) -> Result<TypeTag, ForeignError>;

    /// True iff `key` resolves to an invocable member
    fn has_method(&self, handle: RawHandle, key: &PropertyKey) -> Result<bool, ForeignError>;

    /// Value of `name` when it is a number, `None` otherwise
    fn numeric_property(&self, handle: RawHandle, name: &str) -> Result<Option<f64>, ForeignError>;

    /// Member lookup; `None` when the member is absent or undefined
    fn get_property(
        &self,
        handle: RawHandle,
        key: &PropertyKey,
    ) -> Result<Option<RawHandle>, ForeignError>;

    /// Store `value` under `key`; the layer takes its own reference
    fn set_property(
        &self,
        handle: RawHandle,
        key: &PropertyKey,
        value: RawHandle,
    ) -> Result<(), ForeignError>;

    /// Remove `key`; returns whether it existed
    fn delete_property(&self, handle: RawHandle, key: &PropertyKey) -> Result<bool, ForeignError>;

    /// Own string-keyed member names, in the layer's enumeration order
    fn own_keys(&self, handle: RawHandle) -> Result<Vec<String>, ForeignError>;

    /// Call `func` with `this` as receiver
    fn invoke(
        &self,
        func: RawHandle,
        this: Option<RawHandle>,
        args: &[RawHandle],
    ) -> Result<RawHandle, ForeignError>;
}
