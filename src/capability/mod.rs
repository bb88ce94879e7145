//! Capability catalog - which protocols a foreign value can expose
//!
//! Design: one bit per independently detectable capability. The catalog is
//! an ordered registry: each entry names its bit, how to probe for it, which
//! earlier results gate the probe, and the host slots a proxy needs for it.
//! Adding a capability takes a fresh bit and never changes existing shapes.

mod inspect;

pub use inspect::Inspector;

use crate::errors::{ForeignError, ProxyError};
use crate::handle::{HandleLayer, PropertyKey, RawHandle, TypeTag, WellKnownSymbol};
use crate::shape::SlotSet;
use std::fmt;
use std::sync::Arc;

bitflags::bitflags! {
    /// Capability bitmask of a foreign value
    ///
    /// Bits outside the named set are allowed: they belong to capabilities
    /// registered at runtime.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    pub struct CapabilityFlags: u32 {
        const CALLABLE = 1 << 0;
        const HAS_LENGTH = 1 << 1;
        const HAS_GET = 1 << 2;
        const HAS_SET = 1 << 3;
        const HAS_HAS = 1 << 4;
        const HAS_INCLUDES = 1 << 5;
        const ITERABLE = 1 << 6;
        const ASYNC_ITERABLE = 1 << 7;
        const ITERATOR = 1 << 8;
        const ASYNC_ITERATOR = 1 << 9;
        const AWAITABLE = 1 << 10;
        const BUFFER = 1 << 11;
        const ARRAY = 1 << 12;
        const TYPED_ARRAY = 1 << 13;
        const NODE_LIST = 1 << 14;
        const GENERATOR = 1 << 15;
        const ASYNC_GENERATOR = 1 << 16;
        const ERROR = 1 << 17;
        const DOUBLE_PROXY = 1 << 18;
        /// Never detected; requested through `create_objmap`
        const OBJECT_MAP = 1 << 19;

        const _ = !0;
    }
}

/// Custom probe: `(layer, value, capabilities detected so far)`
pub type ProbeFn = Arc<
    dyn Fn(&dyn HandleLayer, RawHandle, CapabilityFlags) -> Result<bool, ForeignError>
        + Send
        + Sync,
>;

/// How a capability is detected
#[derive(Clone)]
pub enum Probe {
    /// Type tag is one of the listed tags
    Tag(&'static [TypeTag]),
    /// Member resolves to something invocable
    Method(PropertyKey),
    /// Any of the named members holds a number
    NumericProperty(&'static [&'static str]),
    Custom(ProbeFn),
    /// Not probed; only set by callers choosing the bitmask
    Explicit,
}

impl Probe {
    pub fn custom<F>(probe: F) -> Self
    where
        F: Fn(&dyn HandleLayer, RawHandle, CapabilityFlags) -> Result<bool, ForeignError>
            + Send
            + Sync
            + 'static,
    {
        Self::Custom(Arc::new(probe))
    }
}

impl fmt::Debug for Probe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tag(tags) => f.debug_tuple("Tag").field(tags).finish(),
            Self::Method(key) => f.debug_tuple("Method").field(key).finish(),
            Self::NumericProperty(names) => f.debug_tuple("NumericProperty").field(names).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
            Self::Explicit => f.write_str("Explicit"),
        }
    }
}

/// One catalog entry
#[derive(Debug, Clone)]
pub struct CapabilityDef {
    pub flag: CapabilityFlags,
    pub name: &'static str,
    pub probe: Probe,
    /// Probe only runs when all of these were already detected
    pub requires: CapabilityFlags,
    /// Probe is skipped when any of these were already detected
    pub excludes: CapabilityFlags,
    /// Host slots a proxy with this capability installs
    pub slots: SlotSet,
    /// Shape name contributed by this capability, if any
    pub type_name: Option<&'static str>,
}

impl CapabilityDef {
    pub fn new(flag: CapabilityFlags, name: &'static str, probe: Probe, slots: SlotSet) -> Self {
        Self {
            flag,
            name,
            probe,
            requires: CapabilityFlags::empty(),
            excludes: CapabilityFlags::empty(),
            slots,
            type_name: None,
        }
    }

    pub fn requires(mut self, flags: CapabilityFlags) -> Self {
        self.requires = flags;
        self
    }

    pub fn excludes(mut self, flags: CapabilityFlags) -> Self {
        self.excludes = flags;
        self
    }

    pub fn type_name(mut self, name: &'static str) -> Self {
        self.type_name = Some(name);
        self
    }

    /// Whether earlier results allow this probe to run
    #[inline]
    pub fn applicable(&self, detected: CapabilityFlags) -> bool {
        detected.contains(self.requires) && !detected.intersects(self.excludes)
    }
}

/// Ordered capability registry; order is probe order
#[derive(Debug, Clone, Default)]
pub struct CapabilityCatalog {
    defs: Vec<CapabilityDef>,
}

impl CapabilityCatalog {
    pub fn empty() -> Self {
        Self::default()
    }

    /// The built-in capability set, in probe order
    pub fn standard() -> Self {
        use CapabilityFlags as C;

        let method = |name: &str| Probe::Method(PropertyKey::named(name));
        let iterator_key = PropertyKey::named("next");
        let async_iterator_key = iterator_key.clone();

        let defs = vec![
            CapabilityDef::new(
                C::CALLABLE,
                "callable",
                Probe::Tag(&[TypeTag::Function]),
                SlotSet::CALL | SlotSet::DESCR_GET,
            )
            .type_name("ForeignCallable"),
            // A function's `length` is its arity, so only `size` counts for callables
            CapabilityDef::new(
                C::HAS_LENGTH,
                "has_length",
                Probe::custom(|layer, handle, detected| {
                    if layer.numeric_property(handle, "size")?.is_some() {
                        return Ok(true);
                    }
                    Ok(!detected.contains(C::CALLABLE)
                        && layer.numeric_property(handle, "length")?.is_some())
                }),
                SlotSet::LENGTH,
            ),
            CapabilityDef::new(C::HAS_GET, "has_get", method("get"), SlotSet::GET_ITEM)
                .type_name("ForeignMap"),
            CapabilityDef::new(
                C::HAS_SET,
                "has_set",
                method("set"),
                SlotSet::SET_ITEM | SlotSet::DEL_ITEM,
            ),
            CapabilityDef::new(C::HAS_HAS, "has_has", method("has"), SlotSet::CONTAINS),
            CapabilityDef::new(
                C::HAS_INCLUDES,
                "has_includes",
                method("includes"),
                SlotSet::CONTAINS,
            ),
            CapabilityDef::new(
                C::ITERABLE,
                "iterable",
                Probe::Method(PropertyKey::Symbol(WellKnownSymbol::Iterator)),
                SlotSet::ITER,
            )
            .type_name("ForeignIterable"),
            CapabilityDef::new(
                C::ASYNC_ITERABLE,
                "async_iterable",
                Probe::Method(PropertyKey::Symbol(WellKnownSymbol::AsyncIterator)),
                SlotSet::AITER,
            ),
            // `next` makes a sync iterator unless the value is only async-iterable
            CapabilityDef::new(
                C::ITERATOR,
                "iterator",
                Probe::custom(move |layer, handle, detected| {
                    let sync_side =
                        detected.contains(C::ITERABLE) || !detected.contains(C::ASYNC_ITERABLE);
                    Ok(sync_side && layer.has_method(handle, &iterator_key)?)
                }),
                SlotSet::ITER | SlotSet::NEXT,
            )
            .type_name("ForeignIterator"),
            CapabilityDef::new(
                C::ASYNC_ITERATOR,
                "async_iterator",
                Probe::custom(move |layer, handle, detected| {
                    let async_side =
                        detected.contains(C::ASYNC_ITERABLE) || !detected.contains(C::ITERABLE);
                    Ok(async_side && layer.has_method(handle, &async_iterator_key)?)
                }),
                SlotSet::AITER | SlotSet::ANEXT,
            )
            .type_name("ForeignAsyncIterator"),
            CapabilityDef::new(C::AWAITABLE, "awaitable", method("then"), SlotSet::AWAIT)
                .type_name("ForeignPromise"),
            CapabilityDef::new(
                C::BUFFER,
                "buffer",
                Probe::Tag(&[TypeTag::ArrayBuffer, TypeTag::TypedArray]),
                SlotSet::BUFFER,
            )
            .type_name("ForeignBuffer"),
            CapabilityDef::new(
                C::ARRAY,
                "array",
                Probe::Tag(&[TypeTag::Array]),
                SlotSet::GET_ITEM | SlotSet::SET_ITEM | SlotSet::DEL_ITEM | SlotSet::CONTAINS,
            )
            .type_name("ForeignArray"),
            CapabilityDef::new(
                C::TYPED_ARRAY,
                "typed_array",
                Probe::Tag(&[TypeTag::TypedArray]),
                SlotSet::GET_ITEM | SlotSet::SET_ITEM,
            )
            .type_name("ForeignTypedArray"),
            CapabilityDef::new(
                C::NODE_LIST,
                "node_list",
                Probe::Tag(&[TypeTag::NodeList]),
                SlotSet::GET_ITEM,
            )
            .type_name("ForeignNodeList"),
            CapabilityDef::new(
                C::GENERATOR,
                "generator",
                Probe::Tag(&[TypeTag::Generator]),
                SlotSet::SEND | SlotSet::THROW,
            )
            .type_name("ForeignGenerator"),
            CapabilityDef::new(
                C::ASYNC_GENERATOR,
                "async_generator",
                Probe::Tag(&[TypeTag::AsyncGenerator]),
                SlotSet::SEND | SlotSet::THROW | SlotSet::ANEXT,
            )
            .type_name("ForeignAsyncGenerator"),
            CapabilityDef::new(C::ERROR, "error", Probe::Tag(&[TypeTag::Error]), SlotSet::EXCEPTION)
                .type_name("ForeignException"),
            CapabilityDef::new(
                C::DOUBLE_PROXY,
                "double_proxy",
                Probe::Tag(&[TypeTag::HostProxy]),
                SlotSet::UNWRAP,
            )
            .type_name("ForeignDoubleProxy"),
            CapabilityDef::new(
                C::OBJECT_MAP,
                "object_map",
                Probe::Explicit,
                SlotSet::MAPPING
                    | SlotSet::GET_ITEM
                    | SlotSet::SET_ITEM
                    | SlotSet::DEL_ITEM
                    | SlotSet::CONTAINS
                    | SlotSet::ITER
                    | SlotSet::LENGTH,
            )
            .type_name("ForeignObjectMap"),
        ];

        Self { defs }
    }

    /// Append a capability; its bit must be a single unused bit
    pub fn register(&mut self, def: CapabilityDef) -> Result<(), ProxyError> {
        let bits = def.flag.bits();
        if bits.count_ones() != 1 || self.registered().intersects(def.flag) {
            return Err(ProxyError::DuplicateCapability { flag: bits });
        }
        self.defs.push(def);
        Ok(())
    }

    /// Union of all registered bits
    pub fn registered(&self) -> CapabilityFlags {
        self.defs
            .iter()
            .fold(CapabilityFlags::empty(), |acc, def| acc | def.flag)
    }

    pub fn get(&self, flag: CapabilityFlags) -> Option<&CapabilityDef> {
        self.defs.iter().find(|def| def.flag == flag)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CapabilityDef> {
        self.defs.iter()
    }

    /// Capabilities of `flags` in catalog order
    pub fn defs_for(&self, flags: CapabilityFlags) -> impl Iterator<Item = &CapabilityDef> {
        self.defs.iter().filter(move |def| flags.contains(def.flag))
    }

    /// Slots required by `flags`: the base slots plus every set bit's slots
    pub fn slots_for(&self, flags: CapabilityFlags) -> SlotSet {
        self.defs_for(flags)
            .fold(SlotSet::BASE, |acc, def| acc | def.slots)
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callable_with_length_bits() {
        // invocable + has-length is 0b011
        assert_eq!((CapabilityFlags::CALLABLE | CapabilityFlags::HAS_LENGTH).bits(), 0b011);
    }

    #[test]
    fn test_standard_catalog_bits_are_unique() {
        let catalog = CapabilityCatalog::standard();
        let mut seen = CapabilityFlags::empty();
        for def in catalog.iter() {
            assert_eq!(def.flag.bits().count_ones(), 1, "{} must own one bit", def.name);
            assert!(!seen.intersects(def.flag), "{} reuses a bit", def.name);
            seen |= def.flag;
        }
        assert_eq!(catalog.len(), 20);
    }

    #[test]
    fn test_register_rejects_taken_bit() {
        let mut catalog = CapabilityCatalog::standard();
        let dup = CapabilityDef::new(
            CapabilityFlags::CALLABLE,
            "again",
            Probe::Explicit,
            SlotSet::empty(),
        );
        assert_eq!(catalog.register(dup), Err(ProxyError::DuplicateCapability { flag: 1 }));

        let wide = CapabilityDef::new(
            CapabilityFlags::from_bits_retain(0b11 << 24),
            "wide",
            Probe::Explicit,
            SlotSet::empty(),
        );
        assert!(catalog.register(wide).is_err());
    }

    #[test]
    fn test_register_extends_catalog() {
        let mut catalog = CapabilityCatalog::standard();
        let custom = CapabilityFlags::from_bits_retain(1 << 24);
        catalog
            .register(CapabilityDef::new(custom, "disposable", Probe::Explicit, SlotSet::GETATTR))
            .unwrap();
        assert!(catalog.get(custom).is_some());
        assert!(catalog.registered().contains(custom));
    }

    #[test]
    fn test_slots_union() {
        let catalog = CapabilityCatalog::standard();
        let slots = catalog.slots_for(CapabilityFlags::CALLABLE | CapabilityFlags::HAS_LENGTH);
        assert!(slots.contains(SlotSet::BASE));
        assert!(slots.contains(SlotSet::CALL | SlotSet::DESCR_GET | SlotSet::LENGTH));
        assert!(!slots.contains(SlotSet::GET_ITEM));

        assert_eq!(catalog.slots_for(CapabilityFlags::empty()), SlotSet::BASE);
    }

    #[test]
    fn test_applicable_guards() {
        let catalog = CapabilityCatalog::standard();
        let length = catalog.get(CapabilityFlags::HAS_LENGTH).unwrap();
        assert!(length.applicable(CapabilityFlags::empty()));
        assert!(length.applicable(CapabilityFlags::CALLABLE));

        let gated = CapabilityDef::new(
            CapabilityFlags::from_bits_retain(1 << 24),
            "gated",
            Probe::Explicit,
            SlotSet::empty(),
        )
        .requires(CapabilityFlags::ITERABLE)
        .excludes(CapabilityFlags::CALLABLE);
        assert!(!gated.applicable(CapabilityFlags::empty()));
        assert!(gated.applicable(CapabilityFlags::ITERABLE));
        assert!(!gated.applicable(CapabilityFlags::ITERABLE | CapabilityFlags::CALLABLE));
    }
}
