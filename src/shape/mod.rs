//! Proxy shapes - precomposed slot sets keyed by capability bitmask
//!
//! Design: a shape is the host-side "type" of a proxy. It is built once per
//! bitmask by composing the slot sets of every set capability on top of the
//! base slots, and is never mutated afterwards. There is no inheritance
//! chain: a proxy's behavior is fully described by its shape's slots.

mod registry;

pub use registry::{RegistryStats, ShapeRegistry};

use crate::capability::{CapabilityCatalog, CapabilityFlags};
use crate::errors::ProxyError;
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;

bitflags::bitflags! {
    /// Host protocol slots a shape installs
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SlotSet: u32 {
        const GETATTR = 1 << 0;
        const SETATTR = 1 << 1;
        const REPR = 1 << 2;
        const RICH_COMPARE = 1 << 3;
        const BOOL = 1 << 4;

        const CALL = 1 << 5;
        const DESCR_GET = 1 << 6;
        const LENGTH = 1 << 7;
        const GET_ITEM = 1 << 8;
        const SET_ITEM = 1 << 9;
        const DEL_ITEM = 1 << 10;
        const CONTAINS = 1 << 11;
        const ITER = 1 << 12;
        const NEXT = 1 << 13;
        const AITER = 1 << 14;
        const ANEXT = 1 << 15;
        const AWAIT = 1 << 16;
        const BUFFER = 1 << 17;
        const SEND = 1 << 18;
        const THROW = 1 << 19;
        const EXCEPTION = 1 << 20;
        const MAPPING = 1 << 21;
        const UNWRAP = 1 << 22;

        /// Installed on every shape, including the plain one
        const BASE = Self::GETATTR.bits()
            | Self::SETATTR.bits()
            | Self::REPR.bits()
            | Self::RICH_COMPARE.bits()
            | Self::BOOL.bits();
    }
}

const SLOT_NAMES: &[(SlotSet, &str)] = &[
    (SlotSet::GETATTR, "getattr"),
    (SlotSet::SETATTR, "setattr"),
    (SlotSet::REPR, "repr"),
    (SlotSet::RICH_COMPARE, "comparison"),
    (SlotSet::BOOL, "truth testing"),
    (SlotSet::CALL, "calling"),
    (SlotSet::DESCR_GET, "method binding"),
    (SlotSet::LENGTH, "len()"),
    (SlotSet::GET_ITEM, "item access"),
    (SlotSet::SET_ITEM, "item assignment"),
    (SlotSet::DEL_ITEM, "item deletion"),
    (SlotSet::CONTAINS, "membership testing"),
    (SlotSet::ITER, "iteration"),
    (SlotSet::NEXT, "next()"),
    (SlotSet::AITER, "async iteration"),
    (SlotSet::ANEXT, "anext()"),
    (SlotSet::AWAIT, "await"),
    (SlotSet::BUFFER, "the buffer protocol"),
    (SlotSet::SEND, "send()"),
    (SlotSet::THROW, "throw()"),
    (SlotSet::EXCEPTION, "raising"),
    (SlotSet::MAPPING, "mapping access"),
    (SlotSet::UNWRAP, "unwrapping"),
];

impl SlotSet {
    /// Protocol name of a single slot
    pub fn slot_name(self) -> &'static str {
        SLOT_NAMES
            .iter()
            .find(|(slot, _)| *slot == self)
            .map_or("a combined slot", |(_, name)| *name)
    }
}

/// Shared reference to a registered shape
pub type ShapeRef = Arc<Shape>;

/// Name precedence when several named capabilities are present
const NAME_PRECEDENCE: &[CapabilityFlags] = &[
    CapabilityFlags::ERROR,
    CapabilityFlags::DOUBLE_PROXY,
    CapabilityFlags::GENERATOR,
    CapabilityFlags::ASYNC_GENERATOR,
    CapabilityFlags::AWAITABLE,
    CapabilityFlags::CALLABLE,
    CapabilityFlags::ARRAY,
    CapabilityFlags::TYPED_ARRAY,
    CapabilityFlags::BUFFER,
    CapabilityFlags::NODE_LIST,
    CapabilityFlags::OBJECT_MAP,
    CapabilityFlags::HAS_GET,
    CapabilityFlags::ITERATOR,
    CapabilityFlags::ASYNC_ITERATOR,
    CapabilityFlags::ITERABLE,
];

/// Name of the plain wrapper and of shapes without a named capability
pub const PLAIN_SHAPE_NAME: &str = "ForeignProxy";

/// Pick the shape name for `flags`
///
/// Built-in capabilities follow a fixed precedence; capabilities registered
/// later contribute their name only when no built-in one applies.
pub fn shape_name(catalog: &CapabilityCatalog, flags: CapabilityFlags) -> &'static str {
    NAME_PRECEDENCE
        .iter()
        .filter(|flag| flags.contains(**flag))
        .find_map(|flag| catalog.get(*flag).and_then(|def| def.type_name))
        .or_else(|| catalog.defs_for(flags).find_map(|def| def.type_name))
        .unwrap_or(PLAIN_SHAPE_NAME)
}

/// Immutable proxy type descriptor
pub struct Shape {
    id: u32,
    registry_id: u64,
    flags: CapabilityFlags,
    slots: SlotSet,
    name: &'static str,
    /// Installed slots, one entry each, in bit order
    slot_table: SmallVec<[SlotSet; 16]>,
}

impl Shape {
    /// Compose the shape for `flags`
    ///
    /// Fails only when the slot table cannot be allocated.
    pub(crate) fn synthesize(
        catalog: &CapabilityCatalog,
        registry_id: u64,
        id: u32,
        flags: CapabilityFlags,
    ) -> Result<Self, ProxyError> {
        let slots = catalog.slots_for(flags);

        let mut table: SmallVec<[SlotSet; 16]> = SmallVec::new();
        table
            .try_reserve_exact(slots.bits().count_ones() as usize)
            .map_err(|_| ProxyError::OutOfMemory { resource: "shape slot table" })?;
        table.extend(
            (0..u32::BITS)
                .map(|bit| SlotSet::from_bits_retain(1 << bit))
                .filter(|slot| slots.contains(*slot)),
        );

        Ok(Self {
            id,
            registry_id,
            flags,
            slots,
            name: shape_name(catalog, flags),
            slot_table: table,
        })
    }

    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    #[inline]
    pub fn registry_id(&self) -> u64 {
        self.registry_id
    }

    #[inline]
    pub fn flags(&self) -> CapabilityFlags {
        self.flags
    }

    #[inline]
    pub fn slots(&self) -> SlotSet {
        self.slots
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub fn has_slot(&self, slot: SlotSet) -> bool {
        self.slots.contains(slot)
    }

    pub fn slot_table(&self) -> &[SlotSet] {
        &self.slot_table
    }

    /// Fail with `MissingSlot` unless `slot` is installed
    pub fn require(&self, slot: SlotSet) -> Result<(), ProxyError> {
        if self.has_slot(slot) {
            Ok(())
        } else {
            Err(ProxyError::MissingSlot {
                slot: slot.slot_name(),
                shape: self.name.to_string(),
            })
        }
    }
}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shape")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("flags", &format_args!("{:#x}", self.flags.bits()))
            .field("slots", &self.slot_table.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_shape() {
        let catalog = CapabilityCatalog::standard();
        let shape = Shape::synthesize(&catalog, 1, 0, CapabilityFlags::empty()).unwrap();
        assert_eq!(shape.name(), PLAIN_SHAPE_NAME);
        assert_eq!(shape.slots(), SlotSet::BASE);
        assert_eq!(shape.slot_table().len(), 5);
        assert!(shape.require(SlotSet::CALL).is_err());
    }

    #[test]
    fn test_slot_table_is_union() {
        let catalog = CapabilityCatalog::standard();
        let flags = CapabilityFlags::CALLABLE | CapabilityFlags::HAS_LENGTH;
        let shape = Shape::synthesize(&catalog, 1, 3, flags).unwrap();

        assert_eq!(shape.name(), "ForeignCallable");
        assert!(shape.has_slot(SlotSet::CALL | SlotSet::LENGTH));
        assert_eq!(shape.slot_table().len(), 5 + 3);
        assert!(shape.slot_table().iter().all(|slot| slot.bits().count_ones() == 1));
    }

    #[test]
    fn test_name_precedence() {
        let catalog = CapabilityCatalog::standard();
        use CapabilityFlags as C;

        assert_eq!(shape_name(&catalog, C::ERROR | C::CALLABLE), "ForeignException");
        assert_eq!(shape_name(&catalog, C::AWAITABLE | C::CALLABLE), "ForeignPromise");
        assert_eq!(shape_name(&catalog, C::ARRAY | C::ITERABLE | C::HAS_LENGTH), "ForeignArray");
        assert_eq!(shape_name(&catalog, C::OBJECT_MAP | C::HAS_GET), "ForeignObjectMap");
        assert_eq!(shape_name(&catalog, C::ITERABLE | C::HAS_LENGTH), "ForeignIterable");
        assert_eq!(shape_name(&catalog, C::HAS_LENGTH), PLAIN_SHAPE_NAME);
    }

    #[test]
    fn test_missing_slot_error() {
        let catalog = CapabilityCatalog::standard();
        let shape = Shape::synthesize(&catalog, 1, 0, CapabilityFlags::ITERABLE).unwrap();
        let err = shape.require(SlotSet::LENGTH).unwrap_err();
        assert_eq!(
            err,
            ProxyError::MissingSlot { slot: "len()", shape: "ForeignIterable".to_string() }
        );
    }
}
