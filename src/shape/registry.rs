//! Shape registry - bitmask to shape, one shape per bitmask
//!
//! Same pattern as a type interner: fast-path lookup, slow-path synthesis.
//! Synthesis runs outside the map's locks; the insert goes through `entry`,
//! so when two threads (or a reentrant wrap) race on the same bitmask the
//! later synthesis is discarded and both callers get the surviving shape.

use super::{Shape, ShapeRef};
use crate::capability::{CapabilityCatalog, CapabilityFlags};
use crate::config::RegistryConfig;
use crate::errors::ProxyError;
use crate::logging::{log_registry_exhausted, log_shape_race_discarded, log_shape_synthesized, perf};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Distinguishes registries so a shape from another registry is never
/// accepted as a hint
static NEXT_REGISTRY_ID: AtomicU64 = AtomicU64::new(1);

/// Registry counters; lookups are counted from construction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub shapes: usize,
    pub hits: u64,
    pub misses: u64,
    pub hint_hits: u64,
    pub syntheses: u64,
    /// Syntheses that lost an insertion race
    pub discarded: u64,
}

pub struct ShapeRegistry {
    id: u64,
    catalog: Arc<CapabilityCatalog>,
    shapes: DashMap<CapabilityFlags, ShapeRef>,
    plain: ShapeRef,
    max_shapes: Option<usize>,
    /// Inserted shapes, reserved before each insert so the cap holds under races
    registered: AtomicUsize,
    next_shape_id: AtomicU32,
    hits: AtomicU64,
    misses: AtomicU64,
    hint_hits: AtomicU64,
    syntheses: AtomicU64,
    discarded: AtomicU64,
}

impl ShapeRegistry {
    /// Empty registry holding only the plain (zero-capability) shape
    pub fn new(
        catalog: Arc<CapabilityCatalog>,
        config: &RegistryConfig,
    ) -> Result<Self, ProxyError> {
        let id = NEXT_REGISTRY_ID.fetch_add(1, Ordering::Relaxed);

        if config.max_shapes == Some(0) {
            log_registry_exhausted(CapabilityFlags::empty(), 0);
            return Err(ProxyError::OutOfMemory { resource: "shape registry" });
        }

        let plain: ShapeRef =
            Arc::new(Shape::synthesize(&catalog, id, 0, CapabilityFlags::empty())?);
        let shapes = DashMap::with_capacity(config.initial_capacity.max(1));
        shapes.insert(CapabilityFlags::empty(), Arc::clone(&plain));

        Ok(Self {
            id,
            catalog,
            shapes,
            plain,
            max_shapes: config.max_shapes,
            registered: AtomicUsize::new(1),
            next_shape_id: AtomicU32::new(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            hint_hits: AtomicU64::new(0),
            syntheses: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
        })
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn catalog(&self) -> &Arc<CapabilityCatalog> {
        &self.catalog
    }

    /// The shared zero-capability shape
    #[inline]
    pub fn plain(&self) -> &ShapeRef {
        &self.plain
    }

    /// Shape for `flags`, synthesizing and caching it on first use
    pub fn get_or_create_shape(&self, flags: CapabilityFlags) -> Result<ShapeRef, ProxyError> {
        // Fast path: already registered
        if let Some(shape) = self.shapes.get(&flags) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Arc::clone(shape.value()));
        }

        self.misses.fetch_add(1, Ordering::Relaxed);

        if let Some(max) = self.max_shapes {
            if self.registered.load(Ordering::Acquire) >= max {
                log_registry_exhausted(flags, max);
                return Err(ProxyError::OutOfMemory { resource: "shape registry" });
            }
        }

        // Slow path: synthesize unlocked, then insert unless someone beat us
        let _perf = perf::track("shape_synthesis");
        let shape_id = self.next_shape_id.fetch_add(1, Ordering::Relaxed);
        let shape = Arc::new(Shape::synthesize(&self.catalog, self.id, shape_id, flags)?);

        match self.shapes.entry(flags) {
            Entry::Occupied(existing) => {
                self.discarded.fetch_add(1, Ordering::Relaxed);
                log_shape_race_discarded(flags);
                Ok(Arc::clone(existing.get()))
            }
            Entry::Vacant(slot) => {
                if !self.reserve_slot() {
                    drop(slot);
                    log_registry_exhausted(flags, self.max_shapes.unwrap_or_default());
                    return Err(ProxyError::OutOfMemory { resource: "shape registry" });
                }
                self.syntheses.fetch_add(1, Ordering::Relaxed);
                log_shape_synthesized(flags, shape.name(), shape.slot_table().len());
                slot.insert(Arc::clone(&shape));
                Ok(shape)
            }
        }
    }

    /// Count one more shape, unless that would pass `max_shapes`
    fn reserve_slot(&self) -> bool {
        match self.max_shapes {
            None => {
                self.registered.fetch_add(1, Ordering::AcqRel);
                true
            }
            Some(max) => self
                .registered
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < max).then_some(n + 1))
                .is_ok(),
        }
    }

    /// Like `get_or_create_shape`, but reuses `hint` when it is this
    /// registry's shape for exactly `flags`
    pub fn get_or_create_shape_with_hint(
        &self,
        flags: CapabilityFlags,
        hint: &ShapeRef,
    ) -> Result<ShapeRef, ProxyError> {
        if hint.flags() == flags && self.owns(hint) {
            self.hint_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Arc::clone(hint));
        }
        self.get_or_create_shape(flags)
    }

    /// Whether `shape` was produced by this registry
    #[inline]
    pub fn owns(&self, shape: &Shape) -> bool {
        shape.registry_id() == self.id
    }

    /// Registered shape for `flags`, without synthesizing
    pub fn get(&self, flags: CapabilityFlags) -> Option<ShapeRef> {
        self.shapes.get(&flags).map(|shape| Arc::clone(shape.value()))
    }

    pub fn contains(&self, flags: CapabilityFlags) -> bool {
        self.shapes.contains_key(&flags)
    }

    /// Number of registered shapes
    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            shapes: self.shapes.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            hint_hits: self.hint_hits.load(Ordering::Relaxed),
            syntheses: self.syntheses.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for ShapeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShapeRegistry")
            .field("id", &self.id)
            .field("shapes", &self.shapes.len())
            .field("max_shapes", &self.max_shapes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    fn registry(config: &RegistryConfig) -> ShapeRegistry {
        ShapeRegistry::new(Arc::new(CapabilityCatalog::standard()), config).unwrap()
    }

    #[test]
    fn test_plain_shape_preregistered() {
        let registry = registry(&RegistryConfig::default());
        assert_eq!(registry.len(), 1);

        let plain = registry.get_or_create_shape(CapabilityFlags::empty()).unwrap();
        assert!(Arc::ptr_eq(&plain, registry.plain()));
        assert_eq!(registry.stats().hits, 1);
        assert_eq!(registry.stats().syntheses, 0);
    }

    #[test]
    fn test_same_bitmask_same_shape() {
        let registry = registry(&RegistryConfig::default());
        let flags = CapabilityFlags::CALLABLE | CapabilityFlags::HAS_LENGTH;

        let a = registry.get_or_create_shape(flags).unwrap();
        let b = registry.get_or_create_shape(flags).unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let stats = registry.stats();
        assert_eq!(stats.shapes, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.syntheses, 1);
    }

    #[test]
    fn test_concurrent_misses_keep_one_shape() {
        let registry = Arc::new(registry(&RegistryConfig::default()));
        let flags = CapabilityFlags::ITERABLE | CapabilityFlags::ITERATOR;

        let shapes: Vec<ShapeRef> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || registry.get_or_create_shape(flags).unwrap())
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect();

        assert!(shapes.iter().all(|shape| Arc::ptr_eq(shape, &shapes[0])));
        assert!(Arc::ptr_eq(&shapes[0], &registry.get(flags).unwrap()));

        let stats = registry.stats();
        assert_eq!(stats.shapes, 2);
        assert_eq!(stats.syntheses, 1);
        assert_eq!(stats.hits + stats.misses, 8);
        assert_eq!(stats.discarded, stats.misses - 1);
    }

    #[test]
    fn test_exhaustion_leaves_no_partial_entry() {
        let config = RegistryConfig { max_shapes: Some(2), ..RegistryConfig::default() };
        let registry = registry(&config);

        registry.get_or_create_shape(CapabilityFlags::CALLABLE).unwrap();
        let err = registry.get_or_create_shape(CapabilityFlags::ARRAY).unwrap_err();
        assert!(err.is_out_of_memory());
        assert!(!registry.contains(CapabilityFlags::ARRAY));
        assert_eq!(registry.len(), 2);

        // Known bitmasks still resolve
        assert!(registry.get_or_create_shape(CapabilityFlags::CALLABLE).is_ok());
    }

    #[test]
    fn test_concurrent_distinct_misses_respect_max_shapes() {
        let config = RegistryConfig { max_shapes: Some(2), ..RegistryConfig::default() };
        let registry = Arc::new(registry(&config));
        let barrier = Arc::new(Barrier::new(8));

        let results: Vec<Result<ShapeRef, ProxyError>> = (0..8u32)
            .map(|bit| {
                let registry = Arc::clone(&registry);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    registry.get_or_create_shape(CapabilityFlags::from_bits_retain(1 << bit))
                })
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(ProxyError::is_out_of_memory));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.stats().syntheses, 1);
    }

    #[test]
    fn test_zero_budget_refuses_construction() {
        let config = RegistryConfig { max_shapes: Some(0), ..RegistryConfig::default() };
        let result = ShapeRegistry::new(Arc::new(CapabilityCatalog::standard()), &config);
        assert!(matches!(result, Err(ProxyError::OutOfMemory { .. })));
    }

    #[test]
    fn test_hint_reused_only_when_it_matches() {
        let registry = registry(&RegistryConfig::default());
        let callable = registry.get_or_create_shape(CapabilityFlags::CALLABLE).unwrap();

        let same = registry
            .get_or_create_shape_with_hint(CapabilityFlags::CALLABLE, &callable)
            .unwrap();
        assert!(Arc::ptr_eq(&same, &callable));
        assert_eq!(registry.stats().hint_hits, 1);

        let other = registry
            .get_or_create_shape_with_hint(CapabilityFlags::ARRAY, &callable)
            .unwrap();
        assert_eq!(other.flags(), CapabilityFlags::ARRAY);
        assert_eq!(registry.stats().hint_hits, 1);
    }

    #[test]
    fn test_foreign_registry_hint_is_ignored() {
        let a = registry(&RegistryConfig::default());
        let b = registry(&RegistryConfig::default());
        let from_a = a.get_or_create_shape(CapabilityFlags::CALLABLE).unwrap();

        let from_b = b
            .get_or_create_shape_with_hint(CapabilityFlags::CALLABLE, &from_a)
            .unwrap();
        assert!(!Arc::ptr_eq(&from_a, &from_b));
        assert!(b.owns(&from_b));
        assert!(!b.owns(&from_a));
    }
}
