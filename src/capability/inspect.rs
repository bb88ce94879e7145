//! Capability inspector
//!
//! Walks the catalog in order and asks the handle layer about protocol
//! markers. The result depends only on the value's structure at the time of
//! the call; proxies never re-inspect.

use super::{CapabilityCatalog, CapabilityFlags, Probe};
use crate::errors::ProxyError;
use crate::handle::{HandleLayer, RawHandle, TypeTag};
use crate::logging::log_probe_failed;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct Inspector {
    catalog: Arc<CapabilityCatalog>,
}

impl Inspector {
    pub fn new(catalog: Arc<CapabilityCatalog>) -> Self {
        Self { catalog }
    }

    #[inline]
    pub fn catalog(&self) -> &Arc<CapabilityCatalog> {
        &self.catalog
    }

    /// Capability bitmask of `handle`
    ///
    /// A probe that raises aborts inspection; the foreign error reaches the
    /// caller unmodified. Values with no recognized marker yield the empty
    /// mask.
    pub fn compute_capabilities(
        &self,
        layer: &dyn HandleLayer,
        handle: RawHandle,
    ) -> Result<CapabilityFlags, ProxyError> {
        let mut detected = CapabilityFlags::empty();
        // Fetched on first use; most values only need it for a few probes.
        let mut tag: Option<TypeTag> = None;

        for def in self.catalog.iter() {
            if matches!(def.probe, Probe::Explicit) || !def.applicable(detected) {
                continue;
            }

            let outcome = match &def.probe {
                Probe::Tag(tags) => {
                    let current = match tag {
                        Some(t) => Ok(t),
                        None => layer.type_tag(handle),
                    };
                    current.map(|t| {
                        tag = Some(t);
                        tags.contains(&t)
                    })
                }
                Probe::Method(key) => layer.has_method(handle, key),
                Probe::NumericProperty(names) => any_numeric(layer, handle, names),
                Probe::Custom(probe) => probe(layer, handle, detected),
                Probe::Explicit => Ok(false),
            };

            match outcome {
                Ok(true) => detected |= def.flag,
                Ok(false) => {}
                Err(err) => {
                    log_probe_failed(def.name, handle, &err.to_string());
                    return Err(err.into());
                }
            }
        }

        Ok(detected)
    }
}

fn any_numeric(
    layer: &dyn HandleLayer,
    handle: RawHandle,
    names: &[&str],
) -> Result<bool, crate::errors::ForeignError> {
    for name in names {
        if layer.numeric_property(handle, name)?.is_some() {
            return Ok(true);
        }
    }
    Ok(false)
}
