//! Owned foreign reference
//!
//! The foreign-side counterpart of a refcounted pointer: acquiring one takes
//! a foreign reference, dropping it gives the reference back. Every path that
//! duplicates a handle holds it in a `ForeignHandle`, so error returns and
//! unwinding release it too.

use super::{HandleLayer, RawHandle};
use crate::errors::ForeignError;
use crate::logging::log_handle_released;
use std::fmt;
use std::sync::Arc;

pub struct ForeignHandle {
    raw: RawHandle,
    layer: Arc<dyn HandleLayer>,
}

impl ForeignHandle {
    /// Take a new reference to a borrowed handle
    #[inline]
    pub fn duplicate(layer: &Arc<dyn HandleLayer>, raw: RawHandle) -> Result<Self, ForeignError> {
        let raw = layer.duplicate(raw)?;
        Ok(Self {
            raw,
            layer: Arc::clone(layer),
        })
    }

    /// Take ownership of a reference the caller already holds (no duplicate)
    #[inline]
    pub fn adopt(layer: &Arc<dyn HandleLayer>, raw: RawHandle) -> Self {
        Self {
            raw,
            layer: Arc::clone(layer),
        }
    }

    /// Borrow the raw handle; the reference stays owned by `self`
    #[inline]
    pub fn raw(&self) -> RawHandle {
        self.raw
    }

    #[inline]
    pub fn layer(&self) -> &Arc<dyn HandleLayer> {
        &self.layer
    }

    /// Duplicate into a second owner
    pub fn try_clone(&self) -> Result<Self, ForeignError> {
        Self::duplicate(&self.layer, self.raw)
    }

    /// Same foreign value as `other`, as decided by the handle layer
    #[inline]
    pub fn same_value(&self, other: RawHandle) -> bool {
        self.layer.equals(self.raw, other)
    }
}

impl Drop for ForeignHandle {
    fn drop(&mut self) {
        self.layer.release(self.raw);
        log_handle_released(self.raw);
    }
}

impl PartialEq for ForeignHandle {
    fn eq(&self, other: &Self) -> bool {
        self.same_value(other.raw)
    }
}

impl fmt::Debug for ForeignHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ForeignHandle").field(&self.raw).finish()
    }
}
