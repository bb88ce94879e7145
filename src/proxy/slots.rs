//! Slot behaviors of a proxy
//!
//! Each behavior checks that the proxy's shape installs the slot it needs
//! and refuses with `MissingSlot` otherwise. Foreign results come back as
//! host values: `undefined`/`null` become `None`, everything else is wrapped
//! in a new proxy.

use super::{ForeignProxy, HostValue, ProxyRef};
use crate::capability::CapabilityFlags;
use crate::errors::ProxyError;
use crate::handle::{ForeignHandle, PropertyKey, RawHandle, TypeTag};
use crate::shape::SlotSet;

impl ForeignProxy {
    /// Call the wrapped value; the call binding, if any, is the receiver
    pub fn call(&self, args: &[RawHandle]) -> Result<HostValue, ProxyError> {
        self.shape.require(SlotSet::CALL)?;
        let layer = self.value.layer();
        let receiver = self.this.as_ref().map(ForeignHandle::raw);
        let result = layer.invoke(self.value.raw(), receiver, args)?;
        self.to_host(ForeignHandle::adopt(layer, result))
    }

    /// Same foreign value, new call binding
    pub fn rebind(&self, receiver: RawHandle) -> Result<ProxyRef, ProxyError> {
        self.shape.require(SlotSet::DESCR_GET)?;
        self.factory
            .create_with_hint(&self.shape, self.value.raw(), Some(receiver))
    }

    /// Length of the wrapped value
    ///
    /// Object maps count their own string keys; everything else reports its
    /// numeric `length` or `size`. Callables report `size` only.
    pub fn len(&self) -> Result<usize, ProxyError> {
        self.shape.require(SlotSet::LENGTH)?;
        let layer = self.value.layer();
        let raw = self.value.raw();
        let flags = self.flags();

        if !flags.contains(CapabilityFlags::HAS_LENGTH)
            && flags.contains(CapabilityFlags::OBJECT_MAP)
        {
            return Ok(layer.own_keys(raw)?.len());
        }

        let names: &[&str] = if flags.contains(CapabilityFlags::CALLABLE) {
            &["size"]
        } else {
            &["length", "size"]
        };
        for name in names {
            if let Some(n) = layer.numeric_property(raw, name)? {
                return Ok(if n.is_finite() && n > 0.0 { n as usize } else { 0 });
            }
        }
        Err(ProxyError::NoSuchProperty { name: "length".to_string() })
    }

    pub fn is_empty(&self) -> Result<bool, ProxyError> {
        self.len().map(|len| len == 0)
    }

    /// Member lookup; callable members come back bound to the wrapped value
    pub fn get_attr(&self, name: &str) -> Result<HostValue, ProxyError> {
        self.shape.require(SlotSet::GETATTR)?;
        let layer = self.value.layer();
        let member = layer
            .get_property(self.value.raw(), &PropertyKey::named(name))?
            .map(|raw| ForeignHandle::adopt(layer, raw))
            .ok_or_else(|| ProxyError::NoSuchProperty { name: name.to_string() })?;

        if layer.type_tag(member.raw())? == TypeTag::Function {
            let bound = self.factory.create_with_this(member.raw(), self.value.raw())?;
            return Ok(bound.into());
        }
        self.to_host(member)
    }

    /// Store `value` (borrowed) as member `name`
    pub fn set_attr(&self, name: &str, value: RawHandle) -> Result<(), ProxyError> {
        self.shape.require(SlotSet::SETATTR)?;
        self.value
            .layer()
            .set_property(self.value.raw(), &PropertyKey::named(name), value)?;
        Ok(())
    }

    /// String-keyed read on an object-map proxy
    pub fn get_item(&self, key: &str) -> Result<HostValue, ProxyError> {
        self.shape.require(SlotSet::MAPPING)?;
        let layer = self.value.layer();
        let item = layer
            .get_property(self.value.raw(), &PropertyKey::named(key))?
            .ok_or_else(|| ProxyError::NoSuchProperty { name: key.to_string() })?;
        self.to_host(ForeignHandle::adopt(layer, item))
    }

    /// String-keyed write on an object-map proxy; `value` is borrowed
    pub fn set_item(&self, key: &str, value: RawHandle) -> Result<(), ProxyError> {
        self.shape.require(SlotSet::MAPPING | SlotSet::SET_ITEM)?;
        self.value
            .layer()
            .set_property(self.value.raw(), &PropertyKey::named(key), value)?;
        Ok(())
    }

    pub fn del_item(&self, key: &str) -> Result<(), ProxyError> {
        self.shape.require(SlotSet::MAPPING | SlotSet::DEL_ITEM)?;
        let existed = self
            .value
            .layer()
            .delete_property(self.value.raw(), &PropertyKey::named(key))?;
        if existed {
            Ok(())
        } else {
            Err(ProxyError::NoSuchProperty { name: key.to_string() })
        }
    }

    pub fn contains(&self, key: &str) -> Result<bool, ProxyError> {
        self.shape.require(SlotSet::MAPPING | SlotSet::CONTAINS)?;
        Ok(self.keys()?.iter().any(|k| k == key))
    }

    /// Own string keys, in the handle layer's enumeration order
    pub fn keys(&self) -> Result<Vec<String>, ProxyError> {
        self.shape.require(SlotSet::MAPPING)?;
        Ok(self.value.layer().own_keys(self.value.raw())?)
    }

    /// Whether both proxies wrap the same foreign value
    pub fn same_value(&self, other: &ForeignProxy) -> bool {
        self.value == other.value
    }

    fn to_host(&self, handle: ForeignHandle) -> Result<HostValue, ProxyError> {
        match handle.layer().type_tag(handle.raw())? {
            TypeTag::Undefined | TypeTag::Null => Ok(HostValue::None),
            _ => Ok(self.factory.create(handle.raw())?.into()),
        }
    }
}

impl PartialEq for ForeignProxy {
    fn eq(&self, other: &Self) -> bool {
        self.same_value(other)
    }
}
