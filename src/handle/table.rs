//! In-process handle table
//!
//! Reference-counted slab of foreign objects keyed by `RawHandle`. A handle
//! keeps the same id for the lifetime of its value, so `equals` is id
//! equality. Getters and callables run with the table unlocked: foreign code
//! is free to insert values, take references or re-enter the bridge.

use super::{HandleLayer, PropertyKey, RawHandle, TypeTag};
use crate::errors::ForeignError;
use crate::logging::{log_stale_release, targets, trace};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Native implementation of a foreign callable: `(table, this, args)`
pub type NativeFn = Arc<
    dyn Fn(&HandleTable, Option<RawHandle>, &[RawHandle]) -> Result<Value, ForeignError>
        + Send
        + Sync,
>;

/// Accessor property body
pub type Getter = Arc<dyn Fn(&HandleTable) -> Result<Value, ForeignError> + Send + Sync>;

/// Result of running foreign code or reading a member
///
/// `Handle` carries a reference that passes to whoever receives the value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Undefined,
    Number(f64),
    Handle(RawHandle),
}

/// Member slot on a foreign object
#[derive(Clone)]
pub enum Property {
    /// Plain data; a `Value::Handle` here is a reference owned by the object
    Data(Value),
    /// Runs foreign code on every read
    Accessor(Getter),
}

impl fmt::Debug for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Data(value) => f.debug_tuple("Data").field(value).finish(),
            Self::Accessor(_) => f.write_str("Accessor(..)"),
        }
    }
}

/// Structural description of a foreign value stored in the table
#[derive(Clone)]
pub struct ForeignObject {
    tag: TypeTag,
    properties: BTreeMap<PropertyKey, Property>,
    call: Option<NativeFn>,
    number: Option<f64>,
}

impl ForeignObject {
    pub fn new(tag: TypeTag) -> Self {
        Self {
            tag,
            properties: BTreeMap::new(),
            call: None,
            number: None,
        }
    }

    /// Ordinary object with no protocol members
    pub fn plain() -> Self {
        Self::new(TypeTag::Object)
    }

    pub fn function<F>(body: F) -> Self
    where
        F: Fn(&HandleTable, Option<RawHandle>, &[RawHandle]) -> Result<Value, ForeignError>
            + Send
            + Sync
            + 'static,
    {
        let mut object = Self::new(TypeTag::Function);
        object.call = Some(Arc::new(body));
        object
    }

    pub fn number(value: f64) -> Self {
        let mut object = Self::new(TypeTag::Number);
        object.number = Some(value);
        object
    }

    pub fn with_number(mut self, name: &str, value: f64) -> Self {
        self.properties
            .insert(PropertyKey::named(name), Property::Data(Value::Number(value)));
        self
    }

    /// Store `handle` under `key`, taking over the caller's reference
    pub fn with_value(mut self, key: PropertyKey, handle: RawHandle) -> Self {
        self.properties.insert(key, Property::Data(Value::Handle(handle)));
        self
    }

    pub fn with_getter<F>(mut self, key: PropertyKey, getter: F) -> Self
    where
        F: Fn(&HandleTable) -> Result<Value, ForeignError> + Send + Sync + 'static,
    {
        self.properties.insert(key, Property::Accessor(Arc::new(getter)));
        self
    }

    #[inline]
    pub fn tag(&self) -> TypeTag {
        self.tag
    }

    #[inline]
    fn is_callable(&self) -> bool {
        self.call.is_some() || self.tag == TypeTag::Function
    }

    /// References held by data properties
    fn owned_handles(&self) -> impl Iterator<Item = RawHandle> + '_ {
        self.properties.values().filter_map(|prop| match prop {
            Property::Data(Value::Handle(handle)) => Some(*handle),
            _ => None,
        })
    }
}

impl fmt::Debug for ForeignObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForeignObject")
            .field("tag", &self.tag)
            .field("properties", &self.properties)
            .field("callable", &self.call.is_some())
            .field("number", &self.number)
            .finish()
    }
}

struct Entry {
    object: ForeignObject,
    refcount: u32,
    /// Pinned values are never freed; their pin is not an outstanding reference
    immortal: bool,
}

struct TableState {
    entries: HashMap<RawHandle, Entry>,
    next_id: u32,
    outstanding: usize,
}

impl TableState {
    fn entry(&self, handle: RawHandle) -> Result<&Entry, ForeignError> {
        self.entries.get(&handle).ok_or_else(|| stale(handle))
    }

    fn entry_mut(&mut self, handle: RawHandle) -> Result<&mut Entry, ForeignError> {
        self.entries.get_mut(&handle).ok_or_else(|| stale(handle))
    }

    fn incref(&mut self, handle: RawHandle) -> Result<(), ForeignError> {
        let entry = self.entry_mut(handle)?;
        entry.refcount += 1;
        self.outstanding += 1;
        Ok(())
    }
}

enum Released {
    Stale,
    Alive,
    Freed(Entry),
}

fn stale(handle: RawHandle) -> ForeignError {
    ForeignError::new("ReferenceError", format!("stale handle {}", handle))
}

/// Reference-counted foreign value table
pub struct HandleTable {
    state: Mutex<TableState>,
    /// Upper bound on outstanding references, checked by `duplicate`
    reference_limit: Option<usize>,
}

impl HandleTable {
    /// The pinned `undefined` value
    pub const UNDEFINED: RawHandle = RawHandle::from_raw(1);

    pub fn new() -> Self {
        Self::build(None)
    }

    /// Table whose `duplicate` fails once `limit` references are outstanding
    pub fn with_reference_limit(limit: usize) -> Self {
        Self::build(Some(limit))
    }

    fn build(reference_limit: Option<usize>) -> Self {
        let mut entries = HashMap::with_capacity(64);
        entries.insert(
            Self::UNDEFINED,
            Entry {
                object: ForeignObject::new(TypeTag::Undefined),
                refcount: 1,
                immortal: true,
            },
        );

        Self {
            state: Mutex::new(TableState {
                entries,
                next_id: Self::UNDEFINED.raw() + 1,
                outstanding: 0,
            }),
            reference_limit,
        }
    }

    /// Store a new value; the caller owns the returned reference
    pub fn insert(&self, object: ForeignObject) -> RawHandle {
        let mut state = self.state.lock();
        let handle = RawHandle::from_raw(state.next_id);
        state.next_id += 1;
        state.outstanding += 1;
        state.entries.insert(
            handle,
            Entry {
                object,
                refcount: 1,
                immortal: false,
            },
        );
        trace!(target: targets::HANDLES, handle = %handle, "foreign value inserted");
        handle
    }

    pub fn insert_function<F>(&self, body: F) -> RawHandle
    where
        F: Fn(&HandleTable, Option<RawHandle>, &[RawHandle]) -> Result<Value, ForeignError>
            + Send
            + Sync
            + 'static,
    {
        self.insert(ForeignObject::function(body))
    }

    /// Current reference count (0 once freed)
    pub fn refcount(&self, handle: RawHandle) -> u32 {
        self.state
            .lock()
            .entries
            .get(&handle)
            .map_or(0, |entry| entry.refcount)
    }

    /// References handed out and not yet released
    pub fn outstanding(&self) -> usize {
        self.state.lock().outstanding
    }

    /// Values currently stored, excluding pinned ones
    pub fn live_objects(&self) -> usize {
        self.state
            .lock()
            .entries
            .values()
            .filter(|entry| !entry.immortal)
            .count()
    }

    pub fn is_live(&self, handle: RawHandle) -> bool {
        self.state.lock().entries.contains_key(&handle)
    }

    /// Numeric payload of a number value
    pub fn number_value(&self, handle: RawHandle) -> Option<f64> {
        self.state
            .lock()
            .entries
            .get(&handle)
            .and_then(|entry| entry.object.number)
    }

    /// Read a member, running its getter if it has one
    fn resolve(&self, handle: RawHandle, key: &PropertyKey) -> Result<Value, ForeignError> {
        let getter = {
            let mut state = self.state.lock();
            let prop = state.entry(handle)?.object.properties.get(key).cloned();
            match prop {
                None | Some(Property::Data(Value::Undefined)) => return Ok(Value::Undefined),
                Some(Property::Data(Value::Number(n))) => return Ok(Value::Number(n)),
                Some(Property::Data(Value::Handle(target))) => {
                    state.incref(target)?;
                    return Ok(Value::Handle(target));
                }
                Some(Property::Accessor(getter)) => getter,
            }
        };
        getter(self)
    }

    /// Turn a foreign result into an owned handle
    fn materialize(&self, value: Value) -> Result<RawHandle, ForeignError> {
        match value {
            Value::Handle(handle) => Ok(handle),
            Value::Number(n) => Ok(self.insert(ForeignObject::number(n))),
            Value::Undefined => {
                self.state.lock().incref(Self::UNDEFINED)?;
                Ok(Self::UNDEFINED)
            }
        }
    }

    fn is_callable(&self, handle: RawHandle) -> bool {
        self.state
            .lock()
            .entries
            .get(&handle)
            .map_or(false, |entry| entry.object.is_callable())
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HandleTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("HandleTable")
            .field("entries", &state.entries.len())
            .field("outstanding", &state.outstanding)
            .field("reference_limit", &self.reference_limit)
            .finish()
    }
}

impl HandleLayer for HandleTable {
    fn duplicate(&self, handle: RawHandle) -> Result<RawHandle, ForeignError> {
        let mut state = self.state.lock();
        if let Some(limit) = self.reference_limit {
            if state.outstanding >= limit {
                return Err(ForeignError::new("RangeError", "handle table exhausted"));
            }
        }
        state.incref(handle)?;
        Ok(handle)
    }

    fn release(&self, handle: RawHandle) {
        let outcome = {
            let mut state = self.state.lock();
            match state.entries.get_mut(&handle) {
                None => Released::Stale,
                Some(entry) if entry.immortal && entry.refcount <= 1 => Released::Stale,
                Some(entry) => {
                    entry.refcount -= 1;
                    let now_dead = entry.refcount == 0;
                    state.outstanding -= 1;
                    if now_dead {
                        state.entries.remove(&handle).map_or(Released::Alive, Released::Freed)
                    } else {
                        Released::Alive
                    }
                }
            }
        };

        match outcome {
            Released::Stale => log_stale_release(handle),
            Released::Alive => {}
            // Children are released with the lock dropped: freeing may cascade.
            Released::Freed(entry) => {
                trace!(target: targets::HANDLES, handle = %handle, "foreign value freed");
                for child in entry.object.owned_handles() {
                    self.release(child);
                }
            }
        }
    }

    #[inline]
    fn equals(&self, a: RawHandle, b: RawHandle) -> bool {
        a == b
    }

    fn type_tag(&self, handle: RawHandle) -> Result<TypeTag, ForeignError> {
        Ok(self.state.lock().entry(handle)?.object.tag)
    }

    fn has_method(&self, handle: RawHandle, key: &PropertyKey) -> Result<bool, ForeignError> {
        match self.resolve(handle, key)? {
            Value::Handle(member) => {
                let callable = self.is_callable(member);
                self.release(member);
                Ok(callable)
            }
            Value::Number(_) | Value::Undefined => Ok(false),
        }
    }

    fn numeric_property(&self, handle: RawHandle, name: &str) -> Result<Option<f64>, ForeignError> {
        match self.resolve(handle, &PropertyKey::named(name))? {
            Value::Number(n) => Ok(Some(n)),
            Value::Handle(member) => {
                let number = self.number_value(member);
                self.release(member);
                Ok(number)
            }
            Value::Undefined => Ok(None),
        }
    }

    fn get_property(
        &self,
        handle: RawHandle,
        key: &PropertyKey,
    ) -> Result<Option<RawHandle>, ForeignError> {
        match self.resolve(handle, key)? {
            Value::Undefined => Ok(None),
            value => self.materialize(value).map(Some),
        }
    }

    fn set_property(
        &self,
        handle: RawHandle,
        key: &PropertyKey,
        value: RawHandle,
    ) -> Result<(), ForeignError> {
        let previous = {
            let mut state = self.state.lock();
            state.entry(handle)?;
            state.incref(value)?;
            let entry = state.entry_mut(handle)?;
            entry
                .object
                .properties
                .insert(key.clone(), Property::Data(Value::Handle(value)))
        };

        if let Some(Property::Data(Value::Handle(old))) = previous {
            self.release(old);
        }
        Ok(())
    }

    fn delete_property(&self, handle: RawHandle, key: &PropertyKey) -> Result<bool, ForeignError> {
        let removed = {
            let mut state = self.state.lock();
            state.entry_mut(handle)?.object.properties.remove(key)
        };

        match removed {
            Some(Property::Data(Value::Handle(old))) => {
                self.release(old);
                Ok(true)
            }
            Some(_) => Ok(true),
            None => Ok(false),
        }
    }

    /// Members are stored in a sorted map, so keys come back sorted by name
    fn own_keys(&self, handle: RawHandle) -> Result<Vec<String>, ForeignError> {
        let state = self.state.lock();
        let keys = state
            .entry(handle)?
            .object
            .properties
            .keys()
            .filter_map(|key| key.as_name().map(str::to_owned))
            .collect();
        Ok(keys)
    }

    fn invoke(
        &self,
        func: RawHandle,
        this: Option<RawHandle>,
        args: &[RawHandle],
    ) -> Result<RawHandle, ForeignError> {
        let body = {
            let state = self.state.lock();
            let entry = state.entry(func)?;
            entry
                .object
                .call
                .clone()
                .ok_or_else(|| {
                    ForeignError::new("TypeError", format!("{} is not a function", func))
                })?
        };
        let result = body(self, this, args)?;
        self.materialize(result)
    }
}
