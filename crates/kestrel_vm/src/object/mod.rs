//! Object and property storage.
//!
//! The dispatch loop only sees the narrow surface here: `get`, `put_with_receiver`,
//! `define_property`, `delete`, `has_property`, `own_enumerable_string_keys`.
//! Objects are refcounted cells; identity is the cell address.

pub mod error;
pub mod function;

use std::cell::{Ref, RefCell, RefMut};
use std::rc::{Rc, Weak};

use rustc_hash::FxHashMap;

use crate::frame::Frame;
use crate::throw;
use crate::value::{JsString, JsSymbol, Value};
use crate::Vm;

use self::function::FunctionData;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PropertyKey {
    String(JsString),
    Symbol(JsSymbol),
}

impl PropertyKey {
    /// Numeric string keys that address fast-array slots.
    pub fn as_array_index(&self) -> Option<u32> {
        match self {
            PropertyKey::String(s) => {
                let s = s.as_str();
                if s == "0" {
                    return Some(0);
                }
                if s.is_empty() || s.starts_with('0') || !s.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                s.parse().ok()
            }
            PropertyKey::Symbol(_) => None,
        }
    }

    pub fn from_index(index: u32) -> Self {
        PropertyKey::String(index.to_string().into())
    }
}

impl From<&str> for PropertyKey {
    fn from(s: &str) -> Self {
        PropertyKey::String(s.into())
    }
}

impl From<JsString> for PropertyKey {
    fn from(s: JsString) -> Self {
        PropertyKey::String(s)
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PropertyAttributes: u8 {
        const WRITABLE = 1 << 0;
        const ENUMERABLE = 1 << 1;
        const CONFIGURABLE = 1 << 2;
    }
}

impl PropertyAttributes {
    pub const DEFAULT: Self = Self::all();
}

#[derive(Debug, Clone)]
pub enum PropertyValue {
    Data(Value),
    Accessor {
        get: Option<ObjectHandle>,
        set: Option<ObjectHandle>,
    },
}

#[derive(Debug, Clone)]
pub struct Property {
    pub value: PropertyValue,
    pub attributes: PropertyAttributes,
}

impl Property {
    pub fn data(value: Value) -> Self {
        Self {
            value: PropertyValue::Data(value),
            attributes: PropertyAttributes::DEFAULT,
        }
    }

    pub fn with_attributes(value: Value, attributes: PropertyAttributes) -> Self {
        Self {
            value: PropertyValue::Data(value),
            attributes,
        }
    }
}

/// Insertion-ordered property map.
#[derive(Debug, Default)]
pub struct PropertyMap {
    entries: FxHashMap<PropertyKey, Property>,
    order: Vec<PropertyKey>,
}

impl PropertyMap {
    pub fn get(&self, key: &PropertyKey) -> Option<&Property> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &PropertyKey) -> Option<&mut Property> {
        self.entries.get_mut(key)
    }

    pub fn contains_key(&self, key: &PropertyKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn insert(&mut self, key: PropertyKey, property: Property) {
        if self.entries.insert(key.clone(), property).is_none() {
            self.order.push(key);
        }
    }

    pub fn remove(&mut self, key: &PropertyKey) -> Option<Property> {
        let removed = self.entries.remove(key)?;
        self.order.retain(|k| k != key);
        Some(removed)
    }

    pub fn keys(&self) -> impl Iterator<Item = &PropertyKey> {
        self.order.iter()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorStage {
    Suspended { started: bool },
    Running,
    Done,
}

#[derive(Debug)]
pub struct GeneratorState {
    pub frame: Option<Box<Frame>>,
    pub stage: GeneratorStage,
}

#[derive(Debug)]
pub enum PromiseState {
    Resolved(Value),
    Rejected(Value),
}

#[derive(Debug)]
pub enum ObjectKind {
    Ordinary,
    /// Fast array: dense, integer-indexed slots; `Hole` marks elisions.
    Array { elements: Vec<Value> },
    Function(FunctionData),
    Error {
        kind: error::ErrorKind,
        message: JsString,
    },
    Generator(GeneratorState),
    Promise(PromiseState),
    ArrayIterator { target: ObjectHandle, index: u32 },
    StringIterator { string: JsString, index: usize },
}

#[derive(Debug)]
pub struct ObjectData {
    pub kind: ObjectKind,
    pub properties: PropertyMap,
    pub prototype: Option<ObjectHandle>,
    pub extensible: bool,
}

#[derive(Debug, Clone)]
pub struct ObjectHandle(Rc<RefCell<ObjectData>>);

/// Identity-preserving weak handle, used by the lookup cache.
#[derive(Debug, Clone)]
pub struct WeakObjectHandle(Weak<RefCell<ObjectData>>);

impl WeakObjectHandle {
    pub fn upgrade(&self) -> Option<ObjectHandle> {
        self.0.upgrade().map(ObjectHandle)
    }
}

impl ObjectHandle {
    pub fn new(kind: ObjectKind) -> Self {
        Self(Rc::new(RefCell::new(ObjectData {
            kind,
            properties: PropertyMap::default(),
            prototype: None,
            extensible: true,
        })))
    }

    pub fn ordinary() -> Self {
        Self::new(ObjectKind::Ordinary)
    }

    pub fn array(elements: Vec<Value>) -> Self {
        Self::new(ObjectKind::Array { elements })
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn downgrade(&self) -> WeakObjectHandle {
        WeakObjectHandle(Rc::downgrade(&self.0))
    }

    /// Stable identity of the cell while it is alive.
    pub fn id(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }

    pub fn borrow(&self) -> Ref<'_, ObjectData> {
        self.0.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, ObjectData> {
        self.0.borrow_mut()
    }

    pub fn is_callable(&self) -> bool {
        matches!(self.borrow().kind, ObjectKind::Function(_))
    }

    pub fn is_constructor(&self) -> bool {
        match &self.borrow().kind {
            ObjectKind::Function(data) => data.is_constructor(),
            _ => false,
        }
    }

    pub fn prototype(&self) -> Option<ObjectHandle> {
        self.borrow().prototype.clone()
    }

    pub fn set_prototype(&self, prototype: Option<ObjectHandle>) {
        self.borrow_mut().prototype = prototype;
    }

    pub fn prevent_extensions(&self) {
        self.borrow_mut().extensible = false;
    }

    pub fn array_length(&self) -> Option<u32> {
        match &self.borrow().kind {
            ObjectKind::Array { elements } => Some(elements.len() as u32),
            _ => None,
        }
    }

    fn own_property(&self, key: &PropertyKey) -> Option<Property> {
        let data = self.borrow();

        if let ObjectKind::Array { elements } = &data.kind {
            if let Some(index) = key.as_array_index() {
                if let Some(slot) = elements.get(index as usize) {
                    if !slot.is_hole() {
                        return Some(Property::data(slot.clone()));
                    }
                    return None;
                }
            }
            if matches!(key, PropertyKey::String(s) if s.as_str() == "length") {
                return Some(Property::with_attributes(
                    Value::int(elements.len() as i64),
                    PropertyAttributes::WRITABLE,
                ));
            }
        }

        data.properties.get(key).cloned()
    }

    /// `object_get`: walks the prototype chain and applies getters.
    pub fn get(&self, vm: &mut Vm, key: &PropertyKey) -> Result<Value, Value> {
        let receiver = Value::Object(self.clone());
        let mut current = self.clone();
        loop {
            if let Some(property) = current.own_property(key) {
                return match property.value {
                    PropertyValue::Data(value) => {
                        #[cfg(feature = "lookup-cache")]
                        if current.ptr_eq(self) {
                            vm.lcache.insert(self, key, &value);
                        }
                        Ok(value)
                    }
                    PropertyValue::Accessor { get: Some(getter), .. } => {
                        crate::call::function_call(vm, &getter, receiver, &[])
                    }
                    PropertyValue::Accessor { get: None, .. } => Ok(Value::Undefined),
                };
            }
            let next = current.prototype();
            match next {
                Some(proto) => current = proto,
                None => return Ok(Value::Undefined),
            }
        }
    }

    /// `object_put_with_receiver` with ordinary-set semantics.
    pub fn put_with_receiver(
        &self,
        vm: &mut Vm,
        key: PropertyKey,
        value: Value,
        strict: bool,
    ) -> Result<(), Value> {
        // Fast-array slot write.
        {
            let mut data = self.borrow_mut();
            if let ObjectKind::Array { elements } = &mut data.kind {
                if let Some(index) = key.as_array_index() {
                    let index = index as usize;
                    if index < elements.len() {
                        elements[index] = value;
                        return Ok(());
                    }
                    if index <= elements.len() + 64 {
                        elements.resize(index, Value::Hole);
                        elements.push(value);
                        return Ok(());
                    }
                    // Far out-of-bounds writes fall back to named storage.
                } else if matches!(&key, PropertyKey::String(s) if s.as_str() == "length") {
                    if let Value::Int(new_len) = &value {
                        if *new_len >= 0 {
                            elements.resize(*new_len as usize, Value::Hole);
                            return Ok(());
                        }
                    }
                    drop(data);
                    throw!(vm, RangeError, "Invalid array length");
                }
            }
        }

        // Walk the chain for an existing property or a setter.
        let mut current = self.clone();
        loop {
            let existing = {
                let data = current.borrow();
                data.properties.get(&key).map(|p| (p.value.clone(), p.attributes))
            };
            if let Some((prop_value, attributes)) = existing {
                return match prop_value {
                    PropertyValue::Data(_) => {
                        if !attributes.contains(PropertyAttributes::WRITABLE) {
                            if strict {
                                throw!(vm, TypeError, "Cannot assign to read-only property");
                            }
                            return Ok(());
                        }
                        if current.ptr_eq(self) {
                            #[cfg(feature = "lookup-cache")]
                            vm.lcache.insert(self, &key, &value);
                            if let Some(p) = self.borrow_mut().properties.get_mut(&key) {
                                p.value = PropertyValue::Data(value);
                            }
                            Ok(())
                        } else {
                            self.create_own_data_property(vm, key, value, strict)
                        }
                    }
                    PropertyValue::Accessor { set: Some(setter), .. } => {
                        crate::call::function_call(vm, &setter, Value::Object(self.clone()), &[value])
                            .map(|_| ())
                    }
                    PropertyValue::Accessor { set: None, .. } => {
                        if strict {
                            throw!(vm, TypeError, "Cannot assign to property with no setter");
                        }
                        Ok(())
                    }
                };
            }
            match current.prototype() {
                Some(proto) => current = proto,
                None => return self.create_own_data_property(vm, key, value, strict),
            }
        }
    }

    fn create_own_data_property(
        &self,
        vm: &mut Vm,
        key: PropertyKey,
        value: Value,
        strict: bool,
    ) -> Result<(), Value> {
        if !self.borrow().extensible {
            if strict {
                throw!(vm, TypeError, "Cannot add property to non-extensible object");
            }
            return Ok(());
        }
        #[cfg(feature = "lookup-cache")]
        vm.lcache.insert(self, &key, &value);
        self.borrow_mut().properties.insert(key, Property::data(value));
        Ok(())
    }

    /// Defines or replaces an own property, bypassing setters.
    pub fn define_property(&self, vm: &mut Vm, key: PropertyKey, property: Property) {
        #[cfg(feature = "lookup-cache")]
        vm.lcache.invalidate(self, &key);
        #[cfg(not(feature = "lookup-cache"))]
        let _ = vm;

        let mut data = self.borrow_mut();
        if let ObjectKind::Array { elements } = &mut data.kind {
            if let Some(index) = key.as_array_index() {
                if let PropertyValue::Data(value) = &property.value {
                    let index = index as usize;
                    if index < elements.len() {
                        elements[index] = value.clone();
                        return;
                    }
                    if index <= elements.len() + 64 {
                        elements.resize(index, Value::Hole);
                        elements.push(value.clone());
                        return;
                    }
                }
            }
        }
        data.properties.insert(key, property);
    }

    /// Merges a getter or setter into an existing accessor property.
    pub fn define_accessor(&self, vm: &mut Vm, key: PropertyKey, accessor: ObjectHandle, is_getter: bool) {
        #[cfg(feature = "lookup-cache")]
        vm.lcache.invalidate(self, &key);
        #[cfg(not(feature = "lookup-cache"))]
        let _ = vm;

        let mut data = self.borrow_mut();
        let attributes = PropertyAttributes::ENUMERABLE | PropertyAttributes::CONFIGURABLE;
        match data.properties.get_mut(&key) {
            Some(Property {
                value: PropertyValue::Accessor { get, set },
                ..
            }) => {
                if is_getter {
                    *get = Some(accessor);
                } else {
                    *set = Some(accessor);
                }
            }
            _ => {
                let (get, set) = if is_getter {
                    (Some(accessor), None)
                } else {
                    (None, Some(accessor))
                };
                data.properties.insert(
                    key,
                    Property {
                        value: PropertyValue::Accessor { get, set },
                        attributes,
                    },
                );
            }
        }
    }

    pub fn delete(&self, vm: &mut Vm, key: &PropertyKey, strict: bool) -> Result<bool, Value> {
        #[cfg(feature = "lookup-cache")]
        vm.lcache.invalidate(self, key);

        let mut data = self.borrow_mut();
        if let ObjectKind::Array { elements } = &mut data.kind {
            if let Some(index) = key.as_array_index() {
                if let Some(slot) = elements.get_mut(index as usize) {
                    *slot = Value::Hole;
                    return Ok(true);
                }
            }
        }
        match data.properties.get(key) {
            Some(property) => {
                if property.attributes.contains(PropertyAttributes::CONFIGURABLE) {
                    data.properties.remove(key);
                    Ok(true)
                } else if strict {
                    drop(data);
                    throw!(vm, TypeError, "Cannot delete non-configurable property")
                } else {
                    Ok(false)
                }
            }
            None => Ok(true),
        }
    }

    /// Prototype-chain membership test; does not run getters.
    pub fn has_property(&self, key: &PropertyKey) -> bool {
        let mut current = self.clone();
        loop {
            if current.own_property(key).is_some() {
                return true;
            }
            match current.prototype() {
                Some(proto) => current = proto,
                None => return false,
            }
        }
    }

    pub fn has_own_property(&self, key: &PropertyKey) -> bool {
        self.own_property(key).is_some()
    }

    /// Own string-keyed property names with their enumerability; array
    /// indices first.
    pub fn own_string_keys(&self) -> Vec<(JsString, bool)> {
        let data = self.borrow();
        let mut keys = Vec::new();
        if let ObjectKind::Array { elements } = &data.kind {
            for (i, slot) in elements.iter().enumerate() {
                if !slot.is_hole() {
                    keys.push((JsString::from(i.to_string()), true));
                }
            }
        }
        for key in data.properties.keys() {
            if let PropertyKey::String(name) = key {
                if let Some(property) = data.properties.get(key) {
                    keys.push((
                        name.clone(),
                        property.attributes.contains(PropertyAttributes::ENUMERABLE),
                    ));
                }
            }
        }
        keys
    }

    /// Own enumerable string-keyed property names; array indices first.
    pub fn own_enumerable_string_keys(&self) -> Vec<JsString> {
        let data = self.borrow();
        let mut keys = Vec::new();
        if let ObjectKind::Array { elements } = &data.kind {
            for (i, slot) in elements.iter().enumerate() {
                if !slot.is_hole() {
                    keys.push(JsString::from(i.to_string()));
                }
            }
        }
        for key in data.properties.keys() {
            if let PropertyKey::String(name) = key {
                if let Some(property) = data.properties.get(key) {
                    if property.attributes.contains(PropertyAttributes::ENUMERABLE) {
                        keys.push(name.clone());
                    }
                }
            }
        }
        keys
    }
}
