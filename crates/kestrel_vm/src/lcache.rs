//! Direct-mapped property lookup cache.
//!
//! Keyed by (object identity, property key), holding the value of an own
//! data property. Writes update the cached value in place; deletions and
//! property redefinitions invalidate. Entries hold weak object references so
//! a recycled cell address can never satisfy a stale lookup.

use std::hash::{Hash, Hasher};

use rustc_hash::FxHasher;

use crate::object::{ObjectHandle, ObjectKind, PropertyKey, WeakObjectHandle};
use crate::value::Value;

const CACHE_SIZE: usize = 256;

struct Entry {
    object: WeakObjectHandle,
    key: PropertyKey,
    value: Value,
}

pub struct LookupCache {
    entries: Vec<Option<Entry>>,
    hits: u64,
    misses: u64,
}

impl Default for LookupCache {
    fn default() -> Self {
        let mut entries = Vec::with_capacity(CACHE_SIZE);
        entries.resize_with(CACHE_SIZE, || None);
        Self {
            entries,
            hits: 0,
            misses: 0,
        }
    }
}

impl LookupCache {
    fn slot(object: &ObjectHandle, key: &PropertyKey) -> usize {
        let mut hasher = FxHasher::default();
        object.id().hash(&mut hasher);
        key.hash(&mut hasher);
        hasher.finish() as usize % CACHE_SIZE
    }

    pub fn lookup(&mut self, object: &ObjectHandle, key: &PropertyKey) -> Option<Value> {
        let slot = Self::slot(object, key);
        if let Some(entry) = &self.entries[slot] {
            if entry.key == *key {
                if let Some(live) = entry.object.upgrade() {
                    if live.ptr_eq(object) {
                        self.hits += 1;
                        return Some(entry.value.clone());
                    }
                }
            }
        }
        self.misses += 1;
        None
    }

    pub fn insert(&mut self, object: &ObjectHandle, key: &PropertyKey, value: &Value) {
        // Fast-array slots and array lengths mutate without notifying the
        // cache, so arrays and index keys stay out of it.
        if key.as_array_index().is_some() || matches!(object.borrow().kind, ObjectKind::Array { .. }) {
            return;
        }
        let slot = Self::slot(object, key);
        self.entries[slot] = Some(Entry {
            object: object.downgrade(),
            key: key.clone(),
            value: value.clone(),
        });
    }

    pub fn invalidate(&mut self, object: &ObjectHandle, key: &PropertyKey) {
        let slot = Self::slot(object, key);
        if let Some(entry) = &self.entries[slot] {
            let same = entry.key == *key
                && entry.object.upgrade().is_some_and(|live| live.ptr_eq(object));
            if same {
                self.entries[slot] = None;
            }
        }
    }

    pub fn clear(&mut self) {
        self.entries.iter_mut().for_each(|e| *e = None);
    }

    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Property;
    use crate::Vm;

    #[test]
    fn hit_after_insert_and_miss_after_invalidate() {
        let mut cache = LookupCache::default();
        let object = ObjectHandle::ordinary();
        let key = PropertyKey::from("x");

        assert_eq!(cache.lookup(&object, &key), None);
        cache.insert(&object, &key, &Value::Int(5));
        assert_eq!(cache.lookup(&object, &key), Some(Value::Int(5)));

        cache.invalidate(&object, &key);
        assert_eq!(cache.lookup(&object, &key), None);
    }

    #[test]
    fn dead_objects_never_hit() {
        let mut cache = LookupCache::default();
        let key = PropertyKey::from("x");
        {
            let object = ObjectHandle::ordinary();
            cache.insert(&object, &key, &Value::Int(1));
        }
        // A new allocation may reuse the address; the weak handle is dead
        // either way.
        let other = ObjectHandle::ordinary();
        assert_eq!(cache.lookup(&other, &key), None);
    }

    #[test]
    fn arrays_are_not_cached() {
        let mut cache = LookupCache::default();
        let array = ObjectHandle::array(vec![Value::Int(1)]);
        cache.insert(&array, &PropertyKey::from("0"), &Value::Int(1));
        assert_eq!(cache.lookup(&array, &PropertyKey::from("0")), None);
    }

    #[test]
    fn delete_invalidates_through_the_object_api() {
        let mut vm = Vm::new(Default::default());
        let object = ObjectHandle::ordinary();
        let key = PropertyKey::from("gone");
        object.define_property(&mut vm, key.clone(), Property::data(Value::Int(1)));
        vm.lcache.insert(&object, &key, &Value::Int(1));
        object.delete(&mut vm, &key, false).unwrap();
        assert_eq!(vm.lcache.lookup(&object, &key), None);
    }
}
