//! Per-VM singletons.

use crate::object::{ObjectHandle, ObjectKind, Property, PropertyAttributes, PropertyKey};
use crate::object::function::{FunctionData, NativeFunction};
use crate::value::Value;

pub struct Statics {
    /// Prototype of generator objects; carries `next` and `return`.
    pub generator_prototype: ObjectHandle,
}

impl Statics {
    pub fn new() -> Self {
        let generator_prototype = ObjectHandle::ordinary();
        for (name, func) in [
            ("next", crate::generator::generator_next as crate::object::function::NativeFn),
            ("return", crate::generator::generator_return),
        ] {
            let method = ObjectHandle::new(ObjectKind::Function(FunctionData::Native(
                NativeFunction { name, func },
            )));
            generator_prototype.borrow_mut().properties.insert(
                PropertyKey::from(name),
                Property::with_attributes(
                    Value::Object(method),
                    PropertyAttributes::WRITABLE | PropertyAttributes::CONFIGURABLE,
                ),
            );
        }
        Self { generator_prototype }
    }
}

impl Default for Statics {
    fn default() -> Self {
        Self::new()
    }
}
