//! `get_value` / `set_value` and the identifier operations the dispatch loop
//! leans on.

use crate::frame::Frame;
use crate::object::{ObjectHandle, ObjectKind, PropertyKey};
use crate::throw;
use crate::value::{JsString, Value};
use crate::Vm;

/// The value of `object[property]`, with the fast-array and lookup-cache
/// short cuts in front of the generic object walk.
pub fn get_value(vm: &mut Vm, object: &Value, property: &Value) -> Result<Value, Value> {
    if let Value::Object(obj) = object {
        // Fast path: small non-negative index into a fast array.
        if let Value::Int(index) = property {
            if *index >= 0 {
                let data = obj.borrow();
                if let ObjectKind::Array { elements } = &data.kind {
                    if let Some(slot) = elements.get(*index as usize) {
                        if !slot.is_hole() {
                            return Ok(slot.clone());
                        }
                    }
                }
            }
        }

        let key = property.to_prop_name(vm)?;

        #[cfg(feature = "lookup-cache")]
        if let Some(value) = vm.lcache.lookup(obj, &key) {
            return Ok(value);
        }

        let obj = obj.clone();
        return obj.get(vm, &key);
    }

    if object.is_nullish() {
        let shown = property
            .to_js_string(vm)
            .map(|s| s.as_str().to_string())
            .unwrap_or_else(|_| "...".into());
        throw!(
            vm,
            TypeError,
            "Cannot read property '{}' of {}",
            shown,
            if object.is_null() { "null" } else { "undefined" }
        );
    }

    get_value_primitive_base(vm, object, property)
}

/// Property reads on primitive bases. Without a builtin library the only
/// observable properties are string lengths and string indices.
fn get_value_primitive_base(vm: &mut Vm, base: &Value, property: &Value) -> Result<Value, Value> {
    if let Value::String(s) = base {
        if let Value::Int(index) = property {
            if *index >= 0 {
                return Ok(match s.as_str().chars().nth(*index as usize) {
                    Some(c) => Value::string(c.to_string()),
                    None => Value::Undefined,
                });
            }
        }
        let key = property.to_prop_name(vm)?;
        if matches!(&key, PropertyKey::String(name) if name.as_str() == "length") {
            return Ok(Value::int(s.as_str().chars().count() as i64));
        }
    }
    Ok(Value::Undefined)
}

/// `set_value`: the dual of `get_value`.
///
/// Lexical-environment bases route to `set_mutable_binding`; other non-object
/// bases are coerced to a wrapper that is marked non-extensible before the
/// put, so the write can only succeed where the standard says it may.
pub fn set_value(
    vm: &mut Vm,
    base: &Value,
    property: &Value,
    value: Value,
    strict: bool,
) -> Result<(), Value> {
    match base {
        Value::Object(obj) => {
            let key = property.to_prop_name(vm)?;
            let obj = obj.clone();
            obj.put_with_receiver(vm, key, value, strict)
        }
        Value::Environment(env) => {
            let name = match property {
                Value::String(name) => name.clone(),
                _ => unreachable!("environment references carry string names"),
            };
            env.clone().set_mutable_binding(vm, &name, value, strict)
        }
        _ => {
            base.check_object_coercible(vm)?;
            let wrapper = base.to_object(vm)?;
            wrapper.prevent_extensions();
            let key = property.to_prop_name(vm)?;
            wrapper.put_with_receiver(vm, key, value, strict)
        }
    }
}

/// `IDENT_REFERENCE`: pushes the 3-slot reference, either
/// `(REGISTER_REF, index, value)` or `(environment, name, value)`.
pub fn push_ident_reference(vm: &mut Vm, frame: &mut Frame, index: u16) -> Result<(), Value> {
    if frame.code.is_register(index) {
        let value = frame.registers[usize::from(index)].clone();
        frame.stack.push(Value::RegisterRef(index));
        frame.stack.push(Value::Int(i32::from(index)));
        frame.stack.push(value);
        return Ok(());
    }

    let name = frame.ident_name(index);
    let holder = match frame.lex_env.find(&name) {
        Some(env) => env,
        None => throw!(vm, ReferenceError, "{} is not defined", name),
    };
    let value = holder.get_binding_value(vm, &name)?;
    frame.stack.push(Value::Environment(holder));
    frame.stack.push(Value::String(name));
    frame.stack.push(value);
    Ok(())
}

/// `TYPEOF_IDENT`: unresolved names yield `"undefined"` without raising.
pub fn typeof_ident(vm: &mut Vm, frame: &mut Frame, index: u16) -> Result<Value, Value> {
    if frame.code.is_register(index) {
        return Ok(Value::string(frame.registers[usize::from(index)].type_of().as_str()));
    }
    let name = frame.ident_name(index);
    match frame.lex_env.find(&name) {
        None => Ok(Value::string("undefined")),
        Some(holder) => {
            let value = holder.get_binding_value(vm, &name)?;
            Ok(Value::string(value.type_of().as_str()))
        }
    }
}

/// `delete identifier`: registers and declarative bindings are
/// non-configurable; object-environment bindings delete their property.
pub fn delete_ident(vm: &mut Vm, frame: &Frame, index: u16) -> Result<Value, Value> {
    if frame.code.is_register(index) {
        return Ok(Value::Boolean(false));
    }
    let name = frame.ident_name(index);
    match frame.lex_env.find(&name) {
        None => Ok(Value::Boolean(true)),
        Some(holder) => match holder.binding_object() {
            Some(object) => Ok(Value::Boolean(object.delete(vm, &name.into(), false)?)),
            None => Ok(Value::Boolean(false)),
        },
    }
}

/// `delete object[property]`.
pub fn delete_property(
    vm: &mut Vm,
    base: &Value,
    property: &Value,
    strict: bool,
) -> Result<Value, Value> {
    base.check_object_coercible(vm)?;
    let key = property.to_prop_name(vm)?;
    match base {
        Value::Object(obj) => {
            let obj = obj.clone();
            Ok(Value::Boolean(obj.delete(vm, &key, strict)?))
        }
        _ => Ok(Value::Boolean(true)),
    }
}

/// Snapshots the enumerable string keys for `for-in`: own keys first, then
/// the prototype chain, shadowed names excluded. Returns `None` for nullish
/// bases (the loop body is skipped entirely).
pub fn for_in_snapshot(
    vm: &mut Vm,
    value: &Value,
) -> Result<Option<(ObjectHandle, Vec<JsString>)>, Value> {
    if value.is_nullish() {
        return Ok(None);
    }
    let object = value.to_object(vm)?;

    let mut seen = rustc_hash::FxHashSet::default();
    let mut keys = Vec::new();
    let mut current = Some(object.clone());
    while let Some(obj) = current {
        for (name, enumerable) in obj.own_string_keys() {
            if seen.insert(name.clone()) && enumerable {
                keys.push(name);
            }
        }
        current = obj.prototype();
    }

    if keys.is_empty() {
        return Ok(None);
    }
    Ok(Some((object, keys)))
}

/// The implicit `this` of a callee reached through a reference (GetThisValue):
/// property references keep their base as the receiver, object-bound
/// environments (`with`) supply their binding object, and declarative
/// environments and register references resolve to `undefined`.
pub fn implicit_this(base: &Value) -> Value {
    match base {
        Value::Environment(env) => match env.binding_object() {
            Some(object) => Value::Object(object),
            None => Value::Undefined,
        },
        Value::RegisterRef(_) => Value::Undefined,
        other => other.clone(),
    }
}
