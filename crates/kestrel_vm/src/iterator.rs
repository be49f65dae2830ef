//! The iterator-protocol collaborator: `get_iterator`, `iterator_step`,
//! `iterator_value`, `iterator_close`.

use crate::object::{ObjectHandle, ObjectKind, Property, PropertyKey};
use crate::throw;
use crate::value::Value;
use crate::Vm;

/// Builds a `{ value, done }` iterator-result object.
pub fn make_iter_result(vm: &mut Vm, value: Value, done: bool) -> Value {
    let result = ObjectHandle::ordinary();
    result.define_property(vm, PropertyKey::from("value"), Property::data(value));
    result.define_property(vm, PropertyKey::from("done"), Property::data(Value::Boolean(done)));
    Value::Object(result)
}

/// `GetIterator`. Arrays and strings iterate through internal iterator
/// objects; generators iterate as themselves; any other object exposing a
/// callable `next` is taken as an iterator directly.
pub fn get_iterator(vm: &mut Vm, value: &Value) -> Result<Value, Value> {
    match value {
        Value::Object(object) => {
            match &object.borrow().kind {
                ObjectKind::Array { .. } => {
                    return Ok(Value::Object(ObjectHandle::new(ObjectKind::ArrayIterator {
                        target: object.clone(),
                        index: 0,
                    })));
                }
                // Generators are their own iterators.
                ObjectKind::Generator(_) => return Ok(value.clone()),
                _ => {}
            }
            let next = object.get(vm, &PropertyKey::from("next"))?;
            if matches!(&next, Value::Object(f) if f.is_callable()) {
                return Ok(value.clone());
            }
            throw!(vm, TypeError, "Object is not iterable")
        }
        Value::String(s) => {
            let iterator = ObjectHandle::new(ObjectKind::StringIterator {
                string: s.clone(),
                index: 0,
            });
            Ok(Value::Object(iterator))
        }
        _ => throw!(vm, TypeError, "Value is not iterable"),
    }
}

/// `IteratorStep`: `false` when exhausted, the result object otherwise.
pub fn iterator_step(vm: &mut Vm, iterator: &Value) -> Result<Value, Value> {
    let object = match iterator {
        Value::Object(o) => o.clone(),
        _ => throw!(vm, TypeError, "Iterator is not an object"),
    };

    // Internal iterators step without a method call.
    let internal = {
        let mut data = object.borrow_mut();
        match &mut data.kind {
            ObjectKind::ArrayIterator { target, index } => {
                let element = loop {
                    let length = target.array_length().unwrap_or(0);
                    if *index >= length {
                        break None;
                    }
                    let i = *index;
                    *index += 1;
                    match &target.borrow().kind {
                        ObjectKind::Array { elements } => {
                            let slot = elements[i as usize].clone();
                            break Some(if slot.is_hole() { Value::Undefined } else { slot });
                        }
                        _ => break None,
                    }
                };
                Some(element)
            }
            ObjectKind::StringIterator { string, index } => {
                let rest = &string.as_str()[*index..];
                Some(rest.chars().next().map(|c| {
                    *index += c.len_utf8();
                    Value::string(c.to_string())
                }))
            }
            _ => None,
        }
    };

    if let Some(stepped) = internal {
        return Ok(match stepped {
            Some(value) => make_iter_result(vm, value, false),
            None => Value::Boolean(false),
        });
    }

    let next = object.get(vm, &PropertyKey::from("next"))?;
    let next = match &next {
        Value::Object(f) if f.is_callable() => f.clone(),
        _ => throw!(vm, TypeError, "Iterator has no callable next method"),
    };
    let result = crate::call::function_call(vm, &next, iterator.clone(), &[])?;
    let result_obj = match &result {
        Value::Object(o) => o.clone(),
        _ => throw!(vm, TypeError, "Iterator result is not an object"),
    };
    let done = result_obj.get(vm, &PropertyKey::from("done"))?;
    if done.is_truthy() {
        Ok(Value::Boolean(false))
    } else {
        Ok(result)
    }
}

/// Reads `value` out of a step-result object.
pub fn iterator_value(vm: &mut Vm, result: &Value) -> Result<Value, Value> {
    match result {
        Value::Object(o) => o.clone().get(vm, &PropertyKey::from("value")),
        _ => Ok(Value::Undefined),
    }
}

/// `IteratorClose`: invokes the iterator's `return` method when present.
pub fn iterator_close(vm: &mut Vm, iterator: &Value) -> Result<Value, Value> {
    let object = match iterator {
        Value::Object(o) => o.clone(),
        _ => return Ok(Value::Undefined),
    };
    if matches!(
        object.borrow().kind,
        ObjectKind::ArrayIterator { .. } | ObjectKind::StringIterator { .. }
    ) {
        return Ok(Value::Undefined);
    }
    let ret = object.get(vm, &PropertyKey::from("return"))?;
    match &ret {
        Value::Object(f) if f.is_callable() => {
            crate::call::function_call(vm, f, iterator.clone(), &[])
        }
        _ => Ok(Value::Undefined),
    }
}

/// Collects `count` values from an iterable into a buffer; spread-argument
/// materialization and rest elements share this loop.
pub fn collect_into(vm: &mut Vm, iterable: &Value, out: &mut Vec<Value>) -> Result<(), Value> {
    let iterator = get_iterator(vm, iterable)?;
    loop {
        let step = iterator_step(vm, &iterator)?;
        if matches!(step, Value::Boolean(false)) {
            return Ok(());
        }
        out.push(iterator_value(vm, &step)?);
    }
}
