//! Abstract-operation conversions (`ToNumber`, `ToString`, `ToObject`, ...).

use super::{JsString, Value};
use crate::object::{ObjectHandle, ObjectKind, PropertyKey};
use crate::throw;
use crate::Vm;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreferredType {
    Number,
    String,
}

impl Value {
    pub fn to_number(&self, vm: &mut Vm) -> Result<f64, Value> {
        match self {
            Value::Int(i) => Ok(f64::from(*i)),
            Value::Number(n) => Ok(*n),
            Value::Boolean(b) => Ok(f64::from(*b)),
            Value::Undefined => Ok(f64::NAN),
            Value::Null => Ok(0.0),
            Value::String(s) => Ok(string_to_number(s.as_str())),
            Value::Symbol(_) => throw!(vm, TypeError, "Cannot convert a Symbol value to a number"),
            Value::Object(_) => {
                let primitive = self.to_primitive(vm, Some(PreferredType::Number))?;
                primitive.to_number(vm)
            }
            _ => Ok(f64::NAN),
        }
    }

    /// `ToInt32`: modular wrap into the signed 32-bit range.
    pub fn to_int32(&self, vm: &mut Vm) -> Result<i32, Value> {
        if let Value::Int(i) = self {
            return Ok(*i);
        }
        let number = self.to_number(vm)?;
        Ok(double_to_int32(number))
    }

    pub fn to_uint32(&self, vm: &mut Vm) -> Result<u32, Value> {
        Ok(self.to_int32(vm)? as u32)
    }

    pub fn to_boolean(&self) -> bool {
        self.is_truthy()
    }

    pub fn to_js_string(&self, vm: &mut Vm) -> Result<JsString, Value> {
        match self {
            Value::Int(i) => Ok(i.to_string().into()),
            Value::Number(n) => Ok(number_to_string(*n).into()),
            Value::Boolean(b) => Ok(if *b { "true" } else { "false" }.into()),
            Value::Undefined => Ok("undefined".into()),
            Value::Null => Ok("null".into()),
            Value::String(s) => Ok(s.clone()),
            Value::Symbol(_) => throw!(vm, TypeError, "Cannot convert a Symbol value to a string"),
            Value::Object(_) => {
                let primitive = self.to_primitive(vm, Some(PreferredType::String))?;
                primitive.to_js_string(vm)
            }
            _ => Ok("undefined".into()),
        }
    }

    /// `ToPropertyKey`; direct integers take the uint-string shortcut.
    pub fn to_prop_name(&self, vm: &mut Vm) -> Result<PropertyKey, Value> {
        match self {
            Value::Symbol(sym) => Ok(PropertyKey::Symbol(sym.clone())),
            Value::Int(i) if *i >= 0 => Ok(PropertyKey::from_index(*i as u32)),
            _ => Ok(PropertyKey::String(self.to_js_string(vm)?)),
        }
    }

    pub fn check_object_coercible(&self, vm: &mut Vm) -> Result<(), Value> {
        if self.is_nullish() {
            throw!(vm, TypeError, "Cannot convert undefined or null to object");
        }
        Ok(())
    }

    /// `ToObject`. Primitive wrappers are bare cells; the accessors mark them
    /// non-extensible before any write reaches them.
    pub fn to_object(&self, vm: &mut Vm) -> Result<ObjectHandle, Value> {
        match self {
            Value::Object(o) => Ok(o.clone()),
            Value::Undefined | Value::Null => {
                throw!(vm, TypeError, "Cannot convert undefined or null to object")
            }
            _ => Ok(ObjectHandle::ordinary()),
        }
    }

    /// `ToPrimitive` / OrdinaryToPrimitive.
    pub fn to_primitive(&self, vm: &mut Vm, hint: Option<PreferredType>) -> Result<Value, Value> {
        let object = match self {
            Value::Object(o) => o.clone(),
            _ => return Ok(self.clone()),
        };

        let methods: [&str; 2] = match hint {
            Some(PreferredType::String) => ["toString", "valueOf"],
            _ => ["valueOf", "toString"],
        };

        for name in methods {
            let method = object.get(vm, &PropertyKey::from(name))?;
            if let Value::Object(f) = &method {
                if f.is_callable() {
                    let result = crate::call::function_call(vm, f, self.clone(), &[])?;
                    if !result.is_object() {
                        return Ok(result);
                    }
                }
            }
        }

        // No user-supplied conversion; fall back per object kind the way the
        // default prototype methods would behave.
        let fallback = {
            let data = object.borrow();
            match &data.kind {
                ObjectKind::Array { .. } => None,
                ObjectKind::Error { kind, message } => {
                    Some(Value::string(format!("{}: {}", kind.name(), message)))
                }
                ObjectKind::Function(_) => Some(Value::string("function () { [native code] }")),
                _ => Some(Value::string("[object Object]")),
            }
        };
        if let Some(value) = fallback {
            return Ok(value);
        }

        // Arrays stringify element-wise, matching Array.prototype.toString.
        let length = object.array_length().unwrap_or(0);
        let mut out = String::new();
        for i in 0..length {
            if i > 0 {
                out.push(',');
            }
            let element = object.get(vm, &PropertyKey::from_index(i))?;
            if !element.is_nullish() {
                out.push_str(element.to_js_string(vm)?.as_str());
            }
        }
        Ok(Value::string(out))
    }
}

pub fn double_to_int32(number: f64) -> i32 {
    if !number.is_finite() || number == 0.0 {
        return 0;
    }
    let modulo = number.trunc().rem_euclid(4294967296.0);
    let unsigned = modulo as u32;
    unsigned as i32
}

pub fn string_to_number(s: &str) -> f64 {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    if let Some(hex) = trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
        return match u64::from_str_radix(hex, 16) {
            Ok(v) => v as f64,
            Err(_) => f64::NAN,
        };
    }
    match trimmed {
        "Infinity" | "+Infinity" => f64::INFINITY,
        "-Infinity" => f64::NEG_INFINITY,
        _ => trimmed.parse().unwrap_or(f64::NAN),
    }
}

pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        return "NaN".into();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.into();
    }
    if n == 0.0 {
        return "0".into();
    }
    if n.fract() == 0.0 && n.abs() < 9.2e18 {
        return (n as i64).to_string();
    }
    format!("{n}")
}
