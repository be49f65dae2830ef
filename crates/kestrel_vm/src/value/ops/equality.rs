//! Equality and relational operators.

use super::super::conversions::PreferredType;
use super::super::Value;
use crate::throw;
use crate::Vm;

impl Value {
    /// `===`. Two direct integers compare by raw payload.
    pub fn strict_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Int(l), Value::Int(r)) => l == r,
            (Value::Number(l), Value::Number(r)) => l == r,
            // The constructors keep integral numbers canonical, but a value
            // produced outside the VM may still arrive unnormalized.
            (Value::Int(l), Value::Number(r)) => f64::from(*l) == *r,
            (Value::Number(l), Value::Int(r)) => *l == f64::from(*r),
            (Value::Boolean(l), Value::Boolean(r)) => l == r,
            (Value::Undefined, Value::Undefined) => true,
            (Value::Null, Value::Null) => true,
            (Value::String(l), Value::String(r)) => l == r,
            (Value::Symbol(l), Value::Symbol(r)) => l == r,
            (Value::Object(l), Value::Object(r)) => l.ptr_eq(r),
            _ => false,
        }
    }

    /// `==`, the abstract equality comparison.
    pub fn abstract_eq(&self, other: &Self, vm: &mut Vm) -> Result<bool, Value> {
        if std::mem::discriminant(self) == std::mem::discriminant(other)
            || (self.is_number() && other.is_number())
        {
            return Ok(self.strict_eq(other));
        }

        match (self, other) {
            (Value::Undefined | Value::Null, Value::Undefined | Value::Null) => Ok(true),
            (Value::String(_), _) | (_, Value::String(_)) if self.is_number() || other.is_number() => {
                let l = self.to_number(vm)?;
                let r = other.to_number(vm)?;
                Ok(l == r)
            }
            (Value::Boolean(_), _) => {
                let l = Value::number(self.to_number(vm)?);
                l.abstract_eq(other, vm)
            }
            (_, Value::Boolean(_)) => {
                let r = Value::number(other.to_number(vm)?);
                self.abstract_eq(&r, vm)
            }
            (Value::Object(_), Value::Int(_) | Value::Number(_) | Value::String(_) | Value::Symbol(_)) => {
                let l = self.to_primitive(vm, None)?;
                l.abstract_eq(other, vm)
            }
            (Value::Int(_) | Value::Number(_) | Value::String(_) | Value::Symbol(_), Value::Object(_)) => {
                let r = other.to_primitive(vm, None)?;
                self.abstract_eq(&r, vm)
            }
            _ => Ok(false),
        }
    }

    fn relational(&self, other: &Self, vm: &mut Vm) -> Result<Option<std::cmp::Ordering>, Value> {
        if let (Value::Int(l), Value::Int(r)) = (self, other) {
            return Ok(Some(l.cmp(r)));
        }

        let left = self.to_primitive(vm, Some(PreferredType::Number))?;
        let right = other.to_primitive(vm, Some(PreferredType::Number))?;

        if let (Value::String(l), Value::String(r)) = (&left, &right) {
            return Ok(Some(l.as_str().cmp(r.as_str())));
        }

        let l = left.to_number(vm)?;
        let r = right.to_number(vm)?;
        Ok(l.partial_cmp(&r))
    }

    pub fn lt(&self, other: &Self, vm: &mut Vm) -> Result<bool, Value> {
        Ok(matches!(self.relational(other, vm)?, Some(std::cmp::Ordering::Less)))
    }

    pub fn gt(&self, other: &Self, vm: &mut Vm) -> Result<bool, Value> {
        Ok(matches!(self.relational(other, vm)?, Some(std::cmp::Ordering::Greater)))
    }

    pub fn le(&self, other: &Self, vm: &mut Vm) -> Result<bool, Value> {
        Ok(matches!(
            self.relational(other, vm)?,
            Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal)
        ))
    }

    pub fn ge(&self, other: &Self, vm: &mut Vm) -> Result<bool, Value> {
        Ok(matches!(
            self.relational(other, vm)?,
            Some(std::cmp::Ordering::Greater | std::cmp::Ordering::Equal)
        ))
    }

    /// `instanceof`: walks the prototype chain against `target.prototype`.
    pub fn instance_of(&self, target: &Self, vm: &mut Vm) -> Result<bool, Value> {
        let constructor = match target {
            Value::Object(o) if o.is_callable() => o.clone(),
            _ => throw!(vm, TypeError, "Right-hand side of 'instanceof' is not callable"),
        };

        let object = match self {
            Value::Object(o) => o.clone(),
            _ => return Ok(false),
        };

        let prototype = match constructor.get(vm, &"prototype".into())? {
            Value::Object(p) => p,
            _ => throw!(vm, TypeError, "Function has non-object prototype in instanceof check"),
        };

        let mut current = object.prototype();
        while let Some(proto) = current {
            if proto.ptr_eq(&prototype) {
                return Ok(true);
            }
            current = proto.prototype();
        }
        Ok(false)
    }

    /// The `in` operator.
    pub fn has_property_in(&self, object: &Self, vm: &mut Vm) -> Result<bool, Value> {
        let object = match object {
            Value::Object(o) => o.clone(),
            _ => throw!(vm, TypeError, "Cannot use 'in' operator on a non-object"),
        };
        let key = self.to_prop_name(vm)?;
        Ok(object.has_property(&key))
    }
}
