//! Arithmetic and bitwise operators.
//!
//! Every binary operator first tries the direct-integer fast path and only
//! then falls back to the full conversion pipeline. Fast paths must produce
//! exactly the value the float path would (including `-0.0`, which the
//! integer representation cannot hold).

use super::super::{Typeof, Value, MULTIPLY_MAX};
use crate::Vm;

impl Value {
    pub fn add(&self, other: &Self, vm: &mut Vm) -> Result<Value, Value> {
        if let (Value::Int(l), Value::Int(r)) = (self, other) {
            return Ok(Value::int(i64::from(*l) + i64::from(*r)));
        }

        let left = self.to_primitive(vm, None)?;
        let right = other.to_primitive(vm, None)?;

        if matches!(left.type_of(), Typeof::String) || matches!(right.type_of(), Typeof::String) {
            let lstr = left.to_js_string(vm)?;
            let rstr = right.to_js_string(vm)?;
            let mut out = String::with_capacity(lstr.as_str().len() + rstr.as_str().len());
            out.push_str(lstr.as_str());
            out.push_str(rstr.as_str());
            Ok(Value::string(out))
        } else {
            let lnum = left.to_number(vm)?;
            let rnum = right.to_number(vm)?;
            Ok(Value::number(lnum + rnum))
        }
    }

    pub fn sub(&self, other: &Self, vm: &mut Vm) -> Result<Value, Value> {
        if let (Value::Int(l), Value::Int(r)) = (self, other) {
            return Ok(Value::int(i64::from(*l) - i64::from(*r)));
        }
        let lnum = self.to_number(vm)?;
        let rnum = other.to_number(vm)?;
        Ok(Value::number(lnum - rnum))
    }

    pub fn mul(&self, other: &Self, vm: &mut Vm) -> Result<Value, Value> {
        if let (Value::Int(l), Value::Int(r)) = (self, other) {
            // The magnitude guard keeps the product exact; zero operands fall
            // through because the result may be -0.0.
            if *l != 0 && *r != 0 && l.abs() <= MULTIPLY_MAX && r.abs() <= MULTIPLY_MAX {
                return Ok(Value::int(i64::from(*l) * i64::from(*r)));
            }
        }
        let lnum = self.to_number(vm)?;
        let rnum = other.to_number(vm)?;
        Ok(Value::number(lnum * rnum))
    }

    pub fn div(&self, other: &Self, vm: &mut Vm) -> Result<Value, Value> {
        let lnum = self.to_number(vm)?;
        let rnum = other.to_number(vm)?;
        Ok(Value::number(lnum / rnum))
    }

    pub fn rem(&self, other: &Self, vm: &mut Vm) -> Result<Value, Value> {
        if let (Value::Int(l), Value::Int(r)) = (self, other) {
            if *r != 0 {
                let remainder = l % r;
                // A zero remainder with a negative dividend is -0.0.
                if remainder != 0 || *l >= 0 {
                    return Ok(Value::Int(remainder));
                }
            }
        }
        let lnum = self.to_number(vm)?;
        let rnum = other.to_number(vm)?;
        Ok(Value::number(lnum % rnum))
    }

    pub fn pow(&self, other: &Self, vm: &mut Vm) -> Result<Value, Value> {
        let lnum = self.to_number(vm)?;
        let rnum = other.to_number(vm)?;
        Ok(Value::number(lnum.powf(rnum)))
    }

    pub fn bitor(&self, other: &Self, vm: &mut Vm) -> Result<Value, Value> {
        if let (Value::Int(l), Value::Int(r)) = (self, other) {
            return Ok(Value::Int(l | r));
        }
        let (l, r) = (self.to_int32(vm)?, other.to_int32(vm)?);
        Ok(Value::int32(l | r))
    }

    pub fn bitxor(&self, other: &Self, vm: &mut Vm) -> Result<Value, Value> {
        if let (Value::Int(l), Value::Int(r)) = (self, other) {
            return Ok(Value::Int(l ^ r));
        }
        let (l, r) = (self.to_int32(vm)?, other.to_int32(vm)?);
        Ok(Value::int32(l ^ r))
    }

    pub fn bitand(&self, other: &Self, vm: &mut Vm) -> Result<Value, Value> {
        if let (Value::Int(l), Value::Int(r)) = (self, other) {
            return Ok(Value::Int(l & r));
        }
        let (l, r) = (self.to_int32(vm)?, other.to_int32(vm)?);
        Ok(Value::int32(l & r))
    }

    pub fn shl(&self, other: &Self, vm: &mut Vm) -> Result<Value, Value> {
        let (l, r) = (self.to_int32(vm)?, other.to_uint32(vm)?);
        Ok(Value::int32(l.wrapping_shl(r & 31)))
    }

    pub fn shr(&self, other: &Self, vm: &mut Vm) -> Result<Value, Value> {
        let (l, r) = (self.to_int32(vm)?, other.to_uint32(vm)?);
        Ok(Value::int32(l.wrapping_shr(r & 31)))
    }

    pub fn ushr(&self, other: &Self, vm: &mut Vm) -> Result<Value, Value> {
        let (l, r) = (self.to_uint32(vm)?, other.to_uint32(vm)?);
        Ok(Value::int(i64::from(l.wrapping_shr(r & 31))))
    }

    pub fn bitnot(&self, vm: &mut Vm) -> Result<Value, Value> {
        if let Value::Int(i) = self {
            return Ok(Value::Int(!i));
        }
        let v = self.to_int32(vm)?;
        Ok(Value::int32(!v))
    }

    pub fn unary_plus(&self, vm: &mut Vm) -> Result<Value, Value> {
        if self.is_number() {
            return Ok(self.clone());
        }
        Ok(Value::number(self.to_number(vm)?))
    }

    pub fn unary_minus(&self, vm: &mut Vm) -> Result<Value, Value> {
        if let Value::Int(i) = self {
            // -0 has no direct representation.
            if *i != 0 {
                return Ok(Value::int(-i64::from(*i)));
            }
        }
        Ok(Value::number(-self.to_number(vm)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::INTEGER_NUMBER_MAX;

    fn vm() -> Vm {
        Vm::new(Default::default())
    }

    #[test]
    fn int_addition_promotes_on_overflow() {
        let mut vm = vm();
        let max = Value::Int(INTEGER_NUMBER_MAX);
        let sum = max.add(&Value::Int(1), &mut vm).unwrap();
        assert_eq!(sum, Value::Number(f64::from(INTEGER_NUMBER_MAX) + 1.0));
        assert_eq!(Value::Int(1).add(&Value::Int(2), &mut vm).unwrap(), Value::Int(3));
    }

    #[test]
    fn string_concatenation_wins_over_numeric_addition() {
        let mut vm = vm();
        let result = Value::Int(1).add(&Value::string("2"), &mut vm).unwrap();
        assert_eq!(result, Value::string("12"));
    }

    #[test]
    fn negative_zero_escapes_the_fast_paths() {
        let mut vm = vm();
        let product = Value::Int(-3).mul(&Value::Int(0), &mut vm).unwrap();
        assert!(matches!(product, Value::Number(n) if n == 0.0 && n.is_sign_negative()));

        let remainder = Value::Int(-4).rem(&Value::Int(2), &mut vm).unwrap();
        assert!(matches!(remainder, Value::Number(n) if n == 0.0 && n.is_sign_negative()));

        let negated = Value::Int(0).unary_minus(&mut vm).unwrap();
        assert!(matches!(negated, Value::Number(n) if n == 0.0 && n.is_sign_negative()));
    }

    #[test]
    fn int_and_float_arithmetic_agree() {
        let mut vm = vm();
        for (l, r) in [(7, 3), (-7, 3), (1000, -999), (0, 5)] {
            let fast = Value::Int(l).rem(&Value::Int(r), &mut vm).unwrap();
            let slow = Value::Number(f64::from(l))
                .rem(&Value::Number(f64::from(r)), &mut vm)
                .unwrap();
            assert_eq!(fast.as_number(), slow.as_number(), "{l} % {r}");
        }
    }

    #[test]
    fn bitwise_ops_preserve_the_int_representation() {
        let mut vm = vm();
        assert_eq!(Value::Int(6).bitand(&Value::Int(3), &mut vm).unwrap(), Value::Int(2));
        assert_eq!(Value::Int(-1).bitnot(&mut vm).unwrap(), Value::Int(0));
        assert_eq!(
            Value::Number(4294967296.0).bitor(&Value::Int(1), &mut vm).unwrap(),
            Value::Int(1)
        );
        // 1 << 31 wraps to the sign bit and must leave the direct-int window.
        let shifted = Value::Int(1).shl(&Value::Int(31), &mut vm).unwrap();
        assert_eq!(shifted, Value::Number(-2147483648.0));
    }
}
