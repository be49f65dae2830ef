//! Function object payloads. The invocation protocol lives in `crate::call`.

use std::rc::Rc;

use kestrel_middle::{CodeFlags, CodeUnit};

use super::ObjectHandle;
use crate::environment::EnvironmentHandle;
use crate::value::{JsString, Value};
use crate::Vm;

pub type NativeFn = fn(&mut Vm, Value, &[Value]) -> Result<Value, Value>;

#[derive(Debug)]
pub struct UserFunction {
    pub code: Rc<CodeUnit>,
    /// The lexical environment the closure was created in.
    pub scope: EnvironmentHandle,
    /// `[[HomeObject]]`; set for methods and class constructors.
    pub home_object: Option<ObjectHandle>,
    pub name: Option<JsString>,
}

#[derive(Clone)]
pub struct NativeFunction {
    pub name: &'static str,
    pub func: NativeFn,
}

impl std::fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeFunction").field("name", &self.name).finish()
    }
}

#[derive(Debug)]
pub enum FunctionData {
    User(UserFunction),
    Native(NativeFunction),
    /// Default constructor of a class without an explicit one. The derived
    /// form forwards its arguments to the super constructor.
    ImplicitConstructor { derived: bool },
}

impl FunctionData {
    pub fn is_constructor(&self) -> bool {
        match self {
            FunctionData::User(user) => {
                // Arrow functions and generators are not constructable.
                !user.code.flags.intersects(CodeFlags::ARROW | CodeFlags::GENERATOR)
            }
            FunctionData::Native(_) => false,
            FunctionData::ImplicitConstructor { .. } => true,
        }
    }
}
