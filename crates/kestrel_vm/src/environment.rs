//! Lexical environments.
//!
//! Declarative environments hold named bindings (function and block scopes);
//! object-bound environments wrap an object (`with` and the global scope).
//! Block-flagged environments are transparent to `var` hoisting.

use std::cell::{Ref, RefCell, RefMut};
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::object::ObjectHandle;
use crate::throw;
use crate::value::{JsString, Value};
use crate::Vm;

#[derive(Debug)]
pub struct Binding {
    pub value: Value,
    pub mutable: bool,
}

#[derive(Debug)]
pub enum EnvKind {
    Declarative { bindings: FxHashMap<JsString, Binding> },
    Object { object: ObjectHandle },
}

#[derive(Debug)]
pub struct Environment {
    pub outer: Option<EnvironmentHandle>,
    pub kind: EnvKind,
    /// Block scopes and `with` scopes do not receive hoisted `var`s.
    pub block: bool,
}

#[derive(Debug, Clone)]
pub struct EnvironmentHandle(Rc<RefCell<Environment>>);

impl EnvironmentHandle {
    pub fn new_declarative(outer: Option<EnvironmentHandle>, block: bool) -> Self {
        Self(Rc::new(RefCell::new(Environment {
            outer,
            kind: EnvKind::Declarative {
                bindings: FxHashMap::default(),
            },
            block,
        })))
    }

    pub fn new_object(outer: Option<EnvironmentHandle>, object: ObjectHandle, block: bool) -> Self {
        Self(Rc::new(RefCell::new(Environment {
            outer,
            kind: EnvKind::Object { object },
            block,
        })))
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn borrow(&self) -> Ref<'_, Environment> {
        self.0.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, Environment> {
        self.0.borrow_mut()
    }

    pub fn outer(&self) -> Option<EnvironmentHandle> {
        self.borrow().outer.clone()
    }

    pub fn binding_object(&self) -> Option<ObjectHandle> {
        match &self.borrow().kind {
            EnvKind::Object { object } => Some(object.clone()),
            EnvKind::Declarative { .. } => None,
        }
    }

    pub fn has_binding(&self, name: &JsString) -> bool {
        match &self.borrow().kind {
            EnvKind::Declarative { bindings } => bindings.contains_key(name),
            EnvKind::Object { object } => object.has_property(&name.clone().into()),
        }
    }

    /// Creates a binding in this declarative environment. `Uninitialized`
    /// values model the temporal dead zone of `let`/`const`.
    pub fn create_binding(&self, name: JsString, value: Value, mutable: bool) {
        match &mut self.borrow_mut().kind {
            EnvKind::Declarative { bindings } => {
                bindings.insert(name, Binding { value, mutable });
            }
            EnvKind::Object { .. } => unreachable!("bindings are created in declarative environments"),
        }
    }

    /// Walks outward to the environment holding `name`, if any.
    pub fn find(&self, name: &JsString) -> Option<EnvironmentHandle> {
        let mut current = self.clone();
        loop {
            if current.has_binding(name) {
                return Some(current);
            }
            let outer = current.outer()?;
            current = outer;
        }
    }

    /// Nearest non-block environment, the target of `var` hoisting.
    pub fn nearest_var_scope(&self) -> EnvironmentHandle {
        let mut current = self.clone();
        while current.borrow().block {
            match current.outer() {
                Some(outer) => current = outer,
                None => break,
            }
        }
        current
    }

    /// Reads the binding from this environment, honoring the TDZ.
    pub fn get_binding_value(&self, vm: &mut Vm, name: &JsString) -> Result<Value, Value> {
        let object = match &self.borrow().kind {
            EnvKind::Declarative { bindings } => {
                let binding = &bindings[name];
                if matches!(binding.value, Value::Uninitialized) {
                    let name = name.clone();
                    throw!(vm, ReferenceError, "Cannot access '{}' before initialization", name);
                }
                return Ok(binding.value.clone());
            }
            EnvKind::Object { object } => object.clone(),
        };
        object.get(vm, &name.clone().into())
    }

    /// `set_mutable_binding` on this environment.
    pub fn set_mutable_binding(
        &self,
        vm: &mut Vm,
        name: &JsString,
        value: Value,
        strict: bool,
    ) -> Result<(), Value> {
        let object = match &mut self.borrow_mut().kind {
            EnvKind::Declarative { bindings } => {
                let binding = bindings.get_mut(name).expect("binding resolved before write");
                if !binding.mutable {
                    throw!(vm, TypeError, "Assignment to constant variable.");
                }
                if matches!(binding.value, Value::Uninitialized) {
                    let name = name.clone();
                    throw!(vm, ReferenceError, "Cannot access '{}' before initialization", name);
                }
                binding.value = value;
                return Ok(());
            }
            EnvKind::Object { object } => object.clone(),
        };
        object.put_with_receiver(vm, name.clone().into(), value, strict)
    }

    /// Initializes a TDZ slot; used by `ASSIGN_LET_CONST` and `super()`.
    pub fn initialize_binding(&self, name: &JsString, value: Value) {
        match &mut self.borrow_mut().kind {
            EnvKind::Declarative { bindings } => {
                let binding = bindings.get_mut(name).expect("binding created before initialization");
                debug_assert!(matches!(binding.value, Value::Uninitialized));
                binding.value = value;
            }
            EnvKind::Object { .. } => unreachable!("TDZ slots live in declarative environments"),
        }
    }

    /// Clones the topmost declarative environment, giving loop bodies a fresh
    /// copy of their bindings per iteration.
    pub fn clone_declarative(&self, copy_values: bool) -> EnvironmentHandle {
        let env = self.borrow();
        let bindings = match &env.kind {
            EnvKind::Declarative { bindings } => bindings
                .iter()
                .map(|(name, binding)| {
                    let value = if copy_values {
                        binding.value.clone()
                    } else {
                        Value::Uninitialized
                    };
                    (
                        name.clone(),
                        Binding {
                            value,
                            mutable: binding.mutable,
                        },
                    )
                })
                .collect(),
            EnvKind::Object { .. } => unreachable!("only declarative environments are cloned"),
        };
        EnvironmentHandle(Rc::new(RefCell::new(Environment {
            outer: env.outer.clone(),
            kind: EnvKind::Declarative { bindings },
            block: env.block,
        })))
    }
}

/// `resolve_reference_value`: chain walk plus read.
pub fn resolve_reference_value(
    vm: &mut Vm,
    env: &EnvironmentHandle,
    name: &JsString,
) -> Result<Value, Value> {
    match env.find(name) {
        Some(holder) => holder.get_binding_value(vm, name),
        None => {
            let name = name.clone();
            throw!(vm, ReferenceError, "{} is not defined", name)
        }
    }
}

/// `put_value_lex_env_base`: strict-aware assignment through the chain.
/// Unresolvable references create a global property in sloppy mode.
pub fn put_value_lex_env_base(
    vm: &mut Vm,
    env: &EnvironmentHandle,
    name: &JsString,
    strict: bool,
    value: Value,
) -> Result<(), Value> {
    match env.find(name) {
        Some(holder) => holder.set_mutable_binding(vm, name, value, strict),
        None if strict => {
            let name = name.clone();
            throw!(vm, ReferenceError, "{} is not defined", name)
        }
        None => {
            let global = vm.global();
            global.put_with_receiver(vm, name.clone().into(), value, false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vm() -> Vm {
        Vm::new(Default::default())
    }

    #[test]
    fn chain_resolution_prefers_inner_bindings() {
        let mut vm = vm();
        let outer = EnvironmentHandle::new_declarative(None, false);
        outer.create_binding("x".into(), Value::Int(1), true);
        let inner = EnvironmentHandle::new_declarative(Some(outer.clone()), true);
        inner.create_binding("x".into(), Value::Int(2), true);

        let value = resolve_reference_value(&mut vm, &inner, &"x".into()).unwrap();
        assert_eq!(value, Value::Int(2));
    }

    #[test]
    fn tdz_reads_raise_reference_errors() {
        let mut vm = vm();
        let env = EnvironmentHandle::new_declarative(None, false);
        env.create_binding("x".into(), Value::Uninitialized, true);

        let err = resolve_reference_value(&mut vm, &env, &"x".into()).unwrap_err();
        assert_eq!(
            crate::object::error::error_kind(&err),
            Some(crate::object::error::ErrorKind::ReferenceError)
        );

        env.initialize_binding(&"x".into(), Value::Int(5));
        let value = resolve_reference_value(&mut vm, &env, &"x".into()).unwrap();
        assert_eq!(value, Value::Int(5));
    }

    #[test]
    fn const_assignment_is_a_type_error() {
        let mut vm = vm();
        let env = EnvironmentHandle::new_declarative(None, false);
        env.create_binding("c".into(), Value::Int(1), false);
        let err = env
            .set_mutable_binding(&mut vm, &"c".into(), Value::Int(2), true)
            .unwrap_err();
        assert_eq!(
            crate::object::error::error_kind(&err),
            Some(crate::object::error::ErrorKind::TypeError)
        );
    }

    #[test]
    fn var_scope_walks_past_blocks() {
        let base = EnvironmentHandle::new_declarative(None, false);
        let block = EnvironmentHandle::new_declarative(Some(base.clone()), true);
        let inner = EnvironmentHandle::new_declarative(Some(block), true);
        assert!(inner.nearest_var_scope().ptr_eq(&base));
    }

    #[test]
    fn clone_declarative_detaches_values() {
        let env = EnvironmentHandle::new_declarative(None, true);
        env.create_binding("i".into(), Value::Int(3), true);
        let copied = env.clone_declarative(true);
        env.create_binding("i".into(), Value::Int(9), true);
        match &copied.borrow().kind {
            EnvKind::Declarative { bindings } => {
                assert_eq!(bindings[&JsString::from("i")].value, Value::Int(3));
            }
            _ => unreachable!(),
        };
    }
}
