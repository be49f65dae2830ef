//! The invocation protocol: calls, constructions, super calls, spread
//! argument materialization and the deferred-operation handoff from the
//! dispatch loop back to `execute`.

use kestrel_middle::{CodeFlags, CodeUnit, EffectiveOpcode, ExtOpcode};
use smallvec::SmallVec;

use std::rc::Rc;

use crate::environment::EnvironmentHandle;
use crate::frame::{CallOperation, Frame, This};
use crate::object::function::{FunctionData, UserFunction};
use crate::object::{ObjectHandle, ObjectKind, Property, PropertyAttributes, PropertyKey};
use crate::throw;
use crate::value::Value;
use crate::{Completion, Vm};

pub const MAX_FRAME_STACK_SIZE: usize = 1024;

type ArgBuf = SmallVec<[Value; 4]>;

/// Creates a closure over `scope`. Non-arrow functions get their `prototype`
/// object eagerly; generator functions chain it to the generator prototype.
pub fn instantiate_function(vm: &mut Vm, code: &Rc<CodeUnit>, scope: &EnvironmentHandle) -> ObjectHandle {
    let function = ObjectHandle::new(ObjectKind::Function(FunctionData::User(UserFunction {
        code: code.clone(),
        scope: scope.clone(),
        home_object: None,
        name: None,
    })));

    if !code.flags.contains(CodeFlags::ARROW) {
        let prototype = ObjectHandle::ordinary();
        if code.is_generator() {
            prototype.set_prototype(Some(vm.statics.generator_prototype.clone()));
        }
        prototype.define_property(
            vm,
            PropertyKey::from("constructor"),
            Property::with_attributes(
                Value::Object(function.clone()),
                PropertyAttributes::WRITABLE | PropertyAttributes::CONFIGURABLE,
            ),
        );
        function.define_property(
            vm,
            PropertyKey::from("prototype"),
            Property::with_attributes(Value::Object(prototype), PropertyAttributes::WRITABLE),
        );
    }

    function
}

pub fn create_implicit_constructor(derived: bool) -> ObjectHandle {
    ObjectHandle::new(ObjectKind::Function(FunctionData::ImplicitConstructor { derived }))
}

/// `function_call`: invokes `func` with `this` and `args`.
pub fn function_call(
    vm: &mut Vm,
    func: &ObjectHandle,
    this: Value,
    args: &[Value],
) -> Result<Value, Value> {
    vm.direct_eval = false;

    enum Target {
        Native(crate::object::function::NativeFn),
        User {
            code: Rc<CodeUnit>,
            scope: EnvironmentHandle,
        },
    }

    let target = match &func.borrow().kind {
        ObjectKind::Function(FunctionData::Native(native)) => Target::Native(native.func),
        ObjectKind::Function(FunctionData::User(user)) => {
            if user.code.flags.contains(CodeFlags::CONSTRUCTOR) {
                Target::Native(constructor_without_new)
            } else {
                Target::User {
                    code: user.code.clone(),
                    scope: user.scope.clone(),
                }
            }
        }
        ObjectKind::Function(FunctionData::ImplicitConstructor { .. }) => {
            Target::Native(constructor_without_new)
        }
        _ => Target::Native(not_callable),
    };

    match target {
        Target::Native(native) => native(vm, this, args),
        Target::User { code, scope } => {
            let env = EnvironmentHandle::new_declarative(Some(scope), false);
            let this = if this.is_nullish() && !code.is_strict() {
                This::Default
            } else {
                This::Bound(this)
            };
            let mut frame = Frame::new(code, this, env);
            frame.function = Some(func.clone());
            frame.init_exec(args);
            run_frame(vm, &mut frame)
        }
    }
}

fn constructor_without_new(vm: &mut Vm, _this: Value, _args: &[Value]) -> Result<Value, Value> {
    throw!(vm, TypeError, "Class constructor cannot be invoked without 'new'")
}

fn not_callable(vm: &mut Vm, _this: Value, _args: &[Value]) -> Result<Value, Value> {
    throw!(vm, TypeError, "Value is not callable")
}

/// `function_construct`: `new func(...args)` with an explicit new-target.
pub fn function_construct(
    vm: &mut Vm,
    func: &ObjectHandle,
    new_target: &ObjectHandle,
    args: &[Value],
) -> Result<Value, Value> {
    if !func.is_constructor() {
        throw!(vm, TypeError, "Value is not a constructor");
    }

    enum Target {
        Implicit { derived: bool },
        User {
            code: Rc<CodeUnit>,
            scope: EnvironmentHandle,
        },
    }

    let target = match &func.borrow().kind {
        ObjectKind::Function(FunctionData::ImplicitConstructor { derived }) => {
            Target::Implicit { derived: *derived }
        }
        ObjectKind::Function(FunctionData::User(user)) => Target::User {
            code: user.code.clone(),
            scope: user.scope.clone(),
        },
        _ => unreachable!("is_constructor checked above"),
    };

    match target {
        Target::Implicit { derived: false } => {
            Ok(Value::Object(ordinary_create_from_constructor(vm, new_target)?))
        }
        Target::Implicit { derived: true } => {
            let parent = match func.prototype() {
                Some(parent) if parent.is_constructor() => parent,
                _ => throw!(vm, TypeError, "Super constructor is not a constructor"),
            };
            function_construct(vm, &parent, new_target, args)
        }
        Target::User { code, scope } => {
            let derived = code.flags.contains(CodeFlags::DERIVED_CONSTRUCTOR);
            let this = if derived {
                This::BeforeSuper
            } else {
                This::Bound(Value::Object(ordinary_create_from_constructor(vm, new_target)?))
            };

            let env = EnvironmentHandle::new_declarative(Some(scope), false);
            let mut frame = Frame::new(code, this, env);
            frame.function = Some(func.clone());
            frame.new_target = Some(Value::Object(new_target.clone()));
            frame.init_exec(args);

            let result = run_frame(vm, &mut frame)?;
            if result.is_object() {
                return Ok(result);
            }
            // Non-object completions construct `this`.
            match &frame.this {
                This::Bound(this) => Ok(this.clone()),
                This::BeforeSuper => throw!(
                    vm,
                    ReferenceError,
                    "Must call super constructor in derived class before returning from derived constructor"
                ),
                This::Default => unreachable!("constructor frames bind this"),
            }
        }
    }
}

/// `OrdinaryCreateFromConstructor`: a fresh object whose prototype comes from
/// `new_target.prototype`.
fn ordinary_create_from_constructor(vm: &mut Vm, new_target: &ObjectHandle) -> Result<ObjectHandle, Value> {
    let object = ObjectHandle::ordinary();
    let prototype = new_target.clone().get(vm, &PropertyKey::from("prototype"))?;
    if let Value::Object(proto) = prototype {
        object.set_prototype(Some(proto));
    }
    Ok(object)
}

fn run_frame(vm: &mut Vm, frame: &mut Frame) -> Result<Value, Value> {
    if vm.frame_depth >= MAX_FRAME_STACK_SIZE {
        throw!(vm, RangeError, "Maximum call stack size exceeded");
    }
    vm.frame_depth += 1;
    let result = vm.execute(frame);
    vm.frame_depth -= 1;
    Ok(result?.into_value())
}

impl Completion {
    pub fn into_value(self) -> Value {
        match self {
            Completion::Return(value) => value,
            Completion::Yield(value) => value,
            Completion::Defer => unreachable!("deferred operations are performed by execute"),
        }
    }
}

/// Performs a deferred operation recorded by the dispatch loop. Exceptions
/// are routed back into the frame's unwinder by the caller.
pub fn perform(vm: &mut Vm, frame: &mut Frame, operation: CallOperation) -> Result<(), Value> {
    match operation {
        CallOperation::Call { opcode, argc } => {
            let args = drain_args(frame, usize::from(argc));
            let callee = frame.stack.pop().expect("callee on stack");
            let this = if opcode.is_prop_call() {
                frame.stack.pop().expect("receiver on stack")
            } else {
                Value::Undefined
            };
            let func = require_callable(vm, &callee)?;
            let result = function_call(vm, &func, this, &args)?;
            route_result(frame, EffectiveOpcode::Primary(opcode), result)
        }
        CallOperation::Construct { opcode, argc } => {
            let args = drain_args(frame, usize::from(argc));
            let callee = frame.stack.pop().expect("constructor on stack");
            let func = match &callee {
                Value::Object(o) if o.is_constructor() => o.clone(),
                _ => throw!(vm, TypeError, "Value is not a constructor"),
            };
            let result = function_construct(vm, &func, &func.clone(), &args)?;
            route_result(frame, EffectiveOpcode::Primary(opcode), result)
        }
        CallOperation::SuperCall { opcode, argc } => {
            let args: ArgBuf = if opcode == ExtOpcode::SpreadSuperCall {
                frame
                    .spread_collection
                    .take()
                    .expect("spread collection materialized")
                    .into_iter()
                    .collect()
            } else {
                drain_args(frame, usize::from(argc))
            };
            perform_super_call(vm, frame, &args)
        }
        CallOperation::Spread { opcode } => {
            let args = frame
                .spread_collection
                .take()
                .expect("spread collection materialized");
            let callee = frame.stack.pop().expect("callee on stack");
            if opcode == ExtOpcode::SpreadNew {
                let func = match &callee {
                    Value::Object(o) if o.is_constructor() => o.clone(),
                    _ => throw!(vm, TypeError, "Value is not a constructor"),
                };
                let result = function_construct(vm, &func, &func.clone(), &args)?;
                return route_result(frame, EffectiveOpcode::Extended(opcode), result);
            }
            let this = if opcode.is_prop_call() {
                frame.stack.pop().expect("receiver on stack")
            } else {
                Value::Undefined
            };
            let func = require_callable(vm, &callee)?;
            let result = function_call(vm, &func, this, &args)?;
            route_result(frame, EffectiveOpcode::Extended(opcode), result)
        }
    }
}

fn perform_super_call(vm: &mut Vm, frame: &mut Frame, args: &[Value]) -> Result<(), Value> {
    if !matches!(frame.this, This::BeforeSuper) {
        throw!(vm, ReferenceError, "Super constructor may only be called once");
    }

    let function = frame.function.clone().expect("super call inside a constructor frame");
    let parent = match function.prototype() {
        Some(parent) if parent.is_constructor() => parent,
        _ => throw!(vm, TypeError, "Super constructor is not a constructor"),
    };

    let new_target = match &frame.new_target {
        Some(Value::Object(target)) => target.clone(),
        _ => function.clone(),
    };

    let this = function_construct(vm, &parent, &new_target, args)?;
    frame.this = This::Bound(this);
    Ok(())
}

fn require_callable(vm: &mut Vm, callee: &Value) -> Result<ObjectHandle, Value> {
    match callee {
        Value::Object(o) if o.is_callable() => Ok(o.clone()),
        other => {
            let shown = other.type_of().as_str();
            throw!(vm, TypeError, "{} is not a function", shown)
        }
    }
}

fn drain_args(frame: &mut Frame, argc: usize) -> ArgBuf {
    let split = frame.stack.len() - argc;
    frame.stack.drain(split..).collect()
}

/// Flattens a marker-delimited argument run into a call-ready buffer.
pub fn spread_arguments(vm: &mut Vm, raw: Vec<Value>) -> Result<Vec<Value>, Value> {
    let mut args = Vec::with_capacity(raw.len());
    let mut iter = raw.into_iter();
    while let Some(value) = iter.next() {
        if matches!(value, Value::SpreadMarker) {
            let iterable = iter.next().expect("spread marker precedes its element");
            crate::iterator::collect_into(vm, &iterable, &mut args)?;
        } else {
            args.push(value);
        }
    }
    Ok(args)
}

/// Routes a call result per the decode-table put disposition (call results
/// can only target the stack or the block accumulator).
fn route_result(frame: &mut Frame, opcode: EffectiveOpcode, result: Value) -> Result<(), Value> {
    let entry = opcode.decode();
    if entry.put_stack() {
        frame.stack.push(result);
    } else if entry.put_block() {
        frame.block_result = result;
    }
    Ok(())
}
