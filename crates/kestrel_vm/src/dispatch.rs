//! The main dispatch loop.
//!
//! Two nested loops: the outer one services unwinding (throws, returns
//! through finally regions, abort), the inner one decodes and executes
//! opcodes. Each step fetches operands as the decode table prescribes, runs
//! the opcode group, and routes the result by the entry's put disposition.

use kestrel_middle::instruction::DecodeEntry;
use kestrel_middle::{EffectiveOpcode, ExtOpcode, OpGroup, Opcode, OperandShape};

use crate::context::{
    context_abort, find_finally, pop_lex_env, ContextKind, ContextRecord, Pending, Search,
};
use crate::environment::{put_value_lex_env_base, EnvironmentHandle};
use crate::frame::{CallOperation, Frame};
use crate::iterator;
use crate::object::{ObjectHandle, ObjectKind, Property, PropertyAttributes, PropertyKey};
use crate::operations;
use crate::throw;
use crate::value::{Value, INTEGER_NUMBER_MAX, INTEGER_NUMBER_MIN};
use crate::Vm;

/// How a frame leaves the dispatch loop.
pub enum Completion {
    Return(Value),
    /// Generator suspension; the frame stays resumable.
    Yield(Value),
    /// A deferred call operation is recorded on the frame.
    Defer,
}

enum Flow {
    Next,
    /// Fall through to put-result routing.
    Put(Value),
    Return(Value),
    Yield(Value),
    Defer,
}

pub fn vm_loop(vm: &mut Vm, frame: &mut Frame) -> Result<Completion, Value> {
    let mut pending = frame.pending_throw.take().map(Pending::Throw);

    loop {
        if let Some(p) = pending.take() {
            if let Some(completion) = handle_unwind(vm, frame, p)? {
                return Ok(completion);
            }
        }

        loop {
            match step(vm, frame) {
                Ok(Flow::Next) => {}
                Ok(Flow::Return(value)) => {
                    pending = Some(Pending::Return(value));
                    break;
                }
                Ok(Flow::Yield(value)) => return Ok(Completion::Yield(value)),
                Ok(Flow::Defer) => return Ok(Completion::Defer),
                Ok(Flow::Put(_)) => unreachable!("puts are routed inside step"),
                Err(exception) => {
                    pending = Some(Pending::Throw(exception));
                    break;
                }
            }
        }
    }
}

/// The `error` label: drains dead operand-stack values, then asks the
/// context stack for a handler. Aborts skip the search entirely.
fn handle_unwind(vm: &mut Vm, frame: &mut Frame, pending: Pending) -> Result<Option<Completion>, Value> {
    let watermark = frame.contexts.last().map_or(0, |record| record.stack_depth);
    frame.stack.truncate(watermark);

    let pending = match (vm.abort, pending) {
        (true, Pending::Throw(exception)) => {
            while let Some(record) = frame.contexts.pop() {
                context_abort(vm, frame, record);
            }
            frame.stack.clear();
            frame.block_result = Value::Undefined;
            return Err(exception);
        }
        (_, pending) => pending,
    };

    match find_finally(vm, frame, pending) {
        Search::EnterCatch { ip, exception } => {
            frame.ip = ip;
            frame.stack.push(exception);
            Ok(None)
        }
        Search::EnterFinally { ip } => {
            frame.ip = ip;
            Ok(None)
        }
        Search::Plain { .. } => unreachable!("jump unwinding is handled inline"),
        Search::Propagate(Pending::Return(value)) => {
            debug_assert!(frame.contexts.is_empty());
            frame.stack.clear();
            frame.block_result = Value::Undefined;
            Ok(Some(Completion::Return(value)))
        }
        Search::Propagate(Pending::Throw(exception)) => {
            frame.stack.clear();
            frame.block_result = Value::Undefined;
            Err(exception)
        }
        Search::Propagate(Pending::Jump(_)) => unreachable!("jumps never leave the frame"),
    }
}

fn service_stop_callback(vm: &mut Vm) -> Result<(), Value> {
    let Some(callback) = vm.params.stop_callback() else {
        return Ok(());
    };
    vm.stop_counter = vm.stop_counter.saturating_sub(1);
    if vm.stop_counter > 0 {
        return Ok(());
    }
    vm.stop_counter = vm.params.stop_frequency();
    if let Err(value) = callback(vm) {
        // Stop-callback exceptions are aborts: no catch handler sees them.
        vm.abort = true;
        return Err(value);
    }
    Ok(())
}

fn step(vm: &mut Vm, frame: &mut Frame) -> Result<Flow, Value> {
    let start_ip = frame.ip;
    let first = Opcode::from_repr(frame.fetch_byte()).expect("invalid opcode");

    let (entry, ext) = if first == Opcode::Ext {
        let ext = ExtOpcode::from_repr(frame.fetch_byte()).expect("invalid extended opcode");
        (EffectiveOpcode::Extended(ext).decode(), Some(ext))
    } else {
        (EffectiveOpcode::Primary(first).decode(), None)
    };

    let mut left = Value::Undefined;
    let mut right = Value::Undefined;
    let mut branch_target = 0usize;

    match entry.shape() {
        OperandShape::None => {}
        OperandShape::Stack => {
            left = frame.stack.pop().expect("missing stack operand");
        }
        OperandShape::StackStack => {
            right = frame.stack.pop().expect("missing right operand");
            left = frame.stack.pop().expect("missing left operand");
        }
        OperandShape::Literal => {
            let index = frame.read_literal_index();
            left = frame.read_literal(vm, index)?;
        }
        OperandShape::LiteralLiteral => {
            let index = frame.read_literal_index();
            left = frame.read_literal(vm, index)?;
            let index = frame.read_literal_index();
            right = frame.read_literal(vm, index)?;
        }
        OperandShape::StackLiteral => {
            let index = frame.read_literal_index();
            right = frame.read_literal(vm, index)?;
            left = frame.stack.pop().expect("missing stack operand");
        }
        OperandShape::ThisLiteral => {
            let index = frame.read_literal_index();
            right = frame.read_literal(vm, index)?;
            left = frame.this.clone().to_value(vm, frame.strict())?;
        }
        shape @ (OperandShape::Branch1 | OperandShape::Branch2 | OperandShape::Branch3) => {
            let offset = frame.read_branch_offset(shape.branch_length().unwrap());
            if entry.is_backward_branch() {
                service_stop_callback(vm)?;
                branch_target = start_ip - offset;
            } else {
                branch_target = start_ip + offset;
            }
        }
    }

    let flow = run_group(vm, frame, first, ext, entry, left, right, branch_target)?;
    match flow {
        Flow::Put(result) => {
            route_result(vm, frame, entry, result)?;
            Ok(Flow::Next)
        }
        other => Ok(other),
    }
}

/// Put-result routing: `PUT_IDENT` writes the register or binding named by a
/// trailing literal index, `PUT_REFERENCE` consumes the `(base, property)`
/// pair beneath the result, then the value lands on the stack or in the
/// block accumulator.
fn route_result(vm: &mut Vm, frame: &mut Frame, entry: DecodeEntry, result: Value) -> Result<(), Value> {
    if entry.put_ident() {
        let index = frame.read_literal_index();
        if frame.code.is_register(index) {
            frame.registers[usize::from(index)] = result.clone();
        } else {
            let name = frame.ident_name(index);
            let env = frame.lex_env.clone();
            put_value_lex_env_base(vm, &env, &name, frame.strict(), result.clone())?;
        }
    } else if entry.put_reference() {
        let property = frame.stack.pop().expect("missing reference property");
        let base = frame.stack.pop().expect("missing reference base");
        match base {
            Value::RegisterRef(index) => {
                frame.registers[usize::from(index)] = result.clone();
            }
            base => operations::set_value(vm, &base, &property, result.clone(), frame.strict())?,
        }
    }

    if entry.put_stack() {
        frame.stack.push(result);
    } else if entry.put_block() {
        frame.block_result = result;
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_group(
    vm: &mut Vm,
    frame: &mut Frame,
    opcode: Opcode,
    ext: Option<ExtOpcode>,
    entry: DecodeEntry,
    left: Value,
    right: Value,
    branch_target: usize,
) -> Result<Flow, Value> {
    match entry.group() {
        OpGroup::Nop => unreachable!("the prefix byte is never dispatched"),

        OpGroup::Pop => Ok(Flow::Next),
        OpGroup::PopBlock => Ok(Flow::Put(left)),
        OpGroup::PushLiteral => Ok(Flow::Put(left)),
        OpGroup::PushTwo => {
            frame.stack.push(left);
            frame.stack.push(right);
            Ok(Flow::Next)
        }
        OpGroup::PushThree => {
            frame.stack.push(left);
            frame.stack.push(right);
            let index = frame.read_literal_index();
            let third = frame.read_literal(vm, index)?;
            frame.stack.push(third);
            Ok(Flow::Next)
        }
        OpGroup::PushUndefined => Ok(Flow::Put(Value::Undefined)),
        OpGroup::PushNull => Ok(Flow::Put(Value::Null)),
        OpGroup::PushTrue => Ok(Flow::Put(Value::Boolean(true))),
        OpGroup::PushFalse => Ok(Flow::Put(Value::Boolean(false))),
        OpGroup::PushThis => {
            let this = frame.this.clone().to_value(vm, frame.strict())?;
            Ok(Flow::Put(this))
        }
        OpGroup::PushNumber0 => Ok(Flow::Put(Value::Int(0))),
        OpGroup::PushPosByte => {
            let byte = frame.fetch_byte();
            Ok(Flow::Put(Value::Int(i32::from(byte) + 1)))
        }
        OpGroup::PushNegByte => {
            let byte = frame.fetch_byte();
            Ok(Flow::Put(Value::Int(-(i32::from(byte) + 1))))
        }
        OpGroup::PushLitNumber0 => {
            frame.stack.push(left);
            frame.stack.push(Value::Int(0));
            Ok(Flow::Next)
        }
        OpGroup::PushLitPosByte => {
            frame.stack.push(left);
            let byte = frame.fetch_byte();
            frame.stack.push(Value::Int(i32::from(byte) + 1));
            Ok(Flow::Next)
        }
        OpGroup::PushLitNegByte => {
            frame.stack.push(left);
            let byte = frame.fetch_byte();
            frame.stack.push(Value::Int(-(i32::from(byte) + 1)));
            Ok(Flow::Next)
        }
        OpGroup::PushObject => Ok(Flow::Put(Value::Object(ObjectHandle::ordinary()))),
        OpGroup::PushArray => Ok(Flow::Put(Value::Object(ObjectHandle::array(Vec::new())))),
        OpGroup::PushElision => Ok(Flow::Put(Value::Hole)),
        OpGroup::PushSpreadElement => Ok(Flow::Put(Value::SpreadMarker)),
        OpGroup::PushNewTarget => {
            Ok(Flow::Put(frame.new_target.clone().unwrap_or(Value::Undefined)))
        }
        OpGroup::AppendArray => {
            let count = usize::from(frame.fetch_byte());
            let split = frame.stack.len() - count;
            let values: Vec<Value> = frame.stack.drain(split..).collect();
            let array = match frame.stack.last().expect("array beneath elements") {
                Value::Object(o) => o.clone(),
                _ => unreachable!("APPEND_ARRAY targets an array literal"),
            };
            let mut iter = values.into_iter();
            while let Some(value) = iter.next() {
                if matches!(value, Value::SpreadMarker) {
                    let iterable = iter.next().expect("spread marker precedes its element");
                    let mut spread = Vec::new();
                    iterator::collect_into(vm, &iterable, &mut spread)?;
                    if let ObjectKind::Array { elements } = &mut array.borrow_mut().kind {
                        elements.extend(spread);
                    }
                } else if let ObjectKind::Array { elements } = &mut array.borrow_mut().kind {
                    elements.push(value);
                }
            }
            Ok(Flow::Next)
        }
        OpGroup::PushNamedFuncExpr => {
            // A private environment binds the expression's own name
            // immutably; the closure re-homes onto it.
            let func = match &left {
                Value::Object(f) => f.clone(),
                _ => unreachable!("function literal produces a closure"),
            };
            let name = match &right {
                Value::String(s) => s.clone(),
                _ => unreachable!("name literal is a string"),
            };
            let name_env = EnvironmentHandle::new_declarative(Some(frame.lex_env.clone()), true);
            name_env.create_binding(name, left.clone(), false);
            if let ObjectKind::Function(crate::object::function::FunctionData::User(user)) =
                &mut func.borrow_mut().kind
            {
                user.scope = name_env;
            }
            Ok(Flow::Put(left))
        }

        OpGroup::IdentReference => {
            let index = frame.read_literal_index();
            operations::push_ident_reference(vm, frame, index)?;
            Ok(Flow::Next)
        }
        OpGroup::TypeofIdent => {
            let index = frame.read_literal_index();
            Ok(Flow::Put(operations::typeof_ident(vm, frame, index)?))
        }
        OpGroup::Typeof => Ok(Flow::Put(Value::string(left.type_of().as_str()))),

        OpGroup::CreateBinding => {
            let index = frame.read_literal_index();
            let name = frame.ident_name(index);
            let (value, mutable) = match opcode {
                Opcode::CreateVar => (Value::Undefined, true),
                Opcode::CreateLet => (Value::Uninitialized, true),
                Opcode::CreateConst => (Value::Uninitialized, false),
                _ => unreachable!(),
            };
            frame.lex_env.create_binding(name, value, mutable);
            Ok(Flow::Next)
        }
        OpGroup::InitBinding => {
            let index = frame.read_literal_index();
            let name = frame.ident_name(index);
            let value = frame.stack.pop().expect("binding initializer");
            let mutable = !matches!(opcode, Opcode::InitConst);
            frame.lex_env.create_binding(name, value, mutable);
            Ok(Flow::Next)
        }
        OpGroup::VarEval => {
            let index = frame.read_literal_index();
            let name = frame.ident_name(index);
            let value = if ext == Some(ExtOpcode::ExtVarEval) {
                let func_index = frame.read_literal_index();
                frame.read_literal(vm, func_index)?
            } else {
                Value::Undefined
            };
            let target = frame.lex_env.nearest_var_scope();
            match target.binding_object() {
                Some(object) => {
                    let installed = object.has_own_property(&name.clone().into());
                    if !installed || !value.is_undefined() {
                        object.define_property(
                            vm,
                            name.into(),
                            Property::with_attributes(
                                value,
                                PropertyAttributes::WRITABLE | PropertyAttributes::CONFIGURABLE,
                            ),
                        );
                    }
                }
                None => {
                    if !target.has_binding(&name) || !value.is_undefined() {
                        target.create_binding(name, value, true);
                    }
                }
            }
            Ok(Flow::Next)
        }
        OpGroup::CheckVar => {
            let index = frame.read_literal_index();
            let name = frame.ident_name(index);
            if frame.lex_env.has_binding(&name) {
                throw!(vm, SyntaxError, "{} has already been declared", name);
            }
            Ok(Flow::Next)
        }
        OpGroup::CheckLet => {
            let index = frame.read_literal_index();
            let name = frame.ident_name(index);
            let var_scope = frame.lex_env.nearest_var_scope();
            if frame.lex_env.has_binding(&name)
                || (!var_scope.ptr_eq(&frame.lex_env) && var_scope.has_binding(&name))
            {
                throw!(vm, SyntaxError, "{} has already been declared", name);
            }
            Ok(Flow::Next)
        }
        OpGroup::AssignLetConst => {
            let index = frame.read_literal_index();
            let name = frame.ident_name(index);
            frame.lex_env.initialize_binding(&name, left);
            Ok(Flow::Next)
        }
        OpGroup::ThrowConstError => {
            throw!(vm, TypeError, "Constant bindings cannot be reassigned")
        }

        OpGroup::MovIdent => Ok(Flow::Put(left)),
        OpGroup::Assign => Ok(Flow::Put(left)),
        OpGroup::AssignPropThis => {
            let value = frame.stack.pop().expect("assignment value");
            frame.stack.push(left);
            frame.stack.push(right);
            frame.stack.push(value);
            Ok(Flow::Next)
        }

        OpGroup::SetProperty => {
            let key = right.to_prop_name(vm)?;
            let target = peek_object(frame);
            set_home_object(&left, &target);
            target.define_property(vm, key, Property::data(left));
            Ok(Flow::Next)
        }
        OpGroup::SetComputedProperty => {
            let key = left.to_prop_name(vm)?;
            let target = peek_object(frame);
            set_home_object(&right, &target);
            target.define_property(vm, key, Property::data(right));
            Ok(Flow::Next)
        }
        OpGroup::SetAccessor => {
            let key = right.to_prop_name(vm)?;
            let target = peek_object(frame);
            let accessor = match left {
                Value::Object(f) => f,
                _ => unreachable!("accessor is a function"),
            };
            set_home_object(&Value::Object(accessor.clone()), &target);
            target.define_accessor(vm, key, accessor, opcode == Opcode::SetGetter);
            Ok(Flow::Next)
        }
        OpGroup::SetComputedAccessor => {
            let key = left.to_prop_name(vm)?;
            let target = peek_object(frame);
            let accessor = match right {
                Value::Object(f) => f,
                _ => unreachable!("accessor is a function"),
            };
            set_home_object(&Value::Object(accessor.clone()), &target);
            target.define_accessor(vm, key, accessor, ext == Some(ExtOpcode::SetComputedGetter));
            Ok(Flow::Next)
        }
        OpGroup::SetProto => {
            let target = peek_object(frame);
            match left {
                Value::Object(proto) => target.set_prototype(Some(proto)),
                Value::Null => target.set_prototype(None),
                _ => {}
            }
            Ok(Flow::Next)
        }

        OpGroup::PropGet => Ok(Flow::Put(operations::get_value(vm, &left, &right)?)),
        OpGroup::PropReference => {
            let len = frame.stack.len();
            let base = frame.stack[len - 2].clone();
            let key = frame.stack[len - 1].clone();
            let value = operations::get_value(vm, &base, &key)?;
            frame.stack.push(value);
            Ok(Flow::Next)
        }
        OpGroup::PropLitReference => {
            let base = frame.stack.last().expect("reference base").clone();
            let value = operations::get_value(vm, &base, &left)?;
            frame.stack.push(left);
            frame.stack.push(value);
            Ok(Flow::Next)
        }
        OpGroup::PropDelete => Ok(Flow::Put(operations::delete_property(
            vm,
            &left,
            &right,
            frame.strict(),
        )?)),
        OpGroup::DeleteIdent => {
            let index = frame.read_literal_index();
            Ok(Flow::Put(operations::delete_ident(vm, frame, index)?))
        }

        OpGroup::Add => Ok(Flow::Put(left.add(&right, vm)?)),
        OpGroup::Sub => Ok(Flow::Put(left.sub(&right, vm)?)),
        OpGroup::Mul => Ok(Flow::Put(left.mul(&right, vm)?)),
        OpGroup::Div => Ok(Flow::Put(left.div(&right, vm)?)),
        OpGroup::Mod => Ok(Flow::Put(left.rem(&right, vm)?)),
        OpGroup::Exp => Ok(Flow::Put(left.pow(&right, vm)?)),
        OpGroup::BitOr => Ok(Flow::Put(left.bitor(&right, vm)?)),
        OpGroup::BitXor => Ok(Flow::Put(left.bitxor(&right, vm)?)),
        OpGroup::BitAnd => Ok(Flow::Put(left.bitand(&right, vm)?)),
        OpGroup::LeftShift => Ok(Flow::Put(left.shl(&right, vm)?)),
        OpGroup::RightShift => Ok(Flow::Put(left.shr(&right, vm)?)),
        OpGroup::UnsRightShift => Ok(Flow::Put(left.ushr(&right, vm)?)),
        OpGroup::BitNot => Ok(Flow::Put(left.bitnot(vm)?)),
        OpGroup::Not => Ok(Flow::Put(Value::Boolean(!left.is_truthy()))),
        OpGroup::Plus => Ok(Flow::Put(left.unary_plus(vm)?)),
        OpGroup::Minus => Ok(Flow::Put(left.unary_minus(vm)?)),
        OpGroup::Void => Ok(Flow::Put(Value::Undefined)),

        OpGroup::Less => {
            // Integer compares may fuse with an immediately following
            // backward conditional branch, executing both in one step.
            if let (Value::Int(l), Value::Int(r)) = (&left, &right) {
                let condition = l < r;
                if let Some(next) = frame.peek_byte(frame.ip) {
                    let base = Opcode::BranchIfTrueBack as u8;
                    if (base..base + 3).contains(&next) {
                        let next_start = frame.ip;
                        frame.fetch_byte();
                        let offset = frame.read_branch_offset(next - base + 1);
                        service_stop_callback(vm)?;
                        if condition {
                            frame.ip = next_start - offset;
                        }
                        return Ok(Flow::Next);
                    }
                }
                return Ok(Flow::Put(Value::Boolean(condition)));
            }
            Ok(Flow::Put(Value::Boolean(left.lt(&right, vm)?)))
        }
        OpGroup::Greater => Ok(Flow::Put(Value::Boolean(left.gt(&right, vm)?))),
        OpGroup::LessEqual => Ok(Flow::Put(Value::Boolean(left.le(&right, vm)?))),
        OpGroup::GreaterEqual => Ok(Flow::Put(Value::Boolean(left.ge(&right, vm)?))),
        OpGroup::Equal => Ok(Flow::Put(Value::Boolean(left.abstract_eq(&right, vm)?))),
        OpGroup::NotEqual => Ok(Flow::Put(Value::Boolean(!left.abstract_eq(&right, vm)?))),
        OpGroup::StrictEqual => Ok(Flow::Put(Value::Boolean(left.strict_eq(&right)))),
        OpGroup::StrictNotEqual => Ok(Flow::Put(Value::Boolean(!left.strict_eq(&right)))),
        OpGroup::In => Ok(Flow::Put(Value::Boolean(left.has_property_in(&right, vm)?))),
        OpGroup::InstanceOf => Ok(Flow::Put(Value::Boolean(left.instance_of(&right, vm)?))),

        group @ (OpGroup::PreIncr | OpGroup::PreDecr | OpGroup::PostIncr | OpGroup::PostDecr) => {
            incr_decr(vm, frame, group, entry)
        }

        OpGroup::Jump => {
            frame.ip = branch_target;
            Ok(Flow::Next)
        }
        OpGroup::BranchIfTrue | OpGroup::BranchIfFalse => {
            let value = frame.stack.pop().expect("branch condition");
            let jump = value.is_truthy() == (entry.group() == OpGroup::BranchIfTrue);
            if jump {
                frame.ip = branch_target;
            }
            Ok(Flow::Next)
        }
        OpGroup::BranchIfLogicalTrue | OpGroup::BranchIfLogicalFalse => {
            let value = frame.stack.pop().expect("branch condition");
            let jump = value.is_truthy() == (entry.group() == OpGroup::BranchIfLogicalTrue);
            if jump {
                // Short circuit: the operand stays as the expression value.
                frame.stack.push(value);
                frame.ip = branch_target;
            }
            Ok(Flow::Next)
        }
        OpGroup::BranchIfStrictEqual => {
            let case_value = frame.stack.pop().expect("case value");
            let matches = case_value.strict_eq(frame.stack.last().expect("switch value"));
            if matches {
                frame.stack.pop();
                frame.ip = branch_target;
            }
            Ok(Flow::Next)
        }
        OpGroup::JumpAndExitContext => {
            exit_to(vm, frame, branch_target);
            Ok(Flow::Next)
        }

        OpGroup::TryContext => {
            frame.contexts.push(ContextRecord::new(
                ContextKind::Try {
                    handler: branch_target,
                },
                branch_target,
                frame.stack.len(),
            ));
            Ok(Flow::Next)
        }
        OpGroup::CatchJump => {
            debug_assert!(matches!(
                frame.contexts.last().map(|r| &r.kind),
                Some(ContextKind::Try { .. })
            ));
            frame.ip = branch_target;
            Ok(Flow::Next)
        }
        OpGroup::FinallyContext => {
            let had_env = {
                let record = frame.contexts.last_mut().expect("try-ish record");
                debug_assert!(matches!(
                    record.kind,
                    ContextKind::Try { .. } | ContextKind::Catch
                ));
                std::mem::replace(&mut record.has_lex_env, false)
            };
            if had_env {
                pop_lex_env(frame);
            }
            let record = frame.contexts.last_mut().expect("try-ish record");
            record.kind = ContextKind::FinallyJump {
                target: branch_target,
            };
            record.end = branch_target;
            Ok(Flow::Next)
        }
        OpGroup::ContextEnd => {
            let record = frame.contexts.pop().expect("open context");
            match record.kind {
                ContextKind::FinallyJump { target } => {
                    exit_to(vm, frame, target);
                    Ok(Flow::Next)
                }
                ContextKind::FinallyReturn { value } => Ok(Flow::Return(value)),
                ContextKind::FinallyThrow { exception } => Err(exception),
                _ => {
                    context_abort(vm, frame, record);
                    Ok(Flow::Next)
                }
            }
        }
        OpGroup::WithContext => {
            let value = frame.stack.pop().expect("with subject");
            let object = value.to_object(vm)?;
            let env = EnvironmentHandle::new_object(Some(frame.lex_env.clone()), object, true);
            let mut record =
                ContextRecord::new(ContextKind::With, branch_target, frame.stack.len());
            record.has_lex_env = true;
            frame.contexts.push(record);
            frame.lex_env = env;
            Ok(Flow::Next)
        }
        OpGroup::BlockCreateContext => {
            let env = EnvironmentHandle::new_declarative(Some(frame.lex_env.clone()), true);
            let mut record =
                ContextRecord::new(ContextKind::Block, branch_target, frame.stack.len());
            record.has_lex_env = true;
            frame.contexts.push(record);
            frame.lex_env = env;
            Ok(Flow::Next)
        }
        OpGroup::TryCreateEnv => {
            let record = frame.contexts.last_mut().expect("try-ish record");
            debug_assert!(!record.has_lex_env);
            record.has_lex_env = true;
            frame.lex_env = EnvironmentHandle::new_declarative(Some(frame.lex_env.clone()), true);
            Ok(Flow::Next)
        }
        OpGroup::CloneContext => {
            let copy_values = ext == Some(ExtOpcode::CloneFullContext);
            frame.lex_env = frame.lex_env.clone_declarative(copy_values);
            Ok(Flow::Next)
        }

        OpGroup::ForInCreateContext => {
            let value = frame.stack.pop().expect("for-in subject");
            match operations::for_in_snapshot(vm, &value)? {
                None => {
                    frame.ip = branch_target;
                }
                Some((object, keys)) => {
                    frame.contexts.push(ContextRecord::new(
                        ContextKind::ForIn {
                            object,
                            keys,
                            index: 0,
                        },
                        branch_target,
                        frame.stack.len(),
                    ));
                }
            }
            Ok(Flow::Next)
        }
        OpGroup::ForInGetNext => {
            let record = frame.contexts.last_mut().expect("for-in record");
            let key = match &mut record.kind {
                ContextKind::ForIn { keys, index, .. } => {
                    let key = keys[*index].clone();
                    *index += 1;
                    key
                }
                _ => unreachable!("for-in opcode outside a for-in context"),
            };
            Ok(Flow::Put(Value::String(key)))
        }
        OpGroup::ForInHasNext => {
            // Skip names deleted from the object since the snapshot.
            let next = {
                let record = frame.contexts.last().expect("for-in record");
                match &record.kind {
                    ContextKind::ForIn { object, keys, index } => {
                        let mut probe = *index;
                        while probe < keys.len()
                            && !object.has_property(&keys[probe].clone().into())
                        {
                            probe += 1;
                        }
                        (probe < keys.len()).then_some(probe)
                    }
                    _ => unreachable!("for-in opcode outside a for-in context"),
                }
            };
            match next {
                Some(probe) => {
                    if let ContextKind::ForIn { index, .. } =
                        &mut frame.contexts.last_mut().expect("for-in record").kind
                    {
                        *index = probe;
                    }
                    frame.ip = branch_target;
                }
                None => {
                    let record = frame.contexts.pop().expect("for-in record");
                    context_abort(vm, frame, record);
                }
            }
            Ok(Flow::Next)
        }
        OpGroup::ForOfCreateContext => {
            let value = frame.stack.pop().expect("for-of subject");
            let iterator = iterator::get_iterator(vm, &value)?;
            let step = iterator::iterator_step(vm, &iterator)?;
            if matches!(step, Value::Boolean(false)) {
                frame.ip = branch_target;
                return Ok(Flow::Next);
            }
            let mut record = ContextRecord::new(
                ContextKind::ForOf {
                    iterator,
                    next_result: step,
                },
                branch_target,
                frame.stack.len(),
            );
            record.close_iterator = true;
            frame.contexts.push(record);
            Ok(Flow::Next)
        }
        OpGroup::ForOfGetNext => {
            let next_result = {
                let record = frame.contexts.last().expect("for-of record");
                match &record.kind {
                    ContextKind::ForOf { next_result, .. } => next_result.clone(),
                    _ => unreachable!("for-of opcode outside a for-of context"),
                }
            };
            Ok(Flow::Put(iterator::iterator_value(vm, &next_result)?))
        }
        OpGroup::ForOfHasNext => {
            let iterator = {
                let record = frame.contexts.last().expect("for-of record");
                match &record.kind {
                    ContextKind::ForOf { iterator, .. } => iterator.clone(),
                    _ => unreachable!("for-of opcode outside a for-of context"),
                }
            };
            let step = iterator::iterator_step(vm, &iterator)?;
            if matches!(step, Value::Boolean(false)) {
                // The iterator finished on its own; no close call.
                frame.contexts.pop();
            } else {
                if let ContextKind::ForOf { next_result, .. } =
                    &mut frame.contexts.last_mut().expect("for-of record").kind
                {
                    *next_result = step;
                }
                frame.ip = branch_target;
            }
            Ok(Flow::Next)
        }

        OpGroup::GetIterator => {
            let subject = frame.stack.last().expect("iterable").clone();
            Ok(Flow::Put(iterator::get_iterator(vm, &subject)?))
        }
        OpGroup::IteratorStep => {
            let depth = ext.expect("extended opcode").iterator_depth();
            let iterator = frame.stack[frame.stack.len() - depth].clone();
            let step = iterator::iterator_step(vm, &iterator)?;
            let value = if matches!(step, Value::Boolean(false)) {
                Value::Undefined
            } else {
                iterator::iterator_value(vm, &step)?
            };
            Ok(Flow::Put(value))
        }
        OpGroup::IteratorClose => {
            iterator::iterator_close(vm, &left)?;
            Ok(Flow::Next)
        }
        OpGroup::DefaultInitializer => {
            if !matches!(frame.stack.last(), Some(Value::Undefined)) {
                frame.ip = branch_target;
            } else {
                frame.stack.pop();
            }
            Ok(Flow::Next)
        }
        OpGroup::RestInitializer => {
            let depth = ext.expect("extended opcode").iterator_depth();
            let iterator = frame.stack[frame.stack.len() - depth].clone();
            let mut rest = Vec::new();
            loop {
                let step = iterator::iterator_step(vm, &iterator)?;
                if matches!(step, Value::Boolean(false)) {
                    break;
                }
                rest.push(iterator::iterator_value(vm, &step)?);
            }
            Ok(Flow::Put(Value::Object(ObjectHandle::array(rest))))
        }
        OpGroup::InitializerPushProp => {
            let base = frame.stack.last().expect("destructuring source").clone();
            Ok(Flow::Put(operations::get_value(vm, &base, &left)?))
        }
        OpGroup::RequireObjectCoercible => {
            let value = frame.stack.last().expect("checked value").clone();
            value.check_object_coercible(vm)?;
            Ok(Flow::Next)
        }

        OpGroup::Call => {
            let argc = match opcode.fixed_argc() {
                Some(argc) => u16::from(argc),
                None => u16::from(frame.fetch_byte()),
            };
            frame.call_operation = Some(CallOperation::Call { opcode, argc });
            Ok(Flow::Defer)
        }
        OpGroup::Construct => {
            let argc = match opcode.fixed_argc() {
                Some(argc) => u16::from(argc),
                None => u16::from(frame.fetch_byte()),
            };
            frame.call_operation = Some(CallOperation::Construct { opcode, argc });
            Ok(Flow::Defer)
        }
        OpGroup::SuperCall => {
            let ext = ext.expect("extended opcode");
            let argc = u16::from(frame.fetch_byte());
            if ext == ExtOpcode::SpreadSuperCall {
                let split = frame.stack.len() - usize::from(argc);
                let raw: Vec<Value> = frame.stack.drain(split..).collect();
                frame.spread_collection = Some(crate::call::spread_arguments(vm, raw)?);
            }
            frame.call_operation = Some(CallOperation::SuperCall { opcode: ext, argc });
            Ok(Flow::Defer)
        }
        OpGroup::SpreadArguments => {
            let ext = ext.expect("extended opcode");
            let argc = usize::from(frame.fetch_byte());
            let split = frame.stack.len() - argc;
            let raw: Vec<Value> = frame.stack.drain(split..).collect();
            frame.spread_collection = Some(crate::call::spread_arguments(vm, raw)?);
            frame.call_operation = Some(CallOperation::Spread { opcode: ext });
            Ok(Flow::Defer)
        }
        OpGroup::ResolveBaseForCall => {
            let value = frame.stack.pop().expect("reference value");
            frame.stack.pop().expect("reference property");
            let base = frame.stack.pop().expect("reference base");
            frame.stack.push(operations::implicit_this(&base));
            frame.stack.push(value);
            Ok(Flow::Next)
        }
        OpGroup::DirectEval => {
            vm.direct_eval = true;
            Ok(Flow::Next)
        }

        OpGroup::Return => Ok(Flow::Return(left)),
        OpGroup::ReturnWithBlock => {
            let value = std::mem::take(&mut frame.block_result);
            Ok(Flow::Return(value))
        }
        OpGroup::ReturnPromise => {
            let promise = ObjectHandle::new(ObjectKind::Promise(
                crate::object::PromiseState::Resolved(left),
            ));
            Ok(Flow::Return(Value::Object(promise)))
        }
        OpGroup::Throw => Err(left),

        OpGroup::CreateGenerator => {
            let prototype = match &frame.function {
                Some(func) => match func.clone().get(vm, &PropertyKey::from("prototype"))? {
                    Value::Object(proto) => Some(proto),
                    _ => None,
                },
                None => None,
            };
            let generator = crate::generator::create_generator(vm, frame, prototype);
            Ok(Flow::Return(generator))
        }
        OpGroup::Yield => {
            let value = frame.stack.pop().expect("yielded value");
            Ok(Flow::Yield(value))
        }
        OpGroup::Await => {
            // A dispatcher hint only; the promise pipeline lives in the
            // embedding scheduler.
            Ok(Flow::Next)
        }

        OpGroup::PushClassEnvironment => {
            let name = match &left {
                Value::String(s) => s.clone(),
                _ => unreachable!("class name literal is a string"),
            };
            let env = EnvironmentHandle::new_declarative(Some(frame.lex_env.clone()), true);
            env.create_binding(name, Value::Uninitialized, false);
            frame.lex_env = env;
            Ok(Flow::Next)
        }
        OpGroup::PushImplicitCtor => {
            let derived = ext == Some(ExtOpcode::PushImplicitDerivedCtor);
            Ok(Flow::Put(Value::Object(crate::call::create_implicit_constructor(derived))))
        }
        OpGroup::InitClass => {
            init_class(vm, frame)?;
            Ok(Flow::Next)
        }
        OpGroup::FinalizeClass => {
            let name = match &left {
                Value::String(s) => s.clone(),
                _ => unreachable!("class name literal is a string"),
            };
            frame.stack.pop().expect("class prototype");
            let constructor = frame.stack.pop().expect("class constructor");
            frame.lex_env.initialize_binding(&name, constructor.clone());
            pop_lex_env(frame);
            Ok(Flow::Put(constructor))
        }
        OpGroup::PushSuperConstructor => {
            let function = frame.function.clone().expect("super inside a method frame");
            match function.prototype() {
                Some(parent) if parent.is_constructor() => Ok(Flow::Put(Value::Object(parent))),
                _ => throw!(vm, TypeError, "Super constructor is not a constructor"),
            }
        }
        OpGroup::ResolveLexicalThis => {
            let this = frame.this.clone().to_value(vm, frame.strict())?;
            Ok(Flow::Put(this))
        }
        OpGroup::SuperReference => {
            let function = frame.function.clone().expect("super inside a method frame");
            let home = match &function.borrow().kind {
                ObjectKind::Function(crate::object::function::FunctionData::User(user)) => {
                    user.home_object.clone()
                }
                _ => None,
            };
            let home = match home {
                Some(home) => home,
                None => throw!(vm, SyntaxError, "'super' keyword unexpected here"),
            };
            let key = left.to_prop_name(vm)?;
            let value = match home.prototype() {
                Some(proto) => proto.get(vm, &key)?,
                None => Value::Undefined,
            };
            Ok(Flow::Put(value))
        }
    }
}

/// `JUMP_AND_EXIT_CONTEXT` and finally-jump continuations: run intervening
/// finallys, abort everything else, then land on the target.
fn exit_to(vm: &mut Vm, frame: &mut Frame, target: usize) {
    match find_finally(vm, frame, Pending::Jump(target)) {
        Search::Plain { target } | Search::Propagate(Pending::Jump(target)) => {
            frame.ip = target;
        }
        Search::EnterFinally { ip } => frame.ip = ip,
        _ => unreachable!("jump unwinding only enters finallys"),
    }
}

fn peek_object(frame: &Frame) -> ObjectHandle {
    match frame.stack.last().expect("object beneath operands") {
        Value::Object(o) => o.clone(),
        _ => unreachable!("object literal target on stack"),
    }
}

/// Methods remember the object they were defined on for `super` references.
fn set_home_object(method: &Value, target: &ObjectHandle) {
    if let Value::Object(func) = method {
        if let ObjectKind::Function(crate::object::function::FunctionData::User(user)) =
            &mut func.borrow_mut().kind
        {
            if user.home_object.is_none() {
                user.home_object = Some(target.clone());
            }
        }
    }
}

/// `INIT_CLASS`: stack `[parent, ctor]` becomes `[ctor, prototype]`, with
/// the prototype chain and `constructor` backlink wired up.
fn init_class(vm: &mut Vm, frame: &mut Frame) -> Result<(), Value> {
    let constructor = frame.stack.pop().expect("class constructor");
    let parent = frame.stack.pop().expect("class heritage");

    let constructor = match constructor {
        Value::Object(c) => c,
        _ => unreachable!("class constructor is a function"),
    };

    let prototype = ObjectHandle::ordinary();
    match &parent {
        Value::Object(parent_ctor) => {
            if !parent_ctor.is_constructor() {
                throw!(vm, TypeError, "Class extends value is not a constructor");
            }
            match parent_ctor.clone().get(vm, &PropertyKey::from("prototype"))? {
                Value::Object(parent_proto) => prototype.set_prototype(Some(parent_proto)),
                _ => throw!(vm, TypeError, "Class extends value has non-object prototype"),
            }
            constructor.set_prototype(Some(parent_ctor.clone()));
        }
        Value::Null => prototype.set_prototype(None),
        // `Hole` marks a class without an extends clause.
        _ => {}
    }

    constructor.define_property(
        vm,
        PropertyKey::from("prototype"),
        Property::with_attributes(Value::Object(prototype.clone()), PropertyAttributes::empty()),
    );
    prototype.define_property(
        vm,
        PropertyKey::from("constructor"),
        Property::with_attributes(
            Value::Object(constructor.clone()),
            PropertyAttributes::WRITABLE | PropertyAttributes::CONFIGURABLE,
        ),
    );
    set_home_object(&Value::Object(constructor.clone()), &prototype);

    frame.stack.push(Value::Object(constructor));
    frame.stack.push(Value::Object(prototype));
    Ok(())
}

/// The four increment/decrement groups route their own results: the
/// reference write always receives the updated number, while the pushed
/// value of the post forms is the unmodified one.
fn incr_decr(vm: &mut Vm, frame: &mut Frame, group: OpGroup, entry: DecodeEntry) -> Result<Flow, Value> {
    let value = frame.stack.pop().expect("reference value");

    let delta = match group {
        OpGroup::PreIncr | OpGroup::PostIncr => 1i64,
        _ => -1i64,
    };
    let post = matches!(group, OpGroup::PostIncr | OpGroup::PostDecr);

    let (old, new) = match &value {
        Value::Int(i) => {
            let old = Value::Int(*i);
            let next = i64::from(*i) + delta;
            let new = if (i64::from(INTEGER_NUMBER_MIN)..=i64::from(INTEGER_NUMBER_MAX)).contains(&next)
            {
                Value::Int(next as i32)
            } else {
                Value::Number(next as f64)
            };
            (old, new)
        }
        other => {
            let number = other.to_number(vm)?;
            (Value::number(number), Value::number(number + delta as f64))
        }
    };

    let routed = if post { old } else { new.clone() };

    let property = frame.stack.pop().expect("reference property");
    let base = frame.stack.pop().expect("reference base");
    match base {
        Value::RegisterRef(index) => {
            frame.registers[usize::from(index)] = new;
        }
        base => operations::set_value(vm, &base, &property, new, frame.strict())?,
    }

    if entry.put_stack() {
        frame.stack.push(routed);
    } else if entry.put_block() {
        frame.block_result = routed;
    }
    Ok(Flow::Next)
}
