//! End-to-end tests over hand-assembled code units.

use std::cell::Cell;
use std::rc::Rc;

use kestrel_middle::builder::CodeBuilder;
use kestrel_middle::{CodeFlags, CodeUnit, ExtOpcode, Opcode};

use crate::frame::{Frame, This};
use crate::object::error::{error_kind, ErrorKind};
use crate::object::PropertyKey;
use crate::value::Value;
use crate::Vm;

fn run(build: impl FnOnce(&mut CodeBuilder)) -> Result<Value, Value> {
    let mut vm = Vm::new(Default::default());
    run_in(&mut vm, build)
}

fn run_in(vm: &mut Vm, build: impl FnOnce(&mut CodeBuilder)) -> Result<Value, Value> {
    let mut b = CodeBuilder::new();
    build(&mut b);
    vm.run_global(b.finish())
}

#[test]
fn int_addition_through_registers() {
    // var x = 1; x + 2
    let result = run(|b| {
        b.registers(1);
        let x = b.register(0);
        b.op(Opcode::PushPosByte).byte(0);
        b.op(Opcode::MovIdent).lit(x);
        b.op_lit(Opcode::Push, x);
        b.op(Opcode::PushPosByte).byte(1);
        b.op(Opcode::Add);
        b.op(Opcode::Return);
    })
    .unwrap();
    assert_eq!(result, Value::Int(3));
}

#[test]
fn global_var_binding_roundtrip() {
    // var x = 1 installed on the global object, then read back through the
    // identifier path.
    let mut vm = Vm::new(Default::default());
    let result = run_in(&mut vm, |b| {
        let x = b.ident("x");
        b.ext(ExtOpcode::VarEval).lit(x);
        b.op(Opcode::PushPosByte).byte(0);
        b.op(Opcode::MovIdent).lit(x);
        b.op_lit(Opcode::Push, x);
        b.op(Opcode::PushPosByte).byte(1);
        b.op(Opcode::Add);
        b.op(Opcode::Return);
    })
    .unwrap();
    assert_eq!(result, Value::Int(3));

    let global = vm.global();
    let stored = global.get(&mut vm, &PropertyKey::from("x")).unwrap();
    assert_eq!(stored, Value::Int(1));
}

#[test]
fn counting_loop_accumulates() {
    // var n = 0; for (var i = 0; i < 5; i++) n += i; n
    let result = run(|b| {
        b.registers(2);
        let n = b.register(0);
        let i = b.register(1);

        b.op(Opcode::PushZero).op(Opcode::MovIdent).lit(n);
        b.op(Opcode::PushZero).op(Opcode::MovIdent).lit(i);

        let head = b.label();
        let end = b.label();
        b.bind(head);
        b.op_lit(Opcode::Push, i);
        b.op(Opcode::PushPosByte).byte(4);
        b.op(Opcode::Less);
        b.branch(Opcode::BranchIfFalse, end);

        b.op(Opcode::IdentReference).lit(n);
        b.op_lit(Opcode::Push, i);
        b.op(Opcode::Add);
        b.op(Opcode::Assign);

        b.op(Opcode::IdentReference).lit(i);
        b.op(Opcode::PostIncr);
        b.branch(Opcode::JumpBack, head);

        b.bind(end);
        b.op_lit(Opcode::Push, n);
        b.op(Opcode::Return);
    })
    .unwrap();
    assert_eq!(result, Value::Int(10));
}

#[test]
fn fused_compare_and_backward_branch() {
    // Same sum as a do-while, exercising the LESS + backward-branch fusion.
    let result = run(|b| {
        b.registers(2);
        let n = b.register(0);
        let i = b.register(1);

        b.op(Opcode::PushZero).op(Opcode::MovIdent).lit(n);
        b.op(Opcode::PushZero).op(Opcode::MovIdent).lit(i);

        let body = b.label();
        b.bind(body);
        b.op(Opcode::IdentReference).lit(n);
        b.op_lit(Opcode::Push, i);
        b.op(Opcode::Add);
        b.op(Opcode::Assign);
        b.op(Opcode::IdentReference).lit(i);
        b.op(Opcode::PostIncr);

        b.op_lit(Opcode::Push, i);
        b.op(Opcode::PushPosByte).byte(4);
        b.op(Opcode::Less);
        b.branch(Opcode::BranchIfTrueBack, body);

        b.op_lit(Opcode::Push, n);
        b.op(Opcode::Return);
    })
    .unwrap();
    assert_eq!(result, Value::Int(10));
}

#[test]
fn thrown_value_lands_in_catch_and_finally_runs() {
    // try { throw 42 } catch (e) { e + 1 } finally { "done" } evaluates to 43.
    let result = run(|b| {
        b.stack_limit(8);
        let handler = b.label();
        let catch_end = b.label();
        let end = b.label();

        let done = b.string("done");
        let n42 = b.number(42.0);

        b.branch(Opcode::Try, handler);
        b.op_lit(Opcode::Push, n42);
        b.op(Opcode::Throw);

        b.bind(handler);
        b.branch(Opcode::Catch, catch_end);
        // The exception is on the operand stack here.
        b.op(Opcode::PushPosByte).byte(0);
        b.op(Opcode::Add);
        b.op(Opcode::PopBlock);

        b.bind(catch_end);
        b.branch(Opcode::Finally, end);
        b.op_lit(Opcode::Push, done);
        b.op(Opcode::Pop);
        b.op(Opcode::ContextEnd);

        b.bind(end);
        b.op(Opcode::ReturnWithBlock);
    })
    .unwrap();
    assert_eq!(result, Value::Int(43));
}

#[test]
fn return_in_finally_overrides_try_return() {
    // function f() { try { return 1 } finally { return 2 } } f() == 2
    let f = {
        let mut b = CodeBuilder::new();
        let fin = b.label();
        let end = b.label();
        b.branch(Opcode::Try, fin);
        b.op(Opcode::PushPosByte).byte(0);
        b.op(Opcode::Return);
        b.bind(fin);
        b.branch(Opcode::Finally, end);
        b.op(Opcode::PushPosByte).byte(1);
        b.op(Opcode::Return);
        b.op(Opcode::ContextEnd);
        b.bind(end);
        b.op(Opcode::PushUndefined);
        b.op(Opcode::Return);
        b.finish()
    };

    let result = run(|b| {
        let f = b.function(f);
        b.op(Opcode::Push).lit(f);
        b.op(Opcode::Call0Push);
        b.op(Opcode::Return);
    })
    .unwrap();
    assert_eq!(result, Value::Int(2));
}

#[test]
fn throw_propagates_through_nested_finally_regions_in_order() {
    // try { try { throw 1 } finally { acc += "f" } }
    // catch { acc += "c" } finally { acc += "F" }
    let result = run(|b| {
        b.registers(1);
        b.stack_limit(8);
        let acc = b.register(0);
        let empty = b.string("");
        let f = b.string("f");
        let c = b.string("c");
        let big_f = b.string("F");

        b.op_lit(Opcode::Push, empty);
        b.op(Opcode::MovIdent).lit(acc);

        let outer_handler = b.label();
        let outer_catch_end = b.label();
        let outer_end = b.label();
        let inner_handler = b.label();
        let inner_end = b.label();

        b.branch(Opcode::Try, outer_handler);
        b.branch(Opcode::Try, inner_handler);
        b.op(Opcode::PushPosByte).byte(0);
        b.op(Opcode::Throw);
        b.bind(inner_handler);
        b.branch(Opcode::Finally, inner_end);
        b.op(Opcode::IdentReference).lit(acc);
        b.op_lit(Opcode::Push, f);
        b.op(Opcode::Add);
        b.op(Opcode::Assign);
        b.op(Opcode::ContextEnd);
        b.bind(inner_end);

        b.bind(outer_handler);
        b.branch(Opcode::Catch, outer_catch_end);
        b.op(Opcode::Pop);
        b.op(Opcode::IdentReference).lit(acc);
        b.op_lit(Opcode::Push, c);
        b.op(Opcode::Add);
        b.op(Opcode::Assign);
        b.bind(outer_catch_end);
        b.branch(Opcode::Finally, outer_end);
        b.op(Opcode::IdentReference).lit(acc);
        b.op_lit(Opcode::Push, big_f);
        b.op(Opcode::Add);
        b.op(Opcode::Assign);
        b.op(Opcode::ContextEnd);
        b.bind(outer_end);

        b.op_lit(Opcode::Push, acc);
        b.op(Opcode::Return);
    })
    .unwrap();
    assert_eq!(result, Value::string("fcF"));
}

fn generator_unit() -> Rc<CodeUnit> {
    let mut b = CodeBuilder::new();
    b.flags(CodeFlags::GENERATOR | CodeFlags::IS_FUNCTION);
    b.ext(ExtOpcode::CreateGenerator);
    b.op(Opcode::PushPosByte).byte(0);
    b.ext(ExtOpcode::Yield);
    b.op(Opcode::Pop);
    b.op(Opcode::PushPosByte).byte(1);
    b.ext(ExtOpcode::Yield);
    b.op(Opcode::Pop);
    b.op(Opcode::PushUndefined);
    b.op(Opcode::Return);
    b.finish()
}

#[test]
fn generator_yields_then_completes() {
    let mut vm = Vm::new(Default::default());
    let generator = run_in(&mut vm, |b| {
        let g = b.function(generator_unit());
        b.op(Opcode::Push).lit(g);
        b.op(Opcode::Call0Push);
        b.op(Opcode::Return);
    })
    .unwrap();

    let mut next = |vm: &mut Vm| {
        let result = crate::generator::generator_next(vm, generator.clone(), &[]).unwrap();
        let obj = result.as_object().unwrap().clone();
        let value = obj.get(vm, &PropertyKey::from("value")).unwrap();
        let done = obj.get(vm, &PropertyKey::from("done")).unwrap();
        (value, done)
    };

    assert_eq!(next(&mut vm), (Value::Int(1), Value::Boolean(false)));
    assert_eq!(next(&mut vm), (Value::Int(2), Value::Boolean(false)));
    assert_eq!(next(&mut vm), (Value::Undefined, Value::Boolean(true)));
    assert_eq!(next(&mut vm), (Value::Undefined, Value::Boolean(true)));
}

#[test]
fn generator_drives_method_calls_from_bytecode() {
    // var it = g(); it.next().value
    let result = run(|b| {
        b.registers(1);
        b.stack_limit(8);
        let it = b.register(0);
        let g = b.function(generator_unit());
        let next = b.string("next");
        let value = b.string("value");

        b.op(Opcode::Push).lit(g);
        b.op(Opcode::Call0Push);
        b.op(Opcode::MovIdent).lit(it);

        b.op_lit(Opcode::Push, it);
        b.op(Opcode::PropLitReference).lit(next);
        b.op(Opcode::ResolveBaseForCall);
        b.op(Opcode::Call0PropPush);
        b.op_lit(Opcode::Push, value);
        b.op(Opcode::PropGet);
        b.op(Opcode::Return);
    })
    .unwrap();
    assert_eq!(result, Value::Int(1));
}

#[test]
fn for_of_over_a_generator() {
    // var acc = 0; for (const v of g()) acc += v; acc
    let result = run(|b| {
        b.registers(2);
        b.stack_limit(8);
        let acc = b.register(0);
        let v = b.register(1);
        let g = b.function(generator_unit());

        b.op(Opcode::PushZero).op(Opcode::MovIdent).lit(acc);

        b.op(Opcode::Push).lit(g);
        b.op(Opcode::Call0Push);

        let body = b.label();
        let end = b.label();
        b.branch(Opcode::ForOfInit, end);
        b.bind(body);
        b.op(Opcode::ForOfGetNext);
        b.op(Opcode::MovIdent).lit(v);
        b.op_lit(Opcode::Push, acc);
        b.op_lit(Opcode::Push, v);
        b.op(Opcode::Add);
        b.op(Opcode::MovIdent).lit(acc);
        b.branch(Opcode::ForOfNext, body);
        b.bind(end);

        b.op_lit(Opcode::Push, acc);
        b.op(Opcode::Return);
    })
    .unwrap();
    assert_eq!(result, Value::Int(3));
}

fn derived_constructor_unit(super_calls: usize) -> Rc<CodeUnit> {
    let mut b = CodeBuilder::new();
    b.flags(CodeFlags::IS_FUNCTION | CodeFlags::STRICT_MODE | CodeFlags::CONSTRUCTOR | CodeFlags::DERIVED_CONSTRUCTOR);
    for _ in 0..super_calls {
        b.ext(ExtOpcode::SuperCall).byte(0);
    }
    b.op(Opcode::PushUndefined);
    b.op(Opcode::Return);
    b.finish()
}

fn class_pair(b: &mut CodeBuilder, ctor: Rc<CodeUnit>) -> (kestrel_middle::builder::LitRef, kestrel_middle::builder::LitRef) {
    // class A {}; class B extends A { constructor ... }; leaves A in r0, B in r1.
    let a_name = b.string("A");
    let b_name = b.string("B");
    let a_reg = b.register(0);
    let b_reg = b.register(1);

    b.ext(ExtOpcode::PushClassEnvironment).lit(a_name);
    b.op(Opcode::PushElision);
    b.ext(ExtOpcode::PushImplicitCtor);
    b.ext(ExtOpcode::InitClass);
    b.ext(ExtOpcode::FinalizeClass).lit(a_name);
    b.op(Opcode::MovIdent).lit(a_reg);

    let ctor = b.function(ctor);
    b.ext(ExtOpcode::PushClassEnvironment).lit(b_name);
    b.op_lit(Opcode::Push, a_reg);
    b.op(Opcode::Push).lit(ctor);
    b.ext(ExtOpcode::InitClass);
    b.ext(ExtOpcode::FinalizeClass).lit(b_name);
    b.op(Opcode::MovIdent).lit(b_reg);

    (a_reg, b_reg)
}

#[test]
fn single_super_call_constructs_an_instance() {
    let result = run(|b| {
        b.registers(3);
        b.stack_limit(8);
        let instance = b.register(2);
        let ctor = derived_constructor_unit(1);
        let (a_reg, b_reg) = class_pair(b, ctor);

        b.op_lit(Opcode::Push, b_reg);
        b.op(Opcode::New0);
        b.op(Opcode::MovIdent).lit(instance);
        // [instance instanceof B, instance instanceof A]
        b.op(Opcode::PushArray);
        b.op_lit(Opcode::Push, instance);
        b.op_lit(Opcode::Push, b_reg);
        b.op(Opcode::InstanceOf);
        b.op_lit(Opcode::Push, instance);
        b.op_lit(Opcode::Push, a_reg);
        b.op(Opcode::InstanceOf);
        b.op(Opcode::AppendArray).byte(2);
        b.op(Opcode::Return);
    })
    .unwrap();

    let array = result.as_object().unwrap().clone();
    let mut vm = Vm::new(Default::default());
    for index in ["0", "1"] {
        let is_instance = array.get(&mut vm, &PropertyKey::from(index)).unwrap();
        assert_eq!(is_instance, Value::Boolean(true), "instanceof via {index}");
    }
}

#[test]
fn second_super_call_raises_reference_error() {
    let err = run(|b| {
        b.registers(2);
        b.stack_limit(8);
        let ctor = derived_constructor_unit(2);
        let (_, b_reg) = class_pair(b, ctor);

        b.op_lit(Opcode::Push, b_reg);
        b.op(Opcode::New0);
        b.op(Opcode::Return);
    })
    .unwrap_err();
    assert_eq!(error_kind(&err), Some(ErrorKind::ReferenceError));
}

#[test]
fn typeof_of_unresolved_identifier_is_undefined() {
    let result = run(|b| {
        let nope = b.ident("nope");
        b.op(Opcode::TypeofIdent).lit(nope);
        b.op(Opcode::Return);
    })
    .unwrap();
    assert_eq!(result, Value::string("undefined"));
}

#[test]
fn for_in_enumerates_a_snapshot() {
    // Deleting "b" during iteration skips it; adding "d" does not enumerate it.
    let result = run(|b| {
        b.registers(3);
        b.stack_limit(8);
        let obj = b.register(0);
        let acc = b.register(1);
        let key = b.register(2);
        let a = b.string("a");
        let bee = b.string("b");
        let c = b.string("c");
        let d = b.string("d");
        let empty = b.string("");

        b.op(Opcode::PushObject);
        for name in [a, bee, c] {
            b.op(Opcode::PushPosByte).byte(0);
            b.op(Opcode::SetProperty).lit(name);
        }
        b.op(Opcode::MovIdent).lit(obj);
        b.op_lit(Opcode::Push, empty);
        b.op(Opcode::MovIdent).lit(acc);

        let body = b.label();
        let end = b.label();
        b.op_lit(Opcode::Push, obj);
        b.branch(Opcode::ForInInit, end);
        b.bind(body);
        b.op(Opcode::ForInGetNext);
        b.op(Opcode::MovIdent).lit(key);
        // acc += key
        b.op_lit(Opcode::Push, acc);
        b.op_lit(Opcode::Push, key);
        b.op(Opcode::Add);
        b.op(Opcode::MovIdent).lit(acc);
        // delete obj.b
        b.op_lit(Opcode::Push, obj);
        b.op_lit(Opcode::Push, bee);
        b.op(Opcode::PropDelete);
        b.op(Opcode::Pop);
        // obj.d = 1
        b.op_lit(Opcode::Push, obj);
        b.op_lit(Opcode::Push, d);
        b.op(Opcode::PushPosByte).byte(0);
        b.op(Opcode::Assign);
        b.branch(Opcode::ForInNext, body);
        b.bind(end);

        b.op_lit(Opcode::Push, acc);
        b.op(Opcode::Return);
    })
    .unwrap();
    assert_eq!(result, Value::string("ac"));
}

#[test]
fn with_scope_resolves_through_the_object() {
    let result = run(|b| {
        b.stack_limit(8);
        let x_str = b.string("x");
        let x = b.ident("x");
        let end = b.label();

        b.op(Opcode::PushObject);
        b.op(Opcode::PushPosByte).byte(6);
        b.op(Opcode::SetProperty).lit(x_str);
        b.branch(Opcode::With, end);
        b.op_lit(Opcode::Push, x);
        b.op(Opcode::Return);
        b.bind(end);
        b.op(Opcode::PushUndefined);
        b.op(Opcode::Return);
    })
    .unwrap();
    assert_eq!(result, Value::Int(7));
}

#[test]
fn spread_call_flattens_arguments() {
    // f(...[1, 2], 3) where f(a, b, c) = a + b + c
    let f = {
        let mut b = CodeBuilder::new();
        b.flags(CodeFlags::IS_FUNCTION);
        b.params(3);
        b.op_lit(Opcode::Push, b.register(0));
        b.op_lit(Opcode::Push, b.register(1));
        b.op(Opcode::Add);
        b.op_lit(Opcode::Push, b.register(2));
        b.op(Opcode::Add);
        b.op(Opcode::Return);
        b.finish()
    };

    let result = run(|b| {
        b.stack_limit(8);
        let f = b.function(f);
        b.op(Opcode::Push).lit(f);
        b.ext(ExtOpcode::PushSpreadElement);
        b.op(Opcode::PushArray);
        b.op(Opcode::PushPosByte).byte(0);
        b.op(Opcode::PushPosByte).byte(1);
        b.op(Opcode::AppendArray).byte(2);
        b.op(Opcode::PushPosByte).byte(2);
        b.ext(ExtOpcode::SpreadCallPush).byte(3);
        b.op(Opcode::Return);
    })
    .unwrap();
    assert_eq!(result, Value::Int(6));
}

#[test]
fn constructed_objects_carry_their_prototype() {
    // function C(v) { this.v = v } : new C(7).v == 7
    let c = {
        let mut b = CodeBuilder::new();
        b.flags(CodeFlags::IS_FUNCTION);
        b.params(1);
        let v = b.string("v");
        b.op_lit(Opcode::Push, b.register(0));
        b.op(Opcode::AssignPropThis).lit(v);
        b.op(Opcode::Assign);
        b.op(Opcode::PushUndefined);
        b.op(Opcode::Return);
        b.finish()
    };

    let result = run(|b| {
        b.registers(2);
        b.stack_limit(8);
        let c = b.function(c);
        let c_reg = b.register(0);
        let obj = b.register(1);
        let v = b.string("v");

        b.op(Opcode::Push).lit(c);
        b.op(Opcode::MovIdent).lit(c_reg);
        b.op_lit(Opcode::Push, c_reg);
        b.op(Opcode::PushPosByte).byte(6);
        b.op(Opcode::New1);
        b.op(Opcode::MovIdent).lit(obj);

        b.op(Opcode::PushArray);
        b.op_lit(Opcode::Push, obj);
        b.op_lit(Opcode::Push, v);
        b.op(Opcode::PropGet);
        b.op_lit(Opcode::Push, obj);
        b.op_lit(Opcode::Push, c_reg);
        b.op(Opcode::InstanceOf);
        b.op(Opcode::AppendArray).byte(2);
        b.op(Opcode::Return);
    })
    .unwrap();

    let array = result.as_object().unwrap().clone();
    let mut vm = Vm::new(Default::default());
    assert_eq!(array.get(&mut vm, &PropertyKey::from("0")).unwrap(), Value::Int(7));
    assert_eq!(
        array.get(&mut vm, &PropertyKey::from("1")).unwrap(),
        Value::Boolean(true)
    );
}

#[test]
fn getters_run_on_property_access() {
    let getter = {
        let mut b = CodeBuilder::new();
        b.flags(CodeFlags::IS_FUNCTION);
        b.op(Opcode::PushPosByte).byte(41);
        b.op(Opcode::Return);
        b.finish()
    };

    let result = run(|b| {
        b.stack_limit(8);
        let getter = b.function(getter);
        let x = b.string("x");
        b.op(Opcode::PushObject);
        b.op(Opcode::Push).lit(getter);
        b.op(Opcode::SetGetter).lit(x);
        b.op_lit(Opcode::Push, x);
        b.op(Opcode::PropGet);
        b.op(Opcode::Return);
    })
    .unwrap();
    assert_eq!(result, Value::Int(42));
}

#[test]
fn closures_share_their_captured_environment() {
    // function outer() { var n = 0; return function () { return ++n } }
    let inner = {
        let mut b = CodeBuilder::new();
        b.flags(CodeFlags::IS_FUNCTION);
        let n = b.ident("n");
        b.op(Opcode::IdentReference).lit(n);
        b.op(Opcode::PreIncrPush);
        b.op(Opcode::Return);
        b.finish()
    };
    let outer = {
        let mut b = CodeBuilder::new();
        b.flags(CodeFlags::IS_FUNCTION);
        let n = b.ident("n");
        let inner = b.function(inner);
        b.op(Opcode::PushZero);
        b.op(Opcode::InitVar).lit(n);
        b.op(Opcode::Push).lit(inner);
        b.op(Opcode::Return);
        b.finish()
    };

    let result = run(|b| {
        b.registers(1);
        b.stack_limit(8);
        let counter = b.register(0);
        let outer = b.function(outer);
        b.op(Opcode::Push).lit(outer);
        b.op(Opcode::Call0Push);
        b.op(Opcode::MovIdent).lit(counter);
        b.op_lit(Opcode::Push, counter);
        b.op(Opcode::Call0Push);
        b.op(Opcode::Pop);
        b.op_lit(Opcode::Push, counter);
        b.op(Opcode::Call0Push);
        b.op(Opcode::Return);
    })
    .unwrap();
    assert_eq!(result, Value::Int(2));
}

#[test]
fn tdz_read_raises_reference_error() {
    let err = run(|b| {
        b.flags(CodeFlags::HAS_LEXICAL_BLOCK);
        let x = b.ident("x");
        b.op(Opcode::CreateLet).lit(x);
        b.op_lit(Opcode::Push, x);
        b.op(Opcode::Return);
    })
    .unwrap_err();
    assert_eq!(error_kind(&err), Some(ErrorKind::ReferenceError));
}

#[test]
fn const_reassignment_raises_type_error() {
    let err = run(|b| {
        b.flags(CodeFlags::HAS_LEXICAL_BLOCK);
        let c = b.ident("c");
        b.op(Opcode::CreateConst).lit(c);
        b.op(Opcode::PushZero);
        b.op(Opcode::AssignLetConst).lit(c);
        b.op(Opcode::PushPosByte).byte(0);
        b.op(Opcode::MovIdent).lit(c);
        b.op(Opcode::PushUndefined);
        b.op(Opcode::Return);
    })
    .unwrap_err();
    assert_eq!(error_kind(&err), Some(ErrorKind::TypeError));
}

#[test]
fn logical_branch_keeps_the_short_circuit_operand() {
    for (first, expected) in [(0u8, Value::Int(5)), (3, Value::Int(3))] {
        let result = run(|b| {
            let end = b.label();
            if first == 0 {
                b.op(Opcode::PushZero);
            } else {
                b.op(Opcode::PushPosByte).byte(first - 1);
            }
            b.branch(Opcode::BranchIfLogicalTrue, end);
            b.op(Opcode::PushPosByte).byte(4);
            b.bind(end);
            b.op(Opcode::Return);
        })
        .unwrap();
        assert_eq!(result, expected);
    }
}

#[test]
fn property_access_on_nullish_base_is_a_type_error() {
    let err = run(|b| {
        let x = b.string("x");
        b.op(Opcode::PushNull);
        b.op_lit(Opcode::Push, x);
        b.op(Opcode::PropGet);
        b.op(Opcode::Return);
    })
    .unwrap_err();
    assert_eq!(error_kind(&err), Some(ErrorKind::TypeError));
}

fn stop_counting_callback(vm: &mut Vm) -> Result<(), Value> {
    let count = vm.params().state::<Cell<u32>>().expect("state installed");
    count.set(count.get() + 1);
    Ok(())
}

#[test]
fn stop_callback_fires_on_backward_branches() {
    let params = crate::params::VmParams::new()
        .set_stop_callback(stop_counting_callback, 1)
        .set_state(Box::new(Cell::new(0u32)));
    let mut vm = Vm::new(params);

    run_in(&mut vm, |b| {
        b.registers(1);
        let i = b.register(0);
        b.op(Opcode::PushZero).op(Opcode::MovIdent).lit(i);
        let body = b.label();
        b.bind(body);
        b.op(Opcode::IdentReference).lit(i);
        b.op(Opcode::PostIncr);
        b.op_lit(Opcode::Push, i);
        b.op(Opcode::PushPosByte).byte(9);
        b.op(Opcode::Less);
        b.branch(Opcode::BranchIfTrueBack, body);
        b.op(Opcode::PushUndefined);
        b.op(Opcode::Return);
    })
    .unwrap();

    let count = vm.params().state::<Cell<u32>>().unwrap().get();
    assert!(count >= 10, "callback fired {count} times");
}

fn aborting_callback(vm: &mut Vm) -> Result<(), Value> {
    let count = vm.params().state::<Cell<u32>>().expect("state installed");
    count.set(count.get() + 1);
    if count.get() > 3 {
        Err(Value::Int(99))
    } else {
        Ok(())
    }
}

#[test]
fn stop_callback_abort_bypasses_catch_handlers() {
    let params = crate::params::VmParams::new()
        .set_stop_callback(aborting_callback, 1)
        .set_state(Box::new(Cell::new(0u32)));
    let mut vm = Vm::new(params);

    // try { for (;;) {} } catch (e) { return 0 } never reaches the catch.
    let err = run_in(&mut vm, |b| {
        b.stack_limit(8);
        let handler = b.label();
        let catch_end = b.label();
        b.branch(Opcode::Try, handler);
        let spin = b.label();
        b.bind(spin);
        b.branch(Opcode::JumpBack, spin);
        b.bind(handler);
        b.branch(Opcode::Catch, catch_end);
        b.op(Opcode::Pop);
        b.op(Opcode::PushZero);
        b.op(Opcode::Return);
        b.bind(catch_end);
        b.op(Opcode::ContextEnd);
        b.op(Opcode::PushUndefined);
        b.op(Opcode::Return);
    })
    .unwrap_err();
    assert_eq!(err, Value::Int(99));
}

#[test]
fn frame_invariants_hold_after_completion() {
    // Loops, try/finally and scratch values leave no residue: the operand
    // stack and the context stack drain back to empty on normal return.
    let mut vm = Vm::new(Default::default());
    let mut b = CodeBuilder::new();
    b.registers(1);
    b.stack_limit(8);
    let i = b.register(0);
    let fin = b.label();
    let end = b.label();
    b.op(Opcode::PushZero).op(Opcode::MovIdent).lit(i);
    b.branch(Opcode::Try, fin);
    let body = b.label();
    b.bind(body);
    b.op(Opcode::IdentReference).lit(i);
    b.op(Opcode::PostIncr);
    b.op_lit(Opcode::Push, i);
    b.op(Opcode::PushPosByte).byte(2);
    b.op(Opcode::Less);
    b.branch(Opcode::BranchIfTrueBack, body);
    b.bind(fin);
    b.branch(Opcode::Finally, end);
    b.op(Opcode::ContextEnd);
    b.bind(end);
    b.op_lit(Opcode::Push, i);
    b.op(Opcode::PopBlock);
    b.op(Opcode::ReturnWithBlock);
    let code = b.finish();

    let mut frame = Frame::new(code, This::Default, vm.global_env());
    frame.init_exec(&[]);
    let completion = vm.execute(&mut frame).unwrap();
    assert_eq!(completion.into_value(), Value::Int(3));
    assert_eq!(frame.context_depth(), 0);
    assert!(frame.stack.is_empty());
}

#[test]
fn iterator_steps_drive_array_destructuring() {
    // const [a, b, ...rest] = [1, 2, 3, 4]; [a, b, rest.length]
    let result = run(|b| {
        b.registers(3);
        b.stack_limit(8);
        let a = b.register(0);
        let second = b.register(1);
        let rest = b.register(2);
        let length = b.string("length");

        b.op(Opcode::PushArray);
        for byte in 0..4 {
            b.op(Opcode::PushPosByte).byte(byte);
        }
        b.op(Opcode::AppendArray).byte(4);

        b.ext(ExtOpcode::GetIterator);
        b.ext(ExtOpcode::IteratorStep);
        b.op(Opcode::MovIdent).lit(a);
        b.ext(ExtOpcode::IteratorStep);
        b.op(Opcode::MovIdent).lit(second);
        b.ext(ExtOpcode::RestInitializer);
        b.op(Opcode::MovIdent).lit(rest);
        b.ext(ExtOpcode::IteratorClose);
        b.op(Opcode::Pop);

        b.op(Opcode::PushArray);
        b.op_lit(Opcode::Push, a);
        b.op_lit(Opcode::Push, second);
        b.op_lit(Opcode::Push, rest);
        b.op_lit(Opcode::Push, length);
        b.op(Opcode::PropGet);
        b.op(Opcode::AppendArray).byte(3);
        b.op(Opcode::Return);
    })
    .unwrap();

    let array = result.as_object().unwrap().clone();
    let mut vm = Vm::new(Default::default());
    for (index, expected) in [("0", 1), ("1", 2), ("2", 2)] {
        let value = array.get(&mut vm, &PropertyKey::from(index)).unwrap();
        assert_eq!(value, Value::Int(expected), "slot {index}");
    }
}

#[test]
fn await_is_a_hint_and_return_promise_wraps_the_result() {
    let result = run(|b| {
        b.op(Opcode::PushPosByte).byte(4);
        b.ext(ExtOpcode::Await);
        b.ext(ExtOpcode::ReturnPromise);
    })
    .unwrap();

    let promise = result.as_object().unwrap();
    match &promise.borrow().kind {
        crate::object::ObjectKind::Promise(crate::object::PromiseState::Resolved(value)) => {
            assert_eq!(*value, Value::Int(5));
        }
        other => panic!("expected a resolved promise, got {other:?}"),
    };
}

#[test]
fn rest_parameters_collect_surplus_arguments() {
    // function f(a, ...rest) { return rest } f(1, 2, 3).length == 2
    let f = {
        let mut b = CodeBuilder::new();
        b.flags(CodeFlags::IS_FUNCTION | CodeFlags::REST_PARAMETER);
        b.params(1);
        b.registers(2);
        b.op_lit(Opcode::Push, b.register(1));
        b.op(Opcode::Return);
        b.finish()
    };

    let result = run(|b| {
        b.stack_limit(8);
        let f = b.function(f);
        let length = b.string("length");
        b.op(Opcode::Push).lit(f);
        b.op(Opcode::PushPosByte).byte(0);
        b.op(Opcode::PushPosByte).byte(1);
        b.op(Opcode::PushPosByte).byte(2);
        b.op(Opcode::Call3Push);
        b.op_lit(Opcode::Push, length);
        b.op(Opcode::PropGet);
        b.op(Opcode::Return);
    })
    .unwrap();
    assert_eq!(result, Value::Int(2));
}
