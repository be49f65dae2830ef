//! Generator objects: suspended frames packaged as executable objects.

use crate::frame::Frame;
use crate::iterator::make_iter_result;
use crate::object::{GeneratorStage, GeneratorState, ObjectHandle, ObjectKind};
use crate::throw;
use crate::value::Value;
use crate::{Completion, Vm};

/// Packages the running frame into a suspended generator object. The frame's
/// cursor already points past `CREATE_GENERATOR`, so the first resume starts
/// at the generator body.
pub fn create_generator(vm: &mut Vm, frame: &Frame, prototype: Option<ObjectHandle>) -> Value {
    let suspended = Box::new(frame.clone());
    let generator = ObjectHandle::new(ObjectKind::Generator(GeneratorState {
        frame: Some(suspended),
        stage: GeneratorStage::Suspended { started: false },
    }));
    generator.set_prototype(Some(
        prototype.unwrap_or_else(|| vm.statics.generator_prototype.clone()),
    ));
    Value::Object(generator)
}

fn take_frame(vm: &mut Vm, this: &Value) -> Result<Option<(ObjectHandle, Box<Frame>, bool)>, Value> {
    let object = match this {
        Value::Object(o) => o.clone(),
        _ => throw!(vm, TypeError, "Generator method called on a non-generator"),
    };
    let taken = {
        let mut data = object.borrow_mut();
        match &mut data.kind {
            ObjectKind::Generator(state) => match state.stage {
                GeneratorStage::Done => None,
                GeneratorStage::Running => {
                    drop(data);
                    throw!(vm, TypeError, "Generator is already running")
                }
                GeneratorStage::Suspended { started } => {
                    let frame = state.frame.take().expect("suspended generator owns its frame");
                    state.stage = GeneratorStage::Running;
                    Some((frame, started))
                }
            },
            _ => {
                drop(data);
                throw!(vm, TypeError, "Generator method called on a non-generator")
            }
        }
    };
    Ok(taken.map(|(frame, started)| (object, frame, started)))
}

fn settle(object: &ObjectHandle, stage: GeneratorStage, frame: Option<Box<Frame>>) {
    if let ObjectKind::Generator(state) = &mut object.borrow_mut().kind {
        state.stage = stage;
        state.frame = frame;
    }
}

/// `generator.next(value)`: restores the saved frame and re-enters the
/// dispatcher until the next yield or completion.
pub fn generator_next(vm: &mut Vm, this: Value, args: &[Value]) -> Result<Value, Value> {
    let (object, mut frame, started) = match take_frame(vm, &this)? {
        Some(resumed) => resumed,
        None => return Ok(make_iter_result(vm, Value::Undefined, true)),
    };

    if started {
        // The sent value becomes the result of the suspended yield expression.
        let sent = args.first().cloned().unwrap_or_default();
        frame.stack.push(sent);
    }

    match vm.execute(&mut frame) {
        Ok(Completion::Yield(value)) => {
            settle(&object, GeneratorStage::Suspended { started: true }, Some(frame));
            Ok(make_iter_result(vm, value, false))
        }
        Ok(Completion::Return(value)) => {
            settle(&object, GeneratorStage::Done, None);
            Ok(make_iter_result(vm, value, true))
        }
        Err(exception) => {
            settle(&object, GeneratorStage::Done, None);
            Err(exception)
        }
        Ok(Completion::Defer) => unreachable!("deferred operations are performed by execute"),
    }
}

/// `generator.return(value)`: closes the generator without running it.
pub fn generator_return(vm: &mut Vm, this: Value, args: &[Value]) -> Result<Value, Value> {
    let value = args.first().cloned().unwrap_or_default();
    if let Some((object, frame, _)) = take_frame(vm, &this)? {
        drop(frame);
        settle(&object, GeneratorStage::Done, None);
    }
    Ok(make_iter_result(vm, value, true))
}
