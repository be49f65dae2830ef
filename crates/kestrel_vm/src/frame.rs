//! Per-call activation records and the bytecode stream reader.

use std::rc::Rc;

use kestrel_middle::code::{
    FULL_LITERAL_ENCODING_DELTA, FULL_LITERAL_ENCODING_LIMIT, SMALL_LITERAL_ENCODING_DELTA,
    SMALL_LITERAL_ENCODING_LIMIT,
};
use kestrel_middle::{CodeFlags, CodeUnit, ExtOpcode, Literal, Opcode};

use crate::context::ContextRecord;
use crate::environment::{resolve_reference_value, EnvironmentHandle};
use crate::object::ObjectHandle;
use crate::throw;
use crate::value::Value;
use crate::Vm;

/// The `this` binding of a frame. Derived-class constructors start in
/// `BeforeSuper` and move to `Bound` when `super()` completes.
#[derive(Debug, Clone)]
pub enum This {
    /// Global object in sloppy mode, `undefined` in strict mode.
    Default,
    BeforeSuper,
    Bound(Value),
}

impl This {
    pub fn to_value(&self, vm: &mut Vm, strict: bool) -> Result<Value, Value> {
        match self {
            This::Default => {
                if strict {
                    Ok(Value::Undefined)
                } else {
                    Ok(Value::Object(vm.global()))
                }
            }
            This::Bound(value) => Ok(value.clone()),
            This::BeforeSuper => throw!(
                vm,
                ReferenceError,
                "Must call super constructor before accessing 'this'"
            ),
        }
    }
}

/// A deferred invocation: the dispatch loop records it and returns to
/// `execute`, which performs the operation and re-enters the loop.
#[derive(Debug, Clone, Copy)]
pub enum CallOperation {
    Call { opcode: Opcode, argc: u16 },
    Construct { opcode: Opcode, argc: u16 },
    SuperCall { opcode: ExtOpcode, argc: u16 },
    Spread { opcode: ExtOpcode },
}

#[derive(Debug, Clone)]
pub struct Frame {
    pub code: Rc<CodeUnit>,
    pub ip: usize,
    pub registers: Vec<Value>,
    /// Operand stack; context records keep their own parallel stack.
    pub stack: Vec<Value>,
    pub contexts: Vec<ContextRecord>,
    pub lex_env: EnvironmentHandle,
    pub this: This,
    pub new_target: Option<Value>,
    /// The executing function object; `super` resolution reads its prototype.
    pub function: Option<ObjectHandle>,
    /// Accumulator for expression-statement completion values.
    pub block_result: Value,
    pub call_operation: Option<CallOperation>,
    /// Exception handed back by a failed deferred operation; the dispatch
    /// loop consumes it on entry and routes straight into the unwinder.
    pub pending_throw: Option<Value>,
    /// Flattened argument buffer of a pending spread operation.
    pub spread_collection: Option<Vec<Value>>,
    pub is_eval_code: bool,
}

impl Frame {
    pub fn new(code: Rc<CodeUnit>, this: This, lex_env: EnvironmentHandle) -> Self {
        Self {
            code,
            ip: 0,
            registers: Vec::new(),
            stack: Vec::new(),
            contexts: Vec::new(),
            lex_env,
            this,
            new_target: None,
            function: None,
            block_result: Value::Undefined,
            call_operation: None,
            pending_throw: None,
            spread_collection: None,
            is_eval_code: false,
        }
    }

    /// Seeds arguments and registers. Surplus arguments go into the rest
    /// array when the unit declares a rest parameter, otherwise they are
    /// dropped; missing arguments read as `undefined`.
    pub fn init_exec(&mut self, args: &[Value]) {
        let argument_end = usize::from(self.code.argument_end);
        let register_end = usize::from(self.code.register_end);

        self.registers = Vec::with_capacity(register_end);
        let seeded = args.len().min(argument_end);
        self.registers.extend_from_slice(&args[..seeded]);
        self.registers.resize(register_end, Value::Undefined);

        if self.code.flags.contains(CodeFlags::REST_PARAMETER) {
            let rest: Vec<Value> = args.get(argument_end..).unwrap_or_default().to_vec();
            self.registers[argument_end] = Value::Object(ObjectHandle::array(rest));
        }

        self.stack.reserve(usize::from(self.code.stack_limit));
    }

    pub fn strict(&self) -> bool {
        self.code.flags.contains(CodeFlags::STRICT_MODE)
    }

    pub fn context_depth(&self) -> usize {
        self.contexts.len()
    }

    pub fn fetch_byte(&mut self) -> u8 {
        let byte = self.code.code[self.ip];
        self.ip += 1;
        byte
    }

    pub fn peek_byte(&self, at: usize) -> Option<u8> {
        self.code.code.get(at).copied()
    }

    /// Reads a literal index in the encoding the code unit was built with.
    pub fn read_literal_index(&mut self) -> u16 {
        let (limit, delta) = if self.code.full_literal_encoding() {
            (FULL_LITERAL_ENCODING_LIMIT, FULL_LITERAL_ENCODING_DELTA)
        } else {
            (SMALL_LITERAL_ENCODING_LIMIT, SMALL_LITERAL_ENCODING_DELTA)
        };
        let first = u16::from(self.fetch_byte());
        if first < limit {
            first
        } else {
            let second = u16::from(self.fetch_byte());
            ((first << 8) | second).wrapping_sub(delta)
        }
    }

    /// Reads a 1-3 byte big-endian branch offset magnitude.
    pub fn read_branch_offset(&mut self, length: u8) -> usize {
        let mut offset = 0usize;
        for _ in 0..length {
            offset = (offset << 8) | usize::from(self.fetch_byte());
        }
        offset
    }

    /// Materializes the value a literal index denotes: a register read, an
    /// identifier resolution, a constant, or a fresh closure over the current
    /// lexical environment.
    pub fn read_literal(&mut self, vm: &mut Vm, index: u16) -> Result<Value, Value> {
        if self.code.is_register(index) {
            return Ok(self.registers[usize::from(index)].clone());
        }
        if self.code.is_ident(index) {
            let name = self
                .code
                .literal(index)
                .as_identifier()
                .expect("ident index names an identifier literal")
                .clone();
            return resolve_reference_value(vm, &self.lex_env, &name.into());
        }
        match self.code.literal(index) {
            Literal::Number(n) => Ok(Value::number(*n)),
            Literal::String(s) => Ok(Value::String(s.clone().into())),
            Literal::Boolean(b) => Ok(Value::Boolean(*b)),
            Literal::Null => Ok(Value::Null),
            Literal::Undefined => Ok(Value::Undefined),
            Literal::Identifier(_) => unreachable!("handled above"),
            Literal::Function(code) => {
                let code = code.clone();
                Ok(Value::Object(crate::call::instantiate_function(
                    vm,
                    &code,
                    &self.lex_env,
                )))
            }
        }
    }

    /// The identifier literal at `index`, for opcodes that take names.
    pub fn ident_name(&self, index: u16) -> crate::value::JsString {
        self.code
            .literal(index)
            .as_identifier()
            .expect("ident index names an identifier literal")
            .clone()
            .into()
    }
}
