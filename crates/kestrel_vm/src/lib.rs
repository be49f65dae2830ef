//! A stack-based ECMAScript bytecode virtual machine for constrained
//! targets: compact tagged values, small-integer fast paths and a single
//! linear frame stack. It executes [`kestrel_middle::CodeUnit`]s produced by
//! an upstream compiler (or the builder in `kestrel_middle::builder`).

use kestrel_log::{debug, span, Level};
use kestrel_middle::{CodeFlags, CodeUnit};

use std::rc::Rc;

use crate::environment::EnvironmentHandle;
use crate::frame::{Frame, This};
use crate::object::ObjectHandle;
use crate::params::VmParams;
use crate::statics::Statics;
use crate::value::Value;

pub mod call;
pub mod context;
pub mod dispatch;
pub mod environment;
pub mod frame;
pub mod generator;
pub mod iterator;
#[cfg(feature = "lookup-cache")]
pub mod lcache;
mod macros;
pub mod object;
pub mod operations;
pub mod params;
pub mod statics;
pub mod value;

#[cfg(test)]
mod test;

pub use call::MAX_FRAME_STACK_SIZE;
pub use dispatch::Completion;

pub struct Vm {
    global: ObjectHandle,
    global_env: EnvironmentHandle,
    pub(crate) statics: Box<Statics>,
    pub(crate) params: VmParams,
    pub(crate) stop_counter: u32,
    /// Pending exception is an abort: it bypasses every catch handler.
    pub(crate) abort: bool,
    /// Set by the `DIRECT_EVAL` marker, consumed by the next call.
    pub(crate) direct_eval: bool,
    pub(crate) frame_depth: usize,
    #[cfg(feature = "lookup-cache")]
    pub(crate) lcache: lcache::LookupCache,
}

impl Vm {
    pub fn new(params: VmParams) -> Self {
        debug!("create vm");
        let global = ObjectHandle::ordinary();
        let global_env = EnvironmentHandle::new_object(None, global.clone(), false);
        let stop_counter = params.stop_frequency();
        Self {
            global,
            global_env,
            statics: Box::new(Statics::new()),
            params,
            stop_counter,
            abort: false,
            direct_eval: false,
            frame_depth: 0,
            #[cfg(feature = "lookup-cache")]
            lcache: lcache::LookupCache::default(),
        }
    }

    pub fn global(&self) -> ObjectHandle {
        self.global.clone()
    }

    pub fn global_env(&self) -> EnvironmentHandle {
        self.global_env.clone()
    }

    pub fn params(&self) -> &VmParams {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut VmParams {
        &mut self.params
    }

    pub fn statics(&self) -> &Statics {
        &self.statics
    }

    /// Whether the most recent call was flagged as a direct eval.
    pub fn take_direct_eval(&mut self) -> bool {
        std::mem::take(&mut self.direct_eval)
    }

    /// Drives a frame until it completes, yields, or fails, performing the
    /// deferred call operations the dispatch loop hands back.
    pub(crate) fn execute(&mut self, frame: &mut Frame) -> Result<Completion, Value> {
        let span = span!(Level::TRACE, "vm frame");
        let _entered = span.enter();

        loop {
            let completion = dispatch::vm_loop(self, frame)?;
            match completion {
                Completion::Defer => {
                    let operation = frame
                        .call_operation
                        .take()
                        .expect("deferred completion records an operation");
                    if let Err(exception) = call::perform(self, frame, operation) {
                        // Route the failure through the standard error path
                        // on re-entry.
                        frame.pending_throw = Some(exception);
                    }
                }
                other => return Ok(other),
            }
        }
    }

    /// Top-level entry: runs a code unit with an explicit `this` binding and
    /// lexical environment.
    pub fn run(
        &mut self,
        code: Rc<CodeUnit>,
        this: Value,
        env: EnvironmentHandle,
        args: &[Value],
    ) -> Result<Value, Value> {
        let env = if code.flags.contains(CodeFlags::HAS_LEXICAL_BLOCK) {
            EnvironmentHandle::new_declarative(Some(env), true)
        } else {
            env
        };
        let this = if this.is_nullish() {
            This::Default
        } else {
            This::Bound(this)
        };

        let mut frame = Frame::new(code, this, env);
        frame.init_exec(args);

        let result = self.execute(&mut frame).map(Completion::into_value);
        if result.is_err() {
            // A stop-callback abort ends here; the error surfaces normally.
            self.abort = false;
        }
        result
    }

    /// Runs a top-level script against the global object and scope.
    pub fn run_global(&mut self, code: Rc<CodeUnit>) -> Result<Value, Value> {
        let global = Value::Object(self.global.clone());
        let env = self.global_env.clone();
        self.run(code, global, env, &[])
    }

    /// Runs eval code. Direct eval receives the caller's lexical environment;
    /// indirect eval runs in the global scope.
    pub fn run_eval(
        &mut self,
        code: Rc<CodeUnit>,
        caller_env: Option<EnvironmentHandle>,
        direct: bool,
    ) -> Result<Value, Value> {
        let base = match caller_env {
            Some(env) if direct => env,
            _ => self.global_env.clone(),
        };
        // Eval code always gets its own declarative scope so sloppy-mode
        // `var`s hoist past it into the caller's variable scope.
        let env = EnvironmentHandle::new_declarative(Some(base), true);
        let mut frame = Frame::new(code, This::Default, env);
        frame.is_eval_code = true;
        frame.init_exec(&[]);
        let result = self.execute(&mut frame).map(Completion::into_value);
        if result.is_err() {
            self.abort = false;
        }
        result
    }

    /// Runs a module body in `env`. Module linkage (imports/exports) is the
    /// embedder's concern; the VM only provides the scope discipline.
    pub fn run_module(&mut self, code: Rc<CodeUnit>, env: EnvironmentHandle) -> Result<Value, Value> {
        debug_assert!(code.flags.contains(CodeFlags::MODULE));
        self.run(code, Value::Undefined, env, &[])
    }
}

impl std::fmt::Debug for Vm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Vm")
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new(VmParams::default())
    }
}
