//! In-frame context records and the finally-matching stack unwinder.
//!
//! Each record tracks a nested syntactic construct (try, with, for-in,
//! for-of, block) alive in the frame. The `end` offset doubles as the
//! record's protected-range bound and as the place the unwinder peeks to
//! discover whether a `CATCH` or `FINALLY` handler guards the construct.

use kestrel_middle::Opcode;

use crate::frame::Frame;
use crate::value::{JsString, Value};
use crate::Vm;

#[derive(Debug, Clone)]
pub enum ContextKind {
    /// `handler` is the byte offset of the `CATCH` or `FINALLY` opcode.
    Try { handler: usize },
    Catch,
    /// Finally body running; control resumes at `target` on completion.
    FinallyJump { target: usize },
    FinallyThrow { exception: Value },
    FinallyReturn { value: Value },
    With,
    Block,
    ForIn {
        object: crate::object::ObjectHandle,
        keys: Vec<JsString>,
        index: usize,
    },
    ForOf {
        iterator: Value,
        /// Last step result object; `FOR_OF_GET_NEXT` reads its `value`.
        next_result: Value,
    },
}

#[derive(Debug, Clone)]
pub struct ContextRecord {
    pub kind: ContextKind,
    /// Continuation target / protected-range bound (byte offset).
    pub end: usize,
    /// Operand-stack depth when the record was pushed; unwinding drains the
    /// stack back to this watermark.
    pub stack_depth: usize,
    pub has_lex_env: bool,
    pub close_iterator: bool,
}

impl ContextRecord {
    pub fn new(kind: ContextKind, end: usize, stack_depth: usize) -> Self {
        Self {
            kind,
            end,
            stack_depth,
            has_lex_env: false,
            close_iterator: false,
        }
    }
}

/// What the unwinder is propagating.
#[derive(Debug)]
pub enum Pending {
    Throw(Value),
    Return(Value),
    Jump(usize),
}

/// Outcome of a finally search.
#[derive(Debug)]
pub enum Search {
    /// A catch handler takes the exception; resume at `ip` after pushing it.
    EnterCatch { ip: usize, exception: Value },
    /// A finally body runs first; its record parked the continuation.
    EnterFinally { ip: usize },
    /// A jump target inside the innermost live context; plain jump.
    Plain { target: usize },
    /// Every context was exited; the pending action leaves the frame.
    Propagate(Pending),
}

/// A decoded `CATCH`/`FINALLY` handler opcode.
struct Handler {
    body: usize,
    end: usize,
}

fn decode_handler(frame: &Frame, at: usize, family: Opcode) -> Option<Handler> {
    let op = frame.peek_byte(at)?;
    let base = family as u8;
    if !(base..base + 3).contains(&op) {
        return None;
    }
    let width = usize::from(op - base) + 1;
    let mut offset = 0usize;
    for i in 0..width {
        offset = (offset << 8) | usize::from(frame.peek_byte(at + 1 + i)?);
    }
    Some(Handler {
        body: at + 1 + width,
        end: at + offset,
    })
}

/// The `FINALLY` handler protecting a try-ish record, if any. A `CATCH`
/// handler may itself be followed by a finally at its end offset.
fn finally_of(frame: &Frame, record: &ContextRecord) -> Option<Handler> {
    let probe = match &record.kind {
        ContextKind::Try { handler } => {
            if let Some(finally) = decode_handler(frame, *handler, Opcode::Finally) {
                return Some(finally);
            }
            decode_handler(frame, *handler, Opcode::Catch)?.end
        }
        ContextKind::Catch => record.end,
        _ => return None,
    };
    decode_handler(frame, probe, Opcode::Finally)
}

/// Releases one context record's resources: wrapped lexical environments,
/// iterators flagged for closing, snapshot buffers. Secondary exceptions
/// raised while closing an iterator are swallowed, as aborts must make
/// progress.
pub fn context_abort(vm: &mut Vm, frame: &mut Frame, record: ContextRecord) {
    frame.stack.truncate(record.stack_depth);
    if record.has_lex_env {
        pop_lex_env(frame);
    }
    if let ContextKind::ForOf { iterator, .. } = &record.kind {
        if record.close_iterator {
            if let Err(e) = crate::iterator::iterator_close(vm, iterator) {
                kestrel_log::debug!("swallowed exception while closing iterator: {:?}", e);
            }
        }
    }
}

pub fn pop_lex_env(frame: &mut Frame) {
    let outer = frame
        .lex_env
        .outer()
        .expect("context-wrapped environment has an outer");
    frame.lex_env = outer;
}

/// Walks the context stack looking for a handler for `pending`, aborting
/// every context it exits on the way down.
///
/// Throws match `TRY -> CATCH` conversions or `FINALLY_THROW`; returns match
/// `FINALLY_RETURN`; jumps stop at the first record whose protected range
/// contains the target and convert intervening finallys to `FINALLY_JUMP`.
pub fn find_finally(vm: &mut Vm, frame: &mut Frame, pending: Pending) -> Search {
    while let Some(mut record) = frame.contexts.pop() {
        // A jump landing inside the innermost live context needs no unwinding.
        if let Pending::Jump(target) = pending {
            if target < record.end {
                frame.contexts.push(record);
                return Search::Plain { target };
            }
        }

        if matches!(record.kind, ContextKind::Try { .. } | ContextKind::Catch) {
            // A throw prefers the catch handler when one guards the try body.
            if let (Pending::Throw(exception), ContextKind::Try { handler }) = (&pending, &record.kind) {
                if let Some(catch) = decode_handler(frame, *handler, Opcode::Catch) {
                    let exception = exception.clone();
                    frame.stack.truncate(record.stack_depth);
                    if record.has_lex_env {
                        pop_lex_env(frame);
                        record.has_lex_env = false;
                    }
                    record.kind = ContextKind::Catch;
                    record.end = catch.end;
                    frame.contexts.push(record);
                    return Search::EnterCatch {
                        ip: catch.body,
                        exception,
                    };
                }
            }

            if let Some(finally) = finally_of(frame, &record) {
                frame.stack.truncate(record.stack_depth);
                if record.has_lex_env {
                    pop_lex_env(frame);
                    record.has_lex_env = false;
                }
                record.end = finally.end;
                record.kind = match pending {
                    Pending::Throw(exception) => ContextKind::FinallyThrow { exception },
                    Pending::Return(value) => ContextKind::FinallyReturn { value },
                    Pending::Jump(target) => ContextKind::FinallyJump { target },
                };
                frame.contexts.push(record);
                return Search::EnterFinally { ip: finally.body };
            }
        }

        // No handler here: the context is exited and released. An active
        // finally's parked continuation is discarded (inner action shadows).
        context_abort(vm, frame, record);
    }
    Search::Propagate(pending)
}
