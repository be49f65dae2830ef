//! Compiled-code artifacts shared between the compiler side and the VM:
//! code units, the opcode set, the decode table and the bytecode builder.

pub mod builder;
pub mod code;
pub mod instruction;

pub use code::{CodeFlags, CodeUnit, Literal};
pub use instruction::{DecodeEntry, EffectiveOpcode, ExtOpcode, OpGroup, Opcode, OperandShape};
