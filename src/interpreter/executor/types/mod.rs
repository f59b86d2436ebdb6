//! Type definitions for the executor
//!
//! - Bytecode instructions (ByteCode)
//! - Machine stacks (Environment, Frame, IteratorItem, Snapshot)

pub mod bytecode;
pub mod stacks;

pub use bytecode::{disassemble, ByteCode};
pub use stacks::{
    Environment, Frame, ItemQueue, IteratorItem, Scope, Snapshot, OUTPUT_PREFIX, REGISTER,
};
