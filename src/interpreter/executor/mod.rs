//! # Executor - Stepping Bytecode Machine
//!
//! ## Core Principles
//!
//! 1. **Explicit stacks**: environment scopes, call frames and loop iterators
//!    live in the [`Machine`], never on the Rust call stack
//! 2. **Instruction-level stepping**: `step()` runs one instruction, so a run
//!    can be observed, snapshotted and restored between any two steps
//! 3. **Pluggable collaborators**: queries, models and questions go through
//!    traits, so tests run without a database, a model or a terminal

pub mod exec_loop;
pub mod instructions;
pub mod types;
pub mod vm;

#[cfg(test)]
mod tests;

// Re-export commonly used items
pub use exec_loop::{run_until_done, step};
pub use types::{disassemble, ByteCode, Environment, Frame, IteratorItem, Snapshot, REGISTER};
pub use vm::{Collaborators, Machine, Step, VmError};
