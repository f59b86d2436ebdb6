//! Core execution loop
//!
//! `step()` executes exactly one instruction of the innermost frame, or
//! returns from that frame once its instruction pointer runs off the end.
//!
//! ## Function Organization
//! 1. run_until_done() - Top-level driver (calls step repeatedly)
//! 2. step() - Fetch, advance, dispatch
//! 3. return_from_frame() - Frame exit and environment merge

use tracing::debug;

use super::instructions::execute;
use super::vm::{Machine, Step, VmError};

/* ===================== Public API ===================== */

/// Run the machine until the call stack is empty.
pub fn run_until_done(machine: &mut Machine) -> Result<(), VmError> {
    loop {
        match step(machine)? {
            Step::Continue => continue,
            Step::Done => return Ok(()),
        }
    }
}

/// Execute one step of the machine.
///
/// The instruction pointer is advanced before the instruction runs, so
/// jump offsets are relative to the following instruction.
pub fn step(machine: &mut Machine) -> Result<Step, VmError> {
    let Some(frame) = machine.calls.last() else {
        return Ok(Step::Done);
    };
    let procedure = frame.procedure.clone();
    let index = frame.ip;

    let Some(code) = machine.program.get(&procedure).cloned() else {
        return Err(VmError::UnknownProcedure {
            name: procedure.clone(),
            procedure,
            index,
        });
    };

    if index >= code.len() {
        return return_from_frame(machine, procedure, index);
    }

    if let Some(frame) = machine.calls.last_mut() {
        frame.ip += 1;
    }
    execute(machine, &code, index).map_err(|fault| fault.at(procedure, index))?;
    Ok(Step::Continue)
}

/* ===================== Frame Exit ===================== */

fn return_from_frame(machine: &mut Machine, procedure: String, index: usize) -> Result<Step, VmError> {
    // The outermost frame shares the base scope with the caller of run()
    if machine.calls.len() > 1 && !machine.environment.pop() {
        return Err(VmError::EnvironmentUnderflow { procedure, index });
    }
    machine.calls.pop();
    debug!(%procedure, depth = machine.calls.len(), "returned");

    if machine.calls.is_empty() {
        Ok(Step::Done)
    } else {
        Ok(Step::Continue)
    }
}
