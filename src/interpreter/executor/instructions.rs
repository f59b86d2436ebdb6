//! Instruction semantics
//!
//! `execute()` runs one instruction against the machine. The calling frame's
//! instruction pointer has already been advanced. Failures are reported as a
//! [`Fault`], which the loop tags with the procedure and instruction index.

use tracing::{debug, info};

use super::types::{ByteCode, Frame, ItemQueue, IteratorItem, REGISTER};
use super::vm::{Machine, VmError};
use crate::interpreter::ast::{LlmProcedure, Question};
use crate::interpreter::text::normalize;
use crate::llm::{Inputs, ModelError};
use crate::prompter::{PendingQuestion, PromptError};
use crate::sql::QueryError;

/* ===================== Faults ===================== */

/// An instruction failure, before it is tied to a location.
#[derive(Debug)]
pub(crate) enum Fault {
    UnknownProcedure(String),
    JumpOutOfRange(isize),
    NoIterator,
    UnmatchedBreak,
    Query(QueryError),
    Model(ModelError),
    Prompt(PromptError),
}

impl Fault {
    pub(crate) fn at(self, procedure: String, index: usize) -> VmError {
        match self {
            Fault::UnknownProcedure(name) => VmError::UnknownProcedure {
                procedure,
                index,
                name,
            },
            Fault::JumpOutOfRange(target) => VmError::JumpOutOfRange {
                procedure,
                index,
                target,
            },
            Fault::NoIterator => VmError::NoIterator { procedure, index },
            Fault::UnmatchedBreak => VmError::UnmatchedBreak { procedure, index },
            Fault::Query(source) => VmError::Query {
                procedure,
                index,
                source,
            },
            Fault::Model(source) => VmError::Model {
                procedure,
                index,
                source,
            },
            Fault::Prompt(source) => VmError::Prompt {
                procedure,
                index,
                source,
            },
        }
    }
}

/* ===================== Dispatch ===================== */

pub(crate) fn execute(machine: &mut Machine, code: &[ByteCode], index: usize) -> Result<(), Fault> {
    match &code[index] {
        ByteCode::Call { name } => call(machine, name),
        ByteCode::Jump { offset } => jump(machine, code.len(), *offset),
        ByteCode::JumpIfIteratorEmpty { offset } => {
            let queue = machine.iterators.last().ok_or(Fault::NoIterator)?;
            if queue.is_empty() {
                machine.iterators.pop();
                jump(machine, code.len(), *offset)?;
            }
            Ok(())
        }
        ByteCode::JumpIfNoMatch { offset, label } => {
            if normalize(&machine.get_var(REGISTER)) != *label {
                jump(machine, code.len(), *offset)?;
            }
            Ok(())
        }
        ByteCode::PushNextItem => next_item(machine),
        ByteCode::PushSqlIterator { query, read_only } => {
            sql_iterator(machine, query.as_deref(), *read_only)
        }
        ByteCode::PushLineIterator => {
            let text = machine.get_var(REGISTER);
            machine.iterators.push(split_items(&text, "\n"));
            Ok(())
        }
        ByteCode::PushParagraphIterator => {
            let text = machine.get_var(REGISTER);
            machine.iterators.push(split_items(&text, "\n\n"));
            Ok(())
        }
        ByteCode::EndLoop => Ok(()),
        ByteCode::Break => break_loop(machine, code),
        ByteCode::SetVariable { name } => {
            let value = machine.get_var(REGISTER);
            machine.set_var(name, value);
            Ok(())
        }
        ByteCode::FetchVariable { name } => {
            let value = machine.get_var(name);
            machine.set_var(REGISTER, value);
            Ok(())
        }
        ByteCode::FormatString { template } => {
            let text = template.render(|name| machine.get_var(name));
            machine.set_var(REGISTER, text);
            Ok(())
        }
        ByteCode::Ask { questions } => ask(machine, questions),
        ByteCode::CallModel { procedure } => call_model(machine, procedure),
    }
}

/* ===================== Control Flow ===================== */

fn call(machine: &mut Machine, name: &str) -> Result<(), Fault> {
    if machine.program.get(name).is_none() {
        return Err(Fault::UnknownProcedure(name.to_string()));
    }
    machine.environment.push();
    machine.calls.push(Frame::new(name));
    debug!(procedure = name, depth = machine.calls.len(), "call");
    Ok(())
}

/// Move the current frame's instruction pointer by `offset`. Landing exactly
/// on `len` is allowed and returns from the procedure.
fn jump(machine: &mut Machine, len: usize, offset: isize) -> Result<(), Fault> {
    let Some(frame) = machine.calls.last_mut() else {
        return Ok(());
    };
    let target = frame.ip as isize + offset;
    if target < 0 || target > len as isize {
        return Err(Fault::JumpOutOfRange(target));
    }
    frame.ip = target as usize;
    Ok(())
}

/// Leave the innermost loop: drop its iterator and continue at the loop's
/// end marker. Loops opened after the `break` are skipped over with their
/// own markers.
fn break_loop(machine: &mut Machine, code: &[ByteCode]) -> Result<(), Fault> {
    let frame = machine.calls.last_mut().ok_or(Fault::UnmatchedBreak)?;
    let mut depth = 0usize;
    let mut marker = None;
    for (idx, instruction) in code.iter().enumerate().skip(frame.ip) {
        if instruction.starts_loop() {
            depth += 1;
        } else if matches!(instruction, ByteCode::EndLoop) {
            if depth == 0 {
                marker = Some(idx);
                break;
            }
            depth -= 1;
        }
    }
    let marker = marker.ok_or(Fault::UnmatchedBreak)?;
    frame.ip = marker;
    machine.iterators.pop().ok_or(Fault::NoIterator)?;
    Ok(())
}

/* ===================== Iterators ===================== */

fn next_item(machine: &mut Machine) -> Result<(), Fault> {
    let item = machine
        .iterators
        .last_mut()
        .and_then(|queue| queue.pop_front())
        .ok_or(Fault::NoIterator)?;
    match item {
        IteratorItem::Text(text) => machine.set_var(REGISTER, text),
        IteratorItem::Row(row) => {
            for (column, value) in row {
                machine.set_var(&column, value);
            }
        }
    }
    Ok(())
}

/// Split on `separator`, trimming every piece and dropping the blank ones.
fn split_items(text: &str, separator: &str) -> ItemQueue {
    text.split(separator)
        .map(str::trim)
        .filter(|piece| !piece.is_empty())
        .map(|piece| IteratorItem::Text(piece.to_string()))
        .collect()
}

fn sql_iterator(machine: &mut Machine, query: Option<&str>, read_only: bool) -> Result<(), Fault> {
    let query = match query {
        Some(query) => query.to_string(),
        None => machine.get_var(REGISTER),
    };
    let environment = &machine.environment;
    let mut lookup = |name: &str| environment.get(name).unwrap_or_default().to_string();
    let rows = machine
        .collaborators
        .queries
        .execute(&query, read_only, &mut lookup)
        .map_err(Fault::Query)?;
    debug!(rows = rows.len(), read_only, "query returned");
    machine
        .iterators
        .push(rows.into_iter().map(IteratorItem::Row).collect());
    Ok(())
}

/* ===================== Collaborators ===================== */

fn ask(machine: &mut Machine, questions: &[Question]) -> Result<(), Fault> {
    let pending: Vec<PendingQuestion> = questions
        .iter()
        .map(|question| PendingQuestion {
            variable: question.variable.clone(),
            text: question.text.clone(),
            default: machine.get_var(&question.variable).trim().to_string(),
        })
        .collect();
    let answers = machine
        .collaborators
        .prompter
        .ask(&pending)
        .map_err(Fault::Prompt)?;
    if answers.len() != pending.len() {
        return Err(Fault::Prompt(PromptError::AnswerCount {
            expected: pending.len(),
            got: answers.len(),
        }));
    }

    for (question, answer) in pending.into_iter().zip(answers) {
        let answer = answer.trim();
        let value = if answer.is_empty() {
            question.default
        } else {
            answer.to_string()
        };
        machine.set_var(&question.variable, value);
    }
    Ok(())
}

fn call_model(machine: &mut Machine, procedure: &LlmProcedure) -> Result<(), Fault> {
    let inputs: Inputs = procedure
        .prompt
        .names()
        .into_iter()
        .map(|name| (name.to_string(), machine.get_var(name)))
        .collect();
    info!(procedure = %procedure.name, "calling model");
    let response = machine
        .collaborators
        .models
        .run(procedure, &inputs)
        .map_err(Fault::Model)?;
    machine.set_var(REGISTER, response);
    Ok(())
}
