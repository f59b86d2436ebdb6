//! Bytecode instructions
//!
//! A compiled procedure is a flat `[ByteCode]`. Jump offsets are relative to
//! the instruction pointer *after* it has been advanced past the jump, so an
//! instruction at index `i` with offset `o` continues at `i + 1 + o`.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::interpreter::ast::{LlmProcedure, Question, Template};
use crate::interpreter::text::escape;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ByteCode {
    /// Push a fresh environment layer and a frame for `name`
    Call { name: String },
    Jump { offset: isize },
    /// Pop the innermost iterator and jump when it has no items left
    JumpIfIteratorEmpty { offset: isize },
    /// Jump unless the normalized register equals `label`
    JumpIfNoMatch { offset: isize, label: String },
    PushNextItem,
    PushSqlIterator { query: Option<String>, read_only: bool },
    PushLineIterator,
    PushParagraphIterator,
    /// No-op; marks the end of a loop for `Break`
    EndLoop,
    Break,
    SetVariable { name: String },
    FetchVariable { name: String },
    FormatString { template: Template },
    Ask { questions: Vec<Question> },
    CallModel { procedure: Box<LlmProcedure> },
}

impl ByteCode {
    /// True for the instructions that open a loop.
    pub fn starts_loop(&self) -> bool {
        matches!(
            self,
            ByteCode::PushSqlIterator { .. } | ByteCode::PushLineIterator | ByteCode::PushParagraphIterator
        )
    }
}

impl fmt::Display for ByteCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ByteCode::Call { name } => write!(f, "call {}", name),
            ByteCode::Jump { offset } => write!(f, "jump {:+}", offset),
            ByteCode::JumpIfIteratorEmpty { offset } => write!(f, "jump_if_empty {:+}", offset),
            ByteCode::JumpIfNoMatch { offset, label } => {
                write!(f, "jump_if_no_match {:+} \"{}\"", offset, escape(label))
            }
            ByteCode::PushNextItem => write!(f, "next_item"),
            ByteCode::PushSqlIterator { query, read_only } => {
                write!(f, "{}", if *read_only { "sql_iter" } else { "sql_iter!" })?;
                match query {
                    Some(query) => write!(f, " \"{}\"", escape(query)),
                    None => write!(f, " <prompt>"),
                }
            }
            ByteCode::PushLineIterator => write!(f, "line_iter"),
            ByteCode::PushParagraphIterator => write!(f, "para_iter"),
            ByteCode::EndLoop => write!(f, "end_loop"),
            ByteCode::Break => write!(f, "break"),
            ByteCode::SetVariable { name } => write!(f, "store {}", name),
            ByteCode::FetchVariable { name } => write!(f, "fetch {}", name),
            ByteCode::FormatString { template } => {
                write!(f, "format \"{}\"", escape(template.source()))
            }
            ByteCode::Ask { questions } => {
                let vars: Vec<&str> = questions.iter().map(|q| q.variable.as_str()).collect();
                write!(f, "ask {}", vars.join(", "))
            }
            ByteCode::CallModel { procedure } => {
                write!(f, "model {} ({})", procedure.name, procedure.model)
            }
        }
    }
}

/// Render a compiled procedure as one numbered instruction per line.
pub fn disassemble(code: &[ByteCode]) -> String {
    let mut out = String::new();
    for (idx, instruction) in code.iter().enumerate() {
        out.push_str(&format!("{:4}  {}\n", idx, instruction));
    }
    out
}
