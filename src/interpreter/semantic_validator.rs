//! Semantic validation for loaded programs
//!
//! Checks that need the whole procedure table and so cannot be expressed in
//! the grammar. Unresolved calls are reported here ahead of time; the VM
//! still raises them when (and only when) such a call is reached.

use std::collections::{BTreeSet, HashSet};
use thiserror::Error;

use super::ast::{Block, LlmProcedure, Message, Procedure, ProcedureBody, Role, Statement, Template};

/// Model used for generated stub procedures.
pub const STUB_MODEL: &str = "llama3.2";

/* ===================== Error Types ===================== */

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("undefined procedures: {}", .names.iter().cloned().collect::<Vec<_>>().join(", "))]
    UndefinedProcedures { names: BTreeSet<String> },
}

pub type ValidationResult<T> = Result<T, ValidationError>;

/* ===================== Public API ===================== */

/// Validate a program. Fails with every undefined procedure name at once.
pub fn validate_program(procedures: &[Procedure]) -> ValidationResult<()> {
    let names = undefined_procedures(procedures);
    if names.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::UndefinedProcedures { names })
    }
}

/// Names called somewhere in the program but never declared, sorted.
pub fn undefined_procedures(procedures: &[Procedure]) -> BTreeSet<String> {
    let declared: HashSet<&str> = procedures.iter().map(|p| p.name.as_str()).collect();
    let mut called = BTreeSet::new();
    for procedure in procedures {
        if let ProcedureBody::Statements(block) = &procedure.body {
            collect_calls(block, &mut called);
        }
    }
    called.retain(|name| !declared.contains(name.as_str()));
    called
}

/// A placeholder LLM procedure that forwards the register to the model,
/// with every section laid out for editing.
pub fn stub_procedure(name: &str) -> Procedure {
    let placeholder = |role| Message {
        role,
        text: "...".to_string(),
    };
    Procedure {
        name: name.to_string(),
        body: ProcedureBody::Llm(LlmProcedure {
            name: name.to_string(),
            model: STUB_MODEL.to_string(),
            system: "...\n\n".to_string(),
            prompt: Template::parse("{prompt}\n\n"),
            history: vec![placeholder(Role::User), placeholder(Role::Assistant)],
        }),
    }
}

fn collect_calls(block: &Block, out: &mut BTreeSet<String>) {
    for statement in &block.statements {
        match statement {
            Statement::Call { name } => {
                out.insert(name.clone());
            }
            Statement::ForEachLine { body } | Statement::ForEachParagraph { body } => {
                collect_calls(body, out)
            }
            Statement::Sql(sql) => {
                if let Some(body) = &sql.body {
                    collect_calls(body, out);
                }
            }
            Statement::Branch { cases, default } => {
                for case in cases {
                    collect_calls(&case.body, out);
                }
                if let Some(default) = default {
                    collect_calls(default, out);
                }
            }
            Statement::SetVariable { .. }
            | Statement::FetchVariable { .. }
            | Statement::FormatString { .. }
            | Statement::AskQuestions { .. }
            | Statement::Break => {}
        }
    }
}
