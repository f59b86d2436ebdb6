//! Procedure-language interpreter
//!
//! Flow: text → parse tree → [`ast::Procedure`]s → per-procedure bytecode →
//! [`executor::Machine`] steps until the call stack drains.

pub mod ast;
pub mod compiler;
pub mod executor;
pub mod parser;
pub mod semantic_validator;
pub mod text;

pub use ast::{LlmProcedure, Procedure, ProcedureBody, Statement, Template};
pub use compiler::{compile_program, CompileError, CompiledProgram};
pub use executor::{run_until_done, step, Collaborators, Machine, Step, VmError};
pub use parser::{parse_program, ParseError};
pub use semantic_validator::{validate_program, ValidationError};

use std::collections::{BTreeSet, HashSet};
use thiserror::Error;
use tracing::debug;

/* ===================== Error Types ===================== */

#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("procedure '{0}' is defined more than once")]
    DuplicateProcedure(String),
    #[error("program defines no procedures")]
    NoProcedures,
}

/* ===================== Program ===================== */

/// A loaded program: procedures in declaration order, names unique.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    procedures: Vec<Procedure>,
}

impl Program {
    /// Parse program text and check procedure names.
    pub fn parse(source: &str) -> Result<Self, LoadError> {
        Self::from_procedures(parse_program(source)?)
    }

    pub fn from_procedures(procedures: Vec<Procedure>) -> Result<Self, LoadError> {
        if procedures.is_empty() {
            return Err(LoadError::NoProcedures);
        }
        let mut seen = HashSet::new();
        for procedure in &procedures {
            if !seen.insert(procedure.name.as_str()) {
                return Err(LoadError::DuplicateProcedure(procedure.name.clone()));
            }
        }
        debug!(procedures = procedures.len(), "loaded program");
        Ok(Program { procedures })
    }

    pub fn procedures(&self) -> &[Procedure] {
        &self.procedures
    }

    pub fn get(&self, name: &str) -> Option<&Procedure> {
        self.procedures.iter().find(|p| p.name == name)
    }

    /// Called but never defined, sorted.
    pub fn undefined_procedures(&self) -> BTreeSet<String> {
        semantic_validator::undefined_procedures(&self.procedures)
    }

    /// Fails listing every undefined procedure.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_program(&self.procedures)
    }

    pub fn compile(&self) -> Result<CompiledProgram, CompileError> {
        compile_program(&self.procedures)
    }
}
