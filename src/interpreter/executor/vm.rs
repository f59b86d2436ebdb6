//! Virtual Machine state
//!
//! The machine holds all execution state:
//! - environment: scopes of variables, outermost first
//! - calls: active procedures and their instruction pointers
//! - iterators: pending items of every active loop, innermost last
//!
//! plus the read-only compiled program and the collaborators that talk to
//! the outside world.

use thiserror::Error;
use tracing::{debug, info};

use super::types::{Environment, Frame, ItemQueue, Snapshot, REGISTER};
use crate::interpreter::compiler::CompiledProgram;
use crate::llm::{ModelError, ModelRunner};
use crate::prompter::{PromptError, Prompter};
use crate::sql::{QueryError, QueryExecutor};

/* ===================== Error Types ===================== */

#[derive(Debug, Error)]
pub enum VmError {
    #[error("program has no procedures")]
    EmptyProgram,
    #[error("no procedure named '{0}'")]
    UnknownStart(String),
    #[error("{procedure}[{index}]: call to undefined procedure '{name}'")]
    UnknownProcedure {
        procedure: String,
        index: usize,
        name: String,
    },
    #[error("{procedure}[{index}]: jump target {target} is outside the procedure")]
    JumpOutOfRange {
        procedure: String,
        index: usize,
        target: isize,
    },
    #[error("{procedure}[{index}]: tried to pop the outermost environment")]
    EnvironmentUnderflow { procedure: String, index: usize },
    #[error("{procedure}[{index}]: no active loop iterator")]
    NoIterator { procedure: String, index: usize },
    #[error("{procedure}[{index}]: break found no end of loop")]
    UnmatchedBreak { procedure: String, index: usize },
    #[error("{procedure}[{index}]: {source}")]
    Query {
        procedure: String,
        index: usize,
        #[source]
        source: QueryError,
    },
    #[error("{procedure}[{index}]: {source}")]
    Model {
        procedure: String,
        index: usize,
        #[source]
        source: ModelError,
    },
    #[error("{procedure}[{index}]: {source}")]
    Prompt {
        procedure: String,
        index: usize,
        #[source]
        source: PromptError,
    },
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
}

/* ===================== Collaborators ===================== */

/// Handles to the outside world.
pub struct Collaborators {
    pub queries: Box<dyn QueryExecutor>,
    pub models: Box<dyn ModelRunner>,
    pub prompter: Box<dyn Prompter>,
}

/* ===================== Machine ===================== */

pub struct Machine {
    pub(crate) program: CompiledProgram,
    pub(crate) environment: Environment,
    pub(crate) calls: Vec<Frame>,
    pub(crate) iterators: Vec<ItemQueue>,
    pub(crate) collaborators: Collaborators,
}

impl Machine {
    pub fn new(program: CompiledProgram, collaborators: Collaborators) -> Self {
        Machine {
            program,
            environment: Environment::new(),
            calls: Vec::new(),
            iterators: Vec::new(),
            collaborators,
        }
    }

    /// Read a variable; unset names read as the empty string.
    pub fn get_var(&self, name: &str) -> String {
        let value = self.environment.get(name).unwrap_or_default().to_string();
        debug!(name, value = %value, "read variable");
        value
    }

    /// Write a variable in the innermost scope.
    pub fn set_var(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        debug!(name, value = %value, "write variable");
        self.environment.set(name, value);
    }

    /// Begin a run at `procedure`, or at the first declared procedure.
    pub fn start(&mut self, procedure: Option<&str>) -> Result<(), VmError> {
        let name = match procedure {
            Some(name) if self.program.get(name).is_some() => name.to_string(),
            Some(name) => return Err(VmError::UnknownStart(name.to_string())),
            None => self.program.first().ok_or(VmError::EmptyProgram)?.to_string(),
        };
        debug!(procedure = %name, "starting run");
        self.calls = vec![Frame::new(name)];
        self.iterators.clear();
        Ok(())
    }

    /// Run to completion and return the final register value.
    pub fn run(&mut self, procedure: Option<&str>) -> Result<String, VmError> {
        self.start(procedure)?;
        info!(procedure = ?procedure, "run started");
        super::exec_loop::run_until_done(self)?;
        info!("run finished");
        Ok(self.get_var(REGISTER))
    }

    /// Execute a single instruction. See [`super::exec_loop::step`].
    pub fn step(&mut self) -> Result<Step, VmError> {
        super::exec_loop::step(self)
    }

    pub fn is_done(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    pub fn calls(&self) -> &[Frame] {
        &self.calls
    }

    pub fn iterators(&self) -> &[ItemQueue] {
        &self.iterators
    }

    /// Copy of the three stacks. Taken between steps it fully describes
    /// progress through the run.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            environment: self.environment.clone(),
            calls: self.calls.clone(),
            iterators: self.iterators.clone(),
        }
    }

    /// Replace the machine stacks with a snapshot taken from a machine
    /// running the same program.
    pub fn restore(&mut self, snapshot: Snapshot) -> Result<(), VmError> {
        if snapshot.environment.depth() == 0 {
            return Err(VmError::InvalidSnapshot("environment has no scopes".into()));
        }
        for frame in &snapshot.calls {
            let Some(code) = self.program.get(&frame.procedure) else {
                return Err(VmError::InvalidSnapshot(format!(
                    "unknown procedure '{}'",
                    frame.procedure
                )));
            };
            if frame.ip > code.len() {
                return Err(VmError::InvalidSnapshot(format!(
                    "instruction pointer {} past the end of '{}'",
                    frame.ip, frame.procedure
                )));
            }
        }
        self.environment = snapshot.environment;
        self.calls = snapshot.calls;
        self.iterators = snapshot.iterators;
        Ok(())
    }
}

/* ===================== Step Result ===================== */

/// Result of executing one step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Continue to next step
    Continue,
    /// Execution complete
    Done,
}
