//! Test helpers for executor tests
//!
//! Fake collaborators and a shortcut from source text to a ready machine.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::db::Database;
use crate::interpreter::ast::LlmProcedure;
use crate::interpreter::compiler::compile_program;
use crate::interpreter::executor::{Collaborators, Machine, REGISTER};
use crate::interpreter::parser::parse_program;
use crate::llm::{CachingRunner, Inputs, MemoryResponseStore, ModelBackend, ModelError, ModelRunner};
use crate::prompter::{PendingQuestion, PromptError, Prompter};
use crate::sql::{NoDatabase, QueryExecutor, SqliteExecutor};

/// Everything the fakes saw during a run.
#[derive(Debug, Default)]
pub struct Log {
    pub model_calls: Vec<(String, Inputs)>,
    pub generated: Vec<String>,
    pub questions: Vec<PendingQuestion>,
}

pub type SharedLog = Rc<RefCell<Log>>;

/* ===================== Fake Collaborators ===================== */

/// Model runner that answers `name(input=value, ...)` without a cache.
pub struct FakeModels {
    pub log: SharedLog,
}

impl ModelRunner for FakeModels {
    fn run(&mut self, procedure: &LlmProcedure, inputs: &Inputs) -> Result<String, ModelError> {
        self.log
            .borrow_mut()
            .model_calls
            .push((procedure.name.clone(), inputs.clone()));
        let args: Vec<String> = inputs.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        Ok(format!("{}({})", procedure.name, args.join(", ")))
    }
}

/// Backend for the real caching runner; replies with the prompt reversed.
pub struct ReversingBackend {
    pub log: SharedLog,
}

impl ModelBackend for ReversingBackend {
    fn check(&mut self) -> Result<(), ModelError> {
        Ok(())
    }

    fn ensure_model(&mut self, _model_file_id: &str, _modelfile: &str) -> Result<(), ModelError> {
        Ok(())
    }

    fn generate(&mut self, _model_file_id: &str, prompt: &str) -> Result<String, ModelError> {
        self.log.borrow_mut().generated.push(prompt.to_string());
        Ok(prompt.chars().rev().collect())
    }
}

/// Prompter that replays scripted answers and fails once they run out.
pub struct ScriptedPrompter {
    pub answers: VecDeque<String>,
    pub log: SharedLog,
}

impl Prompter for ScriptedPrompter {
    fn ask(&mut self, questions: &[PendingQuestion]) -> Result<Vec<String>, PromptError> {
        let mut answers = Vec::new();
        for question in questions {
            self.log.borrow_mut().questions.push(question.clone());
            match self.answers.pop_front() {
                Some(answer) => answers.push(answer),
                None => {
                    return Err(PromptError::Closed {
                        question: question.text.clone(),
                    })
                }
            }
        }
        Ok(answers)
    }
}

/* ===================== Machine Builders ===================== */

pub struct TestRun {
    pub machine: Machine,
    pub log: SharedLog,
}

/// Parse and compile `source` with fake collaborators: no database, the
/// uncached fake model and the given scripted answers.
pub fn build_machine(source: &str, answers: &[&str]) -> TestRun {
    build_with(source, answers, Box::new(NoDatabase), |log| {
        Box::new(FakeModels { log })
    })
}

/// Like [`build_machine`], with a real in-memory SQLite database prepared
/// by `setup`.
pub fn build_with_database(source: &str, setup: &str) -> TestRun {
    let mut db = Database::in_memory().expect("in-memory database");
    db.execute_script(setup).expect("setup script");
    build_with(source, &[], Box::new(SqliteExecutor::new(db)), |log| {
        Box::new(FakeModels { log })
    })
}

/// Like [`build_machine`], with the caching runner over a memory store.
pub fn build_with_cache(source: &str) -> TestRun {
    build_with(source, &[], Box::new(NoDatabase), |log| {
        Box::new(CachingRunner::new(
            Box::new(ReversingBackend { log }),
            Box::new(MemoryResponseStore::new()),
        ))
    })
}

fn build_with(
    source: &str,
    answers: &[&str],
    queries: Box<dyn QueryExecutor>,
    models: impl FnOnce(SharedLog) -> Box<dyn ModelRunner>,
) -> TestRun {
    let procedures = parse_program(source).expect("Parse program failed");
    let program = compile_program(&procedures).expect("Compile failed");
    let log = SharedLog::default();
    let collaborators = Collaborators {
        queries,
        models: models(Rc::clone(&log)),
        prompter: Box::new(ScriptedPrompter {
            answers: answers.iter().map(|a| a.to_string()).collect(),
            log: Rc::clone(&log),
        }),
    };
    TestRun {
        machine: Machine::new(program, collaborators),
        log,
    }
}

/// Run from the first procedure with `input` in the register.
pub fn run_with_input(machine: &mut Machine, input: &str) -> String {
    machine.set_var(REGISTER, input);
    machine.run(None).expect("Run failed")
}
