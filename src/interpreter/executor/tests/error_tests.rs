//! Tests for runtime errors

use std::sync::Arc;

use super::super::*;
use super::helpers::{build_machine, run_with_input};
use crate::interpreter::compiler::CompiledProgram;
use crate::prompter::{PendingQuestion, PromptError, Prompter};
use crate::sql::QueryError;

#[test]
fn test_unknown_procedure_fails_when_reached() {
    let mut run = build_machine("# main\n\n\"a\"\nmissing\n\"b\"\n", &[]);
    let err = run.machine.run(None).unwrap_err();
    match err {
        VmError::UnknownProcedure {
            procedure,
            index,
            name,
        } => {
            assert_eq!(procedure, "main");
            assert_eq!(index, 1);
            assert_eq!(name, "missing");
        }
        other => panic!("Expected unknown procedure, got {:?}", other),
    }
    assert_eq!(run.machine.get_var(REGISTER), "a");
}

#[test]
fn test_unknown_procedure_in_untaken_branch_is_fine() {
    let source = "# main

case {
    \"never\" {
        missing
    }
}
\"ok\"
";
    let mut run = build_machine(source, &[]);
    assert_eq!(run_with_input(&mut run.machine, "x"), "ok");
}

#[test]
fn test_unknown_start_procedure() {
    let mut run = build_machine("# main\n\n-> x\n", &[]);
    assert!(matches!(
        run.machine.run(Some("nope")),
        Err(VmError::UnknownStart(name)) if name == "nope"
    ));
}

#[test]
fn test_empty_program() {
    let mut run = build_machine("# main\n\n-> x\n", &[]);
    run.machine.program = CompiledProgram::default();
    assert!(matches!(run.machine.run(None), Err(VmError::EmptyProgram)));
}

#[test]
fn test_query_without_database() {
    let mut run = build_machine("# main\n\nSQL\"select 1\"\n", &[]);
    let err = run.machine.run(None).unwrap_err();
    assert!(matches!(
        err,
        VmError::Query {
            source: QueryError::Unavailable,
            ..
        }
    ));
    assert_eq!(err.to_string(), "main[0]: no query database is available");
}

/// Answers only the first question of every batch.
struct FirstOnlyPrompter;

impl Prompter for FirstOnlyPrompter {
    fn ask(&mut self, questions: &[PendingQuestion]) -> Result<Vec<String>, PromptError> {
        Ok(questions.iter().take(1).map(|_| "first".to_string()).collect())
    }
}

#[test]
fn test_missing_answers_are_an_error() {
    let source = "# main

ask {
    \"Name\" -> name
    \"Age\" -> age
}
";
    let mut run = build_machine(source, &[]);
    run.machine.collaborators.prompter = Box::new(FirstOnlyPrompter);
    let err = run.machine.run(None).unwrap_err();
    assert!(matches!(
        err,
        VmError::Prompt {
            index: 0,
            source: PromptError::AnswerCount {
                expected: 2,
                got: 1
            },
            ..
        }
    ));
    assert_eq!(run.machine.get_var("name"), "");
}

fn hand_written(code: Vec<ByteCode>) -> CompiledProgram {
    let mut program = CompiledProgram::default();
    program.order.push("main".into());
    program.code.insert("main".into(), Arc::from(code));
    program
}

#[test]
fn test_jump_out_of_range() {
    let mut run = build_machine("# main\n\n-> x\n", &[]);
    run.machine.program = hand_written(vec![ByteCode::Jump { offset: 5 }]);
    match run.machine.run(None).unwrap_err() {
        VmError::JumpOutOfRange { index, target, .. } => {
            assert_eq!(index, 0);
            assert_eq!(target, 6);
        }
        other => panic!("Expected jump error, got {:?}", other),
    }
}

#[test]
fn test_next_item_without_iterator() {
    let mut run = build_machine("# main\n\n-> x\n", &[]);
    run.machine.program = hand_written(vec![ByteCode::PushNextItem]);
    assert!(matches!(
        run.machine.run(None),
        Err(VmError::NoIterator { index: 0, .. })
    ));
}

#[test]
fn test_break_without_loop_marker() {
    let mut run = build_machine("# main\n\n-> x\n", &[]);
    run.machine.program = hand_written(vec![ByteCode::PushLineIterator, ByteCode::Break]);
    assert!(matches!(
        run.machine.run(None),
        Err(VmError::UnmatchedBreak { index: 1, .. })
    ));
}

#[test]
fn test_jump_to_end_returns() {
    let mut run = build_machine("# main\n\n-> x\n", &[]);
    run.machine.program = hand_written(vec![
        ByteCode::Jump { offset: 1 },
        ByteCode::FetchVariable {
            name: "unset".into(),
        },
    ]);
    assert_eq!(run_with_input(&mut run.machine, "kept"), "kept");
}
