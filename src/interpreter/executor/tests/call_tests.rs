//! Tests for procedure calls and environment merging

use super::super::*;
use super::helpers::{build_machine, run_with_input};

#[test]
fn test_call_merges_register_and_prefixes_locals() {
    let source = "# main

-> keep
helper
-> result
\"{result}/{out.local}/{keep}\"

# helper

\"inner\"
-> local
\"{prompt}!\"
";
    let mut run = build_machine(source, &[]);
    assert_eq!(
        run_with_input(&mut run.machine, "outer"),
        "inner!/inner/outer"
    );

    let env = run.machine.environment();
    assert_eq!(env.depth(), 1);
    assert_eq!(env.get("local"), None);
    assert_eq!(env.get("out.local"), Some("inner"));
}

#[test]
fn test_callee_reads_caller_variables() {
    let source = "# main

-> name
greet

# greet

\"hello {name}\"
";
    let mut run = build_machine(source, &[]);
    assert_eq!(run_with_input(&mut run.machine, "ada"), "hello ada");
}

#[test]
fn test_recursion_uses_explicit_frames() {
    let source = "# main

\"{n}x\"
-> n
case {
    \"xxx\" {
        \"done\"
    }
} {
    main
}
";
    let mut run = build_machine(source, &[]);
    let machine = &mut run.machine;
    machine.start(None).unwrap();

    let mut deepest = 0;
    while step(machine).unwrap() == Step::Continue {
        deepest = deepest.max(machine.calls().len());
    }
    assert_eq!(deepest, 3);
    assert_eq!(machine.get_var(REGISTER), "done");
    assert_eq!(machine.environment().depth(), 1);
}

#[test]
fn test_start_at_named_procedure() {
    let source = "# main

\"from main\"

# other

\"from other\"
";
    let mut run = build_machine(source, &[]);
    assert_eq!(run.machine.run(Some("other")).unwrap(), "from other");
}

#[test]
fn test_step_by_step_matches_run() {
    let source = "# main

-> x
\"<{x}>\"
";
    let mut run = build_machine(source, &[]);
    let machine = &mut run.machine;
    machine.set_var(REGISTER, "a");
    machine.start(None).unwrap();

    // store, format, then the frame return
    assert_eq!(step(machine).unwrap(), Step::Continue);
    assert_eq!(machine.calls()[0].ip, 1);
    assert_eq!(step(machine).unwrap(), Step::Continue);
    assert_eq!(machine.get_var(REGISTER), "<a>");
    assert_eq!(step(machine).unwrap(), Step::Done);
    assert!(machine.is_done());
    assert_eq!(step(machine).unwrap(), Step::Done);
}
