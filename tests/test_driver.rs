use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use irmut::config::{Config, Filter, SandboxKind};
use irmut::driver::{Driver, assemble_mutants};
use irmut::error::EngineError;
use irmut::ir::{BinaryOp, Function, Instruction, Module, Predicate, Program};
use irmut::mutants::{Kill, MutantResult, MutationStatus, classify};
use irmut::operators::OperatorKind;
use irmut::report::{MutationReport, mutation_score};
use irmut::sandbox::{ExecutionResult, ExecutionStatus, NullSandbox, ProcessSandbox, WatchdogSandbox, Work};

fn config() -> Config {
    Config {
        workers: 2,
        sandbox: SandboxKind::Watchdog,
        ..Config::default()
    }
}

/// `double` is reached by the tests, `halve_unused` by none.
fn library() -> Module {
    Module::new(
        "lib",
        vec![
            Function::new("double", 1, vec![Instruction::binary(BinaryOp::Add, 1, 0, 0), Instruction::ret(1)]),
            Function::new(
                "halve_unused",
                1,
                vec![
                    Instruction::constant(1, 2),
                    Instruction::binary(BinaryOp::Div, 2, 0, 1),
                    Instruction::binary(BinaryOp::Add, 3, 2, 2),
                    Instruction::ret(3),
                ],
            ),
        ],
    )
}

/// Calls `double(input)` and asserts the result equals `expected`.
fn double_test(name: &str, input: i64, expected: i64) -> Function {
    Function::new(
        name,
        0,
        vec![
            Instruction::constant(0, input),
            Instruction::call(1, "double", &[0]),
            Instruction::constant(2, expected),
            Instruction::compare(Predicate::Eq, 3, 1, 2),
            Instruction::Assert { cond: 3 },
            Instruction::ret_void(),
        ],
    )
}

fn find<'a>(report: &'a MutationReport, id: &str) -> &'a MutantResult {
    report
        .mutants
        .iter()
        .find(|m| m.id == id)
        .unwrap_or_else(|| panic!("no mutant {id} in {:?}", report.mutants.iter().map(|m| &m.id).collect::<Vec<_>>()))
}

#[test]
fn strong_test_kills_reached_mutant() {
    let program = Program::new(vec![library(), Module::new("tests", vec![double_test("test_double", 3, 6)])]);
    let report = Driver::new(config()).run(&program).unwrap();

    let reached = find(&report, "add_to_sub@lib::double#0");
    assert_eq!(reached.status, MutationStatus::Killed);
    assert_eq!(
        reached.killers,
        vec![Kill {
            test: "test_double".into(),
            status: ExecutionStatus::Failed
        }]
    );
    assert!(reached.diff.contains("- "));
    assert!(reached.diff.contains("sub"));

    let unreached = find(&report, "add_to_sub@lib::halve_unused#2");
    assert_eq!(unreached.status, MutationStatus::NotCovered);
    assert_eq!(unreached.runs, 0);

    assert_eq!(report.killed, 1);
    assert_eq!(report.survived, 0);
    assert_eq!(report.not_covered, 1);
    assert_eq!(report.score, 1.0);
    assert_eq!(report.tests.len(), 1);
    assert_eq!(report.tests[0].status, Some(ExecutionStatus::Passed));
}

#[test]
fn weak_test_lets_mutant_survive() {
    // double(0) is 0 whether it adds or subtracts.
    let program = Program::new(vec![library(), Module::new("tests", vec![double_test("test_zero", 0, 0)])]);
    let report = Driver::new(config()).run(&program).unwrap();

    let reached = find(&report, "add_to_sub@lib::double#0");
    assert_eq!(reached.status, MutationStatus::Survived);
    assert_eq!(reached.runs, 1);
    assert_eq!(report.score, 0.0);
    assert_eq!(report.survivors().count(), 1);
}

#[test]
fn any_killing_test_decides_the_mutant() {
    let program = Program::new(vec![
        library(),
        Module::new("tests", vec![double_test("test_zero", 0, 0), double_test("test_double", 3, 6)]),
    ]);
    let report = Driver::new(config()).run(&program).unwrap();
    assert_eq!(find(&report, "add_to_sub@lib::double#0").status, MutationStatus::Killed);
}

#[test]
fn all_kills_mode_runs_every_covering_test() {
    let program = Program::new(vec![
        library(),
        Module::new("tests", vec![double_test("test_three", 3, 6), double_test("test_four", 4, 8)]),
    ]);
    let report = Driver::new(Config {
        stop_on_first_kill: false,
        ..config()
    })
    .run(&program)
    .unwrap();
    let reached = find(&report, "add_to_sub@lib::double#0");
    assert_eq!(reached.killers.len(), 2);
    assert_eq!(reached.runs, 2);
}

#[test]
fn failing_baseline_test_is_excluded() {
    let program = Program::new(vec![library(), Module::new("tests", vec![double_test("test_wrong", 3, 7)])]);
    let report = Driver::new(config()).run(&program).unwrap();

    assert_eq!(report.tests[0].status, Some(ExecutionStatus::Failed));
    // A failing test contributes no reachability, so nothing is scored.
    assert_eq!(find(&report, "add_to_sub@lib::double#0").status, MutationStatus::NotCovered);
    assert_eq!(report.killed + report.survived, 0);
    assert_eq!(report.score, 1.0);
}

#[test]
fn runaway_mutant_is_killed_by_timeout() {
    // countdown(n) subtracts by adding -1; turning that into `n - -1` never ends.
    let countdown = Function::new(
        "countdown",
        1,
        vec![
            Instruction::constant(1, 0),
            Instruction::constant(2, -1),
            Instruction::compare(Predicate::Gt, 3, 0, 1),
            Instruction::Branch { cond: 3, then_to: 4, else_to: 6 },
            Instruction::binary(BinaryOp::Add, 0, 0, 2),
            Instruction::Jump { target: 2 },
            Instruction::ret(0),
        ],
    );
    let test = Function::new(
        "test_countdown",
        0,
        vec![
            Instruction::constant(0, 5),
            Instruction::call(1, "countdown", &[0]),
            Instruction::constant(2, 0),
            Instruction::compare(Predicate::Eq, 3, 1, 2),
            Instruction::Assert { cond: 3 },
            Instruction::ret_void(),
        ],
    );
    let program = Program::new(vec![Module::new("lib", vec![countdown, test])]);
    let report = Driver::new(Config {
        timeout_ms: 200,
        filter: Filter {
            operators: vec![OperatorKind::AddToSub],
            ..Filter::default()
        },
        ..config()
    })
    .run(&program)
    .unwrap();

    let runaway = find(&report, "add_to_sub@lib::countdown#4");
    assert_eq!(runaway.status, MutationStatus::Killed);
    assert_eq!(runaway.killers[0].status, ExecutionStatus::TimedOut);
    assert_eq!(report.timed_out, 1);
}

#[test]
fn crashing_mutant_counts_as_crash_kill() {
    // Negating `d != 0` sends the division down the zero path.
    let safe_div = Function::new(
        "safe_div",
        2,
        vec![
            Instruction::constant(2, 0),
            Instruction::compare(Predicate::Ne, 3, 1, 2),
            Instruction::Branch { cond: 3, then_to: 3, else_to: 5 },
            Instruction::binary(BinaryOp::Div, 4, 0, 1),
            Instruction::ret(4),
            Instruction::ret(2),
        ],
    );
    let test = Function::new(
        "test_safe_div",
        0,
        vec![
            Instruction::constant(0, 8),
            Instruction::constant(1, 0),
            Instruction::call(2, "safe_div", &[0, 1]),
            Instruction::compare(Predicate::Eq, 3, 2, 1),
            Instruction::Assert { cond: 3 },
            Instruction::ret_void(),
        ],
    );
    let program = Program::new(vec![Module::new("lib", vec![safe_div, test])]);
    let report = Driver::new(config()).run(&program).unwrap();

    let negated = find(&report, "negate_condition@lib::safe_div#1");
    assert_eq!(negated.status, MutationStatus::Killed);
    assert_eq!(negated.killers[0].status, ExecutionStatus::Crashed);
    assert_eq!(report.crashed, 1);
}

#[test]
fn null_sandbox_gives_the_same_verdicts() {
    let program = Program::new(vec![library(), Module::new("tests", vec![double_test("test_double", 3, 6)])]);
    let report = Driver::new(config())
        .with_sandbox(Box::new(NullSandbox))
        .run(&program)
        .unwrap();
    assert_eq!(find(&report, "add_to_sub@lib::double#0").status, MutationStatus::Killed);
}

#[test]
fn verdicts_do_not_depend_on_worker_count() {
    let program = Program::new(vec![
        library(),
        Module::new("tests", vec![double_test("test_zero", 0, 0), double_test("test_double", 3, 6)]),
    ]);
    let verdicts = |workers| {
        let report = Driver::new(Config { workers, ..config() }).run(&program).unwrap();
        report
            .mutants
            .iter()
            .map(|m| (m.id.clone(), m.status))
            .collect::<Vec<_>>()
    };
    assert_eq!(verdicts(1), verdicts(4));
}

#[test]
fn program_without_tests_is_rejected() {
    let program = Program::new(vec![library()]);
    let err = Driver::new(config()).run(&program).unwrap_err();
    assert!(matches!(err, EngineError::NoTests { ref prefix } if prefix == "test_"));
}

#[test]
fn broken_program_is_rejected_before_running() {
    let program = Program::new(vec![Module::new(
        "lib",
        vec![Function::new("test_x", 0, vec![Instruction::call_void("nowhere", &[]), Instruction::ret_void()])],
    )]);
    let err = Driver::new(config()).run(&program).unwrap_err();
    assert!(matches!(err, EngineError::Compile(_)));
}

#[test]
fn assemble_mutants_includes_unreached_points() {
    let program = Program::new(vec![library(), Module::new("tests", vec![double_test("test_double", 3, 6)])]);
    let config = config();
    let mutants = assemble_mutants(&program, vec![], &config);
    let ids: Vec<&str> = mutants.iter().map(|m| m.point.id.as_str()).collect();
    // Test bodies are left alone.
    assert_eq!(ids, vec!["add_to_sub@lib::double#0", "add_to_sub@lib::halve_unused#2"]);
    assert!(mutants.iter().all(|m| m.testees.is_empty()));
}

#[test]
fn deselected_test_bodies_are_not_mutated() {
    let program = Program::new(vec![
        library(),
        Module::new("tests", vec![double_test("test_double", 3, 6), double_test("test_other", 4, 8)]),
    ]);
    let report = Driver::new(Config {
        filter: Filter {
            tests: vec!["test_double".to_string()],
            ..Filter::default()
        },
        ..config()
    })
    .run(&program)
    .unwrap();
    assert_eq!(report.tests.len(), 1);
    assert!(
        report.mutants.iter().all(|m| !m.function.ends_with("test_other")),
        "{:?}",
        report.mutants.iter().map(|m| &m.id).collect::<Vec<_>>()
    );
}

#[test]
fn crashing_baseline_test_is_excluded() {
    let crashing = Function::new(
        "test_crash",
        0,
        vec![
            Instruction::constant(0, 3),
            Instruction::call(1, "double", &[0]),
            Instruction::Abort,
        ],
    );
    let program = Program::new(vec![library(), Module::new("tests", vec![crashing])]);
    let report = Driver::new(config()).run(&program).unwrap();

    assert_eq!(report.tests[0].status, Some(ExecutionStatus::Crashed));
    assert_eq!(find(&report, "add_to_sub@lib::double#0").status, MutationStatus::NotCovered);
    assert_eq!(report.killed + report.survived, 0);
}

#[test]
fn hanging_baseline_test_is_excluded() {
    let hanging = Function::new(
        "test_hang",
        0,
        vec![
            Instruction::constant(0, 3),
            Instruction::call(1, "double", &[0]),
            Instruction::Jump { target: 2 },
        ],
    );
    let program = Program::new(vec![library(), Module::new("tests", vec![hanging])]);
    let report = Driver::new(Config {
        timeout_ms: 200,
        ..config()
    })
    .run(&program)
    .unwrap();

    assert_eq!(report.tests[0].status, Some(ExecutionStatus::TimedOut));
    assert_eq!(find(&report, "add_to_sub@lib::double#0").status, MutationStatus::NotCovered);
    assert_eq!(report.killed + report.survived, 0);
}

/// Runs the first unit of work normally and fails every later one.
struct FailingAfterFirst {
    calls: AtomicUsize,
}

impl ProcessSandbox for FailingAfterFirst {
    fn run(&self, work: &Work<'_>, timeout: Duration) -> ExecutionResult {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            return WatchdogSandbox.run(work, timeout);
        }
        ExecutionResult {
            status: ExecutionStatus::Error,
            duration: Duration::ZERO,
            output: "fork failed: EAGAIN".to_string(),
            coverage: None,
        }
    }
}

#[test]
fn sandbox_failure_is_not_a_kill() {
    // test_zero cannot tell add from sub, so a kill could only come from the error.
    let program = Program::new(vec![library(), Module::new("tests", vec![double_test("test_zero", 0, 0)])]);
    let report = Driver::new(Config { workers: 1, ..config() })
        .with_sandbox(Box::new(FailingAfterFirst {
            calls: AtomicUsize::new(0),
        }))
        .run(&program)
        .unwrap();

    let reached = find(&report, "add_to_sub@lib::double#0");
    assert_eq!(reached.status, MutationStatus::CompileError);
    assert!(reached.killers.is_empty());
    assert_eq!(reached.runs, 0);
    assert_eq!(reached.error.as_deref(), Some("fork failed: EAGAIN"));
    assert_eq!(report.killed, 0);
    assert_eq!(report.compile_errors, 1);
}

#[test]
fn classify_covers_every_outcome() {
    let kill = Kill {
        test: "test_a".into(),
        status: ExecutionStatus::Crashed,
    };
    assert_eq!(classify(0, 0, &[]), MutationStatus::NotCovered);
    assert_eq!(classify(2, 1, std::slice::from_ref(&kill)), MutationStatus::Killed);
    assert_eq!(classify(2, 2, &[]), MutationStatus::Survived);
    assert_eq!(classify(1, 0, &[]), MutationStatus::CompileError);
}

fn result(status: MutationStatus) -> MutantResult {
    MutantResult {
        id: String::new(),
        operator: "add_to_sub".into(),
        function: "lib::f".into(),
        index: 0,
        status,
        killers: vec![],
        runs: 0,
        duration_ms: 0,
        diff: String::new(),
        error: None,
    }
}

#[test]
fn aggregate_scores_killed_over_scored() {
    let mut mutants = Vec::new();
    mutants.extend((0..6).map(|_| result(MutationStatus::Killed)));
    mutants.extend((0..3).map(|_| result(MutationStatus::Survived)));
    mutants.push(result(MutationStatus::NotCovered));

    let report = MutationReport::aggregate(mutants, &[], Duration::from_millis(5));
    assert_eq!(report.total, 10);
    assert_eq!(report.killed, 6);
    assert_eq!(report.survived, 3);
    assert_eq!(report.not_covered, 1);
    assert!((report.score - 6.0 / 9.0).abs() < 1e-9);
}

#[test]
fn score_without_scored_mutants_is_perfect() {
    assert_eq!(mutation_score(0, 0), 1.0);
    assert_eq!(mutation_score(1, 3), 0.25);
}
