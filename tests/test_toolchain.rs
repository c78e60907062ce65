use std::sync::Arc;
use std::time::Duration;

use irmut::ir::{BinaryOp, Function, Instruction, Module, Predicate, Program};
use irmut::machine::{Limits, Machine, TestRunner, Trap, Unwind};
use irmut::mutants::Test;
use irmut::operators::{MutationGuard, MutationPoint, OperatorKind};
use irmut::sandbox::{ExecutionStatus, Interrupt, ProcessSandbox, WatchdogSandbox, WorkFault};
use irmut::toolchain::{CompileError, Toolchain, compile_module};

fn math() -> Module {
    Module::new(
        "math",
        vec![
            Function::new(
                "add",
                2,
                vec![Instruction::binary(BinaryOp::Add, 2, 0, 1), Instruction::ret(2)],
            ),
            Function::new(
                "countdown",
                1,
                vec![
                    Instruction::constant(1, 0),
                    Instruction::constant(2, 1),
                    Instruction::compare(Predicate::Gt, 3, 0, 1),
                    Instruction::Branch { cond: 3, then_to: 4, else_to: 6 },
                    Instruction::binary(BinaryOp::Sub, 0, 0, 2),
                    Instruction::Jump { target: 2 },
                    Instruction::ret(0),
                ],
            ),
        ],
    )
}

fn tests_module() -> Module {
    Module::new(
        "tests",
        vec![Function::new(
            "test_add",
            0,
            vec![
                Instruction::constant(0, 2),
                Instruction::constant(1, 3),
                Instruction::call(2, "add", &[0, 1]),
                Instruction::constant(3, 5),
                Instruction::compare(Predicate::Eq, 4, 2, 3),
                Instruction::Assert { cond: 4 },
                Instruction::ret_void(),
            ],
        )],
    )
}

fn program() -> Program {
    Program::new(vec![math(), tests_module()])
}

fn single(body: Vec<Instruction>) -> Program {
    Program::new(vec![Module::new("m", vec![Function::new("test_it", 0, body)])])
}

fn run(program: &Program) -> Result<irmut::sandbox::WorkOutput, WorkFault> {
    let toolchain = Toolchain::new(program).unwrap();
    let exe = toolchain.executable(program, None).unwrap();
    let entry = program.find_function("test_it").unwrap();
    let test = Test::new(0, "test_it", entry);
    TestRunner::default().run_test(&test, &exe, &Interrupt::new(), false)
}

// --- compilation ---

#[test]
fn compile_rejects_branch_past_end() {
    let module = Module::new(
        "m",
        vec![Function::new("f", 0, vec![Instruction::Jump { target: 7 }])],
    );
    let err = compile_module(0, &module).unwrap_err();
    assert!(matches!(err, CompileError::BranchOutOfRange { target: 7, .. }));
}

#[test]
fn compile_rejects_fall_through() {
    let module = Module::new("m", vec![Function::new("f", 0, vec![Instruction::Nop])]);
    assert!(matches!(
        compile_module(0, &module).unwrap_err(),
        CompileError::FallsThrough { .. }
    ));
}

#[test]
fn link_rejects_unresolved_call() {
    let p = single(vec![Instruction::call_void("missing", &[]), Instruction::ret_void()]);
    let toolchain = Toolchain::new(&p).unwrap();
    let err = toolchain.executable(&p, None).unwrap_err();
    assert_eq!(
        err,
        CompileError::UnresolvedSymbol {
            function: "test_it".into(),
            callee: "missing".into()
        }
    );
}

#[test]
fn link_rejects_wrong_arity() {
    let p = Program::new(vec![math(), Module::new(
        "t",
        vec![Function::new("g", 0, vec![Instruction::call(0, "add", &[0]), Instruction::ret(0)])],
    )]);
    let err = Toolchain::new(&p).unwrap().executable(&p, None).unwrap_err();
    assert!(matches!(err, CompileError::ArityMismatch { expected: 2, found: 1, .. }));
}

#[test]
fn link_rejects_duplicate_symbols() {
    let p = Program::new(vec![math(), Module::new("again", vec![math().functions[0].clone()])]);
    let err = Toolchain::new(&p).unwrap().executable(&p, None).unwrap_err();
    assert!(matches!(err, CompileError::DuplicateSymbol { ref name, .. } if name == "add"));
}

#[test]
fn executable_recompiles_only_the_dirty_module() {
    let p = program();
    let toolchain = Toolchain::new(&p).unwrap();
    let pristine = toolchain.executable(&p, None).unwrap();
    let mutated = toolchain.executable(&p, Some(0)).unwrap();
    assert!(!Arc::ptr_eq(pristine.module(0).unwrap(), mutated.module(0).unwrap()));
    assert!(Arc::ptr_eq(pristine.module(1).unwrap(), mutated.module(1).unwrap()));
}

// --- interpretation ---

#[test]
fn machine_runs_loops_and_calls() {
    let p = program();
    let exe = Toolchain::new(&p).unwrap().executable(&p, None).unwrap();
    let interrupt = Interrupt::new();
    let mut machine = Machine::new(&exe, Limits::default(), &interrupt);
    let add = p.find_function("add").unwrap();
    let countdown = p.find_function("countdown").unwrap();
    assert_eq!(machine.invoke(add, &[40, 2]).unwrap(), Some(42));
    assert_eq!(machine.invoke(countdown, &[10]).unwrap(), Some(0));
}

#[test]
fn passing_test_reports_pass() {
    let p = program();
    let exe = Toolchain::new(&p).unwrap().executable(&p, None).unwrap();
    let test = Test::new(0, "test_add", p.find_function("test_add").unwrap());
    let out = TestRunner::default().run_test(&test, &exe, &Interrupt::new(), false).unwrap();
    assert!(out.passed);
    assert!(out.coverage.is_none());
}

#[test]
fn mutated_add_fails_the_test() {
    let mut p = program();
    let value = irmut::ir::ValueId::new(p.find_function("add").unwrap(), 0);
    let point = MutationPoint::new(&p, OperatorKind::AddToSub, value);
    let toolchain = Toolchain::new(&p).unwrap();
    let test = Test::new(0, "test_add", p.find_function("test_add").unwrap());

    let guard = MutationGuard::acquire(&mut p, &point);
    let exe = toolchain.executable(guard.program(), Some(0)).unwrap();
    let out = TestRunner::default().run_test(&test, &exe, &Interrupt::new(), false).unwrap();
    assert!(!out.passed);
    assert!(out.output.contains("assertion failed in test_add"));
}

#[test]
fn reverted_mutant_runs_like_the_original() {
    let mut p = program();
    let toolchain = Toolchain::new(&p).unwrap();
    let test = Test::new(0, "test_add", p.find_function("test_add").unwrap());
    let runner = TestRunner::default();
    let budget = Duration::from_secs(5);

    let exe = toolchain.executable(&p, None).unwrap();
    let before = WatchdogSandbox.run(&|i| runner.run_test(&test, &exe, i, false), budget);

    let value = irmut::ir::ValueId::new(p.find_function("add").unwrap(), 0);
    let point = MutationPoint::new(&p, OperatorKind::AddToSub, value);
    {
        let guard = MutationGuard::acquire(&mut p, &point);
        let mutated = toolchain.executable(guard.program(), Some(0)).unwrap();
        let during = WatchdogSandbox.run(&|i| runner.run_test(&test, &mutated, i, false), budget);
        assert_eq!(during.status, ExecutionStatus::Failed);
    }

    let exe = toolchain.executable(&p, Some(0)).unwrap();
    let after = WatchdogSandbox.run(&|i| runner.run_test(&test, &exe, i, false), budget);
    assert_eq!(before.status, ExecutionStatus::Passed);
    assert_eq!(after.status, before.status);
    assert_eq!(after.output, before.output);
}

#[test]
fn nonzero_return_is_a_failure() {
    let out = run(&single(vec![Instruction::constant(0, 1), Instruction::ret(0)])).unwrap();
    assert!(!out.passed);
}

#[test]
fn print_output_is_captured() {
    let out = run(&single(vec![
        Instruction::constant(0, 7),
        Instruction::Print { value: 0 },
        Instruction::ret_void(),
    ]))
    .unwrap();
    assert!(out.passed);
    assert_eq!(out.output, "7\n");
}

#[test]
fn division_by_zero_traps() {
    let fault = run(&single(vec![
        Instruction::constant(0, 1),
        Instruction::constant(1, 0),
        Instruction::binary(BinaryOp::Div, 2, 0, 1),
        Instruction::ret_void(),
    ]))
    .unwrap_err();
    assert!(matches!(fault, WorkFault::Trap(ref m) if m.contains("division by zero")));
}

#[test]
fn out_of_bounds_load_traps() {
    let fault = run(&single(vec![
        Instruction::constant(0, -1),
        Instruction::Load { dst: 1, addr: 0 },
        Instruction::ret_void(),
    ]))
    .unwrap_err();
    assert!(matches!(fault, WorkFault::Trap(ref m) if m.contains("out of bounds")));
}

#[test]
fn unbounded_recursion_overflows() {
    let p = Program::new(vec![Module::new(
        "m",
        vec![Function::new("test_it", 0, vec![Instruction::call_void("test_it", &[]), Instruction::ret_void()])],
    )]);
    let exe = Toolchain::new(&p).unwrap().executable(&p, None).unwrap();
    let interrupt = Interrupt::new();
    let limits = Limits {
        max_call_depth: 32,
        ..Limits::default()
    };
    let mut machine = Machine::new(&exe, limits, &interrupt);
    let err = machine.invoke(p.find_function("test_it").unwrap(), &[]).unwrap_err();
    assert!(matches!(err, Unwind::Trap(Trap::StackOverflow { .. })));
}

#[test]
fn raised_interrupt_stops_execution() {
    let p = single(vec![Instruction::Jump { target: 0 }]);
    let exe = Toolchain::new(&p).unwrap().executable(&p, None).unwrap();
    let test = Test::new(0, "test_it", p.find_function("test_it").unwrap());
    let interrupt = Interrupt::new();
    interrupt.raise();
    let fault = TestRunner::default().run_test(&test, &exe, &interrupt, false).unwrap_err();
    assert_eq!(fault, WorkFault::Interrupted);
}

#[test]
fn instrumented_run_records_depths_and_hits() {
    let p = program();
    let exe = Toolchain::new(&p).unwrap().executable(&p, None).unwrap();
    let entry = p.find_function("test_add").unwrap();
    let add = p.find_function("add").unwrap();
    let test = Test::new(0, "test_add", entry);
    let out = TestRunner::default().run_test(&test, &exe, &Interrupt::new(), true).unwrap();
    let coverage = out.coverage.unwrap();
    assert_eq!(coverage.distance(entry), Some(0));
    assert_eq!(coverage.distance(add), Some(1));
    assert!(coverage.is_executed(irmut::ir::ValueId::new(add, 0)));
    assert_eq!(coverage.distance(p.find_function("countdown").unwrap()), None);
}
