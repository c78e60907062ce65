//! The two scheduled phases: baseline runs with reachability tracking, and
//! mutant runs.

use std::time::Instant;

use crate::config::Config;
use crate::instrumentation::Instrumentation;
use crate::ir::Program;
use crate::machine::TestRunner;
use crate::mutants::{Kill, Mutant, MutantResult, MutationStatus, Test, Testee, classify};
use crate::operators::MutationGuard;
use crate::parallel::{ProgressCounter, Task};
use crate::sandbox::{ExecutionStatus, ProcessSandbox};
use crate::toolchain::{Executable, Toolchain};

/// Runs each test against the pristine program and collects the testees of
/// the ones that pass.
pub struct OriginalTestExecutionTask<'a> {
    program: &'a Program,
    executable: &'a Executable,
    sandbox: &'a dyn ProcessSandbox,
    runner: &'a TestRunner,
    config: &'a Config,
    instrumentation: Instrumentation,
}

impl<'a> OriginalTestExecutionTask<'a> {
    pub fn new(
        program: &'a Program,
        executable: &'a Executable,
        sandbox: &'a dyn ProcessSandbox,
        runner: &'a TestRunner,
        config: &'a Config,
    ) -> Self {
        Self {
            program,
            executable,
            sandbox,
            runner,
            config,
            instrumentation: Instrumentation::new(config.mutate_test_bodies),
        }
    }
}

impl Task for OriginalTestExecutionTask<'_> {
    type Item = Test;
    type Output = Testee;

    fn run(&mut self, items: &[Test], storage: &mut Vec<Testee>, counter: &ProgressCounter) {
        for test in items {
            let mut scope = self.instrumentation.scope(test);

            let executable = self.executable;
            let runner = self.runner;
            let mut result = self.sandbox.run(
                &|interrupt| runner.run_test(test, executable, interrupt, true),
                self.config.timeout(),
            );
            let coverage = result.coverage.take();
            let status = result.status;
            let output = result.output.clone();
            test.set_execution_result(result);

            let mut sequence = None;
            if status == ExecutionStatus::Passed {
                scope.record(coverage.unwrap_or_default());
                sequence = Some(scope.testees(self.program, &self.config.filter, self.config.max_distance));
            } else {
                tracing::warn!(test = %test.name, status = status.as_str(), output = %output.trim_end(), "baseline run did not pass");
            }
            drop(scope);
            counter.increment();

            let Some(sequence) = sequence.filter(|s| !s.is_empty()) else {
                continue;
            };
            tracing::debug!(test = %test.name, testees = sequence.testees.len(), "reachability recorded");
            storage.extend(sequence.testees);
        }
    }
}

/// Applies, runs and reverts one mutant at a time on a program copy owned by
/// this worker.
pub struct MutantExecutionTask<'a> {
    program: Program,
    toolchain: &'a Toolchain,
    tests: &'a [Test],
    sandbox: &'a dyn ProcessSandbox,
    runner: &'a TestRunner,
    config: &'a Config,
}

impl<'a> MutantExecutionTask<'a> {
    pub fn new(
        program: Program,
        toolchain: &'a Toolchain,
        tests: &'a [Test],
        sandbox: &'a dyn ProcessSandbox,
        runner: &'a TestRunner,
        config: &'a Config,
    ) -> Self {
        Self {
            program,
            toolchain,
            tests,
            sandbox,
            runner,
            config,
        }
    }

    fn execute(&mut self, mutant: &Mutant) -> MutantResult {
        let point = &mutant.point;
        if mutant.testees.is_empty() {
            return MutantResult::new(point, classify(0, 0, &[]));
        }

        let started = Instant::now();
        let function = point.value.function_id();
        let before = self
            .program
            .function(function)
            .map(ToString::to_string)
            .unwrap_or_default();

        let guard = MutationGuard::acquire(&mut self.program, point);
        let after = guard
            .program()
            .function(function)
            .map(ToString::to_string)
            .unwrap_or_default();
        let diff = crate::report::listing_diff(&before, &after);

        let executable = match self.toolchain.executable(guard.program(), Some(point.value.module)) {
            Ok(executable) => executable,
            Err(e) => {
                drop(guard);
                tracing::debug!(mutant = %point.id, "mutant failed to compile: {e}");
                let mut result = MutantResult::new(point, MutationStatus::CompileError);
                result.diff = diff;
                result.error = Some(e.to_string());
                result.duration_ms = started.elapsed().as_millis() as u64;
                return result;
            }
        };

        let mut killers = Vec::new();
        let mut eligible = 0;
        let mut sandbox_error = None;
        for testee in &mutant.testees {
            let Some(test) = self.tests.get(testee.test) else {
                continue;
            };
            let Some(baseline) = test.execution_result().filter(|r| r.status == ExecutionStatus::Passed) else {
                continue;
            };
            let runner = self.runner;
            let executable = &executable;
            let result = self.sandbox.run(
                &|interrupt| runner.run_test(test, executable, interrupt, false),
                self.config.mutant_timeout(baseline.duration),
            );
            // A sandbox failure says nothing about the mutant.
            if result.status == ExecutionStatus::Error {
                tracing::warn!(mutant = %point.id, test = %test.name, output = %result.output, "sandbox failed, run not scored");
                sandbox_error.get_or_insert(result.output);
                continue;
            }
            eligible += 1;
            if result.status != ExecutionStatus::Passed {
                tracing::debug!(mutant = %point.id, test = %test.name, status = result.status.as_str(), "mutant killed");
                killers.push(Kill {
                    test: test.name.clone(),
                    status: result.status,
                });
                if self.config.stop_on_first_kill {
                    break;
                }
            }
        }
        drop(guard);

        let mut result = MutantResult::new(point, classify(mutant.testees.len(), eligible, &killers));
        result.killers = killers;
        result.runs = eligible;
        if result.status == MutationStatus::CompileError {
            result.error = sandbox_error;
        }
        result.diff = diff;
        result.duration_ms = started.elapsed().as_millis() as u64;
        result
    }
}

impl Task for MutantExecutionTask<'_> {
    type Item = Mutant;
    type Output = MutantResult;

    fn run(&mut self, items: &[Mutant], storage: &mut Vec<MutantResult>, counter: &ProgressCounter) {
        for mutant in items {
            storage.push(self.execute(mutant));
            counter.increment();
        }
    }
}
