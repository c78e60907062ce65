use std::collections::BTreeMap;
use std::time::Instant;

use crate::config::Config;
use crate::error::EngineError;
use crate::ir::{Program, ValueId};
use crate::machine::TestRunner;
use crate::mutants::{Mutant, Testee, find_tests, is_test_function};
use crate::operators::{OperatorKind, find_mutation_points};
use crate::parallel::TaskExecutor;
use crate::report::MutationReport;
use crate::sandbox::{ProcessSandbox, make_sandbox};
use crate::tasks::{MutantExecutionTask, OriginalTestExecutionTask};
use crate::toolchain::Toolchain;

/// Orchestrates a full run: baseline + reachability, then every mutant.
pub struct Driver {
    config: Config,
    sandbox: Box<dyn ProcessSandbox>,
    runner: TestRunner,
}

impl Driver {
    pub fn new(mut config: Config) -> Self {
        config.normalize();
        let sandbox = make_sandbox(config.sandbox);
        Self {
            config,
            sandbox,
            runner: TestRunner::default(),
        }
    }

    pub fn with_sandbox(mut self, sandbox: Box<dyn ProcessSandbox>) -> Self {
        self.sandbox = sandbox;
        self
    }

    pub fn with_runner(mut self, runner: TestRunner) -> Self {
        self.runner = runner;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn run(&self, program: &Program) -> Result<MutationReport, EngineError> {
        let started = Instant::now();
        let config = &self.config;
        let sandbox = self.sandbox.as_ref();

        let toolchain = Toolchain::new(program)?;
        let pristine = toolchain.executable(program, None)?;

        let tests = find_tests(program, config);
        if tests.is_empty() {
            return Err(EngineError::NoTests {
                prefix: config.test_prefix.clone(),
            });
        }
        tracing::info!(tests = tests.len(), modules = program.module_count(), "discovered tests");

        let tasks: Vec<_> = (0..config.workers)
            .map(|_| OriginalTestExecutionTask::new(program, &pristine, sandbox, &self.runner, config))
            .collect();
        let testees = TaskExecutor::new("running original tests", &tests, tasks)
            .show_progress(config.progress)
            .execute()?
            .output;

        let mutants = assemble_mutants(program, testees, config);
        tracing::info!(mutants = mutants.len(), "assembled mutants");

        let tasks: Vec<_> = (0..config.workers)
            .map(|_| MutantExecutionTask::new(program.clone(), &toolchain, &tests, sandbox, &self.runner, config))
            .collect();
        let results = TaskExecutor::new("running mutants", &mutants, tasks)
            .show_progress(config.progress)
            .execute()?
            .output;

        Ok(MutationReport::aggregate(results, &tests, started.elapsed()))
    }
}

/// Groups testees by mutation point and adds every statically found point
/// that no test reached. Test bodies are skipped even when the filter
/// deselected the test. Ordered by program position, so the result does not
/// depend on how the baseline phase was partitioned.
pub fn assemble_mutants(program: &Program, testees: Vec<Testee>, config: &Config) -> Vec<Mutant> {
    let mut mutants: BTreeMap<(ValueId, OperatorKind), Mutant> = BTreeMap::new();

    for testee in testees {
        let key = (testee.point.value, testee.point.kind);
        mutants
            .entry(key)
            .or_insert_with(|| Mutant {
                point: testee.point.clone(),
                testees: vec![],
            })
            .testees
            .push(testee);
    }

    for (id, function) in program.functions() {
        if (is_test_function(function, config) && !config.mutate_test_bodies) || !config.filter.includes_function(&function.name) {
            continue;
        }
        for point in find_mutation_points(program, id, &config.filter) {
            mutants
                .entry((point.value, point.kind))
                .or_insert_with(|| Mutant {
                    point,
                    testees: vec![],
                });
        }
    }

    let mut mutants: Vec<Mutant> = mutants.into_values().collect();
    for mutant in &mut mutants {
        mutant.testees.sort_by_key(|t| (t.distance, t.test));
    }
    mutants
}
