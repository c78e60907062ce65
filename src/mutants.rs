use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::ir::{Function, FunctionId, Program};
use crate::operators::MutationPoint;
use crate::sandbox::{ExecutionResult, ExecutionStatus};

/// A zero-argument function the test framework runs as a test.
#[derive(Debug, Clone)]
pub struct Test {
    pub id: usize,
    pub name: String,
    pub entry: FunctionId,
    result: OnceLock<ExecutionResult>,
}

impl Test {
    pub fn new(id: usize, name: &str, entry: FunctionId) -> Self {
        Self {
            id,
            name: name.to_string(),
            entry,
            result: OnceLock::new(),
        }
    }

    /// Records the baseline result. Panics when a result is already set.
    pub fn set_execution_result(&self, result: ExecutionResult) {
        if self.result.set(result).is_err() {
            panic!("execution result for test `{}` set twice", self.name);
        }
    }

    pub fn execution_result(&self) -> Option<&ExecutionResult> {
        self.result.get()
    }

    pub fn baseline_passed(&self) -> bool {
        self.result
            .get()
            .is_some_and(|r| r.status == ExecutionStatus::Passed)
    }
}

/// Whether `function` is a test, whether or not the filter selects it.
pub fn is_test_function(function: &Function, config: &Config) -> bool {
    function.params == 0 && function.name.starts_with(&config.test_prefix)
}

/// Finds every zero-parameter function named with the configured test prefix
/// that the filter lets through, in module order.
pub fn find_tests(program: &Program, config: &Config) -> Vec<Test> {
    program
        .functions()
        .filter(|(_, f)| is_test_function(f, config))
        .filter(|(_, f)| config.filter.includes_test(&f.name))
        .enumerate()
        .map(|(id, (entry, f))| Test::new(id, &f.name, entry))
        .collect()
}

/// A mutation point reached while running one test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Testee {
    pub test: usize,
    pub point: MutationPoint,
    /// Call depth below the test entry at which the point's function ran.
    pub distance: usize,
}

/// The test entry itself, reported ahead of the real testees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPoint {
    pub test: usize,
    pub function: FunctionId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TesteeSequence {
    pub entry: EntryPoint,
    pub testees: Vec<Testee>,
}

impl TesteeSequence {
    pub fn entry_only(test: &Test) -> Self {
        Self {
            entry: EntryPoint {
                test: test.id,
                function: test.entry,
            },
            testees: vec![],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.testees.is_empty()
    }
}

/// One mutation point together with every testee that reaches it.
#[derive(Debug, Clone)]
pub struct Mutant {
    pub point: MutationPoint,
    pub testees: Vec<Testee>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MutationStatus {
    Killed,
    Survived,
    NotCovered,
    /// The mutant could not be compiled, or no covering test gave a usable run.
    CompileError,
}

impl MutationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MutationStatus::Killed => "killed",
            MutationStatus::Survived => "survived",
            MutationStatus::NotCovered => "not covered",
            MutationStatus::CompileError => "compile error",
        }
    }
}

/// A covering test that detected the mutant, and how.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Kill {
    pub test: String,
    pub status: ExecutionStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutantResult {
    pub id: String,
    pub operator: String,
    pub function: String,
    pub index: usize,
    pub status: MutationStatus,
    pub killers: Vec<Kill>,
    /// Covering tests actually executed against the mutant.
    pub runs: usize,
    pub duration_ms: u64,
    pub diff: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MutantResult {
    pub fn new(point: &MutationPoint, status: MutationStatus) -> Self {
        Self {
            id: point.id.clone(),
            operator: point.kind.name().to_string(),
            function: point.function.clone(),
            index: point.value.index,
            status,
            killers: vec![],
            runs: 0,
            duration_ms: 0,
            diff: String::new(),
            error: None,
        }
    }
}

/// Decides a mutant's status from its covering runs.
///
/// `covering` counts testees, `eligible` the runs that produced a verdict:
/// the baseline passed and the sandbox itself did not fail.
pub fn classify(covering: usize, eligible: usize, killers: &[Kill]) -> MutationStatus {
    if covering == 0 {
        MutationStatus::NotCovered
    } else if !killers.is_empty() {
        MutationStatus::Killed
    } else if eligible == 0 {
        MutationStatus::CompileError
    } else {
        MutationStatus::Survived
    }
}
