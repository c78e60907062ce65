//! Reachability tracking for baseline test runs.
//!
//! While a test runs against the pristine program the interpreter reports
//! every function entry (with its call depth) and every executed instruction
//! into a [`Coverage`] record. Afterwards [`Instrumentation::get_testees`]
//! turns that record into the mutation points the test can observe.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::config::Filter;
use crate::ir::{FunctionId, Program, ValueId};
use crate::mutants::{Test, Testee, TesteeSequence};
use crate::operators::MutationPoint;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "CoverageRecord", into = "CoverageRecord")]
pub struct Coverage {
    functions: BTreeMap<FunctionId, usize>,
    executed: BTreeSet<ValueId>,
}

impl Coverage {
    pub fn enter_function(&mut self, function: FunctionId, depth: usize) {
        self.functions
            .entry(function)
            .and_modify(|d| *d = (*d).min(depth))
            .or_insert(depth);
    }

    pub fn hit(&mut self, value: ValueId) {
        self.executed.insert(value);
    }

    /// Shallowest call depth at which `function` was entered.
    pub fn distance(&self, function: FunctionId) -> Option<usize> {
        self.functions.get(&function).copied()
    }

    pub fn is_executed(&self, value: ValueId) -> bool {
        self.executed.contains(&value)
    }

    pub fn executed(&self) -> impl Iterator<Item = ValueId> + '_ {
        self.executed.iter().copied()
    }

    pub fn reached_functions(&self) -> usize {
        self.functions.len()
    }
}

/// Wire form; JSON maps cannot have struct keys.
#[derive(Serialize, Deserialize)]
struct CoverageRecord {
    functions: Vec<(FunctionId, usize)>,
    executed: Vec<ValueId>,
}

impl From<CoverageRecord> for Coverage {
    fn from(record: CoverageRecord) -> Self {
        let mut coverage = Coverage::default();
        for (function, depth) in record.functions {
            coverage.enter_function(function, depth);
        }
        coverage.executed.extend(record.executed);
        coverage
    }
}

impl From<Coverage> for CoverageRecord {
    fn from(coverage: Coverage) -> Self {
        Self {
            functions: coverage.functions.into_iter().collect(),
            executed: coverage.executed.into_iter().collect(),
        }
    }
}

/// Per-worker tracking state, one record per test in flight.
#[derive(Debug, Default)]
pub struct Instrumentation {
    records: HashMap<usize, Coverage>,
    mutate_test_bodies: bool,
}

impl Instrumentation {
    pub fn new(mutate_test_bodies: bool) -> Self {
        Self {
            records: HashMap::new(),
            mutate_test_bodies,
        }
    }

    pub fn setup_instrumentation_info(&mut self, test: &Test) {
        self.records.insert(test.id, Coverage::default());
    }

    pub fn cleanup_instrumentation_info(&mut self, test: &Test) {
        self.records.remove(&test.id);
    }

    pub fn record(&mut self, test: &Test, coverage: Coverage) {
        if let Some(slot) = self.records.get_mut(&test.id) {
            *slot = coverage;
        }
    }

    pub fn is_tracking(&self, test: &Test) -> bool {
        self.records.contains_key(&test.id)
    }

    /// Brackets one test's baseline run; cleanup happens when the scope drops.
    pub fn scope<'a>(&'a mut self, test: &'a Test) -> InstrumentationScope<'a> {
        self.setup_instrumentation_info(test);
        InstrumentationScope {
            instrumentation: self,
            test,
        }
    }

    /// Mutation points reached by `test`, ordered by (distance, point).
    ///
    /// The returned sequence always carries the test-entry sentinel; its
    /// `testees` are empty when nothing recorded for the test qualifies.
    pub fn get_testees(&self, program: &Program, test: &Test, filter: &Filter, max_distance: usize) -> TesteeSequence {
        let mut sequence = TesteeSequence::entry_only(test);
        let Some(coverage) = self.records.get(&test.id) else {
            return sequence;
        };
        let operators = filter.enabled_operators();

        for value in coverage.executed() {
            let function = value.function_id();
            if function == test.entry && !self.mutate_test_bodies {
                continue;
            }
            let Some(distance) = coverage.distance(function) else {
                continue;
            };
            if distance > max_distance {
                continue;
            }
            let included = program
                .function(function)
                .is_some_and(|f| filter.includes_function(&f.name));
            if !included {
                continue;
            }
            for kind in &operators {
                if kind.can_be_applied(program, value) {
                    sequence.testees.push(Testee {
                        test: test.id,
                        point: MutationPoint::new(program, *kind, value),
                        distance,
                    });
                }
            }
        }

        sequence
            .testees
            .sort_by(|a, b| (a.distance, a.point.value, a.point.kind).cmp(&(b.distance, b.point.value, b.point.kind)));
        sequence
    }
}

pub struct InstrumentationScope<'a> {
    instrumentation: &'a mut Instrumentation,
    test: &'a Test,
}

impl InstrumentationScope<'_> {
    pub fn record(&mut self, coverage: Coverage) {
        self.instrumentation.record(self.test, coverage);
    }

    pub fn testees(&self, program: &Program, filter: &Filter, max_distance: usize) -> TesteeSequence {
        self.instrumentation
            .get_testees(program, self.test, filter, max_distance)
    }
}

impl Drop for InstrumentationScope<'_> {
    fn drop(&mut self) {
        self.instrumentation.cleanup_instrumentation_info(self.test);
    }
}
