use std::time::Duration;

use serde::{Deserialize, Serialize};
use similar::{ChangeTag, TextDiff};

use crate::mutants::{MutantResult, MutationStatus, Test};
use crate::sandbox::ExecutionStatus;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestReport {
    pub name: String,
    pub status: Option<ExecutionStatus>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationReport {
    pub score: f64,
    pub total: usize,
    pub killed: usize,
    pub survived: usize,
    pub not_covered: usize,
    pub compile_errors: usize,
    /// Killed mutants whose killing run timed out.
    pub timed_out: usize,
    /// Killed mutants whose killing run crashed.
    pub crashed: usize,
    pub duration_ms: u64,
    pub mutants: Vec<MutantResult>,
    pub tests: Vec<TestReport>,
}

/// `killed / (killed + survived)`; 1.0 when nothing was scored.
pub fn mutation_score(killed: usize, survived: usize) -> f64 {
    let scored = killed + survived;
    if scored == 0 {
        1.0
    } else {
        killed as f64 / scored as f64
    }
}

impl MutationReport {
    pub fn aggregate(mutants: Vec<MutantResult>, tests: &[Test], elapsed: Duration) -> Self {
        let count = |status: MutationStatus| mutants.iter().filter(|m| m.status == status).count();
        let killed = count(MutationStatus::Killed);
        let survived = count(MutationStatus::Survived);
        let killed_by = |status: ExecutionStatus| {
            mutants
                .iter()
                .filter(|m| m.status == MutationStatus::Killed)
                .filter(|m| m.killers.first().is_some_and(|k| k.status == status))
                .count()
        };

        Self {
            score: mutation_score(killed, survived),
            total: mutants.len(),
            killed,
            survived,
            not_covered: count(MutationStatus::NotCovered),
            compile_errors: count(MutationStatus::CompileError),
            timed_out: killed_by(ExecutionStatus::TimedOut),
            crashed: killed_by(ExecutionStatus::Crashed),
            duration_ms: elapsed.as_millis() as u64,
            tests: tests
                .iter()
                .map(|t| {
                    let result = t.execution_result();
                    TestReport {
                        name: t.name.clone(),
                        status: result.map(|r| r.status),
                        duration_ms: result.map(|r| r.duration.as_millis() as u64).unwrap_or(0),
                    }
                })
                .collect(),
            mutants,
        }
    }

    pub fn survivors(&self) -> impl Iterator<Item = &MutantResult> {
        self.mutants
            .iter()
            .filter(|m| m.status == MutationStatus::Survived)
    }
}

/// Changed lines between two function listings, `-`/`+` prefixed.
pub fn listing_diff(original: &str, mutated: &str) -> String {
    let diff = TextDiff::from_lines(original, mutated);
    let mut output = String::new();
    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Delete => output.push_str(&format!("- {}", change)),
            ChangeTag::Insert => output.push_str(&format!("+ {}", change)),
            ChangeTag::Equal => {}
        }
    }
    output
}
