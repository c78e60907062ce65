use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::operators::OperatorKind;

/// Extra time granted to mutant runs on top of the scaled baseline duration.
const MUTANT_TIMEOUT_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SandboxKind {
    /// Fork a child process per run (unix only)
    Fork,
    /// Run on a watched thread with cooperative interruption
    Watchdog,
    /// Run in-process without isolation
    None,
}

impl Default for SandboxKind {
    fn default() -> Self {
        if cfg!(unix) {
            SandboxKind::Fork
        } else {
            SandboxKind::Watchdog
        }
    }
}

/// Inclusion/exclusion policy over tests, functions and operator kinds.
///
/// Patterns match a name exactly, or as a prefix when they end with `*`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Filter {
    /// When non-empty, only tests matching one of these run.
    pub tests: Vec<String>,
    pub exclude_tests: Vec<String>,
    pub exclude_functions: Vec<String>,
    /// When empty, every operator kind is enabled.
    pub operators: Vec<OperatorKind>,
}

impl Filter {
    pub fn includes_test(&self, name: &str) -> bool {
        if !self.tests.is_empty() && !self.tests.iter().any(|p| pattern_matches(p, name)) {
            return false;
        }
        !self.exclude_tests.iter().any(|p| pattern_matches(p, name))
    }

    pub fn includes_function(&self, name: &str) -> bool {
        !self.exclude_functions.iter().any(|p| pattern_matches(p, name))
    }

    pub fn includes_operator(&self, kind: OperatorKind) -> bool {
        self.operators.is_empty() || self.operators.contains(&kind)
    }

    pub fn enabled_operators(&self) -> Vec<OperatorKind> {
        OperatorKind::ALL
            .into_iter()
            .filter(|kind| self.includes_operator(*kind))
            .collect()
    }
}

fn pattern_matches(pattern: &str, name: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => name.starts_with(prefix),
        None => pattern == name,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Per-test execution budget in milliseconds.
    pub timeout_ms: u64,
    /// Deepest call distance from a test entry at which points are still mutated.
    pub max_distance: usize,
    pub workers: usize,
    pub test_prefix: String,
    /// Mutant budget is `baseline * timeout_multiplier + 2s`, capped at `timeout_ms`.
    pub timeout_multiplier: f64,
    pub stop_on_first_kill: bool,
    /// Also mutate points inside a test's own entry function.
    pub mutate_test_bodies: bool,
    pub sandbox: SandboxKind,
    pub progress: bool,
    pub filter: Filter,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timeout_ms: 3000,
            max_distance: 128,
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            test_prefix: "test_".to_string(),
            timeout_multiplier: 3.0,
            stop_on_first_kill: true,
            mutate_test_bodies: false,
            sandbox: SandboxKind::default(),
            progress: false,
            filter: Filter::default(),
        }
    }
}

impl Config {
    /// Clamp values that would make a run meaningless.
    pub fn normalize(&mut self) {
        if self.workers == 0 {
            self.workers = 1;
        }
        if self.timeout_ms == 0 {
            self.timeout_ms = 1;
        }
        if !self.timeout_multiplier.is_finite() || self.timeout_multiplier < 1.0 {
            self.timeout_multiplier = 1.0;
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn mutant_timeout(&self, baseline: Duration) -> Duration {
        let scaled = baseline.mul_f64(self.timeout_multiplier) + MUTANT_TIMEOUT_GRACE;
        scaled.min(self.timeout())
    }
}
