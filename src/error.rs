use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::toolchain::CompileError;

/// Failures that end a run. Per-test and per-mutant faults never show up
/// here; they are recorded as execution results instead.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to load module {}: {reason}", path.display())]
    ModuleLoad { path: PathBuf, reason: String },

    #[error("failed to compile program: {0}")]
    Compile(#[from] CompileError),

    #[error("no tests found (looking for functions named `{prefix}*` without parameters)")]
    NoTests { prefix: String },

    #[error("worker {worker} died during phase `{phase}`")]
    WorkerPanicked { phase: String, worker: usize },

    #[error("failed to access state file {}: {source}", path.display())]
    State {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
