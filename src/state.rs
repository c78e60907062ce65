use std::path::{Path, PathBuf};

use crate::error::EngineError;
use crate::report::MutationReport;

pub const STATE_FILE: &str = ".irmut-state.json";

fn state_path() -> PathBuf {
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(STATE_FILE)
}

pub fn save_last_run(report: &MutationReport) -> Result<(), EngineError> {
    save_to_path(report, &state_path())
}

pub fn load_last_run() -> Option<MutationReport> {
    load_from_path(&state_path())
}

pub fn save_to_path(report: &MutationReport, path: &Path) -> Result<(), EngineError> {
    let json = serde_json::to_string(report).map_err(|e| EngineError::State {
        path: path.to_path_buf(),
        source: e.into(),
    })?;
    std::fs::write(path, json).map_err(|source| EngineError::State {
        path: path.to_path_buf(),
        source,
    })
}

pub fn load_from_path(path: &Path) -> Option<MutationReport> {
    let data = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&data).ok()
}

/// Survivors are addressed as `m1`, `m2`, ... in report order.
pub fn survivor_ref(report: &MutationReport, reference: &str) -> Option<usize> {
    let n: usize = reference.trim_start_matches('@').strip_prefix('m')?.parse().ok()?;
    let position = n.checked_sub(1)?;
    report
        .mutants
        .iter()
        .enumerate()
        .filter(|(_, m)| m.status == crate::mutants::MutationStatus::Survived)
        .nth(position)
        .map(|(i, _)| i)
}
