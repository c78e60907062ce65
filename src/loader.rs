use std::path::{Path, PathBuf};

use crate::error::EngineError;
use crate::ir::{Module, Program};

/// Reads one JSON module. An unnamed module takes its file stem as name.
pub fn load_module(path: &Path) -> Result<Module, EngineError> {
    let data = std::fs::read_to_string(path).map_err(|e| EngineError::ModuleLoad {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let mut module: Module = serde_json::from_str(&data).map_err(|e| EngineError::ModuleLoad {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    if module.name.is_empty() {
        module.name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
    }
    tracing::debug!(path = %path.display(), functions = module.functions.len(), "loaded module");
    Ok(module)
}

pub fn load_modules_from_file_list(paths: &[PathBuf]) -> Result<Vec<Module>, EngineError> {
    paths.iter().map(|p| load_module(p)).collect()
}

/// Reads a list file: one module path per line, `#` comments and blank lines
/// ignored, relative paths taken from the list file's directory.
pub fn read_module_list(list: &Path) -> Result<Vec<PathBuf>, EngineError> {
    let data = std::fs::read_to_string(list).map_err(|e| EngineError::ModuleLoad {
        path: list.to_path_buf(),
        reason: e.to_string(),
    })?;
    let base = list.parent().unwrap_or(Path::new("."));
    Ok(data
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| {
            let path = Path::new(line);
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                base.join(path)
            }
        })
        .collect())
}

pub fn load_program(paths: &[PathBuf]) -> Result<Program, EngineError> {
    let modules = load_modules_from_file_list(paths)?;
    tracing::info!(modules = modules.len(), "program loaded");
    Ok(Program::new(modules))
}
