//! Compilation and linking of IR modules into executable form.
//!
//! Pristine modules are compiled once and cached; an executable for a mutant
//! reuses every cached module except the one holding the active mutation.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::ir::{FunctionId, Instruction, Module, Program};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("{function}: instruction {index} jumps to {target}, past the end of the body")]
    BranchOutOfRange { function: String, index: usize, target: usize },

    #[error("{function}: control falls off the end of the body")]
    FallsThrough { function: String },

    #[error("{function}: call to undefined function `{callee}`")]
    UnresolvedSymbol { function: String, callee: String },

    #[error("{function}: `{callee}` takes {expected} arguments, {found} given")]
    ArityMismatch {
        function: String,
        callee: String,
        expected: u32,
        found: usize,
    },

    #[error("`{name}` is defined in both `{first}` and `{second}`")]
    DuplicateSymbol { name: String, first: String, second: String },
}

#[derive(Debug)]
pub struct CompiledFunction {
    pub id: FunctionId,
    pub name: String,
    pub params: usize,
    pub frame_size: usize,
    pub code: Vec<Instruction>,
}

#[derive(Debug)]
pub struct CompiledModule {
    pub index: usize,
    pub name: String,
    pub functions: Vec<CompiledFunction>,
}

pub fn compile_module(index: usize, module: &Module) -> Result<CompiledModule, CompileError> {
    let mut functions = Vec::with_capacity(module.functions.len());
    for (f, function) in module.functions.iter().enumerate() {
        let len = function.body.len();
        for (i, inst) in function.body.iter().enumerate() {
            let targets = match inst {
                Instruction::Jump { target } => vec![*target],
                Instruction::Branch { then_to, else_to, .. } => vec![*then_to, *else_to],
                _ => vec![],
            };
            if let Some(&target) = targets.iter().find(|&&t| t >= len) {
                return Err(CompileError::BranchOutOfRange {
                    function: function.name.clone(),
                    index: i,
                    target,
                });
            }
        }
        if !function.body.last().is_some_and(Instruction::is_terminator) {
            return Err(CompileError::FallsThrough {
                function: function.name.clone(),
            });
        }
        functions.push(CompiledFunction {
            id: FunctionId { module: index, function: f },
            name: function.name.clone(),
            params: function.params as usize,
            frame_size: function.frame_size(),
            code: function.body.clone(),
        });
    }
    Ok(CompiledModule {
        index,
        name: module.name.clone(),
        functions,
    })
}

/// Linked set of compiled modules with resolved symbols.
#[derive(Debug)]
pub struct Executable {
    modules: Vec<Arc<CompiledModule>>,
    symbols: HashMap<String, FunctionId>,
}

impl Executable {
    pub fn link(modules: Vec<Arc<CompiledModule>>) -> Result<Self, CompileError> {
        let mut symbols: HashMap<String, FunctionId> = HashMap::new();
        for module in &modules {
            for function in &module.functions {
                if let Some(previous) = symbols.insert(function.name.clone(), function.id) {
                    return Err(CompileError::DuplicateSymbol {
                        name: function.name.clone(),
                        first: modules[previous.module].name.clone(),
                        second: module.name.clone(),
                    });
                }
            }
        }

        let executable = Self { modules, symbols };
        for module in &executable.modules {
            for function in &module.functions {
                executable.check_calls(function)?;
            }
        }
        Ok(executable)
    }

    fn check_calls(&self, function: &CompiledFunction) -> Result<(), CompileError> {
        for inst in &function.code {
            let Instruction::Call { callee, args, .. } = inst else {
                continue;
            };
            let target = self
                .resolve(callee)
                .ok_or_else(|| CompileError::UnresolvedSymbol {
                    function: function.name.clone(),
                    callee: callee.clone(),
                })?;
            if target.params != args.len() {
                return Err(CompileError::ArityMismatch {
                    function: function.name.clone(),
                    callee: callee.clone(),
                    expected: target.params as u32,
                    found: args.len(),
                });
            }
        }
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> Option<&CompiledFunction> {
        self.symbols.get(name).and_then(|id| self.function(*id))
    }

    pub fn function(&self, id: FunctionId) -> Option<&CompiledFunction> {
        self.modules.get(id.module)?.functions.get(id.function)
    }

    pub fn module(&self, index: usize) -> Option<&Arc<CompiledModule>> {
        self.modules.get(index)
    }
}

/// Compiled-module cache for one loaded program.
pub struct Toolchain {
    pristine: Vec<Arc<CompiledModule>>,
}

impl Toolchain {
    pub fn new(program: &Program) -> Result<Self, CompileError> {
        let pristine = program
            .modules()
            .iter()
            .enumerate()
            .map(|(index, module)| compile_module(index, module).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;
        tracing::debug!(modules = pristine.len(), "compiled pristine modules");
        Ok(Self { pristine })
    }

    /// Links an executable for `program`, recompiling only `dirty_module`.
    pub fn executable(&self, program: &Program, dirty_module: Option<usize>) -> Result<Executable, CompileError> {
        let mut modules = self.pristine.clone();
        if let Some(index) = dirty_module {
            if let Some(module) = program.modules().get(index) {
                modules[index] = Arc::new(compile_module(index, module)?);
            }
        }
        Executable::link(modules)
    }
}
