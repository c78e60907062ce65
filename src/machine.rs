//! Interpreter for linked executables, and the test runner built on it.

use thiserror::Error;

use crate::instrumentation::Coverage;
use crate::ir::{BinaryOp, FunctionId, Instruction, ValueId};
use crate::mutants::Test;
use crate::sandbox::{Interrupt, WorkFault, WorkOutput};
use crate::toolchain::{CompiledFunction, Executable};

#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub max_call_depth: usize,
    pub memory_cells: usize,
    pub max_output: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_call_depth: 512,
            memory_cells: 4096,
            max_output: 16 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Trap {
    #[error("division by zero in {function} at {index}")]
    DivisionByZero { function: String, index: usize },

    #[error("memory access at {addr} out of bounds in {function} at {index}")]
    OutOfBounds { function: String, index: usize, addr: i64 },

    #[error("call depth exceeded entering {function}")]
    StackOverflow { function: String },

    #[error("abort in {function} at {index}")]
    Abort { function: String, index: usize },

    #[error("call to unknown function `{0}`")]
    UnknownFunction(String),

    #[error("interrupted")]
    Interrupted,
}

#[derive(Debug)]
pub enum Unwind {
    Trap(Trap),
    AssertionFailed { function: String, index: usize },
}

impl From<Trap> for Unwind {
    fn from(trap: Trap) -> Self {
        Unwind::Trap(trap)
    }
}

pub struct Machine<'a> {
    executable: &'a Executable,
    limits: Limits,
    interrupt: &'a Interrupt,
    coverage: Option<Coverage>,
    memory: Vec<i64>,
    output: String,
    depth: usize,
}

impl<'a> Machine<'a> {
    pub fn new(executable: &'a Executable, limits: Limits, interrupt: &'a Interrupt) -> Self {
        Self {
            executable,
            limits,
            interrupt,
            coverage: None,
            memory: vec![0; limits.memory_cells],
            output: String::new(),
            depth: 0,
        }
    }

    /// Records function entries and executed instructions from now on.
    pub fn with_coverage(mut self) -> Self {
        self.coverage = Some(Coverage::default());
        self
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn into_parts(self) -> (String, Option<Coverage>) {
        (self.output, self.coverage)
    }

    pub fn invoke(&mut self, id: FunctionId, args: &[i64]) -> Result<Option<i64>, Unwind> {
        let executable = self.executable;
        let function = executable
            .function(id)
            .ok_or_else(|| Trap::UnknownFunction(format!("{id:?}")))?;
        self.call(function, args)
    }

    fn call(&mut self, function: &'a CompiledFunction, args: &[i64]) -> Result<Option<i64>, Unwind> {
        if self.depth >= self.limits.max_call_depth {
            return Err(Trap::StackOverflow {
                function: function.name.clone(),
            }
            .into());
        }
        if let Some(coverage) = self.coverage.as_mut() {
            coverage.enter_function(function.id, self.depth);
        }
        self.depth += 1;
        let result = self.execute(function, args);
        self.depth -= 1;
        result
    }

    fn execute(&mut self, function: &'a CompiledFunction, args: &[i64]) -> Result<Option<i64>, Unwind> {
        let mut regs = vec![0i64; function.frame_size];
        let passed = args.len().min(function.params).min(regs.len());
        regs[..passed].copy_from_slice(&args[..passed]);
        let mut pc = 0usize;

        loop {
            if self.interrupt.is_raised() {
                return Err(Trap::Interrupted.into());
            }
            let Some(inst) = function.code.get(pc) else {
                return Ok(None);
            };
            if let Some(coverage) = self.coverage.as_mut() {
                coverage.hit(ValueId::new(function.id, pc));
            }
            let mut next = pc + 1;

            match inst {
                Instruction::Const { dst, value } => regs[*dst as usize] = *value,
                Instruction::Binary { kind, dst, lhs, rhs } => {
                    let (a, b) = (regs[*lhs as usize], regs[*rhs as usize]);
                    regs[*dst as usize] = match kind {
                        BinaryOp::Add => a.wrapping_add(b),
                        BinaryOp::Sub => a.wrapping_sub(b),
                        BinaryOp::Mul => a.wrapping_mul(b),
                        BinaryOp::Div | BinaryOp::Rem if b == 0 => {
                            return Err(Trap::DivisionByZero {
                                function: function.name.clone(),
                                index: pc,
                            }
                            .into());
                        }
                        BinaryOp::Div => a.wrapping_div(b),
                        BinaryOp::Rem => a.wrapping_rem(b),
                    };
                }
                Instruction::Compare { pred, dst, lhs, rhs } => {
                    regs[*dst as usize] = pred.evaluate(regs[*lhs as usize], regs[*rhs as usize]) as i64;
                }
                Instruction::Call { dst, callee, args } => {
                    let executable = self.executable;
                    let target = executable
                        .resolve(callee)
                        .ok_or_else(|| Trap::UnknownFunction(callee.clone()))?;
                    let values: Vec<i64> = args.iter().map(|r| regs[*r as usize]).collect();
                    let returned = self.call(target, &values)?;
                    if let Some(dst) = dst {
                        regs[*dst as usize] = returned.unwrap_or(0);
                    }
                }
                Instruction::Jump { target } => next = *target,
                Instruction::Branch { cond, then_to, else_to } => {
                    next = if regs[*cond as usize] != 0 { *then_to } else { *else_to };
                }
                Instruction::Return { value } => return Ok(value.map(|r| regs[r as usize])),
                Instruction::Assert { cond } => {
                    if regs[*cond as usize] == 0 {
                        return Err(Unwind::AssertionFailed {
                            function: function.name.clone(),
                            index: pc,
                        });
                    }
                }
                Instruction::Print { value } => {
                    let line = format!("{}\n", regs[*value as usize]);
                    if self.output.len() + line.len() <= self.limits.max_output {
                        self.output.push_str(&line);
                    }
                }
                Instruction::Load { dst, addr } => {
                    let slot = self.slot(function, pc, regs[*addr as usize])?;
                    regs[*dst as usize] = self.memory[slot];
                }
                Instruction::Store { addr, value } => {
                    let slot = self.slot(function, pc, regs[*addr as usize])?;
                    self.memory[slot] = regs[*value as usize];
                }
                Instruction::Abort => {
                    return Err(Trap::Abort {
                        function: function.name.clone(),
                        index: pc,
                    }
                    .into());
                }
                Instruction::Nop => {}
            }
            pc = next;
        }
    }

    fn slot(&self, function: &CompiledFunction, index: usize, addr: i64) -> Result<usize, Trap> {
        usize::try_from(addr)
            .ok()
            .filter(|slot| *slot < self.memory.len())
            .ok_or_else(|| Trap::OutOfBounds {
                function: function.name.clone(),
                index,
                addr,
            })
    }
}

/// Runs test entry points; a test passes when it returns zero (or nothing)
/// without failing an assertion.
#[derive(Debug, Clone, Copy, Default)]
pub struct TestRunner {
    limits: Limits,
}

impl TestRunner {
    pub fn new(limits: Limits) -> Self {
        Self { limits }
    }

    pub fn run_test(
        &self,
        test: &Test,
        executable: &Executable,
        interrupt: &Interrupt,
        instrument: bool,
    ) -> Result<WorkOutput, WorkFault> {
        let mut machine = Machine::new(executable, self.limits, interrupt);
        if instrument {
            machine = machine.with_coverage();
        }
        let outcome = machine.invoke(test.entry, &[]);
        let (mut output, coverage) = machine.into_parts();
        let passed = match outcome {
            Ok(returned) => returned.unwrap_or(0) == 0,
            Err(Unwind::AssertionFailed { function, index }) => {
                output.push_str(&format!("assertion failed in {function} at {index}\n"));
                false
            }
            Err(Unwind::Trap(Trap::Interrupted)) => return Err(WorkFault::Interrupted),
            Err(Unwind::Trap(trap)) => return Err(WorkFault::Trap(trap.to_string())),
        };
        Ok(WorkOutput {
            passed,
            output,
            coverage,
        })
    }
}
