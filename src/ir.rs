//! Register-machine intermediate representation.
//!
//! A [`Program`] owns an arena of modules, each an arena of functions, each an
//! ordered list of instructions. Instructions are addressed by [`ValueId`]
//! handles; the mutation engine rewrites single instructions in place and never
//! changes the shape of the arena, so handles stay valid for the program's
//! lifetime.

use std::fmt;

use serde::{Deserialize, Serialize};

pub type Reg = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinaryOp {
    pub fn mnemonic(self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
            BinaryOp::Rem => "rem",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Predicate {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Predicate {
    /// The predicate that holds exactly when `self` does not.
    pub fn negate(self) -> Predicate {
        match self {
            Predicate::Eq => Predicate::Ne,
            Predicate::Ne => Predicate::Eq,
            Predicate::Lt => Predicate::Ge,
            Predicate::Ge => Predicate::Lt,
            Predicate::Le => Predicate::Gt,
            Predicate::Gt => Predicate::Le,
        }
    }

    pub fn evaluate(self, lhs: i64, rhs: i64) -> bool {
        match self {
            Predicate::Eq => lhs == rhs,
            Predicate::Ne => lhs != rhs,
            Predicate::Lt => lhs < rhs,
            Predicate::Le => lhs <= rhs,
            Predicate::Gt => lhs > rhs,
            Predicate::Ge => lhs >= rhs,
        }
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            Predicate::Eq => "eq",
            Predicate::Ne => "ne",
            Predicate::Lt => "lt",
            Predicate::Le => "le",
            Predicate::Gt => "gt",
            Predicate::Ge => "ge",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Instruction {
    Const {
        dst: Reg,
        value: i64,
    },
    Binary {
        kind: BinaryOp,
        dst: Reg,
        lhs: Reg,
        rhs: Reg,
    },
    Compare {
        pred: Predicate,
        dst: Reg,
        lhs: Reg,
        rhs: Reg,
    },
    Call {
        #[serde(default)]
        dst: Option<Reg>,
        callee: String,
        #[serde(default)]
        args: Vec<Reg>,
    },
    Jump {
        target: usize,
    },
    /// Jumps to `then_to` when `cond` is non-zero, `else_to` otherwise.
    Branch {
        cond: Reg,
        then_to: usize,
        else_to: usize,
    },
    Return {
        #[serde(default)]
        value: Option<Reg>,
    },
    /// Fails the running test when `cond` is zero.
    Assert {
        cond: Reg,
    },
    Print {
        value: Reg,
    },
    Load {
        dst: Reg,
        addr: Reg,
    },
    Store {
        addr: Reg,
        value: Reg,
    },
    Abort,
    Nop,
}

impl Instruction {
    pub fn constant(dst: Reg, value: i64) -> Self {
        Instruction::Const { dst, value }
    }

    pub fn binary(kind: BinaryOp, dst: Reg, lhs: Reg, rhs: Reg) -> Self {
        Instruction::Binary { kind, dst, lhs, rhs }
    }

    pub fn compare(pred: Predicate, dst: Reg, lhs: Reg, rhs: Reg) -> Self {
        Instruction::Compare { pred, dst, lhs, rhs }
    }

    pub fn call(dst: Reg, callee: &str, args: &[Reg]) -> Self {
        Instruction::Call {
            dst: Some(dst),
            callee: callee.to_string(),
            args: args.to_vec(),
        }
    }

    pub fn call_void(callee: &str, args: &[Reg]) -> Self {
        Instruction::Call {
            dst: None,
            callee: callee.to_string(),
            args: args.to_vec(),
        }
    }

    pub fn ret(value: Reg) -> Self {
        Instruction::Return { value: Some(value) }
    }

    pub fn ret_void() -> Self {
        Instruction::Return { value: None }
    }

    /// Whether control never falls through to the next instruction.
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Instruction::Jump { .. }
                | Instruction::Branch { .. }
                | Instruction::Return { .. }
                | Instruction::Abort
        )
    }

    /// Highest register this instruction reads or writes.
    pub fn max_register(&self) -> Option<Reg> {
        let regs: Vec<Reg> = match self {
            Instruction::Const { dst, .. } => vec![*dst],
            Instruction::Binary { dst, lhs, rhs, .. } | Instruction::Compare { dst, lhs, rhs, .. } => {
                vec![*dst, *lhs, *rhs]
            }
            Instruction::Call { dst, args, .. } => dst.iter().chain(args.iter()).copied().collect(),
            Instruction::Branch { cond, .. } | Instruction::Assert { cond } => vec![*cond],
            Instruction::Return { value } => value.iter().copied().collect(),
            Instruction::Print { value } => vec![*value],
            Instruction::Load { dst, addr } => vec![*dst, *addr],
            Instruction::Store { addr, value } => vec![*addr, *value],
            Instruction::Jump { .. } | Instruction::Abort | Instruction::Nop => vec![],
        };
        regs.into_iter().max()
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Const { dst, value } => write!(f, "r{dst} = const {value}"),
            Instruction::Binary { kind, dst, lhs, rhs } => {
                write!(f, "r{dst} = {} r{lhs}, r{rhs}", kind.mnemonic())
            }
            Instruction::Compare { pred, dst, lhs, rhs } => {
                write!(f, "r{dst} = cmp {} r{lhs}, r{rhs}", pred.mnemonic())
            }
            Instruction::Call { dst, callee, args } => {
                let args: Vec<String> = args.iter().map(|r| format!("r{r}")).collect();
                match dst {
                    Some(dst) => write!(f, "r{dst} = call {callee}({})", args.join(", ")),
                    None => write!(f, "call {callee}({})", args.join(", ")),
                }
            }
            Instruction::Jump { target } => write!(f, "jump {target}"),
            Instruction::Branch { cond, then_to, else_to } => {
                write!(f, "br r{cond}, {then_to}, {else_to}")
            }
            Instruction::Return { value: Some(value) } => write!(f, "ret r{value}"),
            Instruction::Return { value: None } => write!(f, "ret"),
            Instruction::Assert { cond } => write!(f, "assert r{cond}"),
            Instruction::Print { value } => write!(f, "print r{value}"),
            Instruction::Load { dst, addr } => write!(f, "r{dst} = load [r{addr}]"),
            Instruction::Store { addr, value } => write!(f, "store [r{addr}], r{value}"),
            Instruction::Abort => write!(f, "abort"),
            Instruction::Nop => write!(f, "nop"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    #[serde(default)]
    pub params: u32,
    pub body: Vec<Instruction>,
}

impl Function {
    pub fn new(name: &str, params: u32, body: Vec<Instruction>) -> Self {
        Self {
            name: name.to_string(),
            params,
            body,
        }
    }

    /// Number of registers a frame of this function needs.
    pub fn frame_size(&self) -> usize {
        let used = self
            .body
            .iter()
            .filter_map(Instruction::max_register)
            .max()
            .map(|r| r as usize + 1)
            .unwrap_or(0);
        used.max(self.params as usize)
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "fn {}({} params):", self.name, self.params)?;
        for (index, inst) in self.body.iter().enumerate() {
            writeln!(f, "  {index:>3}: {inst}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    #[serde(default)]
    pub name: String,
    pub functions: Vec<Function>,
}

impl Module {
    pub fn new(name: &str, functions: Vec<Function>) -> Self {
        Self {
            name: name.to_string(),
            functions,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FunctionId {
    pub module: usize,
    pub function: usize,
}

/// Handle to one instruction inside a [`Program`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ValueId {
    pub module: usize,
    pub function: usize,
    pub index: usize,
}

impl ValueId {
    pub fn new(function: FunctionId, index: usize) -> Self {
        Self {
            module: function.module,
            function: function.function,
            index,
        }
    }

    pub fn function_id(self) -> FunctionId {
        FunctionId {
            module: self.module,
            function: self.function,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Program {
    modules: Vec<Module>,
}

impl Program {
    pub fn new(modules: Vec<Module>) -> Self {
        Self { modules }
    }

    pub fn modules(&self) -> &[Module] {
        &self.modules
    }

    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    pub fn function(&self, id: FunctionId) -> Option<&Function> {
        self.modules.get(id.module)?.functions.get(id.function)
    }

    /// All functions in module order.
    pub fn functions(&self) -> impl Iterator<Item = (FunctionId, &Function)> {
        self.modules.iter().enumerate().flat_map(|(m, module)| {
            module.functions.iter().enumerate().map(move |(f, function)| {
                (
                    FunctionId {
                        module: m,
                        function: f,
                    },
                    function,
                )
            })
        })
    }

    pub fn find_function(&self, name: &str) -> Option<FunctionId> {
        self.functions()
            .find(|(_, function)| function.name == name)
            .map(|(id, _)| id)
    }

    pub fn instruction(&self, value: ValueId) -> Option<&Instruction> {
        self.function(value.function_id())?.body.get(value.index)
    }

    pub(crate) fn instruction_mut(&mut self, value: ValueId) -> Option<&mut Instruction> {
        self.modules
            .get_mut(value.module)?
            .functions
            .get_mut(value.function)?
            .body
            .get_mut(value.index)
    }

    /// `module::function` name used in reports.
    pub fn qualified_name(&self, id: FunctionId) -> String {
        match (self.modules.get(id.module), self.function(id)) {
            (Some(module), Some(function)) => format!("{}::{}", module.name, function.name),
            _ => format!("<{}:{}>", id.module, id.function),
        }
    }
}
