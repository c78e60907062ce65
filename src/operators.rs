//! Mutation operators.
//!
//! Each [`OperatorKind`] is a predicate/transform pair over a single IR value:
//! `can_be_applied` decides whether the instruction behind a [`ValueId`] is a
//! candidate, `apply_mutation` rewrites it in place and hands back an
//! [`AppliedMutation`] token, and `revert_mutation` consumes that token to put
//! the original instruction back.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::Filter;
use crate::ir::{BinaryOp, FunctionId, Instruction, Program, ValueId};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum OperatorKind {
    /// `add` becomes `sub`
    AddToSub,
    /// Comparison predicate is negated
    NegateCondition,
    /// Call without a result is dropped
    RemoveVoidCall,
}

impl OperatorKind {
    pub const ALL: [OperatorKind; 3] = [
        OperatorKind::AddToSub,
        OperatorKind::NegateCondition,
        OperatorKind::RemoveVoidCall,
    ];

    pub fn name(self) -> &'static str {
        match self {
            OperatorKind::AddToSub => "add_to_sub",
            OperatorKind::NegateCondition => "negate_condition",
            OperatorKind::RemoveVoidCall => "remove_void_call",
        }
    }

    /// Pure predicate; safe to call on every value of a program.
    pub fn can_be_applied(self, program: &Program, value: ValueId) -> bool {
        program
            .instruction(value)
            .and_then(|inst| self.replacement(inst))
            .is_some()
    }

    /// Rewrites the instruction behind `value` in place.
    ///
    /// Panics when the operator does not apply at `value`; callers gate on
    /// [`OperatorKind::can_be_applied`].
    pub fn apply_mutation(self, program: &mut Program, value: ValueId) -> AppliedMutation {
        let inst = program
            .instruction_mut(value)
            .unwrap_or_else(|| panic!("{}: no instruction at {value:?}", self.name()));
        let replacement = self
            .replacement(inst)
            .unwrap_or_else(|| panic!("{} cannot be applied to `{inst}`", self.name()));
        let original = std::mem::replace(inst, replacement);
        AppliedMutation {
            kind: self,
            value,
            original,
        }
    }

    /// Restores the instruction recorded in `applied`.
    pub fn revert_mutation(self, program: &mut Program, applied: AppliedMutation) -> ValueId {
        assert_eq!(self, applied.kind, "reverting with a different operator");
        let value = applied.value;
        let inst = program
            .instruction_mut(value)
            .unwrap_or_else(|| panic!("{}: no instruction at {value:?}", self.name()));
        *inst = applied.original;
        value
    }

    fn replacement(self, inst: &Instruction) -> Option<Instruction> {
        match (self, inst) {
            (OperatorKind::AddToSub, Instruction::Binary { kind: BinaryOp::Add, dst, lhs, rhs }) => {
                Some(Instruction::binary(BinaryOp::Sub, *dst, *lhs, *rhs))
            }
            (OperatorKind::NegateCondition, Instruction::Compare { pred, dst, lhs, rhs }) => {
                Some(Instruction::compare(pred.negate(), *dst, *lhs, *rhs))
            }
            (OperatorKind::RemoveVoidCall, Instruction::Call { dst: None, .. }) => Some(Instruction::Nop),
            _ => None,
        }
    }
}

impl fmt::Display for OperatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Proof that a mutation is active; must be handed back to revert it.
#[derive(Debug)]
#[must_use = "an applied mutation has to be reverted"]
pub struct AppliedMutation {
    kind: OperatorKind,
    value: ValueId,
    original: Instruction,
}

impl AppliedMutation {
    pub fn value(&self) -> ValueId {
        self.value
    }

    pub fn original(&self) -> &Instruction {
        &self.original
    }
}

/// One place where one operator can be applied.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MutationPoint {
    pub kind: OperatorKind,
    pub value: ValueId,
    /// Stable across workers: `operator@module::function#index`.
    pub id: String,
    pub function: String,
}

impl MutationPoint {
    pub fn new(program: &Program, kind: OperatorKind, value: ValueId) -> Self {
        let function = program.qualified_name(value.function_id());
        Self {
            kind,
            value,
            id: format!("{}@{}#{}", kind.name(), function, value.index),
            function,
        }
    }
}

/// Scans one function with every operator the filter enables.
pub fn find_mutation_points(program: &Program, function: FunctionId, filter: &Filter) -> Vec<MutationPoint> {
    let Some(body) = program.function(function).map(|f| f.body.len()) else {
        return vec![];
    };
    let operators = filter.enabled_operators();
    let mut points = Vec::new();
    for index in 0..body {
        let value = ValueId::new(function, index);
        for kind in &operators {
            if kind.can_be_applied(program, value) {
                points.push(MutationPoint::new(program, *kind, value));
            }
        }
    }
    points
}

/// Keeps one mutation applied for as long as it lives; dropping it reverts,
/// including during unwinding.
pub struct MutationGuard<'p> {
    program: &'p mut Program,
    applied: Option<AppliedMutation>,
}

impl<'p> MutationGuard<'p> {
    pub fn acquire(program: &'p mut Program, point: &MutationPoint) -> Self {
        let applied = point.kind.apply_mutation(program, point.value);
        Self {
            program,
            applied: Some(applied),
        }
    }

    pub fn program(&self) -> &Program {
        self.program
    }
}

impl Drop for MutationGuard<'_> {
    fn drop(&mut self) {
        if let Some(applied) = self.applied.take() {
            let kind = applied.kind;
            kind.revert_mutation(self.program, applied);
        }
    }
}
