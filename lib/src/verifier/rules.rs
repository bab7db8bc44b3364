//! Structural pre-checks, packaged as a registry
//!
//! Each rule is a pure predicate over the current [`Frame`] and the instruction about to
//! execute. The interpreter consults the whole set before applying a transfer function, so new
//! structural rules can be bolted on without touching the interpreter loop. Type-level checks
//! (operand compatibility, initialization, return conformance) live inside the transfer
//! functions themselves and report through the same [`RuleId`] catalog.

use crate::class_file::ConstantPool;
use crate::code::{BranchInsn, DecodedInsn, Insn, Op};
use crate::errors::{ConstraintViolation, RuleId};
use crate::verifier::frame::Frame;
use crate::verifier::VerifierOptions;

/// What a [`Rule`] gets to look at
pub struct RuleContext<'a> {
    pub frame: &'a Frame,
    pub insn: &'a DecodedInsn,
    pub max_stack: u16,
    pub max_locals: u16,
    pub pool: &'a ConstantPool,
}

/// A named structural constraint
pub trait Rule {
    fn id(&self) -> RuleId;

    /// `None` means the constraint holds for this instruction
    fn check(&self, cx: &RuleContext<'_>) -> Option<ConstraintViolation>;
}

/// The registry of structural rules consulted before every instruction
pub struct RuleSet {
    rules: Vec<Box<dyn Rule>>,
}

impl RuleSet {
    /// The standard rule set; strict monitor checking adds the monitor-exit rule
    pub fn standard(options: &VerifierOptions) -> RuleSet {
        let mut rules: Vec<Box<dyn Rule>> = vec![
            Box::new(LocalIndexBounds),
            Box::new(StackGrowthBounds),
        ];
        if options.strict_monitors {
            rules.push(Box::new(MonitorExitBalance));
        }
        RuleSet { rules }
    }

    /// Register an additional rule
    pub fn add(&mut self, rule: Box<dyn Rule>) {
        self.rules.push(rule);
    }

    /// Run every rule, stopping at the first violation
    pub fn check(&self, cx: &RuleContext<'_>) -> Result<(), ConstraintViolation> {
        for rule in &self.rules {
            if let Some(violation) = rule.check(cx) {
                return Err(violation);
            }
        }
        Ok(())
    }
}

/// Index (plus the paired slot of category-2 accesses) must stay below `max_locals`
pub struct LocalIndexBounds;

/// Which local slots an instruction touches: `(first index, slots)`
fn local_access(op: &Op) -> Option<(u16, u16)> {
    match op {
        Op::Straight(
            Insn::ILoad(index)
            | Insn::FLoad(index)
            | Insn::ALoad(index)
            | Insn::IStore(index)
            | Insn::FStore(index)
            | Insn::AStore(index)
            | Insn::IInc(index, _),
        ) => Some((*index, 1)),
        Op::Straight(
            Insn::LLoad(index) | Insn::DLoad(index) | Insn::LStore(index) | Insn::DStore(index),
        ) => Some((*index, 2)),
        Op::Branch(BranchInsn::Ret(index)) => Some((*index, 1)),
        _ => None,
    }
}

impl Rule for LocalIndexBounds {
    fn id(&self) -> RuleId {
        RuleId::LocalSlotType
    }

    fn check(&self, cx: &RuleContext<'_>) -> Option<ConstraintViolation> {
        let (index, slots) = local_access(&cx.insn.op)?;
        let last = u32::from(index) + u32::from(slots) - 1;
        if last >= u32::from(cx.max_locals) {
            Some(ConstraintViolation::new(
                self.id(),
                cx.insn.offset,
                format!(
                    "local slot {} is outside max_locals {}",
                    last, cx.max_locals
                ),
            ))
        } else {
            None
        }
    }
}

/// Pure pushes with statically-known growth must fit in `max_stack`
pub struct StackGrowthBounds;

/// Slots pushed by instructions that pop nothing
fn static_growth(op: &Op) -> usize {
    match op {
        Op::Straight(
            Insn::AConstNull
            | Insn::IConstM1
            | Insn::IConst0
            | Insn::IConst1
            | Insn::IConst2
            | Insn::IConst3
            | Insn::IConst4
            | Insn::IConst5
            | Insn::FConst0
            | Insn::FConst1
            | Insn::FConst2
            | Insn::BiPush(_)
            | Insn::SiPush(_)
            | Insn::Ldc(_)
            | Insn::ILoad(_)
            | Insn::FLoad(_)
            | Insn::ALoad(_)
            | Insn::New(_),
        ) => 1,
        Op::Straight(
            Insn::LConst0
            | Insn::LConst1
            | Insn::DConst0
            | Insn::DConst1
            | Insn::Ldc2(_)
            | Insn::LLoad(_)
            | Insn::DLoad(_),
        ) => 2,
        Op::Straight(Insn::Dup | Insn::DupX1 | Insn::DupX2) => 1,
        Op::Straight(Insn::Dup2 | Insn::Dup2X1 | Insn::Dup2X2) => 2,
        Op::Branch(BranchInsn::Jsr(_)) => 1,
        _ => 0,
    }
}

impl Rule for StackGrowthBounds {
    fn id(&self) -> RuleId {
        RuleId::StackBounds
    }

    fn check(&self, cx: &RuleContext<'_>) -> Option<ConstraintViolation> {
        let growth = static_growth(&cx.insn.op);
        if growth == 0 {
            return None;
        }
        let depth = cx.frame.stack.offset_len().0;
        if depth + growth > cx.max_stack as usize {
            Some(ConstraintViolation::new(
                self.id(),
                cx.insn.offset,
                format!(
                    "stack depth {} plus {} pushed slots exceeds max_stack {}",
                    depth, growth, cx.max_stack
                ),
            ))
        } else {
            None
        }
    }
}

/// `monitorexit` needs a structurally held monitor (strict mode only)
pub struct MonitorExitBalance;

impl Rule for MonitorExitBalance {
    fn id(&self) -> RuleId {
        RuleId::MonitorBalance
    }

    fn check(&self, cx: &RuleContext<'_>) -> Option<ConstraintViolation> {
        if matches!(cx.insn.op, Op::Straight(Insn::MonitorExit)) && cx.frame.monitors == 0 {
            Some(ConstraintViolation::new(
                self.id(),
                cx.insn.offset,
                "monitorexit with no structurally held monitor",
            ))
        } else {
            None
        }
    }
}
