//! Split a method's instruction stream into basic blocks
//!
//! A JVM method body is a linear sequence of basic blocks: straight-line instructions closed by
//! one terminator. Blocks begin at offset 0, at every jump target, at every exception handler
//! entry, and right after every terminator. The builder also enforces the structural constraints
//! that don't need type information: the code array size limit and the rule that every branch or
//! handler target must land exactly on an instruction boundary, never inside the operand bytes of
//! a multi-byte (or `wide`-modified) instruction.

use crate::class_file::Code;
use crate::code::{decode, BranchInsn, DecodedInsn, Op};
use crate::errors::{ConstraintViolation, RuleId};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Code arrays must fit in a `u16` offset space
pub const MAX_CODE_LENGTH: usize = 65536;

/// How a basic block ends
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Terminator {
    /// An explicit branch, return, throw, switch, `jsr`, or `ret`
    Branch {
        insn: BranchInsn,
        offset: u32,
        width: u32,
    },

    /// The next instruction is a jump target, so the block ends here implicitly
    FallThrough { next: u32 },

    /// The block's last instruction is straight-line and there is no instruction after it; if
    /// this block is ever reached, execution would run off the end of the code array
    FallOff { offset: u32 },
}

/// Contiguous instruction range with a single entry point
#[derive(Debug, Clone)]
pub struct BasicBlock {
    /// Offset of the first instruction
    pub start: u32,

    /// Straight-line instructions in the block (terminator excluded)
    pub insns: Vec<DecodedInsn>,

    pub terminator: Terminator,
}

/// One exception-table entry, in code-array offsets
#[derive(Debug, Clone, Copy)]
pub struct HandlerInfo {
    /// Protected range (start inclusive, end exclusive)
    pub start: u32,
    pub end: u32,

    /// Handler entry point (always a block start)
    pub handler: u32,

    /// `Class` pool index of the caught type; 0 catches everything
    pub catch_type: u16,
}

impl HandlerInfo {
    pub fn covers(&self, offset: u32) -> bool {
        self.start <= offset && offset < self.end
    }
}

/// Basic blocks plus the successor structure of one method body
#[derive(Debug, Clone)]
pub struct FlowGraph {
    /// Blocks keyed by start offset; iteration order is code order
    pub blocks: BTreeMap<u32, BasicBlock>,

    pub handlers: Vec<HandlerInfo>,

    /// For each `jsr` subroutine entry, the offsets just after each `jsr` that calls it.
    /// A `ret` exiting that subroutine continues at all of them.
    pub return_sites: HashMap<u32, Vec<u32>>,

    pub code_len: u32,
}

/// Decode a `Code` attribute and split it into basic blocks
pub fn build_flow(code: &Code) -> Result<FlowGraph, ConstraintViolation> {
    if code.bytecode.len() >= MAX_CODE_LENGTH {
        return Err(ConstraintViolation::new(
            RuleId::CodeTooLarge,
            0,
            format!(
                "code array is {} bytes, limit is {}",
                code.bytecode.len(),
                MAX_CODE_LENGTH - 1
            ),
        ));
    }
    let code_len = code.bytecode.len() as u32;

    let decoded = decode(&code.bytecode)?;

    let boundaries: BTreeSet<u32> = decoded.iter().map(|insn| insn.offset).collect();
    let mut leaders: BTreeSet<u32> = BTreeSet::new();
    leaders.insert(0);

    let mut return_sites: HashMap<u32, Vec<u32>> = HashMap::new();

    for insn in &decoded {
        if let Op::Branch(branch) = &insn.op {
            for target in branch.jump_targets() {
                if !boundaries.contains(&target) {
                    return Err(ConstraintViolation::new(
                        RuleId::IllegalBranchTarget,
                        insn.offset,
                        format!("branch target {} is inside an instruction", target),
                    ));
                }
                leaders.insert(target);
            }
            if let BranchInsn::Jsr(target) = branch {
                let site = insn.next_offset();
                return_sites.entry(*target).or_default().push(site);
                if site < code_len {
                    leaders.insert(site);
                }
            }
            let next = insn.next_offset();
            if next < code_len {
                leaders.insert(next);
            }
        }
    }

    let mut handlers = Vec::with_capacity(code.exception_table.len());
    for entry in &code.exception_table {
        let (start, end, handler) = (
            u32::from(entry.start_pc),
            u32::from(entry.end_pc),
            u32::from(entry.handler_pc),
        );
        if start >= end || end > code_len || !boundaries.contains(&start) {
            return Err(ConstraintViolation::new(
                RuleId::IllegalBranchTarget,
                start,
                format!("invalid exception range [{}, {})", start, end),
            ));
        }
        if end < code_len && !boundaries.contains(&end) {
            return Err(ConstraintViolation::new(
                RuleId::IllegalBranchTarget,
                start,
                format!("exception range end {} is inside an instruction", end),
            ));
        }
        if !boundaries.contains(&handler) {
            return Err(ConstraintViolation::new(
                RuleId::IllegalBranchTarget,
                handler,
                format!("exception handler target {} is inside an instruction", handler),
            ));
        }
        leaders.insert(handler);
        handlers.push(HandlerInfo {
            start,
            end,
            handler,
            catch_type: entry.catch_type,
        });
    }

    let mut blocks: BTreeMap<u32, BasicBlock> = BTreeMap::new();
    let mut start: u32 = 0;
    let mut insns: Vec<DecodedInsn> = vec![];
    let mut open = false;

    for insn in decoded {
        if open && leaders.contains(&insn.offset) {
            blocks.insert(
                start,
                BasicBlock {
                    start,
                    insns: std::mem::take(&mut insns),
                    terminator: Terminator::FallThrough { next: insn.offset },
                },
            );
            open = false;
        }
        if !open {
            start = insn.offset;
            open = true;
        }

        let (offset, width) = (insn.offset, insn.width);
        match insn.op {
            Op::Straight(straight) => insns.push(DecodedInsn {
                offset,
                width,
                op: Op::Straight(straight),
            }),
            Op::Branch(branch) => {
                blocks.insert(
                    start,
                    BasicBlock {
                        start,
                        insns: std::mem::take(&mut insns),
                        terminator: Terminator::Branch {
                            insn: branch,
                            offset,
                            width,
                        },
                    },
                );
                open = false;
            }
        }
    }

    if open {
        let last_offset = insns.last().map(|insn| insn.offset).unwrap_or(start);
        blocks.insert(
            start,
            BasicBlock {
                start,
                insns,
                terminator: Terminator::FallOff {
                    offset: last_offset,
                },
            },
        );
    }

    Ok(FlowGraph {
        blocks,
        handlers,
        return_sites,
        code_len,
    })
}
