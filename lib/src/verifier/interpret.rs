//! The fixed-point data-flow pass over basic blocks
//!
//! One frame is kept per reachable block entry. Blocks come off the worklist lowest offset
//! first, so the first violation reported is deterministic for a given class file. A block's
//! frame is pushed through its instructions by the transfer functions; the resulting frame flows
//! along every outgoing edge and is merged into the successor's entry frame, re-queueing the
//! successor when the merge widened anything. Merges only ever lose information (references
//! widen toward `java/lang/Object`, conflicting locals become unusable), and the lattice height
//! is bounded by `max_locals + max_stack`, so the pass terminates.

use crate::access_flags::MethodAccessFlags;
use crate::class_file::{ClassFile, Code, Method};
use crate::code::{build_flow, BranchInsn, DecodedInsn, FlowGraph, Op, Terminator};
use crate::descriptors::{MethodDescriptor, ParseDescriptor};
use crate::errors::{ConstraintViolation, RuleId};
use crate::verifier::frame::{Frame, MethodContext};
use crate::verifier::rules::{RuleContext, RuleSet};
use crate::verifier::types::{VerificationType, JAVA_LANG_THROWABLE};
use crate::verifier::VerifierOptions;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

/// Verify one method body against its class
pub(crate) fn verify_method_code(
    class: &ClassFile,
    method: &Method,
    code: &Code,
    options: &VerifierOptions,
) -> Result<(), ConstraintViolation> {
    let flow = build_flow(code)?;

    let descriptor = MethodDescriptor::<String>::parse(&method.descriptor).map_err(|_| {
        ConstraintViolation::new(
            RuleId::ConstantPoolType,
            0,
            format!("method descriptor '{}' does not parse", method.descriptor),
        )
    })?;

    let cx = MethodContext {
        pool: &class.constants,
        class_name: class.this_class_name(),
        super_name: class.super_class_name(),
        method_name: &method.name,
        return_type: descriptor.return_type.clone(),
        max_stack: code.max_stack,
        max_locals: code.max_locals,
        strict_monitors: options.strict_monitors,
    };
    let rules = RuleSet::standard(options);

    let is_static = method.access_flags.contains(MethodAccessFlags::STATIC);
    let entry_frame = Frame::initial(is_static, &descriptor, &cx)?;

    let mut interpreter = Interpreter {
        flow: &flow,
        cx: &cx,
        rules: &rules,
        in_frames: BTreeMap::new(),
        worklist: BTreeSet::new(),
    };
    interpreter.in_frames.insert(0, entry_frame);
    interpreter.worklist.insert(0);
    interpreter.run()
}

struct Interpreter<'a> {
    flow: &'a FlowGraph,
    cx: &'a MethodContext<'a>,
    rules: &'a RuleSet,

    /// Frame at the entry of every block reached so far
    in_frames: BTreeMap<u32, Frame>,

    /// Blocks whose entry frame changed since they were last interpreted
    worklist: BTreeSet<u32>,
}

impl Interpreter<'_> {
    fn run(&mut self) -> Result<(), ConstraintViolation> {
        while let Some(start) = self.worklist.iter().next().copied() {
            self.worklist.remove(&start);
            self.interpret_block(start)?;
        }
        Ok(())
    }

    fn interpret_block(&mut self, start: u32) -> Result<(), ConstraintViolation> {
        let flow = self.flow;
        let block = match flow.blocks.get(&start) {
            Some(block) => block,
            None => return Ok(()),
        };
        let mut frame = match self.in_frames.get(&start) {
            Some(frame) => frame.clone(),
            None => return Ok(()),
        };

        for insn in &block.insns {
            // The frame *before* the instruction is what an exception handler would see
            self.exception_edges(insn.offset, &frame)?;
            self.check_rules(&frame, insn)?;
            if let Op::Straight(straight) = &insn.op {
                frame.execute(straight, insn.offset, self.cx)?;
            }
        }

        match &block.terminator {
            Terminator::Branch {
                insn: branch,
                offset,
                width,
            } => {
                self.exception_edges(*offset, &frame)?;
                let terminator = DecodedInsn {
                    offset: *offset,
                    width: *width,
                    op: Op::Branch(branch.clone()),
                };
                self.check_rules(&frame, &terminator)?;
                frame.execute_branch(branch, *offset, self.cx)?;
                self.branch_edges(branch, *offset, *width, frame)
            }
            Terminator::FallThrough { next } => self.propagate(*next, frame),
            Terminator::FallOff { offset } => Err(ConstraintViolation::new(
                RuleId::ReturnType,
                *offset,
                "execution can fall off the end of the code array",
            )),
        }
    }

    fn check_rules(
        &self,
        frame: &Frame,
        insn: &DecodedInsn,
    ) -> Result<(), ConstraintViolation> {
        self.rules.check(&RuleContext {
            frame,
            insn,
            max_stack: self.cx.max_stack,
            max_locals: self.cx.max_locals,
            pool: self.cx.pool,
        })
    }

    /// Propagate the frame after a terminator along its outgoing edges
    fn branch_edges(
        &mut self,
        branch: &BranchInsn,
        offset: u32,
        width: u32,
        frame: Frame,
    ) -> Result<(), ConstraintViolation> {
        use BranchInsn::*;

        match branch {
            If(_, target) | IfICmp(_, target) | IfACmp(_, target) | IfNull(_, target) => {
                self.propagate(*target, frame.clone())?;
                let next = offset + width;
                if !self.flow.blocks.contains_key(&next) {
                    return Err(ConstraintViolation::new(
                        RuleId::ReturnType,
                        offset,
                        "execution can fall off the end of the code array",
                    ));
                }
                self.propagate(next, frame)
            }
            Goto(target) => self.propagate(*target, frame),
            TableSwitch {
                default, targets, ..
            } => {
                for target in targets {
                    self.propagate(*target, frame.clone())?;
                }
                self.propagate(*default, frame)
            }
            LookupSwitch { default, targets } => {
                for (_, target) in targets {
                    self.propagate(*target, frame.clone())?;
                }
                self.propagate(*default, frame)
            }
            Jsr(target) => {
                let mut subroutine_frame = frame;
                subroutine_frame.enter_subroutine(*target, self.cx, offset)?;
                self.propagate(*target, subroutine_frame)
            }
            Ret(index) => {
                let flow = self.flow;
                let mut frame = frame;
                let entry = frame.exit_subroutine(*index, offset)?;
                let sites = flow.return_sites.get(&entry).ok_or_else(|| {
                    ConstraintViolation::new(
                        RuleId::Subroutine,
                        offset,
                        format!("no jsr ever calls the subroutine at {}", entry),
                    )
                })?;
                for site in sites {
                    if !flow.blocks.contains_key(site) {
                        return Err(ConstraintViolation::new(
                            RuleId::ReturnType,
                            offset,
                            "execution can fall off the end of the code array",
                        ));
                    }
                    self.propagate(*site, frame.clone())?;
                }
                Ok(())
            }
            IReturn | LReturn | FReturn | DReturn | AReturn | Return | AThrow => Ok(()),
        }
    }

    /// Flow the state before an instruction into every handler protecting it
    fn exception_edges(
        &mut self,
        offset: u32,
        frame: &Frame,
    ) -> Result<(), ConstraintViolation> {
        let flow = self.flow;
        let cx = self.cx;
        for handler in &flow.handlers {
            if !handler.covers(offset) {
                continue;
            }

            if cx.max_stack < 1 {
                return Err(ConstraintViolation::new(
                    RuleId::StackBounds,
                    offset,
                    "exception handler entry needs one stack slot but max_stack is 0",
                ));
            }
            let caught = if handler.catch_type == 0 {
                JAVA_LANG_THROWABLE
            } else {
                cx.pool.class_name(handler.catch_type).ok_or_else(|| {
                    ConstraintViolation::new(
                        RuleId::ConstantPoolType,
                        offset,
                        format!(
                            "exception catch type index {} is {}, expected Class",
                            handler.catch_type,
                            cx.pool.describe(handler.catch_type)
                        ),
                    )
                })?
            };

            // The handler starts from this point's locals with just the exception on the stack
            let mut handler_frame = frame.clone();
            handler_frame.stack.clear();
            handler_frame
                .stack
                .push(VerificationType::object(caught));
            self.propagate(handler.handler, handler_frame)?;
        }
        Ok(())
    }

    /// Merge a frame into a successor's entry, re-queueing it if anything widened
    fn propagate(&mut self, target: u32, frame: Frame) -> Result<(), ConstraintViolation> {
        match self.in_frames.entry(target) {
            Entry::Vacant(vacant) => {
                vacant.insert(frame);
                self.worklist.insert(target);
            }
            Entry::Occupied(mut occupied) => {
                let changed =
                    occupied
                        .get_mut()
                        .merge_from(&frame, target, self.cx.strict_monitors)?;
                if changed {
                    self.worklist.insert(target);
                }
            }
        }
        Ok(())
    }
}
