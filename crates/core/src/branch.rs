//! Control frames and branch lowering.
//!
//! Every open `block`/`loop`/`if` is a [`BlockFrame`]. A branch resolves its
//! relative depth against the frame stack and either jumps to the frame's
//! label (when the target lives in the unit being emitted) or, for frames
//! owned by an enclosing unit, exits through the block-return protocol in
//! `block.rs`.

use crate::backend::Backend;
use crate::compiler::UnitCompiler;
use crate::error::CompileError;
use crate::frame::StackSnapshot;
use crate::marshal;
use wasm_classgen_ir::{BlockType, FuncType, Module, ValType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FrameKind {
    Block,
    Loop,
    If,
    /// An `if` whose `else` has been seen; the frame is reused for the else
    /// arm.
    Else,
}

/// Where a branch to a frame lands.
#[derive(Debug, Clone, Copy)]
pub(crate) enum FrameLabel<L> {
    /// The frame belongs to the unit being emitted: a loop's head or a
    /// block's exit.
    Local(L),
    /// The frame belongs to an enclosing unit; branches exit through the
    /// block-return protocol.
    NonLocal,
}

#[derive(Debug)]
pub(crate) struct BlockFrame<L> {
    pub kind: FrameKind,
    /// The expanded signature of the block.
    pub sig: FuncType,
    pub label: FrameLabel<L>,
    /// Whether any branch targeted this frame.
    pub used: bool,
    /// Stack depth underneath the block's inputs.
    pub snapshot: StackSnapshot,
    /// Exit of the false arm; `Some` only while `kind` is `If`.
    pub else_label: Option<L>,
    /// Whether the then arm fell through to `else`; set when the arm is
    /// switched.
    pub arm_reachable: bool,
}

impl<L> BlockFrame<L> {
    /// The values a branch to this frame carries: a loop restarts with its
    /// inputs, everything else exits with its outputs.
    pub fn branch_arity(&self) -> &[ValType] {
        if self.kind == FrameKind::Loop {
            &self.sig.params
        } else {
            &self.sig.results
        }
    }

    pub fn is_non_local(&self) -> bool {
        matches!(self.label, FrameLabel::NonLocal)
    }
}

/// Expands a block-type immediate into a full signature.
pub(crate) fn expand_block_type(module: &Module, ty: BlockType) -> Result<FuncType, CompileError> {
    match ty {
        BlockType::Empty => Ok(FuncType::new([], [])),
        BlockType::Value(ty) => Ok(FuncType::new([], [ty])),
        BlockType::Func(index) => module
            .ty(index)
            .cloned()
            .ok_or_else(|| CompileError::Internal(format!("block type index {index} out of range"))),
    }
}

impl<B: Backend> UnitCompiler<'_, '_, B> {
    /// The frame-stack index for a branch of relative depth `depth`.
    pub(crate) fn resolve_branch(&self, depth: u32) -> Result<usize, CompileError> {
        self.frames
            .len()
            .checked_sub(1 + depth as usize)
            .ok_or(CompileError::InvalidBranch {
                depth,
                max: self.frames.len(),
            })
    }

    pub(crate) fn emit_br(&mut self, depth: u32) -> Result<(), CompileError> {
        let target = self.resolve_branch(depth)?;
        self.emit_branch_body(target)?;
        self.types.mark_unreachable();
        Ok(())
    }

    pub(crate) fn emit_br_if(&mut self, depth: u32) -> Result<(), CompileError> {
        self.types.pop(ValType::I32)?;
        let target = self.resolve_branch(depth)?;
        let frame = &self.frames[target];
        let arity = frame.branch_arity();
        self.types.check_top(arity)?;

        // When the branch needs no unwinding and no instrumentation, the
        // conditional jump goes straight to the target label.
        let base = frame.snapshot.depth();
        let exact = self.types.operands().len() == base + arity.len();
        let instrumented_edge = frame.kind == FrameKind::Loop && self.cont.enabled;
        if let FrameLabel::Local(label) = frame.label {
            if exact && !instrumented_edge {
                self.frames[target].used = true;
                self.backend.branch_if(label);
                return Ok(());
            }
        }

        let fallthrough = self.backend.new_label();
        self.backend.branch_if_not(fallthrough);
        self.emit_branch_body(target)?;
        self.backend.place_label(fallthrough);
        Ok(())
    }

    pub(crate) fn emit_br_table(
        &mut self,
        targets: &[u32],
        default: u32,
    ) -> Result<(), CompileError> {
        self.types.pop(ValType::I32)?;
        let default_frame = self.resolve_branch(default)?;
        let arity = self.frames[default_frame].branch_arity().to_vec();
        self.types.check_top(&arity)?;

        // All targets must agree on arity; validated input guarantees it,
        // but a mismatch here would silently corrupt the stack.
        let mut resolved = Vec::with_capacity(targets.len());
        for depth in targets {
            let frame = self.resolve_branch(*depth)?;
            let other = self.frames[frame].branch_arity();
            if other != arity {
                return Err(CompileError::StackMismatch {
                    expected: arity.len(),
                    found: other.len(),
                });
            }
            resolved.push(frame);
        }

        let mut arms = Vec::with_capacity(resolved.len());
        for (index, _) in resolved.iter().enumerate() {
            arms.push((index as i32, self.backend.new_label()));
        }
        let default_stub = self.backend.new_label();
        self.backend.switch(&arms, default_stub);
        for ((_, stub), frame) in arms.iter().zip(&resolved) {
            self.backend.place_label(*stub);
            self.emit_branch_body(*frame)?;
        }
        self.backend.place_label(default_stub);
        self.emit_branch_body(default_frame)?;
        self.types.mark_unreachable();
        Ok(())
    }

    /// Emits the unconditional transfer to `target`, leaving the abstract
    /// stack untouched so callers can emit several transfers from the same
    /// state (`br_table`) or continue on a fallthrough path (`br_if`).
    pub(crate) fn emit_branch_body(&mut self, target: usize) -> Result<(), CompileError> {
        let arity = self.frames[target].branch_arity().to_vec();
        self.types.check_top(&arity)?;
        self.frames[target].used = true;

        if self.frames[target].kind == FrameKind::Loop {
            if let FrameLabel::Local(_) = self.frames[target].label {
                // Loop back-edges are the suspension points of call-free
                // loops.
                let live = self.types.operands().to_vec();
                self.emit_pause_check(live);
            }
        }

        match self.frames[target].label {
            FrameLabel::Local(label) => {
                let base = self.frames[target].snapshot.depth();
                let above = self.types.operands()[base..].to_vec();
                marshal::unwind(self.backend, &above, arity.len());
                self.backend.jump(label);
                Ok(())
            }
            FrameLabel::NonLocal => self.emit_nonlocal_branch(target),
        }
    }
}
