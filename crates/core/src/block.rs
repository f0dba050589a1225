//! Inline and split compilation of structured blocks.
//!
//! A block compiles inline by default: a frame, a label or two, and the body
//! emitted in place. Blocks the analysis marks as splittable become separate
//! units instead. A split unit receives the block's inputs (plus the `if`
//! condition and a carrier of the locals it reads or writes) as parameters
//! and always returns a block-return record `{tag, payload, locals}`:
//!
//!   * tag `FALLTHROUGH_TAG`: the block ran to its end; `payload` carries
//!     the block outputs.
//!   * tag `RETURN_TAG`: a wasm `return` executed inside; `payload` carries
//!     the function results.
//!   * tag `n >= 0`: a branch targeted the frame `n` non-local levels out;
//!     `payload` carries the branch values. The caller re-dispatches, either
//!     jumping directly or re-tagging one more level out.
//!
//! `locals` always carries the block's written locals; the caller stores
//! them back before looking at the tag.

use crate::analysis::block_bounds;
use crate::backend::{slots, Backend, LocalId, Slot, UnitId};
use crate::branch::{expand_block_type, BlockFrame, FrameKind, FrameLabel};
use crate::compiler::{UnitCompiler, UnitKind};
use crate::cont::Continuations;
use crate::error::CompileError;
use crate::frame::{StackSnapshot, TypeStack};
use crate::marshal::{self, CarrierShape};
use std::collections::BTreeSet;
use wasm_classgen_ir::{FuncType, Inst, ValType};

/// Tag of a block that ran to its end. Matches no dispatch arm: the caller's
/// switch falls through to the output unpacking.
pub const FALLTHROUGH_TAG: i32 = -1;

/// Tag of a wasm `return` crossing unit boundaries.
pub const RETURN_TAG: i32 = -2;

pub(crate) struct ChildOutcome {
    unit: UnitId,
    used_tags: BTreeSet<i32>,
    return_used: bool,
    /// Whether the child emitted a `FALLTHROUGH_TAG` exit at all. When it
    /// did not, every runtime tag is covered by a dispatch arm and the code
    /// after the caller's switch is dead.
    fell_through: bool,
}

impl<B: Backend> UnitCompiler<'_, '_, B> {
    /// Compiles the `block`/`loop`/`if` opening at `offset`; returns the
    /// offset to continue walking at.
    pub(crate) fn compile_block(&mut self, offset: usize) -> anyhow::Result<usize> {
        let func = self.func;
        let (kind, ty) = match &func.body[offset] {
            Inst::Block { ty } => (FrameKind::Block, *ty),
            Inst::Loop { ty } => (FrameKind::Loop, *ty),
            Inst::If { ty } => (FrameKind::If, *ty),
            other => {
                return Err(
                    CompileError::Internal(format!("`{}` is not a block", other.name())).into(),
                )
            }
        };
        let sig = expand_block_type(self.sess.module, ty)?;
        if self.analysis.must_split(self.func_index, offset) {
            self.compile_split(offset, kind, sig)
        } else {
            self.compile_inline(kind, sig)?;
            Ok(offset + 1)
        }
    }

    fn compile_inline(&mut self, kind: FrameKind, sig: FuncType) -> Result<(), CompileError> {
        let mut else_label = None;
        let label = match kind {
            FrameKind::Block | FrameKind::Loop => self.backend.new_label(),
            FrameKind::If => {
                self.types.pop(ValType::I32)?;
                let skip = self.backend.new_label();
                self.backend.branch_if_not(skip);
                else_label = Some(skip);
                self.backend.new_label()
            }
            FrameKind::Else => {
                return Err(CompileError::Internal("else arm is not a block".into()))
            }
        };
        let snapshot = self.types.begin_block(&sig.params)?;
        if kind == FrameKind::Loop {
            self.backend.place_label(label);
        }
        self.frames.push(BlockFrame {
            kind,
            sig,
            label: FrameLabel::Local(label),
            used: false,
            snapshot,
            else_label,
            arm_reachable: false,
        });
        Ok(())
    }

    /// The caller side of a split block: marshal the entry state, invoke the
    /// child unit, write locals back, and dispatch on the returned tag.
    fn compile_split(
        &mut self,
        offset: usize,
        kind: FrameKind,
        sig: FuncType,
    ) -> anyhow::Result<usize> {
        let func = self.func;
        let (_, end) = block_bounds(&func.body, offset)
            .ok_or_else(|| CompileError::Internal("unterminated block".into()))?;
        let read = self.analysis.locals_read(self.func_index, offset);
        let written = self.analysis.locals_written(self.func_index, offset);

        if kind == FrameKind::If {
            self.types.pop(ValType::I32)?;
        }
        for ty in sig.params.iter().rev() {
            self.types.pop(*ty)?;
        }

        // Entry carrier: every local the block touches rides in with its
        // current value, highest index deepest. Written locals need their
        // incoming value too: an exit path that skips the write must hand
        // the caller's value back unchanged.
        let mut entry: BTreeSet<u32> = read.iter().copied().collect();
        entry.extend(written.iter().copied());
        let entry: Vec<u32> = entry.into_iter().collect();
        let entry_tys: Vec<ValType> = entry
            .iter()
            .map(|index| self.types.local(*index))
            .collect::<Result<_, _>>()?;
        self.backend.carrier_new(&CarrierShape::of_types(&entry_tys));
        for (i, index) in entry.iter().enumerate().rev() {
            let id = self.wasm_local(*index)?;
            self.backend.load_local(id);
            self.backend.carrier_put(Slot::of(entry_tys[i]));
        }

        let mut params = slots(&sig.params);
        if kind == FrameKind::If {
            params.push(Slot::Int);
        }
        params.push(Slot::Ref);

        let pause = if self.cont.enabled {
            let live = self.types.operands().to_vec();
            let (resume_entry, pause) = self.new_cut_point(live, Vec::new(), params.clone());
            self.backend.place_label(resume_entry);
            Some(pause)
        } else {
            None
        };

        let outcome = self.compile_child(offset, end, kind, &sig, read, written.clone(), &params)?;
        self.backend.call_unit(outcome.unit, &params, Some(Slot::Ref));
        if let Some(pause) = pause {
            self.backend.branch_if_paused(pause);
        }
        let ret = self.backend.alloc_local(Slot::Ref);
        self.backend.store_local(ret);

        // Locals written inside the block come back on every exit path.
        self.backend.load_local(ret);
        self.backend.blockret_locals();
        for index in &written {
            let ty = self.types.local(*index)?;
            let id = self.wasm_local(*index)?;
            self.backend.carrier_take(Slot::of(ty));
            self.backend.store_local(id);
        }
        self.backend.drop_value(Slot::Ref);

        let mut arms = Vec::new();
        for tag in &outcome.used_tags {
            arms.push((*tag, self.backend.new_label()));
        }
        if outcome.return_used {
            arms.push((RETURN_TAG, self.backend.new_label()));
        }
        if !arms.is_empty() {
            self.backend.load_local(ret);
            self.backend.blockret_tag();
            let fall = self.backend.new_label();
            self.backend.switch(&arms, fall);
            for (tag, label) in &arms {
                self.backend.place_label(*label);
                if *tag == RETURN_TAG {
                    self.emit_propagated_return(ret)?;
                } else {
                    self.emit_dispatch_arm(*tag as usize, ret)?;
                }
            }
            self.backend.place_label(fall);
        }

        if outcome.fell_through {
            // Fallthrough: the block's outputs continue in place.
            self.backend.load_local(ret);
            self.backend.blockret_payload();
            marshal::unpack(self.backend, &sig.results);
            for ty in sig.results.iter() {
                self.types.push(*ty);
            }
        } else {
            // The switch default is never taken at runtime; code after it is
            // as dead as the instructions after the block's end would be
            // inline.
            self.types.mark_unreachable();
        }
        self.backend.free_local(ret);
        Ok(end + 1)
    }

    fn compile_child(
        &mut self,
        offset: usize,
        end: usize,
        kind: FrameKind,
        sig: &FuncType,
        read: Vec<u32>,
        written: Vec<u32>,
        params: &[Slot],
    ) -> anyhow::Result<ChildOutcome> {
        let name = self.sess.names.unit(&format!("{} block {offset}", self.name));
        log::debug!(
            "splitting `{}` at offset {offset} into unit `{name}`",
            self.name
        );
        let mirrors: Vec<BlockFrame<B::Label>> = self
            .frames
            .iter()
            .map(|frame| BlockFrame {
                kind: frame.kind,
                sig: frame.sig.clone(),
                label: FrameLabel::NonLocal,
                used: false,
                snapshot: StackSnapshot::bottom(),
                else_label: None,
                arm_reachable: false,
            })
            .collect();
        let base_frames = mirrors.len();
        let local_tys = self.types.local_types().to_vec();
        let local_count = self.locals.len();
        let results = self.results.clone();
        let continuations = self.cont.enabled;

        let unit = self.backend.begin_unit(&name, params, Some(Slot::Ref));
        let outcome = {
            let mut child = UnitCompiler {
                sess: &mut *self.sess,
                backend: &mut *self.backend,
                analysis: self.analysis,
                func_index: self.func_index,
                func: self.func,
                results,
                types: TypeStack::new(local_tys),
                frames: mirrors,
                base_frames,
                cont: Continuations::new(continuations),
                locals: vec![None; local_count],
                kind: UnitKind::Split {
                    read,
                    written,
                    kind,
                    outputs: sig.results.to_vec(),
                },
                used_tags: BTreeSet::new(),
                return_used: false,
                name,
            };
            child.compile_split_body(offset, end, sig)?;
            // Reachable after the outermost `end` means a fallthrough exit
            // was emitted.
            let fell_through = child.types.is_reachable();
            ChildOutcome {
                unit,
                used_tags: child.used_tags,
                return_used: child.return_used,
                fell_through,
            }
        };
        self.backend.end_unit();
        Ok(outcome)
    }

    /// The child side of a split block: restore entry state from the
    /// parameters, compile the body, and cap it with the continuation
    /// trailer.
    fn compile_split_body(
        &mut self,
        offset: usize,
        end: usize,
        sig: &FuncType,
    ) -> anyhow::Result<()> {
        self.emit_resume_prologue();
        let UnitKind::Split {
            read,
            written,
            kind,
            ..
        } = &self.kind
        else {
            return Err(CompileError::Internal("split body in a function unit".into()).into());
        };
        let kind = *kind;
        let mut touched: BTreeSet<u32> = read.iter().copied().collect();
        touched.extend(written.iter().copied());

        for index in &touched {
            let ty = self.types.local(*index)?;
            self.locals[*index as usize] = Some(self.backend.alloc_local(Slot::of(ty)));
        }

        let mut param_count = sig.params.len();
        if kind == FrameKind::If {
            param_count += 1;
        }
        let entry_carrier = param_count as LocalId;
        self.backend.load_local(entry_carrier);
        for index in &touched {
            let ty = self.types.local(*index)?;
            self.backend.carrier_take(Slot::of(ty));
            let id = self.wasm_local(*index)?;
            self.backend.store_local(id);
        }
        self.backend.drop_value(Slot::Ref);

        // The block's inputs re-materialize from the leading parameters.
        for (i, ty) in sig.params.iter().enumerate() {
            self.backend.load_local(i as LocalId);
            self.types.push(*ty);
        }

        let mut else_label = None;
        let label = match kind {
            FrameKind::Block | FrameKind::Loop => self.backend.new_label(),
            FrameKind::If => {
                let skip = self.backend.new_label();
                self.backend.load_local(sig.params.len() as LocalId);
                self.backend.branch_if_not(skip);
                else_label = Some(skip);
                self.backend.new_label()
            }
            FrameKind::Else => {
                return Err(CompileError::Internal("else arm is not a block".into()).into())
            }
        };
        let snapshot = self.types.begin_block(&sig.params)?;
        if kind == FrameKind::Loop {
            self.backend.place_label(label);
        }
        self.frames.push(BlockFrame {
            kind,
            sig: sig.clone(),
            label: FrameLabel::Local(label),
            used: false,
            snapshot,
            else_label,
            arm_reachable: false,
        });

        self.compile_range(offset + 1, end + 1)?;
        self.emit_cont_trailer()?;
        Ok(())
    }

    /// One arm of the caller-side tag dispatch: the returned payload is a
    /// branch to the frame `tag` levels up this unit's frame stack.
    fn emit_dispatch_arm(&mut self, tag: usize, ret: LocalId) -> Result<(), CompileError> {
        let target = self
            .frames
            .len()
            .checked_sub(1 + tag)
            .ok_or(CompileError::ProtocolMisuse)?;
        let arity = self.frames[target].branch_arity().to_vec();
        match self.frames[target].label {
            FrameLabel::Local(label) => {
                self.frames[target].used = true;
                self.backend.load_local(ret);
                self.backend.blockret_payload();
                marshal::unpack(self.backend, &arity);
                if self.frames[target].kind == FrameKind::Loop {
                    // This jump is the loop's back-edge for branches that
                    // originated inside the split unit.
                    let mut live = self.types.operands().to_vec();
                    live.extend_from_slice(&arity);
                    self.emit_pause_check(live);
                }
                let base = self.frames[target].snapshot.depth();
                let mut above = self.types.operands()[base..].to_vec();
                above.extend_from_slice(&arity);
                marshal::unwind(self.backend, &above, arity.len());
                self.backend.jump(label);
            }
            FrameLabel::NonLocal => {
                // Still not ours: pass the payload along, re-tagged for the
                // next unit out.
                let retag = self.frames[target + 1..]
                    .iter()
                    .filter(|frame| frame.is_non_local())
                    .count() as i32;
                self.used_tags.insert(retag);
                self.backend.const_i32(retag);
                self.backend.load_local(ret);
                self.backend.blockret_payload();
                self.pack_written_locals()?;
                self.backend.blockret_new();
                self.backend.ret();
            }
        }
        Ok(())
    }

    /// Caller-side arm for `RETURN_TAG`: unwind the function return through
    /// this unit.
    fn emit_propagated_return(&mut self, ret: LocalId) -> Result<(), CompileError> {
        if matches!(self.kind, UnitKind::Function) {
            match self.results.len() {
                0 => self.backend.ret(),
                1 => {
                    let results = self.results.clone();
                    self.backend.load_local(ret);
                    self.backend.blockret_payload();
                    marshal::unpack(self.backend, &results);
                    self.backend.ret();
                }
                // Multi-value payloads already use the function's own result
                // carrier convention.
                _ => {
                    self.backend.load_local(ret);
                    self.backend.blockret_payload();
                    self.backend.ret();
                }
            }
        } else {
            self.return_used = true;
            self.backend.const_i32(RETURN_TAG);
            self.backend.load_local(ret);
            self.backend.blockret_payload();
            self.pack_written_locals()?;
            self.backend.blockret_new();
            self.backend.ret();
        }
        Ok(())
    }

    /// A branch whose target frame belongs to an enclosing unit: exit this
    /// unit through the block-return protocol. The physical stack below the
    /// branch values dies with the invocation.
    pub(crate) fn emit_nonlocal_branch(&mut self, target: usize) -> Result<(), CompileError> {
        if matches!(self.kind, UnitKind::Function) {
            return Err(CompileError::ProtocolMisuse);
        }
        let arity = self.frames[target].branch_arity().to_vec();
        let tag = self.frames[target + 1..]
            .iter()
            .filter(|frame| frame.is_non_local())
            .count() as i32;
        self.used_tags.insert(tag);
        marshal::pack(self.backend, &arity);
        self.backend.const_i32(tag);
        self.backend.swap(Slot::Int, Slot::Ref);
        self.pack_written_locals()?;
        self.backend.blockret_new();
        self.backend.ret();
        Ok(())
    }

    /// Unit fallthrough for a split block: tag `FALLTHROUGH_TAG`, outputs in
    /// the payload.
    pub(crate) fn emit_split_fallthrough(&mut self) -> Result<(), CompileError> {
        let UnitKind::Split { outputs, .. } = &self.kind else {
            return Err(CompileError::Internal(
                "split fallthrough in a function unit".into(),
            ));
        };
        let outputs = outputs.clone();
        marshal::pack(self.backend, &outputs);
        self.backend.const_i32(FALLTHROUGH_TAG);
        self.backend.swap(Slot::Int, Slot::Ref);
        self.pack_written_locals()?;
        self.backend.blockret_new();
        self.backend.ret();
        Ok(())
    }

    /// Builds the written-locals carrier every split-unit exit carries,
    /// highest index deepest.
    pub(crate) fn pack_written_locals(&mut self) -> Result<(), CompileError> {
        let UnitKind::Split { written, .. } = &self.kind else {
            return Err(CompileError::ProtocolMisuse);
        };
        let written = written.clone();
        let tys: Vec<ValType> = written
            .iter()
            .map(|index| self.types.local(*index))
            .collect::<Result<_, _>>()?;
        self.backend.carrier_new(&CarrierShape::of_types(&tys));
        for (i, index) in written.iter().enumerate().rev() {
            let id = self.wasm_local(*index)?;
            self.backend.load_local(id);
            self.backend.carrier_put(Slot::of(tys[i]));
        }
        Ok(())
    }
}
