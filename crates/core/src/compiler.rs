//! The compilation driver.
//!
//! A [`Session`] compiles the defined functions of one module, one unit per
//! function plus one per split block. [`UnitCompiler`] owns the state of a
//! single unit while its instructions are walked: the abstract stack, the
//! frame stack, the wasm-local-to-backend-local mapping, and the
//! continuation bookkeeping.

use crate::analysis::BlockAnalysis;
use crate::backend::{slots, Backend, LocalId, Slot, TrapReason, UnitId};
use crate::block::RETURN_TAG;
use crate::branch::{BlockFrame, FrameKind, FrameLabel};
use crate::cont::Continuations;
use crate::error::CompileError;
use crate::frame::TypeStack;
use crate::marshal;
use crate::names::Names;
use crate::Opts;
use anyhow::{anyhow, Context, Result};
use std::collections::BTreeSet;
use wasm_classgen_ir::{FuncType, Function, Inst, Module, ValType, MAX_LOCALS};

/// The return-value category of a signature: none, the single result's
/// category, or a carrier reference for multi-value results.
pub(crate) fn ret_slot(results: &[ValType]) -> Option<Slot> {
    match results {
        [] => None,
        [ty] => Some(Slot::of(*ty)),
        _ => Some(Slot::Ref),
    }
}

/// Compiles functions of one module against one backend, keeping unit names
/// unique across the whole run.
pub struct Session<'a> {
    pub(crate) module: &'a Module,
    pub(crate) opts: Opts,
    pub(crate) names: Names,
}

impl<'a> Session<'a> {
    pub fn new(module: &'a Module, opts: Opts) -> Session<'a> {
        Session {
            module,
            opts,
            names: Names::default(),
        }
    }

    pub fn module(&self) -> &'a Module {
        self.module
    }

    /// Compiles the function at `index` in the function index space into a
    /// unit (plus one unit per split block), returning the function's unit.
    pub fn compile_function<'s, B: Backend>(
        &'s mut self,
        index: u32,
        backend: &'s mut B,
        analysis: &'s dyn BlockAnalysis,
    ) -> Result<UnitId> {
        let module = self.module;
        let func = module
            .defined_func(index)
            .ok_or_else(|| anyhow!("function {index} is not defined in this module"))?;
        let sig = module
            .ty(func.ty)
            .ok_or_else(|| anyhow!("function {index} names a missing type"))?
            .clone();
        let local_count = sig.params.len() + func.locals.len();
        if local_count > MAX_LOCALS {
            return Err(CompileError::LimitExceeded { count: local_count }.into());
        }

        let base = match &func.name {
            Some(name) => name.clone(),
            None => format!("func {index}"),
        };
        let qualified = match &self.opts.prefix {
            Some(prefix) => format!("{prefix} {base}"),
            None => base,
        };
        let name = self.names.unit(&qualified);
        log::debug!("compiling function {index} into unit `{name}`");

        let param_slots = slots(&sig.params);
        let unit = backend.begin_unit(&name, &param_slots, ret_slot(&sig.results));

        let mut local_tys: Vec<ValType> = sig.params.to_vec();
        local_tys.extend_from_slice(&func.locals);
        let mut locals: Vec<Option<LocalId>> =
            (0..sig.params.len() as LocalId).map(Some).collect();
        locals.resize(local_count, None);

        let continuations = self.opts.continuations;
        let mut unit_compiler = UnitCompiler {
            sess: self,
            backend,
            analysis,
            func_index: index,
            func,
            results: sig.results.to_vec(),
            types: TypeStack::new(local_tys),
            frames: Vec::new(),
            base_frames: 0,
            cont: Continuations::new(continuations),
            locals,
            kind: UnitKind::Function,
            used_tags: BTreeSet::new(),
            return_used: false,
            name,
        };
        unit_compiler.compile_function_unit()?;
        unit_compiler.backend.end_unit();
        Ok(unit)
    }

    /// Compiles every defined function, in index order.
    pub fn compile_module<B: Backend>(
        &mut self,
        backend: &mut B,
        analysis: &dyn BlockAnalysis,
    ) -> Result<Vec<UnitId>> {
        let first = self.module.num_imports();
        let count = self.module.funcs.len() as u32;
        let mut units = Vec::with_capacity(count as usize);
        for index in first..first + count {
            units.push(self.compile_function(index, backend, analysis)?);
        }
        Ok(units)
    }
}

/// What the unit being compiled is.
#[derive(Debug)]
pub(crate) enum UnitKind {
    /// The unit of a whole wasm function.
    Function,
    /// The out-of-line unit of one split block.
    Split {
        read: Vec<u32>,
        written: Vec<u32>,
        kind: FrameKind,
        outputs: Vec<ValType>,
    },
}

pub(crate) struct UnitCompiler<'s, 'm, B: Backend> {
    pub(crate) sess: &'s mut Session<'m>,
    pub(crate) backend: &'s mut B,
    pub(crate) analysis: &'s dyn BlockAnalysis,
    pub(crate) func_index: u32,
    pub(crate) func: &'m Function,
    /// The wasm function's results; split units need them for `return`
    /// propagation.
    pub(crate) results: Vec<ValType>,
    pub(crate) types: TypeStack,
    pub(crate) frames: Vec<BlockFrame<B::Label>>,
    /// Frames below this index mirror enclosing units and are non-local.
    pub(crate) base_frames: usize,
    pub(crate) cont: Continuations<B::Label>,
    /// Backend local of each wasm local; `None` until materialized in this
    /// unit.
    pub(crate) locals: Vec<Option<LocalId>>,
    pub(crate) kind: UnitKind,
    /// Non-local tags this unit's block-returns can carry; the caller only
    /// emits dispatch arms for these.
    pub(crate) used_tags: BTreeSet<i32>,
    /// Whether any exit of this unit carries `RETURN_TAG`.
    pub(crate) return_used: bool,
    pub(crate) name: String,
}

impl<B: Backend> UnitCompiler<'_, '_, B> {
    /// The backend local holding wasm local `index`.
    pub(crate) fn wasm_local(&self, index: u32) -> Result<LocalId, CompileError> {
        self.locals
            .get(index as usize)
            .copied()
            .flatten()
            .ok_or_else(|| {
                CompileError::Internal(format!(
                    "local {index} is not materialized in unit `{}`",
                    self.name
                ))
            })
    }

    fn compile_function_unit(&mut self) -> Result<()> {
        self.emit_resume_prologue();

        let func = self.func;
        let param_count = self.locals.len() - func.locals.len();
        for (i, ty) in func.locals.iter().enumerate() {
            let slot = Slot::of(*ty);
            let id = self.backend.alloc_local(slot);
            self.backend.const_zero(slot);
            self.backend.store_local(id);
            self.locals[param_count + i] = Some(id);
        }

        // The function body behaves as one implicit block producing the
        // results; branches to it leave the function.
        let exit = self.backend.new_label();
        let snapshot = self.types.begin_block(&[])?;
        self.frames.push(BlockFrame {
            kind: FrameKind::Block,
            sig: FuncType::new([], self.results.iter().copied()),
            label: FrameLabel::Local(exit),
            used: false,
            snapshot,
            else_label: None,
            arm_reachable: false,
        });

        self.compile_range(0, func.body.len())?;
        self.emit_cont_trailer()?;
        Ok(())
    }

    /// Walks `body[start..end]`, skipping code the abstract stack knows is
    /// unreachable.
    pub(crate) fn compile_range(&mut self, start: usize, end: usize) -> Result<()> {
        let func = self.func;
        let mut pos = start;
        let mut dead_nesting = 0usize;
        while pos < end {
            let inst = &func.body[pos];
            if !self.types.is_reachable() {
                // Unreachable code is not compiled at all; only the block
                // structure is tracked so the enclosing `else`/`end` is
                // found.
                match inst {
                    Inst::Block { .. } | Inst::Loop { .. } | Inst::If { .. } => dead_nesting += 1,
                    Inst::End if dead_nesting > 0 => dead_nesting -= 1,
                    Inst::Else if dead_nesting == 0 => self
                        .switch_to_else()
                        .with_context(|| "failed to compile `else`".to_string())?,
                    Inst::End => self
                        .close_block()
                        .with_context(|| "failed to compile `end`".to_string())?,
                    _ => {}
                }
                pos += 1;
                continue;
            }
            pos = self
                .instruction(pos)
                .with_context(|| format!("failed to compile `{}`", inst.name()))?;
        }
        Ok(())
    }

    /// Compiles one reachable instruction, returning the next offset.
    fn instruction(&mut self, pos: usize) -> Result<usize> {
        let func = self.func;
        match &func.body[pos] {
            Inst::Block { .. } | Inst::Loop { .. } | Inst::If { .. } => {
                return self.compile_block(pos)
            }
            Inst::Else => self.switch_to_else()?,
            Inst::End => self.close_block()?,
            Inst::Br { depth } => self.emit_br(*depth)?,
            Inst::BrIf { depth } => self.emit_br_if(*depth)?,
            Inst::BrTable { targets, default } => self.emit_br_table(targets, *default)?,
            Inst::Return => self.emit_return()?,
            Inst::Unreachable => {
                self.backend.trap(TrapReason::Unreachable);
                self.types.mark_unreachable();
            }
            Inst::Call { func } => self.emit_call(*func)?,
            Inst::CallIndirect { ty } => self.emit_call_indirect(*ty)?,
            Inst::Plain(op) => self.plain(op)?,
        }
        Ok(pos + 1)
    }

    /// `else`: close out the then arm and reopen the frame for the false
    /// arm.
    fn switch_to_else(&mut self) -> Result<(), CompileError> {
        let index = self
            .frames
            .len()
            .checked_sub(1)
            .filter(|index| *index >= self.base_frames)
            .ok_or_else(|| CompileError::Internal("`else` outside a block".into()))?;
        if self.frames[index].kind != FrameKind::If {
            return Err(CompileError::Internal("`else` without `if`".into()));
        }
        let params = self.frames[index].sig.params.to_vec();
        let results = self.frames[index].sig.results.to_vec();
        let snapshot = self.frames[index].snapshot;
        let fell = self.types.is_reachable();
        if fell {
            self.types.end_block(&results, snapshot)?;
            let FrameLabel::Local(exit) = self.frames[index].label else {
                return Err(CompileError::Internal("non-local `if` frame".into()));
            };
            self.backend.jump(exit);
        }
        let skip = self.frames[index]
            .else_label
            .take()
            .ok_or_else(|| CompileError::Internal("`if` frame lost its else label".into()))?;
        self.backend.place_label(skip);
        self.frames[index].kind = FrameKind::Else;
        self.frames[index].arm_reachable = fell;
        self.types.reset(snapshot, &params);
        Ok(())
    }

    /// `end`: close the innermost frame, placing its labels and re-seeding
    /// the stack; at the outermost frame, emit the unit's fallthrough exit.
    fn close_block(&mut self) -> Result<(), CompileError> {
        if self.frames.len() <= self.base_frames {
            return Err(CompileError::Internal("`end` outside a block".into()));
        }
        let frame = self.frames.pop().unwrap();
        let fell = self.types.is_reachable();
        if fell {
            self.types.end_block(&frame.sig.results, frame.snapshot)?;
        }
        let next_reachable = match frame.kind {
            FrameKind::Block => fell || frame.used,
            // A loop's end is reachable only by falling out of it.
            FrameKind::Loop => fell,
            // No else arm: the false path falls through carrying the inputs,
            // which (by validation) equal the outputs.
            FrameKind::If => {
                if let Some(skip) = frame.else_label {
                    self.backend.place_label(skip);
                }
                true
            }
            FrameKind::Else => fell || frame.arm_reachable || frame.used,
        };
        if frame.kind != FrameKind::Loop {
            if let FrameLabel::Local(exit) = frame.label {
                self.backend.place_label(exit);
            }
        }
        if next_reachable {
            self.types.reset(frame.snapshot, &frame.sig.results);
        } else {
            self.types.mark_unreachable();
        }

        if self.frames.len() == self.base_frames && next_reachable {
            if matches!(self.kind, UnitKind::Function) {
                self.emit_unit_return()?;
            } else {
                self.emit_split_fallthrough()?;
            }
        }
        Ok(())
    }

    /// Return from a function unit with the results on the stack.
    pub(crate) fn emit_unit_return(&mut self) -> Result<(), CompileError> {
        if self.results.len() > 1 {
            let results = self.results.clone();
            marshal::pack(self.backend, &results);
        }
        self.backend.ret();
        Ok(())
    }

    /// The wasm `return` instruction.
    fn emit_return(&mut self) -> Result<(), CompileError> {
        let results = self.results.clone();
        self.types.check_top(&results)?;
        if matches!(self.kind, UnitKind::Function) {
            self.emit_unit_return()?;
        } else {
            self.return_used = true;
            marshal::pack(self.backend, &results);
            self.backend.const_i32(RETURN_TAG);
            self.backend.swap(Slot::Int, Slot::Ref);
            self.pack_written_locals()?;
            self.backend.blockret_new();
            self.backend.ret();
        }
        self.types.mark_unreachable();
        Ok(())
    }

    fn emit_call(&mut self, func: u32) -> Result<(), CompileError> {
        let sig = self
            .sess
            .module
            .func_type(func)
            .cloned()
            .ok_or_else(|| CompileError::Internal(format!("call target {func} out of range")))?;
        for ty in sig.params.iter().rev() {
            self.types.pop(*ty)?;
        }
        let param_slots = slots(&sig.params);
        let ret = ret_slot(&sig.results);
        if self.cont.enabled {
            let live = self.types.operands().to_vec();
            let (resume_entry, pause) = self.new_cut_point(live, Vec::new(), param_slots.clone());
            self.backend.place_label(resume_entry);
            self.backend.call_function(func, &param_slots, ret);
            self.backend.branch_if_paused(pause);
        } else {
            self.backend.call_function(func, &param_slots, ret);
        }
        if sig.results.len() > 1 {
            marshal::unpack(self.backend, &sig.results);
        }
        for ty in sig.results.iter() {
            self.types.push(*ty);
        }
        Ok(())
    }

    fn emit_call_indirect(&mut self, ty: u32) -> Result<(), CompileError> {
        let sig = self
            .sess
            .module
            .ty(ty)
            .cloned()
            .ok_or_else(|| CompileError::Internal(format!("type index {ty} out of range")))?;
        self.types.pop(ValType::I32)?;
        for param in sig.params.iter().rev() {
            self.types.pop(*param)?;
        }
        let param_slots = slots(&sig.params);
        let ret = ret_slot(&sig.results);
        if self.cont.enabled {
            // Park the table index in a scratch local: a pause saves it with
            // the layer and a resume re-supplies it above the dummy
            // arguments.
            let index_local = self.backend.alloc_local(Slot::Int);
            self.backend.store_local(index_local);
            self.backend.load_local(index_local);
            let live = self.types.operands().to_vec();
            let (resume_entry, pause) = self.new_cut_point(
                live,
                vec![(ValType::I32, index_local)],
                param_slots.clone(),
            );
            self.backend.place_label(resume_entry);
            self.backend.call_indirect(ty, &param_slots, ret);
            self.backend.branch_if_paused(pause);
        } else {
            self.backend.call_indirect(ty, &param_slots, ret);
        }
        if sig.results.len() > 1 {
            marshal::unpack(self.backend, &sig.results);
        }
        for result in sig.results.iter() {
            self.types.push(*result);
        }
        Ok(())
    }
}
