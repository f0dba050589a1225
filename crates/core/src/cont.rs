//! Pause/resume instrumentation.
//!
//! In continuation mode every place execution can leave a unit sideways
//! becomes a *cut point*: a call that may itself pause, or a loop back-edge
//! taken while the runtime has requested a pause. Pausing captures a layer
//! `{point, stack, locals, heap}` describing the unit's live state and
//! returns it; the layers of the whole call chain stack up as each caller
//! notices the pause and captures its own. Resuming replays the chain: a
//! prologue branch sends resuming invocations to a dispatch trailer that
//! restores locals and live stack values from the layer and jumps back to
//! the cut point, where the interrupted call is re-issued.

use crate::backend::{Backend, LocalId, Slot, TrapReason};
use crate::compiler::UnitCompiler;
use crate::error::CompileError;
use crate::marshal::CarrierShape;
use wasm_classgen_ir::ValType;

/// One suspension site within a unit.
#[derive(Debug, Clone)]
pub(crate) struct CutPoint<L> {
    pub id: i32,
    /// Operand-stack values live underneath the cut, bottom to top. Saved on
    /// pause, restored on resume.
    pub live: Vec<ValType>,
    /// Values that sit above the live stack on re-entry but are sourced from
    /// scratch locals rather than zeroed: the table index of an indirect
    /// call. Saved alongside the live stack.
    pub extras: Vec<(ValType, LocalId)>,
    /// Zero values pushed on resume in place of operands the re-issued call
    /// will consume without looking at.
    pub dummies: Vec<Slot>,
    /// Where resumed control re-enters the normal instruction stream.
    pub resume_entry: L,
    /// Trailer label that rebuilds the stack for this point.
    pub restore: L,
    /// Label of this point's pause body.
    pub pause: L,
}

#[derive(Debug)]
pub(crate) struct Continuations<L> {
    pub enabled: bool,
    /// Target of the prologue's resuming branch; `Some` once the prologue is
    /// emitted.
    pub dispatch: Option<L>,
    pub points: Vec<CutPoint<L>>,
}

impl<L> Continuations<L> {
    pub fn new(enabled: bool) -> Continuations<L> {
        Continuations {
            enabled,
            dispatch: None,
            points: Vec::new(),
        }
    }
}

impl<B: Backend> UnitCompiler<'_, '_, B> {
    /// Emits the resuming branch that every continuation-mode unit starts
    /// with. Must precede all other emission into the unit.
    pub(crate) fn emit_resume_prologue(&mut self) {
        if !self.cont.enabled {
            return;
        }
        let dispatch = self.backend.new_label();
        self.backend.branch_if_resuming(dispatch);
        self.cont.dispatch = Some(dispatch);
    }

    /// Registers a cut point over the given live stack and returns its
    /// labels `(resume_entry, pause)`. The caller places `resume_entry`
    /// immediately before the interruptible operation and jumps to `pause`
    /// when the operation pauses.
    pub(crate) fn new_cut_point(
        &mut self,
        live: Vec<ValType>,
        extras: Vec<(ValType, LocalId)>,
        dummies: Vec<Slot>,
    ) -> (B::Label, B::Label) {
        let resume_entry = self.backend.new_label();
        let restore = self.backend.new_label();
        let pause = self.backend.new_label();
        let id = self.cont.points.len() as i32;
        log::trace!(
            "unit `{}`: cut point {id} over {} live values",
            self.name,
            live.len()
        );
        self.cont.points.push(CutPoint {
            id,
            live,
            extras,
            dummies,
            resume_entry,
            restore,
            pause,
        });
        (resume_entry, pause)
    }

    /// Emits a pause check over `live`: if the runtime has requested a
    /// pause, capture a layer here; otherwise fall through. No-op outside
    /// continuation mode.
    pub(crate) fn emit_pause_check(&mut self, live: Vec<ValType>) {
        if !self.cont.enabled {
            return;
        }
        let (resume_entry, pause) = self.new_cut_point(live, Vec::new(), Vec::new());
        self.backend.branch_if_pause_requested(pause);
        self.backend.place_label(resume_entry);
    }

    /// The wasm locals this unit materialized, ascending, with their backend
    /// ids and categories. This is the save/restore order of the layer's
    /// locals carrier.
    fn saved_locals(&self) -> Result<Vec<(LocalId, Slot)>, CompileError> {
        let mut saved = Vec::new();
        for (index, local) in self.locals.iter().enumerate() {
            if let Some(id) = local {
                let ty = self.types.local(index as u32)?;
                saved.push((*id, Slot::of(ty)));
            }
        }
        Ok(saved)
    }

    /// Emits the dispatch trailer and all pause bodies. Called once, after
    /// the unit body; the emitted code is only reachable from the prologue
    /// branch and from pause jumps.
    pub(crate) fn emit_cont_trailer(&mut self) -> Result<(), CompileError> {
        if !self.cont.enabled {
            return Ok(());
        }
        let dispatch = self
            .cont
            .dispatch
            .ok_or_else(|| CompileError::Internal("continuation trailer without prologue".into()))?;
        let points = self.cont.points.clone();

        self.backend.place_label(dispatch);
        if points.is_empty() {
            // Resuming a unit that cannot pause: the layer chain is corrupt.
            self.backend.trap(TrapReason::UnknownResumePoint);
            return Ok(());
        }

        let saved = self.saved_locals()?;
        let layer = self.backend.alloc_local(Slot::Ref);
        self.backend.resume_layer();
        self.backend.store_local(layer);

        // Locals first; the per-point restores only rebuild the stack.
        self.backend.load_local(layer);
        self.backend.layer_locals();
        for (id, slot) in &saved {
            self.backend.carrier_take(*slot);
            self.backend.store_local(*id);
        }
        self.backend.drop_value(Slot::Ref);

        self.backend.load_local(layer);
        self.backend.layer_point();
        let arms: Vec<(i32, B::Label)> = points.iter().map(|p| (p.id, p.restore)).collect();
        let unknown = self.backend.new_label();
        self.backend.switch(&arms, unknown);
        self.backend.place_label(unknown);
        self.backend.trap(TrapReason::UnknownResumePoint);

        for point in &points {
            self.backend.place_label(point.restore);
            self.backend.load_local(layer);
            self.backend.layer_stack();
            for ty in &point.live {
                let slot = Slot::of(*ty);
                self.backend.carrier_take(slot);
                self.backend.swap(slot, Slot::Ref);
            }
            for slot in &point.dummies {
                self.backend.const_zero(*slot);
                self.backend.swap(*slot, Slot::Ref);
            }
            for (ty, local) in &point.extras {
                let slot = Slot::of(*ty);
                self.backend.carrier_take(slot);
                // Re-arm the scratch local so a second pause at this point
                // saves the right value.
                self.backend.dup(slot);
                self.backend.store_local(*local);
                self.backend.swap(slot, Slot::Ref);
            }
            self.backend.drop_value(Slot::Ref);
            self.backend.jump(point.resume_entry);
        }

        // Pause bodies: capture the stack, then fall into the shared save
        // trailer with `[stack_carrier, point_id]` on top.
        let save = self.backend.new_label();
        for point in &points {
            self.backend.place_label(point.pause);
            let mut shape = CarrierShape::of_types(&point.live);
            for (ty, _) in &point.extras {
                shape.add(Slot::of(*ty));
            }
            self.backend.carrier_new(&shape);
            for (ty, local) in point.extras.iter().rev() {
                self.backend.load_local(*local);
                self.backend.carrier_put(Slot::of(*ty));
            }
            for ty in point.live.iter().rev() {
                let slot = Slot::of(*ty);
                self.backend.swap(Slot::Ref, slot);
                self.backend.carrier_put(slot);
            }
            self.backend.const_i32(point.id);
            self.backend.jump(save);
        }

        self.backend.place_label(save);
        let mut locals_shape = CarrierShape::default();
        for (_, slot) in &saved {
            locals_shape.add(*slot);
        }
        self.backend.carrier_new(&locals_shape);
        for (id, slot) in saved.iter().rev() {
            self.backend.load_local(*id);
            self.backend.carrier_put(*slot);
        }
        // No locals of this lowering live on the heap; the slot is kept so
        // layers have a stable shape.
        self.backend.const_zero(Slot::Ref);
        self.backend.layer_new();
        self.backend.pause();
        Ok(())
    }
}
