//! Moving values between the physical stack, locals, and value carriers.
//!
//! A *carrier* is the runtime object used whenever a group of typed values
//! has to travel as one reference: multi-value results, block-return
//! payloads, saved locals, and captured continuation stacks. Carriers are
//! LIFO: values come back out in the reverse of the order they went in, so
//! every producer/consumer pair in this module agrees on a fixed order.
//! Producers put top-of-stack (or highest index) first; consumers take
//! bottom (or lowest index) first.

use crate::backend::{Backend, LocalId, Slot};
use wasm_classgen_ir::ValType;

/// How many values of each storage category a carrier holds.
///
/// Backends that generate specialized carrier classes key them on this
/// shape; five small counts fully describe a carrier's layout.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CarrierShape {
    pub ints: u32,
    pub longs: u32,
    pub floats: u32,
    pub doubles: u32,
    pub refs: u32,
}

impl CarrierShape {
    pub fn of_types(types: &[ValType]) -> CarrierShape {
        Self::of_slots(types.iter().copied().map(Slot::of))
    }

    pub fn of_slots(slots: impl IntoIterator<Item = Slot>) -> CarrierShape {
        let mut shape = CarrierShape::default();
        for slot in slots {
            shape.add(slot);
        }
        shape
    }

    pub fn add(&mut self, slot: Slot) {
        match slot {
            Slot::Int => self.ints += 1,
            Slot::Long => self.longs += 1,
            Slot::Float => self.floats += 1,
            Slot::Double => self.doubles += 1,
            Slot::Ref => self.refs += 1,
        }
    }

    pub fn total(&self) -> u32 {
        self.ints + self.longs + self.floats + self.doubles + self.refs
    }
}

/// Packs the top `types.len()` stack values into a fresh carrier:
/// `[.., v0.., vn] -> [.., carrier]`. `types` lists them bottom to top.
pub(crate) fn pack<B: Backend>(backend: &mut B, types: &[ValType]) {
    pack_with_shape(backend, types, CarrierShape::of_types(types));
}

/// Like [`pack`], but the carrier is allocated with extra room; the caller
/// puts the remaining values itself.
pub(crate) fn pack_with_shape<B: Backend>(backend: &mut B, types: &[ValType], shape: CarrierShape) {
    backend.carrier_new(&shape);
    for ty in types.iter().rev() {
        let slot = Slot::of(*ty);
        backend.swap(Slot::Ref, slot);
        backend.carrier_put(slot);
    }
}

/// Unpacks a carrier produced by [`pack`] back onto the stack, consuming it:
/// `[.., carrier] -> [.., v0.., vn]`.
pub(crate) fn unpack<B: Backend>(backend: &mut B, types: &[ValType]) {
    for ty in types {
        let slot = Slot::of(*ty);
        backend.carrier_take(slot);
        backend.swap(slot, Slot::Ref);
    }
    backend.drop_value(Slot::Ref);
}

/// Discards all but the top `keep` of the `types.len()` topmost stack values,
/// preserving the kept values and their order.
///
/// The single-value case over a depth of two is a plain swap and drop; the
/// general case parks the kept values in scratch locals while the rest are
/// popped.
pub(crate) fn unwind<B: Backend>(backend: &mut B, types: &[ValType], keep: usize) {
    debug_assert!(keep <= types.len());
    let discard = types.len() - keep;
    if discard == 0 {
        return;
    }
    if keep == 0 {
        for ty in types.iter().rev() {
            backend.drop_value(Slot::of(*ty));
        }
        return;
    }
    if keep == 1 && types.len() == 2 {
        backend.swap(Slot::of(types[1]), Slot::of(types[0]));
        backend.drop_value(Slot::of(types[0]));
        return;
    }

    // Scratch locals, filled top-down.
    let mut scratch: Vec<LocalId> = Vec::with_capacity(keep);
    for ty in types[discard..].iter().rev() {
        let local = backend.alloc_local(Slot::of(*ty));
        backend.store_local(local);
        scratch.push(local);
    }
    for ty in types[..discard].iter().rev() {
        backend.drop_value(Slot::of(*ty));
    }
    for local in scratch.iter().rev() {
        backend.load_local(*local);
    }
    for local in scratch {
        backend.free_local(local);
    }
}
