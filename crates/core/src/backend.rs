//! The target abstraction the compiler emits through.
//!
//! A [`Backend`] models a typed, stack-based, verified target: code lives in
//! named invocable *units* with declared parameter and return slots, locals
//! are typed storage cells, and control flow is structured as labels plus
//! forward/backward jumps. The compiler never inspects emitted code; it only
//! drives this trait, so a backend may assemble real bytecode or (as the test
//! suite does) interpret the operations directly.

use crate::marshal::CarrierShape;
use wasm_classgen_ir::ValType;

/// Identifies a typed local storage cell within the current unit.
pub type LocalId = u32;

/// Identifies a finished or in-progress unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UnitId(pub u32);

/// The five storage categories of the target.
///
/// All wasm value types collapse onto these: the two reference types share
/// `Ref`, which is also the category of the runtime carrier objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    Int,
    Long,
    Float,
    Double,
    Ref,
}

impl Slot {
    pub fn of(ty: ValType) -> Slot {
        match ty {
            ValType::I32 => Slot::Int,
            ValType::I64 => Slot::Long,
            ValType::F32 => Slot::Float,
            ValType::F64 => Slot::Double,
            ValType::FuncRef | ValType::ExternRef => Slot::Ref,
        }
    }
}

/// Maps a list of value types onto their storage categories.
pub fn slots(types: &[ValType]) -> Vec<Slot> {
    types.iter().copied().map(Slot::of).collect()
}

/// Why emitted code aborts execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapReason {
    /// The wasm `unreachable` instruction was executed.
    Unreachable,
    /// Integer division or remainder by zero.
    DivideByZero,
    /// An indirect call named a table slot with no callable function.
    BadIndirectCall,
    /// A resume layer carried a cut-point id this unit does not define.
    UnknownResumePoint,
}

/// A primitive operation of the target's fixed instruction set.
///
/// Named by category prefix: `I` int, `L` long, `F` float, `D` double.
/// Comparisons push an int that is 0 or 1. Every operation pops its operands
/// and pushes its single result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimOp {
    IAdd,
    ISub,
    IMul,
    IDiv,
    IRem,
    IAnd,
    IOr,
    IXor,
    IShl,
    IShr,
    IUshr,
    ICmpEq,
    ICmpNe,
    ICmpLtS,
    ICmpLtU,
    ICmpGtS,
    ICmpGtU,
    ICmpLeS,
    ICmpLeU,
    ICmpGeS,
    ICmpGeU,
    LAdd,
    LSub,
    LMul,
    LAnd,
    LCmpEq,
    LCmpNe,
    LCmpLtS,
    FAdd,
    FMul,
    FCmpEq,
    FCmpLt,
    DAdd,
    DSub,
    DMul,
    DDiv,
    DNeg,
    DCmpEq,
    DCmpLt,
    I2L,
    L2I,
    F2D,
    D2F,
    I2D,
    D2I,
}

/// The sink for compiled code.
///
/// Stack-effect comments use `[.., a, b]` notation with the top of the
/// operand stack on the right.
pub trait Backend {
    /// A forward or backward jump target. Labels are scoped to the unit they
    /// were created in.
    type Label: Copy + Eq + std::fmt::Debug;

    /// Opens a new unit. Emission is redirected to it until the matching
    /// [`end_unit`](Backend::end_unit); units nest, and ending one resumes
    /// emission into its enclosing unit. Parameters are pre-bound to locals
    /// `0..params.len()`.
    fn begin_unit(&mut self, name: &str, params: &[Slot], ret: Option<Slot>) -> UnitId;
    fn end_unit(&mut self);

    /// Invokes a finished unit: `[.., args..] -> [.., ret?]`. Arguments are
    /// popped with the last parameter on top.
    fn call_unit(&mut self, unit: UnitId, params: &[Slot], ret: Option<Slot>);
    /// Invokes a module-level function by its index in the function index
    /// space. Same stack discipline as [`call_unit`](Backend::call_unit).
    fn call_function(&mut self, func: u32, params: &[Slot], ret: Option<Slot>);
    /// Invokes a function through the indirect-call table:
    /// `[.., args.., index] -> [.., ret?]`.
    fn call_indirect(&mut self, ty: u32, params: &[Slot], ret: Option<Slot>);

    fn new_label(&mut self) -> Self::Label;
    fn place_label(&mut self, label: Self::Label);
    fn jump(&mut self, target: Self::Label);
    /// Pops an int; jumps when it is non-zero.
    fn branch_if(&mut self, target: Self::Label);
    /// Pops an int; jumps when it is zero.
    fn branch_if_not(&mut self, target: Self::Label);
    /// Pops an int and jumps to the arm matching it, or to `default`.
    fn switch(&mut self, arms: &[(i32, Self::Label)], default: Self::Label);
    /// Returns from the current unit, popping its declared return value.
    fn ret(&mut self);
    fn trap(&mut self, reason: TrapReason);

    fn alloc_local(&mut self, slot: Slot) -> LocalId;
    fn free_local(&mut self, local: LocalId);
    fn load_local(&mut self, local: LocalId);
    fn store_local(&mut self, local: LocalId);

    fn const_i32(&mut self, val: i32);
    fn const_i64(&mut self, val: i64);
    fn const_f32(&mut self, val: f32);
    fn const_f64(&mut self, val: f64);
    /// Pushes the zero value of a category (null for `Ref`).
    fn const_zero(&mut self, slot: Slot);
    fn dup(&mut self, slot: Slot);
    fn drop_value(&mut self, slot: Slot);
    /// Swaps the top two values; `top` describes the current top, `below` the
    /// value underneath it.
    fn swap(&mut self, top: Slot, below: Slot);
    fn primitive(&mut self, op: PrimOp);

    /// Pushes a fresh value carrier with room for `shape`.
    fn carrier_new(&mut self, shape: &CarrierShape);
    /// `[.., carrier, value] -> [.., carrier]`. Values of each carrier are a
    /// LIFO: the take order is the reverse of the put order.
    fn carrier_put(&mut self, slot: Slot);
    /// `[.., carrier] -> [.., carrier, value]`.
    fn carrier_take(&mut self, slot: Slot);

    /// `[.., tag, payload, locals] -> [.., ret]`: builds the block-return
    /// record a split unit exits through. `payload` and `locals` are
    /// carriers.
    fn blockret_new(&mut self);
    /// `[.., ret] -> [.., tag]`.
    fn blockret_tag(&mut self);
    /// `[.., ret] -> [.., payload]`.
    fn blockret_payload(&mut self);
    /// `[.., ret] -> [.., locals]`.
    fn blockret_locals(&mut self);

    /// Jumps when this invocation is resuming a captured continuation rather
    /// than starting fresh.
    fn branch_if_resuming(&mut self, target: Self::Label);
    /// Pushes the continuation layer this invocation is resuming, consuming
    /// it from the runtime.
    fn resume_layer(&mut self);
    /// `[.., stack, point, locals, heap] -> [.., layer]`. `stack` and
    /// `locals` are carriers; `point` is the cut-point id; `heap` is a
    /// reference (null when the unit captures no heap-allocated locals).
    fn layer_new(&mut self);
    /// `[.., layer] -> [.., point]`.
    fn layer_point(&mut self);
    /// `[.., layer] -> [.., stack]`.
    fn layer_stack(&mut self);
    /// `[.., layer] -> [.., locals]`.
    fn layer_locals(&mut self);
    /// `[.., layer] -> [.., heap]`.
    fn layer_heap(&mut self);
    /// Pops a layer, records it, and returns from the unit signaling
    /// "paused" instead of producing a value.
    fn pause(&mut self);
    /// Jumps when the immediately preceding call returned by pausing.
    fn branch_if_paused(&mut self, target: Self::Label);
    /// Jumps when the runtime has asked running code to pause; emitted at
    /// loop back-edges.
    fn branch_if_pause_requested(&mut self, target: Self::Label);
}
