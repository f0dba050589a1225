//! The typed module graph consumed by `wasm-classgen-core`.
//!
//! This crate is the boundary to the (external) binary parser: it assumes a
//! module has already been decoded and validated into the tables below. Each
//! function body is an ordered list of [`Inst`] values, pre-classified as
//! structured control or plain, and every plain numeric opcode carries a
//! statically known stack effect via [`NumOp::signature`].

use indexmap::IndexSet;

/// Wasm function bodies may not declare more than this many parameters plus
/// locals; the compiler rejects offenders before emitting any code.
pub const MAX_LOCALS: usize = 65_535;

/// A core wasm value type.
///
/// Reference types are carried so that tables and indirect calls type-check,
/// but no reference-manipulating opcodes beyond `call_indirect` are modeled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValType {
    I32,
    I64,
    F32,
    F64,
    FuncRef,
    ExternRef,
}

impl std::fmt::Display for ValType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ValType::I32 => "i32",
            ValType::I64 => "i64",
            ValType::F32 => "f32",
            ValType::F64 => "f64",
            ValType::FuncRef => "funcref",
            ValType::ExternRef => "externref",
        };
        f.write_str(s)
    }
}

/// A function signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FuncType {
    pub params: Box<[ValType]>,
    pub results: Box<[ValType]>,
}

impl FuncType {
    pub fn new(
        params: impl IntoIterator<Item = ValType>,
        results: impl IntoIterator<Item = ValType>,
    ) -> FuncType {
        FuncType {
            params: params.into_iter().collect(),
            results: results.into_iter().collect(),
        }
    }
}

/// The block-type immediate of a `block`/`loop`/`if` instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
    /// `() -> ()`
    Empty,
    /// `() -> (ty)`
    Value(ValType),
    /// A full signature, by index into the module's type table.
    Func(u32),
}

/// One instruction of a function body.
#[derive(Debug, Clone, PartialEq)]
pub enum Inst {
    Block { ty: BlockType },
    Loop { ty: BlockType },
    If { ty: BlockType },
    Else,
    End,
    Br { depth: u32 },
    BrIf { depth: u32 },
    BrTable { targets: Box<[u32]>, default: u32 },
    Return,
    Unreachable,
    Call { func: u32 },
    CallIndirect { ty: u32 },
    Plain(PlainOp),
}

impl Inst {
    /// The wasm mnemonic, used in diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Inst::Block { .. } => "block",
            Inst::Loop { .. } => "loop",
            Inst::If { .. } => "if",
            Inst::Else => "else",
            Inst::End => "end",
            Inst::Br { .. } => "br",
            Inst::BrIf { .. } => "br_if",
            Inst::BrTable { .. } => "br_table",
            Inst::Return => "return",
            Inst::Unreachable => "unreachable",
            Inst::Call { .. } => "call",
            Inst::CallIndirect { .. } => "call_indirect",
            Inst::Plain(op) => op.name(),
        }
    }
}

/// A plain (non-control) instruction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlainOp {
    I32Const(i32),
    I64Const(i64),
    F32Const(f32),
    F64Const(f64),
    LocalGet(u32),
    LocalSet(u32),
    LocalTee(u32),
    Drop,
    Select,
    Num(NumOp),
}

impl PlainOp {
    pub fn name(&self) -> &'static str {
        match self {
            PlainOp::I32Const(_) => "i32.const",
            PlainOp::I64Const(_) => "i64.const",
            PlainOp::F32Const(_) => "f32.const",
            PlainOp::F64Const(_) => "f64.const",
            PlainOp::LocalGet(_) => "local.get",
            PlainOp::LocalSet(_) => "local.set",
            PlainOp::LocalTee(_) => "local.tee",
            PlainOp::Drop => "drop",
            PlainOp::Select => "select",
            PlainOp::Num(op) => op.name(),
        }
    }
}

macro_rules! def_numeric {
    (
        $(
            $variant:ident, $name:tt : [$($pop:ident)*] => [$($push:ident)*];
        )*
    ) => {
        /// A numeric, comparison, or conversion opcode with a fixed stack
        /// effect. Lowering these is a mechanical one-to-one table; only the
        /// stack effect matters to the control-flow compiler.
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum NumOp {
            $( $variant, )*
        }

        impl NumOp {
            pub fn name(&self) -> &'static str {
                match self {
                    $( NumOp::$variant => $name, )*
                }
            }

            /// `(popped, pushed)` value types, pops listed bottom to top.
            pub fn signature(&self) -> (&'static [ValType], &'static [ValType]) {
                use ValType::*;
                match self {
                    $( NumOp::$variant => (&[$($pop),*], &[$($push),*]), )*
                }
            }
        }
    };
}

def_numeric! {
    I32Add, "i32.add" : [I32 I32] => [I32];
    I32Sub, "i32.sub" : [I32 I32] => [I32];
    I32Mul, "i32.mul" : [I32 I32] => [I32];
    I32DivS, "i32.div_s" : [I32 I32] => [I32];
    I32RemS, "i32.rem_s" : [I32 I32] => [I32];
    I32And, "i32.and" : [I32 I32] => [I32];
    I32Or, "i32.or" : [I32 I32] => [I32];
    I32Xor, "i32.xor" : [I32 I32] => [I32];
    I32Shl, "i32.shl" : [I32 I32] => [I32];
    I32ShrS, "i32.shr_s" : [I32 I32] => [I32];
    I32ShrU, "i32.shr_u" : [I32 I32] => [I32];
    I32Eqz, "i32.eqz" : [I32] => [I32];
    I32Eq, "i32.eq" : [I32 I32] => [I32];
    I32Ne, "i32.ne" : [I32 I32] => [I32];
    I32LtS, "i32.lt_s" : [I32 I32] => [I32];
    I32LtU, "i32.lt_u" : [I32 I32] => [I32];
    I32GtS, "i32.gt_s" : [I32 I32] => [I32];
    I32GtU, "i32.gt_u" : [I32 I32] => [I32];
    I32LeS, "i32.le_s" : [I32 I32] => [I32];
    I32LeU, "i32.le_u" : [I32 I32] => [I32];
    I32GeS, "i32.ge_s" : [I32 I32] => [I32];
    I32GeU, "i32.ge_u" : [I32 I32] => [I32];
    I64Add, "i64.add" : [I64 I64] => [I64];
    I64Sub, "i64.sub" : [I64 I64] => [I64];
    I64Mul, "i64.mul" : [I64 I64] => [I64];
    I64Eqz, "i64.eqz" : [I64] => [I32];
    I64Eq, "i64.eq" : [I64 I64] => [I32];
    I64Ne, "i64.ne" : [I64 I64] => [I32];
    I64LtS, "i64.lt_s" : [I64 I64] => [I32];
    F32Add, "f32.add" : [F32 F32] => [F32];
    F32Mul, "f32.mul" : [F32 F32] => [F32];
    F32Eq, "f32.eq" : [F32 F32] => [I32];
    F32Lt, "f32.lt" : [F32 F32] => [I32];
    F64Add, "f64.add" : [F64 F64] => [F64];
    F64Sub, "f64.sub" : [F64 F64] => [F64];
    F64Mul, "f64.mul" : [F64 F64] => [F64];
    F64Div, "f64.div" : [F64 F64] => [F64];
    F64Eq, "f64.eq" : [F64 F64] => [I32];
    F64Lt, "f64.lt" : [F64 F64] => [I32];
    F64Neg, "f64.neg" : [F64] => [F64];
    I32WrapI64, "i32.wrap_i64" : [I64] => [I32];
    I64ExtendI32S, "i64.extend_i32_s" : [I32] => [I64];
    I64ExtendI32U, "i64.extend_i32_u" : [I32] => [I64];
    F32DemoteF64, "f32.demote_f64" : [F64] => [F32];
    F64PromoteF32, "f64.promote_f32" : [F32] => [F64];
    F64ConvertI32S, "f64.convert_i32_s" : [I32] => [F64];
    I32TruncF64S, "i32.trunc_f64_s" : [F64] => [I32];
}

/// An imported function.
#[derive(Debug, Clone)]
pub struct Import {
    pub module: String,
    pub name: String,
    /// Index into the module's type table.
    pub ty: u32,
}

/// A defined function.
#[derive(Debug, Clone)]
pub struct Function {
    /// Debug name, when the module carried one.
    pub name: Option<String>,
    /// Index into the module's type table.
    pub ty: u32,
    /// Declared locals beyond the parameters, all zero-initialized.
    pub locals: Vec<ValType>,
    pub body: Vec<Inst>,
}

/// A decoded module: type, import, and function tables.
///
/// The function index space is the standard wasm one: imports first, then
/// defined functions.
#[derive(Debug, Default)]
pub struct Module {
    types: IndexSet<FuncType>,
    pub imports: Vec<Import>,
    pub funcs: Vec<Function>,
}

impl Module {
    pub fn new() -> Module {
        Module::default()
    }

    /// Interns a signature, returning its index in the type table.
    pub fn intern_type(&mut self, ty: FuncType) -> u32 {
        let (index, _) = self.types.insert_full(ty);
        index as u32
    }

    /// Looks up a signature by type-table index.
    pub fn ty(&self, index: u32) -> Option<&FuncType> {
        self.types.get_index(index as usize)
    }

    pub fn num_imports(&self) -> u32 {
        self.imports.len() as u32
    }

    /// The signature of the function at `index` in the function index space.
    pub fn func_type(&self, index: u32) -> Option<&FuncType> {
        let ty = if (index as usize) < self.imports.len() {
            self.imports[index as usize].ty
        } else {
            self.funcs.get(index as usize - self.imports.len())?.ty
        };
        self.ty(ty)
    }

    /// The defined function compiled for `index`, if `index` is not an
    /// import.
    pub fn defined_func(&self, index: u32) -> Option<&Function> {
        self.funcs.get((index as usize).checked_sub(self.imports.len())?)
    }

    /// Appends an import, returning its function index.
    pub fn push_import(&mut self, module: &str, name: &str, ty: FuncType) -> u32 {
        assert!(self.funcs.is_empty(), "imports must precede defined functions");
        let ty = self.intern_type(ty);
        self.imports.push(Import {
            module: module.to_string(),
            name: name.to_string(),
            ty,
        });
        self.imports.len() as u32 - 1
    }

    /// Appends a defined function, returning its function index.
    pub fn push_func(
        &mut self,
        name: &str,
        ty: FuncType,
        locals: Vec<ValType>,
        body: Vec<Inst>,
    ) -> u32 {
        let ty = self.intern_type(ty);
        self.funcs.push(Function {
            name: if name.is_empty() { None } else { Some(name.to_string()) },
            ty,
            locals,
            body,
        });
        (self.imports.len() + self.funcs.len()) as u32 - 1
    }
}
