//! Lowering of plain (non-control) instructions.
//!
//! Mostly a one-to-one table onto the backend's primitive set; the handful
//! of wasm opcodes with no direct counterpart (`eqz`, unsigned extension,
//! `select`) expand to short fixed sequences.

use crate::backend::{Backend, PrimOp, Slot};
use crate::compiler::UnitCompiler;
use crate::error::CompileError;
use wasm_classgen_ir::{NumOp, PlainOp, ValType};

impl<B: Backend> UnitCompiler<'_, '_, B> {
    pub(crate) fn plain(&mut self, op: &PlainOp) -> Result<(), CompileError> {
        match op {
            PlainOp::I32Const(val) => {
                self.backend.const_i32(*val);
                self.types.push(ValType::I32);
            }
            PlainOp::I64Const(val) => {
                self.backend.const_i64(*val);
                self.types.push(ValType::I64);
            }
            PlainOp::F32Const(val) => {
                self.backend.const_f32(*val);
                self.types.push(ValType::F32);
            }
            PlainOp::F64Const(val) => {
                self.backend.const_f64(*val);
                self.types.push(ValType::F64);
            }
            PlainOp::LocalGet(index) => {
                let ty = self.types.local(*index)?;
                let id = self.wasm_local(*index)?;
                self.backend.load_local(id);
                self.types.push(ty);
            }
            PlainOp::LocalSet(index) => {
                let ty = self.types.local(*index)?;
                self.types.pop(ty)?;
                let id = self.wasm_local(*index)?;
                self.backend.store_local(id);
            }
            PlainOp::LocalTee(index) => {
                let ty = self.types.local(*index)?;
                self.types.pop(ty)?;
                self.types.push(ty);
                let id = self.wasm_local(*index)?;
                self.backend.dup(Slot::of(ty));
                self.backend.store_local(id);
            }
            PlainOp::Drop => {
                let ty = self.types.pop_any()?;
                self.backend.drop_value(Slot::of(ty));
            }
            PlainOp::Select => self.select()?,
            PlainOp::Num(op) => self.numeric(*op)?,
        }
        Ok(())
    }

    /// `[a, b, cond]` keeps `a` when `cond` is non-zero, else `b`.
    fn select(&mut self) -> Result<(), CompileError> {
        self.types.pop(ValType::I32)?;
        let ty = self.types.pop_any()?;
        self.types.pop(ty)?;
        let slot = Slot::of(ty);
        let keep_first = self.backend.new_label();
        let done = self.backend.new_label();
        self.backend.branch_if(keep_first);
        self.backend.swap(slot, slot);
        self.backend.drop_value(slot);
        self.backend.jump(done);
        self.backend.place_label(keep_first);
        self.backend.drop_value(slot);
        self.backend.place_label(done);
        self.types.push(ty);
        Ok(())
    }

    fn numeric(&mut self, op: NumOp) -> Result<(), CompileError> {
        let (pops, pushes) = op.signature();
        for ty in pops.iter().rev() {
            self.types.pop(*ty)?;
        }
        self.lower_numeric(op);
        for ty in pushes {
            self.types.push(*ty);
        }
        Ok(())
    }

    fn lower_numeric(&mut self, op: NumOp) {
        use NumOp::*;
        use PrimOp::*;
        let prim = match op {
            I32Add => IAdd,
            I32Sub => ISub,
            I32Mul => IMul,
            I32DivS => IDiv,
            I32RemS => IRem,
            I32And => IAnd,
            I32Or => IOr,
            I32Xor => IXor,
            I32Shl => IShl,
            I32ShrS => IShr,
            I32ShrU => IUshr,
            I32Eqz => {
                self.backend.const_i32(0);
                ICmpEq
            }
            I32Eq => ICmpEq,
            I32Ne => ICmpNe,
            I32LtS => ICmpLtS,
            I32LtU => ICmpLtU,
            I32GtS => ICmpGtS,
            I32GtU => ICmpGtU,
            I32LeS => ICmpLeS,
            I32LeU => ICmpLeU,
            I32GeS => ICmpGeS,
            I32GeU => ICmpGeU,
            I64Add => LAdd,
            I64Sub => LSub,
            I64Mul => LMul,
            I64Eqz => {
                self.backend.const_i64(0);
                LCmpEq
            }
            I64Eq => LCmpEq,
            I64Ne => LCmpNe,
            I64LtS => LCmpLtS,
            F32Add => FAdd,
            F32Mul => FMul,
            F32Eq => FCmpEq,
            F32Lt => FCmpLt,
            F64Add => DAdd,
            F64Sub => DSub,
            F64Mul => DMul,
            F64Div => DDiv,
            F64Eq => DCmpEq,
            F64Lt => DCmpLt,
            F64Neg => DNeg,
            I32WrapI64 => L2I,
            I64ExtendI32S => I2L,
            I64ExtendI32U => {
                // Widen, then mask the sign extension off.
                self.backend.primitive(I2L);
                self.backend.const_i64(0xffff_ffff);
                LAnd
            }
            F32DemoteF64 => D2F,
            F64PromoteF32 => F2D,
            F64ConvertI32S => I2D,
            I32TruncF64S => D2I,
        };
        self.backend.primitive(prim);
    }
}
