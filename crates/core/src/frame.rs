//! Abstract tracking of the wasm operand stack.
//!
//! The compiler mirrors every value the emitted code will have on the
//! physical stack with its wasm type here, so that branch unwinding and
//! carrier construction know the exact category of every live value. The
//! tracker also implements the stack-polymorphic "unreachable" regime of the
//! wasm validation algorithm: after an unconditional transfer the recorded
//! operands are invalid, pops succeed unconditionally, and the state is
//! re-seeded from the enclosing block on the next `else`/`end`.

use crate::error::CompileError;
use wasm_classgen_ir::ValType;

/// A remembered stack depth, taken at block entry and used to re-seed the
/// stack at the block's exits.
#[derive(Debug, Clone, Copy)]
pub struct StackSnapshot {
    depth: usize,
}

impl StackSnapshot {
    /// The snapshot of an empty stack; the base of a freshly opened unit.
    pub fn bottom() -> StackSnapshot {
        StackSnapshot { depth: 0 }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }
}

/// The abstract operand stack plus the local-index-to-type mapping of one
/// function.
#[derive(Debug)]
pub struct TypeStack {
    operands: Vec<ValType>,
    locals: Vec<ValType>,
    reachable: bool,
}

impl TypeStack {
    /// `locals` covers parameters first, then declared locals.
    pub fn new(locals: Vec<ValType>) -> TypeStack {
        TypeStack {
            operands: Vec::new(),
            locals,
            reachable: true,
        }
    }

    /// The live operand types, bottom to top. Meaningless while unreachable.
    pub fn operands(&self) -> &[ValType] {
        &self.operands
    }

    pub fn is_reachable(&self) -> bool {
        self.reachable
    }

    /// The declared types of all locals, parameters first.
    pub fn local_types(&self) -> &[ValType] {
        &self.locals
    }

    /// The declared type of a local.
    pub fn local(&self, index: u32) -> Result<ValType, CompileError> {
        self.locals.get(index as usize).copied().ok_or_else(|| {
            CompileError::Internal(format!(
                "local index {index} out of range for {} locals",
                self.locals.len()
            ))
        })
    }

    pub fn push(&mut self, ty: ValType) {
        if self.reachable {
            self.operands.push(ty);
        }
    }

    /// Pops one operand, checking it against `expect`. In the unreachable
    /// regime this always succeeds without consuming anything.
    pub fn pop(&mut self, expect: ValType) -> Result<(), CompileError> {
        if !self.reachable {
            return Ok(());
        }
        match self.operands.pop() {
            Some(found) if found == expect => Ok(()),
            Some(found) => Err(CompileError::StackType {
                expected: expect.to_string(),
                found: found.to_string(),
            }),
            None => Err(CompileError::StackType {
                expected: expect.to_string(),
                found: "an empty stack".to_string(),
            }),
        }
    }

    /// Pops one operand of any type, returning it.
    pub fn pop_any(&mut self) -> Result<ValType, CompileError> {
        if !self.reachable {
            // Callers in unreachable code are skipped before they get here,
            // so an arbitrary stand-in type is never observable.
            return Ok(ValType::I32);
        }
        self.operands.pop().ok_or_else(|| CompileError::StackType {
            expected: "a value".to_string(),
            found: "an empty stack".to_string(),
        })
    }

    /// Checks, without popping, that the stack ends with `expect` (listed
    /// bottom to top).
    pub fn check_top(&self, expect: &[ValType]) -> Result<(), CompileError> {
        if !self.reachable {
            return Ok(());
        }
        if self.operands.len() < expect.len() {
            return Err(CompileError::StackMismatch {
                expected: expect.len(),
                found: self.operands.len(),
            });
        }
        let top = &self.operands[self.operands.len() - expect.len()..];
        for (found, want) in top.iter().zip(expect) {
            if found != want {
                return Err(CompileError::StackType {
                    expected: want.to_string(),
                    found: found.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Enters a block taking `inputs`: checks the inputs are on the stack and
    /// snapshots the depth underneath them.
    pub fn begin_block(&mut self, inputs: &[ValType]) -> Result<StackSnapshot, CompileError> {
        for ty in inputs.iter().rev() {
            self.pop(*ty)?;
        }
        let snapshot = StackSnapshot {
            depth: self.operands.len(),
        };
        if self.reachable {
            self.operands.extend_from_slice(inputs);
        }
        Ok(snapshot)
    }

    /// Validates block fallthrough: exactly `outputs` above the snapshot.
    /// Must only be called while reachable.
    pub fn end_block(
        &mut self,
        outputs: &[ValType],
        snapshot: StackSnapshot,
    ) -> Result<(), CompileError> {
        let above = self.operands.len().saturating_sub(snapshot.depth);
        if above != outputs.len() {
            return Err(CompileError::StackMismatch {
                expected: outputs.len(),
                found: above,
            });
        }
        self.check_top(outputs)
    }

    /// Enters the unreachable regime, invalidating the recorded operands.
    pub fn mark_unreachable(&mut self) {
        self.operands.clear();
        self.reachable = false;
    }

    /// Leaves the unreachable regime (or truncates a reachable stack),
    /// re-seeding the stack to the snapshot depth plus `types`.
    pub fn reset(&mut self, snapshot: StackSnapshot, types: &[ValType]) {
        self.operands.truncate(snapshot.depth);
        self.operands.extend_from_slice(types);
        self.reachable = true;
    }
}
