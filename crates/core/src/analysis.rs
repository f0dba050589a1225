//! Deciding which structured blocks become separate units.
//!
//! The block compiler asks an oracle, per block, whether the block must be
//! compiled out-of-line and which locals it touches. [`ScanAnalysis`] is the
//! stock oracle: a block must split when it can suspend, i.e. when it is or
//! contains a loop, or contains a call. Callers with better information (a
//! backend with unit size limits, say) can implement [`BlockAnalysis`]
//! themselves.

use std::collections::BTreeSet;
use wasm_classgen_ir::{Inst, Module, PlainOp};

/// Per-block answers the block compiler needs before committing to an inline
/// or split compilation. `offset` always points at the block's opening
/// `block`/`loop`/`if` instruction within the body of function `func`.
pub trait BlockAnalysis {
    /// Whether the block must be compiled as a separate unit.
    fn must_split(&self, func: u32, offset: usize) -> bool;

    /// Locals the block reads, ascending.
    fn locals_read(&self, func: u32, offset: usize) -> Vec<u32>;

    /// Locals the block writes, ascending. These are marshalled back to the
    /// caller on every exit; together with the read set they are marshalled
    /// into the split unit on entry, so an exit path that never reaches a
    /// write hands the caller's value back unchanged.
    fn locals_written(&self, func: u32, offset: usize) -> Vec<u32>;
}

/// Finds the boundaries of the block opened at `offset`: the offset of its
/// `else` (for an `if` that has one) and of its matching `end`.
pub fn block_bounds(body: &[Inst], offset: usize) -> Option<(Option<usize>, usize)> {
    debug_assert!(matches!(
        body.get(offset),
        Some(Inst::Block { .. } | Inst::Loop { .. } | Inst::If { .. })
    ));
    let mut depth = 0usize;
    let mut else_at = None;
    for (pos, inst) in body.iter().enumerate().skip(offset + 1) {
        match inst {
            Inst::Block { .. } | Inst::Loop { .. } | Inst::If { .. } => depth += 1,
            Inst::Else if depth == 0 => else_at = Some(pos),
            Inst::End if depth == 0 => return Some((else_at, pos)),
            Inst::End => depth -= 1,
            _ => {}
        }
    }
    None
}

/// The stock oracle: splits every suspendable block and derives local sets by
/// scanning the block body.
pub struct ScanAnalysis<'a> {
    module: &'a Module,
}

impl<'a> ScanAnalysis<'a> {
    pub fn new(module: &'a Module) -> ScanAnalysis<'a> {
        ScanAnalysis { module }
    }

    fn body_range(&self, func: u32, offset: usize) -> &'a [Inst] {
        let Some(function) = self.module.defined_func(func) else {
            return &[];
        };
        match block_bounds(&function.body, offset) {
            Some((_, end)) => &function.body[offset..end],
            None => &[],
        }
    }
}

impl BlockAnalysis for ScanAnalysis<'_> {
    fn must_split(&self, func: u32, offset: usize) -> bool {
        self.body_range(func, offset).iter().any(|inst| {
            matches!(
                inst,
                Inst::Loop { .. } | Inst::Call { .. } | Inst::CallIndirect { .. }
            )
        })
    }

    fn locals_read(&self, func: u32, offset: usize) -> Vec<u32> {
        // Approximate: any local read anywhere in the block, even after a
        // write. A sharper first-write analysis would shrink the entry
        // carrier but never change behavior.
        let mut read = BTreeSet::new();
        for inst in self.body_range(func, offset) {
            if let Inst::Plain(PlainOp::LocalGet(index)) = inst {
                read.insert(*index);
            }
        }
        read.into_iter().collect()
    }

    fn locals_written(&self, func: u32, offset: usize) -> Vec<u32> {
        let mut written = BTreeSet::new();
        for inst in self.body_range(func, offset) {
            if let Inst::Plain(PlainOp::LocalSet(index) | PlainOp::LocalTee(index)) = inst {
                written.insert(*index);
            }
        }
        written.into_iter().collect()
    }
}

/// An oracle that splits nothing; every block compiles inline.
pub struct NeverSplit;

impl BlockAnalysis for NeverSplit {
    fn must_split(&self, _func: u32, _offset: usize) -> bool {
        false
    }

    fn locals_read(&self, _func: u32, _offset: usize) -> Vec<u32> {
        Vec::new()
    }

    fn locals_written(&self, _func: u32, _offset: usize) -> Vec<u32> {
        Vec::new()
    }
}
