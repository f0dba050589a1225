//! Lowers WebAssembly function bodies onto a typed, stack-based, verified
//! target.
//!
//! The input is a decoded, validated [`ir::Module`]; the output is driven
//! through the [`Backend`] trait, one invocable *unit* per function plus one
//! per block the [`BlockAnalysis`] oracle splits out-of-line. In
//! continuation mode ([`Opts::continuations`]) every emitted unit can pause
//! at calls and loop back-edges, capturing a resumable stack of layers.
//!
//! ```no_run
//! # fn demo<B: wasm_classgen_core::Backend>(module: &wasm_classgen_ir::Module, backend: &mut B) {
//! use wasm_classgen_core::{Opts, ScanAnalysis, Session};
//!
//! let analysis = ScanAnalysis::new(module);
//! let mut session = Session::new(module, Opts::default());
//! let units = session.compile_module(backend, &analysis).unwrap();
//! # }
//! ```

pub use wasm_classgen_ir as ir;

mod analysis;
mod backend;
mod block;
mod branch;
mod compiler;
mod cont;
mod error;
mod frame;
mod marshal;
mod names;
mod plain;

pub use analysis::{block_bounds, BlockAnalysis, NeverSplit, ScanAnalysis};
pub use backend::{slots, Backend, LocalId, PrimOp, Slot, TrapReason, UnitId};
pub use block::{FALLTHROUGH_TAG, RETURN_TAG};
pub use compiler::Session;
pub use error::CompileError;
pub use frame::{StackSnapshot, TypeStack};
pub use marshal::CarrierShape;
pub use names::Names;

/// Session-wide compilation options.
#[derive(Debug, Default, Clone)]
#[cfg_attr(feature = "clap", derive(clap::Args))]
pub struct Opts {
    /// Instrument every unit for pause/resume: calls and loop back-edges
    /// become continuation cut points.
    #[cfg_attr(feature = "clap", arg(long))]
    pub continuations: bool,

    /// Prefix prepended to every synthesized unit name.
    #[cfg_attr(feature = "clap", arg(long))]
    pub prefix: Option<String>,
}
