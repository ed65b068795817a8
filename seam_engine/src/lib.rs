//! The Seam patching pipeline.
//!
//! Callers register prefix, postfix, transpiler, and finalizer patches
//! against an already-registered method. The engine deterministically
//! orders them, synthesizes a single replacement body at the instruction
//! level, and re-points the original's entry slot at the replacement:
//!
//! ```text
//! PatchInfo ──sort──► ordered patches
//!                          │
//! original body ──decode──► InstructionStream ──transpile*──► emit
//!                          │                                   │
//!                          └────────── weave wrapper ──────────┤
//!                                                              ▼
//!                        entry slot ◄──detour── replacement MethodBody
//! ```
//!
//! A reverse ("standin") mode assembles a callable snapshot of an original
//! plus a chosen set of historical transpilers without touching the live
//! original's entry point.
//!
//! Every failure crossing the pipeline boundary is wrapped into an
//! [`EngineFault`] carrying the nearest-available instruction map.

#![warn(missing_docs)]

pub mod detour;
pub mod engine;
pub mod fault;
pub mod interp;
pub mod ledger;
pub mod method_table;
pub mod patch;
pub mod reverse;
pub mod sorter;
pub mod synth;

pub use detour::{install, uninstall};
pub use engine::{EngineOptions, PatchEngine};
pub use fault::EngineFault;
pub use interp::Interpreter;
pub use ledger::{MemoryLedger, PatchLedger};
pub use method_table::{MethodEntry, MethodTable, TableStats};
pub use patch::{Patch, PatchCallable, PatchCategory, PatchInfo, PatchOwner, Priority, TranspilerFn};
pub use reverse::{reverse_patch, ReverseMode, StandinDescriptor};
pub use sorter::{sort, sort_with_report, SortDirection, SortReport};
pub use synth::{build_replacement, synthesize, update_wrapper, Synthesized, SynthOptions};
