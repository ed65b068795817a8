//! Instruction model and method-body manipulation for the Seam engine.
//!
//! # Architecture
//!
//! ```text
//! MethodBody ──decode──► InstructionStream ──emit──► MethodBody
//!      ▲                     (mutable,                  (fresh,
//!      │                      stable ids)                loadable)
//!   BodyBuilder
//! ```
//!
//! # Key Types
//!
//! - [`Instruction`] - 32-bit register-based instruction
//! - [`Opcode`] - operation enumeration with encoding formats
//! - [`MethodBody`] - a loadable body: code, pools, exception regions
//! - [`BodyBuilder`] - high-level emitter with labels and guard regions
//! - [`InstructionStream`] - addressable, mutable decoding of a body; the
//!   inverse direction re-emits a fresh body with branches re-pointed

#![warn(missing_docs)]

pub mod body;
pub mod builder;
pub mod instruction;
pub mod stream;

pub use body::{MethodBody, TryRegion};
pub use builder::{BodyBuilder, Label};
pub use instruction::{Instruction, InstructionFormat, Opcode, Register};
pub use stream::{IndexedInst, InstId, InstructionMap, InstructionStream, TrackedInst};
