//! Core types shared by the Seam patching engine.
//!
//! This crate is the leaf of the workspace: it defines the runtime [`Value`]
//! model, the stable [`MethodId`] handle for registered methods, and the
//! unified [`PatchError`] taxonomy used across the bytecode and engine
//! layers.

#![warn(missing_docs)]

pub mod error;
pub mod ids;
pub mod value;

pub use error::{PatchError, PatchResult};
pub use ids::MethodId;
pub use value::Value;
