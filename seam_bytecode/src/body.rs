//! Loadable method bodies.

use crate::instruction::Instruction;
use seam_core::{MethodId, Value};
use std::fmt;
use std::sync::Arc;

/// An exception-handling region over a half-open pc range.
///
/// When a raise occurs at a pc inside `[start_pc, end_pc)`, control
/// transfers to `handler_pc` with the raised value delivered in register 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TryRegion {
    /// First covered pc.
    pub start_pc: u32,
    /// One past the last covered pc.
    pub end_pc: u32,
    /// Handler entry pc.
    pub handler_pc: u32,
}

impl TryRegion {
    /// Whether `pc` falls inside this region.
    #[inline]
    pub fn covers(&self, pc: u32) -> bool {
        pc >= self.start_pc && pc < self.end_pc
    }
}

/// A concrete, independently loadable method body.
///
/// Bodies are immutable once built. The synthesis pipeline never mutates a
/// registered body; it decodes a private copy, transforms it, and emits a
/// fresh `MethodBody`.
#[derive(Debug, Clone)]
pub struct MethodBody {
    /// Method name, used in diagnostics.
    pub name: Arc<str>,
    /// Number of parameters. Arguments occupy local slots `0..arg_count`.
    pub arg_count: u16,
    /// Total local slots, including arguments.
    pub local_count: u16,
    /// Number of scratch registers the frame needs.
    pub register_count: u8,
    /// Constant pool.
    pub consts: Vec<Value>,
    /// Callee pool referenced by `Call` instructions.
    pub callees: Vec<MethodId>,
    /// The instruction sequence.
    pub code: Vec<Instruction>,
    /// Exception-handling regions, innermost last.
    pub try_regions: Vec<TryRegion>,
}

impl MethodBody {
    /// Number of instructions.
    #[inline]
    pub fn len(&self) -> usize {
        self.code.len()
    }

    /// Whether the body has no instructions.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Find the innermost region covering `pc`, if any.
    pub fn handler_for(&self, pc: u32) -> Option<&TryRegion> {
        self.try_regions.iter().rev().find(|r| r.covers(pc))
    }
}

impl fmt::Display for MethodBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "method {}({} args, {} locals, {} regs):",
            self.name, self.arg_count, self.local_count, self.register_count
        )?;
        for (pc, inst) in self.code.iter().enumerate() {
            writeln!(f, "  {:4}: {}", pc, inst)?;
        }
        for region in &self.try_regions {
            writeln!(
                f,
                "  try [{}, {}) -> handler {}",
                region.start_pc, region.end_pc, region.handler_pc
            )?;
        }
        Ok(())
    }
}
