//! Addressable, mutable instruction streams.
//!
//! The stream is the engine's view of a method body during synthesis.
//! Decoding copies the body into an arena of instructions where every entry
//! carries a permanent [`InstId`] assigned at decode time. Branch targets
//! and exception-region boundaries are tracked by id instead of by offset,
//! so arbitrary insertions and deletions cannot silently re-point them;
//! [`InstructionStream::emit`] resolves ids back into relative offsets when
//! a fresh loadable body is requested.
//!
//! The original instruction index is preserved as `origin` metadata and is
//! never recomputed, so failure diagnostics stay correct after any number of
//! transform passes.

use crate::body::{MethodBody, TryRegion};
use crate::instruction::{Instruction, Opcode};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use seam_core::{MethodId, PatchError, PatchResult, Value};
use std::fmt;
use std::sync::Arc;

/// Permanent identity of one instruction within a stream.
///
/// Assigned at decode or insert time, never reused, stable across mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct InstId(u32);

impl InstId {
    /// Raw id value.
    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// One instruction in the stream, with identity and source metadata.
#[derive(Debug, Clone, Copy)]
pub struct TrackedInst {
    /// Permanent id within this stream.
    pub id: InstId,
    /// The instruction. For branches, the encoded offset is a placeholder;
    /// the live target is kept in the stream's id-based target table.
    pub inst: Instruction,
    /// Index in the originally decoded body, if this instruction came from
    /// it. Inserted instructions have no origin.
    pub origin: Option<u32>,
}

/// An exception region tracked by instruction identity.
#[derive(Debug, Clone, Copy)]
struct RegionIds {
    /// First covered instruction.
    first: InstId,
    /// Last covered instruction (inclusive).
    last: InstId,
    /// Handler entry instruction.
    handler: InstId,
}

/// A mutable, indexable decoding of a method body.
pub struct InstructionStream {
    name: Arc<str>,
    arg_count: u16,
    local_count: u16,
    register_count: u8,
    consts: Vec<Value>,
    callees: Vec<MethodId>,
    insts: Vec<TrackedInst>,
    next_id: u32,
    /// Branch instruction id -> target instruction id.
    branch_targets: FxHashMap<InstId, InstId>,
    regions: SmallVec<[RegionIds; 2]>,
}

impl InstructionStream {
    /// Create an empty stream with only a signature.
    ///
    /// This is the degraded base used by standin/reverse flows when the
    /// underlying method has no decodable body.
    pub fn empty(name: impl Into<Arc<str>>, arg_count: u16) -> Self {
        Self {
            name: name.into(),
            arg_count,
            local_count: arg_count,
            register_count: 0,
            consts: Vec::new(),
            callees: Vec::new(),
            insts: Vec::new(),
            next_id: 0,
            branch_targets: FxHashMap::default(),
            regions: SmallVec::new(),
        }
    }

    /// Decode a body into a private, addressable copy.
    ///
    /// The body itself is not touched; all subsequent mutation happens on
    /// the copy. Fails with `InvalidBody` when the body contains an
    /// undecodable opcode, a branch outside the instruction range, or an
    /// exception region with inconsistent boundaries.
    pub fn decode(body: &MethodBody) -> PatchResult<Self> {
        let len = body.code.len();
        let mut stream = Self {
            name: body.name.clone(),
            arg_count: body.arg_count,
            local_count: body.local_count,
            register_count: body.register_count,
            consts: body.consts.clone(),
            callees: body.callees.clone(),
            insts: Vec::with_capacity(len),
            next_id: 0,
            branch_targets: FxHashMap::default(),
            regions: SmallVec::new(),
        };

        for (pc, &inst) in body.code.iter().enumerate() {
            if inst.decoded().is_none() {
                return Err(PatchError::invalid_body(format!(
                    "undecodable opcode 0x{:02x} at pc {}",
                    inst.opcode(),
                    pc
                )));
            }
            stream.insts.push(TrackedInst {
                id: InstId(pc as u32),
                inst,
                origin: Some(pc as u32),
            });
        }
        stream.next_id = len as u32;

        // Rewrite branch offsets into id-based targets.
        for pc in 0..len {
            let inst = stream.insts[pc].inst;
            if inst.is_branch() {
                let target = pc as i64 + 1 + inst.offset() as i64;
                if target < 0 || target >= len as i64 {
                    return Err(PatchError::invalid_body(format!(
                        "branch at pc {} targets pc {} outside the body",
                        pc, target
                    )));
                }
                let own = stream.insts[pc].id;
                let target_id = stream.insts[target as usize].id;
                stream.branch_targets.insert(own, target_id);
            }
        }

        for region in &body.try_regions {
            let (start, end, handler) = (
                region.start_pc as usize,
                region.end_pc as usize,
                region.handler_pc as usize,
            );
            if start >= end || end > len || handler >= len {
                return Err(PatchError::invalid_body(format!(
                    "exception region [{}, {}) -> {} is inconsistent with body of {} instructions",
                    start, end, handler, len
                )));
            }
            stream.regions.push(RegionIds {
                first: stream.insts[start].id,
                last: stream.insts[end - 1].id,
                handler: stream.insts[handler].id,
            });
        }

        Ok(stream)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Method name.
    #[inline]
    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    /// Parameter count.
    #[inline]
    pub fn arg_count(&self) -> u16 {
        self.arg_count
    }

    /// Number of instructions currently in the stream.
    #[inline]
    pub fn len(&self) -> usize {
        self.insts.len()
    }

    /// Whether the stream has no instructions.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.insts.is_empty()
    }

    /// Instruction at a live position.
    #[inline]
    pub fn get(&self, pos: usize) -> Option<&TrackedInst> {
        self.insts.get(pos)
    }

    /// Iterate over the instructions in live order.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &TrackedInst> {
        self.insts.iter()
    }

    /// Live position of an instruction id, if it is still present.
    pub fn position_of(&self, id: InstId) -> Option<usize> {
        self.insts.iter().position(|t| t.id == id)
    }

    /// Live positions of every instruction with the given opcode.
    pub fn positions_of(&self, opcode: Opcode) -> Vec<usize> {
        self.insts
            .iter()
            .enumerate()
            .filter(|(_, t)| t.inst.decoded() == Some(opcode))
            .map(|(pos, _)| pos)
            .collect()
    }

    /// Current branch target of a branch instruction.
    #[inline]
    pub fn target_of(&self, branch: InstId) -> Option<InstId> {
        self.branch_targets.get(&branch).copied()
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    /// Insert an instruction at `pos`, shifting the rest down.
    ///
    /// Existing branch targets and region boundaries are unaffected because
    /// they are tracked by id. If the inserted instruction is a branch, its
    /// target must be supplied with [`set_target`](Self::set_target) before
    /// emission.
    pub fn insert(&mut self, pos: usize, inst: Instruction) -> InstId {
        let id = InstId(self.next_id);
        self.next_id += 1;
        self.insts.insert(
            pos,
            TrackedInst {
                id,
                inst,
                origin: None,
            },
        );
        id
    }

    /// Append an instruction at the end of the stream.
    #[inline]
    pub fn push(&mut self, inst: Instruction) -> InstId {
        self.insert(self.insts.len(), inst)
    }

    /// Remove the instruction at `pos`.
    ///
    /// Branches or regions still referring to the removed instruction are
    /// reported when a body is next emitted, not here.
    pub fn remove(&mut self, pos: usize) -> TrackedInst {
        let removed = self.insts.remove(pos);
        self.branch_targets.remove(&removed.id);
        removed
    }

    /// Replace the instruction at `pos`, keeping its id and origin.
    pub fn replace(&mut self, pos: usize, inst: Instruction) {
        let entry = &mut self.insts[pos];
        if entry.inst.is_branch() && !inst.is_branch() {
            self.branch_targets.remove(&entry.id);
        }
        entry.inst = inst;
    }

    /// Point a branch instruction at a target instruction.
    pub fn set_target(&mut self, branch: InstId, target: InstId) {
        self.branch_targets.insert(branch, target);
    }

    /// Allocate a fresh local slot (for synthesized temporaries).
    pub fn alloc_local(&mut self) -> u16 {
        let slot = self.local_count;
        self.local_count += 1;
        slot
    }

    /// Allocate a scratch register above every register the stream uses.
    pub fn alloc_register(&mut self) -> u8 {
        let reg = self.register_count;
        self.register_count = self.register_count.saturating_add(1);
        reg
    }

    /// Intern a constant, deduplicating equal values.
    pub fn add_const(&mut self, value: Value) -> u16 {
        if let Some(idx) = self.consts.iter().position(|&v| v == value) {
            return idx as u16;
        }
        self.consts.push(value);
        (self.consts.len() - 1) as u16
    }

    /// Intern a callee id.
    pub fn add_callee(&mut self, callee: MethodId) -> u8 {
        if let Some(idx) = self.callees.iter().position(|&c| c == callee) {
            return idx as u8;
        }
        self.callees.push(callee);
        (self.callees.len() - 1) as u8
    }

    // =========================================================================
    // Output
    // =========================================================================

    /// Snapshot the live position -> instruction mapping for diagnostics.
    pub fn indexed(&self) -> InstructionMap {
        InstructionMap {
            entries: self
                .insts
                .iter()
                .enumerate()
                .map(|(index, t)| IndexedInst {
                    index,
                    origin: t.origin,
                    inst: t.inst,
                })
                .collect(),
        }
    }

    /// Generate a fresh loadable body from the current stream contents.
    ///
    /// Resolves id-based branch targets and region boundaries back into
    /// offsets. Fails with `InvalidBody` when the stream is not a loadable
    /// sequence: a branch without a live target, a removed region boundary,
    /// an offset outside the signed 16-bit range, an operand pointing past
    /// its pool, or control falling off the end of a non-empty body.
    pub fn emit(&self) -> PatchResult<MethodBody> {
        let mut positions = FxHashMap::default();
        for (pos, t) in self.insts.iter().enumerate() {
            positions.insert(t.id, pos);
        }

        let mut code = Vec::with_capacity(self.insts.len());
        let mut max_register = self.register_count;
        for (pc, t) in self.insts.iter().enumerate() {
            let opcode = t.inst.decoded().ok_or_else(|| {
                PatchError::invalid_body(format!(
                    "undecodable opcode 0x{:02x} at pc {}",
                    t.inst.opcode(),
                    pc
                ))
            })?;

            self.check_operands(opcode, t.inst, pc)?;
            max_register = max_register.max(highest_register(opcode, t.inst));

            let out = if opcode.is_branch() {
                let target = self.branch_targets.get(&t.id).ok_or_else(|| {
                    PatchError::invalid_body(format!("branch at pc {} has no resolved target", pc))
                })?;
                let target_pc = *positions.get(target).ok_or_else(|| {
                    PatchError::invalid_body(format!(
                        "branch at pc {} targets a removed instruction",
                        pc
                    ))
                })?;
                let offset = target_pc as i64 - pc as i64 - 1;
                if offset < i16::MIN as i64 || offset > i16::MAX as i64 {
                    return Err(PatchError::invalid_body(format!(
                        "branch at pc {} needs offset {} outside the 16-bit range",
                        pc, offset
                    )));
                }
                t.inst.with_offset(offset as i16)
            } else {
                t.inst
            };
            code.push(out);
        }

        if let Some(last) = code.last() {
            let exits = last.decoded().map(Opcode::is_exit).unwrap_or(false);
            if !exits {
                return Err(PatchError::invalid_body(
                    "control falls off the end of the body",
                ));
            }
        }

        let mut try_regions = Vec::with_capacity(self.regions.len());
        for region in &self.regions {
            let resolve = |id: InstId, what: &str| {
                positions.get(&id).copied().ok_or_else(|| {
                    PatchError::invalid_body(format!("exception region {} was removed", what))
                })
            };
            let start_pc = resolve(region.first, "start")? as u32;
            let end_pc = resolve(region.last, "end")? as u32 + 1;
            let handler_pc = resolve(region.handler, "handler")? as u32;
            if start_pc >= end_pc {
                return Err(PatchError::invalid_body(
                    "exception region start moved past its end",
                ));
            }
            try_regions.push(TryRegion {
                start_pc,
                end_pc,
                handler_pc,
            });
        }

        Ok(MethodBody {
            name: self.name.clone(),
            arg_count: self.arg_count,
            local_count: self.local_count,
            register_count: max_register,
            consts: self.consts.clone(),
            callees: self.callees.clone(),
            code,
            try_regions,
        })
    }

    fn check_operands(&self, opcode: Opcode, inst: Instruction, pc: usize) -> PatchResult<()> {
        match opcode {
            Opcode::LoadConst => {
                if inst.imm16() as usize >= self.consts.len() {
                    return Err(PatchError::invalid_body(format!(
                        "constant index {} out of range at pc {}",
                        inst.imm16(),
                        pc
                    )));
                }
            }
            Opcode::LoadLocal | Opcode::StoreLocal => {
                if inst.imm16() >= self.local_count {
                    return Err(PatchError::invalid_body(format!(
                        "local slot {} out of range at pc {}",
                        inst.imm16(),
                        pc
                    )));
                }
            }
            Opcode::Call => {
                if inst.src1().index() as usize >= self.callees.len() {
                    return Err(PatchError::invalid_body(format!(
                        "callee index {} out of range at pc {}",
                        inst.src1().index(),
                        pc
                    )));
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// Highest register index an instruction touches, plus one.
fn highest_register(opcode: Opcode, inst: Instruction) -> u8 {
    use crate::instruction::InstructionFormat as F;
    let regs: &[u8] = match opcode.format() {
        F::NoOp | F::Imm16 => &[],
        F::Dst | F::DstImm16 => &[inst.dst().index()],
        F::DstSrc => &[inst.dst().index(), inst.src1().index()],
        F::DstSrcSrc => &[inst.dst().index(), inst.src1().index(), inst.src2().index()],
    };
    regs.iter()
        .copied()
        .max()
        .map(|r| r.saturating_add(1))
        .unwrap_or(0)
}

/// One entry of an [`InstructionMap`].
#[derive(Debug, Clone, Copy)]
pub struct IndexedInst {
    /// Position in the synthesized body at snapshot time.
    pub index: usize,
    /// Index in the originally decoded body, if any.
    pub origin: Option<u32>,
    /// The instruction.
    pub inst: Instruction,
}

/// Indexed mapping from synthesized-body position back to instructions,
/// used to correlate failures with the code being generated.
#[derive(Debug, Clone, Default)]
pub struct InstructionMap {
    entries: Vec<IndexedInst>,
}

impl InstructionMap {
    /// An empty map (decode never succeeded).
    #[inline]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Number of mapped instructions.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether any instructions were mapped.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over the entries in body order.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &IndexedInst> {
        self.entries.iter()
    }

    /// Entry at exactly `index`, if mapped.
    pub fn get(&self, index: usize) -> Option<&IndexedInst> {
        self.entries.iter().find(|e| e.index == index)
    }

    /// Nearest mapped entry at or before `index`.
    pub fn nearest(&self, index: usize) -> Option<&IndexedInst> {
        self.entries
            .iter()
            .filter(|e| e.index <= index)
            .last()
            .or_else(|| self.entries.first())
    }
}

impl fmt::Display for InstructionMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            write!(f, "  {:4}: {}", entry.index, entry.inst)?;
            if let Some(origin) = entry.origin {
                write!(f, "   ; from {}", origin)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
