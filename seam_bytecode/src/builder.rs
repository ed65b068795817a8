//! Builder for constructing method bodies.
//!
//! Provides a high-level interface for emitting instructions, managing
//! virtual registers and local slots, defining and resolving labels, and
//! declaring guard (exception) regions. The synthesizer uses it to weave
//! wrapper bodies; tests use it to declare original methods.

use crate::body::{MethodBody, TryRegion};
use crate::instruction::{Instruction, Opcode, Register};
use rustc_hash::FxHashMap;
use seam_core::{MethodId, Value};
use std::sync::Arc;

/// A label for jump targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(u32);

/// A forward reference to a label that needs patching in `finish()`.
#[derive(Debug)]
struct ForwardRef {
    /// Instruction index containing the branch.
    instruction_index: usize,
    /// The label being jumped to.
    label: Label,
}

/// A guard region declared over labels, resolved to pcs in `finish()`.
#[derive(Debug)]
struct GuardRef {
    start: Label,
    end: Label,
    handler: Label,
}

/// Builder for [`MethodBody`] values.
///
/// # Example
/// ```
/// use seam_bytecode::BodyBuilder;
///
/// let mut b = BodyBuilder::new("add", 2);
/// let x = b.alloc_register();
/// let y = b.alloc_register();
/// let r = b.alloc_register();
/// b.emit_load_local(x, 0);
/// b.emit_load_local(y, 1);
/// b.emit_add(r, x, y);
/// b.emit_return(r);
/// let body = b.finish();
/// assert_eq!(body.code.len(), 4);
/// ```
pub struct BodyBuilder {
    /// Method name.
    name: Arc<str>,
    /// Parameter count; arguments occupy slots `0..arg_count`.
    arg_count: u16,
    /// Next free local slot.
    next_local: u16,

    /// Emitted instructions.
    instructions: Vec<Instruction>,

    /// Constant pool.
    consts: Vec<Value>,
    /// Constant deduplication map.
    const_map: FxHashMap<Value, u16>,

    /// Callee pool.
    callees: Vec<MethodId>,
    /// Callee deduplication map.
    callee_map: FxHashMap<MethodId, u8>,

    /// Next register to allocate.
    next_register: u8,
    /// High-water mark of registers used.
    max_registers: u8,
    /// Freed registers available for reuse.
    free_registers: Vec<Register>,

    /// Label counter.
    next_label: u32,
    /// Label to instruction index map.
    labels: FxHashMap<Label, usize>,
    /// Forward references that need patching.
    forward_refs: Vec<ForwardRef>,
    /// Guard regions awaiting label resolution.
    guards: Vec<GuardRef>,
}

impl BodyBuilder {
    /// Create a builder for a method with `arg_count` parameters.
    pub fn new(name: impl Into<Arc<str>>, arg_count: u16) -> Self {
        Self {
            name: name.into(),
            arg_count,
            next_local: arg_count,
            instructions: Vec::new(),
            consts: Vec::new(),
            const_map: FxHashMap::default(),
            callees: Vec::new(),
            callee_map: FxHashMap::default(),
            next_register: 0,
            max_registers: 0,
            free_registers: Vec::new(),
            next_label: 0,
            labels: FxHashMap::default(),
            forward_refs: Vec::new(),
            guards: Vec::new(),
        }
    }

    // =========================================================================
    // Registers and Locals
    // =========================================================================

    /// Allocate a virtual register, reusing freed ones first.
    pub fn alloc_register(&mut self) -> Register {
        if let Some(reg) = self.free_registers.pop() {
            return reg;
        }
        let reg = Register(self.next_register);
        self.next_register += 1;
        if self.next_register > self.max_registers {
            self.max_registers = self.next_register;
        }
        reg
    }

    /// Return a register to the free list.
    #[inline]
    pub fn free_register(&mut self, reg: Register) {
        self.free_registers.push(reg);
    }

    /// Allocate a fresh local slot.
    pub fn alloc_local(&mut self) -> u16 {
        let slot = self.next_local;
        self.next_local += 1;
        slot
    }

    // =========================================================================
    // Pools
    // =========================================================================

    /// Intern a constant, deduplicating equal values.
    pub fn add_const(&mut self, value: Value) -> u16 {
        if let Some(&idx) = self.const_map.get(&value) {
            return idx;
        }
        let idx = self.consts.len() as u16;
        self.consts.push(value);
        self.const_map.insert(value, idx);
        idx
    }

    /// Intern a callee, deduplicating equal ids.
    pub fn add_callee(&mut self, callee: MethodId) -> u8 {
        if let Some(&idx) = self.callee_map.get(&callee) {
            return idx;
        }
        let idx = self.callees.len() as u8;
        self.callees.push(callee);
        self.callee_map.insert(callee, idx);
        idx
    }

    // =========================================================================
    // Labels
    // =========================================================================

    /// Create a new unbound label.
    pub fn create_label(&mut self) -> Label {
        let label = Label(self.next_label);
        self.next_label += 1;
        label
    }

    /// Bind a label to the current instruction position.
    pub fn bind_label(&mut self, label: Label) {
        self.labels.insert(label, self.instructions.len());
    }

    /// Current instruction count (program counter).
    #[inline]
    pub fn current_pc(&self) -> u32 {
        self.instructions.len() as u32
    }

    /// Declare a guard region over labels; handler runs when a raise occurs
    /// between `start` (inclusive) and `end` (exclusive).
    pub fn guard(&mut self, start: Label, end: Label, handler: Label) {
        self.guards.push(GuardRef {
            start,
            end,
            handler,
        });
    }

    // =========================================================================
    // Emission
    // =========================================================================

    /// Emit a no-op.
    pub fn emit_nop(&mut self) {
        self.instructions.push(Instruction::op(Opcode::Nop));
    }

    /// Emit `dst = src`.
    pub fn emit_move(&mut self, dst: Register, src: Register) {
        self.instructions
            .push(Instruction::op_ds(Opcode::Move, dst, src));
    }

    /// Emit a constant load.
    pub fn emit_load_const(&mut self, dst: Register, value: Value) {
        let idx = self.add_const(value);
        self.instructions
            .push(Instruction::op_di(Opcode::LoadConst, dst, idx));
    }

    /// Emit a local load.
    pub fn emit_load_local(&mut self, dst: Register, slot: u16) {
        self.instructions
            .push(Instruction::op_di(Opcode::LoadLocal, dst, slot));
    }

    /// Emit a local store.
    pub fn emit_store_local(&mut self, src: Register, slot: u16) {
        self.instructions
            .push(Instruction::op_di(Opcode::StoreLocal, src, slot));
    }

    /// Emit `dst = src1 + src2`.
    pub fn emit_add(&mut self, dst: Register, src1: Register, src2: Register) {
        self.instructions
            .push(Instruction::op_dss(Opcode::Add, dst, src1, src2));
    }

    /// Emit `dst = src1 - src2`.
    pub fn emit_sub(&mut self, dst: Register, src1: Register, src2: Register) {
        self.instructions
            .push(Instruction::op_dss(Opcode::Sub, dst, src1, src2));
    }

    /// Emit `dst = src1 * src2`.
    pub fn emit_mul(&mut self, dst: Register, src1: Register, src2: Register) {
        self.instructions
            .push(Instruction::op_dss(Opcode::Mul, dst, src1, src2));
    }

    /// Emit `dst = src1 / src2`.
    pub fn emit_div(&mut self, dst: Register, src1: Register, src2: Register) {
        self.instructions
            .push(Instruction::op_dss(Opcode::Div, dst, src1, src2));
    }

    /// Emit `dst = src1 == src2`.
    pub fn emit_cmp_eq(&mut self, dst: Register, src1: Register, src2: Register) {
        self.instructions
            .push(Instruction::op_dss(Opcode::CmpEq, dst, src1, src2));
    }

    /// Emit `dst = src1 < src2`.
    pub fn emit_cmp_lt(&mut self, dst: Register, src1: Register, src2: Register) {
        self.instructions
            .push(Instruction::op_dss(Opcode::CmpLt, dst, src1, src2));
    }

    /// Emit an unconditional jump to `label`.
    pub fn emit_jump(&mut self, label: Label) {
        self.emit_branch(Instruction::op_i(Opcode::Jump, 0), label);
    }

    /// Emit a jump to `label` taken when `cond` is falsy.
    pub fn emit_jump_if_false(&mut self, cond: Register, label: Label) {
        self.emit_branch(Instruction::op_di(Opcode::JumpIfFalse, cond, 0), label);
    }

    /// Emit a jump to `label` taken when `cond` is truthy.
    pub fn emit_jump_if_true(&mut self, cond: Register, label: Label) {
        self.emit_branch(Instruction::op_di(Opcode::JumpIfTrue, cond, 0), label);
    }

    fn emit_branch(&mut self, placeholder: Instruction, label: Label) {
        self.forward_refs.push(ForwardRef {
            instruction_index: self.instructions.len(),
            label,
        });
        self.instructions.push(placeholder);
    }

    /// Emit a call; arguments must already occupy a contiguous register run
    /// starting at `arg_base`.
    pub fn emit_call(&mut self, dst: Register, callee: MethodId, arg_base: Register) {
        let idx = self.add_callee(callee);
        self.instructions.push(Instruction::new(
            Opcode::Call,
            dst.index(),
            idx,
            arg_base.index(),
        ));
    }

    /// Emit a return of `src`.
    pub fn emit_return(&mut self, src: Register) {
        self.instructions.push(Instruction::op_d(Opcode::Return, src));
    }

    /// Emit a raise of `src`.
    pub fn emit_raise(&mut self, src: Register) {
        self.instructions.push(Instruction::op_d(Opcode::Raise, src));
    }

    // =========================================================================
    // Finalization
    // =========================================================================

    /// Finish building and return the body.
    ///
    /// All labels referenced by branches or guard regions must be bound;
    /// an unbound label is a builder-usage bug, not a runtime condition.
    pub fn finish(mut self) -> MethodBody {
        for fwd in &self.forward_refs {
            let target = *self.labels.get(&fwd.label).expect("unbound label");
            let offset = (target as i32) - (fwd.instruction_index as i32) - 1;
            let old = self.instructions[fwd.instruction_index];
            self.instructions[fwd.instruction_index] = old.with_offset(offset as i16);
        }

        let try_regions = self
            .guards
            .iter()
            .map(|g| {
                let start_pc = *self.labels.get(&g.start).expect("unbound guard start") as u32;
                let end_pc = *self.labels.get(&g.end).expect("unbound guard end") as u32;
                let handler_pc = *self.labels.get(&g.handler).expect("unbound guard handler") as u32;
                TryRegion {
                    start_pc,
                    end_pc,
                    handler_pc,
                }
            })
            .collect();

        MethodBody {
            name: self.name,
            arg_count: self.arg_count,
            local_count: self.next_local,
            register_count: self.max_registers,
            consts: self.consts,
            callees: self.callees,
            code: self.instructions,
            try_regions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_function() {
        let mut b = BodyBuilder::new("add", 2);
        let x = b.alloc_register();
        let y = b.alloc_register();
        let r = b.alloc_register();
        b.emit_load_local(x, 0);
        b.emit_load_local(y, 1);
        b.emit_add(r, x, y);
        b.emit_return(r);

        let body = b.finish();
        assert_eq!(&*body.name, "add");
        assert_eq!(body.code.len(), 4);
        assert_eq!(body.register_count, 3);
        assert_eq!(body.local_count, 2);
    }

    #[test]
    fn test_constant_deduplication() {
        let mut b = BodyBuilder::new("t", 0);
        let a = b.add_const(Value::Int(42));
        let c = b.add_const(Value::Int(42));
        let d = b.add_const(Value::Int(100));
        assert_eq!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn test_forward_jump_is_patched() {
        let mut b = BodyBuilder::new("t", 0);
        let r = b.alloc_register();
        let end = b.create_label();
        b.emit_load_const(r, Value::Int(1));
        b.emit_jump(end);
        b.emit_load_const(r, Value::Int(2)); // skipped
        b.bind_label(end);
        b.emit_return(r);

        let body = b.finish();
        // jump at pc 1, target pc 3: offset = 3 - 1 - 1 = 1
        assert_eq!(body.code[1].offset(), 1);
    }

    #[test]
    fn test_backward_jump_is_patched() {
        let mut b = BodyBuilder::new("t", 0);
        let r = b.alloc_register();
        let top = b.create_label();
        b.bind_label(top);
        b.emit_nop();
        b.emit_jump(top);
        b.emit_return(r);

        let body = b.finish();
        // jump at pc 1, target pc 0: offset = 0 - 1 - 1 = -2
        assert_eq!(body.code[1].offset(), -2);
    }

    #[test]
    fn test_guard_region_resolution() {
        let mut b = BodyBuilder::new("t", 0);
        let r = b.alloc_register();
        let (start, end, handler) = (b.create_label(), b.create_label(), b.create_label());
        b.bind_label(start);
        b.emit_load_const(r, Value::Int(9));
        b.emit_raise(r);
        b.bind_label(end);
        b.bind_label(handler);
        b.emit_return(r);
        b.guard(start, end, handler);

        let body = b.finish();
        assert_eq!(body.try_regions.len(), 1);
        assert_eq!(body.try_regions[0].start_pc, 0);
        assert_eq!(body.try_regions[0].end_pc, 2);
        assert_eq!(body.try_regions[0].handler_pc, 2);
    }

    #[test]
    fn test_register_reuse() {
        let mut b = BodyBuilder::new("t", 0);
        let a = b.alloc_register();
        b.free_register(a);
        let c = b.alloc_register();
        assert_eq!(a, c);
        assert_eq!(b.alloc_register(), Register(1));
    }
}
