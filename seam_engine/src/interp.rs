//! Execution of method bodies.
//!
//! A small register-machine executor. Its purpose inside the engine is to
//! make synthesized replacements *observable*: tests and callers invoke a
//! method id and get the behavior the current entry slots produce. Calls
//! resolve callees through the method table's entry indirection, so an
//! installed detour affects every future call.

use crate::method_table::MethodTable;
use seam_bytecode::{Instruction, MethodBody, Opcode};
use seam_core::{MethodId, PatchError, PatchResult, Value};
use std::sync::Arc;

/// Default call-depth limit.
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Control flow result from executing one instruction.
#[derive(Debug, Clone)]
enum ControlFlow {
    /// Continue to the next instruction.
    Next,
    /// Jump to an absolute pc.
    Jump(usize),
    /// Return a value and pop the frame.
    Return(Value),
    /// Raise a value; the loop searches the exception regions.
    Raise(Value),
    /// Unrecoverable execution error.
    Error(PatchError),
}

/// One activation frame.
struct Frame {
    locals: Vec<Value>,
    regs: Vec<Value>,
}

impl Frame {
    fn new(body: &MethodBody, args: &[Value]) -> Self {
        let mut locals = vec![Value::None; body.local_count as usize];
        locals[..args.len()].copy_from_slice(args);
        Self {
            locals,
            regs: vec![Value::None; body.register_count as usize],
        }
    }
}

/// Executor over a method table.
pub struct Interpreter<'t> {
    table: &'t MethodTable,
    max_depth: usize,
}

impl<'t> Interpreter<'t> {
    /// Create an executor with the default depth limit.
    pub fn new(table: &'t MethodTable) -> Self {
        Self {
            table,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    /// Create an executor with a custom depth limit.
    pub fn with_max_depth(table: &'t MethodTable, max_depth: usize) -> Self {
        Self { table, max_depth }
    }

    /// Call the method behind `id` with `args`.
    ///
    /// Dispatches through the entry slot, so a detoured method executes
    /// its current replacement.
    pub fn call(&self, id: MethodId, args: &[Value]) -> PatchResult<Value> {
        self.call_at_depth(id, args, 0)
    }

    fn call_at_depth(&self, id: MethodId, args: &[Value], depth: usize) -> PatchResult<Value> {
        if depth >= self.max_depth {
            return Err(PatchError::RecursionLimit {
                depth: self.max_depth,
            });
        }
        let entry = self
            .table
            .lookup(id)
            .ok_or_else(|| PatchError::missing_method(PatchError::method_name(id)))?;
        let body = self
            .table
            .resolve(id)
            .ok_or_else(|| PatchError::unsupported(entry.name().clone()))?;
        if args.len() != body.arg_count as usize {
            return Err(PatchError::internal(format!(
                "{} expects {} arguments, got {}",
                body.name,
                body.arg_count,
                args.len()
            )));
        }
        self.run(&body, args, depth)
    }

    fn run(&self, body: &Arc<MethodBody>, args: &[Value], depth: usize) -> PatchResult<Value> {
        let mut frame = Frame::new(body, args);
        let mut pc = 0usize;

        while pc < body.code.len() {
            let inst = body.code[pc];
            match self.step(body, &mut frame, pc, inst, depth) {
                ControlFlow::Next => pc += 1,
                ControlFlow::Jump(target) => pc = target,
                ControlFlow::Return(value) => return Ok(value),
                ControlFlow::Raise(value) => match body.handler_for(pc as u32) {
                    Some(region) => {
                        // The raised value is delivered in register 0.
                        if let Some(slot) = frame.regs.get_mut(0) {
                            *slot = value;
                        }
                        pc = region.handler_pc as usize;
                    }
                    None => return Err(PatchError::Raised { value }),
                },
                ControlFlow::Error(err) => return Err(err),
            }
        }

        // Degraded (empty) bodies and bodies that drain without an explicit
        // return yield the absent value.
        Ok(Value::None)
    }

    fn step(
        &self,
        body: &Arc<MethodBody>,
        frame: &mut Frame,
        pc: usize,
        inst: Instruction,
        depth: usize,
    ) -> ControlFlow {
        let opcode = match inst.decoded() {
            Some(op) => op,
            None => {
                return ControlFlow::Error(PatchError::InvalidOpcode {
                    opcode: inst.opcode(),
                })
            }
        };

        macro_rules! reg {
            ($r:expr) => {
                frame.regs[$r.index() as usize]
            };
        }

        match opcode {
            Opcode::Nop => ControlFlow::Next,
            Opcode::Move => {
                reg!(inst.dst()) = reg!(inst.src1());
                ControlFlow::Next
            }
            Opcode::LoadConst => {
                reg!(inst.dst()) = body.consts[inst.imm16() as usize];
                ControlFlow::Next
            }
            Opcode::LoadLocal => {
                reg!(inst.dst()) = frame.locals[inst.imm16() as usize];
                ControlFlow::Next
            }
            Opcode::StoreLocal => {
                frame.locals[inst.imm16() as usize] = reg!(inst.dst());
                ControlFlow::Next
            }
            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::CmpLt => {
                let (a, b) = (reg!(inst.src1()), reg!(inst.src2()));
                let (Some(a), Some(b)) = (a.as_int(), b.as_int()) else {
                    return ControlFlow::Error(PatchError::internal(format!(
                        "integer operands required at pc {} of {}",
                        pc, body.name
                    )));
                };
                let result = match opcode {
                    Opcode::Add => Value::Int(a.wrapping_add(b)),
                    Opcode::Sub => Value::Int(a.wrapping_sub(b)),
                    Opcode::Mul => Value::Int(a.wrapping_mul(b)),
                    Opcode::Div => {
                        if b == 0 {
                            return ControlFlow::Error(PatchError::DivisionByZero);
                        }
                        Value::Int(a.wrapping_div(b))
                    }
                    _ => Value::Bool(a < b),
                };
                reg!(inst.dst()) = result;
                ControlFlow::Next
            }
            Opcode::CmpEq => {
                let equal = reg!(inst.src1()) == reg!(inst.src2());
                reg!(inst.dst()) = Value::Bool(equal);
                ControlFlow::Next
            }
            Opcode::Jump => ControlFlow::Jump(branch_target(pc, inst)),
            Opcode::JumpIfFalse => {
                if reg!(inst.dst()).is_truthy() {
                    ControlFlow::Next
                } else {
                    ControlFlow::Jump(branch_target(pc, inst))
                }
            }
            Opcode::JumpIfTrue => {
                if reg!(inst.dst()).is_truthy() {
                    ControlFlow::Jump(branch_target(pc, inst))
                } else {
                    ControlFlow::Next
                }
            }
            Opcode::Call => {
                let callee = body.callees[inst.src1().index() as usize];
                let arg_count = match self.table.lookup(callee) {
                    Some(entry) => entry.arg_count() as usize,
                    None => {
                        return ControlFlow::Error(PatchError::missing_method(
                            PatchError::method_name(callee),
                        ))
                    }
                };
                let base = inst.src2().index() as usize;
                // The generator cannot check this span: callee arity lives
                // in the table, not the body.
                if base + arg_count > frame.regs.len() {
                    return ControlFlow::Error(PatchError::invalid_body(format!(
                        "call at pc {} of {} needs argument registers {}..{} but the frame has {}",
                        pc,
                        body.name,
                        base,
                        base + arg_count,
                        frame.regs.len()
                    )));
                }
                let args: Vec<Value> = frame.regs[base..base + arg_count].to_vec();
                match self.call_at_depth(callee, &args, depth + 1) {
                    Ok(value) => {
                        reg!(inst.dst()) = value;
                        ControlFlow::Next
                    }
                    // A raise in the callee unwinds into this frame's
                    // exception regions.
                    Err(PatchError::Raised { value }) => ControlFlow::Raise(value),
                    Err(err) => ControlFlow::Error(err),
                }
            }
            Opcode::Return => ControlFlow::Return(reg!(inst.dst())),
            Opcode::Raise => ControlFlow::Raise(reg!(inst.dst())),
        }
    }
}

#[inline]
fn branch_target(pc: usize, inst: Instruction) -> usize {
    (pc as i64 + 1 + inst.offset() as i64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::method_table::MethodTable;
    use seam_bytecode::{BodyBuilder, Register};
    use seam_core::MethodId;

    fn add_body() -> MethodBody {
        let mut b = BodyBuilder::new("add", 2);
        let x = b.alloc_register();
        let y = b.alloc_register();
        let r = b.alloc_register();
        b.emit_load_local(x, 0);
        b.emit_load_local(y, 1);
        b.emit_add(r, x, y);
        b.emit_return(r);
        b.finish()
    }

    #[test]
    fn test_add_executes() {
        let table = MethodTable::new();
        let id = table.register(add_body());
        let result = Interpreter::new(&table)
            .call(id, &[Value::Int(2), Value::Int(3)])
            .unwrap();
        assert_eq!(result, Value::Int(5));
    }

    #[test]
    fn test_branching() {
        // max(a, b)
        let mut b = BodyBuilder::new("max", 2);
        let x = b.alloc_register();
        let y = b.alloc_register();
        let c = b.alloc_register();
        let take_y = b.create_label();
        b.emit_load_local(x, 0);
        b.emit_load_local(y, 1);
        b.emit_cmp_lt(c, x, y);
        b.emit_jump_if_true(c, take_y);
        b.emit_return(x);
        b.bind_label(take_y);
        b.emit_return(y);

        let table = MethodTable::new();
        let id = table.register(b.finish());
        let interp = Interpreter::new(&table);
        assert_eq!(
            interp.call(id, &[Value::Int(7), Value::Int(3)]).unwrap(),
            Value::Int(7)
        );
        assert_eq!(
            interp.call(id, &[Value::Int(3), Value::Int(7)]).unwrap(),
            Value::Int(7)
        );
    }

    #[test]
    fn test_division_by_zero() {
        let mut b = BodyBuilder::new("div", 2);
        let x = b.alloc_register();
        let y = b.alloc_register();
        let r = b.alloc_register();
        b.emit_load_local(x, 0);
        b.emit_load_local(y, 1);
        b.emit_div(r, x, y);
        b.emit_return(r);

        let table = MethodTable::new();
        let id = table.register(b.finish());
        let err = Interpreter::new(&table)
            .call(id, &[Value::Int(1), Value::Int(0)])
            .unwrap_err();
        assert_eq!(err, PatchError::DivisionByZero);
    }

    #[test]
    fn test_raise_caught_by_region() {
        let mut b = BodyBuilder::new("guarded", 0);
        let r = b.alloc_register();
        let (start, end, handler) = (b.create_label(), b.create_label(), b.create_label());
        let done = b.create_label();
        b.bind_label(start);
        b.emit_load_const(r, Value::Int(42));
        b.emit_raise(r);
        b.bind_label(end);
        b.emit_jump(done);
        b.bind_label(handler);
        // `r` is register 0, where the raised value arrives.
        b.emit_return(r);
        b.bind_label(done);
        b.emit_return(r);
        b.guard(start, end, handler);

        let table = MethodTable::new();
        let id = table.register(b.finish());
        let result = Interpreter::new(&table).call(id, &[]).unwrap();
        assert_eq!(result, Value::Int(42));
    }

    #[test]
    fn test_uncaught_raise_propagates() {
        let mut b = BodyBuilder::new("raiser", 0);
        let r = b.alloc_register();
        b.emit_load_const(r, Value::Int(9));
        b.emit_raise(r);

        let table = MethodTable::new();
        let id = table.register(b.finish());
        let err = Interpreter::new(&table).call(id, &[]).unwrap_err();
        assert_eq!(
            err,
            PatchError::Raised {
                value: Value::Int(9)
            }
        );
    }

    #[test]
    fn test_raise_payload_crosses_frames_losslessly() {
        let table = MethodTable::new();
        let mut b = BodyBuilder::new("raiser", 0);
        let r = b.alloc_register();
        b.emit_load_const(r, Value::Bool(true));
        b.emit_raise(r);
        let raiser = table.register(b.finish());

        // outer() catches the callee's raise and returns the payload.
        let mut b = BodyBuilder::new("outer", 0);
        let r = b.alloc_register();
        let (start, end, handler) = (b.create_label(), b.create_label(), b.create_label());
        let done = b.create_label();
        b.bind_label(start);
        b.emit_call(r, raiser, r);
        b.bind_label(end);
        b.emit_jump(done);
        b.bind_label(handler);
        b.emit_return(r);
        b.bind_label(done);
        b.emit_return(r);
        b.guard(start, end, handler);
        let outer = table.register(b.finish());

        let result = Interpreter::new(&table).call(outer, &[]).unwrap();
        assert_eq!(result, Value::Bool(true));

        // Uncaught, the same payload surfaces untouched in the error.
        let err = Interpreter::new(&table).call(raiser, &[]).unwrap_err();
        assert_eq!(
            err,
            PatchError::Raised {
                value: Value::Bool(true)
            }
        );
    }

    #[test]
    fn test_call_with_undersized_frame_is_rejected() {
        let table = MethodTable::new();
        let callee = table.register(add_body());

        // A hand-emitted caller whose frame is one register wide but whose
        // call needs two argument registers.
        let mut stream = seam_bytecode::InstructionStream::empty("caller", 0);
        let idx = stream.add_callee(callee);
        let r0 = Register(stream.alloc_register());
        stream.push(Instruction::new(Opcode::Call, r0.index(), idx, r0.index()));
        stream.push(Instruction::op_d(Opcode::Return, r0));
        let caller = table.register(stream.emit().unwrap());

        let err = Interpreter::new(&table).call(caller, &[]).unwrap_err();
        assert!(matches!(err, PatchError::InvalidBody { .. }));
        assert!(err.to_string().contains("argument registers"));
    }

    #[test]
    fn test_call_dispatches_through_entry_slot() {
        let table = MethodTable::new();
        let inner = table.register(add_body());

        // outer(a, b) = inner(a, b)
        let mut b = BodyBuilder::new("outer", 2);
        let a0 = b.alloc_register();
        let a1 = b.alloc_register();
        let r = b.alloc_register();
        b.emit_load_local(a0, 0);
        b.emit_load_local(a1, 1);
        b.emit_call(r, inner, a0);
        b.emit_return(r);
        let outer = table.register(b.finish());

        let interp = Interpreter::new(&table);
        assert_eq!(
            interp
                .call(outer, &[Value::Int(2), Value::Int(3)])
                .unwrap(),
            Value::Int(5)
        );

        // Detour the inner method; the outer call now sees the new body.
        let mut b = BodyBuilder::new("always9", 2);
        let r = b.alloc_register();
        b.emit_load_const(r, Value::Int(9));
        b.emit_return(r);
        let nine = table.register(b.finish());
        table.retarget(inner, nine);

        assert_eq!(
            interp
                .call(outer, &[Value::Int(2), Value::Int(3)])
                .unwrap(),
            Value::Int(9)
        );
    }

    #[test]
    fn test_recursion_limit() {
        let table = MethodTable::new();
        // First registration receives id 0, so the body can call itself.
        let mut b = BodyBuilder::new("forever", 0);
        let r = b.alloc_register();
        b.emit_call(r, MethodId::new(0), r);
        b.emit_return(r);
        let id = table.register(b.finish());
        assert_eq!(id, MethodId::new(0));
        let err = Interpreter::new(&table).call(id, &[]).unwrap_err();
        assert!(matches!(err, PatchError::RecursionLimit { .. }));
    }

    #[test]
    fn test_empty_body_returns_none() {
        let table = MethodTable::new();
        let body = seam_bytecode::InstructionStream::empty("stub", 0)
            .emit()
            .unwrap();
        let id = table.register(body);
        assert_eq!(Interpreter::new(&table).call(id, &[]).unwrap(), Value::None);
    }

    #[test]
    fn test_calling_stub_is_unsupported() {
        let table = MethodTable::new();
        let id = table.register_stub("intrinsic", 0);
        let err = Interpreter::new(&table).call(id, &[]).unwrap_err();
        assert!(matches!(err, PatchError::UnsupportedMethod { .. }));
    }
}
