//! Register-based instruction definitions.
//!
//! All instructions are 32 bits wide for predictable decoding:
//!
//! ```text
//! ┌─────────┬─────────┬─────────┬─────────┐
//! │ opcode  │   dst   │  src1   │  src2   │
//! │ (8 bit) │ (8 bit) │ (8 bit) │ (8 bit) │
//! └─────────┴─────────┴─────────┴─────────┘
//! ```
//!
//! The `src1:src2` pair doubles as a 16-bit immediate for constant indices,
//! local slots, and branch offsets. Branch offsets are signed and relative:
//! `target = pc + 1 + offset`.

use std::fmt;

/// A virtual register index (0-255).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct Register(pub u8);

impl Register {
    /// Create a new register with the given index.
    #[inline]
    pub const fn new(index: u8) -> Self {
        Register(index)
    }

    /// Get the register index.
    #[inline]
    pub const fn index(self) -> u8 {
        self.0
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// Operation enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// No operation.
    Nop = 0,
    /// Copy `src1` into `dst`.
    Move = 1,
    /// Load constant pool entry `imm16` into `dst`.
    LoadConst = 2,
    /// Load local slot `imm16` into `dst`.
    LoadLocal = 3,
    /// Store register `dst` into local slot `imm16`.
    StoreLocal = 4,

    /// `dst = src1 + src2` (integer).
    Add = 16,
    /// `dst = src1 - src2` (integer).
    Sub = 17,
    /// `dst = src1 * src2` (integer).
    Mul = 18,
    /// `dst = src1 / src2` (integer, raises on zero divisor).
    Div = 19,
    /// `dst = src1 == src2`.
    CmpEq = 20,
    /// `dst = src1 < src2` (integer).
    CmpLt = 21,

    /// Unconditional relative jump by `imm16` (signed).
    Jump = 32,
    /// Jump by `imm16` if register `dst` is falsy.
    JumpIfFalse = 33,
    /// Jump by `imm16` if register `dst` is truthy.
    JumpIfTrue = 34,

    /// Call callee-pool entry `src1`; arguments start at register `src2`,
    /// result lands in `dst`.
    Call = 48,
    /// Return the value in register `dst`.
    Return = 49,
    /// Raise the value in register `dst`.
    Raise = 50,
}

/// Operand encoding of an opcode, used for disassembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstructionFormat {
    /// No operands.
    NoOp,
    /// `dst` only.
    Dst,
    /// `dst, src1`.
    DstSrc,
    /// `dst, src1, src2`.
    DstSrcSrc,
    /// `dst, #imm16`.
    DstImm16,
    /// `#imm16` only.
    Imm16,
}

impl Opcode {
    /// Decode an opcode from its raw byte.
    pub const fn from_u8(raw: u8) -> Option<Self> {
        Some(match raw {
            0 => Opcode::Nop,
            1 => Opcode::Move,
            2 => Opcode::LoadConst,
            3 => Opcode::LoadLocal,
            4 => Opcode::StoreLocal,
            16 => Opcode::Add,
            17 => Opcode::Sub,
            18 => Opcode::Mul,
            19 => Opcode::Div,
            20 => Opcode::CmpEq,
            21 => Opcode::CmpLt,
            32 => Opcode::Jump,
            33 => Opcode::JumpIfFalse,
            34 => Opcode::JumpIfTrue,
            48 => Opcode::Call,
            49 => Opcode::Return,
            50 => Opcode::Raise,
            _ => return None,
        })
    }

    /// Operand encoding for this opcode.
    pub const fn format(self) -> InstructionFormat {
        match self {
            Opcode::Nop => InstructionFormat::NoOp,
            Opcode::Move => InstructionFormat::DstSrc,
            Opcode::LoadConst | Opcode::LoadLocal | Opcode::StoreLocal => {
                InstructionFormat::DstImm16
            }
            Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::Div
            | Opcode::CmpEq
            | Opcode::CmpLt
            | Opcode::Call => InstructionFormat::DstSrcSrc,
            Opcode::Jump => InstructionFormat::Imm16,
            Opcode::JumpIfFalse | Opcode::JumpIfTrue => InstructionFormat::DstImm16,
            Opcode::Return | Opcode::Raise => InstructionFormat::Dst,
        }
    }

    /// Whether this opcode carries a branch offset in `imm16`.
    #[inline]
    pub const fn is_branch(self) -> bool {
        matches!(self, Opcode::Jump | Opcode::JumpIfFalse | Opcode::JumpIfTrue)
    }

    /// Whether control never falls through to the next instruction.
    #[inline]
    pub const fn is_exit(self) -> bool {
        matches!(self, Opcode::Jump | Opcode::Return | Opcode::Raise)
    }
}

/// A 32-bit packed instruction.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct Instruction(u32);

impl Instruction {
    /// Create an instruction from raw opcode and operand bytes.
    #[inline]
    pub const fn new(opcode: Opcode, dst: u8, src1: u8, src2: u8) -> Self {
        Instruction(
            ((opcode as u32) << 24) | ((dst as u32) << 16) | ((src1 as u32) << 8) | (src2 as u32),
        )
    }

    /// Opcode only, no operands.
    #[inline]
    pub const fn op(opcode: Opcode) -> Self {
        Self::new(opcode, 0, 0, 0)
    }

    /// Opcode and destination register.
    #[inline]
    pub const fn op_d(opcode: Opcode, dst: Register) -> Self {
        Self::new(opcode, dst.0, 0, 0)
    }

    /// Opcode, destination, one source.
    #[inline]
    pub const fn op_ds(opcode: Opcode, dst: Register, src: Register) -> Self {
        Self::new(opcode, dst.0, src.0, 0)
    }

    /// Opcode, destination, two sources.
    #[inline]
    pub const fn op_dss(opcode: Opcode, dst: Register, src1: Register, src2: Register) -> Self {
        Self::new(opcode, dst.0, src1.0, src2.0)
    }

    /// Opcode, destination, 16-bit immediate in `src1:src2`.
    #[inline]
    pub const fn op_di(opcode: Opcode, dst: Register, imm16: u16) -> Self {
        Self::new(opcode, dst.0, (imm16 >> 8) as u8, imm16 as u8)
    }

    /// Opcode and 16-bit immediate only.
    #[inline]
    pub const fn op_i(opcode: Opcode, imm16: u16) -> Self {
        Self::op_di(opcode, Register(0), imm16)
    }

    /// Raw opcode byte.
    #[inline]
    pub const fn opcode(self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// Decoded opcode, if valid.
    #[inline]
    pub const fn decoded(self) -> Option<Opcode> {
        Opcode::from_u8(self.opcode())
    }

    /// Destination register.
    #[inline]
    pub const fn dst(self) -> Register {
        Register(((self.0 >> 16) & 0xFF) as u8)
    }

    /// First source register.
    #[inline]
    pub const fn src1(self) -> Register {
        Register(((self.0 >> 8) & 0xFF) as u8)
    }

    /// Second source register.
    #[inline]
    pub const fn src2(self) -> Register {
        Register((self.0 & 0xFF) as u8)
    }

    /// 16-bit immediate from `src1:src2`.
    #[inline]
    pub const fn imm16(self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }

    /// Signed branch offset from `imm16`.
    #[inline]
    pub const fn offset(self) -> i16 {
        self.imm16() as i16
    }

    /// Re-encode this instruction with a new branch offset, preserving the
    /// opcode and `dst` byte.
    #[inline]
    pub const fn with_offset(self, offset: i16) -> Self {
        Instruction((self.0 & 0xFFFF_0000) | (offset as u16 as u32))
    }

    /// Whether this instruction is a branch.
    #[inline]
    pub fn is_branch(self) -> bool {
        self.decoded().map(Opcode::is_branch).unwrap_or(false)
    }

    /// Raw 32-bit value.
    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Instruction({:02x}, {}, {}, {})",
            self.opcode(),
            self.dst(),
            self.src1(),
            self.src2()
        )
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.decoded() {
            Some(op) => {
                write!(f, "{:?}", op)?;
                match op.format() {
                    InstructionFormat::NoOp => Ok(()),
                    InstructionFormat::Dst => write!(f, " {}", self.dst()),
                    InstructionFormat::DstSrc => write!(f, " {}, {}", self.dst(), self.src1()),
                    InstructionFormat::DstSrcSrc => {
                        write!(f, " {}, {}, {}", self.dst(), self.src1(), self.src2())
                    }
                    InstructionFormat::DstImm16 => {
                        write!(f, " {}, #{}", self.dst(), self.imm16())
                    }
                    InstructionFormat::Imm16 => write!(f, " #{}", self.imm16()),
                }
            }
            None => write!(f, "INVALID({:08x})", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packing_round_trip() {
        let inst = Instruction::op_dss(Opcode::Add, Register(2), Register(0), Register(1));
        assert_eq!(inst.decoded(), Some(Opcode::Add));
        assert_eq!(inst.dst(), Register(2));
        assert_eq!(inst.src1(), Register(0));
        assert_eq!(inst.src2(), Register(1));
    }

    #[test]
    fn test_signed_offset_round_trip() {
        let inst = Instruction::op_i(Opcode::Jump, (-5i16) as u16);
        assert_eq!(inst.offset(), -5);
        let forward = inst.with_offset(7);
        assert_eq!(forward.offset(), 7);
        assert_eq!(forward.decoded(), Some(Opcode::Jump));
    }

    #[test]
    fn test_with_offset_preserves_dst() {
        let inst = Instruction::op_di(Opcode::JumpIfFalse, Register(3), 0);
        let patched = inst.with_offset(-2);
        assert_eq!(patched.dst(), Register(3));
        assert_eq!(patched.offset(), -2);
    }

    #[test]
    fn test_invalid_opcode_decodes_to_none() {
        let inst = Instruction((200u32) << 24);
        assert_eq!(inst.decoded(), None);
        assert!(inst.to_string().contains("INVALID"));
    }

    #[test]
    fn test_exit_classification() {
        assert!(Opcode::Return.is_exit());
        assert!(Opcode::Jump.is_exit());
        assert!(!Opcode::JumpIfFalse.is_exit());
        assert!(Opcode::JumpIfFalse.is_branch());
    }
}
