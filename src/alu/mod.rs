//! The arithmetic logic unit.
//!
//! A pure function block over 32-bit two's-complement words:
//! - [`AluOp`] - the nine operations the instruction set can name
//! - [`compute`] - result plus [`Flags`] for one operation
//!
//! Nothing here holds state, so the same functions serve every simulator
//! instance.

mod flags;

pub use flags::Flags;

use serde::{Serialize, Deserialize};

/// ALU operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AluOp {
    Add,
    Sub,
    And,
    Or,
    Xor,
    /// Shift left logical.
    Sll,
    /// Shift right logical.
    Srl,
    /// Shift right arithmetic.
    Sra,
    /// Subtract for flags only; the engine discards the result.
    Cmp,
}

impl AluOp {
    /// All operations in encoding order.
    pub const ALL: [AluOp; 9] = [
        AluOp::Add,
        AluOp::Sub,
        AluOp::And,
        AluOp::Or,
        AluOp::Xor,
        AluOp::Sll,
        AluOp::Srl,
        AluOp::Sra,
        AluOp::Cmp,
    ];

    /// Position of this operation in [`AluOp::ALL`].
    pub fn index(self) -> u8 {
        match self {
            AluOp::Add => 0,
            AluOp::Sub => 1,
            AluOp::And => 2,
            AluOp::Or => 3,
            AluOp::Xor => 4,
            AluOp::Sll => 5,
            AluOp::Srl => 6,
            AluOp::Sra => 7,
            AluOp::Cmp => 8,
        }
    }

    /// Whether the result is committed to a destination register.
    pub fn writes_result(self) -> bool {
        self != AluOp::Cmp
    }

    /// Widen a 16-bit immediate to an operand for this operation.
    ///
    /// Arithmetic operations sign-extend, logical operations zero-extend
    /// (so `LUI` + `ORI` can build any constant), shifts keep 5 bits.
    pub fn extend_imm(self, imm: u16) -> u32 {
        match self {
            AluOp::Add | AluOp::Sub | AluOp::Cmp => imm as i16 as i32 as u32,
            AluOp::And | AluOp::Or | AluOp::Xor => imm as u32,
            AluOp::Sll | AluOp::Srl | AluOp::Sra => (imm & 0x1f) as u32,
        }
    }

    /// Assembly mnemonic of the register form.
    pub fn mnemonic(self) -> &'static str {
        match self {
            AluOp::Add => "ADD",
            AluOp::Sub => "SUB",
            AluOp::And => "AND",
            AluOp::Or => "OR",
            AluOp::Xor => "XOR",
            AluOp::Sll => "SLL",
            AluOp::Srl => "SRL",
            AluOp::Sra => "SRA",
            AluOp::Cmp => "CMP",
        }
    }
}

/// Result of one ALU operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AluOutput {
    pub result: u32,
    pub flags: Flags,
}

/// Compute `a op b` and the resulting condition flags.
pub fn compute(op: AluOp, a: u32, b: u32) -> AluOutput {
    match op {
        AluOp::Add => add(a, b),
        AluOp::Sub | AluOp::Cmp => subtract(a, b),
        AluOp::And => logical(a & b),
        AluOp::Or => logical(a | b),
        AluOp::Xor => logical(a ^ b),
        AluOp::Sll => shift_left(a, b),
        AluOp::Srl => shift_right(a, b, false),
        AluOp::Sra => shift_right(a, b, true),
    }
}

/// Add with unsigned carry-out and signed overflow.
pub fn add(a: u32, b: u32) -> AluOutput {
    let (result, carry) = a.overflowing_add(b);
    let mut flags = Flags::from_result(result);
    flags.carry = carry;
    // Both operands share a sign that the result does not.
    flags.overflow = (a ^ result) & (b ^ result) & 0x8000_0000 != 0;
    AluOutput { result, flags }
}

/// Subtract as `a + !b + 1`; carry is set when no borrow occurs.
pub fn subtract(a: u32, b: u32) -> AluOutput {
    let result = a.wrapping_sub(b);
    let mut flags = Flags::from_result(result);
    flags.carry = a >= b;
    flags.overflow = (a ^ b) & (a ^ result) & 0x8000_0000 != 0;
    AluOutput { result, flags }
}

fn logical(result: u32) -> AluOutput {
    AluOutput { result, flags: Flags::from_result(result) }
}

/// Shift left by `b & 31`; carry holds the last bit shifted out.
pub fn shift_left(a: u32, b: u32) -> AluOutput {
    let amount = b & 0x1f;
    let result = a << amount;
    let mut flags = Flags::from_result(result);
    flags.carry = amount != 0 && (a >> (32 - amount)) & 1 != 0;
    AluOutput { result, flags }
}

/// Shift right by `b & 31`, logical or arithmetic.
pub fn shift_right(a: u32, b: u32, arithmetic: bool) -> AluOutput {
    let amount = b & 0x1f;
    let result = if arithmetic {
        ((a as i32) >> amount) as u32
    } else {
        a >> amount
    };
    let mut flags = Flags::from_result(result);
    flags.carry = amount != 0 && (a >> (amount - 1)) & 1 != 0;
    AluOutput { result, flags }
}
