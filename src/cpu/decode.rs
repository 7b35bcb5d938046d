//! Instruction decoder.
//!
//! Every instruction is one 32-bit word in one of two layouts:
//!
//! ```text
//!  31    26 25   21 20   16 15   11 10          0
//! | opcode |  rd   |  rs1  |  rs2  |   unused    |   register form
//! | opcode |  rd   |  rs1  |        imm16        |   immediate form
//! ```
//!
//! Loads and stores use `rs1` as the base register and `imm16` as a signed
//! byte offset; a store reads its data from the `rd` field. Branches and
//! jumps use `imm16` as a signed offset in words from the instruction's
//! own address.

use crate::alu::{AluOp, Flags};
use serde::{Serialize, Deserialize};
use thiserror::Error;

/// Width and extension of a load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadKind {
    Word,
    /// Sign-extended byte.
    Byte,
    /// Zero-extended byte.
    ByteUnsigned,
}

/// Width of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreKind {
    Word,
    Byte,
}

/// Branch conditions, evaluated against the current flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Condition {
    /// Z
    Eq,
    /// !Z
    Ne,
    /// N != V
    Lt,
    /// N == V
    Ge,
    /// !C
    Ltu,
    /// C
    Geu,
}

impl Condition {
    pub const ALL: [Condition; 6] = [
        Condition::Eq,
        Condition::Ne,
        Condition::Lt,
        Condition::Ge,
        Condition::Ltu,
        Condition::Geu,
    ];

    /// Whether the branch is taken under `flags`.
    pub fn holds(self, flags: &Flags) -> bool {
        match self {
            Condition::Eq => flags.zero,
            Condition::Ne => !flags.zero,
            Condition::Lt => flags.less(),
            Condition::Ge => !flags.less(),
            Condition::Ltu => !flags.carry,
            Condition::Geu => flags.carry,
        }
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            Condition::Eq => "BEQ",
            Condition::Ne => "BNE",
            Condition::Lt => "BLT",
            Condition::Ge => "BGE",
            Condition::Ltu => "BLTU",
            Condition::Geu => "BGEU",
        }
    }

    fn index(self) -> u8 {
        match self {
            Condition::Eq => 0,
            Condition::Ne => 1,
            Condition::Lt => 2,
            Condition::Ge => 3,
            Condition::Ltu => 4,
            Condition::Geu => 5,
        }
    }
}

/// A decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Instruction {
    /// Stop the machine.
    Halt,

    /// No operation
    Nop,

    /// `rd := rs1 op rs2` (CMP only sets flags)
    Alu { op: AluOp, rd: u8, rs1: u8, rs2: u8 },

    /// `rd := rs1 op ext(imm)`; see [`AluOp::extend_imm`]
    AluImm { op: AluOp, rd: u8, rs1: u8, imm: u16 },

    /// `rd := imm << 16`
    Lui { rd: u8, imm: u16 },

    /// `rd := mem[base + offset]`
    Load { kind: LoadKind, rd: u8, base: u8, offset: i16 },

    /// `mem[base + offset] := rs`
    Store { kind: StoreKind, rs: u8, base: u8, offset: i16 },

    /// `pc := here + offset * 4`
    Jmp { offset: i16 },

    /// `rd := here + 4; pc := here + offset * 4`
    Jal { rd: u8, offset: i16 },

    /// `pc := rs1 + offset`
    Jr { rs1: u8, offset: i16 },

    /// `if cond { pc := here + offset * 4 }`
    Branch { cond: Condition, offset: i16 },
}

/// Opcode values (bits 31..26).
pub struct Opcode;

impl Opcode {
    pub const HALT: u8 = 0x00;
    /// First register-form ALU opcode; the rest follow in [`AluOp::ALL`] order.
    pub const ALU_BASE: u8 = 0x01;
    /// First immediate-form ALU opcode.
    pub const ALU_IMM_BASE: u8 = 0x0A;
    pub const LUI: u8 = 0x13;
    pub const LW: u8 = 0x14;
    pub const LB: u8 = 0x15;
    pub const LBU: u8 = 0x16;
    pub const SW: u8 = 0x17;
    pub const SB: u8 = 0x18;
    pub const JMP: u8 = 0x19;
    pub const JAL: u8 = 0x1A;
    pub const JR: u8 = 0x1B;
    /// First branch opcode; the rest follow in [`Condition::ALL`] order.
    pub const BRANCH_BASE: u8 = 0x1C;
    pub const NOP: u8 = 0x22;
}

const OPCODE_SHIFT: u32 = 26;
const RD_SHIFT: u32 = 21;
const RS1_SHIFT: u32 = 16;
const RS2_SHIFT: u32 = 11;
const REG_MASK: u32 = 0x1f;

/// Opcode field of a raw word.
#[inline]
pub fn opcode(word: u32) -> u8 {
    (word >> OPCODE_SHIFT) as u8
}

/// Decode a 32-bit instruction word.
pub fn decode(word: u32) -> Result<Instruction, DecodeError> {
    let op = opcode(word);
    let rd = ((word >> RD_SHIFT) & REG_MASK) as u8;
    let rs1 = ((word >> RS1_SHIFT) & REG_MASK) as u8;
    let rs2 = ((word >> RS2_SHIFT) & REG_MASK) as u8;
    let imm = word as u16;
    let offset = imm as i16;

    let alu_range = Opcode::ALU_BASE..Opcode::ALU_BASE + AluOp::ALL.len() as u8;
    let alu_imm_range = Opcode::ALU_IMM_BASE..Opcode::ALU_IMM_BASE + AluOp::ALL.len() as u8;
    let branch_range = Opcode::BRANCH_BASE..Opcode::BRANCH_BASE + Condition::ALL.len() as u8;

    let instruction = match op {
        Opcode::HALT => Instruction::Halt,
        Opcode::NOP => Instruction::Nop,
        op if alu_range.contains(&op) => Instruction::Alu {
            op: AluOp::ALL[(op - Opcode::ALU_BASE) as usize],
            rd,
            rs1,
            rs2,
        },
        op if alu_imm_range.contains(&op) => Instruction::AluImm {
            op: AluOp::ALL[(op - Opcode::ALU_IMM_BASE) as usize],
            rd,
            rs1,
            imm,
        },
        Opcode::LUI => Instruction::Lui { rd, imm },
        Opcode::LW => Instruction::Load { kind: LoadKind::Word, rd, base: rs1, offset },
        Opcode::LB => Instruction::Load { kind: LoadKind::Byte, rd, base: rs1, offset },
        Opcode::LBU => Instruction::Load { kind: LoadKind::ByteUnsigned, rd, base: rs1, offset },
        Opcode::SW => Instruction::Store { kind: StoreKind::Word, rs: rd, base: rs1, offset },
        Opcode::SB => Instruction::Store { kind: StoreKind::Byte, rs: rd, base: rs1, offset },
        Opcode::JMP => Instruction::Jmp { offset },
        Opcode::JAL => Instruction::Jal { rd, offset },
        Opcode::JR => Instruction::Jr { rs1, offset },
        op if branch_range.contains(&op) => Instruction::Branch {
            cond: Condition::ALL[(op - Opcode::BRANCH_BASE) as usize],
            offset,
        },
        _ => return Err(DecodeError::InvalidOpcode { opcode: op, word }),
    };

    Ok(instruction)
}

fn reg_form(op: u8, rd: u8, rs1: u8, rs2: u8) -> u32 {
    ((op as u32) << OPCODE_SHIFT)
        | ((rd as u32 & REG_MASK) << RD_SHIFT)
        | ((rs1 as u32 & REG_MASK) << RS1_SHIFT)
        | ((rs2 as u32 & REG_MASK) << RS2_SHIFT)
}

fn imm_form(op: u8, rd: u8, rs1: u8, imm: u16) -> u32 {
    ((op as u32) << OPCODE_SHIFT)
        | ((rd as u32 & REG_MASK) << RD_SHIFT)
        | ((rs1 as u32 & REG_MASK) << RS1_SHIFT)
        | imm as u32
}

/// Encode an instruction back to a 32-bit word.
///
/// Register fields are truncated to 5 bits.
pub fn encode(instr: &Instruction) -> u32 {
    match *instr {
        Instruction::Halt => reg_form(Opcode::HALT, 0, 0, 0),
        Instruction::Nop => reg_form(Opcode::NOP, 0, 0, 0),
        Instruction::Alu { op, rd, rs1, rs2 } => reg_form(Opcode::ALU_BASE + op.index(), rd, rs1, rs2),
        Instruction::AluImm { op, rd, rs1, imm } => imm_form(Opcode::ALU_IMM_BASE + op.index(), rd, rs1, imm),
        Instruction::Lui { rd, imm } => imm_form(Opcode::LUI, rd, 0, imm),
        Instruction::Load { kind, rd, base, offset } => {
            let op = match kind {
                LoadKind::Word => Opcode::LW,
                LoadKind::Byte => Opcode::LB,
                LoadKind::ByteUnsigned => Opcode::LBU,
            };
            imm_form(op, rd, base, offset as u16)
        }
        Instruction::Store { kind, rs, base, offset } => {
            let op = match kind {
                StoreKind::Word => Opcode::SW,
                StoreKind::Byte => Opcode::SB,
            };
            imm_form(op, rs, base, offset as u16)
        }
        Instruction::Jmp { offset } => imm_form(Opcode::JMP, 0, 0, offset as u16),
        Instruction::Jal { rd, offset } => imm_form(Opcode::JAL, rd, 0, offset as u16),
        Instruction::Jr { rs1, offset } => imm_form(Opcode::JR, 0, rs1, offset as u16),
        Instruction::Branch { cond, offset } => {
            imm_form(Opcode::BRANCH_BASE + cond.index(), 0, 0, offset as u16)
        }
    }
}

/// Errors that can occur during instruction decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("invalid opcode {opcode:#04x} in word {word:#010x}")]
    InvalidOpcode { opcode: u8, word: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_halt() {
        assert_eq!(decode(0).unwrap(), Instruction::Halt);
    }

    #[test]
    fn test_decode_add_fields() {
        // ADD r1, r2, r3
        let word = (0x01 << 26) | (1 << 21) | (2 << 16) | (3 << 11);
        assert_eq!(
            decode(word).unwrap(),
            Instruction::Alu { op: AluOp::Add, rd: 1, rs1: 2, rs2: 3 }
        );
        assert_eq!(encode(&Instruction::Alu { op: AluOp::Add, rd: 1, rs1: 2, rs2: 3 }), word);
    }

    #[test]
    fn test_decode_negative_offset() {
        let word = encode(&Instruction::Load { kind: LoadKind::Word, rd: 4, base: 5, offset: -8 });
        assert_eq!(word & 0xffff, 0xfff8);
        match decode(word).unwrap() {
            Instruction::Load { offset, base, rd, .. } => {
                assert_eq!((offset, base, rd), (-8, 5, 4));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_invalid_opcodes() {
        for op in [0x23u8, 0x30, 0x3f] {
            let word = (op as u32) << 26;
            assert_eq!(decode(word), Err(DecodeError::InvalidOpcode { opcode: op, word }));
        }
    }

    #[test]
    fn test_every_opcode_family_roundtrips() {
        let mut cases = vec![
            Instruction::Halt,
            Instruction::Nop,
            Instruction::Lui { rd: 7, imm: 0xbeef },
            Instruction::Store { kind: StoreKind::Byte, rs: 9, base: 2, offset: 3 },
            Instruction::Load { kind: LoadKind::ByteUnsigned, rd: 1, base: 0, offset: 0 },
            Instruction::Jmp { offset: -1 },
            Instruction::Jal { rd: 31, offset: 100 },
            Instruction::Jr { rs1: 31, offset: 0 },
        ];
        for op in AluOp::ALL {
            cases.push(Instruction::Alu { op, rd: 1, rs1: 2, rs2: 31 });
            cases.push(Instruction::AluImm { op, rd: 3, rs1: 4, imm: 0x8001 });
        }
        for cond in Condition::ALL {
            cases.push(Instruction::Branch { cond, offset: -4 });
        }

        for instr in cases {
            assert_eq!(decode(encode(&instr)).unwrap(), instr, "{:?}", instr);
        }
    }

    #[test]
    fn test_condition_holds() {
        let zero = Flags { zero: true, ..Flags::default() };
        assert!(Condition::Eq.holds(&zero));
        assert!(!Condition::Ne.holds(&zero));

        let less = Flags { negative: true, ..Flags::default() };
        assert!(Condition::Lt.holds(&less));
        assert!(!Condition::Ge.holds(&less));

        let no_borrow = Flags { carry: true, ..Flags::default() };
        assert!(Condition::Geu.holds(&no_borrow));
        assert!(!Condition::Ltu.holds(&no_borrow));
    }
}
