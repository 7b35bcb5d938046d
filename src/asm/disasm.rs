//! Disassembler.
//!
//! Converts instruction words back to assembler syntax. Branch and jump
//! targets are printed as absolute addresses, so a listing assembles
//! back to the same words.

use crate::alu::AluOp;
use crate::cpu::decode::{decode, Instruction, LoadKind, StoreKind};

/// Disassemble a single word located at `addr`.
pub fn disassemble_instruction(word: u32, addr: u32) -> String {
    match decode(word) {
        Ok(decoded) => format_instruction(&decoded, addr),
        Err(_) => format!("DAT {:#010x} ; ???", word),
    }
}

/// Disassemble a program loaded at `base`.
pub fn disassemble(words: &[u32], base: u32) -> String {
    let mut output = String::new();
    output.push_str("; cycle-sim disassembly\n");
    output.push_str("; ---------------------\n\n");

    for (i, word) in words.iter().enumerate() {
        let addr = base.wrapping_add(i as u32 * 4);
        let line = disassemble_instruction(*word, addr);
        output.push_str(&format!("{:04x}: {:08x}  {}\n", addr, word, line));
    }

    output
}

/// Format a decoded instruction as assembly text.
pub fn format_instruction(instr: &Instruction, addr: u32) -> String {
    let target = |offset: i16| addr.wrapping_add((offset as i32 as u32).wrapping_mul(4));

    match *instr {
        Instruction::Halt => "HALT".to_string(),
        Instruction::Nop => "NOP".to_string(),

        Instruction::Alu { op: AluOp::Cmp, rs1, rs2, .. } => format!("CMP r{}, r{}", rs1, rs2),
        Instruction::Alu { op, rd, rs1, rs2 } => {
            format!("{} r{}, r{}, r{}", op.mnemonic(), rd, rs1, rs2)
        }

        Instruction::AluImm { op: AluOp::Cmp, rs1, imm, .. } => {
            format!("CMPI r{}, {}", rs1, imm as i16)
        }
        Instruction::AluImm { op, rd, rs1, imm } => {
            format!("{}I r{}, r{}, {}", op.mnemonic(), rd, rs1, format_imm(op, imm))
        }

        Instruction::Lui { rd, imm } => format!("LUI r{}, {:#x}", rd, imm),

        Instruction::Load { kind, rd, base, offset } => {
            let mnemonic = match kind {
                LoadKind::Word => "LW",
                LoadKind::Byte => "LB",
                LoadKind::ByteUnsigned => "LBU",
            };
            format!("{} r{}, {}", mnemonic, rd, format_mem(base, offset))
        }

        Instruction::Store { kind, rs, base, offset } => {
            let mnemonic = match kind {
                StoreKind::Word => "SW",
                StoreKind::Byte => "SB",
            };
            format!("{} r{}, {}", mnemonic, rs, format_mem(base, offset))
        }

        Instruction::Jmp { offset } => format!("JMP {:#06x}", target(offset)),
        Instruction::Jal { rd, offset } => format!("JAL r{}, {:#06x}", rd, target(offset)),
        Instruction::Jr { rs1, offset: 0 } => format!("JR r{}", rs1),
        Instruction::Jr { rs1, offset } => format!("JR r{}, {}", rs1, offset),
        Instruction::Branch { cond, offset } => format!("{} {:#06x}", cond.mnemonic(), target(offset)),
    }
}

/// Immediates print the way the ALU will read them.
fn format_imm(op: AluOp, imm: u16) -> String {
    match op {
        AluOp::And | AluOp::Or | AluOp::Xor => format!("{:#x}", imm),
        AluOp::Sll | AluOp::Srl | AluOp::Sra => format!("{}", imm & 0x1f),
        _ => format!("{}", imm as i16),
    }
}

/// Format a `[base+offset]` memory operand.
fn format_mem(base: u8, offset: i16) -> String {
    match offset {
        0 => format!("[r{}]", base),
        o if o < 0 => format!("[r{}-{}]", base, -(o as i32)),
        o => format!("[r{}+{}]", base, o),
    }
}
