//! Two-pass assembler.
//!
//! Syntax:
//! ```text
//! ; Comment
//! START:              ; Define a label
//!     LI   r2, 5      ; Load a 32-bit constant (LUI + ORI)
//!     ADDI r3, r0, 7
//!     ADD  r1, r2, r3
//!     SW   r1, [r4+8] ; Store to base register + offset
//!     CMPI r1, 12
//!     BEQ  DONE       ; Branch to label (or absolute address)
//! DONE:
//!     HALT
//!
//!     ORG 0x100       ; Move to address, padding with zero words
//!     DAT 42          ; Raw data word
//! ```
//!
//! Pass one assigns addresses and collects labels; pass two encodes, so
//! forward references work anywhere an address is expected.

use crate::alu::AluOp;
use crate::cpu::decode::{encode, Condition, Instruction, LoadKind, StoreKind};
use std::collections::HashMap;
use thiserror::Error;

/// Assemble source code to a list of instruction words starting at address 0.
pub fn assemble(source: &str) -> Result<Vec<u32>, AssemblerError> {
    let mut asm = Assembler::new();
    asm.assemble(source)
}

/// One source line that produces output.
struct Statement {
    addr: u32,
    line: usize,
    mnemonic: String,
    operands: Vec<String>,
}

/// The assembler state.
struct Assembler {
    /// Current address (origin).
    current_addr: u32,
    /// Symbol table (label -> address).
    symbols: HashMap<String, u32>,
    /// Statements collected by pass one.
    statements: Vec<Statement>,
}

impl Assembler {
    fn new() -> Self {
        Self {
            current_addr: 0,
            symbols: HashMap::new(),
            statements: Vec::new(),
        }
    }

    fn assemble(&mut self, source: &str) -> Result<Vec<u32>, AssemblerError> {
        // Pass 1: Collect labels and lay out addresses
        for (line_num, line) in source.lines().enumerate() {
            self.process_line(line, line_num + 1)?;
        }

        // Pass 2: Encode with every label known
        let mut output = Vec::new();
        for stmt in &self.statements {
            let words = self.encode_statement(stmt)?;
            output.resize((stmt.addr / 4) as usize, 0);
            output.extend(words);
        }
        output.resize((self.current_addr / 4) as usize, 0);

        Ok(output)
    }

    fn process_line(&mut self, line: &str, line_num: usize) -> Result<(), AssemblerError> {
        // Remove comments
        let mut line = match line.find(';') {
            Some(idx) => &line[..idx],
            None => line,
        }
        .trim();

        // Peel off any label definitions
        while let Some(colon_idx) = line.find(':') {
            let label = line[..colon_idx].trim().to_uppercase();
            if !is_identifier(&label) {
                return Err(AssemblerError::SyntaxError {
                    line: line_num,
                    message: format!("invalid label `{}`", label),
                });
            }
            if self.symbols.insert(label.clone(), self.current_addr).is_some() {
                return Err(AssemblerError::DuplicateLabel { line: line_num, label });
            }
            line = line[colon_idx + 1..].trim();
        }

        if line.is_empty() {
            return Ok(());
        }

        let (mnemonic, rest) = match line.find(char::is_whitespace) {
            Some(idx) => (&line[..idx], line[idx..].trim()),
            None => (line, ""),
        };
        let mnemonic = mnemonic.to_uppercase();
        let operands: Vec<String> = if rest.is_empty() {
            Vec::new()
        } else {
            rest.split(',').map(|s| s.trim().to_string()).collect()
        };

        if mnemonic == "ORG" {
            let [target] = expect_operands::<1>(&mnemonic, &operands, line_num)?;
            let addr = parse_number(target, line_num)?;
            if addr < self.current_addr as i64 || addr > u32::MAX as i64 || addr % 4 != 0 {
                return Err(AssemblerError::SyntaxError {
                    line: line_num,
                    message: format!("ORG {:#x} must be word-aligned and not move backwards", addr),
                });
            }
            self.current_addr = addr as u32;
            return Ok(());
        }

        let size = if mnemonic == "LI" { 8 } else { 4 };
        self.statements.push(Statement {
            addr: self.current_addr,
            line: line_num,
            mnemonic,
            operands,
        });
        self.current_addr = self.current_addr.checked_add(size).ok_or(AssemblerError::SyntaxError {
            line: line_num,
            message: "program exceeds the address space".into(),
        })?;

        Ok(())
    }

    fn encode_statement(&self, stmt: &Statement) -> Result<Vec<u32>, AssemblerError> {
        let line = stmt.line;
        let ops = &stmt.operands;
        let mnemonic = stmt.mnemonic.as_str();

        let instr = match mnemonic {
            // Directives and pseudo-instructions
            "DAT" | ".WORD" => {
                let [value] = expect_operands::<1>(mnemonic, ops, line)?;
                return Ok(vec![self.word_value(value, line)?]);
            }

            "LI" => {
                let [rd, value] = expect_operands::<2>(mnemonic, ops, line)?;
                let rd = parse_register(rd, line)?;
                let value = self.word_value(value, line)?;
                return Ok(vec![
                    encode(&Instruction::Lui { rd, imm: (value >> 16) as u16 }),
                    encode(&Instruction::AluImm { op: AluOp::Or, rd, rs1: rd, imm: value as u16 }),
                ]);
            }

            "MOV" => {
                let [rd, rs] = expect_operands::<2>(mnemonic, ops, line)?;
                Instruction::AluImm {
                    op: AluOp::Add,
                    rd: parse_register(rd, line)?,
                    rs1: parse_register(rs, line)?,
                    imm: 0,
                }
            }

            // Control
            "HALT" | "HLT" => {
                expect_operands::<0>(mnemonic, ops, line)?;
                Instruction::Halt
            }
            "NOP" => {
                expect_operands::<0>(mnemonic, ops, line)?;
                Instruction::Nop
            }
            "JMP" => {
                let [target] = expect_operands::<1>(mnemonic, ops, line)?;
                Instruction::Jmp { offset: self.branch_offset(target, stmt)? }
            }
            "JAL" => match ops.len() {
                1 => Instruction::Jal { rd: 31, offset: self.branch_offset(&ops[0], stmt)? },
                _ => {
                    let [rd, target] = expect_operands::<2>(mnemonic, ops, line)?;
                    Instruction::Jal {
                        rd: parse_register(rd, line)?,
                        offset: self.branch_offset(target, stmt)?,
                    }
                }
            },
            "JR" => match ops.len() {
                1 => Instruction::Jr { rs1: parse_register(&ops[0], line)?, offset: 0 },
                _ => {
                    let [rs1, offset] = expect_operands::<2>(mnemonic, ops, line)?;
                    Instruction::Jr {
                        rs1: parse_register(rs1, line)?,
                        offset: signed16(parse_number(offset, line)?, line)?,
                    }
                }
            },

            // Memory
            "LW" | "LB" | "LBU" => {
                let [rd, mem] = expect_operands::<2>(mnemonic, ops, line)?;
                let kind = match mnemonic {
                    "LW" => LoadKind::Word,
                    "LB" => LoadKind::Byte,
                    _ => LoadKind::ByteUnsigned,
                };
                let (base, offset) = parse_memory(mem, line)?;
                Instruction::Load { kind, rd: parse_register(rd, line)?, base, offset }
            }
            "SW" | "SB" => {
                let [rs, mem] = expect_operands::<2>(mnemonic, ops, line)?;
                let kind = if mnemonic == "SW" { StoreKind::Word } else { StoreKind::Byte };
                let (base, offset) = parse_memory(mem, line)?;
                Instruction::Store { kind, rs: parse_register(rs, line)?, base, offset }
            }

            "LUI" => {
                let [rd, imm] = expect_operands::<2>(mnemonic, ops, line)?;
                let value = parse_number(imm, line)?;
                if !(0..=0xffff).contains(&value) {
                    return Err(AssemblerError::ValueOutOfRange { line, value });
                }
                Instruction::Lui { rd: parse_register(rd, line)?, imm: value as u16 }
            }

            // Compare
            "CMP" => {
                let [rs1, rs2] = expect_operands::<2>(mnemonic, ops, line)?;
                Instruction::Alu {
                    op: AluOp::Cmp,
                    rd: 0,
                    rs1: parse_register(rs1, line)?,
                    rs2: parse_register(rs2, line)?,
                }
            }
            "CMPI" => {
                let [rs1, imm] = expect_operands::<2>(mnemonic, ops, line)?;
                Instruction::AluImm {
                    op: AluOp::Cmp,
                    rd: 0,
                    rs1: parse_register(rs1, line)?,
                    imm: immediate(AluOp::Cmp, parse_number(imm, line)?, line)?,
                }
            }

            _ => {
                if let Some(cond) = Condition::ALL.iter().find(|c| c.mnemonic() == mnemonic) {
                    let [target] = expect_operands::<1>(mnemonic, ops, line)?;
                    Instruction::Branch { cond: *cond, offset: self.branch_offset(target, stmt)? }
                } else if let Some(op) = AluOp::ALL.iter().find(|op| op.mnemonic() == mnemonic) {
                    let [rd, rs1, rs2] = expect_operands::<3>(mnemonic, ops, line)?;
                    Instruction::Alu {
                        op: *op,
                        rd: parse_register(rd, line)?,
                        rs1: parse_register(rs1, line)?,
                        rs2: parse_register(rs2, line)?,
                    }
                } else if let Some(op) = mnemonic
                    .strip_suffix('I')
                    .and_then(|base| AluOp::ALL.iter().find(|op| op.mnemonic() == base))
                {
                    let [rd, rs1, imm] = expect_operands::<3>(mnemonic, ops, line)?;
                    Instruction::AluImm {
                        op: *op,
                        rd: parse_register(rd, line)?,
                        rs1: parse_register(rs1, line)?,
                        imm: immediate(*op, parse_number(imm, line)?, line)?,
                    }
                } else {
                    return Err(AssemblerError::UnknownMnemonic {
                        line,
                        mnemonic: mnemonic.to_string(),
                    });
                }
            }
        };

        Ok(vec![encode(&instr)])
    }

    /// A label's address or a number.
    fn resolve(&self, operand: &str, line: usize) -> Result<i64, AssemblerError> {
        let key = operand.to_uppercase();
        if is_identifier(&key) {
            return self
                .symbols
                .get(&key)
                .map(|&addr| addr as i64)
                .ok_or(AssemblerError::UndefinedLabel { line, label: key });
        }
        parse_number(operand, line)
    }

    /// A full 32-bit value, signed or unsigned.
    fn word_value(&self, operand: &str, line: usize) -> Result<u32, AssemblerError> {
        let value = self.resolve(operand, line)?;
        if value < i32::MIN as i64 || value > u32::MAX as i64 {
            return Err(AssemblerError::ValueOutOfRange { line, value });
        }
        Ok(value as u32)
    }

    /// Word offset from this statement to a label or absolute address.
    fn branch_offset(&self, operand: &str, stmt: &Statement) -> Result<i16, AssemblerError> {
        let target = self.resolve(operand, stmt.line)?;
        let delta = target - stmt.addr as i64;
        if delta % 4 != 0 {
            return Err(AssemblerError::SyntaxError {
                line: stmt.line,
                message: format!("branch target {:#x} is not word-aligned", target),
            });
        }
        signed16(delta / 4, stmt.line)
    }
}

fn expect_operands<'a, const N: usize>(
    mnemonic: &str,
    operands: &'a [String],
    line: usize,
) -> Result<[&'a str; N], AssemblerError> {
    if operands.len() != N || operands.iter().any(|s| s.is_empty()) {
        return Err(AssemblerError::SyntaxError {
            line,
            message: format!("{} expects {} operand(s), found {}", mnemonic, N, operands.len()),
        });
    }
    Ok(std::array::from_fn(|i| operands[i].as_str()))
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '.')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
        && !is_register_name(s)
}

fn is_register_name(s: &str) -> bool {
    let s = s.to_ascii_lowercase();
    s == "zero" || s.strip_prefix('r').is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
}

/// Parse `rN` or `zero`.
fn parse_register(s: &str, line: usize) -> Result<u8, AssemblerError> {
    let lower = s.trim().to_ascii_lowercase();
    if lower == "zero" {
        return Ok(0);
    }
    lower
        .strip_prefix('r')
        .and_then(|n| n.parse::<u8>().ok())
        .filter(|&n| n < 32)
        .ok_or(AssemblerError::InvalidRegister { line, name: s.to_string() })
}

/// Parse decimal or `0x` hex, optionally signed.
fn parse_number(s: &str, line: usize) -> Result<i64, AssemblerError> {
    let s = s.trim();
    let (negative, body) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };

    let parsed = match body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
        Some(hex) => i64::from_str_radix(hex, 16),
        None => body.parse::<i64>(),
    };

    parsed
        .map(|v| if negative { -v } else { v })
        .map_err(|_| AssemblerError::SyntaxError {
            line,
            message: format!("invalid number `{}`", s),
        })
}

fn signed16(value: i64, line: usize) -> Result<i16, AssemblerError> {
    i16::try_from(value).map_err(|_| AssemblerError::ValueOutOfRange { line, value })
}

/// Check an ALU immediate against the extension its operation uses.
fn immediate(op: AluOp, value: i64, line: usize) -> Result<u16, AssemblerError> {
    let ok = match op {
        AluOp::Add | AluOp::Sub | AluOp::Cmp => (i16::MIN as i64..=i16::MAX as i64).contains(&value),
        AluOp::And | AluOp::Or | AluOp::Xor => (0..=0xffff).contains(&value),
        AluOp::Sll | AluOp::Srl | AluOp::Sra => (0..=31).contains(&value),
    };
    if !ok {
        return Err(AssemblerError::ValueOutOfRange { line, value });
    }
    Ok(value as u16)
}

/// Parse `[rN]`, `[rN+off]` or `[rN-off]`.
fn parse_memory(s: &str, line: usize) -> Result<(u8, i16), AssemblerError> {
    let inner = s
        .trim()
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .ok_or_else(|| AssemblerError::SyntaxError {
            line,
            message: format!("expected memory operand like [r2+4], found `{}`", s),
        })?;

    let (base, offset) = match inner.find(|c: char| c == '+' || c == '-') {
        Some(idx) => {
            let sign = if inner[idx..].starts_with('-') { -1 } else { 1 };
            let magnitude = parse_number(inner[idx + 1..].trim(), line)?;
            (&inner[..idx], sign * magnitude)
        }
        None => (inner, 0),
    };

    Ok((parse_register(base.trim(), line)?, signed16(offset, line)?))
}

/// Errors that can occur during assembly.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssemblerError {
    #[error("syntax error on line {line}: {message}")]
    SyntaxError { line: usize, message: String },

    #[error("unknown mnemonic on line {line}: {mnemonic}")]
    UnknownMnemonic { line: usize, mnemonic: String },

    #[error("undefined label on line {line}: {label}")]
    UndefinedLabel { line: usize, label: String },

    #[error("duplicate label on line {line}: {label}")]
    DuplicateLabel { line: usize, label: String },

    #[error("value out of range on line {line}: {value}")]
    ValueOutOfRange { line: usize, value: i64 },

    #[error("invalid register on line {line}: {name}")]
    InvalidRegister { line: usize, name: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::decode::decode;

    #[test]
    fn test_assemble_simple() {
        let source = r#"
            ; Simple test program
            ADD r1, r2, r3
            HALT
        "#;

        let result = assemble(source).unwrap();
        assert_eq!(result, vec![0x0422_1800, 0]);
    }

    #[test]
    fn test_assemble_with_labels() {
        let source = r#"
        START:
            ADDI r1, r0, 1
            JMP END
            NOP
        END: HALT
        "#;

        let result = assemble(source).unwrap();
        assert_eq!(result.len(), 4);
        assert_eq!(decode(result[1]).unwrap(), Instruction::Jmp { offset: 2 });
    }

    #[test]
    fn test_backward_branch() {
        let source = "LOOP: ADDI r1, r1, -1\n CMPI r1, 0\n BNE loop\n HALT";
        let result = assemble(source).unwrap();
        assert_eq!(
            decode(result[2]).unwrap(),
            Instruction::Branch { cond: Condition::Ne, offset: -2 }
        );
        assert_eq!(
            decode(result[0]).unwrap(),
            Instruction::AluImm { op: AluOp::Add, rd: 1, rs1: 1, imm: 0xffff }
        );
    }

    #[test]
    fn test_assemble_memory_operands() {
        let result = assemble("LW r1, [r2+4]\nSB r3, [r4 - 8]\nLBU r5, [zero]").unwrap();
        assert_eq!(
            decode(result[0]).unwrap(),
            Instruction::Load { kind: LoadKind::Word, rd: 1, base: 2, offset: 4 }
        );
        assert_eq!(
            decode(result[1]).unwrap(),
            Instruction::Store { kind: StoreKind::Byte, rs: 3, base: 4, offset: -8 }
        );
        assert_eq!(
            decode(result[2]).unwrap(),
            Instruction::Load { kind: LoadKind::ByteUnsigned, rd: 5, base: 0, offset: 0 }
        );
    }

    #[test]
    fn test_li_expands_to_two_words() {
        let result = assemble("LI r7, 0x12345678\nHALT").unwrap();
        assert_eq!(result.len(), 3);
        assert_eq!(decode(result[0]).unwrap(), Instruction::Lui { rd: 7, imm: 0x1234 });
        assert_eq!(
            decode(result[1]).unwrap(),
            Instruction::AluImm { op: AluOp::Or, rd: 7, rs1: 7, imm: 0x5678 }
        );
    }

    #[test]
    fn test_li_label_address() {
        let result = assemble("LI r1, data\nHALT\ndata: DAT -1").unwrap();
        assert_eq!(decode(result[1]).unwrap(), Instruction::AluImm { op: AluOp::Or, rd: 1, rs1: 1, imm: 12 });
        assert_eq!(result[3], 0xffff_ffff);
    }

    #[test]
    fn test_assemble_data_and_org() {
        let source = r#"
            DAT 42
            ORG 0x10
            DAT -17
            DAT 0xdeadbeef
        "#;

        let result = assemble(source).unwrap();
        assert_eq!(result.len(), 6);
        assert_eq!(result[0], 42);
        assert_eq!(result[1..4], [0, 0, 0]);
        assert_eq!(result[4] as i32, -17);
        assert_eq!(result[5], 0xdead_beef);
    }

    #[test]
    fn test_trailing_org_pads() {
        assert_eq!(assemble("HALT\nORG 8").unwrap(), vec![0, 0]);
    }

    #[test]
    fn test_errors() {
        assert!(matches!(
            assemble("FROB r1"),
            Err(AssemblerError::UnknownMnemonic { line: 1, .. })
        ));
        assert!(matches!(
            assemble("NOP\nJMP nowhere"),
            Err(AssemblerError::UndefinedLabel { line: 2, .. })
        ));
        assert!(matches!(
            assemble("A: NOP\nA: NOP"),
            Err(AssemblerError::DuplicateLabel { line: 2, .. })
        ));
        assert!(matches!(
            assemble("ADD r1, r2, r32"),
            Err(AssemblerError::InvalidRegister { line: 1, .. })
        ));
        assert!(matches!(
            assemble("ADDI r1, r2, 40000"),
            Err(AssemblerError::ValueOutOfRange { line: 1, value: 40000 })
        ));
        assert!(matches!(
            assemble("ORI r1, r2, -1"),
            Err(AssemblerError::ValueOutOfRange { .. })
        ));
        assert!(matches!(
            assemble("ADD r1, r2"),
            Err(AssemblerError::SyntaxError { line: 1, .. })
        ));
        assert!(matches!(
            assemble("NOP\nORG 0"),
            Err(AssemblerError::SyntaxError { line: 2, .. })
        ));
    }

    #[test]
    fn test_disassembly_reassembles() {
        use crate::asm::disasm::disassemble_instruction;

        let source = r#"
            LI r2, 0x10000
            ADDI r3, r0, -7
            SLLI r3, r3, 2
            SW r3, [r2+16]
            LB r4, [r2-1]
        top:
            CMP r3, r4
            BGEU top
            JAL r31, top
            JR r31, 4
            XORI r5, r5, 0xff
            HALT
        "#;

        let words = assemble(source).unwrap();
        let listing: Vec<String> = words
            .iter()
            .enumerate()
            .map(|(i, &w)| disassemble_instruction(w, i as u32 * 4))
            .collect();
        assert_eq!(assemble(&listing.join("\n")).unwrap(), words);
    }
}
