//! The instruction cycle engine.
//!
//! Implements fetch → decode → execute → write-back and the bounded run
//! loop. Faults are precise: when any stage fails, the PC is put back on
//! the faulting instruction, nothing that instruction computed is
//! committed to registers or flags, and the CPU halts with the reason.

use crate::alu::{self, Flags};
use crate::config::{ConfigError, SimConfig};
use crate::cpu::decode::{self, DecodeError, Instruction, LoadKind, StoreKind};
use crate::cpu::memory::{Memory, MemoryError, WORD_SIZE};
use crate::cpu::mmu::{Mmu, TranslationError};
use crate::cpu::page_table::PageTableError;
use crate::cpu::registers::{RegisterError, RegisterFile};
use crate::cpu::trace::Trace;
use serde::{Serialize, Deserialize};
use thiserror::Error;

/// Address the program image is loaded at and execution starts from.
pub const LOAD_BASE: u32 = 0;

/// Bytes per instruction.
pub const INSTRUCTION_SIZE: u32 = WORD_SIZE;

/// Pipeline stage the engine is in (or faulted in).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Fetch,
    Decode,
    Execute,
    WriteBack,
}

/// Why a run stopped.
///
/// `StepBudgetExhausted` is the only reason that does not halt the CPU:
/// the machine stays runnable and a later `run` continues where it left off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HaltReason {
    /// A HALT instruction retired.
    Completed,
    /// The caller's step budget ran out first.
    StepBudgetExhausted,
    PageFault { vaddr: u32 },
    InvalidOpcode { opcode: u8 },
    OutOfBounds { addr: u32 },
    UnalignedAccess { addr: u32 },
    InvalidRegister { index: usize },
}

impl HaltReason {
    /// True for the fatal error reasons.
    pub fn is_fault(&self) -> bool {
        !matches!(self, HaltReason::Completed | HaltReason::StepBudgetExhausted)
    }
}

impl std::fmt::Display for HaltReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HaltReason::Completed => write!(f, "completed"),
            HaltReason::StepBudgetExhausted => write!(f, "step budget exhausted"),
            HaltReason::PageFault { vaddr } => write!(f, "page fault at {:#010x}", vaddr),
            HaltReason::InvalidOpcode { opcode } => write!(f, "invalid opcode {:#04x}", opcode),
            HaltReason::OutOfBounds { addr } => write!(f, "out of bounds access at {:#010x}", addr),
            HaltReason::UnalignedAccess { addr } => write!(f, "unaligned access at {:#010x}", addr),
            HaltReason::InvalidRegister { index } => write!(f, "invalid register r{}", index),
        }
    }
}

/// CPU execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CpuState {
    /// CPU is running normally.
    Running,
    /// CPU has halted, by HALT or by a fault.
    Halted(HaltReason),
}

/// Outcome of [`Cpu::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    /// PC after the run; the faulting instruction's address after a fault.
    pub pc: u32,
    pub flags: Flags,
    pub reason: HaltReason,
    /// Instructions retired during this run.
    pub steps: u64,
}

/// Everything an instruction wants to commit at write-back.
#[derive(Debug, Default)]
struct Effects {
    reg: Option<(u8, u32)>,
    flags: Option<Flags>,
    next_pc: Option<u32>,
    halt: bool,
}

/// The simulated CPU: register file, memory, MMU and cycle state.
#[derive(Clone, Serialize, Deserialize)]
pub struct Cpu {
    /// General-purpose registers.
    pub regs: RegisterFile,
    /// Physical memory.
    pub mem: Memory,
    /// TLB and page table.
    pub mmu: Mmu,
    /// Program counter.
    pub pc: u32,
    /// Condition flags from the last ALU instruction.
    pub flags: Flags,
    /// Current execution state.
    pub state: CpuState,
    /// Retired instruction count.
    pub cycles: u64,
    stage: Stage,
    last_pc: u32,
    last_word: u32,
    last_instr: Option<Instruction>,
}

impl Cpu {
    /// Build a CPU from a configuration, installing its page mappings.
    pub fn new(config: &SimConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let mut cpu = Self::from_parts(config);
        for mapping in &config.page_map {
            cpu.mmu.map(mapping.vpn, mapping.pfn)?;
        }
        Ok(cpu)
    }

    fn from_parts(config: &SimConfig) -> Self {
        Self {
            regs: RegisterFile::new(config.register_count),
            mem: Memory::new(config.memory_size),
            mmu: Mmu::new(config.page_size, config.tlb_capacity, config.paging),
            pc: LOAD_BASE,
            flags: Flags::default(),
            state: CpuState::Running,
            cycles: 0,
            stage: Stage::Fetch,
            last_pc: LOAD_BASE,
            last_word: 0,
            last_instr: None,
        }
    }

    /// Reset registers, memory, flags and PC, and flush the TLB.
    ///
    /// The page table is part of the address-space setup and survives.
    pub fn reset(&mut self) {
        self.regs.reset();
        self.mem.clear();
        self.mmu.flush_tlb();
        self.mmu.reset_stats();
        self.pc = LOAD_BASE;
        self.flags = Flags::default();
        self.state = CpuState::Running;
        self.cycles = 0;
        self.stage = Stage::Fetch;
        self.last_pc = LOAD_BASE;
        self.last_word = 0;
        self.last_instr = None;
    }

    /// Load a program image at [`LOAD_BASE`] in physical memory.
    pub fn load_program(&mut self, program: &[u32]) -> Result<(), MemoryError> {
        self.mem.load_program(LOAD_BASE, program)
    }

    /// Install page mappings as `(vpn, pfn)` pairs.
    pub fn map_pages(&mut self, mappings: &[(u32, u32)]) -> Result<(), PageTableError> {
        for &(vpn, pfn) in mappings {
            self.mmu.map(vpn, pfn)?;
        }
        Ok(())
    }

    /// Execute one full instruction cycle.
    ///
    /// Returns the instruction that retired, or the error that halted the CPU.
    pub fn step(&mut self) -> Result<Instruction, CpuError> {
        if self.state != CpuState::Running {
            return Err(CpuError::NotRunning(self.state));
        }

        let pc = self.pc;
        match self.cycle(pc) {
            Ok(instr) => Ok(instr),
            Err(err) => {
                self.pc = pc;
                if let Some(reason) = err.halt_reason() {
                    self.state = CpuState::Halted(reason);
                }
                log::warn!("fault in {:?} stage at pc={:#010x}: {}", self.stage, pc, err);
                Err(err)
            }
        }
    }

    fn cycle(&mut self, pc: u32) -> Result<Instruction, CpuError> {
        // Fetch
        self.stage = Stage::Fetch;
        self.last_pc = pc;
        let paddr = self.mmu.translate(pc)?;
        let word = self.mem.read_word(paddr)?;
        self.last_word = word;
        self.pc = pc.wrapping_add(INSTRUCTION_SIZE);
        log::trace!("fetch     pc={:#010x} paddr={:#010x} word={:#010x}", pc, paddr, word);

        // Decode
        self.stage = Stage::Decode;
        let instr = decode::decode(word)?;
        log::trace!("decode    {:?}", instr);

        // Execute
        self.stage = Stage::Execute;
        let effects = self.execute(pc, instr)?;

        // Write back
        self.stage = Stage::WriteBack;
        self.write_back(effects)?;

        self.stage = Stage::Fetch;
        self.cycles += 1;
        self.last_instr = Some(instr);
        Ok(instr)
    }

    /// Run until halt or until `max_steps` instructions have retired.
    pub fn run(&mut self, max_steps: u64) -> RunResult {
        let start = self.cycles;

        while self.is_running() && self.cycles - start < max_steps {
            if self.step().is_err() {
                break;
            }
        }

        let result = self.outcome(start);
        log::info!(
            "run stopped: {} after {} steps (pc={:#010x})",
            result.reason, result.steps, result.pc
        );
        result
    }

    /// Run lazily, yielding one snapshot per retired instruction.
    pub fn trace(&mut self, max_steps: u64) -> Trace<'_> {
        Trace::new(self, max_steps)
    }

    /// Summarize the machine after a run that started at cycle `start`.
    pub(crate) fn outcome(&self, start: u64) -> RunResult {
        let reason = match self.state {
            CpuState::Halted(reason) => reason,
            CpuState::Running => HaltReason::StepBudgetExhausted,
        };
        RunResult {
            pc: self.pc,
            flags: self.flags,
            reason,
            steps: self.cycles - start,
        }
    }

    /// Make a faulted CPU runnable again, e.g. after mapping the missing page.
    ///
    /// Returns false (and changes nothing) unless the CPU halted on a fault.
    pub fn clear_fault(&mut self) -> bool {
        match self.state {
            CpuState::Halted(reason) if reason.is_fault() => {
                self.state = CpuState::Running;
                self.stage = Stage::Fetch;
                true
            }
            _ => false,
        }
    }

    /// Execute a decoded instruction located at `pc`.
    ///
    /// Stores reach memory here; everything else is returned for write-back.
    fn execute(&mut self, pc: u32, instr: Instruction) -> Result<Effects, CpuError> {
        let mut fx = Effects::default();

        match instr {
            Instruction::Halt => {
                fx.halt = true;
            }

            Instruction::Nop => {}

            Instruction::Alu { op, rd, rs1, rs2 } => {
                let a = self.reg(rs1)?;
                let b = self.reg(rs2)?;
                let out = alu::compute(op, a, b);
                fx.flags = Some(out.flags);
                if op.writes_result() {
                    fx.reg = Some((rd, out.result));
                }
            }

            Instruction::AluImm { op, rd, rs1, imm } => {
                let a = self.reg(rs1)?;
                let out = alu::compute(op, a, op.extend_imm(imm));
                fx.flags = Some(out.flags);
                if op.writes_result() {
                    fx.reg = Some((rd, out.result));
                }
            }

            Instruction::Lui { rd, imm } => {
                fx.reg = Some((rd, (imm as u32) << 16));
            }

            Instruction::Load { kind, rd, base, offset } => {
                let vaddr = self.effective_address(base, offset)?;
                let paddr = self.mmu.translate(vaddr)?;
                let value = match kind {
                    LoadKind::Word => self.mem.read_word(paddr)?,
                    LoadKind::Byte => self.mem.read_byte(paddr)? as i8 as i32 as u32,
                    LoadKind::ByteUnsigned => self.mem.read_byte(paddr)? as u32,
                };
                log::trace!("execute   load [{:#010x}] -> {:#010x}", vaddr, value);
                fx.reg = Some((rd, value));
            }

            Instruction::Store { kind, rs, base, offset } => {
                let value = self.reg(rs)?;
                let vaddr = self.effective_address(base, offset)?;
                let paddr = self.mmu.translate(vaddr)?;
                match kind {
                    StoreKind::Word => self.mem.write_word(paddr, value)?,
                    StoreKind::Byte => self.mem.write_byte(paddr, value as u8)?,
                }
                log::trace!("execute   store [{:#010x}] <- {:#010x}", vaddr, value);
            }

            Instruction::Jmp { offset } => {
                fx.next_pc = Some(relative_target(pc, offset));
            }

            Instruction::Jal { rd, offset } => {
                fx.reg = Some((rd, pc.wrapping_add(INSTRUCTION_SIZE)));
                fx.next_pc = Some(relative_target(pc, offset));
            }

            Instruction::Jr { rs1, offset } => {
                let base = self.reg(rs1)?;
                fx.next_pc = Some(base.wrapping_add(offset as i32 as u32));
            }

            Instruction::Branch { cond, offset } => {
                if cond.holds(&self.flags) {
                    fx.next_pc = Some(relative_target(pc, offset));
                }
            }
        }

        Ok(fx)
    }

    /// Commit an instruction's results. The register write goes first so
    /// an invalid destination leaves everything untouched.
    fn write_back(&mut self, fx: Effects) -> Result<(), CpuError> {
        if let Some((rd, value)) = fx.reg {
            self.regs.write(rd as usize, value)?;
            log::trace!("writeback r{} = {:#010x}", rd, value);
        }
        if let Some(flags) = fx.flags {
            self.flags = flags;
        }
        if let Some(target) = fx.next_pc {
            self.pc = target;
        }
        if fx.halt {
            self.state = CpuState::Halted(HaltReason::Completed);
            log::info!("halted at pc={:#010x} after {} cycles", self.last_pc, self.cycles + 1);
        }
        Ok(())
    }

    #[inline]
    fn reg(&self, index: u8) -> Result<u32, RegisterError> {
        self.regs.read(index as usize)
    }

    /// `base register + sign-extended offset`, wrapping.
    fn effective_address(&self, base: u8, offset: i16) -> Result<u32, RegisterError> {
        Ok(self.reg(base)?.wrapping_add(offset as i32 as u32))
    }

    /// Current (or faulting) pipeline stage.
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Address of the most recently fetched instruction.
    pub fn last_pc(&self) -> u32 {
        self.last_pc
    }

    /// Raw word of the most recently fetched instruction.
    pub fn last_word(&self) -> u32 {
        self.last_word
    }

    /// Get the last executed instruction.
    pub fn last_instruction(&self) -> Option<Instruction> {
        self.last_instr
    }

    /// The reason the CPU halted, if it has.
    pub fn halt_reason(&self) -> Option<HaltReason> {
        match self.state {
            CpuState::Halted(reason) => Some(reason),
            CpuState::Running => None,
        }
    }

    /// Check if the CPU is halted.
    pub fn is_halted(&self) -> bool {
        matches!(self.state, CpuState::Halted(_))
    }

    /// Check if the CPU is running.
    pub fn is_running(&self) -> bool {
        self.state == CpuState::Running
    }
}

/// `pc + offset` words.
#[inline]
fn relative_target(pc: u32, offset: i16) -> u32 {
    pc.wrapping_add((offset as i32 as u32).wrapping_mul(INSTRUCTION_SIZE))
}

impl Default for Cpu {
    fn default() -> Self {
        Self::from_parts(&SimConfig::default())
    }
}

impl std::fmt::Debug for Cpu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cpu")
            .field("state", &self.state)
            .field("pc", &format_args!("{:#010x}", self.pc))
            .field("flags", &format_args!("{}", self.flags))
            .field("cycles", &self.cycles)
            .field("regs", &self.regs)
            .finish()
    }
}

/// Errors that can occur during CPU execution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CpuError {
    #[error("CPU not running: {0:?}")]
    NotRunning(CpuState),

    #[error("memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("translation error: {0}")]
    Translation(#[from] TranslationError),

    #[error("register error: {0}")]
    Register(#[from] RegisterError),

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
}

impl CpuError {
    /// The halt reason this error forces, if it is a fault.
    pub fn halt_reason(&self) -> Option<HaltReason> {
        match *self {
            CpuError::NotRunning(_) => None,
            CpuError::Memory(MemoryError::OutOfBounds { addr, .. }) => {
                Some(HaltReason::OutOfBounds { addr })
            }
            CpuError::Memory(MemoryError::UnalignedAccess { addr }) => {
                Some(HaltReason::UnalignedAccess { addr })
            }
            CpuError::Memory(MemoryError::ProgramTooLarge { .. }) => None,
            CpuError::Translation(TranslationError::PageFault { vaddr, .. }) => {
                Some(HaltReason::PageFault { vaddr })
            }
            CpuError::Register(RegisterError::InvalidRegister { index, .. }) => {
                Some(HaltReason::InvalidRegister { index })
            }
            CpuError::Decode(DecodeError::InvalidOpcode { opcode, .. }) => {
                Some(HaltReason::InvalidOpcode { opcode })
            }
        }
    }
}
