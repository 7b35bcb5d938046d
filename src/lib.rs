//! # cycle-sim
//!
//! A small, deterministic instruction-cycle simulator for teaching how a
//! CPU works: fetch, decode, execute and write-back over a register file,
//! a flat memory, and a page table fronted by a FIFO TLB.
//!
//! Every simulator is an owned [`Cpu`] value, so independent runs never
//! share state.

pub mod alu;
pub mod config;
pub mod cpu;
pub mod asm;

#[cfg(feature = "tui")]
pub mod tui;

// Re-export commonly used types
pub use alu::{AluOp, Flags};
pub use config::{SimConfig, ConfigError, PageMapping};
pub use cpu::{Cpu, CpuState, CpuError, HaltReason, RunResult, Memory, RegisterFile, Instruction, Mmu};
pub use asm::{assemble, disassemble, AssemblerError, ProgramImage, load_image, save_image};

#[cfg(feature = "tui")]
pub use tui::run_debugger;
