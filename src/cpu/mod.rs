//! The simulated machine.
//!
//! This module implements the whole instruction-level model:
//! - a byte-addressed physical memory with aligned 32-bit words
//! - a page table and a FIFO TLB in front of it
//! - up to 32 general-purpose registers, `r0` hardwired to zero
//! - a fixed 32-bit instruction encoding and the cycle engine that runs it

pub mod memory;
pub mod page_table;
pub mod tlb;
pub mod mmu;
pub mod registers;
pub mod decode;
pub mod execute;
pub mod trace;

pub use memory::{Memory, MemoryError};
pub use page_table::{PageTable, PageTableEntry, PageTableError};
pub use tlb::{Tlb, TlbEntry};
pub use mmu::{Mmu, TlbStats, TranslationError};
pub use registers::{RegisterFile, RegisterError};
pub use decode::{Instruction, Condition, LoadKind, StoreKind, DecodeError};
pub use execute::{Cpu, CpuError, CpuState, HaltReason, RunResult, Stage};
pub use trace::{Trace, TraceEntry};
