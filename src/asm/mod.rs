//! Assembler, disassembler and program images.
//!
//! This module provides:
//! - A two-pass assembler (text → instruction words)
//! - A disassembler (words → readable text)
//! - A plain-text hex image format for storing programs

pub mod assembler;
pub mod disasm;
pub mod image;

pub use assembler::{assemble, AssemblerError};
pub use disasm::{disassemble, disassemble_instruction};
pub use image::{ProgramImage, ImageError, load_image, save_image, parse_image};
