//! Physical memory.
//!
//! A flat, fixed-capacity byte array. Words are 32 bits, little-endian,
//! and must be aligned to 4 bytes. Every access is bounds-checked.

use serde::{Serialize, Deserialize};
use thiserror::Error;

/// Size of a machine word in bytes.
pub const WORD_SIZE: u32 = 4;

/// Physical memory owned by one simulator.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Memory {
    bytes: Vec<u8>,
}

impl Memory {
    /// Create a zeroed memory of `size` bytes.
    pub fn new(size: usize) -> Self {
        Self { bytes: vec![0; size] }
    }

    /// Capacity in bytes.
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    /// Read one byte.
    #[inline]
    pub fn read_byte(&self, addr: u32) -> Result<u8, MemoryError> {
        let index = self.range(addr, 1)?;
        Ok(self.bytes[index])
    }

    /// Write one byte.
    #[inline]
    pub fn write_byte(&mut self, addr: u32, value: u8) -> Result<(), MemoryError> {
        let index = self.range(addr, 1)?;
        self.bytes[index] = value;
        Ok(())
    }

    /// Read an aligned word.
    #[inline]
    pub fn read_word(&self, addr: u32) -> Result<u32, MemoryError> {
        let index = self.aligned_range(addr)?;
        let mut raw = [0u8; WORD_SIZE as usize];
        raw.copy_from_slice(&self.bytes[index..index + WORD_SIZE as usize]);
        Ok(u32::from_le_bytes(raw))
    }

    /// Write an aligned word.
    #[inline]
    pub fn write_word(&mut self, addr: u32, value: u32) -> Result<(), MemoryError> {
        let index = self.aligned_range(addr)?;
        self.bytes[index..index + WORD_SIZE as usize].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    fn aligned_range(&self, addr: u32) -> Result<usize, MemoryError> {
        if addr % WORD_SIZE != 0 {
            return Err(MemoryError::UnalignedAccess { addr });
        }
        self.range(addr, WORD_SIZE as usize)
    }

    /// Start index of `len` bytes at `addr`, if they all fit.
    fn range(&self, addr: u32, len: usize) -> Result<usize, MemoryError> {
        let start = addr as usize;
        match start.checked_add(len) {
            Some(end) if end <= self.bytes.len() => Ok(start),
            _ => Err(MemoryError::OutOfBounds { addr, size: self.bytes.len() }),
        }
    }

    /// Clear all memory to zeros.
    pub fn clear(&mut self) {
        self.bytes.fill(0);
    }

    /// Load a program image as consecutive words starting at `base`.
    pub fn load_program(&mut self, base: u32, program: &[u32]) -> Result<(), MemoryError> {
        if base % WORD_SIZE != 0 {
            return Err(MemoryError::UnalignedAccess { addr: base });
        }
        let needed = program.len() * WORD_SIZE as usize;
        let available = self.bytes.len().saturating_sub(base as usize);
        if needed > available {
            return Err(MemoryError::ProgramTooLarge { size: needed, available });
        }

        for (i, &word) in program.iter().enumerate() {
            self.write_word(base + i as u32 * WORD_SIZE, word)?;
        }

        Ok(())
    }

    /// Dump `count` words starting at the aligned address `start` (for debugging).
    ///
    /// Stops early at the end of memory.
    pub fn dump(&self, start: u32, count: usize) -> Vec<(u32, u32)> {
        (0..count as u32)
            .map(|i| start.wrapping_add(i * WORD_SIZE))
            .map_while(|addr| self.read_word(addr).ok().map(|word| (addr, word)))
            .collect()
    }

    /// Raw view of the whole memory.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl std::fmt::Debug for Memory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Only count non-zero bytes
        let non_zero = self.bytes.iter().filter(|&&b| b != 0).count();

        f.debug_struct("Memory")
            .field("non_zero_bytes", &non_zero)
            .field("size", &self.bytes.len())
            .finish()
    }
}

/// Errors that can occur during memory operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MemoryError {
    /// Access runs past the end of memory.
    #[error("physical address {addr:#010x} out of bounds (memory is {size} bytes)")]
    OutOfBounds { addr: u32, size: usize },

    /// Word access not aligned to the word size.
    #[error("unaligned word access at {addr:#010x}")]
    UnalignedAccess { addr: u32 },

    /// Program is too large to fit in memory.
    #[error("program size {size} bytes exceeds available space {available}")]
    ProgramTooLarge { size: usize, available: usize },
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_memory_read_write() {
        let mut mem = Memory::new(64);
        mem.write_word(8, 0x1234_5678).unwrap();
        assert_eq!(mem.read_word(8).unwrap(), 0x1234_5678);
        // little-endian byte order
        assert_eq!(mem.read_byte(8).unwrap(), 0x78);
        assert_eq!(mem.read_byte(11).unwrap(), 0x12);
    }

    #[test]
    fn test_byte_access_unaligned_ok() {
        let mut mem = Memory::new(16);
        mem.write_byte(5, 0xab).unwrap();
        assert_eq!(mem.read_byte(5).unwrap(), 0xab);
        assert_eq!(mem.read_word(4).unwrap(), 0x0000_ab00);
    }

    #[test]
    fn test_unaligned_word() {
        let mut mem = Memory::new(16);
        assert_eq!(mem.read_word(2), Err(MemoryError::UnalignedAccess { addr: 2 }));
        assert_eq!(mem.write_word(5, 1), Err(MemoryError::UnalignedAccess { addr: 5 }));
    }

    #[test]
    fn test_memory_bounds() {
        let mut mem = Memory::new(16);
        assert!(mem.read_word(12).is_ok());
        assert_eq!(mem.read_word(16), Err(MemoryError::OutOfBounds { addr: 16, size: 16 }));
        assert!(mem.read_byte(15).is_ok());
        assert!(mem.write_byte(16, 0).is_err());
        assert!(mem.read_word(u32::MAX - 3).is_err());
        // a failed write leaves memory untouched
        assert!(mem.as_bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_load_program() {
        let mut mem = Memory::new(32);
        mem.load_program(0, &[1, 2, 3]).unwrap();

        assert_eq!(mem.read_word(0).unwrap(), 1);
        assert_eq!(mem.read_word(4).unwrap(), 2);
        assert_eq!(mem.read_word(8).unwrap(), 3);
        assert_eq!(mem.dump(0, 3), vec![(0, 1), (4, 2), (8, 3)]);
    }

    #[test]
    fn test_load_program_too_large() {
        let mut mem = Memory::new(8);
        assert_eq!(
            mem.load_program(0, &[1, 2, 3]),
            Err(MemoryError::ProgramTooLarge { size: 12, available: 8 })
        );
    }

    #[test]
    fn test_dump_stops_at_end() {
        let mem = Memory::new(8);
        assert_eq!(mem.dump(4, 10).len(), 1);
    }

    proptest! {
        #[test]
        fn prop_word_roundtrip(slot in 0u32..256, value: u32) {
            let mut mem = Memory::new(1024);
            let addr = slot * WORD_SIZE;
            mem.write_word(addr, value).unwrap();
            prop_assert_eq!(mem.read_word(addr).unwrap(), value);
        }
    }
}
