//! The integer register file.
//!
//! Up to 32 general-purpose 32-bit registers, `r0` .. `r31`.
//! Register 0 is hardwired to zero: writes to it are accepted and dropped.

use serde::{Serialize, Deserialize};
use thiserror::Error;

/// Largest register file the encoding can address (5-bit fields).
pub const MAX_REGISTERS: usize = 32;

/// The register file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterFile {
    regs: Vec<u32>,
}

impl RegisterFile {
    /// Create a register file of `count` zeroed registers.
    ///
    /// `count` must be in `1..=MAX_REGISTERS`; the configuration layer
    /// checks this before a simulator is built.
    pub fn new(count: usize) -> Self {
        Self {
            regs: vec![0; count.clamp(1, MAX_REGISTERS)],
        }
    }

    /// Number of registers.
    pub fn len(&self) -> usize {
        self.regs.len()
    }

    /// Always false; there is at least `r0`.
    pub fn is_empty(&self) -> bool {
        self.regs.is_empty()
    }

    /// Read a register.
    #[inline]
    pub fn read(&self, index: usize) -> Result<u32, RegisterError> {
        self.regs
            .get(index)
            .copied()
            .ok_or(RegisterError::InvalidRegister { index, count: self.regs.len() })
    }

    /// Write a register. Writes to `r0` have no effect.
    #[inline]
    pub fn write(&mut self, index: usize, value: u32) -> Result<(), RegisterError> {
        self.check(index)?;
        if index != 0 {
            self.regs[index] = value;
        }
        Ok(())
    }

    /// Validate an index without touching state.
    #[inline]
    pub fn check(&self, index: usize) -> Result<(), RegisterError> {
        if index < self.regs.len() {
            Ok(())
        } else {
            Err(RegisterError::InvalidRegister { index, count: self.regs.len() })
        }
    }

    /// Reset all registers to zero.
    pub fn reset(&mut self) {
        self.regs.fill(0);
    }

    /// All register values, `r0` first.
    pub fn as_slice(&self) -> &[u32] {
        &self.regs
    }
}

impl Default for RegisterFile {
    fn default() -> Self {
        Self::new(MAX_REGISTERS)
    }
}

/// Errors from register access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RegisterError {
    #[error("invalid register r{index} (register file has {count})")]
    InvalidRegister { index: usize, count: usize },
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_reset_to_zero() {
        let mut regs = RegisterFile::new(8);
        regs.write(3, 99).unwrap();
        regs.reset();
        assert!(regs.as_slice().iter().all(|&v| v == 0));
        assert_eq!(regs.len(), 8);
    }

    #[test]
    fn test_r0_hardwired() {
        let mut regs = RegisterFile::default();
        regs.write(0, 0xdead_beef).unwrap();
        assert_eq!(regs.read(0).unwrap(), 0);
    }

    #[test]
    fn test_out_of_range() {
        let mut regs = RegisterFile::new(16);
        assert_eq!(
            regs.read(16),
            Err(RegisterError::InvalidRegister { index: 16, count: 16 })
        );
        assert!(regs.write(31, 1).is_err());
        assert!(regs.check(15).is_ok());
    }

    proptest! {
        #[test]
        fn prop_write_then_read(index in 0usize..MAX_REGISTERS, value: u32) {
            let mut regs = RegisterFile::default();
            regs.write(index, value).unwrap();
            let expected = if index == 0 { 0 } else { value };
            prop_assert_eq!(regs.read(index).unwrap(), expected);
        }
    }
}
