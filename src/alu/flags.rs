//! Condition flags produced by the ALU.

use serde::{Serialize, Deserialize};

/// The four condition bits recomputed by every ALU instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Flags {
    /// Result was zero.
    pub zero: bool,
    /// Bit 31 of the result was set.
    pub negative: bool,
    /// Unsigned carry-out (for subtraction: no borrow).
    pub carry: bool,
    /// Signed two's-complement overflow.
    pub overflow: bool,
}

impl Flags {
    /// Flags with zero/negative derived from `result` and carry/overflow cleared.
    pub fn from_result(result: u32) -> Self {
        Self {
            zero: result == 0,
            negative: result & 0x8000_0000 != 0,
            carry: false,
            overflow: false,
        }
    }

    /// Signed less-than after a compare: N != V.
    #[inline]
    pub fn less(&self) -> bool {
        self.negative != self.overflow
    }
}

impl std::fmt::Display for Flags {
    /// Prints `NZCV`, upper case when set and lower case when clear.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let bit = |set: bool, c: char| if set { c } else { c.to_ascii_lowercase() };
        write!(
            f,
            "{}{}{}{}",
            bit(self.negative, 'N'),
            bit(self.zero, 'Z'),
            bit(self.carry, 'C'),
            bit(self.overflow, 'V'),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_result() {
        assert!(Flags::from_result(0).zero);
        assert!(!Flags::from_result(1).zero);
        assert!(Flags::from_result(0x8000_0000).negative);
        assert!(!Flags::from_result(0x7fff_ffff).negative);
    }

    #[test]
    fn test_display() {
        let flags = Flags { zero: true, negative: false, carry: true, overflow: false };
        assert_eq!(flags.to_string(), "nZCv");
        assert_eq!(Flags::default().to_string(), "nzcv");
    }
}
