//! Simulator configuration.
//!
//! Every knob of a [`Cpu`](crate::Cpu) in one serde struct, loadable from
//! JSON. Missing fields take their defaults:
//!
//! ```json
//! {
//!   "memory_size": 65536,
//!   "register_count": 32,
//!   "page_size": 4096,
//!   "tlb_capacity": 4,
//!   "paging": true,
//!   "page_map": [ { "vpn": 0, "pfn": 0 } ]
//! }
//! ```

use serde::{Serialize, Deserialize};
use std::path::Path;
use thiserror::Error;

use crate::cpu::page_table::PageTableError;
use crate::cpu::registers::MAX_REGISTERS;
use crate::cpu::memory::WORD_SIZE;

/// Default memory size: 64 KiB.
pub const DEFAULT_MEMORY_SIZE: usize = 64 * 1024;
/// Default page size: 4 KiB.
pub const DEFAULT_PAGE_SIZE: u32 = 4096;
/// Default TLB capacity.
pub const DEFAULT_TLB_CAPACITY: usize = 4;

/// One initial page-table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMapping {
    pub vpn: u32,
    pub pfn: u32,
}

/// Simulator configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimConfig {
    /// Physical memory capacity in bytes.
    pub memory_size: usize,
    /// Number of general-purpose registers (1..=32).
    pub register_count: usize,
    /// Page size in bytes, a power of two.
    pub page_size: u32,
    /// Number of TLB entries.
    pub tlb_capacity: usize,
    /// Translate fetch/load/store addresses through the TLB and page table.
    pub paging: bool,
    /// Mappings installed before execution.
    pub page_map: Vec<PageMapping>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            memory_size: DEFAULT_MEMORY_SIZE,
            register_count: MAX_REGISTERS,
            page_size: DEFAULT_PAGE_SIZE,
            tlb_capacity: DEFAULT_TLB_CAPACITY,
            paging: false,
            page_map: Vec::new(),
        }
    }
}

impl SimConfig {
    /// Check every field. Page mappings are range-checked when installed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.memory_size == 0
            || self.memory_size % WORD_SIZE as usize != 0
            || self.memory_size as u64 > 1u64 << 32
        {
            return Err(ConfigError::MemorySize(self.memory_size));
        }
        if self.register_count == 0 || self.register_count > MAX_REGISTERS {
            return Err(ConfigError::RegisterCount(self.register_count));
        }
        if !self.page_size.is_power_of_two() || self.page_size < WORD_SIZE {
            return Err(ConfigError::PageSize(self.page_size));
        }
        if self.tlb_capacity == 0 {
            return Err(ConfigError::TlbCapacity);
        }
        Ok(())
    }

    /// Parse and validate a JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: SimConfig =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_json_str(&json)
    }

    /// Builder-style helper to turn paging on with the given mappings.
    pub fn with_paging(mut self, mappings: &[(u32, u32)]) -> Self {
        self.paging = true;
        self.page_map
            .extend(mappings.iter().map(|&(vpn, pfn)| PageMapping { vpn, pfn }));
        self
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("memory size {0} must be a non-zero multiple of 4 no larger than 4 GiB")]
    MemorySize(usize),

    #[error("register count {0} must be between 1 and 32")]
    RegisterCount(usize),

    #[error("page size {0} must be a power of two of at least 4 bytes")]
    PageSize(u32),

    #[error("TLB capacity must be at least 1")]
    TlbCapacity,

    #[error("invalid page mapping: {0}")]
    Mapping(#[from] PageTableError),

    #[error("config parse error: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(SimConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_fields() {
        let bad = SimConfig { memory_size: 6, ..SimConfig::default() };
        assert_eq!(bad.validate(), Err(ConfigError::MemorySize(6)));

        let bad = SimConfig { register_count: 33, ..SimConfig::default() };
        assert_eq!(bad.validate(), Err(ConfigError::RegisterCount(33)));

        let bad = SimConfig { page_size: 3000, ..SimConfig::default() };
        assert_eq!(bad.validate(), Err(ConfigError::PageSize(3000)));

        let bad = SimConfig { tlb_capacity: 0, ..SimConfig::default() };
        assert_eq!(bad.validate(), Err(ConfigError::TlbCapacity));
    }

    #[test]
    fn test_json_partial() {
        let config = SimConfig::from_json_str(
            r#"{ "paging": true, "tlb_capacity": 2, "page_map": [ { "vpn": 0, "pfn": 3 } ] }"#,
        )
        .unwrap();
        assert!(config.paging);
        assert_eq!(config.tlb_capacity, 2);
        assert_eq!(config.memory_size, DEFAULT_MEMORY_SIZE);
        assert_eq!(config.page_map, vec![PageMapping { vpn: 0, pfn: 3 }]);
    }

    #[test]
    fn test_json_errors() {
        assert!(matches!(
            SimConfig::from_json_str(r#"{ "tlb_size": 2 }"#),
            Err(ConfigError::Parse(_))
        ));
        assert_eq!(
            SimConfig::from_json_str(r#"{ "page_size": 12 }"#),
            Err(ConfigError::PageSize(12))
        );
    }

    #[test]
    fn test_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sim.json");
        std::fs::write(&path, r#"{ "register_count": 16 }"#).unwrap();
        assert_eq!(SimConfig::from_json_file(&path).unwrap().register_count, 16);
        assert!(matches!(
            SimConfig::from_json_file(dir.path().join("missing.json")),
            Err(ConfigError::Io(_))
        ));
    }
}
