//! The page table: virtual page number to physical frame number.
//!
//! A single-level map with a valid bit per entry. Only the loader (or a
//! caller repairing a fault) writes it; the instruction engine only reads.

use serde::{Serialize, Deserialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// One page table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageTableEntry {
    pub pfn: u32,
    pub valid: bool,
}

/// VPN → PFN mapping for one address space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageTable {
    page_shift: u32,
    entries: BTreeMap<u32, PageTableEntry>,
}

impl PageTable {
    /// Create an empty page table for pages of `1 << page_shift` bytes.
    pub fn new(page_shift: u32) -> Self {
        Self {
            page_shift,
            entries: BTreeMap::new(),
        }
    }

    /// Number of distinct page numbers a 32-bit address can name.
    pub fn page_count(&self) -> u64 {
        1u64 << (32 - self.page_shift)
    }

    /// Install a valid mapping, replacing any previous one for `vpn`.
    pub fn map(&mut self, vpn: u32, pfn: u32) -> Result<Option<PageTableEntry>, PageTableError> {
        if vpn as u64 >= self.page_count() {
            return Err(PageTableError::VpnOutOfRange { vpn });
        }
        if pfn as u64 >= self.page_count() {
            return Err(PageTableError::PfnOutOfRange { pfn });
        }
        Ok(self.entries.insert(vpn, PageTableEntry { pfn, valid: true }))
    }

    /// Remove a mapping entirely.
    pub fn unmap(&mut self, vpn: u32) -> Option<PageTableEntry> {
        self.entries.remove(&vpn)
    }

    /// Flip the valid bit of an existing entry. Returns false if `vpn` has no entry.
    pub fn set_valid(&mut self, vpn: u32, valid: bool) -> bool {
        match self.entries.get_mut(&vpn) {
            Some(entry) => {
                entry.valid = valid;
                true
            }
            None => false,
        }
    }

    /// The frame for `vpn`, if present and valid.
    #[inline]
    pub fn lookup(&self, vpn: u32) -> Option<u32> {
        self.entries
            .get(&vpn)
            .filter(|entry| entry.valid)
            .map(|entry| entry.pfn)
    }

    /// Raw entry for `vpn`, valid or not.
    pub fn entry(&self, vpn: u32) -> Option<PageTableEntry> {
        self.entries.get(&vpn).copied()
    }

    /// All entries in VPN order.
    pub fn entries(&self) -> impl Iterator<Item = (u32, PageTableEntry)> + '_ {
        self.entries.iter().map(|(&vpn, &entry)| (vpn, entry))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Errors from installing mappings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PageTableError {
    #[error("virtual page number {vpn:#x} does not fit the address space")]
    VpnOutOfRange { vpn: u32 },

    #[error("physical frame number {pfn:#x} does not fit the address space")]
    PfnOutOfRange { pfn: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_and_lookup() {
        let mut table = PageTable::new(12);
        assert_eq!(table.map(3, 7).unwrap(), None);
        assert_eq!(table.lookup(3), Some(7));
        assert_eq!(table.lookup(4), None);

        let previous = table.map(3, 9).unwrap();
        assert_eq!(previous, Some(PageTableEntry { pfn: 7, valid: true }));
        assert_eq!(table.lookup(3), Some(9));
    }

    #[test]
    fn test_invalid_entry_is_not_found() {
        let mut table = PageTable::new(12);
        table.map(1, 1).unwrap();
        assert!(table.set_valid(1, false));
        assert_eq!(table.lookup(1), None);
        assert_eq!(table.entry(1), Some(PageTableEntry { pfn: 1, valid: false }));
        assert!(!table.set_valid(2, true));
    }

    #[test]
    fn test_range_checks() {
        let mut table = PageTable::new(12);
        assert_eq!(table.page_count(), 1 << 20);
        assert_eq!(table.map(1 << 20, 0), Err(PageTableError::VpnOutOfRange { vpn: 1 << 20 }));
        assert_eq!(table.map(0, 1 << 20), Err(PageTableError::PfnOutOfRange { pfn: 1 << 20 }));
        assert!(table.is_empty());
    }

    #[test]
    fn test_unmap() {
        let mut table = PageTable::new(12);
        table.map(5, 6).unwrap();
        assert!(table.unmap(5).is_some());
        assert_eq!(table.lookup(5), None);
        assert_eq!(table.len(), 0);
    }
}
