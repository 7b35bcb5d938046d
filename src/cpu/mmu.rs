//! Memory management unit: virtual to physical address translation.
//!
//! With paging disabled addresses pass straight through. With paging
//! enabled the TLB is consulted first and the page table on a miss; a
//! successful page-table lookup is cached in the TLB.

use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::cpu::page_table::{PageTable, PageTableEntry, PageTableError};
use crate::cpu::tlb::{Tlb, TlbEntry};

/// Translation counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TlbStats {
    pub tlb_hits: u64,
    pub tlb_misses: u64,
    pub page_table_lookups: u64,
    pub evictions: u64,
}

/// The MMU owns the TLB and the page table it caches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mmu {
    paging: bool,
    page_shift: u32,
    tlb: Tlb,
    page_table: PageTable,
    stats: TlbStats,
}

impl Mmu {
    /// Create an MMU for pages of `page_size` bytes (a power of two).
    pub fn new(page_size: u32, tlb_capacity: usize, paging: bool) -> Self {
        let page_shift = page_size.max(1).trailing_zeros();
        Self {
            paging,
            page_shift,
            tlb: Tlb::new(tlb_capacity),
            page_table: PageTable::new(page_shift),
            stats: TlbStats::default(),
        }
    }

    pub fn paging(&self) -> bool {
        self.paging
    }

    pub fn set_paging(&mut self, enabled: bool) {
        if enabled != self.paging {
            self.tlb.flush();
        }
        self.paging = enabled;
    }

    pub fn page_size(&self) -> u32 {
        1 << self.page_shift
    }

    /// Split a virtual address into (VPN, offset).
    #[inline]
    pub fn split(&self, vaddr: u32) -> (u32, u32) {
        let offset_mask = (1u32 << self.page_shift) - 1;
        (
            vaddr.checked_shr(self.page_shift).unwrap_or(0),
            vaddr & offset_mask,
        )
    }

    /// Translate a virtual address.
    ///
    /// May insert into (and evict from) the TLB. Never touches the page
    /// table contents or memory. A page fault leaves the TLB as it was.
    pub fn translate(&mut self, vaddr: u32) -> Result<u32, TranslationError> {
        if !self.paging {
            return Ok(vaddr);
        }

        let (vpn, offset) = self.split(vaddr);

        if let Some(pfn) = self.tlb.lookup(vpn) {
            self.stats.tlb_hits += 1;
            return Ok(self.compose(pfn, offset));
        }

        self.stats.tlb_misses += 1;
        self.stats.page_table_lookups += 1;

        let pfn = match self.page_table.lookup(vpn) {
            Some(pfn) => pfn,
            None => {
                log::debug!("page fault: vaddr={:#010x} vpn={:#x}", vaddr, vpn);
                return Err(TranslationError::PageFault { vaddr, vpn });
            }
        };

        log::debug!("tlb miss: vpn={:#x} -> pfn={:#x}", vpn, pfn);
        if let Some(evicted) = self.tlb.insert(vpn, pfn) {
            self.stats.evictions += 1;
            log::debug!("tlb evict: vpn={:#x} (pfn={:#x})", evicted.vpn, evicted.pfn);
        }

        Ok(self.compose(pfn, offset))
    }

    /// Translate without touching the TLB or the counters.
    pub fn peek(&self, vaddr: u32) -> Option<u32> {
        if !self.paging {
            return Some(vaddr);
        }
        let (vpn, offset) = self.split(vaddr);
        self.page_table.lookup(vpn).map(|pfn| self.compose(pfn, offset))
    }

    #[inline]
    fn compose(&self, pfn: u32, offset: u32) -> u32 {
        // PFNs are range-checked when mapped, so this cannot overflow.
        (pfn << self.page_shift) | offset
    }

    /// Map a virtual page to a physical frame.
    ///
    /// Any cached translation for `vpn` is dropped so the TLB never
    /// disagrees with the page table.
    pub fn map(&mut self, vpn: u32, pfn: u32) -> Result<(), PageTableError> {
        self.page_table.map(vpn, pfn)?;
        self.tlb.invalidate(vpn);
        Ok(())
    }

    /// Remove a mapping.
    pub fn unmap(&mut self, vpn: u32) -> Option<PageTableEntry> {
        self.tlb.invalidate(vpn);
        self.page_table.unmap(vpn)
    }

    /// Set the valid bit of an existing mapping.
    pub fn set_valid(&mut self, vpn: u32, valid: bool) -> bool {
        self.tlb.invalidate(vpn);
        self.page_table.set_valid(vpn, valid)
    }

    /// Identity-map every page covering `size` bytes of physical memory.
    pub fn identity_map(&mut self, size: usize) -> Result<(), PageTableError> {
        let pages = (size as u64).div_ceil(self.page_size() as u64);
        for page in 0..pages {
            self.map(page as u32, page as u32)?;
        }
        Ok(())
    }

    pub fn flush_tlb(&mut self) {
        self.tlb.flush();
    }

    pub fn tlb(&self) -> &Tlb {
        &self.tlb
    }

    pub fn tlb_entries(&self) -> Vec<TlbEntry> {
        self.tlb.entries()
    }

    pub fn page_table(&self) -> &PageTable {
        &self.page_table
    }

    pub fn stats(&self) -> TlbStats {
        self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = TlbStats::default();
    }
}

/// Errors from address translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TranslationError {
    #[error("page fault at {vaddr:#010x} (vpn {vpn:#x} not mapped)")]
    PageFault { vaddr: u32, vpn: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paged(tlb_capacity: usize) -> Mmu {
        Mmu::new(4096, tlb_capacity, true)
    }

    #[test]
    fn test_bare_mode_passthrough() {
        let mut mmu = Mmu::new(4096, 4, false);
        assert_eq!(mmu.translate(0x1234_5678).unwrap(), 0x1234_5678);
        assert_eq!(mmu.stats(), TlbStats::default());
        assert!(mmu.tlb().is_empty());
    }

    #[test]
    fn test_first_translation_inserts_once() {
        let mut mmu = paged(4);
        mmu.map(2, 5).unwrap();

        assert_eq!(mmu.translate(0x2abc).unwrap(), 0x5abc);
        assert_eq!(mmu.stats().page_table_lookups, 1);
        assert_eq!(mmu.tlb().len(), 1);

        // A hit does not consult the page table again.
        assert_eq!(mmu.translate(0x2004).unwrap(), 0x5004);
        let stats = mmu.stats();
        assert_eq!(stats.page_table_lookups, 1);
        assert_eq!(stats.tlb_hits, 1);
        assert_eq!(stats.tlb_misses, 1);
        assert_eq!(mmu.tlb().len(), 1);
    }

    #[test]
    fn test_peek_has_no_side_effects() {
        let mut mmu = paged(4);
        mmu.map(1, 3).unwrap();

        assert_eq!(mmu.peek(0x1010), Some(0x3010));
        assert_eq!(mmu.peek(0x2000), None);
        assert_eq!(mmu.stats(), TlbStats::default());
        assert!(mmu.tlb().is_empty());
    }

    #[test]
    fn test_fifo_eviction_of_first_vpn() {
        let capacity = 3;
        let mut mmu = paged(capacity);
        for vpn in 0..=capacity as u32 {
            mmu.map(vpn, vpn + 10).unwrap();
        }
        for vpn in 0..=capacity as u32 {
            mmu.translate(vpn << 12).unwrap();
        }
        assert_eq!(mmu.stats().evictions, 1);
        assert_eq!(mmu.tlb().lookup(0), None);
        for vpn in 1..=capacity as u32 {
            assert_eq!(mmu.tlb().lookup(vpn), Some(vpn + 10));
        }

        let before = mmu.stats().page_table_lookups;
        assert_eq!(mmu.translate(0x0010).unwrap(), (10 << 12) | 0x10);
        assert_eq!(mmu.stats().page_table_lookups, before + 1);
    }

    #[test]
    fn test_page_fault_leaves_tlb_unmodified() {
        let mut mmu = paged(2);
        mmu.map(1, 1).unwrap();
        mmu.translate(0x1000).unwrap();
        let before = mmu.tlb().clone();

        assert_eq!(
            mmu.translate(0x9000),
            Err(TranslationError::PageFault { vaddr: 0x9000, vpn: 9 })
        );
        assert_eq!(mmu.tlb(), &before);
    }

    #[test]
    fn test_invalid_entry_faults() {
        let mut mmu = paged(2);
        mmu.map(3, 3).unwrap();
        mmu.translate(0x3000).unwrap();
        assert!(mmu.set_valid(3, false));
        // the cached translation went with it
        assert!(mmu.translate(0x3000).is_err());
    }

    #[test]
    fn test_remap_drops_stale_translation() {
        let mut mmu = paged(2);
        mmu.map(0, 1).unwrap();
        assert_eq!(mmu.translate(0x10).unwrap(), 0x1010);
        mmu.map(0, 2).unwrap();
        assert_eq!(mmu.translate(0x10).unwrap(), 0x2010);
        assert!(mmu.unmap(0).is_some());
        assert!(mmu.translate(0x10).is_err());
    }

    #[test]
    fn test_identity_map() {
        let mut mmu = paged(4);
        mmu.identity_map(3 * 4096 + 1).unwrap();
        assert_eq!(mmu.page_table().len(), 4);
        assert_eq!(mmu.translate(0x3008).unwrap(), 0x3008);
    }

    #[test]
    fn test_split() {
        let mmu = Mmu::new(256, 1, true);
        assert_eq!(mmu.split(0x1234), (0x12, 0x34));
        assert_eq!(mmu.page_size(), 256);
    }
}
