//! Translation lookaside buffer.
//!
//! A small, fully associative cache of VPN → PFN translations with FIFO
//! replacement. Each entry remembers the sequence number it was inserted
//! with; when the buffer is full the entry with the lowest number goes.

use serde::{Serialize, Deserialize};

/// A single TLB entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlbEntry {
    /// Virtual page number (tag).
    pub vpn: u32,
    /// Physical frame number.
    pub pfn: u32,
    pub valid: bool,
    /// Insertion order, used for FIFO eviction.
    pub inserted: u64,
}

/// Fixed-capacity FIFO TLB.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tlb {
    entries: Vec<TlbEntry>,
    capacity: usize,
    next_seq: u64,
}

impl Tlb {
    /// Create an empty TLB holding at most `capacity` entries (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
            next_seq: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of valid entries.
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| e.valid).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up a VPN. Lookups never reorder entries.
    #[inline]
    pub fn lookup(&self, vpn: u32) -> Option<u32> {
        self.entries
            .iter()
            .find(|e| e.valid && e.vpn == vpn)
            .map(|e| e.pfn)
    }

    /// Insert a translation, returning the entry it evicted, if any.
    ///
    /// An existing entry for `vpn` is overwritten in place and keeps its
    /// position in the queue. Otherwise an invalidated slot is reused
    /// before any eviction happens.
    pub fn insert(&mut self, vpn: u32, pfn: u32) -> Option<TlbEntry> {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.valid && e.vpn == vpn) {
            entry.pfn = pfn;
            return None;
        }

        let fresh = TlbEntry {
            vpn,
            pfn,
            valid: true,
            inserted: self.next_seq,
        };
        self.next_seq += 1;

        if let Some(slot) = self.entries.iter_mut().find(|e| !e.valid) {
            *slot = fresh;
            return None;
        }

        if self.entries.len() < self.capacity {
            self.entries.push(fresh);
            return None;
        }

        // Full: the oldest insertion is evicted. `fresh` is not in the
        // buffer yet, so it can never be its own victim.
        let oldest = self
            .entries
            .iter()
            .enumerate()
            .min_by_key(|(_, e)| e.inserted)
            .map(|(i, _)| i)?;
        Some(std::mem::replace(&mut self.entries[oldest], fresh))
    }

    /// Drop the translation for `vpn`. Returns true if one was present.
    pub fn invalidate(&mut self, vpn: u32) -> bool {
        match self.entries.iter_mut().find(|e| e.valid && e.vpn == vpn) {
            Some(entry) => {
                entry.valid = false;
                true
            }
            None => false,
        }
    }

    /// Invalidate every entry.
    pub fn flush(&mut self) {
        for e in &mut self.entries {
            e.valid = false;
        }
    }

    /// Valid entries, oldest first.
    pub fn entries(&self) -> Vec<TlbEntry> {
        let mut valid: Vec<TlbEntry> = self.entries.iter().copied().filter(|e| e.valid).collect();
        valid.sort_by_key(|e| e.inserted);
        valid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_lookup() {
        let mut tlb = Tlb::new(2);
        assert_eq!(tlb.lookup(1), None);
        assert_eq!(tlb.insert(1, 10), None);
        assert_eq!(tlb.lookup(1), Some(10));
        assert_eq!(tlb.len(), 1);
    }

    #[test]
    fn test_fifo_eviction() {
        let mut tlb = Tlb::new(3);
        tlb.insert(1, 10);
        tlb.insert(2, 20);
        tlb.insert(3, 30);
        // lookups do not refresh age
        assert_eq!(tlb.lookup(1), Some(10));

        let evicted = tlb.insert(4, 40).unwrap();
        assert_eq!(evicted.vpn, 1);
        assert_eq!(tlb.lookup(1), None);
        assert_eq!(tlb.lookup(4), Some(40));

        let evicted = tlb.insert(5, 50).unwrap();
        assert_eq!(evicted.vpn, 2);

        let order: Vec<u32> = tlb.entries().iter().map(|e| e.vpn).collect();
        assert_eq!(order, vec![3, 4, 5]);
    }

    #[test]
    fn test_invalidated_slot_reused_first() {
        let mut tlb = Tlb::new(2);
        tlb.insert(1, 10);
        tlb.insert(2, 20);
        assert!(tlb.invalidate(2));
        assert!(!tlb.invalidate(2));
        assert_eq!(tlb.insert(3, 30), None);
        assert_eq!(tlb.lookup(1), Some(10));
        assert_eq!(tlb.lookup(3), Some(30));
    }

    #[test]
    fn test_reinsert_updates_in_place() {
        let mut tlb = Tlb::new(2);
        tlb.insert(1, 10);
        tlb.insert(2, 20);
        assert_eq!(tlb.insert(1, 11), None);
        assert_eq!(tlb.lookup(1), Some(11));
        assert_eq!(tlb.insert(3, 30).unwrap().vpn, 1);
    }

    #[test]
    fn test_flush() {
        let mut tlb = Tlb::new(4);
        tlb.insert(1, 1);
        tlb.insert(2, 2);
        tlb.flush();
        assert!(tlb.is_empty());
        assert_eq!(tlb.lookup(1), None);
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let mut tlb = Tlb::new(0);
        assert_eq!(tlb.capacity(), 1);
        tlb.insert(7, 7);
        assert_eq!(tlb.insert(8, 8).unwrap().vpn, 7);
    }
}
