//! Virtual address pools (spec §3 "Virtual pool", §4.2 C4).
//!
//! A virtual pool hands out runs of page-aligned virtual addresses from a
//! fixed range; it says nothing about whether those addresses are backed by
//! memory yet (`paging` does that separately with `page_table_add`). The
//! kernel keeps one pool for its own heap range; each process owns one pool
//! for its user-space range, matching spec §4.2's "each process also owns a
//! [vpool] over its private user range."

use crate::bitmap::Bitmap;
use crate::mm::frame::PAGE_SIZE;

/// A fixed-capacity virtual address pool: one bit per page-sized slot.
/// `Clone` backs `fork`'s "the per-process virtual-pool bitmap is copied"
/// step (spec §4.5): the child starts out with exactly the same slots
/// reserved as the parent, since its address space is a deep copy too.
#[derive(Clone)]
pub struct VirtualPool<const BYTES: usize> {
    base: usize,
    slot_count: usize,
    bitmap: Bitmap<BYTES>,
}

impl<const BYTES: usize> VirtualPool<BYTES> {
    pub const fn new(base: usize, slot_count: usize) -> Self {
        Self {
            base,
            slot_count,
            bitmap: Bitmap::new(),
        }
    }

    pub const fn base(&self) -> usize {
        self.base
    }

    /// `vaddr_alloc(n)`: reserve `n` contiguous page-sized slots, returning
    /// the base virtual address of the run. `None` if no run of that length
    /// is free (spec §4.2).
    pub fn alloc(&mut self, n: usize) -> Option<usize> {
        if n == 0 {
            return None;
        }
        let idx = self.bitmap.scan(n)?;
        if idx + n > self.slot_count {
            return None;
        }
        for i in idx..idx + n {
            self.bitmap.set(i, true);
        }
        Some(self.base + idx * PAGE_SIZE)
    }

    /// Release a run of `n` slots previously returned by `alloc`.
    pub fn free(&mut self, vaddr: usize, n: usize) {
        assert!(vaddr >= self.base, "VirtualPool::free: address below base");
        let idx = (vaddr - self.base) / PAGE_SIZE;
        assert!(idx + n <= self.slot_count, "VirtualPool::free: range above pool");
        for i in idx..idx + n {
            debug_assert!(self.bitmap.test(i), "VirtualPool::free: slot not allocated");
            self.bitmap.set(i, false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_returns_contiguous_aligned_run() {
        let mut pool: VirtualPool<8> = VirtualPool::new(0x4000_0000, 64);
        let a = pool.alloc(3).unwrap();
        assert_eq!(a, 0x4000_0000);
        let b = pool.alloc(1).unwrap();
        assert_eq!(b, 0x4000_0000 + 3 * PAGE_SIZE);
    }

    #[test]
    fn free_then_alloc_reuses_slots() {
        let mut pool: VirtualPool<8> = VirtualPool::new(0, 64);
        let a = pool.alloc(4).unwrap();
        pool.free(a, 4);
        let b = pool.alloc(4).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn exhaustion_returns_none() {
        let mut pool: VirtualPool<1> = VirtualPool::new(0, 8);
        assert!(pool.alloc(9).is_none());
        assert!(pool.alloc(8).is_some());
        assert!(pool.alloc(1).is_none());
    }
}
