//! `sys_malloc`/`sys_free`: a small slab-style heap layered on top of
//! `malloc_page`, the way the original kernel's `malloc.c` layers a free-list
//! allocator on top of its own page allocator rather than handing out raw
//! pages to every caller (spec §4.2 C5 continued).
//!
//! Blocks are powers of two from `MIN_BLOCK` up to one page. Each page used
//! as a slab is prefixed with a `PageHeader` recording its block size and a
//! singly-linked free list threaded through the unused blocks themselves,
//! the classic "free list is stored inside the freed memory" trick
//! `kaist-cp-rv6/kernel-rs/src/kalloc.rs` also relies on (there via `Run`
//! nodes overlaying freed pages).

use core::mem::size_of;
use core::ptr::NonNull;

use crate::errno::{KernelError, KResult};
use crate::mm::frame::PAGE_SIZE;

const MIN_BLOCK: usize = 16;
const BLOCK_SIZES: [usize; 9] = [16, 32, 64, 128, 256, 512, 1024, 2048, 4096 - 16];
const NUM_SIZES: usize = BLOCK_SIZES.len();

#[repr(C)]
struct PageHeader {
    block_size: usize,
    free_list: Option<NonNull<FreeBlock>>,
    next_page: Option<NonNull<PageHeader>>,
}

#[repr(C)]
struct FreeBlock {
    next: Option<NonNull<FreeBlock>>,
}

/// Per-size-class slab state: the pages currently backing that class.
pub struct SlabAllocator {
    pages: [Option<NonNull<PageHeader>>; NUM_SIZES],
}

// SAFETY: a SlabAllocator is always accessed through its owning SpinLock.
unsafe impl Send for SlabAllocator {}

impl SlabAllocator {
    pub const fn new() -> Self {
        Self {
            pages: [None; NUM_SIZES],
        }
    }

    fn size_class(n: usize) -> Option<usize> {
        BLOCK_SIZES.iter().position(|&sz| sz >= n)
    }

    /// `sys_malloc`: round `n` up to the smallest fitting size class and
    /// return a block from that class's free list, growing the class by one
    /// page via the supplied page-allocation closure if every page is full
    /// (spec §4.2's malloc/free pair). Requests larger than one page's
    /// worth of payload are rejected.
    pub fn alloc(
        &mut self,
        n: usize,
        alloc_page: impl FnOnce() -> KResult<usize>,
    ) -> KResult<NonNull<u8>> {
        let class = Self::size_class(n).ok_or(KernelError::OutOfMemory)?;
        let block_size = BLOCK_SIZES[class];
        if self.pages[class].is_none() || self.class_is_exhausted(class) {
            self.grow_class(class, block_size, alloc_page)?;
        }
        self.take_free_block(class)
    }

    fn class_is_exhausted(&self, class: usize) -> bool {
        let mut page = self.pages[class];
        while let Some(p) = page {
            // SAFETY: page is a live PageHeader previously installed by grow_class.
            let hdr = unsafe { p.as_ref() };
            if hdr.free_list.is_some() {
                return false;
            }
            page = hdr.next_page;
        }
        true
    }

    fn take_free_block(&mut self, class: usize) -> KResult<NonNull<u8>> {
        let mut page = self.pages[class];
        while let Some(mut p) = page {
            // SAFETY: page is a live PageHeader installed by grow_class.
            let hdr = unsafe { p.as_mut() };
            if let Some(mut block) = hdr.free_list {
                // SAFETY: block is a live FreeBlock threaded onto this page's free list.
                hdr.free_list = unsafe { block.as_mut().next };
                return Ok(block.cast());
            }
            page = hdr.next_page;
        }
        Err(KernelError::OutOfMemory)
    }

    fn grow_class(
        &mut self,
        class: usize,
        block_size: usize,
        alloc_page: impl FnOnce() -> KResult<usize>,
    ) -> KResult<()> {
        let vaddr = alloc_page()?;
        // SAFETY: vaddr is a freshly mapped, exclusively owned page.
        let mut page = unsafe {
            let p = vaddr as *mut PageHeader;
            p.write(PageHeader {
                block_size,
                free_list: None,
                next_page: self.pages[class],
            });
            NonNull::new_unchecked(p)
        };
        let payload_start = vaddr + size_of::<PageHeader>();
        let payload_start = (payload_start + 15) & !15; // keep 16-byte alignment
        let mut offset = payload_start;
        let page_end = vaddr + PAGE_SIZE;
        // SAFETY: each block lies fully within the page just mapped.
        unsafe {
            let hdr = page.as_mut();
            while offset + block_size <= page_end {
                let block = offset as *mut FreeBlock;
                block.write(FreeBlock {
                    next: hdr.free_list,
                });
                hdr.free_list = Some(NonNull::new_unchecked(block));
                offset += block_size;
            }
        }
        self.pages[class] = Some(page);
        Ok(())
    }

    /// `sys_free`: thread `ptr` back onto its page's free list. `sys_free`
    /// (spec §6 `free(p)`) takes only a pointer, not a size, so the owning
    /// page — and with it the size class `ptr` belongs to — is found by
    /// scanning every class's page list for the one whose range contains
    /// `ptr`, the same way `PageHeader.block_size` lets `grow_class`'s pages
    /// each know their own class without a separate lookup table. The
    /// caller is trusted to pass back a pointer this allocator actually
    /// handed out, matching the original kernel's unchecked `free()`
    /// contract.
    pub unsafe fn free(&mut self, ptr: NonNull<u8>) {
        let block_addr = ptr.as_ptr() as usize;
        for class in 0..NUM_SIZES {
            let mut page = self.pages[class];
            while let Some(mut p) = page {
                let hdr = p.as_mut();
                let page_addr = p.as_ptr() as usize;
                if block_addr >= page_addr && block_addr < page_addr + PAGE_SIZE {
                    let block = ptr.cast::<FreeBlock>();
                    (*block.as_ptr()).next = hdr.free_list;
                    hdr.free_list = Some(block);
                    return;
                }
                page = hdr.next_page;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_page() -> KResult<usize> {
        let layout = std::alloc::Layout::from_size_align(PAGE_SIZE, PAGE_SIZE).unwrap();
        // SAFETY: test-only host allocation, freed by leaking (tests are short-lived).
        let ptr = unsafe { std::alloc::alloc(layout) };
        Ok(ptr as usize)
    }

    #[test]
    fn alloc_then_free_reuses_block() {
        let mut slab = SlabAllocator::new();
        let a = slab.alloc(32, fresh_page).unwrap();
        unsafe { slab.free(a) };
        let b = slab.alloc(32, fresh_page).unwrap();
        assert_eq!(a, b, "freed block should be reused before growing again");
    }

    #[test]
    fn distinct_size_classes_do_not_collide() {
        let mut slab = SlabAllocator::new();
        let small = slab.alloc(16, fresh_page).unwrap();
        let large = slab.alloc(1024, fresh_page).unwrap();
        assert_ne!(small, large);
    }

    #[test]
    fn size_class_rounds_up() {
        assert_eq!(SlabAllocator::size_class(1), Some(0));
        assert_eq!(SlabAllocator::size_class(16), Some(0));
        assert_eq!(SlabAllocator::size_class(17), Some(1));
        assert_eq!(SlabAllocator::size_class(4096), None);
    }
}
