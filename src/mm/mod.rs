//! Physical memory, virtual address space, and paging (spec §4.2, C3-C5).
//!
//! Three layers, each a thin wrapper the layer above composes rather than
//! bypasses: [`frame`] hands out physical page frames, [`vaddr`] hands out
//! virtual address ranges, [`paging`] backs a range from one with frames
//! from the other. [`kalloc`] is the only consumer inside this crate that
//! needs allocations smaller than a page and sits on top of all three.

pub mod frame;
pub mod kalloc;
pub mod paging;
pub mod vaddr;

pub use frame::{FramePool, KernelFramePool, UserFramePool, PAGE_SIZE};
pub use kalloc::SlabAllocator;
pub use paging::{
    p2v, v2p, page_table_add, get_a_page, malloc_page, mfree_page, Table,
    install_kernel_half, clone_user_mappings, free_user_half, is_present,
    copy_in, copy_out, copy_in_str, walk,
};
pub use vaddr::VirtualPool;

use crate::errno::KResult;
use crate::param::NPROC;

/// Number of page-sized slots in the kernel's own heap virtual pool. Backs
/// `sys_malloc`'s page growth and any kernel-side buffers that don't fit in
/// `static` storage.
pub const KERNEL_HEAP_PAGES: usize = 1024;

/// Byte width of the bitmap covering `KERNEL_HEAP_PAGES` one bit per page.
pub const KERNEL_HEAP_BITMAP_BYTES: usize = KERNEL_HEAP_PAGES / 8;

/// Base of the kernel heap's virtual range. Placed just above where the
/// kernel image and its page tables live; the exact split against the user
/// half of the address space is the linker script's contract (spec §1).
pub const KERNEL_HEAP_BASE: usize = 0xD000_0000;

/// Page-sized slots available to one process's user-space virtual pool.
/// `NPROC` processes never run concurrently on this single-CPU kernel in
/// the sense of sharing the pool, but each PCB keeps its own pool sized for
/// the full `MAX_FILE_SIZE`-plus-stack range a single process might need
/// (spec §4.2, §7).
pub const USER_VPOOL_PAGES: usize = 1024;
pub const USER_VPOOL_BITMAP_BYTES: usize = USER_VPOOL_PAGES / 8;
pub const USER_VPOOL_BASE: usize = 0x0040_0000;

static_assertions::const_assert!(NPROC > 0);

/// One process's address space: its page directory plus the virtual pool
/// tracking which user-space slots are in use. The PCB (`proc` module)
/// embeds one of these per process.
pub struct AddressSpace {
    pub pgdir: Table,
    pub vpool: VirtualPool<USER_VPOOL_BITMAP_BYTES>,
}

impl AddressSpace {
    pub const fn new() -> Self {
        Self {
            pgdir: Table::zeroed(),
            vpool: VirtualPool::new(USER_VPOOL_BASE, USER_VPOOL_PAGES),
        }
    }
}

/// Builds a fresh address space with the kernel half already installed from
/// the kernel's own page directory template, ready to receive user mappings
/// (spec §4.2; used by `fork` for the child and, conceptually, by the boot
/// collaborator for the very first process).
pub fn new_address_space() -> KResult<AddressSpace> {
    let mut space = AddressSpace::new();
    let template = crate::kernel::kernel().kernel_pgdir.lock();
    // SAFETY: `space.pgdir` was just built live on this stack; `template` is
    // the kernel's own live page directory.
    unsafe {
        paging::install_kernel_half(&mut space.pgdir as *mut Table, &*template as *const Table);
    }
    Ok(space)
}

/// `fork`'s address-space step: a fresh address space with the kernel half
/// installed and a full eager deep copy of `parent`'s user half, frame by
/// frame (spec §4.5 "the child's address space is a complete, eager copy of
/// the parent's — no copy-on-write"). The per-process virtual-pool bitmap is
/// copied alongside it, since the child starts out with exactly the same
/// slots reserved as the parent.
///
/// Locks `user_pool` then `kernel_pool`, the same order `Kernel::kalloc`
/// takes its own last two locks in, so the two code paths never invert.
pub fn fork_address_space(parent: &AddressSpace) -> KResult<AddressSpace> {
    let mut child = new_address_space()?;
    let kernel = crate::kernel::kernel();
    let mut user_pool = kernel.user_pool.lock();
    let mut kernel_pool = kernel.kernel_pool.lock();
    // SAFETY: both page directories are live; `child` has its kernel half
    // installed and no user-half mappings yet.
    unsafe {
        paging::clone_user_mappings(
            &parent.pgdir as *const Table,
            &mut child.pgdir as *mut Table,
            &mut user_pool,
            &mut kernel_pool,
        )?;
    }
    drop((user_pool, kernel_pool));
    child.vpool = parent.vpool.clone();
    Ok(child)
}

/// `exit`'s address-space teardown: returns every user-half frame and page
/// table to the pools (spec §4.5 exit). The kernel half is left untouched —
/// it is the shared template's own copy, not something this process owns.
pub fn free_address_space(space: &mut AddressSpace) {
    let kernel = crate::kernel::kernel();
    let mut user_pool = kernel.user_pool.lock();
    let mut kernel_pool = kernel.kernel_pool.lock();
    // SAFETY: `space.pgdir` is a live page directory belonging to no other
    // running process once `exit` calls this.
    unsafe {
        paging::free_user_half(&mut space.pgdir as *mut Table, &mut user_pool, &mut kernel_pool);
    }
}
