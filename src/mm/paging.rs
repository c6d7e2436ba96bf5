//! Page directories/tables and the frame-plus-mapping helpers built on top
//! of them (spec §4.2 C5): `page_table_add`, `malloc_page`, `get_a_page`,
//! `mfree_page`.
//!
//! Standard x86 two-level paging: a 1024-entry page directory, each present
//! entry pointing at a 1024-entry page table, each present entry pointing at
//! a 4 KiB frame. `kaist-cp-rv6`'s `vm.rs` walks riscv's Sv39 tree the same
//! shape of way (`walk` descending levels, allocating an intermediate table
//! on demand); `walk` below is the x86 two-level analogue.
//!
//! Physical memory is identity-mapped into the kernel's own address space
//! (`p2v`/`v2p` below), matching how `original_source/kernel` sets up its
//! boot page directory before paging is enabled — the seam is kept explicit
//! so a future "really higher-half" kernel only needs to edit these two
//! functions.

use bitflags::bitflags;

use crate::errno::{KernelError, KResult};
use crate::mm::frame::{FramePool, KernelFramePool, PAGE_SIZE};
use crate::param::KERNEL_SPLIT_PDE;

bitflags! {
    pub struct PteFlags: u32 {
        const PRESENT = 1 << 0;
        const RW      = 1 << 1;
        const USER    = 1 << 2;
    }
}

const ENTRIES_PER_TABLE: usize = 1024;
const PDE_SHIFT: usize = 22;
const PTE_SHIFT: usize = 12;
const INDEX_MASK: usize = ENTRIES_PER_TABLE - 1;
const FRAME_ADDR_MASK: u32 = !0xFFF;

/// Identity mapping between physical and kernel-virtual addresses. Real
/// hardware would substitute a proper high-half translation here; this
/// kernel's boot collaborator maps all of physical memory 1:1 below the
/// 3 GiB split (spec §1, §4.2's "kernel half... shared across every address
/// space"), so the two are the same value.
pub const fn p2v(pa: usize) -> usize {
    pa
}

pub const fn v2p(va: usize) -> usize {
    va
}

/// A page-aligned table of 1024 32-bit entries: usable as either a page
/// directory or a page table.
#[repr(align(4096))]
pub struct Table {
    entries: [u32; ENTRIES_PER_TABLE],
}

impl Table {
    pub const fn zeroed() -> Self {
        Self {
            entries: [0; ENTRIES_PER_TABLE],
        }
    }
}

fn pde_index(vaddr: usize) -> usize {
    (vaddr >> PDE_SHIFT) & INDEX_MASK
}

fn pte_index(vaddr: usize) -> usize {
    (vaddr >> PTE_SHIFT) & INDEX_MASK
}

/// Walks `pgdir` down to the PTE slot for `vaddr`, allocating an
/// intermediate page-table frame from `kpool` if `alloc` is set and the PDE
/// is not yet present. Returns a pointer to the PTE slot so the caller can
/// read or write it.
///
/// # Safety
///
/// `pgdir` must point at a live, page-aligned `Table` reachable at its
/// identity-mapped kernel address.
pub unsafe fn walk(
    pgdir: *mut Table,
    vaddr: usize,
    alloc: bool,
    kpool: &mut KernelFramePool,
) -> KResult<*mut u32> {
    let pde = &mut (*pgdir).entries[pde_index(vaddr)];
    let pt: *mut Table = if *pde & PteFlags::PRESENT.bits() != 0 {
        p2v((*pde & FRAME_ADDR_MASK) as usize) as *mut Table
    } else {
        if !alloc {
            return Err(KernelError::OutOfMemory);
        }
        let frame = kpool.palloc().ok_or(KernelError::OutOfMemory)?;
        let pt = p2v(frame) as *mut Table;
        (*pt).entries = [0; ENTRIES_PER_TABLE];
        *pde = (frame as u32 & FRAME_ADDR_MASK)
            | (PteFlags::PRESENT | PteFlags::RW | PteFlags::USER).bits();
        pt
    };
    Ok(&mut (*pt).entries[pte_index(vaddr)] as *mut u32)
}

/// `page_table_add`: ensure the PDE for `vaddr` is present (allocating a
/// page-table frame from the kernel pool if missing, regardless of whether
/// the mapped page itself is user-mode) and write the PTE mapping `vaddr`
/// to `paddr` with the given permissions (spec §4.2).
///
/// # Safety
///
/// `pgdir` must be a live, page-aligned page directory.
pub unsafe fn page_table_add(
    pgdir: *mut Table,
    vaddr: usize,
    paddr: usize,
    user: bool,
    kpool: &mut KernelFramePool,
) -> KResult<()> {
    let pte = walk(pgdir, vaddr, true, kpool)?;
    let mut flags = PteFlags::PRESENT | PteFlags::RW;
    if user {
        flags |= PteFlags::USER;
    }
    *pte = (paddr as u32 & FRAME_ADDR_MASK) | flags.bits();
    Ok(())
}

/// `malloc_page`: allocate `n` physical frames from the given pool and map
/// them starting at `vaddr` in `pgdir`. On partial failure, everything
/// allocated so far in this call is unwound (spec §4.2 edge case: "a failed
/// multi-page allocation must not leak the frames it already grabbed").
///
/// # Safety
///
/// `pgdir` must be a live, page-aligned page directory; `vaddr` must not
/// already be backed by a mapping this call would overwrite inconsistently.
pub unsafe fn malloc_page<const BYTES: usize>(
    pgdir: *mut Table,
    vaddr: usize,
    n: usize,
    user: bool,
    pool: &mut FramePool<BYTES>,
    kpool: &mut KernelFramePool,
) -> KResult<()> {
    let mut done = 0;
    let result = (|| -> KResult<()> {
        for i in 0..n {
            let frame = pool.palloc().ok_or(KernelError::OutOfMemory)?;
            if let Err(e) = page_table_add(pgdir, vaddr + i * PAGE_SIZE, frame, user, kpool) {
                pool.pfree(frame);
                return Err(e);
            }
            done = i + 1;
        }
        Ok(())
    })();
    if result.is_err() {
        mfree_page(pgdir, vaddr, done, pool, kpool);
    }
    result
}

/// `get_a_page`: map a single already-allocated physical frame at `vaddr`
/// (used by `exec`'s argument-page setup and the swap-in path once a frame
/// exists), without taking ownership of `frame` from a pool (spec §4.2).
///
/// # Safety
///
/// As `page_table_add`.
pub unsafe fn get_a_page(
    pgdir: *mut Table,
    vaddr: usize,
    frame: usize,
    user: bool,
    kpool: &mut KernelFramePool,
) -> KResult<()> {
    page_table_add(pgdir, vaddr, frame, user, kpool)
}

/// `malloc_page`'s single-pool special case: the kernel heap's own growth
/// (`mm::kalloc::SlabAllocator`) allocates its backing page from the same
/// pool it uses to install the page-table frame, so there is only one
/// `&mut KernelFramePool` borrow in play rather than two distinct pools.
///
/// # Safety
/// As [`malloc_page`].
pub unsafe fn malloc_kernel_page(
    pgdir: *mut Table,
    vaddr: usize,
    kpool: &mut KernelFramePool,
) -> KResult<()> {
    let frame = kpool.palloc().ok_or(KernelError::OutOfMemory)?;
    if let Err(e) = page_table_add(pgdir, vaddr, frame, false, kpool) {
        kpool.pfree(frame);
        return Err(e);
    }
    Ok(())
}

/// Copies `len` bytes from user address `uaddr` (mapped in `pgdir`) into
/// `dst`, one page at a time. Physical memory is identity-mapped into the
/// kernel's own address space (`p2v`), so once a PTE resolves to a frame the
/// kernel can read it directly without a temporary mapping.
///
/// # Safety
/// `pgdir` must be a live, page-aligned page directory belonging to the
/// process whose memory is being read.
pub unsafe fn copy_in(
    pgdir: *mut Table,
    mut uaddr: usize,
    mut dst: &mut [u8],
    kpool: &mut KernelFramePool,
) -> KResult<()> {
    while !dst.is_empty() {
        let page_base = uaddr & !(PAGE_SIZE - 1);
        let page_off = uaddr - page_base;
        let pte = walk(pgdir, page_base, false, kpool)?;
        if *pte & PteFlags::PRESENT.bits() == 0 {
            return Err(KernelError::BadPath);
        }
        let frame = (*pte & FRAME_ADDR_MASK) as usize;
        let n = (PAGE_SIZE - page_off).min(dst.len());
        let src = (p2v(frame) + page_off) as *const u8;
        core::ptr::copy_nonoverlapping(src, dst.as_mut_ptr(), n);
        let (_, rest) = dst.split_at_mut(n);
        dst = rest;
        uaddr += n;
    }
    Ok(())
}

/// Symmetric to [`copy_in`]: writes `src` into user memory at `uaddr`.
///
/// # Safety
/// As [`copy_in`].
pub unsafe fn copy_out(
    pgdir: *mut Table,
    mut uaddr: usize,
    mut src: &[u8],
    kpool: &mut KernelFramePool,
) -> KResult<()> {
    while !src.is_empty() {
        let page_base = uaddr & !(PAGE_SIZE - 1);
        let page_off = uaddr - page_base;
        let pte = walk(pgdir, page_base, false, kpool)?;
        if *pte & PteFlags::PRESENT.bits() == 0 {
            return Err(KernelError::BadPath);
        }
        let frame = (*pte & FRAME_ADDR_MASK) as usize;
        let n = (PAGE_SIZE - page_off).min(src.len());
        let dst = (p2v(frame) + page_off) as *mut u8;
        core::ptr::copy_nonoverlapping(src.as_ptr(), dst, n);
        src = &src[n..];
        uaddr += n;
    }
    Ok(())
}

/// Copies a NUL-terminated string from user memory into `buf`, stopping at
/// the first `\0` or when `buf` is full. Returns the byte length excluding
/// the terminator.
///
/// # Safety
/// As [`copy_in`].
pub unsafe fn copy_in_str(
    pgdir: *mut Table,
    uaddr: usize,
    buf: &mut [u8],
    kpool: &mut KernelFramePool,
) -> KResult<usize> {
    for i in 0..buf.len() {
        let mut byte = [0u8; 1];
        copy_in(pgdir, uaddr + i, &mut byte, kpool)?;
        if byte[0] == 0 {
            return Ok(i);
        }
        buf[i] = byte[0];
    }
    Err(KernelError::NameTooLong)
}

/// `mfree_page`: unmap and free `n` pages starting at `vaddr`, returning
/// their frames to `pool`. Unmapped holes within the run are skipped rather
/// than treated as an error, matching the original kernel's tolerance of
/// partially-backed ranges during process teardown.
///
/// # Safety
///
/// As `page_table_add`.
pub unsafe fn mfree_page<const BYTES: usize>(
    pgdir: *mut Table,
    vaddr: usize,
    n: usize,
    pool: &mut FramePool<BYTES>,
    kpool: &mut KernelFramePool,
) {
    for i in 0..n {
        let va = vaddr + i * PAGE_SIZE;
        if let Ok(pte) = walk(pgdir, va, false, kpool) {
            if *pte & PteFlags::PRESENT.bits() != 0 {
                let frame = (*pte & FRAME_ADDR_MASK) as usize;
                pool.pfree(frame);
                *pte = 0;
            }
        }
    }
}

/// Whether `vaddr` already has a present mapping in `pgdir`, without
/// allocating anything (spec §4.5 exec step 2: "ensure the virtual page
/// range is mapped... allocating user frames for pages not already
/// present" — this is the presence check that guards the allocation).
///
/// # Safety
/// As [`walk`].
pub unsafe fn is_present(pgdir: *mut Table, vaddr: usize, kpool: &mut KernelFramePool) -> bool {
    match walk(pgdir, vaddr, false, kpool) {
        Ok(pte) => *pte & PteFlags::PRESENT.bits() != 0,
        Err(_) => false,
    }
}

/// Copies the shared kernel half of every page directory (PDE indices
/// `KERNEL_SPLIT_PDE..1024`) from `template` into a freshly built address
/// space's page directory (spec §4.2 "kernel half... shared across every
/// address space"). Every process needs this before any user mapping is
/// added: taking a trap while running on an otherwise-empty page directory
/// would fault on the kernel's own code.
///
/// # Safety
/// `pgdir` and `template` must each point at a live, page-aligned `Table`.
pub unsafe fn install_kernel_half(pgdir: *mut Table, template: *const Table) {
    for i in KERNEL_SPLIT_PDE..ENTRIES_PER_TABLE {
        (*pgdir).entries[i] = (*template).entries[i];
    }
}

/// Deep-copies every present user-half mapping from `parent` into `child`,
/// allocating a fresh frame per page from `pool` and copying its bytes
/// through the identity-mapped kernel address (spec §4.5 fork: "a new
/// physical frame is allocated from the user pool, parent content is
/// copied via a kernel-side temporary mapping, and installed in the
/// child"). On partial failure everything copied so far is unwound via
/// [`free_user_half`], mirroring [`malloc_page`]'s own unwind-on-failure
/// shape.
///
/// # Safety
/// `parent` and `child` must each point at a live, page-aligned `Table`;
/// `child` must already have its kernel half installed (`install_kernel_half`)
/// and no user-half mappings of its own yet.
pub unsafe fn clone_user_mappings<const BYTES: usize>(
    parent: *const Table,
    child: *mut Table,
    pool: &mut FramePool<BYTES>,
    kpool: &mut KernelFramePool,
) -> KResult<()> {
    let result = (|| -> KResult<()> {
        for pde_i in 0..KERNEL_SPLIT_PDE {
            let pde = (*parent).entries[pde_i];
            if pde & PteFlags::PRESENT.bits() == 0 {
                continue;
            }
            let pt = p2v((pde & FRAME_ADDR_MASK) as usize) as *const Table;
            for pte_i in 0..ENTRIES_PER_TABLE {
                let pte = (*pt).entries[pte_i];
                if pte & PteFlags::PRESENT.bits() == 0 {
                    continue;
                }
                let vaddr = (pde_i << PDE_SHIFT) | (pte_i << PTE_SHIFT);
                let src_frame = (pte & FRAME_ADDR_MASK) as usize;
                let dst_frame = pool.palloc().ok_or(KernelError::OutOfMemory)?;
                core::ptr::copy_nonoverlapping(
                    p2v(src_frame) as *const u8,
                    p2v(dst_frame) as *mut u8,
                    PAGE_SIZE,
                );
                if let Err(e) = page_table_add(child, vaddr, dst_frame, true, kpool) {
                    pool.pfree(dst_frame);
                    return Err(e);
                }
            }
        }
        Ok(())
    })();
    if result.is_err() {
        free_user_half(child, pool, kpool);
    }
    result
}

/// Frees every present user-half mapping in `pgdir`: each mapped page's
/// frame, then the page-table frame itself (spec §4.5 exit: "walk the user
/// half of the page directory; for each present PTE, free the user frame;
/// free the page-table frame itself").
///
/// # Safety
/// `pgdir` must point at a live, page-aligned `Table`.
pub unsafe fn free_user_half<const BYTES: usize>(
    pgdir: *mut Table,
    pool: &mut FramePool<BYTES>,
    kpool: &mut KernelFramePool,
) {
    for pde_i in 0..KERNEL_SPLIT_PDE {
        let pde = (*pgdir).entries[pde_i];
        if pde & PteFlags::PRESENT.bits() == 0 {
            continue;
        }
        let pt_frame = (pde & FRAME_ADDR_MASK) as usize;
        let pt = p2v(pt_frame) as *mut Table;
        for pte_i in 0..ENTRIES_PER_TABLE {
            let pte = (*pt).entries[pte_i];
            if pte & PteFlags::PRESENT.bits() != 0 {
                pool.pfree((pte & FRAME_ADDR_MASK) as usize);
            }
        }
        kpool.pfree(pt_frame);
        (*pgdir).entries[pde_i] = 0;
    }
}
