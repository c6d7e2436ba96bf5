//! The kernel's single global context (spec §9's design note: "model global
//! mutable state as fields of one kernel context rather than scattered
//! statics") and the `print!`/`println!` macros everything else uses.
//!
//! Single-CPU, so there is exactly one of everything here: one kernel frame
//! pool, one user frame pool, one kernel heap, one mounted partition. Where
//! `kaist-cp-rv6/kernel-rs/src/kernel.rs`'s `KernelBuilder`/`Kernel` split
//! exists to let per-hart/bcache/procs fields finish two-phase
//! initialization before the kernel is safe to share, this kernel's fields
//! are either `const`-constructible outright (every pool and lock below) or
//! use `spin::Once` for the one truly runtime-dependent piece (which
//! partition, if any, got mounted) — so there is only one `Kernel` type, no
//! builder phase.

use core::fmt::{self, Write};
use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::console::Printer;
use crate::errno::{KernelError, KResult};
use crate::fs::Partition;
use crate::lock::SpinLock;
use crate::mm::frame::{KernelFramePool, UserFramePool, PAGE_SIZE, PHYS_BASE};
use crate::mm::frame::{KERNEL_POOL_FRAMES, USER_POOL_FRAMES};
use crate::mm::paging::Table;
use crate::mm::{FramePool, SlabAllocator, VirtualPool};
use crate::mm::{KERNEL_HEAP_BASE, KERNEL_HEAP_BITMAP_BYTES, KERNEL_HEAP_PAGES};
use crate::block::PartitionTable;

/// Physical base of the user pool: immediately above the kernel pool's
/// range (spec §4.2 "low half belongs to the kernel, high half to user
/// processes").
const USER_POOL_BASE: usize = PHYS_BASE + KERNEL_POOL_FRAMES * PAGE_SIZE;

/// The kernel's single global context: frame pools, the kernel heap, the
/// shared kernel half of every page directory, and (once boot finds one) the
/// mounted partition. Every field is a lock or a `Once`, so `Kernel` is
/// shared behind a plain `&'static` reference — no field is ever mutated
/// without going through one (spec §5).
pub struct Kernel {
    panicked: AtomicBool,
    pub printer: SpinLock<Printer>,
    pub kernel_pool: SpinLock<KernelFramePool>,
    pub user_pool: SpinLock<UserFramePool>,
    pub kernel_vpool: SpinLock<VirtualPool<KERNEL_HEAP_BITMAP_BYTES>>,
    pub kernel_heap: SpinLock<SlabAllocator>,
    /// The kernel half of every address space's page directory: mapped once
    /// at boot, then every process's own page directory's upper entries are
    /// copied from this template (spec §4.2 "kernel half... shared across
    /// every address space").
    pub kernel_pgdir: SpinLock<Table>,
    /// Partitions discovered by the boot collaborator's disk probe (spec
    /// §4.6 "linked into a global list"); `init_fs` mounts the first one.
    pub partitions: SpinLock<PartitionTable>,
    file_system: spin::Once<Partition>,
}

impl core::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Kernel").finish_non_exhaustive()
    }
}

impl Kernel {
    const fn new() -> Self {
        Self {
            panicked: AtomicBool::new(false),
            printer: SpinLock::new("printer", Printer),
            kernel_pool: SpinLock::new("kernel-pool", FramePool::new(PHYS_BASE, KERNEL_POOL_FRAMES)),
            user_pool: SpinLock::new("user-pool", FramePool::new(USER_POOL_BASE, USER_POOL_FRAMES)),
            kernel_vpool: SpinLock::new("kernel-vpool", VirtualPool::new(KERNEL_HEAP_BASE, KERNEL_HEAP_PAGES)),
            kernel_heap: SpinLock::new("kernel-heap", SlabAllocator::new()),
            kernel_pgdir: SpinLock::new("kernel-pgdir", Table::zeroed()),
            partitions: SpinLock::new("partitions", PartitionTable::new()),
            file_system: spin::Once::new(),
        }
    }

    fn panic(&self) {
        self.panicked.store(true, Ordering::Release);
    }

    pub fn is_panicked(&self) -> bool {
        self.panicked.load(Ordering::Acquire)
    }

    /// Prints through the console printer, bypassing its lock once the
    /// kernel has panicked — a panic raised while the printer lock is held
    /// must still be able to print its own message instead of deadlocking
    /// (or, on this non-reentrant `SpinLock`, panicking again) trying to
    /// re-acquire it.
    pub fn printer_write_fmt(&self, args: fmt::Arguments<'_>) -> fmt::Result {
        if self.is_panicked() {
            // SAFETY: single-CPU and already panicked, so no other thread
            // resumes to race this write.
            unsafe { (*self.printer.get_mut_raw()).write_fmt(args) }
        } else {
            self.printer.lock().write_fmt(args)
        }
    }

    /// Boot-time memory setup (spec §4.1, §4.2). Every pool above is fully
    /// `const`-constructed already, so there is nothing left to do at
    /// runtime; this exists as a named hook so `init_all`'s call order
    /// matches `original_source/kernel/init.c`'s (memory, then threads, then
    /// console, then interrupts, then disk/file system).
    pub fn init_memory(&self) {}

    /// Boot-time PCB table and scheduler setup (spec §4.3, §4.5).
    ///
    /// # Safety
    /// Must run exactly once, before any interrupt that could touch the
    /// ready list or PCB table is enabled.
    pub unsafe fn init_proc(&self) {
        crate::proc::init_proc()
    }

    /// Mounts the first partition the boot collaborator's disk probe
    /// registered, if any. A kernel with no disk attached (e.g. a
    /// memory-only test boot) is left with no file system mounted rather
    /// than treated as an error.
    pub fn init_fs(&self) {
        let desc = self.partitions.lock().get(0).copied();
        if let Some(desc) = desc {
            if let Some(partition) = Partition::mount(desc) {
                self.file_system.call_once(|| partition);
            }
        }
    }

    /// The mounted partition, if `init_fs` found one. Every `sys_*` file
    /// call that needs a partition gets `NoSuchFile` when none is mounted —
    /// with nothing mounted, no path can resolve to anything (spec §4.9).
    pub fn file_system(&self) -> KResult<&Partition> {
        self.file_system.get().ok_or(KernelError::NoSuchFile)
    }

    /// `sys_malloc`: grow the kernel heap's backing page on demand (spec
    /// §4.2's malloc/free pair). Lock order is heap, then vpool, then pgdir,
    /// then kernel pool — followed the same way by every caller that needs
    /// more than one of these locks at once, so no two ever nest the other
    /// way round.
    pub fn kalloc(&self, n: usize) -> KResult<NonNull<u8>> {
        let mut heap = self.kernel_heap.lock();
        let mut vpool = self.kernel_vpool.lock();
        heap.alloc(n, move || {
            let vaddr = vpool.alloc(1).ok_or(KernelError::OutOfMemory)?;
            let mut pgdir = self.kernel_pgdir.lock();
            let mut kpool = self.kernel_pool.lock();
            // SAFETY: `pgdir` is this kernel's own live page directory.
            unsafe {
                crate::mm::paging::malloc_kernel_page(&mut *pgdir as *mut Table, vaddr, &mut kpool)?;
            }
            Ok(vaddr)
        })
    }

    /// `sys_free`: release a block `kalloc` handed out. `sys_free` (spec §6
    /// `free(p)`) passes only the pointer; the underlying page is never
    /// returned to the vaddr pool or frame pool — matching
    /// `mm::kalloc::SlabAllocator`'s own never-shrink contract, the same
    /// simplification the original kernel's `malloc.c` makes.
    ///
    /// # Safety
    /// `ptr` must be a block this `Kernel`'s `kalloc` previously returned.
    pub unsafe fn kfree(&self, ptr: NonNull<u8>) {
        self.kernel_heap.lock().free(ptr)
    }
}

static KERNEL: Kernel = Kernel::new();

/// The kernel's single global context. Safe to call at any point after
/// `init_all` starts running, since every field is a lock or a `Once` rather
/// than data requiring prior initialization to read safely.
pub fn kernel() -> &'static Kernel {
    &KERNEL
}

/// Same reference as [`kernel`], named to match this crate's boot-sequence
/// call sites (`init_all`'s `kernel_mut().init_memory()` etc.) — there is no
/// true `&mut Kernel` anywhere, since every field is reached through
/// interior-mutable locks, but the boot collaborator calling these methods
/// is conceptually "the" mutator.
///
/// # Safety
/// Intended to be called only during single-threaded boot, before the
/// scheduler or any interrupt handler can observe partially-initialized
/// state. Reading the result is always safe; the name is a caller-facing
/// convention, not an enforced invariant.
pub unsafe fn kernel_mut() -> &'static Kernel {
    &KERNEL
}

/// Prints to the console through the kernel's printer.
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => {
        $crate::kernel::kernel().printer_write_fmt(format_args!($($arg)*)).unwrap();
    };
}

/// Prints a line to the console through the kernel's printer.
#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ($crate::print!("{}\n", format_args!($($arg)*)));
}

/// Kernel invariant check (spec §7 "Assertions" tier): panics with
/// `file:line: condition` on failure, the same payload `panic!` itself
/// produces, differing only in the message prefix so a crash log can tell
/// an asserted invariant apart from an unconditional panic.
#[macro_export]
macro_rules! kassert {
    ($cond:expr) => {
        if !$cond {
            panic!("assertion failed: {}", stringify!($cond));
        }
    };
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            panic!("assertion failed: {}: {}", stringify!($cond), format_args!($($arg)+));
        }
    };
}

/// `kassert!` specialized to an equality check, reporting both sides on
/// failure the way `assert_eq!` does (spec §7 "Assertions" tier).
#[macro_export]
macro_rules! kassert_eq {
    ($left:expr, $right:expr) => {
        match (&$left, &$right) {
            (left_val, right_val) => {
                if !(*left_val == *right_val) {
                    panic!(
                        "assertion failed: `(left == right)`\n  left: `{:?}`\n right: `{:?}`",
                        left_val, right_val
                    );
                }
            }
        }
    };
}

#[cfg(not(test))]
#[panic_handler]
fn panic_handler(info: &core::panic::PanicInfo<'_>) -> ! {
    kernel().panic();
    println!("{}", info);
    loop {
        core::hint::spin_loop();
    }
}
