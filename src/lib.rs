//! TeachOS: a small teaching kernel for 32-bit x86 (protected mode, paging
//! enabled), covering preemptive multitasking, demand-backed virtual memory,
//! kernel synchronization primitives, and an indexed on-disk file system.
//!
//! The bootloader, IDT/PIC programming, the ATA/IDE driver, the PS/2
//! keyboard driver, VGA text console, TSS setup, the user-space shell, and
//! ELF parsing for anything but `exec`'s own needs are external collaborators
//! (see `spec.md` §1, §6) and are not implemented here; this crate exposes
//! the contracts they are expected to satisfy.

#![cfg_attr(not(test), no_std)]
#![deny(absolute_paths_not_starting_with_crate)]
#![deny(anonymous_parameters)]
#![deny(bare_trait_objects)]
#![deny(elided_lifetimes_in_paths)]
#![deny(keyword_idents)]
#![deny(macro_use_extern_crate)]
#![deny(missing_debug_implementations)]
#![deny(rust_2018_idioms)]
#![deny(trivial_numeric_casts)]
#![deny(unused_extern_crates)]
#![deny(unused_import_braces)]
#![allow(dead_code)] // several handlers are wired up by the boot collaborator only, not yet called in-crate
#![feature(asm)]
#![feature(const_fn_trait_bound)]
#![feature(const_mut_refs)]

#[macro_use]
pub mod kernel;

pub mod bitmap;
pub mod block;
pub mod console;
pub mod elf;
pub mod errno;
pub mod exec;
pub mod fs;
pub mod list;
pub mod lock;
pub mod mm;
pub mod param;
pub mod pipe;
pub mod proc;
pub mod sync;
pub mod syscall;

/// Boot-time entry point. The bootloader collaborator transfers control here
/// with paging already enabled and the stack set up, and has already
/// programmed the IDT/PIC and TSS (§1). `init_all` brings up every in-scope
/// subsystem in the order `original_source/kernel/init.c` establishes:
/// memory, then threads, then console/keyboard, then syscalls are wired up,
/// then interrupts are finally unmasked, then the disk and file system.
///
/// # Safety
///
/// Must be called exactly once, by the single boot CPU, with paging enabled
/// and no other subsystem initialized yet.
pub unsafe fn init_all() {
    kernel::kernel_mut().init_memory();
    kernel::kernel_mut().init_proc();
    console::consoleinit();
    // ISR-visible state (ready list, console input queue) now exists, so it
    // is safe to let the boot collaborator's already-programmed IDT start
    // delivering timer and keyboard interrupts.
    crate::proc::arch_sti();
    kernel::kernel_mut().init_fs();
}
