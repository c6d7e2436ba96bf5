//! The three x86 instructions `lock/irq.rs`'s push_off/pop_off nesting is
//! built on: `cli`, `sti`, and reading `EFLAGS.IF`. Everything else about
//! traps, the IDT, and the TSS belongs to the boot collaborator (spec §1);
//! this is the one sliver of architecture code the scheduler itself needs
//! directly, the same narrow role `kaist-cp-rv6/kernel-rs/src/riscv.rs`'s
//! `intr_on`/`intr_off`/`intr_get` play for `sstatus.SIE`.

const EFLAGS_IF: u32 = 1 << 9;

/// # Safety
/// Executes `cli`; must only run in kernel (ring 0) context.
#[cfg(target_arch = "x86")]
pub unsafe fn cli() {
    asm!("cli", options(nomem, nostack));
}

/// # Safety
/// Executes `sti`; must only run in kernel (ring 0) context.
#[cfg(target_arch = "x86")]
pub unsafe fn sti() {
    asm!("sti", options(nomem, nostack));
}

/// # Safety
/// Reads `EFLAGS` via `pushfl`; must only run in kernel (ring 0) context.
#[cfg(target_arch = "x86")]
pub unsafe fn intr_enabled() -> bool {
    let eflags: u32;
    asm!("pushfd; pop {}", out(reg) eflags, options(nomem));
    eflags & EFLAGS_IF != 0
}

/// Halts until the next interrupt (spec §4.3 idle thread's "HLT loop").
///
/// # Safety
/// Must only run in kernel (ring 0) context; the caller is responsible for
/// interrupts being enabled, or this never wakes up.
#[cfg(target_arch = "x86")]
pub unsafe fn hlt() {
    asm!("hlt", options(nomem, nostack));
}

// Host test builds compile this crate with `std` (see `#![cfg_attr(not(test),
// no_std)]` in lib.rs) and never run on real x86 protected mode, so the
// `asm!` forms above are replaced with a plain in-memory flag a single-
// threaded test can still exercise push_off/pop_off nesting against.
#[cfg(not(target_arch = "x86"))]
mod host_stub {
    use core::sync::atomic::{AtomicBool, Ordering};

    static ENABLED: AtomicBool = AtomicBool::new(true);

    pub unsafe fn cli() {
        ENABLED.store(false, Ordering::SeqCst);
    }

    pub unsafe fn sti() {
        ENABLED.store(true, Ordering::SeqCst);
    }

    pub unsafe fn intr_enabled() -> bool {
        ENABLED.load(Ordering::SeqCst)
    }

    /// Host test builds have no real CPU to halt; a thread calling this
    /// only ever does so in a loop that's never actually scheduled in a
    /// single-threaded test, so there's nothing to busy-wait on here.
    pub unsafe fn hlt() {}
}

#[cfg(not(target_arch = "x86"))]
pub use host_stub::{cli, hlt, intr_enabled, sti};
