//! Matched interrupt disable/enable, mirroring
//! `kaist-cp-rv6/kernel-rs/src/lock/spinlock.rs`'s `push_off`/`pop_off`,
//! adapted to a single hart: no per-CPU struct is needed, just one global
//! nesting counter and the saved interrupt-enable bit.
//!
//! `push_off`/`pop_off` are matched: it takes two `pop_off`s to undo two
//! `push_off`s, and if interrupts were already off, the pair leaves them
//! off. This is how the ready list, all-tasks list, PID pool, and
//! `write_deny` flip (spec §5) stay ISR-safe without needing a real
//! multi-core spinlock.

use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

static NOFF: AtomicUsize = AtomicUsize::new(0);
static INTENA: AtomicBool = AtomicBool::new(false);

/// Architecture hook: are interrupts currently enabled? Provided by the x86
/// trap/IDT collaborator (out of scope, spec §1) via `EFLAGS.IF`.
///
/// # Safety
/// Reads real CPU state; must only be called from kernel context.
pub unsafe fn intr_get() -> bool {
    crate::proc::arch_intr_enabled()
}

/// # Safety
/// Architecture hook to disable interrupts (`cli`).
unsafe fn intr_off() {
    crate::proc::arch_cli();
}

/// # Safety
/// Architecture hook to enable interrupts (`sti`).
unsafe fn intr_on() {
    crate::proc::arch_sti();
}

/// Disables interrupts, remembering whether they were enabled on the
/// outermost call.
///
/// # Safety
/// Must be paired with a later `pop_off()`.
pub unsafe fn push_off() {
    let was_enabled = intr_get();
    intr_off();
    if NOFF.load(Ordering::Relaxed) == 0 {
        INTENA.store(was_enabled, Ordering::Relaxed);
    }
    NOFF.fetch_add(1, Ordering::Relaxed);
}

/// Undoes one `push_off()`. Once the nesting count reaches zero, restores
/// whatever the interrupt-enable state was before the outermost `push_off`.
///
/// # Safety
/// Must be paired with an earlier `push_off()`; must be called with
/// interrupts currently off.
pub unsafe fn pop_off() {
    assert!(!intr_get(), "pop_off: interruptible");
    let prev = NOFF.load(Ordering::Relaxed);
    assert!(prev >= 1, "pop_off: not nested");
    NOFF.store(prev - 1, Ordering::Relaxed);
    if prev - 1 == 0 && INTENA.load(Ordering::Relaxed) {
        intr_on();
    }
}
