//! The short-critical-section lock: disables interrupts for its duration
//! (spec §5(a)). Named `SpinLock` to keep the familiar shape from
//! `kaist-cp-rv6`'s `RawSpinlock`, but on this single-CPU target there is no
//! other hart to actually spin against — `acquire` only has to guard
//! against this same thread re-entering non-recursively, which the
//! `holding`/`AtomicBool` pair below catches the way the original kernel's
//! `intr_disable()`-based critical sections implicitly rely on never being
//! re-entered.

use core::sync::atomic::{AtomicBool, Ordering};

use super::{push_off, pop_off, Guard, Lock, RawLock};

pub struct RawSpinLock {
    name: &'static str,
    locked: AtomicBool,
}

pub type SpinLock<T> = Lock<RawSpinLock, T>;
pub type SpinLockGuard<'s, T> = Guard<'s, RawSpinLock, T>;

impl RawSpinLock {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            locked: AtomicBool::new(false),
        }
    }
}

impl RawLock for RawSpinLock {
    fn acquire(&self) {
        // SAFETY: paired with the pop_off() in release().
        unsafe { push_off() };
        if self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            panic!("SpinLock::acquire: already held: {}", self.name);
        }
    }

    fn release(&self) {
        if self
            .locked
            .compare_exchange(true, false, Ordering::Release, Ordering::Relaxed)
            .is_err()
        {
            panic!("SpinLock::release: not held: {}", self.name);
        }
        // SAFETY: paired with the push_off() in acquire().
        unsafe { pop_off() };
    }

    fn holding(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

impl<T> SpinLock<T> {
    pub const fn new(name: &'static str, data: T) -> Self {
        Lock::new(RawSpinLock::new(name), data)
    }
}

/// Creates a new named `SpinLock`, matching the free-function constructor
/// style `kaist-cp-rv6/kernel-rs/src/pipe.rs` uses for its pipe lock.
pub const fn new_spin_lock<T>(name: &'static str, data: T) -> SpinLock<T> {
    SpinLock::new(name, data)
}
