//! Counting semaphore with FIFO waiters (spec §4.4 C7).
//!
//! `down` appends the current thread to `waiters` and hands off to the
//! scheduler's `block_current` while still inside one continuous
//! interrupt-disabled bracket — nothing else runs on this core between the
//! moment we decide to sleep and the moment we actually switch away, so an
//! `up` from the keyboard ISR can never observe an empty waiter list for a
//! thread that is about to add itself to it. This mirrors
//! `original_source/thread/sync.c`'s `sema_down`, which calls
//! `intr_disable()` once for the whole check-block-switch sequence and only
//! restores the saved level on the way back out.

use crate::list::IndexList;
use crate::lock::SpinLock;
use crate::param::NPROC;

struct Inner {
    value: i32,
    waiters: IndexList<NPROC>,
}

/// A counting semaphore. The stored count never goes below zero — a `down`
/// on an exhausted semaphore blocks instead of underflowing (spec §4.4).
pub struct Semaphore {
    inner: SpinLock<Inner>,
}

impl Semaphore {
    pub const fn new(name: &'static str, initial: i32) -> Self {
        Self {
            inner: SpinLock::new(
                name,
                Inner {
                    value: initial,
                    waiters: IndexList::new(),
                },
            ),
        }
    }

    /// `down`: block until `value > 0`, then consume one unit.
    pub fn down(&self) {
        loop {
            // SAFETY: matched by the pop_off below on every path out of
            // this iteration.
            unsafe { crate::lock::push_off() };
            let acquired = {
                let mut guard = self.inner.lock();
                if guard.value > 0 {
                    guard.value -= 1;
                    true
                } else {
                    guard.waiters.append(crate::proc::current_slot());
                    false
                }
            };
            if acquired {
                unsafe { crate::lock::pop_off() };
                return;
            }
            // SAFETY: the spinlock guard above has already been dropped, so
            // `block_current` is free to take `waiters` over; interrupts
            // have stayed off, uninterrupted, since this thread linked its
            // slot into `waiters`, so nothing else can run on this single
            // CPU to race with it in between.
            unsafe {
                let waiters = &mut (*self.inner.get_mut_raw()).waiters;
                crate::proc::block_current(waiters);
                crate::lock::pop_off();
            }
        }
    }

    /// `up`: release one unit, waking the oldest blocked waiter if any
    /// (FIFO, spec §4.4).
    pub fn up(&self) {
        unsafe { crate::lock::push_off() };
        {
            let mut guard = self.inner.lock();
            guard.value += 1;
            crate::proc::unblock_one(&mut guard.waiters);
        }
        unsafe { crate::lock::pop_off() };
    }

    /// Non-blocking variant used by interrupt handlers (e.g. the keyboard
    /// ISR posting to its ring buffer's "items" semaphore) where sleeping
    /// is not an option.
    pub fn try_down(&self) -> bool {
        let mut guard = self.inner.lock();
        if guard.value > 0 {
            guard.value -= 1;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_down_respects_count() {
        let sem = Semaphore::new("test", 2);
        assert!(sem.try_down());
        assert!(sem.try_down());
        assert!(!sem.try_down());
        sem.up();
        assert!(sem.try_down());
    }
}
