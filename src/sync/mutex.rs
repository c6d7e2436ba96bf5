//! Recursive mutex: a binary semaphore plus a holder/repeat-count pair, the
//! way `original_source/thread/sync.c`'s `lock_acquire`/`lock_release`
//! track `holder` and let the same thread re-enter without deadlocking on
//! itself (spec §4.4 C7).

use core::sync::atomic::{AtomicI32, AtomicU32, Ordering};

use crate::sync::semaphore::Semaphore;

const NO_HOLDER: u32 = u32::MAX;

/// A mutex the same thread may re-acquire any number of times; it becomes
/// available to other threads again only once `release` has been called
/// the same number of times as `acquire` (spec §4.4).
pub struct Mutex {
    binary: Semaphore,
    holder: AtomicU32,
    depth: AtomicI32,
}

impl Mutex {
    pub const fn new(name: &'static str) -> Self {
        Self {
            binary: Semaphore::new(name, 1),
            holder: AtomicU32::new(NO_HOLDER),
            depth: AtomicI32::new(0),
        }
    }

    pub fn acquire(&self) {
        let me = crate::proc::current_pid();
        if self.holder.load(Ordering::Acquire) == me {
            self.depth.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.binary.down();
        self.holder.store(me, Ordering::Release);
        self.depth.store(1, Ordering::Relaxed);
    }

    pub fn release(&self) {
        let me = crate::proc::current_pid();
        debug_assert_eq!(
            self.holder.load(Ordering::Relaxed),
            me,
            "Mutex::release: releasing a mutex this thread does not hold"
        );
        if self.depth.fetch_sub(1, Ordering::Relaxed) > 1 {
            return;
        }
        self.holder.store(NO_HOLDER, Ordering::Release);
        self.binary.up();
    }

    pub fn is_held_by_current(&self) -> bool {
        self.holder.load(Ordering::Relaxed) == crate::proc::current_pid()
    }

    fn holding(&self) -> bool {
        self.holder.load(Ordering::Relaxed) != NO_HOLDER
    }
}

impl crate::lock::RawLock for Mutex {
    fn acquire(&self) {
        Mutex::acquire(self)
    }

    fn release(&self) {
        Mutex::release(self)
    }

    fn holding(&self) -> bool {
        Mutex::holding(self)
    }
}

/// A longer-held, sleeping-lock-protected value — the partition's combined
/// superblock/bitmaps/open-inode state (spec §5: "block-device I/O
/// serialization per partition... sleeping mutexes/semaphores for longer
/// critical sections"), reusing `lock::Lock<L, T>`'s guard machinery with
/// [`Mutex`] instead of `RawSpinLock` the way `lock/spinlock.rs` does for
/// short sections.
pub type SleepLock<T> = crate::lock::Lock<Mutex, T>;
pub type SleepLockGuard<'s, T> = crate::lock::Guard<'s, Mutex, T>;

/// Constructs a `SleepLock`, matching `lock::new_spin_lock`'s free-function
/// style.
pub const fn new_sleep_lock<T>(name: &'static str, data: T) -> SleepLock<T> {
    SleepLock::new(Mutex::new(name), data)
}
