//! Blocking synchronization primitives (spec §4.4, C7): a counting
//! semaphore, a recursive mutex built on top of it, and a byte ring buffer
//! used by both the keyboard driver and pipes.
//!
//! None of these spin. Every `down`/`acquire`/blocking push or pop defers to
//! the scheduler's own `block_current`/`unblock_one` (spec §4.3), the same
//! way `original_source/thread/sync.c`'s `sema_down` calls straight into
//! `thread_block(&sema->waiters)` rather than busy-waiting — there is
//! nothing else to spin against on one core, so every wait is a real
//! context switch away.

pub mod mutex;
pub mod ring;
pub mod semaphore;

pub use mutex::{new_sleep_lock, Mutex, SleepLock, SleepLockGuard};
pub use ring::RingBuffer;
pub use semaphore::Semaphore;
