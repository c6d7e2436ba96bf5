//! PID allocation (spec §4.3 "PID allocation"): a bit-pool over the fixed
//! range `[1, NPROC]`, guarded by a sleeping mutex rather than a spinlock —
//! spec §5 files PID allocation under "sleeping mutexes/semaphores for
//! longer critical sections" alongside block-device I/O and pipe access,
//! not under the interrupts-off tier reserved for ISR-visible state.
//! PID 0 stays reserved and is never handed out, matching
//! `original_source/thread/thread.c`'s allocate_pid treating slot 0 as
//! "no pid yet".

use crate::bitmap::Bitmap;
use crate::param::NPROC;
use crate::sync::{new_sleep_lock, SleepLock};

use super::pcb::Pid;

const POOL_BYTES: usize = (NPROC + 7) / 8;

static POOL: SleepLock<Bitmap<POOL_BYTES>> = new_sleep_lock("pidpool", Bitmap::new());

/// `allocate`: claim the lowest clear bit and return `1 + bit` (spec §4.3
/// "returns `base + first_clear_bit`"). `None` once every pid in
/// `[1, NPROC]` is in use.
pub fn allocate() -> Option<Pid> {
    let mut pool = POOL.lock();
    let bit = pool.scan_and_set(1)?;
    Some(bit as Pid + 1)
}

/// `release`: clear the bit backing `pid`, making it available again.
pub fn release(pid: Pid) {
    debug_assert!(pid >= 1, "pid::release: pid 0 is reserved, never allocated");
    let mut pool = POOL.lock();
    pool.set(pid as usize - 1, false);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_never_returns_pid_zero() {
        for _ in 0..4 {
            let pid = allocate().unwrap();
            assert_ne!(pid, 0);
            release(pid);
        }
    }

    #[test]
    fn release_makes_a_pid_reusable() {
        let a = allocate().unwrap();
        let b = allocate().unwrap();
        assert_ne!(a, b);
        release(a);
        let c = allocate().unwrap();
        assert_eq!(a, c);
        release(b);
        release(c);
    }
}
