//! Process control blocks and the scheduler (spec §4.3 C6, §4.5 C8).
//!
//! Single-CPU, so there is exactly one notion of "the current thread" and
//! exactly one ready list; no per-hart `Cpu` array is needed the way
//! `kaist-cp-rv6/kernel-rs/src/proc.rs` keeps one. What remains is the part
//! of that file's job this kernel still needs: a fixed PCB table, a pid
//! pool, a priority round-robin ready list, and `fork`/`exec`/`wait`/`exit`
//! built on top of them.

pub mod arch;
pub mod pcb;
pub mod pid;
pub mod sched;

pub use pcb::{Pid, Proc, ProcState};
pub use sched::{for_each_proc, fork, spawn, wait, with_current, with_proc_by_pid, yield_current};

use crate::list::IndexList;
use crate::param::NPROC;

/// Architecture hook: is `EFLAGS.IF` set right now? Owned by the x86
/// trap/IDT collaborator (spec §1's external-collaborator list).
///
/// # Safety
/// Reads real CPU state.
pub unsafe fn arch_intr_enabled() -> bool {
    arch::intr_enabled()
}

/// # Safety
/// Executes `cli`.
pub unsafe fn arch_cli() {
    arch::cli()
}

/// # Safety
/// Executes `sti`.
pub unsafe fn arch_sti() {
    arch::sti()
}

/// The pid of the thread currently executing kernel code. Only ever called
/// with interrupts disabled or a relevant lock held, so there is no
/// question of which thread "current" refers to (spec §5).
pub fn current_pid() -> Pid {
    sched::current_pid()
}

/// The calling thread's PCB table slot — the index waiter `IndexList`s (e.g.
/// a semaphore's blocked queue) are built from, as opposed to its pid.
pub fn current_slot() -> u32 {
    sched::current_slot()
}

/// Append the calling thread to `waiters`, mark it blocked, and switch to
/// the next ready thread. Returns only once some `unblock_one`/
/// `unblock_all` has moved this pid back onto the ready list and the
/// scheduler has run it again (spec §4.3's `thread_block`).
///
/// # Safety
/// Must be called with interrupts already disabled by the caller, and the
/// calling thread must already be linked into `waiters`.
pub unsafe fn block_current(waiters: &mut IndexList<NPROC>) {
    sched::block_current(waiters)
}

/// Move the oldest waiter in `waiters`, if any, to the head of the ready
/// list — the priority boost spec §4.3 gives threads woken from a wait, so
/// they run again before threads that have been ready all along. Returns
/// whether a waiter was found and unblocked.
pub fn unblock_one(waiters: &mut IndexList<NPROC>) -> bool {
    sched::unblock_one(waiters)
}

/// Move every waiter in `waiters` to the head of the ready list, preserving
/// their relative order. Used by broadcast-style wakeups where more than
/// one waiter can make progress at once.
pub fn unblock_all(waiters: &mut IndexList<NPROC>) {
    sched::unblock_all(waiters)
}

/// Boot-time PCB table and scheduler state initialization (spec §4.3,
/// §4.5): creates the `init` thread (claims pid `param::INIT_PID`), the
/// idle thread, and registers the calling boot CPU itself as the `main`
/// thread, so `ps` lists all three from the very start (spec §8 scenario
/// E).
///
/// # Safety
/// Must run exactly once, before any interrupt that could touch the ready
/// list or PCB table is enabled.
pub unsafe fn init_proc() {
    sched::init()
}

/// `exit`: tear down the calling thread's address space and resources,
/// record its exit code, reparent its children to the init thread, wake
/// anyone blocked in `wait` on it, and switch away for good (spec §4.5).
///
/// # Safety
/// Never returns to the caller.
pub unsafe fn exit(status: i32) -> ! {
    sched::exit(status)
}

/// Timer-interrupt hook: charges one tick against the running thread's
/// slice and requests a reschedule once it runs out (spec §4.3, §9(i) — the
/// counter must count *down* to zero, not up, or every thread would run
/// forever).
///
/// # Safety
/// Must be called from the timer ISR with interrupts already off.
pub unsafe fn tick() {
    sched::tick()
}
