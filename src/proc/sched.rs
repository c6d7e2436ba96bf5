//! Ready list, all-tasks list, pid pool, and the scheduler loop itself
//! (spec §4.3 C6, §4.5 C8).
//!
//! Priority round-robin: the ready list is plain FIFO order for threads
//! that used up their slice, but a thread leaving a wait (`unblock_one`/
//! `unblock_all`) gets requeued at the *head* instead of the tail — the
//! priority boost spec §4.3 calls for, implemented with `IndexList`'s
//! `push_front` vs `append` exactly as `original_source/thread/thread.c`'s
//! `thread_unblock` inserts at `list_push_front(&ready_list, ...)` while
//! `schedule()`'s voluntary-yield path uses `list_push_back`.
//!
//! There is one CPU, so there is exactly one scheduler context to switch
//! through: a thread gives up the CPU by switching into the scheduler's own
//! saved context (not straight into the next thread), and the scheduler
//! loop running in that context picks the next ready PCB and switches
//! straight into it — the same two-context shape as
//! `kaist-cp-rv6/kernel-rs/src/proc.rs`'s `Cpu::context` / `ProcGuard::sched`,
//! minus the per-hart array. The global PCB-table lock is always released
//! before the actual `context_switch` call, on both sides: whichever
//! function resumes next re-acquires it itself rather than inheriting it
//! across the switch, since there is only one lock instance, not one per
//! process, and the scheduler loop needs to be able to take it too.

use array_macro::array;
use arrayvec::ArrayVec;

use crate::errno::{KernelError, KResult};
use crate::list::IndexList;
use crate::lock::{SpinLock, SpinLockGuard};
use crate::mm::PAGE_SIZE;
use crate::param::{DEFAULT_PRIORITY, INIT_PID, NPROC, STACK_MAGIC};

use super::pcb::{Context, Pid, Proc, ProcState};

extern "C" {
    /// Saves the caller's callee-saved registers into `old`, then restores
    /// the registers saved in `new` and resumes execution there. Owned by
    /// the boot collaborator's assembly (spec §1), the same role
    /// `kaist-cp-rv6/kernel-rs/src/proc.rs`'s `extern "C" fn swtch` plays.
    fn context_switch(old: *mut Context, new: *mut Context);

    /// Builds the CPU trap frame from the calling thread's own
    /// `Proc::user_entry` and `iret`s into user mode. Owned by the
    /// trap-entry assembly (spec §1, the same external role `UserEntry`'s
    /// doc comment describes). Every thread resuming from an ordinary
    /// block unwinds back out through its own original trap-entry stack
    /// frame to reach this; a fork child has no such frame yet, so
    /// `fork_trampoline` jumps here directly (spec §4.5).
    fn trap_return() -> !;
}

struct SchedState {
    procs: [Proc; NPROC],
    ready: IndexList<NPROC>,
    all: IndexList<NPROC>,
    current: Option<usize>,
    scheduler_context: Context,
    /// Slot of the idle thread (spec §4.3: "always in the blocked pool and
    /// unblocked only when the ready list is empty"). Never linked into
    /// `ready` itself — `scheduler()` dispatches it directly as a fallback
    /// instead of popping it off the front like any other thread.
    idle_slot: Option<usize>,
}

impl SchedState {
    const fn new() -> Self {
        Self {
            procs: array![_ => Proc::empty(); NPROC],
            ready: IndexList::new(),
            all: IndexList::new(),
            current: None,
            scheduler_context: Context {
                edi: 0,
                esi: 0,
                ebx: 0,
                ebp: 0,
                esp: 0,
                eip: 0,
            },
            idle_slot: None,
        }
    }

    /// Linear scan for an `Unused` slot, the way a fixed `task[NR_TASKS]`
    /// array is searched in the original kernel — `NPROC` is small enough
    /// (spec §4.3) that this need not be faster than O(n).
    fn alloc_slot(&mut self) -> Option<usize> {
        self.procs.iter().position(|p| p.state == ProcState::Unused)
    }
}

static SCHED: SpinLock<SchedState> = SpinLock::new("sched", SchedState::new());
static CHILD_EXIT_WAITERS: SpinLock<IndexList<NPROC>> = SpinLock::new("child-exit", IndexList::new());

/// Allocates one kernel frame as a fresh kernel-thread stack, page-aligned,
/// with the stack-overflow sentinel (spec §3, §5) written at the top word
/// of the page. Returns the virtual address one past the last usable byte
/// (the PCB's "saved kernel-stack top", spec §3).
fn alloc_kstack() -> KResult<usize> {
    let frame = crate::kernel::kernel()
        .kernel_pool
        .lock()
        .palloc()
        .ok_or(KernelError::OutOfMemory)?;
    let top = crate::mm::p2v(frame) + PAGE_SIZE;
    // SAFETY: `frame` was just allocated and is mapped 1:1 at `p2v(frame)`.
    unsafe { core::ptr::write((top - 4) as *mut u32, STACK_MAGIC) };
    Ok(top)
}

/// Returns a kernel-thread stack `alloc_kstack` handed out back to the
/// kernel frame pool.
fn free_kstack(top: usize) {
    let frame = crate::mm::v2p(top - PAGE_SIZE);
    crate::kernel::kernel().kernel_pool.lock().pfree(frame);
}

/// Allocates a kernel stack and PCB slot for a new kernel thread and writes
/// the synthetic switch frame spec §4.3 describes: `Context::eip` points at
/// `thread_bootstrap`, which "enables interrupts and calls `entry(arg)`"
/// the first time this slot is ever scheduled. Leaves the new slot in
/// `ProcState::Embryo`, linked only into the all-tasks list — callers
/// finish the job by moving it into `Ready` (`spawn`) or `Blocked`
/// (`spawn_idle`) themselves, since the two boot threads need different
/// final states.
fn create_kernel_thread(name: &str, priority: i32, entry: fn(usize), arg: usize) -> KResult<usize> {
    let kstack = alloc_kstack()?;
    let pid = match super::pid::allocate() {
        Some(pid) => pid,
        None => {
            free_kstack(kstack);
            return Err(KernelError::OutOfMemory);
        }
    };
    unsafe { crate::lock::push_off() };
    let result = (|| {
        let mut guard = SCHED.lock();
        let slot = guard.alloc_slot().ok_or(KernelError::OutOfMemory)?;
        let proc = &mut guard.procs[slot];
        proc.pid = pid;
        proc.parent = None;
        proc.set_name(name);
        proc.priority = priority.max(1);
        proc.ticks_remaining = proc.priority;
        proc.kstack = kstack;
        proc.kernel_entry = Some(entry);
        proc.kernel_arg = arg;
        proc.context = Context {
            edi: 0,
            esi: 0,
            ebx: 0,
            ebp: 0,
            esp: (kstack - 4) as u32,
            eip: thread_bootstrap as usize as u32,
        };
        proc.state = ProcState::Embryo;
        guard.all.append(slot as u32);
        Ok(slot)
    })();
    unsafe { crate::lock::pop_off() };
    if result.is_err() {
        super::pid::release(pid);
        free_kstack(kstack);
    }
    result
}

/// Spawns a new kernel thread and links it onto the tail of the ready list
/// (spec §4.3 "a new thread is created by allocating ... the PCB ... and
/// writing a synthetic switch frame"). `entry` runs with interrupts enabled
/// and no address space (`pgdir` stays the default, never installed —
/// spec §3 "pgdir null for pure kernel threads"); if it returns, the thread
/// exits with status 0.
pub fn spawn(name: &str, priority: i32, entry: fn(usize), arg: usize) -> KResult<Pid> {
    let slot = create_kernel_thread(name, priority, entry, arg)?;
    unsafe { crate::lock::push_off() };
    let mut guard = SCHED.lock();
    let pid = guard.procs[slot].pid;
    // Parented to `init` (except `init` itself) so a kernel thread whose
    // `entry` returns gets reaped by `init_thread_entry`'s wait loop instead
    // of sitting as an unreaped zombie forever — the same reparenting target
    // `exit` uses for orphaned children (spec §4.5).
    guard.procs[slot].parent = if pid == INIT_PID { None } else { Some(INIT_PID) };
    guard.procs[slot].state = ProcState::Ready;
    guard.ready.append(slot as u32);
    unsafe { crate::lock::pop_off() };
    Ok(pid)
}

/// Creates the idle thread and records its slot, but never links it into
/// the ready list: spec §4.3 "the idle thread runs ... always in the
/// blocked pool and unblocked only when the ready list is empty" —
/// `scheduler()` dispatches it directly as a fallback rather than through
/// the normal ready-list pop.
fn spawn_idle() -> KResult<()> {
    let slot = create_kernel_thread("idle", 1, idle_entry, 0)?;
    unsafe { crate::lock::push_off() };
    let mut guard = SCHED.lock();
    guard.procs[slot].state = ProcState::Blocked;
    guard.idle_slot = Some(slot);
    unsafe { crate::lock::pop_off() };
    Ok(())
}

/// The idle thread's body (spec §4.3 "HLT loop"): halts until the next
/// interrupt, then hands the CPU back to the scheduler via `tick`'s
/// idle-specific yield path (`yield_idle`) instead of the normal ready-list
/// requeue, since idle never sits on the ready list itself.
fn idle_entry(_arg: usize) {
    loop {
        unsafe { super::arch::hlt() };
    }
}

/// The `init` thread's body (spec §4.5 "reparent surviving children to
/// init (PID 1)"): reaps whatever `exit` reparents onto it, forever, so
/// zombies whose original parent is long gone do not pile up unreaped.
fn init_thread_entry(_arg: usize) {
    loop {
        if wait().is_err() {
            // No children at all right now; give someone else a turn
            // instead of spinning this thread's whole slice away.
            yield_current();
        }
    }
}

/// Boot-time setup: creates the three boot kernel threads spec §8 scenario
/// E expects `ps` to list before anything else is spawned — `init` (claims
/// pid 1 == `INIT_PID`, the always-present reaper `wait`/`exit` reparent
/// orphans onto), `idle` (the HLT-loop fallback thread), and `main` (the
/// boot CPU's own currently-executing context, continuing as `init_all`'s
/// caller once this returns).
///
/// # Safety
/// Must run exactly once, before interrupts are enabled.
pub unsafe fn init() {
    // `init` first, so it claims pid 1: the pid pool is sequential and
    // nothing else has run yet.
    let init_pid = spawn("init", DEFAULT_PRIORITY, init_thread_entry, 0)
        .expect("init: failed to create the init thread");
    debug_assert_eq!(init_pid, INIT_PID, "init: init thread did not claim pid 1");

    spawn_idle().expect("init: failed to create the idle thread");

    // `main` is the boot CPU's own currently-executing context, not a
    // synthetic switch frame — allocated before the PCB-table lock is
    // taken, the same ordering reason `fork`/`wait` allocate pids outside
    // `SCHED`'s lock (the pid pool's mutex itself reads `current_pid`).
    let pid = super::pid::allocate().expect("init: pid pool exhausted");
    let mut guard = SCHED.lock();
    let slot = guard.alloc_slot().expect("init: PCB table unexpectedly full");
    let proc = &mut guard.procs[slot];
    proc.pid = pid;
    proc.parent = None;
    proc.state = ProcState::Running;
    proc.priority = DEFAULT_PRIORITY;
    proc.ticks_remaining = DEFAULT_PRIORITY;
    proc.set_name("main");
    guard.all.append(slot as u32);
    guard.current = Some(slot);
}

/// A freshly spawned kernel thread's very first code (spec §4.3: "a
/// bootstrap that enables interrupts and calls `entry(arg)`"). Reached only
/// through the synthetic switch frame `create_kernel_thread` installs in
/// `Context::eip` — there is no real caller to return to, so this never
/// returns; if `entry` itself returns, the thread exits with status 0.
unsafe extern "C" fn thread_bootstrap() -> ! {
    super::arch_sti();
    let (entry, arg) = with_current(|p| (p.kernel_entry.take(), p.kernel_arg));
    if let Some(entry) = entry {
        entry(arg);
    }
    exit(0)
}

/// A fork child's very first scheduling switches here (spec §4.5: "child's
/// saved context is rewritten so it returns into user space"). A thread
/// resuming from an ordinary block unwinds back out through its own
/// original trap-entry stack frame to reach `trap_return`; a fork child has
/// no such frame — `fork` only copies register-level state
/// (`Proc::user_entry`), never the parent's live kernel stack — so this
/// jumps straight there.
unsafe extern "C" fn fork_trampoline() -> ! {
    trap_return()
}

pub fn current_pid() -> Pid {
    let guard = SCHED.lock();
    match guard.current {
        Some(slot) => guard.procs[slot].pid,
        None => 0,
    }
}

/// The calling thread's own PCB table slot, the index `IndexList<NPROC>`
/// waiter lists are threaded through (not its pid, which keeps growing past
/// `NPROC`).
pub fn current_slot() -> u32 {
    let guard = SCHED.lock();
    guard.current.expect("current_slot: no current thread") as u32
}

/// # Safety
/// Caller already holds interrupts disabled and has linked the current
/// thread's slot into `waiters`.
pub unsafe fn block_current(waiters: &mut IndexList<NPROC>) {
    let mut guard = SCHED.lock();
    let slot = guard.current.expect("block_current: no current thread");
    debug_assert!(waiters.contains(slot as u32), "block_current: not linked into waiters");
    guard.procs[slot].state = ProcState::Blocked;
    switch_to_scheduler(guard);
}

pub fn unblock_one(waiters: &mut IndexList<NPROC>) -> bool {
    let mut guard = SCHED.lock();
    match waiters.pop_front() {
        Some(slot) => {
            guard.procs[slot as usize].state = ProcState::Ready;
            guard.ready.push_front(slot);
            true
        }
        None => false,
    }
}

pub fn unblock_all(waiters: &mut IndexList<NPROC>) {
    let mut guard = SCHED.lock();
    while let Some(slot) = waiters.pop_front() {
        guard.procs[slot as usize].state = ProcState::Ready;
        guard.ready.push_front(slot);
    }
}

/// Voluntary yield: requeue the current thread at the *tail* of the ready
/// list (no priority boost — it already had its turn) and let the
/// scheduler pick someone else.
pub fn yield_current() {
    // SAFETY: matched by the pop_off below.
    unsafe { crate::lock::push_off() };
    {
        let mut guard = SCHED.lock();
        let slot = guard.current.expect("yield_current: no current thread");
        guard.procs[slot].state = ProcState::Ready;
        guard.ready.append(slot as u32);
        unsafe { switch_to_scheduler(guard) };
    }
    unsafe { crate::lock::pop_off() };
}

/// Timer-tick hook (spec §9(i)): decrement the running thread's remaining
/// slice and request a yield once it hits zero. Must count *down*; counting
/// up and comparing against a quantum constant the way an easy first draft
/// might is the bug spec §9(i) flags — that comparison can end up never
/// true depending on which side of the quantum the reset value lands on, so
/// a thread runs forever. Storing the remaining count directly and stopping
/// at zero sidesteps the question.
///
/// # Safety
/// Called from the timer ISR with interrupts already off.
pub unsafe fn tick() {
    let (should_yield, is_idle) = {
        let mut guard = SCHED.lock();
        match guard.current {
            Some(slot) => {
                let is_idle = guard.idle_slot == Some(slot);
                let proc = &mut guard.procs[slot];
                proc.ticks_remaining -= 1;
                (proc.ticks_remaining <= 0, is_idle)
            }
            None => (false, false),
        }
    };
    if should_yield {
        if is_idle {
            yield_idle();
        } else {
            yield_current();
        }
    }
}

/// Timer-slice expiry for the idle thread: hand the CPU back to the
/// scheduler without ever touching the ready list. Unlike `yield_current`,
/// idle's state goes back to `Blocked` rather than `Ready` — spec §4.3
/// requires idle stay off the ready list and be dispatched only as
/// `scheduler`'s empty-ready-list fallback.
fn yield_idle() {
    unsafe { crate::lock::push_off() };
    {
        let mut guard = SCHED.lock();
        let slot = guard.current.expect("yield_idle: no current thread");
        guard.procs[slot].state = ProcState::Blocked;
        unsafe { switch_to_scheduler(guard) };
    }
    unsafe { crate::lock::pop_off() };
}

/// The real scheduler loop. Runs forever in its own context, picking the
/// next `Ready` thread off the head of the ready list (FIFO, with waiters
/// boosted to the head on unblock, spec §4.3) and switching straight into
/// it. A thread gives the CPU back by switching into the scheduler's own
/// saved context, which resumes this loop right where it left off.
///
/// # Safety
/// Must run on the boot stack, with interrupts initially enabled by the
/// caller once the ready list has at least one thread in it.
pub unsafe fn scheduler() -> ! {
    loop {
        let next_slot = {
            let mut guard = SCHED.lock();
            guard.ready.pop_front().map(|s| s as usize).or(guard.idle_slot)
        };
        let Some(slot) = next_slot else {
            // Idle thread not spawned yet (very early boot, before `init`
            // finishes): briefly allow interrupts so the timer or keyboard
            // ISR can make a thread ready.
            crate::lock::push_off();
            crate::lock::pop_off();
            continue;
        };
        let (proc_ctx, sched_ctx): (*mut Context, *mut Context) = {
            let mut guard = SCHED.lock();
            // Spec §5: every context switch checks the stack sentinel before
            // resuming a thread and panics if it's been overwritten.
            guard.procs[slot].check_stack_magic();
            guard.current = Some(slot);
            guard.procs[slot].state = ProcState::Running;
            guard.procs[slot].ticks_remaining = guard.procs[slot].priority.max(1);
            (
                &mut guard.procs[slot].context as *mut Context,
                &mut guard.scheduler_context as *mut Context,
            )
        };
        context_switch(sched_ctx, proc_ctx);
        // The thread just handed the CPU back; check its stack is still
        // intact after whatever it did while running.
        SCHED.lock().procs[slot].check_stack_magic();
    }
}

/// `fork`: clone the calling process into a new PCB slot — address space,
/// fd table, cwd, and priority all inherited — and link it into the ready
/// list as a new child (spec §4.5). Returns the child's pid to the parent;
/// the child itself observes a return value of 0 once it next runs, via
/// `user_entry.eax` (spec §4.5 "returns into user space with register
/// EAX=0").
///
/// Any failure past the fd-dup step unwinds everything already done (dropped
/// fd references, freed address space, released slot) and returns the error,
/// the same fail-clean contract `mm::paging::malloc_page` keeps.
pub fn fork() -> crate::errno::KResult<Pid> {
    unsafe { crate::lock::push_off() };
    let claim = (|| {
        let mut guard = SCHED.lock();
        let parent_slot = guard.current.expect("fork: no current thread");
        let child_slot = guard.alloc_slot().ok_or(crate::errno::KernelError::OutOfMemory)?;
        // Mark the slot non-Unused immediately so the pid allocation below
        // (done outside this lock) cannot race another fork() into
        // claiming the same slot.
        guard.procs[child_slot].state = ProcState::Embryo;
        let parent_pid = guard.procs[parent_slot].pid;
        let parent_name = guard.procs[parent_slot].name;
        let parent_fds = guard.procs[parent_slot].fd_table;
        let parent_cwd = guard.procs[parent_slot].cwd;
        let parent_priority = guard.procs[parent_slot].priority;
        let parent_entry = guard.procs[parent_slot].user_entry;
        Ok((parent_slot, child_slot, parent_pid, parent_name, parent_fds, parent_cwd, parent_priority, parent_entry))
    })();
    unsafe { crate::lock::pop_off() };
    let (parent_slot, child_slot, parent_pid, parent_name, parent_fds, parent_cwd, parent_priority, parent_entry) =
        claim?;

    // Duplicate every inherited fd's open-file-table reference (spec §4.5
    // "FD table is duplicated"); the child's local table will point at these
    // very same global slots, not fresh ones.
    for fd in parent_fds.iter().flatten() {
        let _ = crate::fs::ofile::dup(*fd as usize);
    }

    let unwind_fds = || {
        for fd in parent_fds.iter().flatten() {
            if let Ok(Some(file)) = crate::fs::ofile::dec_ref(*fd as usize) {
                crate::fs::ofile::close(file);
            }
        }
    };
    let release_slot = || unsafe {
        crate::lock::push_off();
        let mut guard = SCHED.lock();
        let kstack = guard.procs[child_slot].kstack;
        guard.procs[child_slot].reset();
        drop(guard);
        crate::lock::pop_off();
        if kstack != 0 {
            free_kstack(kstack);
        }
    };

    // The child needs its own kernel stack: it never returns out of
    // `fork()` the way the parent does, it starts fresh at
    // `fork_trampoline` (spec §4.5).
    let kstack = match alloc_kstack() {
        Ok(kstack) => kstack,
        Err(e) => {
            unwind_fds();
            release_slot();
            return Err(e);
        }
    };

    // The actual frame-by-frame copy runs without `SCHED` held: it is the
    // most expensive part of fork and nothing else may mutate the parent's
    // own address space while the parent itself is the one calling fork.
    let parent_space_ptr = unsafe {
        crate::lock::push_off();
        let guard = SCHED.lock();
        let ptr = &guard.procs[parent_slot].address_space as *const crate::mm::AddressSpace;
        drop(guard);
        crate::lock::pop_off();
        ptr
    };
    let address_space = match crate::mm::fork_address_space(unsafe { &*parent_space_ptr }) {
        Ok(space) => space,
        Err(e) => {
            free_kstack(kstack);
            unwind_fds();
            release_slot();
            return Err(e);
        }
    };

    let pid = match super::pid::allocate() {
        Some(pid) => pid,
        None => {
            let mut space = address_space;
            crate::mm::free_address_space(&mut space);
            free_kstack(kstack);
            unwind_fds();
            release_slot();
            return Err(crate::errno::KernelError::OutOfMemory);
        }
    };

    unsafe { crate::lock::push_off() };
    {
        let mut guard = SCHED.lock();
        let child = &mut guard.procs[child_slot];
        child.pid = pid;
        child.parent = Some(parent_pid);
        child.name = parent_name;
        child.fd_table = parent_fds;
        child.cwd = parent_cwd;
        child.priority = parent_priority;
        child.address_space = address_space;
        child.user_entry = parent_entry;
        child.user_entry.eax = 0;
        child.kstack = kstack;
        // The child's very first switch-in runs `fork_trampoline`, which
        // jumps straight to `trap_return` to enter user mode for the first
        // time (spec §4.5) — it never executes a plain `ret` back into
        // `fork()`'s own call stack the way the parent does.
        child.context = Context {
            edi: 0,
            esi: 0,
            ebx: 0,
            ebp: 0,
            esp: (kstack - 4) as u32,
            eip: fork_trampoline as usize as u32,
        };

        guard.all.append(child_slot as u32);
        guard.procs[child_slot].state = ProcState::Ready;
        guard.ready.append(child_slot as u32);
    }
    unsafe { crate::lock::pop_off() };
    Ok(pid)
}

/// `wait`: block until some child of the calling process exits, then
/// return its pid and exit code and free its slot (spec §4.5). Returns
/// `NoChildren` if the calling process has none.
pub fn wait() -> crate::errno::KResult<(Pid, i32)> {
    loop {
        unsafe { crate::lock::push_off() };
        let outcome = {
            let mut guard = SCHED.lock();
            let me = guard.procs[guard.current.expect("wait: no current thread")].pid;
            let mut found_child = false;
            let mut zombie = None;
            for slot in 0..NPROC {
                if guard.procs[slot].parent == Some(me) {
                    found_child = true;
                    if guard.procs[slot].state == ProcState::Zombie {
                        zombie = Some(slot);
                        break;
                    }
                }
            }
            if let Some(slot) = zombie {
                let pid = guard.procs[slot].pid;
                let code = guard.procs[slot].exit_code;
                let kstack = guard.procs[slot].kstack;
                guard.procs[slot].reset();
                guard.all.remove(slot as u32);
                Some(Ok((pid, code, kstack)))
            } else if !found_child {
                Some(Err(crate::errno::KernelError::NoChildren))
            } else {
                None
            }
        };
        match outcome {
            Some(Ok((pid, code, kstack))) => {
                unsafe { crate::lock::pop_off() };
                // Released after the PCB-table lock is dropped, for the same
                // reason `fork`/`init` allocate outside it: the pid pool's
                // mutex reads `current_pid()`, which takes `SCHED` itself.
                super::pid::release(pid);
                if kstack != 0 {
                    free_kstack(kstack);
                }
                return Ok((pid, code));
            }
            Some(Err(e)) => {
                unsafe { crate::lock::pop_off() };
                return Err(e);
            }
            None => {
                // Block on the global child-exit wait point: any `exit`
                // wakes every waiter, each of which re-checks its own
                // children (there is no per-parent wait list, matching
                // `original_source/thread/wait_exit.c`'s all-tasks scan).
                let mut guard = SCHED.lock();
                let slot = guard.current.expect("wait: no current thread");
                guard.procs[slot].state = ProcState::Blocked;
                CHILD_EXIT_WAITERS.lock().append(slot as u32);
                unsafe { switch_to_scheduler(guard) };
                unsafe { crate::lock::pop_off() };
            }
        }
    }
}

/// `exit`: tear down the calling thread's address space and fd references,
/// record the exit code, reparent children to the init thread, wake every
/// thread blocked in `wait`, and never return (spec §4.5).
///
/// # Safety
/// Never returns.
pub unsafe fn exit(status: i32) -> ! {
    crate::lock::push_off();
    let slot = SCHED.lock().current.expect("exit: no current thread");

    // Free the user half of this process's address space before anything
    // else: nothing but this exiting thread ever touches its own
    // `address_space`, so it is safe to drop `SCHED`'s lock for the actual
    // frame-freeing work, the same way `fork` does for the copy.
    {
        let mut guard = SCHED.lock();
        let space_ptr = &mut guard.procs[slot].address_space as *mut crate::mm::AddressSpace;
        drop(guard);
        crate::mm::free_address_space(&mut *space_ptr);
    }

    let fds = SCHED.lock().procs[slot].fd_table;
    for fd in fds.iter().flatten() {
        if let Ok(Some(file)) = crate::fs::ofile::dec_ref(*fd as usize) {
            crate::fs::ofile::close(file);
        }
    }

    let mut guard = SCHED.lock();
    let exiting_pid = guard.procs[slot].pid;
    for other in 0..NPROC {
        if guard.procs[other].parent == Some(exiting_pid) {
            guard.procs[other].parent = Some(INIT_PID);
        }
    }
    guard.procs[slot].exit_code = status;
    guard.procs[slot].state = ProcState::Zombie;
    {
        let mut waiters = CHILD_EXIT_WAITERS.lock();
        while let Some(w) = waiters.pop_front() {
            guard.procs[w as usize].state = ProcState::Ready;
            guard.ready.push_front(w);
        }
    }
    switch_to_scheduler(guard);
    unreachable!("exit: an exited thread cannot be rescheduled");
}

/// Gives `f` access to the calling thread's own PCB — syscall handlers
/// reach their fd table, cwd, and address space this way (spec §4.5, §4.9)
/// rather than threading a `&mut Proc` through every call site.
///
/// `SCHED`'s lock is held only long enough to find the current slot, then
/// released before `f` runs. Nearly every syscall handler re-enters the
/// scheduler itself (`sys_getpid`, `fork`, `wait`, `exit`, `ps`, or any
/// blocking read/write via a semaphore), and `SpinLock` is not reentrant
/// (`lock/spinlock.rs`); holding the lock across `f` would deadlock the
/// single CPU on the very first nested `SCHED.lock()`. Safe to release
/// early because syscalls are serialized per thread (spec §5: "a thread
/// cannot run a second syscall until the first returns or blocks"), so
/// nothing else touches this slot while `f` runs.
pub fn with_current<R>(f: impl FnOnce(&mut Proc) -> R) -> R {
    let ptr: *mut Proc = {
        let guard = SCHED.lock();
        let slot = guard.current.expect("with_current: no current thread");
        &guard.procs[slot] as *const Proc as *mut Proc
    };
    // SAFETY: see above — the lock guarding this slot has already been
    // released, and no other thread can run this thread's slot concurrently.
    f(unsafe { &mut *ptr })
}

/// Gives `f` access to the PCB belonging to `pid`, if a live slot for it
/// still exists, while the scheduler table's lock is held. Used by syscalls
/// that reach a process other than the caller (e.g. `sys_kill`), unlike
/// `with_current` which only ever reaches the caller's own slot.
pub fn with_proc_by_pid<R>(pid: Pid, f: impl FnOnce(&mut Proc) -> R) -> Option<R> {
    let mut guard = SCHED.lock();
    let slot = (0..NPROC).find(|&s| {
        guard.procs[s].state != ProcState::Unused && guard.procs[s].pid == pid
    })?;
    Some(f(&mut guard.procs[slot]))
}

/// `sys_ps`'s backing data: a snapshot of every live task's pid, parent,
/// name, state, and remaining slice (spec §8 scenario E). Collected in two
/// passes — slot indices first, then fields per slot — so the closure never
/// holds two overlapping borrows of the same guard at once.
pub fn for_each_proc(mut f: impl FnMut(Pid, Option<Pid>, &str, ProcState, i32)) {
    let guard = SCHED.lock();
    let mut slots: ArrayVec<u32, NPROC> = ArrayVec::new();
    guard.all.traverse(|slot| {
        let _ = slots.try_push(slot);
        false
    });
    for slot in slots {
        let p = &guard.procs[slot as usize];
        f(p.pid, p.parent, p.name_as_str(), p.state, p.ticks_remaining);
    }
}

/// Hands the CPU to the scheduler loop and does not return until this
/// thread is chosen to run again. Releases `guard` before the actual
/// switch: only one `SCHED` lock instance exists, and the scheduler loop on
/// the other side needs to be able to take it too.
///
/// # Safety
/// Caller holds `guard` with interrupts disabled and has already recorded
/// why this thread is no longer runnable (blocked on a wait list, zombie,
/// etc).
unsafe fn switch_to_scheduler(mut guard: SpinLockGuard<'_, SchedState>) {
    let slot = guard.current.take().expect("switch_to_scheduler: no current thread");
    let proc_ctx = &mut guard.procs[slot].context as *mut Context;
    let sched_ctx = &mut guard.scheduler_context as *mut Context;
    drop(guard);
    context_switch(proc_ctx, sched_ctx);
    SCHED.lock().current = Some(slot);
}
