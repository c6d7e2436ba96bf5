//! The process control block (spec §3 "PCB", §4.3 C6).
//!
//! One `Proc` per table slot, `NPROC` slots total, allocated by linear scan
//! the way `original_source/thread/thread.c`'s static `struct task_struct
//! task[NR_TASKS]` array is, rather than the dynamically-sized arena
//! `kaist-cp-rv6`'s `RcPool`/`ArrayArena` machinery supports — this kernel
//! has no allocator available before `mm` is initialized, so the table has
//! to be `static` from boot.

use crate::fs::InodeId;
use crate::mm::AddressSpace;
use crate::param::{MAX_PROC_NAME, NOFILE, STACK_MAGIC};

pub type Pid = u32;

pub type OpenFileId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcState {
    Unused,
    Embryo,
    Ready,
    Running,
    Blocked,
    Zombie,
}

/// Callee-saved registers for the cooperative kernel-to-kernel context
/// switch done by `scheduler`'s `context_switch` (spec §4.3's "the
/// scheduler itself is just another saved context"). The switch routine
/// that saves/restores these is an external collaborator (spec §1) written
/// in assembly, the same role `kaist-cp-rv6/kernel-rs/src/proc.rs`'s
/// `extern "C" fn swtch` plays.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct Context {
    pub edi: u32,
    pub esi: u32,
    pub ebx: u32,
    pub ebp: u32,
    /// Kernel stack pointer to load before jumping to `eip`. Needed because,
    /// unlike a push/pop-at-a-known-stack-slot scheme, `Context` is plain
    /// data embedded in the `Proc` itself rather than a structure that lives
    /// on the stack being switched to — so the stack pointer has to be
    /// carried alongside the callee-saved registers explicitly, the same
    /// role `kaist-cp-rv6/kernel-rs/src/proc.rs`'s `Context::sp` plays.
    pub esp: u32,
    pub eip: u32,
}

/// The register values that matter at the user/kernel boundary: what `fork`
/// and `exec` need to overwrite before a process next enters or resumes user
/// mode (spec §4.5 fork "returns into user space with register EAX=0"; exec
/// "`EIP=e_entry`, `ESP=0xC0000000`, `EBX=argv`, `ECX=argc`"). This is the
/// narrow, typed contract between this crate and the trap-entry/`iret`
/// assembly that actually builds and restores the CPU's trap frame — that
/// assembly is an external collaborator (spec §1, §9 "context switch is
/// irreducibly architectural"), the same boundary `Context` draws for
/// `context_switch` itself, confirmed against
/// `original_source/userprog/exec.c`'s `intr_stack` assignment
/// (`ebx = argv; ecx = argc; eip = entry_point; esp = 0xc0000000`).
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct UserEntry {
    pub eip: u32,
    pub esp: u32,
    pub eax: u32,
    pub ebx: u32,
    pub ecx: u32,
}

/// One process (spec calls this kernel's schedulable unit a thread/process
/// interchangeably, §3). A slot with `state == Unused` is free for `fork`
/// to claim.
pub struct Proc {
    pub pid: Pid,
    pub parent: Option<Pid>,
    pub state: ProcState,
    pub name: [u8; MAX_PROC_NAME],
    pub priority: i32,
    pub ticks_remaining: i32,
    pub exit_code: i32,
    pub context: Context,
    /// Virtual address of the top of this thread's kernel stack page, or 0
    /// for a thread (only ever the boot thread) that runs on the raw boot
    /// stack instead of a page `thread_create` allocated (spec §3 PCB
    /// "saved kernel-stack top"). Doubles as where the stack-overflow
    /// sentinel (spec §5) is written and checked: the top word of the page.
    pub kstack: usize,
    /// Function a freshly spawned kernel thread's bootstrap trampoline
    /// calls once interrupts are back on (spec §4.3: "calls `entry(arg)`").
    /// Consumed once by `thread_bootstrap` and left `None` afterwards; a
    /// user process resuming from a blocked syscall never reads this.
    pub kernel_entry: Option<fn(usize)>,
    pub kernel_arg: usize,
    pub address_space: AddressSpace,
    pub fd_table: [Option<OpenFileId>; NOFILE],
    pub cwd: Option<InodeId>,
    pub user_entry: UserEntry,
}

impl Proc {
    pub const fn empty() -> Self {
        Self {
            pid: 0,
            parent: None,
            state: ProcState::Unused,
            name: [0; MAX_PROC_NAME],
            priority: 0,
            ticks_remaining: 0,
            exit_code: 0,
            context: Context {
                edi: 0,
                esi: 0,
                ebx: 0,
                ebp: 0,
                esp: 0,
                eip: 0,
            },
            kstack: 0,
            kernel_entry: None,
            kernel_arg: 0,
            address_space: AddressSpace::new(),
            fd_table: [None; NOFILE],
            cwd: None,
            user_entry: UserEntry {
                eip: 0,
                esp: 0,
                eax: 0,
                ebx: 0,
                ecx: 0,
            },
        }
    }

    pub fn reset(&mut self) {
        self.pid = 0;
        self.parent = None;
        self.state = ProcState::Unused;
        self.name = [0; MAX_PROC_NAME];
        self.priority = 0;
        self.ticks_remaining = 0;
        self.exit_code = 0;
        self.context = Context::default();
        self.kstack = 0;
        self.kernel_entry = None;
        self.kernel_arg = 0;
        self.fd_table = [None; NOFILE];
        self.cwd = None;
        self.user_entry = UserEntry::default();
        // `address_space`'s frames were already returned to the pools by
        // `exit`/`kill`; the directory itself is left as-is and
        // reinitialized by whoever claims this slot next.
    }

    pub fn name_as_str(&self) -> &str {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(self.name.len());
        core::str::from_utf8(&self.name[..len]).unwrap_or("?")
    }

    pub fn set_name(&mut self, name: &str) {
        let bytes = name.as_bytes();
        let len = bytes.len().min(self.name.len() - 1);
        self.name[..len].copy_from_slice(&bytes[..len]);
        self.name[len] = 0;
    }

    /// Checks the sentinel `proc::sched::create_kernel_thread` wrote at the
    /// top of this thread's kernel stack page (spec §3 "integrity:
    /// stack_magic", §5 "every context switch checks the stack sentinel ...
    /// and panics if corrupted"). A thread with `kstack == 0` runs on the
    /// real boot stack instead of a page this crate allocated (only ever
    /// the boot/`main` thread) and has nothing of ours to check.
    pub fn check_stack_magic(&self) {
        if self.kstack == 0 {
            return;
        }
        // SAFETY: `kstack` is the top of a page this thread's creator
        // allocated and wrote the sentinel into; the word at `kstack - 4`
        // is always mapped for as long as the thread is alive.
        let sentinel = unsafe { core::ptr::read((self.kstack - 4) as *const u32) };
        if sentinel != STACK_MAGIC {
            panic!("kernel stack overflow: pid {} ({})", self.pid, self.name_as_str());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boot_thread_with_no_kstack_skips_the_check() {
        let proc = Proc::empty();
        assert_eq!(proc.kstack, 0);
        proc.check_stack_magic();
    }

    #[test]
    fn set_name_truncates_and_nul_terminates() {
        let mut proc = Proc::empty();
        proc.set_name("init");
        assert_eq!(proc.name_as_str(), "init");
    }
}
