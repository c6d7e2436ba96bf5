//! Syscall dispatch (spec §4.10 C13): a fixed-size table indexed by number,
//! up to four arguments passed in fixed registers by the user-space stub.
//! No argument validation happens here — every handler validates its own
//! arguments, the same split `kernel-rs/src/syscall.rs` draws between the
//! dispatcher and each `sys_*`.
//!
//! Building the actual CPU trap frame from an `int`/IRQ gate belongs to the
//! architecture-specific trap-entry assembly (spec §1's external
//! collaborators: "interrupt descriptor setup"); [`TrapFrame`] is the narrow
//! typed view that assembly hands this dispatcher, the same boundary
//! `proc::pcb::UserEntry` draws for the other direction (kernel handing
//! register values back to a process about to resume in user mode).

pub mod file;
pub mod proc;

use zerocopy::AsBytes;

use crate::errno::{KernelError, KResult};
use crate::kernel::kernel;
use crate::mm::paging::Table;
use crate::proc::pcb::Proc;
use crate::println;

/// Syscall numbers (spec §6's "numbers fixed per the shared header" — no
/// such header survives in `original_source`, so these are assigned in the
/// order the spec lists the syscall set, matching `param::NR_SYSCALLS`).
pub const SYS_GETPID: u32 = 0;
pub const SYS_WRITE: u32 = 1;
pub const SYS_READ: u32 = 2;
pub const SYS_OPEN: u32 = 3;
pub const SYS_CLOSE: u32 = 4;
pub const SYS_LSEEK: u32 = 5;
pub const SYS_UNLINK: u32 = 6;
pub const SYS_MKDIR: u32 = 7;
pub const SYS_RMDIR: u32 = 8;
pub const SYS_STAT: u32 = 9;
pub const SYS_CHDIR: u32 = 10;
pub const SYS_GETCWD: u32 = 11;
pub const SYS_OPENDIR: u32 = 12;
pub const SYS_CLOSEDIR: u32 = 13;
pub const SYS_READDIR: u32 = 14;
pub const SYS_REWINDDIR: u32 = 15;
pub const SYS_FORK: u32 = 16;
pub const SYS_EXIT: u32 = 17;
pub const SYS_WAIT: u32 = 18;
pub const SYS_EXECV: u32 = 19;
pub const SYS_PIPE: u32 = 20;
pub const SYS_PUTCHAR: u32 = 21;
pub const SYS_PS: u32 = 22;
pub const SYS_HELP: u32 = 23;
pub const SYS_MALLOC: u32 = 24;
pub const SYS_FREE: u32 = 25;

/// The register values a syscall handler can see: `eax` carries the
/// syscall number in, the up to four arguments live in `ebx`/`ecx`/`edx`/
/// `esi` (spec §4.10 "up to four arguments... in fixed registers").
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct TrapFrame {
    pub eax: u32,
    pub ebx: u32,
    pub ecx: u32,
    pub edx: u32,
    pub esi: u32,
}

impl TrapFrame {
    fn arg(&self, n: usize) -> u32 {
        match n {
            0 => self.ebx,
            1 => self.ecx,
            2 => self.edx,
            3 => self.esi,
            _ => panic!("syscall argument index out of range: {n}"),
        }
    }
}

/// Invokes the handler named by `frame.eax` against the calling thread's own
/// PCB, and collapses its `KResult` down to the `-1`-on-error convention
/// (spec §7). `execv`'s success path is the one handler that, instead of
/// leaving a value here, has already overwritten `proc.user_entry` — the
/// trap-return assembly is expected to prefer that over this return value
/// when a pending `execv` is detected (spec §4.5 step 3: "Exec does not
/// return on success").
pub fn dispatch(frame: &TrapFrame) -> i32 {
    let result = crate::proc::with_current(|p| dispatch_for(p, frame));
    match result {
        Ok(v) => v as i32,
        Err(e) => e.to_syscall_ret(),
    }
}

fn dispatch_for(p: &mut Proc, frame: &TrapFrame) -> KResult<u32> {
    match frame.eax {
        SYS_GETPID => proc::sys_getpid(),
        SYS_WRITE => file::sys_write(p, frame),
        SYS_READ => file::sys_read(p, frame),
        SYS_OPEN => file::sys_open(p, frame),
        SYS_CLOSE => file::sys_close(p, frame),
        SYS_LSEEK => file::sys_lseek(p, frame),
        SYS_UNLINK => file::sys_unlink(p, frame),
        SYS_MKDIR => file::sys_mkdir(p, frame),
        SYS_RMDIR => file::sys_rmdir(p, frame),
        SYS_STAT => file::sys_stat(p, frame),
        SYS_CHDIR => file::sys_chdir(p, frame),
        SYS_GETCWD => file::sys_getcwd(p, frame),
        SYS_OPENDIR => file::sys_opendir(p, frame),
        SYS_CLOSEDIR => file::sys_closedir(p, frame),
        SYS_READDIR => file::sys_readdir(p, frame),
        SYS_REWINDDIR => file::sys_rewinddir(p, frame),
        SYS_FORK => proc::sys_fork(),
        SYS_EXIT => proc::sys_exit(frame),
        SYS_WAIT => proc::sys_wait(p, frame),
        SYS_EXECV => proc::sys_execv(p, frame),
        SYS_PIPE => file::sys_pipe(p, frame),
        SYS_PUTCHAR => proc::sys_putchar(frame),
        SYS_PS => proc::sys_ps(),
        SYS_HELP => proc::sys_help(),
        SYS_MALLOC => proc::sys_malloc(frame),
        SYS_FREE => proc::sys_free(frame),
        other => {
            println!("{} {}: unknown syscall {}", p.pid, p.name_as_str(), other);
            Err(KernelError::BadFd)
        }
    }
}

/// Fetch the nth syscall argument as a raw 32-bit value.
pub fn argint(frame: &TrapFrame, n: usize) -> KResult<i32> {
    Ok(frame.arg(n) as i32)
}

/// Fetch the nth syscall argument as a user virtual address. No legality
/// check here — `copy_in`/`copy_out`/`copy_in_str` perform that when the
/// address is actually dereferenced (spec §4.10 "no argument validation at
/// this layer").
pub fn argaddr(frame: &TrapFrame, n: usize) -> KResult<u32> {
    Ok(frame.arg(n))
}

/// Reads the `u32` at `uaddr` in `proc`'s own address space.
pub fn fetchaddr(proc: &mut Proc, uaddr: u32) -> KResult<u32> {
    let mut bytes = [0u8; 4];
    let pgdir = &mut proc.address_space.pgdir as *mut Table;
    let mut kpool = kernel().kernel_pool.lock();
    // SAFETY: `pgdir` belongs to the calling thread's own live address space.
    unsafe { crate::mm::copy_in(pgdir, uaddr as usize, &mut bytes, &mut kpool)? };
    Ok(u32::from_ne_bytes(bytes))
}

/// Reads the NUL-terminated string at `uaddr` into `buf`, returning the
/// portion read (without the NUL).
pub fn fetchstr<'a>(proc: &mut Proc, uaddr: u32, buf: &'a mut [u8]) -> KResult<&'a str> {
    let pgdir = &mut proc.address_space.pgdir as *mut Table;
    let mut kpool = kernel().kernel_pool.lock();
    // SAFETY: `pgdir` belongs to the calling thread's own live address space.
    let n = unsafe { crate::mm::copy_in_str(pgdir, uaddr as usize, buf, &mut kpool)? };
    core::str::from_utf8(&buf[..n]).map_err(|_| KernelError::BadPath)
}

/// Fetch the nth syscall argument as a user-space path string.
pub fn argstr<'a>(proc: &mut Proc, frame: &TrapFrame, n: usize, buf: &'a mut [u8]) -> KResult<&'a str> {
    let addr = argaddr(frame, n)?;
    fetchstr(proc, addr, buf)
}

/// Copies `src` into `proc`'s address space starting at `uaddr`.
pub fn copy_out_bytes(proc: &mut Proc, uaddr: u32, src: &[u8]) -> KResult<()> {
    let pgdir = &mut proc.address_space.pgdir as *mut Table;
    let mut kpool = kernel().kernel_pool.lock();
    // SAFETY: `pgdir` belongs to the calling thread's own live address space.
    unsafe { crate::mm::copy_out(pgdir, uaddr as usize, src, &mut kpool) }
}

/// Copies `dst.len()` bytes out of `proc`'s address space starting at `uaddr`.
pub fn copy_in_bytes(proc: &mut Proc, uaddr: u32, dst: &mut [u8]) -> KResult<()> {
    let pgdir = &mut proc.address_space.pgdir as *mut Table;
    let mut kpool = kernel().kernel_pool.lock();
    // SAFETY: `pgdir` belongs to the calling thread's own live address space.
    unsafe { crate::mm::copy_in(pgdir, uaddr as usize, dst, &mut kpool) }
}

/// Byte view of any `repr(C)`, `Copy` record this crate wants to hand back
/// to user space without a `zerocopy` derive of its own (spec §4.9
/// `sys_stat`).
///
/// # Safety
/// `T` must be `repr(C)` with no padding that carries uninitialized bytes
/// user space shouldn't see.
pub unsafe fn as_bytes<T: Copy>(value: &T) -> &[u8] {
    core::slice::from_raw_parts(value as *const T as *const u8, core::mem::size_of::<T>())
}

#[allow(unused_imports)]
use AsBytes as _;
