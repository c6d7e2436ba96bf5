//! Process, console, and heap syscalls (spec §4.9 C12, §6).
//!
//! `sys_fork`/`sys_wait`/`sys_exit`/`sys_execv` are thin wrappers over
//! `proc::sched`'s own fork/wait/exit and `exec::exec` — all the actual PCB
//! bookkeeping lives there, the same split `kernel-rs/src/syscall/proc.rs`
//! draws between `Kernel::sys_fork` and `ProcManager::fork`. `sys_malloc`/
//! `sys_free` are the one place a raw kernel pointer crosses the syscall
//! boundary as a plain integer rather than a user-space address: the spec's
//! heap is process-shared kernel memory, not per-process user memory (spec
//! §4.2's malloc/free pair).

use core::ptr::NonNull;

use crate::console;
use crate::errno::{KernelError, KResult};
use crate::exec;
use crate::kernel::kernel;
use crate::param::MAX_ARG;
use crate::proc::pcb::Proc;
use crate::proc::ProcState;
use crate::{println, proc};

use super::{argaddr, argint, argstr, copy_out_bytes, fetchaddr, TrapFrame};

pub fn sys_getpid() -> KResult<u32> {
    Ok(proc::current_pid())
}

pub fn sys_fork() -> KResult<u32> {
    proc::fork().map(|pid| pid as u32)
}

/// Never returns: `proc::exit` tears down the caller and switches away for
/// good (spec §4.5).
pub fn sys_exit(frame: &TrapFrame) -> KResult<u32> {
    let code = argint(frame, 0)?;
    unsafe { proc::exit(code) }
}

/// `wait(status*) -> pid`: blocks for a child to exit, writes its exit code
/// out to the caller's `status` pointer if non-null, and returns its pid
/// (spec §4.5, §6 `wait(status)`).
pub fn sys_wait(p: &mut Proc, frame: &TrapFrame) -> KResult<u32> {
    let status_uaddr = argaddr(frame, 0)?;
    let (pid, code) = proc::wait()?;
    if status_uaddr != 0 {
        copy_out_bytes(p, status_uaddr, &code.to_ne_bytes())?;
    }
    Ok(pid as u32)
}

/// `execv(path, argv, argc)` (spec §4.5 "Exec", §6). `argv` is left exactly
/// as the caller laid it out in its own user stack; only `argc` is counted
/// here, bounded by `MAX_ARG`, matching `original_source/userprog/exec.c`'s
/// `sys_execv` which trusts the caller's own argument count rather than
/// rediscovering it by walking `argv` for a NULL terminator.
pub fn sys_execv(p: &mut Proc, frame: &TrapFrame) -> KResult<u32> {
    let mut path_buf = [0u8; crate::param::MAX_PATH];
    let path = argstr(p, frame, 0, &mut path_buf)?;
    let argv_uaddr = argaddr(frame, 1)?;
    let argc = argint(frame, 2)? as u32;
    if argc as usize > MAX_ARG {
        return Err(KernelError::BadPath);
    }
    // Touch every argv slot up front so a bad pointer fails before any
    // address-space state has been overwritten (exec::exec leaves `p`
    // untouched on failure, and this keeps that true for a bad argv too).
    for i in 0..argc {
        fetchaddr(p, argv_uaddr + i * 4)?;
    }
    let fs = kernel().file_system()?;
    exec::exec(p, fs, path, argv_uaddr, argc)?;
    Ok(0)
}

pub fn sys_putchar(frame: &TrapFrame) -> KResult<u32> {
    let c = argint(frame, 0)? as u8;
    console::console_write(&[c]);
    Ok(0)
}

/// `ps`: dumps every live task's pid, parent, name, state, and remaining
/// slice to the console (spec §8 scenario E).
pub fn sys_ps() -> KResult<u32> {
    println!("PID  PPID  STATE     TICKS  NAME");
    proc::for_each_proc(|pid, parent, name, state, ticks| {
        let state_name = state_name(state);
        let ppid = parent.unwrap_or(0);
        println!("{:<4} {:<5} {:<9} {:<6} {}", pid, ppid, state_name, ticks, name);
    });
    Ok(0)
}

fn state_name(state: ProcState) -> &'static str {
    match state {
        ProcState::Unused => "unused",
        ProcState::Embryo => "embryo",
        ProcState::Ready => "ready",
        ProcState::Running => "running",
        ProcState::Blocked => "blocked",
        ProcState::Zombie => "zombie",
    }
}

/// `help`: lists the syscall set this kernel supports (spec §6).
pub fn sys_help() -> KResult<u32> {
    println!("available syscalls:");
    println!("  getpid write read open close lseek unlink mkdir rmdir stat");
    println!("  chdir getcwd opendir closedir readdir rewinddir");
    println!("  fork exit wait execv pipe putchar ps help malloc free");
    Ok(0)
}

/// `malloc(n) -> ptr`: grows the kernel heap on demand (spec §4.2). The
/// returned value is a raw kernel address, not a user virtual address — the
/// heap this syscall hands out blocks from is kernel-resident memory shared
/// across every process, matching `original_source/kernel/malloc.c`'s
/// single global heap.
pub fn sys_malloc(frame: &TrapFrame) -> KResult<u32> {
    let n = argint(frame, 0)? as usize;
    let ptr = kernel().kalloc(n)?;
    Ok(ptr.as_ptr() as u32)
}

/// `free(p)`: releases a block `malloc` previously returned (spec §6).
pub fn sys_free(frame: &TrapFrame) -> KResult<u32> {
    let addr = argaddr(frame, 0)?;
    let ptr = NonNull::new(addr as *mut u8).ok_or(KernelError::BadFd)?;
    // SAFETY: trusted to be a pointer this process previously got from
    // sys_malloc, matching the original kernel's unchecked free() contract.
    unsafe { kernel().kfree(ptr) };
    Ok(0)
}
