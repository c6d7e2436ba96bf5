//! Program loading (spec §4.5 C8 "Exec").
//!
//! Loads a 32-bit ELF directly into the calling process's own current
//! address space — there is no build-then-swap staging area. A page already
//! mapped from whatever the process ran before is reused and overwritten in
//! place; a page not yet backed gets a fresh, zeroed user frame, matching
//! `original_source/userprog/exec.c`'s `segment_load`: the page
//! directory/table entry is only populated if it isn't already present,
//! otherwise the existing physical page is written over directly.
//!
//! `argv`/`argc` are passed straight through to `EBX`/`ECX` rather than
//! rebuilt on a fresh stack: the caller's `argv` array already lives in its
//! own user stack, laid out by whatever convention put it there before
//! calling `execv`, and `original_source/userprog/exec.c`'s `sys_execv` sets
//! `ebx = argv` directly and resets `esp` to the fixed top of user space
//! (`0xc0000000`) rather than computing a new stack pointer around it.

use crate::elf::{ElfHdr, ProgHdr, ELF_HDR_SIZE, PROG_HDR_SIZE, PT_LOAD};
use crate::errno::{KernelError, KResult};
use crate::fs::dir::FileType;
use crate::fs::path::search_file;
use crate::fs::{InodeHandle, Partition};
use crate::kernel::kernel;
use crate::mm::frame::PAGE_SIZE;
use crate::mm::paging::Table;
use crate::param::{SECTOR_SIZE, USER_STACK_TOP};
use crate::proc::pcb::Proc;
use zerocopy::FromBytes;

/// Loads `path` into `proc`'s current address space and, on success,
/// overwrites `proc.user_entry` so the next resume into user mode enters the
/// new program (spec §4.5 "Exec"). Leaves `proc` untouched on failure —
/// matching `original_source/userprog/exec.c`: a failed `execv` returns an
/// error to the very call site that made it, the calling program is still
/// intact and keeps running.
pub fn exec(proc: &mut Proc, fs: &Partition, path: &str, argv_uaddr: u32, argc: u32) -> KResult<()> {
    let cwd = proc.cwd.unwrap_or_else(|| fs.root_ino());
    let record = search_file(fs, path, cwd)?;
    let (ino, file_type) = record.found.ok_or(KernelError::NoSuchFile)?;
    if file_type != FileType::Regular {
        return Err(KernelError::IsADirectory);
    }

    let handle = fs.open_inode(ino)?;
    let entry = load(proc, fs, handle);
    fs.close_inode(handle);
    let entry = entry?;

    proc.set_name(basename(path));
    proc.user_entry.eip = entry;
    proc.user_entry.esp = USER_STACK_TOP as u32;
    proc.user_entry.ebx = argv_uaddr;
    proc.user_entry.ecx = argc;
    Ok(())
}

fn basename(path: &str) -> &str {
    path.trim_end_matches('/').rsplit('/').next().unwrap_or(path)
}

/// Reads the ELF header and every `PT_LOAD` program header, mapping each one
/// into `proc`'s address space (spec §4.5 steps 1-2, §6 validation rules).
/// Returns the validated entry point.
fn load(proc: &mut Proc, fs: &Partition, handle: InodeHandle) -> KResult<u32> {
    let mut hdr_bytes = [0u8; ELF_HDR_SIZE];
    read_exact(fs, handle, 0, &mut hdr_bytes)?;
    let hdr = ElfHdr::read_from(&hdr_bytes[..]).ok_or(KernelError::InvalidExecutable)?;
    if !hdr.validate() {
        return Err(KernelError::InvalidExecutable);
    }

    for i in 0..hdr.e_phnum {
        let off = hdr.e_phoff as usize + i as usize * PROG_HDR_SIZE;
        let mut ph_bytes = [0u8; PROG_HDR_SIZE];
        read_exact(fs, handle, off, &mut ph_bytes)?;
        let ph = ProgHdr::read_from(&ph_bytes[..]).ok_or(KernelError::InvalidExecutable)?;
        if ph.p_type == PT_LOAD {
            load_segment(proc, fs, handle, &ph)?;
        }
    }
    Ok(hdr.e_entry)
}

fn read_exact(fs: &Partition, handle: InodeHandle, pos: usize, buf: &mut [u8]) -> KResult<()> {
    let n = fs.file_read(handle, pos as u32, buf)?;
    if n != buf.len() {
        return Err(KernelError::InvalidExecutable);
    }
    Ok(())
}

/// Maps every page touching `[p_vaddr, p_vaddr + p_memsz)`, allocating a
/// fresh zeroed user frame for any page not already present (spec §4.5 step
/// 2), then copies `p_filesz` bytes of file content over the mapped range in
/// `SECTOR_SIZE` chunks — a page-sized stack buffer here would overrun this
/// kernel's one-page-per-process kernel stack (spec §4.3). Bytes beyond
/// `p_filesz`, up to `p_memsz`, are left zeroed: a segment's BSS tail.
fn load_segment(proc: &mut Proc, fs: &Partition, handle: InodeHandle, ph: &ProgHdr) -> KResult<()> {
    let k = kernel();
    let pgdir = &mut proc.address_space.pgdir as *mut Table;
    let first_page = (ph.p_vaddr as usize) & !(PAGE_SIZE - 1);
    let end = ph.p_vaddr as usize + ph.p_memsz as usize;

    let mut vaddr = first_page;
    while vaddr < end {
        let present = {
            let mut kpool = k.kernel_pool.lock();
            unsafe { crate::mm::is_present(pgdir, vaddr, &mut kpool) }
        };
        if !present {
            let mut user_pool = k.user_pool.lock();
            let frame = user_pool.palloc().ok_or(KernelError::OutOfMemory)?;
            unsafe {
                core::ptr::write_bytes(crate::mm::p2v(frame) as *mut u8, 0, PAGE_SIZE);
            }
            let result = {
                let mut kpool = k.kernel_pool.lock();
                unsafe { crate::mm::get_a_page(pgdir, vaddr, frame, true, &mut kpool) }
            };
            if let Err(e) = result {
                user_pool.pfree(frame);
                return Err(e);
            }
        }
        vaddr += PAGE_SIZE;
    }

    let mut buf = [0u8; SECTOR_SIZE];
    let mut done = 0usize;
    while done < ph.p_filesz as usize {
        let n = (ph.p_filesz as usize - done).min(buf.len());
        read_exact(fs, handle, ph.p_offset as usize + done, &mut buf[..n])?;
        let mut kpool = k.kernel_pool.lock();
        unsafe {
            crate::mm::copy_out(pgdir, ph.p_vaddr as usize + done, &buf[..n], &mut kpool)?;
        }
        done += n;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basename_strips_directory_and_trailing_slash() {
        assert_eq!(basename("/bin/sh"), "sh");
        assert_eq!(basename("sh"), "sh");
        assert_eq!(basename("/usr/bin/"), "bin");
    }
}
