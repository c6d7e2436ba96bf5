//! File, path, and pipe syscalls (spec §4.9 C12, §6).
//!
//! Every handler validates its own arguments against the calling process's
//! own PCB (`p.fd_table`, `p.cwd`) and the one mounted partition, then turns
//! an `fs::Partition`/`fs::ofile`/`pipe` result straight into the
//! `KResult<u32>` `dispatch_for` expects. `sys_read`/`sys_write` never copy a
//! whole request onto the kernel stack at once: `read_chunk`/`write_chunk`
//! stage through a small fixed buffer the same way `exec::load_segment`
//! copies a loaded segment in `SECTOR_SIZE` pieces, since this kernel's
//! per-process kernel stack is one page (spec §4.3).

use zerocopy::AsBytes;

use crate::console;
use crate::errno::{KernelError, KResult};
use crate::fs::dir::FileType;
use crate::fs::ofile::{self, FileRef, OpenFlags};
use crate::fs::path::search_file;
use crate::fs::{dirstream, DirEntry, InodeId, Partition, Stat};
use crate::kernel::kernel;
use crate::param::{MAX_FILE_NAME, MAX_PATH, NOFILE};
use crate::pipe;
use crate::proc::pcb::{OpenFileId, Proc};

use super::{argaddr, argint, argstr, as_bytes, copy_in_bytes, copy_out_bytes, TrapFrame};

const IO_CHUNK: usize = 256;
const SEEK_SET: i32 = 0;
const SEEK_CUR: i32 = 1;
const SEEK_END: i32 = 2;

fn file_system() -> KResult<&'static Partition> {
    kernel().file_system()
}

fn cwd_of(p: &Proc, fs: &Partition) -> InodeId {
    p.cwd.unwrap_or_else(|| fs.root_ino())
}

/// Claims the first local fd past the reserved stdio range (spec §4.9
/// "Returns a local FD... skipping 0,1,2").
fn alloc_fd(p: &mut Proc, slot: OpenFileId) -> KResult<usize> {
    for fd in ofile::RESERVED_FDS..NOFILE {
        if p.fd_table[fd].is_none() {
            p.fd_table[fd] = Some(slot);
            return Ok(fd);
        }
    }
    Err(KernelError::OutOfFds)
}

fn fileref_of(p: &Proc, fd: usize) -> KResult<Option<FileRef>> {
    match p.fd_table.get(fd).copied().flatten() {
        None => Ok(None),
        Some(slot) => ofile::with_slot(slot as usize, |of| of.file),
    }
}

/// One chunked read of up to `buf.len()` bytes through whatever `fd` refers
/// to: the keyboard queue for an unopened fd 0, a pipe's read side, or a
/// regular file's current position (spec §4.9 `sys_read`).
fn read_chunk(p: &mut Proc, fd: usize, buf: &mut [u8]) -> KResult<usize> {
    if fd >= NOFILE {
        return Err(KernelError::BadFd);
    }
    match fileref_of(p, fd)? {
        None => {
            if fd == 0 {
                Ok(console::console_read(buf))
            } else {
                Err(KernelError::BadFd)
            }
        }
        Some(FileRef::PipeRead(id)) => pipe::read(id, buf),
        Some(FileRef::PipeWrite(_)) => Err(KernelError::BadFd),
        Some(FileRef::Inode(handle)) => {
            let slot = p.fd_table[fd].unwrap() as usize;
            let fs = file_system()?;
            let pos = ofile::with_slot(slot, |of| of.pos)?;
            let n = fs.file_read(handle, pos, buf)?;
            ofile::with_slot(slot, |of| of.pos += n as u32)?;
            Ok(n)
        }
    }
}

/// One chunked write of `buf` through whatever `fd` refers to: the console
/// for unopened fd 1/2, a pipe's write side, or a regular file's current
/// position (spec §4.9 `sys_write`).
fn write_chunk(p: &mut Proc, fd: usize, buf: &[u8]) -> KResult<usize> {
    if fd >= NOFILE {
        return Err(KernelError::BadFd);
    }
    match fileref_of(p, fd)? {
        None => {
            if fd == 1 || fd == 2 {
                Ok(console::console_write(buf))
            } else {
                Err(KernelError::BadFd)
            }
        }
        Some(FileRef::PipeWrite(id)) => pipe::write(id, buf),
        Some(FileRef::PipeRead(_)) => Err(KernelError::BadFd),
        Some(FileRef::Inode(handle)) => {
            let slot = p.fd_table[fd].unwrap() as usize;
            if !ofile::with_slot(slot, |of| of.flags.writable())? {
                return Err(KernelError::BadFd);
            }
            let fs = file_system()?;
            let pos = ofile::with_slot(slot, |of| of.pos)?;
            let n = fs.file_write(handle, pos, buf)?;
            ofile::with_slot(slot, |of| of.pos += n as u32)?;
            Ok(n)
        }
    }
}

pub fn sys_read(p: &mut Proc, frame: &TrapFrame) -> KResult<u32> {
    let fd = argint(frame, 0)? as usize;
    let uaddr = argaddr(frame, 1)?;
    let n = argint(frame, 2)? as usize;
    let mut remaining = n;
    let mut off = 0u32;
    let mut total = 0usize;
    while remaining > 0 {
        let chunk_len = remaining.min(IO_CHUNK);
        let mut buf = [0u8; IO_CHUNK];
        let got = read_chunk(p, fd, &mut buf[..chunk_len])?;
        if got == 0 {
            break;
        }
        copy_out_bytes(p, uaddr + off, &buf[..got])?;
        off += got as u32;
        total += got;
        remaining -= got;
        if got < chunk_len {
            break;
        }
    }
    Ok(total as u32)
}

pub fn sys_write(p: &mut Proc, frame: &TrapFrame) -> KResult<u32> {
    let fd = argint(frame, 0)? as usize;
    let uaddr = argaddr(frame, 1)?;
    let n = argint(frame, 2)? as usize;
    let mut remaining = n;
    let mut off = 0u32;
    let mut total = 0usize;
    while remaining > 0 {
        let chunk_len = remaining.min(IO_CHUNK);
        let mut buf = [0u8; IO_CHUNK];
        copy_in_bytes(p, uaddr + off, &mut buf[..chunk_len])?;
        let n = write_chunk(p, fd, &buf[..chunk_len])?;
        off += n as u32;
        total += n;
        remaining -= n;
        if n < chunk_len {
            break;
        }
    }
    Ok(total as u32)
}

/// Allocates a fresh inode and links it into `parent_ino` under `name`,
/// unwinding the inode allocation if the directory-entry write fails (spec
/// §4.9 `sys_open` O_CREAT path).
fn file_create(fs: &Partition, parent_ino: InodeId, name: &str) -> KResult<InodeId> {
    let ino = fs.alloc_inode()?;
    let entry = match DirEntry::new(name, ino, FileType::Regular) {
        Ok(e) => e,
        Err(e) => {
            fs.free_inode(ino);
            return Err(e);
        }
    };
    if let Err(e) = fs.sync_dir_entry(parent_ino, entry) {
        fs.free_inode(ino);
        return Err(e);
    }
    Ok(ino)
}

pub fn sys_open(p: &mut Proc, frame: &TrapFrame) -> KResult<u32> {
    let mut path_buf = [0u8; MAX_PATH];
    let path = argstr(p, frame, 0, &mut path_buf)?;
    if path.len() > 1 && path.ends_with('/') {
        return Err(KernelError::IsADirectory);
    }
    let flags = OpenFlags::from_bits_truncate(argint(frame, 1)? as u32);
    let fs = file_system()?;
    let cwd = cwd_of(p, fs);
    let record = search_file(fs, path, cwd)?;
    let creat = flags.contains(OpenFlags::O_CREAT);

    let ino = match record.found {
        Some((ino, ftype)) => {
            if creat {
                return Err(KernelError::AlreadyExists);
            }
            if ftype == FileType::Directory && flags.writable() {
                return Err(KernelError::IsADirectory);
            }
            ino
        }
        None => {
            if !creat {
                return Err(KernelError::NoSuchFile);
            }
            file_create(fs, record.parent_ino, record.leaf_name.as_str())?
        }
    };

    let handle = fs.open_inode(ino)?;
    let writable = flags.writable();
    if writable && !fs.try_claim_write(handle) {
        fs.close_inode(handle);
        return Err(KernelError::WriteDenied);
    }

    let slot = match ofile::alloc(FileRef::Inode(handle), flags) {
        Ok(s) => s,
        Err(e) => {
            if writable {
                fs.release_write(handle);
            }
            fs.close_inode(handle);
            return Err(e);
        }
    };

    match alloc_fd(p, slot as OpenFileId) {
        Ok(fd) => Ok(fd as u32),
        Err(e) => {
            if let Ok(Some(file)) = ofile::dec_ref(slot) {
                if writable {
                    fs.release_write(handle);
                }
                ofile::close(file);
            }
            Err(e)
        }
    }
}

pub fn sys_close(p: &mut Proc, frame: &TrapFrame) -> KResult<u32> {
    let fd = argint(frame, 0)? as usize;
    let slot = p
        .fd_table
        .get_mut(fd)
        .and_then(Option::take)
        .ok_or(KernelError::BadFd)?;
    if let Some(file) = ofile::dec_ref(slot as usize)? {
        if let FileRef::Inode(handle) = file {
            if let Ok(fs) = file_system() {
                fs.release_write(handle);
            }
        }
        ofile::close(file);
    }
    Ok(0)
}

pub fn sys_lseek(p: &mut Proc, frame: &TrapFrame) -> KResult<u32> {
    let fd = argint(frame, 0)? as usize;
    let offset = argint(frame, 1)?;
    let whence = argint(frame, 2)?;
    let slot = p.fd_table.get(fd).copied().flatten().ok_or(KernelError::BadFd)? as usize;
    let handle = match ofile::with_slot(slot, |of| of.file)?.ok_or(KernelError::BadFd)? {
        FileRef::Inode(h) => h,
        _ => return Err(KernelError::BadFd),
    };
    let fs = file_system()?;
    let size = fs.inode_size(handle);
    let cur = ofile::with_slot(slot, |of| of.pos)?;
    let base: i64 = match whence {
        SEEK_SET => 0,
        SEEK_CUR => cur as i64,
        SEEK_END => size as i64,
        _ => return Err(KernelError::BadOffset),
    };
    let new_pos = base + offset as i64;
    // spec §9(iii): the original kernel's `sys_lseek` forbids `new_pos ==
    // i_size` along with anything outside `[0, i_size)`; kept as-is rather
    // than silently widened to allow seeking to end-of-file.
    if new_pos < 0 || new_pos >= size as i64 {
        return Err(KernelError::BadOffset);
    }
    ofile::with_slot(slot, |of| of.pos = new_pos as u32)?;
    Ok(new_pos as u32)
}

pub fn sys_unlink(p: &mut Proc, frame: &TrapFrame) -> KResult<u32> {
    let mut path_buf = [0u8; MAX_PATH];
    let path = argstr(p, frame, 0, &mut path_buf)?;
    let fs = file_system()?;
    let cwd = cwd_of(p, fs);
    let record = search_file(fs, path, cwd)?;
    let (ino, ftype) = record.found.ok_or(KernelError::NoSuchFile)?;
    if ftype != FileType::Regular {
        return Err(KernelError::IsADirectory);
    }
    if fs.is_open(ino) {
        return Err(KernelError::Busy);
    }
    fs.delete_dir_entry(record.parent_ino, ino)?;
    fs.free_inode(ino);
    Ok(0)
}

pub fn sys_mkdir(p: &mut Proc, frame: &TrapFrame) -> KResult<u32> {
    let mut path_buf = [0u8; MAX_PATH];
    let path = argstr(p, frame, 0, &mut path_buf)?;
    let fs = file_system()?;
    let cwd = cwd_of(p, fs);
    let record = search_file(fs, path, cwd)?;
    if record.found.is_some() {
        return Err(KernelError::AlreadyExists);
    }
    let parent_ino = record.parent_ino;
    let name = record.leaf_name;

    let ino = fs.alloc_inode()?;
    let dot_result = (|| -> KResult<()> {
        fs.sync_dir_entry(ino, DirEntry::new(".", ino, FileType::Directory)?)?;
        fs.sync_dir_entry(ino, DirEntry::new("..", parent_ino, FileType::Directory)?)?;
        Ok(())
    })();
    if let Err(e) = dot_result {
        fs.free_inode(ino);
        return Err(e);
    }
    let entry = match DirEntry::new(name.as_str(), ino, FileType::Directory) {
        Ok(e) => e,
        Err(e) => {
            fs.free_inode(ino);
            return Err(e);
        }
    };
    if let Err(e) = fs.sync_dir_entry(parent_ino, entry) {
        fs.free_inode(ino);
        return Err(e);
    }
    Ok(0)
}

pub fn sys_rmdir(p: &mut Proc, frame: &TrapFrame) -> KResult<u32> {
    let mut path_buf = [0u8; MAX_PATH];
    let path = argstr(p, frame, 0, &mut path_buf)?;
    let fs = file_system()?;
    let cwd = cwd_of(p, fs);
    let record = search_file(fs, path, cwd)?;
    let (ino, ftype) = record.found.ok_or(KernelError::NoSuchFile)?;
    if ftype != FileType::Directory {
        return Err(KernelError::NotADirectory);
    }
    if ino == fs.root_ino() {
        return Err(KernelError::Busy);
    }
    if fs.dir_entry_count(ino) > 0 {
        return Err(KernelError::DirectoryNotEmpty);
    }
    if fs.is_open(ino) {
        return Err(KernelError::Busy);
    }
    fs.delete_dir_entry(record.parent_ino, ino)?;
    fs.free_inode(ino);
    Ok(0)
}

pub fn sys_stat(p: &mut Proc, frame: &TrapFrame) -> KResult<u32> {
    let mut path_buf = [0u8; MAX_PATH];
    let path = argstr(p, frame, 0, &mut path_buf)?;
    let uaddr = argaddr(frame, 1)?;
    let fs = file_system()?;
    let cwd = cwd_of(p, fs);
    let record = search_file(fs, path, cwd)?;
    let (ino, ftype) = record.found.ok_or(KernelError::NoSuchFile)?;
    let size = if ftype == FileType::Regular {
        let handle = fs.open_inode(ino)?;
        let size = fs.inode_size(handle);
        fs.close_inode(handle);
        size
    } else {
        0
    };
    let st = Stat { ino, file_type: ftype, size };
    // SAFETY: Stat is repr(C) and Copy, matching `as_bytes`'s contract.
    copy_out_bytes(p, uaddr, unsafe { as_bytes(&st) })?;
    Ok(0)
}

pub fn sys_chdir(p: &mut Proc, frame: &TrapFrame) -> KResult<u32> {
    let mut path_buf = [0u8; MAX_PATH];
    let path = argstr(p, frame, 0, &mut path_buf)?;
    let fs = file_system()?;
    let cwd = cwd_of(p, fs);
    let record = search_file(fs, path, cwd)?;
    let (ino, ftype) = record.found.ok_or(KernelError::NoSuchFile)?;
    if ftype != FileType::Directory {
        return Err(KernelError::NotADirectory);
    }
    p.cwd = Some(ino);
    Ok(0)
}

/// `sys_getcwd` (spec §4.9): walk `..` back to the root, recovering each
/// step's own name from its parent via `name_of_child`, then rebuild the
/// path in the reverse order the walk discovered it.
pub fn sys_getcwd(p: &mut Proc, frame: &TrapFrame) -> KResult<u32> {
    let uaddr = argaddr(frame, 0)?;
    let n = argint(frame, 1)? as usize;
    let fs = file_system()?;
    let root = fs.root_ino();
    let mut cur = cwd_of(p, fs);

    let mut names: arrayvec::ArrayVec<arrayvec::ArrayString<MAX_FILE_NAME>, { crate::fs::path::MAX_COMPONENTS }> =
        arrayvec::ArrayVec::new();
    while cur != root {
        let (parent_ino, _) = fs.search_dir_entry(cur, "..")?;
        let name = fs.name_of_child(parent_ino, cur)?;
        if names.try_push(name).is_err() {
            return Err(KernelError::NameTooLong);
        }
        cur = parent_ino;
    }

    let mut out: arrayvec::ArrayString<MAX_PATH> = arrayvec::ArrayString::new();
    if names.is_empty() {
        let _ = out.try_push('/');
    } else {
        for name in names.iter().rev() {
            if out.try_push('/').is_err() || out.try_push_str(name.as_str()).is_err() {
                return Err(KernelError::NameTooLong);
            }
        }
    }

    let bytes = out.as_bytes();
    if bytes.len() + 1 > n {
        return Err(KernelError::NameTooLong);
    }
    copy_out_bytes(p, uaddr, bytes)?;
    copy_out_bytes(p, uaddr + bytes.len() as u32, &[0u8])?;
    Ok(bytes.len() as u32)
}

pub fn sys_opendir(p: &mut Proc, frame: &TrapFrame) -> KResult<u32> {
    let mut path_buf = [0u8; MAX_PATH];
    let path = argstr(p, frame, 0, &mut path_buf)?;
    let fs = file_system()?;
    let cwd = cwd_of(p, fs);
    let record = search_file(fs, path, cwd)?;
    let (ino, ftype) = record.found.ok_or(KernelError::NoSuchFile)?;
    if ftype != FileType::Directory {
        return Err(KernelError::NotADirectory);
    }
    let handle = fs.open_inode(ino)?;
    match dirstream::open(handle) {
        Ok(id) => Ok(id as u32),
        Err(e) => {
            fs.close_inode(handle);
            Err(e)
        }
    }
}

pub fn sys_closedir(_p: &mut Proc, frame: &TrapFrame) -> KResult<u32> {
    let id = argint(frame, 0)? as usize;
    let handle = dirstream::close(id)?;
    if let Ok(fs) = file_system() {
        fs.close_inode(handle);
    }
    Ok(0)
}

/// Copies the next directory entry's raw bytes out to `buf` (spec §9 open
/// question: the original kernel hands back a kernel pointer directly, which
/// this kernel's separate user/kernel address spaces cannot do). Returns `1`
/// when an entry was copied, `0` at end-of-stream.
pub fn sys_readdir(p: &mut Proc, frame: &TrapFrame) -> KResult<u32> {
    let id = argint(frame, 0)? as usize;
    let uaddr = argaddr(frame, 1)?;
    let handle = dirstream::handle_of(id)?;
    let fs = file_system()?;
    let ino = fs.inode_no(handle);
    let pos = dirstream::pos(id)?;
    match fs.read_dir_entry_at(ino, pos)? {
        Some((entry, next_pos)) => {
            dirstream::advance(id, next_pos)?;
            copy_out_bytes(p, uaddr, entry.as_bytes())?;
            Ok(1)
        }
        None => Ok(0),
    }
}

pub fn sys_rewinddir(_p: &mut Proc, frame: &TrapFrame) -> KResult<u32> {
    let id = argint(frame, 0)? as usize;
    dirstream::rewind(id)?;
    Ok(0)
}

pub fn sys_pipe(p: &mut Proc, frame: &TrapFrame) -> KResult<u32> {
    let uaddr = argaddr(frame, 0)?;
    let id = pipe::create()?;

    let read_slot = match ofile::alloc(FileRef::PipeRead(id), OpenFlags::O_RDONLY) {
        Ok(s) => s,
        Err(e) => {
            pipe::close_read(id);
            pipe::close_write(id);
            return Err(e);
        }
    };
    let write_slot = match ofile::alloc(FileRef::PipeWrite(id), OpenFlags::O_WRONLY) {
        Ok(s) => s,
        Err(e) => {
            if let Ok(Some(file)) = ofile::dec_ref(read_slot) {
                ofile::close(file);
            }
            pipe::close_write(id);
            return Err(e);
        }
    };

    let rfd = match alloc_fd(p, read_slot as OpenFileId) {
        Ok(fd) => fd,
        Err(e) => {
            if let Ok(Some(file)) = ofile::dec_ref(read_slot) {
                ofile::close(file);
            }
            if let Ok(Some(file)) = ofile::dec_ref(write_slot) {
                ofile::close(file);
            }
            return Err(e);
        }
    };
    let wfd = match alloc_fd(p, write_slot as OpenFileId) {
        Ok(fd) => fd,
        Err(e) => {
            p.fd_table[rfd] = None;
            if let Ok(Some(file)) = ofile::dec_ref(read_slot) {
                ofile::close(file);
            }
            if let Ok(Some(file)) = ofile::dec_ref(write_slot) {
                ofile::close(file);
            }
            return Err(e);
        }
    };

    copy_out_bytes(p, uaddr, &(rfd as u32).to_ne_bytes())?;
    copy_out_bytes(p, uaddr + 4, &(wfd as u32).to_ne_bytes())?;
    Ok(0)
}
