//! Global open-file table (spec §3 "Global open-file table", §4.9 C12).
//!
//! Fixed-size array indexed by global FD; slots 0, 1, 2 are reserved for
//! stdin/stdout/stderr the way `proc::pcb::Proc::fd_table`'s local FDs are
//! (spec §3 PCB "I/O"). Claiming and releasing a slot is a short operation
//! guarded by interrupts-off (spec §5 "Global open-file table: mutations are
//! short; protected by interrupts-off for slot claim/release"), the same
//! `push_off`/`pop_off` bracket `sched.rs`'s ready-list updates use, so this
//! is backed by a plain `SpinLock` rather than a sleeping one.
//!
//! A slot refers to either a file (by `InodeHandle`, the resident-inode-pool
//! index, not the raw on-disk `InodeId` — `fs::Partition`'s read/write/size
//! calls all take a handle) or one side of a pipe. `fork` shares a slot
//! across processes rather than allocating a second one (spec §4.5 "FD
//! table is duplicated"), so every slot is refcounted the way
//! `kaist-cp-rv6/kernel-rs/src/file.rs`'s `RcFile` is: `dup` bumps the
//! count, `dec_ref` drops it and only hands the underlying resource back to
//! the caller to close once it reaches zero.

use crate::errno::{KernelError, KResult};
use crate::fs::InodeHandle;
use crate::param::NFILE;
use crate::pipe::PipeId;
use crate::lock::SpinLock;

bitflags::bitflags! {
    pub struct OpenFlags: u32 {
        const O_RDONLY = 0;
        const O_WRONLY = 1 << 0;
        const O_RDWR   = 1 << 1;
        const O_CREAT  = 1 << 2;
    }
}

impl OpenFlags {
    pub fn writable(self) -> bool {
        self.contains(OpenFlags::O_WRONLY) || self.contains(OpenFlags::O_RDWR)
    }
}

/// Slots 0, 1, 2 are reserved for stdin/stdout/stderr and never handed out
/// by `alloc` (spec §3, §4.9).
pub const RESERVED_FDS: usize = 3;

/// What an open-file slot actually refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileRef {
    Inode(InodeHandle),
    PipeRead(PipeId),
    PipeWrite(PipeId),
}

#[derive(Debug, Clone, Copy)]
pub struct OpenFile {
    pub file: Option<FileRef>,
    pub pos: u32,
    pub flags: OpenFlags,
    refs: u32,
}

impl OpenFile {
    const fn empty() -> Self {
        Self {
            file: None,
            pos: 0,
            flags: OpenFlags::O_RDONLY,
            refs: 0,
        }
    }

    pub fn is_free(&self) -> bool {
        self.file.is_none()
    }
}

pub struct OpenFileTable {
    slots: [OpenFile; NFILE],
}

impl OpenFileTable {
    const fn new() -> Self {
        Self {
            slots: [OpenFile::empty(); NFILE],
        }
    }

    /// Claims the first free slot beyond the reserved stdio range (spec §4.9
    /// "Returns a local FD... skipping 0,1,2"; this is the *global* slot
    /// those local FDs point at).
    fn alloc(&mut self, file: FileRef, flags: OpenFlags) -> KResult<usize> {
        for (i, slot) in self.slots.iter_mut().enumerate().skip(RESERVED_FDS) {
            if slot.is_free() {
                *slot = OpenFile {
                    file: Some(file),
                    pos: 0,
                    flags,
                    refs: 1,
                };
                return Ok(i);
            }
        }
        Err(KernelError::OutOfFds)
    }

    /// Bumps a slot's refcount. Called by `fork` for each fd it inherits
    /// (spec §4.5 "FD table is duplicated") — the child's local fd table
    /// points at the very same global slot, not a fresh one.
    fn dup(&mut self, slot: usize) -> KResult<()> {
        let entry = self.slots.get_mut(slot).ok_or(KernelError::BadFd)?;
        if entry.is_free() {
            return Err(KernelError::BadFd);
        }
        entry.refs += 1;
        Ok(())
    }

    /// Drops one reference to `slot`. Returns the slot's `FileRef` once this
    /// was the last reference, at which point the slot is already vacated
    /// and the caller is responsible for actually closing the underlying
    /// inode or pipe side; returns `None` if other references remain.
    fn dec_ref(&mut self, slot: usize) -> KResult<Option<FileRef>> {
        let entry = self.slots.get_mut(slot).ok_or(KernelError::BadFd)?;
        let file = entry.file.ok_or(KernelError::BadFd)?;
        entry.refs -= 1;
        if entry.refs == 0 {
            *entry = OpenFile::empty();
            Ok(Some(file))
        } else {
            Ok(None)
        }
    }
}

static TABLE: SpinLock<OpenFileTable> = SpinLock::new("ofile", OpenFileTable::new());

pub fn alloc(file: FileRef, flags: OpenFlags) -> KResult<usize> {
    TABLE.lock().alloc(file, flags)
}

pub fn dup(slot: usize) -> KResult<()> {
    TABLE.lock().dup(slot)
}

pub fn dec_ref(slot: usize) -> KResult<Option<FileRef>> {
    TABLE.lock().dec_ref(slot)
}

/// Actually releases what a slot referred to, once `dec_ref` reports the
/// last reference is gone (spec §4.9 `close`, §4.5 exit's fd-table
/// teardown): drops the resident inode's reference count, or closes the
/// relevant pipe side.
pub fn close(file: FileRef) {
    match file {
        FileRef::Inode(handle) => {
            if let Ok(fs) = crate::kernel::kernel().file_system() {
                fs.close_inode(handle);
            }
        }
        FileRef::PipeRead(id) => crate::pipe::close_read(id),
        FileRef::PipeWrite(id) => crate::pipe::close_write(id),
    }
}

pub fn with_slot<R>(slot: usize, f: impl FnOnce(&mut OpenFile) -> R) -> KResult<R> {
    let mut table = TABLE.lock();
    let entry = table.slots.get_mut(slot).ok_or(KernelError::BadFd)?;
    if entry.is_free() {
        return Err(KernelError::BadFd);
    }
    Ok(f(entry))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_skips_reserved_slots() {
        let mut table = OpenFileTable::new();
        let slot = table.alloc(FileRef::Inode(5), OpenFlags::O_RDONLY).unwrap();
        assert!(slot >= RESERVED_FDS);
    }

    #[test]
    fn dec_ref_frees_only_on_last_reference() {
        let mut table = OpenFileTable::new();
        let slot = table.alloc(FileRef::Inode(5), OpenFlags::O_RDWR).unwrap();
        table.dup(slot).unwrap();
        assert_eq!(table.dec_ref(slot).unwrap(), None);
        assert_eq!(table.dec_ref(slot).unwrap(), Some(FileRef::Inode(5)));
        assert!(table.dec_ref(slot).is_err());
    }

    #[test]
    fn freed_slot_is_reusable() {
        let mut table = OpenFileTable::new();
        let slot = table.alloc(FileRef::Inode(5), OpenFlags::O_RDWR).unwrap();
        table.dec_ref(slot).unwrap();
        let slot2 = table.alloc(FileRef::Inode(6), OpenFlags::O_RDONLY).unwrap();
        assert_eq!(slot, slot2);
    }
}
