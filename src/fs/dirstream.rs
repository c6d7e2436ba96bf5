//! Open directory streams (spec §6 `opendir, closedir, readdir, rewinddir`).
//!
//! A fixed table of `{ handle, pos }` pairs, the directory-stream analogue
//! of `fs::ofile::OpenFileTable` — a stream holds one `InodeHandle` open for
//! as long as it is alive, and `pos` is the byte cursor into the directory's
//! own entry array that `sys_readdir`/`sys_rewinddir` advance and reset.
//!
//! `original_source/fs/dir.c`'s `sys_readdir` hands the caller a raw pointer
//! to a kernel-resident `struct dir_entry`; this kernel keeps user and
//! kernel address spaces genuinely separate, so `sys_readdir` instead copies
//! the found entry's bytes out to a user buffer (spec §9 open question,
//! resolved in DESIGN.md).

use crate::errno::{KernelError, KResult};
use crate::fs::InodeHandle;
use crate::lock::SpinLock;
use crate::param::MAX_DIR_STREAMS;

pub type DirStreamId = usize;

#[derive(Clone, Copy)]
struct DirStream {
    handle: Option<InodeHandle>,
    pos: u32,
}

impl DirStream {
    const fn empty() -> Self {
        Self { handle: None, pos: 0 }
    }
}

struct DirStreamTable {
    slots: [DirStream; MAX_DIR_STREAMS],
}

impl DirStreamTable {
    const fn new() -> Self {
        Self {
            slots: [DirStream::empty(); MAX_DIR_STREAMS],
        }
    }

    fn open(&mut self, handle: InodeHandle) -> KResult<DirStreamId> {
        let slot = self
            .slots
            .iter()
            .position(|s| s.handle.is_none())
            .ok_or(KernelError::OutOfFds)?;
        self.slots[slot] = DirStream {
            handle: Some(handle),
            pos: 0,
        };
        Ok(slot)
    }

    fn close(&mut self, id: DirStreamId) -> KResult<InodeHandle> {
        let slot = self.slots.get_mut(id).ok_or(KernelError::BadFd)?;
        let handle = slot.handle.take().ok_or(KernelError::BadFd)?;
        slot.pos = 0;
        Ok(handle)
    }

    fn rewind(&mut self, id: DirStreamId) -> KResult<()> {
        let slot = self.slots.get_mut(id).ok_or(KernelError::BadFd)?;
        if slot.handle.is_none() {
            return Err(KernelError::BadFd);
        }
        slot.pos = 0;
        Ok(())
    }

    fn handle_of(&self, id: DirStreamId) -> KResult<InodeHandle> {
        self.slots.get(id).and_then(|s| s.handle).ok_or(KernelError::BadFd)
    }

    fn pos(&self, id: DirStreamId) -> KResult<u32> {
        self.slots
            .get(id)
            .filter(|s| s.handle.is_some())
            .map(|s| s.pos)
            .ok_or(KernelError::BadFd)
    }

    fn advance(&mut self, id: DirStreamId, new_pos: u32) -> KResult<()> {
        let slot = self.slots.get_mut(id).ok_or(KernelError::BadFd)?;
        if slot.handle.is_none() {
            return Err(KernelError::BadFd);
        }
        slot.pos = new_pos;
        Ok(())
    }
}

static TABLE: SpinLock<DirStreamTable> = SpinLock::new("dirstream", DirStreamTable::new());

/// Claims a fresh stream over `handle`, starting at position 0.
pub fn open(handle: InodeHandle) -> KResult<DirStreamId> {
    TABLE.lock().open(handle)
}

/// Vacates `id`, returning the `InodeHandle` it held so the caller can close
/// the underlying inode.
pub fn close(id: DirStreamId) -> KResult<InodeHandle> {
    TABLE.lock().close(id)
}

pub fn rewind(id: DirStreamId) -> KResult<()> {
    TABLE.lock().rewind(id)
}

pub fn handle_of(id: DirStreamId) -> KResult<InodeHandle> {
    TABLE.lock().handle_of(id)
}

pub fn pos(id: DirStreamId) -> KResult<u32> {
    TABLE.lock().pos(id)
}

pub fn advance(id: DirStreamId, new_pos: u32) -> KResult<()> {
    TABLE.lock().advance(id, new_pos)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_close_round_trip_frees_slot() {
        let mut table = DirStreamTable::new();
        let id = table.open(3).unwrap();
        assert_eq!(table.handle_of(id).unwrap(), 3);
        assert_eq!(table.close(id).unwrap(), 3);
        assert!(table.handle_of(id).is_err());
    }

    #[test]
    fn rewind_resets_position() {
        let mut table = DirStreamTable::new();
        let id = table.open(7).unwrap();
        table.advance(id, 32).unwrap();
        assert_eq!(table.pos(id).unwrap(), 32);
        table.rewind(id).unwrap();
        assert_eq!(table.pos(id).unwrap(), 0);
        table.close(id).unwrap();
    }
}
