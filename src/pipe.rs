//! Anonymous pipes (spec §6 `pipe(fd[2])`).
//!
//! A fixed pool of pipe buffers, each a byte ring with one read side and one
//! write side (spec §4.4 C7 "byte ring buffer with one producer/one consumer
//! sleep slot"). `sync::ring::RingBuffer` already builds that shape out of
//! two semaphores, but its blocking `push`/`pop` have no way to report EOF
//! or a broken pipe once the other side is gone — so a pipe slot is built
//! the same way `sync::Semaphore::down` itself is (push_off, check-or-block
//! under the lock, block on a raw pointer to the waiters list, pop_off),
//! generalized to a head/tail/count buffer with open/closed tracking on
//! each side (`kaist-cp-rv6/kernel-rs/src/pipe.rs`'s `PipeInner` has the
//! same `read_open`/`write_open` booleans for the same reason).
//!
//! A pipe's read/write side can be shared by more than one process after
//! `fork`, but that sharing happens at the open-file-table layer
//! (`fs::ofile::OpenFile::refs`), not here: every `fork` duplicates an
//! *existing* `OpenFile` slot rather than allocating a second one, so a
//! pipe side is only ever truly closed once, when that slot's refcount
//! reaches zero.

use array_macro::array;

use crate::errno::{KernelError, KResult};
use crate::list::IndexList;
use crate::lock::SpinLock;
use crate::param::{MAX_PIPES, NPROC, PIPE_BUF_SIZE};

pub type PipeId = usize;

struct PipeSlot {
    buf: [u8; PIPE_BUF_SIZE],
    head: usize,
    tail: usize,
    count: usize,
    read_open: bool,
    write_open: bool,
    in_use: bool,
    read_waiters: IndexList<NPROC>,
    write_waiters: IndexList<NPROC>,
}

impl PipeSlot {
    const fn empty() -> Self {
        Self {
            buf: [0; PIPE_BUF_SIZE],
            head: 0,
            tail: 0,
            count: 0,
            read_open: false,
            write_open: false,
            in_use: false,
            read_waiters: IndexList::new(),
            write_waiters: IndexList::new(),
        }
    }

    /// Frees the slot once neither side is open any more, so `create` can
    /// hand it back out.
    fn maybe_free(&mut self) {
        if !self.read_open && !self.write_open {
            self.in_use = false;
        }
    }
}

struct PipeTable {
    slots: [PipeSlot; MAX_PIPES],
}

impl PipeTable {
    const fn new() -> Self {
        Self {
            slots: array![_ => PipeSlot::empty(); MAX_PIPES],
        }
    }

    fn alloc_slot(&mut self) -> Option<usize> {
        self.slots.iter().position(|s| !s.in_use)
    }
}

static PIPES: SpinLock<PipeTable> = SpinLock::new("pipes", PipeTable::new());

/// Allocates a fresh pipe with one open read side and one open write side
/// (spec §6 `pipe(fd[2])`). The caller wraps the returned id in two
/// `fs::ofile::FileRef::PipeRead`/`PipeWrite` slots.
pub fn create() -> KResult<PipeId> {
    let mut table = PIPES.lock();
    let id = table.alloc_slot().ok_or(KernelError::OutOfMemory)?;
    let slot = &mut table.slots[id];
    slot.in_use = true;
    slot.head = 0;
    slot.tail = 0;
    slot.count = 0;
    slot.read_open = true;
    slot.write_open = true;
    Ok(id)
}

/// Closes the read side. Any writer blocked on a full buffer is woken so it
/// can discover the broken pipe instead of waiting forever.
pub fn close_read(id: PipeId) {
    unsafe { crate::lock::push_off() };
    {
        let mut table = PIPES.lock();
        let slot = &mut table.slots[id];
        slot.read_open = false;
        crate::proc::unblock_all(&mut slot.write_waiters);
        slot.maybe_free();
    }
    unsafe { crate::lock::pop_off() };
}

/// Closes the write side. Any reader blocked on an empty buffer is woken so
/// it can observe EOF instead of waiting forever.
pub fn close_write(id: PipeId) {
    unsafe { crate::lock::push_off() };
    {
        let mut table = PIPES.lock();
        let slot = &mut table.slots[id];
        slot.write_open = false;
        crate::proc::unblock_all(&mut slot.read_waiters);
        slot.maybe_free();
    }
    unsafe { crate::lock::pop_off() };
}

/// Reads up to `buf.len()` bytes, blocking until at least one byte is
/// available. Returns `Ok(0)` once the write side is closed and the buffer
/// has drained (EOF), matching a regular file's short-read-at-EOF contract.
pub fn read(id: PipeId, buf: &mut [u8]) -> KResult<usize> {
    if buf.is_empty() {
        return Ok(0);
    }
    loop {
        unsafe { crate::lock::push_off() };
        let outcome = {
            let mut table = PIPES.lock();
            let slot = &mut table.slots[id];
            if slot.count > 0 {
                let mut n = 0;
                while n < buf.len() && slot.count > 0 {
                    buf[n] = slot.buf[slot.tail];
                    slot.tail = (slot.tail + 1) % PIPE_BUF_SIZE;
                    slot.count -= 1;
                    n += 1;
                }
                crate::proc::unblock_all(&mut slot.write_waiters);
                Some(Ok(n))
            } else if !slot.write_open {
                Some(Ok(0))
            } else {
                slot.read_waiters.append(crate::proc::current_slot());
                None
            }
        };
        match outcome {
            Some(result) => {
                unsafe { crate::lock::pop_off() };
                return result;
            }
            None => unsafe {
                let waiters = &mut (*PIPES.get_mut_raw()).slots[id].read_waiters;
                crate::proc::block_current(waiters);
                crate::lock::pop_off();
            },
        }
    }
}

/// Writes all of `buf`, blocking while the buffer is full. Fails with
/// `BrokenPipe` once the read side is closed; a partial write completed
/// before that point is still reported rather than discarded.
pub fn write(id: PipeId, buf: &[u8]) -> KResult<usize> {
    let mut written = 0;
    while written < buf.len() {
        unsafe { crate::lock::push_off() };
        let outcome = {
            let mut table = PIPES.lock();
            let slot = &mut table.slots[id];
            if !slot.read_open {
                Some(Err(KernelError::BrokenPipe))
            } else if slot.count < PIPE_BUF_SIZE {
                while written < buf.len() && slot.count < PIPE_BUF_SIZE {
                    slot.buf[slot.head] = buf[written];
                    slot.head = (slot.head + 1) % PIPE_BUF_SIZE;
                    slot.count += 1;
                    written += 1;
                }
                crate::proc::unblock_all(&mut slot.read_waiters);
                Some(Ok(()))
            } else {
                slot.write_waiters.append(crate::proc::current_slot());
                None
            }
        };
        match outcome {
            Some(Ok(())) => {
                unsafe { crate::lock::pop_off() };
            }
            Some(Err(e)) => {
                unsafe { crate::lock::pop_off() };
                return if written > 0 { Ok(written) } else { Err(e) };
            }
            None => unsafe {
                let waiters = &mut (*PIPES.get_mut_raw()).slots[id].write_waiters;
                crate::proc::block_current(waiters);
                crate::lock::pop_off();
            },
        }
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_allocates_distinct_slots() {
        let a = create().unwrap();
        let b = create().unwrap();
        assert_ne!(a, b);
        close_read(a);
        close_write(a);
        close_read(b);
        close_write(b);
    }

    #[test]
    fn write_then_read_round_trips_without_blocking() {
        let id = create().unwrap();
        assert_eq!(write(id, b"hello").unwrap(), 5);
        let mut buf = [0u8; 5];
        assert_eq!(read(id, &mut buf).unwrap(), 5);
        assert_eq!(&buf, b"hello");
        close_read(id);
        close_write(id);
    }

    #[test]
    fn read_returns_eof_after_writer_closes() {
        let id = create().unwrap();
        close_write(id);
        let mut buf = [0u8; 4];
        assert_eq!(read(id, &mut buf).unwrap(), 0);
        close_read(id);
    }

    #[test]
    fn write_after_readers_gone_is_broken_pipe() {
        let id = create().unwrap();
        close_read(id);
        assert_eq!(write(id, b"x"), Err(KernelError::BrokenPipe));
        close_write(id);
    }
}
