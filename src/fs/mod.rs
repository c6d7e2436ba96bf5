//! The on-disk file system (spec §4.6-§4.9, C9-C12): one mounted partition
//! at a time, combining a super block, a block bitmap, an inode bitmap, and
//! a fixed-size in-memory open-inode pool behind a single sleeping lock
//! (spec §5 "Partition: bitmaps and open-inode list guarded by the
//! partition lock"). No journal — spec §1 rules "journaling" out as a
//! non-goal, unlike `kaist-cp-rv6/kernel-rs/src/fs.rs`'s `Log`-backed
//! transactions.
//!
//! Layered the way the original kernel's `fs.c` is, minus the log:
//! [`superblock`] the on-disk layout, [`inode`] the inode table, [`dir`]
//! directory entries, [`path`] name resolution, [`ofile`] the global
//! open-file table, [`stat`] the `sys_stat` result shape, and [`mkfs`] the
//! one-time partition formatter. This module ties all of them to actual
//! disk I/O through a single [`Partition`].

pub mod dir;
pub mod dirstream;
pub mod inode;
pub mod mkfs;
pub mod ofile;
pub mod path;
pub mod stat;
pub mod superblock;

pub use dir::{DirEntry, FileType, DIR_ENTRY_SIZE, ENTRIES_PER_SECTOR};
pub use inode::{Dinode, Inode, InodeId, DINODE_SIZE};
pub use stat::Stat;
pub use superblock::Superblock;

use zerocopy::{AsBytes, FromBytes};

use crate::block::PartitionDescriptor;
use crate::errno::{KernelError, KResult};
use crate::param::{DIRECT_BLOCKS, INDIRECT_BLOCKS, MAX_FILE_NAME, MAX_FILE_SIZE, SECTOR_SIZE};
use crate::param::{BLOCK_BITMAP_BYTES, INODE_BITMAP_BYTES, NINODE};
use crate::sync::{new_sleep_lock, SleepLock};
use crate::bitmap::Bitmap;

/// Index into the in-memory inode pool, handed back by [`Partition::open_inode`]
/// and consumed by every per-open-file operation (spec §4.7 "Open").
pub type InodeHandle = usize;

struct PartitionState {
    sb: Superblock,
    block_bitmap: Bitmap<BLOCK_BITMAP_BYTES>,
    inode_bitmap: Bitmap<INODE_BITMAP_BYTES>,
    inodes: [Inode; NINODE],
}

/// A mounted partition: disk geometry plus the in-memory state that mirrors
/// it, all behind one sleeping lock (spec §4.6, §4.7, §5). This kernel
/// mounts a single partition at a time (spec §9's design note on
/// `current_partition`), so there is no cross-partition inode/path
/// ambiguity to resolve.
pub struct Partition {
    disk: PartitionDescriptor,
    state: SleepLock<PartitionState>,
}

impl core::fmt::Debug for Partition {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Partition").finish_non_exhaustive()
    }
}

impl Partition {
    /// Reads the super block and both bitmaps off `disk` and builds the
    /// in-memory mirror `Partition` wraps. `None` if the super block's
    /// magic does not check out (spec §4.6 "Mount").
    pub fn mount(disk: PartitionDescriptor) -> Option<Self> {
        let sb = Superblock::read(&disk)?;
        let data_blocks = (sb.total_sectors - sb.data_start_lba) as usize;
        let block_bitmap = load_bitmap(&disk, sb.block_bitmap_lba, sb.block_bitmap_sectors, data_blocks);
        let inode_bitmap = load_bitmap(&disk, sb.inode_bitmap_lba, sb.inode_bitmap_sectors, sb.inode_count as usize);
        Some(Self {
            disk,
            state: new_sleep_lock(
                "partition",
                PartitionState {
                    sb,
                    block_bitmap,
                    inode_bitmap,
                    inodes: [Inode::empty(); NINODE],
                },
            ),
        })
    }

    /// Lays a brand new file system down on `disk` (spec §6's disk layout,
    /// grounded on `original_source/fs/fs.c`'s `partition_format`) and mounts
    /// it. Any previous contents of `disk` are discarded.
    pub fn format(disk: PartitionDescriptor, data_sectors: u32, inode_count: u32) -> KResult<Self> {
        mkfs::format(&disk, data_sectors, inode_count);
        Self::mount(disk).ok_or(KernelError::BadPath)
    }

    pub fn root_ino(&self) -> InodeId {
        self.state.lock().sb.root_inode_no
    }

    // ---- inode pool ----------------------------------------------------

    /// `Open` (spec §4.7): find `ino` already resident in the pool and bump
    /// its `open_count`, or claim a free slot and read it in from disk.
    pub fn open_inode(&self, ino: InodeId) -> KResult<InodeHandle> {
        let mut state = self.state.lock();
        if let Some(slot) = state.inodes.iter().position(|i| !i.is_free() && i.i_no() == ino) {
            state.inodes[slot].open_count += 1;
            return Ok(slot);
        }
        let slot = state.inodes.iter().position(Inode::is_free).ok_or(KernelError::OutOfMemory)?;
        let dinode = inode::read_dinode(&self.disk, &state.sb, ino);
        state.inodes[slot] = Inode {
            dinode,
            open_count: 1,
            write_deny: false,
        };
        Ok(slot)
    }

    /// `Close`/`Release` (spec §4.7): drop one reference, evicting the slot
    /// once nothing holds it open. Writes are synced to disk immediately by
    /// every mutator below, so there is nothing left to flush on eviction.
    pub fn close_inode(&self, handle: InodeHandle) {
        let mut state = self.state.lock();
        if state.inodes[handle].open_count > 0 {
            state.inodes[handle].open_count -= 1;
        }
        if state.inodes[handle].open_count == 0 {
            state.inodes[handle] = Inode::empty();
        }
    }

    pub fn inode_no(&self, handle: InodeHandle) -> InodeId {
        self.state.lock().inodes[handle].i_no()
    }

    pub fn inode_size(&self, handle: InodeHandle) -> u32 {
        self.state.lock().inodes[handle].dinode.i_size
    }

    /// Whether `ino` is held open by anyone (spec §4.9 `sys_unlink` "refuse
    /// if the inode is open anywhere").
    pub fn is_open(&self, ino: InodeId) -> bool {
        let state = self.state.lock();
        state.inodes.iter().any(|i| !i.is_free() && i.i_no() == ino)
    }

    /// Grants exclusive write access, per spec §3's "a writer already
    /// holding the inode's `write_deny` flag" rule; `false` if someone else
    /// already holds it.
    pub fn try_claim_write(&self, handle: InodeHandle) -> bool {
        let mut state = self.state.lock();
        if state.inodes[handle].write_deny {
            return false;
        }
        state.inodes[handle].write_deny = true;
        true
    }

    pub fn release_write(&self, handle: InodeHandle) {
        self.state.lock().inodes[handle].write_deny = false;
    }

    // ---- allocation ------------------------------------------------------

    /// `alloc_inode` (spec §4.7): claim the first free bit in the inode
    /// bitmap and initialize a fresh empty on-disk inode there.
    pub fn alloc_inode(&self) -> KResult<InodeId> {
        let mut state = self.state.lock();
        let idx = state.inode_bitmap.scan_and_set(1).ok_or(KernelError::OutOfMemory)?;
        self.store_inode_bitmap(&state);
        let ino = idx as InodeId;
        inode::write_dinode(&self.disk, &state.sb, &Dinode::empty(ino));
        Ok(ino)
    }

    /// Frees `ino`'s bitmap bit and every data/indirect block it owned
    /// (spec §4.9 `sys_unlink`/`sys_rmdir`). Caller must have already
    /// confirmed nothing has `ino` open.
    pub fn free_inode(&self, ino: InodeId) {
        let mut state = self.state.lock();
        let dinode = inode::read_dinode(&self.disk, &state.sb, ino);
        for i in 0..DIRECT_BLOCKS {
            let lba = dinode.direct(i);
            if lba != 0 {
                self.free_block_locked(&mut state, lba);
            }
        }
        if dinode.indirect_lba() != 0 {
            let indirect = inode::read_indirect(&self.disk, &dinode);
            for lba in indirect {
                if lba != 0 {
                    self.free_block_locked(&mut state, lba);
                }
            }
            self.free_block_locked(&mut state, dinode.indirect_lba());
        }
        state.inode_bitmap.set(ino as usize, false);
        self.store_inode_bitmap(&state);
    }

    fn alloc_block_locked(&self, state: &mut PartitionState) -> KResult<u32> {
        let idx = state.block_bitmap.scan_and_set(1).ok_or(KernelError::OutOfMemory)?;
        self.store_block_bitmap(state);
        Ok(state.sb.data_start_lba + idx as u32)
    }

    fn free_block_locked(&self, state: &mut PartitionState, lba: u32) {
        let idx = (lba - state.sb.data_start_lba) as usize;
        state.block_bitmap.set(idx, false);
        self.store_block_bitmap(state);
    }

    fn store_block_bitmap(&self, state: &PartitionState) {
        write_bitmap(&self.disk, state.sb.block_bitmap_lba, state.sb.block_bitmap_sectors, state.block_bitmap.as_bytes());
    }

    fn store_inode_bitmap(&self, state: &PartitionState) {
        write_bitmap(&self.disk, state.sb.inode_bitmap_lba, state.sb.inode_bitmap_sectors, state.inode_bitmap.as_bytes());
    }

    // ---- directory operations (spec §4.8) ---------------------------------

    /// Linear scan over `dir_ino`'s data blocks for an entry named `name`
    /// (spec §4.8 `search_dir_entry`).
    pub fn search_dir_entry(&self, dir_ino: InodeId, name: &str) -> KResult<(InodeId, FileType)> {
        let state = self.state.lock();
        let dinode = inode::read_dinode(&self.disk, &state.sb, dir_ino);
        let mut found = None;
        self.for_each_dir_entry(&dinode, |entry| {
            if !entry.is_free() && entry.name_matches(name) {
                found = Some((entry.i_no, entry.file_type()));
                true
            } else {
                false
            }
        });
        found.ok_or(KernelError::NoSuchFile)
    }

    /// Writes `entry` into the first free slot of `parent_ino`'s directory
    /// data, growing it by one block if every existing slot is taken (spec
    /// §4.8 `sync_dir_entry`).
    pub fn sync_dir_entry(&self, parent_ino: InodeId, entry: DirEntry) -> KResult<()> {
        let mut state = self.state.lock();
        let mut dinode = inode::read_dinode(&self.disk, &state.sb, parent_ino);
        let lbas = inode::collect_block_lbas(&self.disk, &dinode);
        let total_entries = dinode.i_size as usize / DIR_ENTRY_SIZE;
        let mut seen = 0usize;
        for &lba in lbas.iter() {
            if seen >= total_entries {
                break;
            }
            if lba == 0 {
                continue;
            }
            let mut sector = [0u8; SECTOR_SIZE];
            self.disk.read_sector(lba, &mut sector);
            let mut wrote = false;
            for chunk in sector.chunks_exact_mut(DIR_ENTRY_SIZE) {
                if seen >= total_entries {
                    break;
                }
                seen += 1;
                let existing = DirEntry::read_from(&chunk[..]).expect("sync_dir_entry: size mismatch");
                if existing.is_free() {
                    chunk.copy_from_slice(entry.as_bytes());
                    wrote = true;
                    break;
                }
            }
            if wrote {
                self.disk.write_sector(lba, &sector);
                return Ok(());
            }
        }

        // No free slot anywhere: grow the directory by one block.
        let block_idx = dinode.i_size as usize / SECTOR_SIZE;
        let new_lba = self.alloc_block_locked(&mut state)?;
        if block_idx < DIRECT_BLOCKS {
            dinode.set_direct(block_idx, new_lba);
        } else {
            let indirect_idx = block_idx - DIRECT_BLOCKS;
            if dinode.indirect_lba() == 0 {
                let ind_lba = self.alloc_block_locked(&mut state)?;
                dinode.set_indirect_lba(ind_lba);
                inode::write_indirect(&self.disk, &dinode, &[0u32; INDIRECT_BLOCKS]);
            }
            let mut indirect = inode::read_indirect(&self.disk, &dinode);
            indirect[indirect_idx] = new_lba;
            inode::write_indirect(&self.disk, &dinode, &indirect);
        }
        let mut sector = [0u8; SECTOR_SIZE];
        sector[..DIR_ENTRY_SIZE].copy_from_slice(entry.as_bytes());
        self.disk.write_sector(new_lba, &sector);
        dinode.i_size += SECTOR_SIZE as u32;
        inode::write_dinode(&self.disk, &state.sb, &dinode);
        Ok(())
    }

    /// Tombstones the entry in `dir_ino` naming `ino` (spec §4.8
    /// `delete_dir_entry`), then reclaims the block it lived in if that was
    /// the block's last live entry: freed from the block bitmap, cleared
    /// from the direct/indirect table (and the indirect-table block itself
    /// freed too, if that empties it), with `i_size` decremented by one
    /// block and the inode synced. The block holding `.`/`..` (block 0) is
    /// never reclaimed even if every other entry in it is gone — a
    /// directory's first block always exists.
    pub fn delete_dir_entry(&self, dir_ino: InodeId, ino: InodeId) -> KResult<()> {
        let mut state = self.state.lock();
        let mut dinode = inode::read_dinode(&self.disk, &state.sb, dir_ino);
        let lbas = inode::collect_block_lbas(&self.disk, &dinode);
        let total_entries = dinode.i_size as usize / DIR_ENTRY_SIZE;
        let mut seen = 0usize;
        let mut removed_from: Option<(usize, u32)> = None;
        for (block_idx, &lba) in lbas.iter().enumerate() {
            if seen >= total_entries {
                break;
            }
            if lba == 0 {
                continue;
            }
            let mut sector = [0u8; SECTOR_SIZE];
            self.disk.read_sector(lba, &mut sector);
            let mut wrote = false;
            for chunk in sector.chunks_exact_mut(DIR_ENTRY_SIZE) {
                if seen >= total_entries {
                    break;
                }
                seen += 1;
                let existing = DirEntry::read_from(&chunk[..]).expect("delete_dir_entry: size mismatch");
                if !existing.is_free() && existing.i_no == ino {
                    chunk.copy_from_slice(DirEntry::default().as_bytes());
                    wrote = true;
                    break;
                }
            }
            if wrote {
                self.disk.write_sector(lba, &sector);
                removed_from = Some((block_idx, lba));
                break;
            }
        }
        let (block_idx, lba) = removed_from.ok_or(KernelError::NoSuchFile)?;

        if block_idx > 0 {
            let mut sector = [0u8; SECTOR_SIZE];
            self.disk.read_sector(lba, &mut sector);
            let block_empty = sector
                .chunks_exact(DIR_ENTRY_SIZE)
                .all(|chunk| DirEntry::read_from(chunk).map_or(true, |e| e.is_free()));
            if block_empty {
                self.free_block_locked(&mut state, lba);
                if block_idx < DIRECT_BLOCKS {
                    dinode.set_direct(block_idx, 0);
                } else {
                    let indirect_idx = block_idx - DIRECT_BLOCKS;
                    let mut indirect = inode::read_indirect(&self.disk, &dinode);
                    indirect[indirect_idx] = 0;
                    inode::write_indirect(&self.disk, &dinode, &indirect);
                    if indirect.iter().all(|&l| l == 0) {
                        self.free_block_locked(&mut state, dinode.indirect_lba());
                        dinode.set_indirect_lba(0);
                    }
                }
                dinode.i_size -= SECTOR_SIZE as u32;
            }
        }
        inode::write_dinode(&self.disk, &state.sb, &dinode);
        Ok(())
    }

    /// Number of non-tombstoned entries in `dir_ino` besides `.`/`..` (spec
    /// §4.9 `sys_rmdir` "refuse if the directory has entries besides `.`
    /// and `..`").
    pub fn dir_entry_count(&self, dir_ino: InodeId) -> usize {
        let state = self.state.lock();
        let dinode = inode::read_dinode(&self.disk, &state.sb, dir_ino);
        let mut count = 0;
        self.for_each_dir_entry(&dinode, |entry| {
            if !entry.is_free() && entry.name() != "." && entry.name() != ".." {
                count += 1;
            }
            false
        });
        count
    }

    /// Reverse directory lookup (spec §4.9 `sys_getcwd`: "scans the parent
    /// directory to recover the child's name"): the name of the entry in
    /// `dir_ino` whose inode number is `target_ino`, skipping `.`/`..`.
    pub fn name_of_child(&self, dir_ino: InodeId, target_ino: InodeId) -> KResult<arrayvec::ArrayString<MAX_FILE_NAME>> {
        let state = self.state.lock();
        let dinode = inode::read_dinode(&self.disk, &state.sb, dir_ino);
        let mut found = None;
        self.for_each_dir_entry(&dinode, |entry| {
            if !entry.is_free() && entry.i_no == target_ino && entry.name() != "." && entry.name() != ".." {
                let mut s = arrayvec::ArrayString::new();
                let _ = s.try_push_str(entry.name());
                found = Some(s);
                true
            } else {
                false
            }
        });
        found.ok_or(KernelError::NoSuchFile)
    }

    /// `sys_readdir`'s sequential cursor read (spec §6 `readdir(dir)`): the
    /// next non-tombstoned entry at or past the byte offset `pos`, plus the
    /// offset to resume from next time. `None` once every entry slot has
    /// been visited. `pos` and the returned offset are both multiples of
    /// `DIR_ENTRY_SIZE`, the unit a `dirstream`'s cursor advances in.
    pub fn read_dir_entry_at(&self, dir_ino: InodeId, pos: u32) -> KResult<Option<(DirEntry, u32)>> {
        let state = self.state.lock();
        let dinode = inode::read_dinode(&self.disk, &state.sb, dir_ino);
        let lbas = inode::collect_block_lbas(&self.disk, &dinode);
        let total_entries = dinode.i_size as usize / DIR_ENTRY_SIZE;
        let mut index = pos as usize / DIR_ENTRY_SIZE;
        while index < total_entries {
            let block_idx = index / ENTRIES_PER_SECTOR;
            let slot_in_block = index % ENTRIES_PER_SECTOR;
            let lba = lbas.get(block_idx).copied().unwrap_or(0);
            index += 1;
            if lba == 0 {
                continue;
            }
            let mut sector = [0u8; SECTOR_SIZE];
            self.disk.read_sector(lba, &mut sector);
            let chunk = &sector[slot_in_block * DIR_ENTRY_SIZE..(slot_in_block + 1) * DIR_ENTRY_SIZE];
            let entry = DirEntry::read_from(chunk).expect("read_dir_entry_at: size mismatch");
            if !entry.is_free() {
                return Ok(Some((entry, (index * DIR_ENTRY_SIZE) as u32)));
            }
        }
        Ok(None)
    }

    fn for_each_dir_entry(&self, dinode: &Dinode, mut f: impl FnMut(&DirEntry) -> bool) {
        let lbas = inode::collect_block_lbas(&self.disk, dinode);
        let total_entries = dinode.i_size as usize / DIR_ENTRY_SIZE;
        let mut seen = 0usize;
        for &lba in lbas.iter() {
            if seen >= total_entries {
                break;
            }
            if lba == 0 {
                continue;
            }
            let mut sector = [0u8; SECTOR_SIZE];
            self.disk.read_sector(lba, &mut sector);
            for chunk in sector.chunks_exact(DIR_ENTRY_SIZE) {
                if seen >= total_entries {
                    break;
                }
                seen += 1;
                let entry = DirEntry::read_from(chunk).expect("for_each_dir_entry: size mismatch");
                if f(&entry) {
                    return;
                }
            }
        }
    }

    // ---- file data (spec §4.9) --------------------------------------------

    /// Reads up to `buf.len()` bytes starting at `pos`, short of EOF (spec
    /// §4.9 `file_read`). Holes (unallocated blocks within the file's
    /// current size, which cannot happen through this kernel's own write
    /// path but are tolerated defensively) read back as zero.
    pub fn file_read(&self, handle: InodeHandle, pos: u32, buf: &mut [u8]) -> KResult<usize> {
        let state = self.state.lock();
        let dinode = state.inodes[handle].dinode;
        if pos >= dinode.i_size {
            return Ok(0);
        }
        let to_read = buf.len().min((dinode.i_size - pos) as usize);
        let lbas = inode::collect_block_lbas(&self.disk, &dinode);
        let mut done = 0;
        while done < to_read {
            let file_off = pos as usize + done;
            let block_idx = file_off / SECTOR_SIZE;
            let block_off = file_off % SECTOR_SIZE;
            let mut sector = [0u8; SECTOR_SIZE];
            let lba = lbas[block_idx];
            if lba != 0 {
                self.disk.read_sector(lba, &mut sector);
            }
            let n = (SECTOR_SIZE - block_off).min(to_read - done);
            buf[done..done + n].copy_from_slice(&sector[block_off..block_off + n]);
            done += n;
        }
        Ok(done)
    }

    /// Writes `buf` at `pos`, allocating any missing blocks (including the
    /// single-indirect block, once `pos` crosses the 12-direct-block
    /// boundary) and growing `i_size` as needed (spec §4.9 `file_write`,
    /// §3 invariant 6: bounded by `MAX_FILE_SIZE`).
    pub fn file_write(&self, handle: InodeHandle, pos: u32, buf: &[u8]) -> KResult<usize> {
        let mut state = self.state.lock();
        let new_end = pos as usize + buf.len();
        if new_end > MAX_FILE_SIZE {
            return Err(KernelError::FileTooLarge);
        }
        let mut dinode = state.inodes[handle].dinode;
        let mut done = 0;
        while done < buf.len() {
            let file_off = pos as usize + done;
            let block_idx = file_off / SECTOR_SIZE;
            let block_off = file_off % SECTOR_SIZE;
            let lba = self.ensure_block(&mut state, &mut dinode, block_idx)?;
            let n = (SECTOR_SIZE - block_off).min(buf.len() - done);
            let mut sector = [0u8; SECTOR_SIZE];
            if block_off != 0 || n != SECTOR_SIZE {
                self.disk.read_sector(lba, &mut sector);
            }
            sector[block_off..block_off + n].copy_from_slice(&buf[done..done + n]);
            self.disk.write_sector(lba, &sector);
            done += n;
        }
        if new_end as u32 > dinode.i_size {
            dinode.i_size = new_end as u32;
        }
        inode::write_dinode(&self.disk, &state.sb, &dinode);
        state.inodes[handle].dinode = dinode;
        Ok(done)
    }

    fn ensure_block(&self, state: &mut PartitionState, dinode: &mut Dinode, block_idx: usize) -> KResult<u32> {
        if block_idx < DIRECT_BLOCKS {
            let existing = dinode.direct(block_idx);
            if existing != 0 {
                return Ok(existing);
            }
            let lba = self.alloc_block_locked(state)?;
            dinode.set_direct(block_idx, lba);
            Ok(lba)
        } else {
            let indirect_idx = block_idx - DIRECT_BLOCKS;
            if dinode.indirect_lba() == 0 {
                let ind_lba = self.alloc_block_locked(state)?;
                dinode.set_indirect_lba(ind_lba);
                inode::write_indirect(&self.disk, dinode, &[0u32; INDIRECT_BLOCKS]);
            }
            let mut indirect = inode::read_indirect(&self.disk, dinode);
            if indirect[indirect_idx] != 0 {
                return Ok(indirect[indirect_idx]);
            }
            let lba = self.alloc_block_locked(state)?;
            indirect[indirect_idx] = lba;
            inode::write_indirect(&self.disk, dinode, &indirect);
            Ok(lba)
        }
    }
}

/// Loads a bitmap region from disk, then marks every bit beyond
/// `valid_bits` permanently set so `scan`/`scan_and_set` never hand out an
/// index past the partition's real geometry — the in-memory bitmap's
/// capacity is a compile-time upper bound (`param::MAX_DATA_BLOCKS`/
/// `MAX_INODES`), but a given partition's super block may describe fewer.
fn load_bitmap<const N: usize>(disk: &PartitionDescriptor, lba: u32, sectors: u32, valid_bits: usize) -> Bitmap<N> {
    let mut bitmap: Bitmap<N> = Bitmap::new();
    {
        let bytes = bitmap.as_bytes_mut();
        let mut sector = [0u8; SECTOR_SIZE];
        for i in 0..sectors as usize {
            disk.read_sector(lba + i as u32, &mut sector);
            let start = i * SECTOR_SIZE;
            if start >= bytes.len() {
                break;
            }
            let end = (start + SECTOR_SIZE).min(bytes.len());
            bytes[start..end].copy_from_slice(&sector[..end - start]);
        }
    }
    for i in valid_bits..bitmap.capacity() {
        bitmap.set(i, true);
    }
    bitmap
}

fn write_bitmap(disk: &PartitionDescriptor, lba: u32, sectors: u32, bytes: &[u8]) {
    for i in 0..sectors as usize {
        let mut sector = [0u8; SECTOR_SIZE];
        let start = i * SECTOR_SIZE;
        if start < bytes.len() {
            let end = (start + SECTOR_SIZE).min(bytes.len());
            sector[..end - start].copy_from_slice(&bytes[start..end]);
        }
        disk.write_sector(lba + i as u32, &sector);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct RamDisk(StdMutex<Vec<[u8; SECTOR_SIZE]>>);

    impl crate::block::BlockDevice for RamDisk {
        fn read(&self, lba: u32, buf: &mut [u8], n: usize) {
            let sectors = self.0.lock().unwrap();
            for i in 0..n {
                buf[i * SECTOR_SIZE..(i + 1) * SECTOR_SIZE].copy_from_slice(&sectors[lba as usize + i]);
            }
        }
        fn write(&self, lba: u32, buf: &[u8], n: usize) {
            let mut sectors = self.0.lock().unwrap();
            for i in 0..n {
                sectors[lba as usize + i].copy_from_slice(&buf[i * SECTOR_SIZE..(i + 1) * SECTOR_SIZE]);
            }
        }
    }

    fn fresh_partition() -> Partition {
        let disk: &'static RamDisk = Box::leak(Box::new(RamDisk(StdMutex::new(vec![[0u8; SECTOR_SIZE]; 4096]))));
        let desc = PartitionDescriptor::new(disk, 0, 4096);
        Partition::format(desc, 512, 64).expect("format should succeed")
    }

    #[test]
    fn root_directory_has_dot_entries() {
        let part = fresh_partition();
        let root = part.root_ino();
        let (ino, ftype) = part.search_dir_entry(root, ".").unwrap();
        assert_eq!(ino, root);
        assert_eq!(ftype, FileType::Directory);
        let (parent_ino, _) = part.search_dir_entry(root, "..").unwrap();
        assert_eq!(parent_ino, root);
    }

    #[test]
    fn create_open_write_read_file() {
        let part = fresh_partition();
        let root = part.root_ino();
        let ino = part.alloc_inode().unwrap();
        part.sync_dir_entry(root, DirEntry::new("a.txt", ino, FileType::Regular).unwrap())
            .unwrap();
        let (found_ino, ftype) = part.search_dir_entry(root, "a.txt").unwrap();
        assert_eq!(found_ino, ino);
        assert_eq!(ftype, FileType::Regular);

        let handle = part.open_inode(ino).unwrap();
        let written = part.file_write(handle, 0, b"hello, file").unwrap();
        assert_eq!(written, b"hello, file".len());
        let mut buf = [0u8; 32];
        let read = part.file_read(handle, 0, &mut buf).unwrap();
        assert_eq!(&buf[..read], b"hello, file");
        part.close_inode(handle);
    }

    #[test]
    fn write_spans_multiple_blocks() {
        let part = fresh_partition();
        let ino = part.alloc_inode().unwrap();
        let handle = part.open_inode(ino).unwrap();
        let data = vec![0xABu8; SECTOR_SIZE * 3 + 10];
        part.file_write(handle, 0, &data).unwrap();
        let mut back = vec![0u8; data.len()];
        let n = part.file_read(handle, 0, &mut back).unwrap();
        assert_eq!(n, data.len());
        assert_eq!(back, data);
        part.close_inode(handle);
    }

    #[test]
    fn delete_dir_entry_makes_name_unresolvable() {
        let part = fresh_partition();
        let root = part.root_ino();
        let ino = part.alloc_inode().unwrap();
        part.sync_dir_entry(root, DirEntry::new("gone", ino, FileType::Regular).unwrap())
            .unwrap();
        part.delete_dir_entry(root, ino).unwrap();
        assert!(part.search_dir_entry(root, "gone").is_err());
    }

    #[test]
    fn delete_dir_entry_never_reclaims_the_first_block() {
        // The root directory's `.`/`..` live in block 0; emptying the rest
        // of that block's slots must not free it.
        let part = fresh_partition();
        let root = part.root_ino();
        let ino = part.alloc_inode().unwrap();
        part.sync_dir_entry(root, DirEntry::new("only", ino, FileType::Regular).unwrap())
            .unwrap();
        let size_before = {
            let state = part.state.lock();
            inode::read_dinode(&part.disk, &state.sb, root).i_size
        };
        part.delete_dir_entry(root, ino).unwrap();
        let dinode_after = {
            let state = part.state.lock();
            inode::read_dinode(&part.disk, &state.sb, root)
        };
        assert_eq!(dinode_after.i_size, size_before);
        assert_ne!(dinode_after.direct(0), 0);
    }

    #[test]
    fn delete_dir_entry_reclaims_an_emptied_later_block() {
        let part = fresh_partition();
        let root = part.root_ino();

        // Fill block 0's remaining slots (it starts with "." and ".."),
        // then add one more entry that has to spill into block 1.
        let remaining_in_block0 = ENTRIES_PER_SECTOR - 2;
        for i in 0..remaining_in_block0 {
            let ino = part.alloc_inode().unwrap();
            let name = format!("f{i}");
            part.sync_dir_entry(root, DirEntry::new(&name, ino, FileType::Regular).unwrap())
                .unwrap();
        }
        let spill_ino = part.alloc_inode().unwrap();
        part.sync_dir_entry(root, DirEntry::new("spill", spill_ino, FileType::Regular).unwrap())
            .unwrap();

        let size_before = {
            let state = part.state.lock();
            inode::read_dinode(&part.disk, &state.sb, root).i_size
        };

        part.delete_dir_entry(root, spill_ino).unwrap();

        let dinode_after = {
            let state = part.state.lock();
            inode::read_dinode(&part.disk, &state.sb, root)
        };
        assert_eq!(dinode_after.i_size, size_before - SECTOR_SIZE as u32);
        assert_eq!(dinode_after.direct(1), 0);
    }

    #[test]
    fn unlink_refused_while_open() {
        let part = fresh_partition();
        let ino = part.alloc_inode().unwrap();
        let handle = part.open_inode(ino).unwrap();
        assert!(part.is_open(ino));
        part.close_inode(handle);
        assert!(!part.is_open(ino));
    }
}
