//! Inode layer (spec §4.7 C10): on-disk layout, locate/open/close/sync/
//! release.
//!
//! Grounded on this crate's earlier xv6-derived inode split between a
//! `Dinode` (on-disk, zerocopy `AsBytes`/`FromBytes`) and an in-memory
//! `Inode` that layers bookkeeping on top, but the pool here is a fixed
//! `NINODE`-sized array checked for uniqueness by linear scan (spec §4.7
//! "for a given (partition, i_no) at most one in-memory inode exists")
//! rather than an arena with reference counting — the same translation
//! `proc/pcb.rs` makes for the PCB table (spec §9's note on recasting
//! intrusive/arena structures as fixed arrays with stable indices).

use zerocopy::{AsBytes, FromBytes};

use crate::param::{DIRECT_BLOCKS, INDIRECT_BLOCKS, SECTOR_SIZE};

use super::superblock::Superblock;
use crate::block::PartitionDescriptor;

/// Identifies one inode within the mounted partition by its on-disk inode
/// number (spec §3 "Inode (on disk)" `i_no`). This kernel mounts a single
/// partition at a time (spec §9's design note on `current_partition`), so
/// `i_no` alone names an inode.
pub type InodeId = u32;

/// Total entries in `Dinode::i_sectors`: 12 direct pointers plus the one
/// indirect-block pointer (spec §3).
pub const SECTORS_FIELD_LEN: usize = DIRECT_BLOCKS + 1;

pub const DINODE_SIZE: usize = core::mem::size_of::<Dinode>();

/// On-disk inode (spec §3 "Inode (on disk)"): `i_sectors[0..12]` are direct
/// data-block LBAs, `i_sectors[12]` is the LBA of a single-indirect block
/// holding 128 more LBAs.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, AsBytes, FromBytes)]
pub struct Dinode {
    pub i_no: u32,
    pub i_size: u32,
    pub i_sectors: [u32; SECTORS_FIELD_LEN],
}

impl Dinode {
    pub const fn empty(i_no: InodeId) -> Self {
        Self {
            i_no,
            i_size: 0,
            i_sectors: [0; SECTORS_FIELD_LEN],
        }
    }

    pub fn direct(&self, i: usize) -> u32 {
        self.i_sectors[i]
    }

    pub fn set_direct(&mut self, i: usize, lba: u32) {
        self.i_sectors[i] = lba;
    }

    pub fn indirect_lba(&self) -> u32 {
        self.i_sectors[DIRECT_BLOCKS]
    }

    pub fn set_indirect_lba(&mut self, lba: u32) {
        self.i_sectors[DIRECT_BLOCKS] = lba;
    }
}

/// In-memory inode (spec §3 "In-memory inode": "Adds `open_count`,
/// `write_deny`, open-list hook"). The "open-list hook" becomes plain array
/// membership: a slot with `open_count == 0` is free.
#[derive(Debug, Clone, Copy)]
pub struct Inode {
    pub dinode: Dinode,
    pub open_count: u32,
    pub write_deny: bool,
}

impl Inode {
    pub const fn empty() -> Self {
        Self {
            dinode: Dinode::empty(0),
            open_count: 0,
            write_deny: false,
        }
    }

    pub fn i_no(&self) -> InodeId {
        self.dinode.i_no
    }

    pub fn is_free(&self) -> bool {
        self.open_count == 0
    }
}

/// `sec_lba = inode_table_lba + (k*sizeof(inode))/512`,
/// `off = (k*sizeof(inode))%512` (spec §4.7 "Locate").
fn locate(sb: &Superblock, ino: InodeId) -> (u32, usize) {
    let byte_off = ino as usize * DINODE_SIZE;
    let sec_lba = sb.inode_table_lba + (byte_off / SECTOR_SIZE) as u32;
    let off = byte_off % SECTOR_SIZE;
    (sec_lba, off)
}

/// Reads the on-disk inode numbered `ino`, splicing two sectors together if
/// it straddles a sector boundary (spec §4.7 "If `512-off < sizeof(inode)`,
/// the inode spans two sectors; read/write two consecutive sectors and
/// splice").
pub fn read_dinode(part: &PartitionDescriptor, sb: &Superblock, ino: InodeId) -> Dinode {
    let (sec_lba, off) = locate(sb, ino);
    let mut raw = [0u8; DINODE_SIZE];
    if SECTOR_SIZE - off >= DINODE_SIZE {
        let mut sector = [0u8; SECTOR_SIZE];
        part.read_sector(sec_lba, &mut sector);
        raw.copy_from_slice(&sector[off..off + DINODE_SIZE]);
    } else {
        let mut s0 = [0u8; SECTOR_SIZE];
        let mut s1 = [0u8; SECTOR_SIZE];
        part.read_sector(sec_lba, &mut s0);
        part.read_sector(sec_lba + 1, &mut s1);
        let first = SECTOR_SIZE - off;
        raw[..first].copy_from_slice(&s0[off..]);
        raw[first..].copy_from_slice(&s1[..DINODE_SIZE - first]);
    }
    Dinode::read_from(&raw[..]).expect("read_dinode: size mismatch")
}

/// Writes `dinode` back to its on-disk slot, splicing across sectors the
/// same way `read_dinode` does.
pub fn write_dinode(part: &PartitionDescriptor, sb: &Superblock, dinode: &Dinode) {
    let (sec_lba, off) = locate(sb, dinode.i_no);
    let raw = dinode.as_bytes();
    if SECTOR_SIZE - off >= DINODE_SIZE {
        let mut sector = [0u8; SECTOR_SIZE];
        part.read_sector(sec_lba, &mut sector);
        sector[off..off + DINODE_SIZE].copy_from_slice(raw);
        part.write_sector(sec_lba, &sector);
    } else {
        let mut s0 = [0u8; SECTOR_SIZE];
        let mut s1 = [0u8; SECTOR_SIZE];
        part.read_sector(sec_lba, &mut s0);
        part.read_sector(sec_lba + 1, &mut s1);
        let first = SECTOR_SIZE - off;
        s0[off..].copy_from_slice(&raw[..first]);
        s1[..DINODE_SIZE - first].copy_from_slice(&raw[first..]);
        part.write_sector(sec_lba, &s0);
        part.write_sector(sec_lba + 1, &s1);
    }
}

/// Reads the 128 LBAs held in `dinode`'s single-indirect block, or all
/// zeroes if no indirect block has been allocated yet.
pub fn read_indirect(part: &PartitionDescriptor, dinode: &Dinode) -> [u32; INDIRECT_BLOCKS] {
    let mut out = [0u32; INDIRECT_BLOCKS];
    let lba = dinode.indirect_lba();
    if lba == 0 {
        return out;
    }
    let mut sector = [0u8; SECTOR_SIZE];
    part.read_sector(lba, &mut sector);
    for (i, chunk) in sector.chunks_exact(4).enumerate() {
        out[i] = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    out
}

/// Writes `lbas` to `dinode`'s indirect block. The indirect block's own LBA
/// must already be allocated and set on `dinode`.
pub fn write_indirect(part: &PartitionDescriptor, dinode: &Dinode, lbas: &[u32; INDIRECT_BLOCKS]) {
    let lba = dinode.indirect_lba();
    debug_assert_ne!(lba, 0, "write_indirect: no indirect block allocated");
    let mut sector = [0u8; SECTOR_SIZE];
    for (i, value) in lbas.iter().enumerate() {
        sector[i * 4..i * 4 + 4].copy_from_slice(&value.to_le_bytes());
    }
    part.write_sector(lba, &sector);
}

/// Every data-block LBA this inode currently has allocated, direct blocks
/// first then indirect (spec §4.8 "collect all 140 potential block LBAs");
/// unallocated slots read back as `0`.
pub fn collect_block_lbas(
    part: &PartitionDescriptor,
    dinode: &Dinode,
) -> [u32; crate::param::MAX_FILE_BLOCKS] {
    let mut out = [0u32; crate::param::MAX_FILE_BLOCKS];
    for i in 0..DIRECT_BLOCKS {
        out[i] = dinode.direct(i);
    }
    let indirect = read_indirect(part, dinode);
    out[DIRECT_BLOCKS..].copy_from_slice(&indirect);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disk() -> &'static dyn crate::block::BlockDevice {
        use std::sync::Mutex;
        struct RamDisk(Mutex<Vec<[u8; SECTOR_SIZE]>>);
        impl crate::block::BlockDevice for RamDisk {
            fn read(&self, lba: u32, buf: &mut [u8], n: usize) {
                let sectors = self.0.lock().unwrap();
                for i in 0..n {
                    buf[i * SECTOR_SIZE..(i + 1) * SECTOR_SIZE]
                        .copy_from_slice(&sectors[lba as usize + i]);
                }
            }
            fn write(&self, lba: u32, buf: &[u8], n: usize) {
                let mut sectors = self.0.lock().unwrap();
                for i in 0..n {
                    sectors[lba as usize + i]
                        .copy_from_slice(&buf[i * SECTOR_SIZE..(i + 1) * SECTOR_SIZE]);
                }
            }
        }
        let disk: &'static RamDisk = Box::leak(Box::new(RamDisk(Mutex::new(vec![[0u8; SECTOR_SIZE]; 64]))));
        disk
    }

    #[test]
    fn dinode_round_trips_unaligned() {
        let part = crate::block::PartitionDescriptor::new(disk(), 0, 64);
        let sb = Superblock::new(16, 4, DINODE_SIZE as u32, 24);
        // Force an inode number whose byte offset does not land on a sector
        // boundary, so the splice path is exercised.
        let ino = (SECTOR_SIZE / DINODE_SIZE) as u32 + 1;
        let mut dinode = Dinode::empty(ino);
        dinode.i_size = 12345;
        dinode.set_direct(0, 99);
        write_dinode(&part, &sb, &dinode);
        let back = read_dinode(&part, &sb, ino);
        assert_eq!(back.i_size, 12345);
        assert_eq!(back.direct(0), 99);
        assert_eq!(back.i_no, ino);
    }

    #[test]
    fn indirect_block_round_trips() {
        let part = crate::block::PartitionDescriptor::new(disk(), 0, 64);
        let sb = Superblock::new(16, 4, DINODE_SIZE as u32, 24);
        let mut dinode = Dinode::empty(0);
        dinode.set_indirect_lba(sb.data_start_lba);
        let mut lbas = [0u32; INDIRECT_BLOCKS];
        lbas[0] = 7;
        lbas[5] = 42;
        write_indirect(&part, &dinode, &lbas);
        let back = read_indirect(&part, &dinode);
        assert_eq!(back[0], 7);
        assert_eq!(back[5], 42);
        assert_eq!(back[1], 0);
    }
}
