//! One-time partition formatter (spec §6 disk layout, grounded on
//! `original_source/fs/mkfs.c`'s `partition_format`): lays down a super
//! block, zeroed block/inode bitmaps, an empty inode table, and a root
//! directory inode whose data block already holds `.`/`..` pointing at
//! itself.

use zerocopy::AsBytes;

use crate::block::PartitionDescriptor;
use crate::param::SECTOR_SIZE;

use super::dir::{DirEntry, FileType, DIR_ENTRY_SIZE};
use super::inode::{self, Dinode, DINODE_SIZE};
use super::superblock::Superblock;

/// Formats `disk` as a fresh partition with `data_sectors` data blocks and
/// room for `inode_count` inodes. Discards anything previously on `disk`.
pub fn format(disk: &PartitionDescriptor, data_sectors: u32, inode_count: u32) {
    let mut sb = Superblock::new(data_sectors, inode_count, DINODE_SIZE as u32, DIR_ENTRY_SIZE as u32);

    zero_region(disk, sb.block_bitmap_lba, sb.block_bitmap_sectors);
    zero_region(disk, sb.inode_bitmap_lba, sb.inode_bitmap_sectors);
    zero_region(disk, sb.inode_table_lba, sb.inode_table_sectors);

    // The root inode is always inode 0, and always owns data block 0 — the
    // first bit of each bitmap is claimed for it directly rather than going
    // through `Partition::alloc_inode`/`alloc_block`, since no `Partition`
    // exists yet to claim them through.
    sb.root_inode_no = 0;
    mark_bit(disk, sb.inode_bitmap_lba, 0);
    mark_bit(disk, sb.block_bitmap_lba, 0);

    let root_data_lba = sb.data_start_lba;
    let mut root = Dinode::empty(sb.root_inode_no);
    root.set_direct(0, root_data_lba);
    root.i_size = SECTOR_SIZE as u32;
    inode::write_dinode(disk, &sb, &root);

    let mut block = [0u8; SECTOR_SIZE];
    let dot = DirEntry::new(".", sb.root_inode_no, FileType::Directory).expect("\".\" fits MAX_FILE_NAME");
    let dotdot = DirEntry::new("..", sb.root_inode_no, FileType::Directory).expect("\"..\" fits MAX_FILE_NAME");
    block[..DIR_ENTRY_SIZE].copy_from_slice(dot.as_bytes());
    block[DIR_ENTRY_SIZE..DIR_ENTRY_SIZE * 2].copy_from_slice(dotdot.as_bytes());
    disk.write_sector(root_data_lba, &block);

    sb.write(disk);
}

fn zero_region(disk: &PartitionDescriptor, lba: u32, sectors: u32) {
    let zero = [0u8; SECTOR_SIZE];
    for i in 0..sectors {
        disk.write_sector(lba + i, &zero);
    }
}

/// Sets a single bit within a bitmap region without needing the in-memory
/// `Bitmap<N>` this crate uses everywhere else — at format time there is no
/// mounted `Partition` to own one yet.
fn mark_bit(disk: &PartitionDescriptor, region_lba: u32, bit: usize) {
    let sector_idx = bit / (SECTOR_SIZE * 8);
    let bit_in_sector = bit % (SECTOR_SIZE * 8);
    let mut sector = [0u8; SECTOR_SIZE];
    disk.read_sector(region_lba + sector_idx as u32, &mut sector);
    sector[bit_in_sector / 8] |= 1 << (bit_in_sector % 8);
    disk.write_sector(region_lba + sector_idx as u32, &sector);
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

    #[test]
    fn formatted_partition_has_valid_superblock_and_root() {
        let disk: &'static RamDisk = Box::leak(Box::new(RamDisk(StdMutex::new(vec![[0u8; SECTOR_SIZE]; 2048]))));
        let part = PartitionDescriptor::new(disk, 0, 2048);
        format(&part, 256, 64);

        let sb = Superblock::read(&part).expect("mkfs should leave a valid super block");
        assert_eq!(sb.root_inode_no, 0);

        let root = inode::read_dinode(&part, &sb, sb.root_inode_no);
        assert_eq!(root.i_size as usize, SECTOR_SIZE);
        assert_eq!(root.direct(0), sb.data_start_lba);
    }
}
