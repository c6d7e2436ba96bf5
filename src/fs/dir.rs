//! Directory entries and layer (spec §4.8 C11): entries packed into
//! sector-aligned blocks, never crossing a sector boundary.

use zerocopy::{AsBytes, FromBytes};

use crate::errno::KernelError;
use crate::param::{MAX_FILE_NAME, SECTOR_SIZE};

use super::inode::InodeId;

/// A directory entry's file type (spec §3 "Directory entry": `f_type ∈
/// {UNKNOWN=0, REGULAR, DIRECTORY}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Unknown,
    Regular,
    Directory,
}

impl FileType {
    fn from_raw(raw: u32) -> Self {
        match raw {
            1 => FileType::Regular,
            2 => FileType::Directory,
            _ => FileType::Unknown,
        }
    }

    fn to_raw(self) -> u32 {
        match self {
            FileType::Unknown => 0,
            FileType::Regular => 1,
            FileType::Directory => 2,
        }
    }
}

pub const DIR_ENTRY_SIZE: usize = core::mem::size_of::<DirEntry>();
pub const ENTRIES_PER_SECTOR: usize = SECTOR_SIZE / DIR_ENTRY_SIZE;

static_assertions::const_assert!(ENTRIES_PER_SECTOR * DIR_ENTRY_SIZE <= SECTOR_SIZE);
static_assertions::const_assert!(ENTRIES_PER_SECTOR > 0);

/// `{ filename[16], i_no, f_type }` (spec §3 "Directory entry"). Fixed-size
/// and `u32`-aligned throughout so `entries_per_sector = 512 / entry_size`
/// divides evenly enough that no entry ever crosses a sector boundary (spec
/// §8 testable property 5).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, AsBytes, FromBytes)]
pub struct DirEntry {
    filename: [u8; MAX_FILE_NAME],
    pub i_no: u32,
    f_type: u32,
}

impl DirEntry {
    pub fn new(name: &str, i_no: InodeId, file_type: FileType) -> Result<Self, KernelError> {
        let bytes = name.as_bytes();
        if bytes.len() >= MAX_FILE_NAME {
            return Err(KernelError::NameTooLong);
        }
        let mut filename = [0u8; MAX_FILE_NAME];
        filename[..bytes.len()].copy_from_slice(bytes);
        Ok(Self {
            filename,
            i_no,
            f_type: file_type.to_raw(),
        })
    }

    /// A free slot is one with `f_type == UNKNOWN` (spec §3).
    pub fn is_free(&self) -> bool {
        self.file_type() == FileType::Unknown
    }

    pub fn file_type(&self) -> FileType {
        FileType::from_raw(self.f_type)
    }

    pub fn name(&self) -> &str {
        let len = self
            .filename
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.filename.len());
        core::str::from_utf8(&self.filename[..len]).unwrap_or("?")
    }

    pub fn name_matches(&self, name: &str) -> bool {
        self.name() == name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_slot_round_trips() {
        let free = DirEntry::default();
        assert!(free.is_free());
        let used = DirEntry::new("a", 3, FileType::Regular).unwrap();
        assert!(!used.is_free());
        assert_eq!(used.name(), "a");
        assert_eq!(used.i_no, 3);
        assert_eq!(used.file_type(), FileType::Regular);
    }

    #[test]
    fn name_too_long_is_rejected() {
        let long = "a".repeat(MAX_FILE_NAME);
        assert!(DirEntry::new(&long, 1, FileType::Regular).is_err());
    }
}
