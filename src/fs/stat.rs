//! `sys_stat`'s result record (spec §4.9 "sys_stat... As named, each
//! resolving via `search_file`"). Deliberately smaller than this crate's
//! earlier xv6-derived `Stat`: no `dev`/`nlink` fields, since this file
//! system has one partition mounted at a time and no hard links (spec §1
//! Non-goals: "hard-link counts").

use crate::fs::inode::InodeId;
use crate::fs::FileType;

#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct Stat {
    pub ino: InodeId,
    pub file_type: FileType,
    pub size: u32,
}
