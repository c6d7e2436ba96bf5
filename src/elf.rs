//! 32-bit i386 ELF executable header (spec §4.5, §6: "validates... the ELF
//! magic number, `e_type == ET_EXEC`, `e_machine == EM_386`, `e_version ==
//! EV_CURRENT`, and `e_phnum <= 1024`").
//!
//! This kernel's target is a 32-bit protected-mode machine, not the riscv64
//! target `kaist-cp-rv6` boots on, so every field here is `u32`/`u16` rather
//! than the 64-bit widths an `Elf64_Ehdr` would use — `zerocopy`'s
//! `AsBytes`/`FromBytes` read the header straight out of the file's first
//! bytes the same way `fs/inode.rs`'s `Dinode` reads straight off disk.

use zerocopy::{AsBytes, FromBytes};

/// `e_ident[EI_MAG0..EI_MAG3]` plus `EI_CLASS = ELFCLASS32`, `EI_DATA =
/// ELFDATA2LSB`, `EI_VERSION = EV_CURRENT`: `\x7fELF\x01\x01\x01`.
pub const ELF_MAGIC: [u8; 7] = [0x7f, b'E', b'L', b'F', 0x01, 0x01, 0x01];

/// `e_type` values (spec §6); only `ET_EXEC` is accepted.
pub const ET_EXEC: u16 = 2;

/// `e_machine` value for Intel 80386.
pub const EM_386: u16 = 3;

/// `e_version`/`EI_VERSION` value.
pub const EV_CURRENT: u32 = 1;

/// Hard bound on `e_phnum` (spec §6 "phnum <= 1024").
pub const MAX_PHNUM: u16 = 1024;

/// `e_ident` is 16 bytes; only the first 7 are checked, the rest
/// (`EI_OSABI`, `EI_ABIVERSION`, padding) are read but ignored.
pub const EI_NIDENT: usize = 16;

/// 32-bit ELF file header (`Elf32_Ehdr`).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, AsBytes, FromBytes)]
pub struct ElfHdr {
    pub e_ident: [u8; EI_NIDENT],
    pub e_type: u16,
    pub e_machine: u16,
    pub e_version: u32,
    pub e_entry: u32,
    pub e_phoff: u32,
    pub e_shoff: u32,
    pub e_flags: u32,
    pub e_ehsize: u16,
    pub e_phentsize: u16,
    pub e_phnum: u16,
    pub e_shentsize: u16,
    pub e_shnum: u16,
    pub e_shstrndx: u16,
}

pub const ELF_HDR_SIZE: usize = core::mem::size_of::<ElfHdr>();

impl ElfHdr {
    /// Every header-level check spec §4.5/§6 lists, short of actually
    /// reading program headers. `phentsize` is checked against this crate's
    /// own `ProgHdr` size rather than trusting the file, since a mismatched
    /// size would otherwise desync every subsequent program-header read.
    pub fn validate(&self) -> bool {
        self.e_ident[..ELF_MAGIC.len()] == ELF_MAGIC
            && self.e_type == ET_EXEC
            && self.e_machine == EM_386
            && self.e_version == EV_CURRENT
            && self.e_phnum <= MAX_PHNUM
            && self.e_phentsize as usize == PROG_HDR_SIZE
    }
}

/// `Elf32_Phdr`: one program (segment) header.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, AsBytes, FromBytes)]
pub struct ProgHdr {
    pub p_type: u32,
    pub p_offset: u32,
    pub p_vaddr: u32,
    pub p_paddr: u32,
    pub p_filesz: u32,
    pub p_memsz: u32,
    pub p_flags: u32,
    pub p_align: u32,
}

pub const PROG_HDR_SIZE: usize = core::mem::size_of::<ProgHdr>();

/// `p_type` values; only `PT_LOAD` segments are mapped by `exec` (spec §4.5).
pub const PT_LOAD: u32 = 1;

bitflags::bitflags! {
    /// `p_flags` bits: readable/writable/executable, for completeness —
    /// this kernel maps every `PT_LOAD` segment read-write-user regardless,
    /// the same simplification `original_source/kernel/exec.c` makes.
    pub struct ProgFlags: u32 {
        const EXEC  = 1;
        const WRITE = 2;
        const READ  = 4;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_header_passes() {
        let mut hdr = ElfHdr::default();
        hdr.e_ident[..ELF_MAGIC.len()].copy_from_slice(&ELF_MAGIC);
        hdr.e_type = ET_EXEC;
        hdr.e_machine = EM_386;
        hdr.e_version = EV_CURRENT;
        hdr.e_phnum = 2;
        hdr.e_phentsize = PROG_HDR_SIZE as u16;
        assert!(hdr.validate());
    }

    #[test]
    fn wrong_machine_is_rejected() {
        let mut hdr = ElfHdr::default();
        hdr.e_ident[..ELF_MAGIC.len()].copy_from_slice(&ELF_MAGIC);
        hdr.e_type = ET_EXEC;
        hdr.e_machine = 0x3e; // EM_X86_64
        hdr.e_version = EV_CURRENT;
        hdr.e_phentsize = PROG_HDR_SIZE as u16;
        assert!(!hdr.validate());
    }

    #[test]
    fn phnum_over_limit_is_rejected() {
        let mut hdr = ElfHdr::default();
        hdr.e_ident[..ELF_MAGIC.len()].copy_from_slice(&ELF_MAGIC);
        hdr.e_type = ET_EXEC;
        hdr.e_machine = EM_386;
        hdr.e_version = EV_CURRENT;
        hdr.e_phentsize = PROG_HDR_SIZE as u16;
        hdr.e_phnum = MAX_PHNUM + 1;
        assert!(!hdr.validate());
    }

    #[test]
    fn bad_magic_is_rejected() {
        let hdr = ElfHdr::default();
        assert!(!hdr.validate());
    }
}
