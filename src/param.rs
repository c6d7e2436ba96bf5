//! Kernel tunables. Collected in one place the way `kernel-rs/src/param.rs`
//! does, so every size limit the spec fixes has exactly one name.

/// PCB pool size: the PID range is `[1, NPROC]`, PID 0 is reserved (spec §4.3).
pub const NPROC: usize = 64;

/// Local FD table size per process. Slots 0, 1, 2 are reserved for
/// stdin/stdout/stderr (spec §3, §4.9).
pub const NOFILE: usize = 16;

/// Size of the global open-file table (spec §3 "Global open-file table").
pub const NFILE: usize = 128;

/// Size of the in-memory inode pool (spec §4.7 "Open").
pub const NINODE: usize = 64;

/// Sector size in bytes, fixed by the ATA/IDE block device contract (spec §6).
pub const SECTOR_SIZE: usize = 512;

/// File system block size. One block is one sector (spec §6: "block size: 512 bytes").
pub const BLOCK_SIZE: usize = SECTOR_SIZE;

/// Bits per sector/block, used by bitmap-to-sector arithmetic. Spec §9(ii)
/// flags the original kernel's use of a bare `4096` here as a latent bug:
/// it is only correct for 512-byte sectors because `512 * 8 == 4096`. We
/// name the invariant instead of hardcoding the coincidence.
pub const BITS_PER_SECTOR: usize = SECTOR_SIZE * 8;

/// Direct block pointers per inode (spec §3 "Inode (on disk)").
pub const DIRECT_BLOCKS: usize = 12;

/// Block pointers held in one single-indirect block: one sector of `u32` LBAs.
pub const INDIRECT_BLOCKS: usize = SECTOR_SIZE / core::mem::size_of::<u32>();

/// Maximum blocks (and therefore max file size in bytes) addressable by one inode.
pub const MAX_FILE_BLOCKS: usize = DIRECT_BLOCKS + INDIRECT_BLOCKS;

/// Maximum file size in bytes (spec §3: "max file bytes = 140 × 512 = 71 680").
pub const MAX_FILE_SIZE: usize = MAX_FILE_BLOCKS * BLOCK_SIZE;

/// Maximum number of inodes a partition can hold; also the bound on inode
/// numbers (spec §7 assertion: "inode number < 4096").
pub const MAX_INODES: usize = 4096;

/// Bytes in a directory-entry filename, including the NUL terminator (spec §3).
pub const MAX_FILE_NAME: usize = 16;

/// Maximum absolute path length the path-resolution helpers accept.
pub const MAX_PATH: usize = 128;

/// Maximum length of a thread/process name (spec §3 PCB "name" field).
pub const MAX_PROC_NAME: usize = 16;

/// Maximum `argv` entries `exec` accepts (spec §6 `execv(path, argv)`).
pub const MAX_ARG: usize = 16;

/// Keyboard ring buffer capacity (spec §6: "bufsize = 64"; confirmed by
/// `original_source/device/ioqueue.h`).
pub const KEYBOARD_BUF_SIZE: usize = 64;

/// Pipe ring buffer capacity. Not fixed by the spec; sized the way
/// `kaist-cp-rv6/kernel-rs/src/pipe.rs`'s `PIPESIZE` is.
pub const PIPE_BUF_SIZE: usize = 512;

/// PID reserved for the `init` thread, which adopts orphaned children
/// (spec §4.5 "Reparent surviving children to init").
pub const INIT_PID: u32 = 1;

/// Fixed PCB stack sentinel written at the top of every PCB page, checked on
/// every context switch (spec §3 "integrity", §5 "Stack-overflow detection").
pub const STACK_MAGIC: u32 = 0x1987_0916;

/// Super block magic number (spec §3, §6).
pub const SUPERBLOCK_MAGIC: u32 = 0x1959_0318;

/// Number of syscall numbers the dispatch table is indexed by (spec §6).
pub const NR_SYSCALLS: usize = 26;

/// Upper bound on data blocks a partition this kernel mounts can hold. The
/// spec leaves a partition's total size open ("total sectors" is a runtime
/// superblock field, §3); a real kernel would size the in-memory block
/// bitmap to match the superblock it reads at boot, but a fixed const-sized
/// `Bitmap` needs a compile-time bound, so this caps how large a partition
/// `mkfs` may describe.
pub const MAX_DATA_BLOCKS: usize = 65536;

/// Bytes backing the in-memory block bitmap (spec §3 "Frame pool"-style
/// bitmap, one bit per data block).
pub const BLOCK_BITMAP_BYTES: usize = MAX_DATA_BLOCKS / 8;

/// Bytes backing the in-memory inode bitmap; one sector for `MAX_INODES`
/// inodes (spec §6: "1 sector suffices for 4096 inodes").
pub const INODE_BITMAP_BYTES: usize = MAX_INODES / 8;

static_assertions::const_assert_eq!(INODE_BITMAP_BYTES, SECTOR_SIZE);

/// Maximum number of partitions the boot-time discovery can register (spec
/// §4.6 "linked into a global list").
pub const MAX_PARTITIONS: usize = 4;

/// Default time-slice granularity: a thread's `priority` doubles as both
/// scheduling weight and slice length in ticks (spec §4.3).
pub const DEFAULT_PRIORITY: i32 = 1;

/// Fixed pool of pipe buffers (spec §6 `pipe(fd[2])`). Not itself fixed by
/// the spec; sized the way `NFILE`/`NINODE` cap their own pools.
pub const MAX_PIPES: usize = 16;

/// Fixed pool of open directory streams backing `sys_opendir`/`sys_readdir`
/// (spec §6 `opendir, closedir, readdir, rewinddir`). Sized the way
/// `MAX_PIPES` caps its own pool rather than by anything the spec fixes.
pub const MAX_DIR_STREAMS: usize = 16;

/// Top of user space: every process's stack grows down from here, and it is
/// also the kernel/user split point in every page directory (spec §4.2
/// "kernel half... shared across every address space", §4.5 exec "`ESP =
/// 0xC0000000`"). Confirmed by `original_source/userprog/exec.c`'s
/// `intr_0_stack->esp = (void*) 0xc0000000`.
pub const USER_STACK_TOP: usize = 0xC000_0000;

/// PDE index of [`USER_STACK_TOP`]: every PDE at or above this index belongs
/// to the kernel half of the address space and is shared, never copied or
/// freed per-process (spec §4.2, §4.5 exit "walk the user half of the page
/// directory").
pub const KERNEL_SPLIT_PDE: usize = USER_STACK_TOP >> 22;
