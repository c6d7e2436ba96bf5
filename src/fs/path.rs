//! Path parsing and resolution (spec §4.9 "Path search record", `search_file`,
//! `path_parse`, `wash_path`).
//!
//! Grounded on this crate's earlier xv6-derived `Path`/`FileName` (a
//! `#[repr(transparent)]` view over an unsized `[u8]`, walked one
//! `skipelem()` at a time) but recast over fixed-size `ArrayString`/
//! `ArrayVec` storage the way `proc/pcb.rs` recasts `Proc::name` over a
//! fixed `[u8; N]` — there is no allocator here to back a DST.

use arrayvec::{ArrayString, ArrayVec};

use crate::errno::{KernelError, KResult};
use crate::fs::dir::FileType;
use crate::fs::inode::InodeId;
use crate::fs::Partition;
use crate::param::{MAX_FILE_NAME, MAX_PATH};

/// The most path components a `MAX_PATH`-byte path can hold, each separated
/// by at least one `/`.
pub const MAX_COMPONENTS: usize = MAX_PATH / 2;

/// One path component, bounded the same way a directory entry's filename is
/// (spec §3 "Directory entry").
pub type Component = ArrayString<MAX_FILE_NAME>;

/// `search_file`'s result (spec §3 "Path search record"): the directory the
/// last-resolved component lives in, what that component turned out to be
/// (or `None` if the leaf itself does not exist), and the component name
/// being searched for when resolution stopped.
pub struct SearchRecord {
    pub parent_ino: InodeId,
    pub found: Option<(InodeId, FileType)>,
    pub leaf_name: Component,
}

/// Normalizes `path`: collapses repeated slashes, drops `.` components, and
/// pops a trailing component for each `..`, always returning an absolute
/// path (spec §8 testable property 10: `wash_path(wash_path(p)) ==
/// wash_path(p)` — already-normalized input has no `.`/`..`/repeated
/// slashes left to remove, so a second pass is a no-op).
pub fn wash_path(path: &str) -> ArrayString<MAX_PATH> {
    let mut components: ArrayVec<Component, MAX_COMPONENTS> = ArrayVec::new();
    for part in path.split('/') {
        match part {
            "" | "." => continue,
            ".." => {
                components.pop();
            }
            name => {
                let mut comp = Component::new();
                let fits = &name[..name.len().min(comp.capacity())];
                let _ = comp.try_push_str(fits);
                if components.try_push(comp).is_err() {
                    break;
                }
            }
        }
    }
    let mut out = ArrayString::new();
    for comp in &components {
        let _ = out.try_push('/');
        let _ = out.try_push_str(comp.as_str());
    }
    if out.is_empty() {
        let _ = out.try_push('/');
    }
    out
}

/// Splits `path` into its components after washing it, so a leading `/`,
/// `/.`, or `/..` is always accepted as the root (spec §4.9 "Normalize
/// leading slashes... accept '/', '/.', '/..' as the root").
pub fn path_parse(path: &str) -> ArrayVec<Component, MAX_COMPONENTS> {
    let washed = wash_path(path);
    let mut out = ArrayVec::new();
    for part in washed.split('/') {
        if part.is_empty() {
            continue;
        }
        let mut comp = Component::new();
        let _ = comp.try_push_str(part);
        let _ = out.try_push(comp);
    }
    out
}

/// Resolves `path` against `cwd` (spec §4.9 `search_file`): walk one
/// component at a time, descending into subdirectories, and report either
/// the resolved leaf or the directory the missing component would have
/// lived in. An absolute path (leading `/`) starts from the partition's
/// root inode instead of `cwd`.
pub fn search_file(part: &Partition, path: &str, cwd: InodeId) -> KResult<SearchRecord> {
    let components = path_parse(path);
    let start = if path.starts_with('/') {
        part.root_ino()
    } else {
        cwd
    };

    if components.is_empty() {
        return Ok(SearchRecord {
            parent_ino: start,
            found: Some((start, FileType::Directory)),
            leaf_name: Component::new(),
        });
    }

    let mut current = start;
    let last = components.len() - 1;
    for (i, comp) in components.iter().enumerate() {
        match part.search_dir_entry(current, comp.as_str()) {
            Ok((i_no, file_type)) => {
                if i == last {
                    return Ok(SearchRecord {
                        parent_ino: current,
                        found: Some((i_no, file_type)),
                        leaf_name: *comp,
                    });
                }
                if file_type != FileType::Directory {
                    return Err(KernelError::NotADirectory);
                }
                current = i_no;
            }
            Err(_) if i == last => {
                return Ok(SearchRecord {
                    parent_ino: current,
                    found: None,
                    leaf_name: *comp,
                });
            }
            Err(e) => return Err(e),
        }
    }
    unreachable!("search_file: non-empty component list always returns from the loop")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wash_path_collapses_dots_and_slashes() {
        assert_eq!(wash_path("/a//b/./c").as_str(), "/a/b/c");
        assert_eq!(wash_path("/a/../b").as_str(), "/b");
        assert_eq!(wash_path("/").as_str(), "/");
        assert_eq!(wash_path("/.").as_str(), "/");
        assert_eq!(wash_path("/..").as_str(), "/");
    }

    #[test]
    fn wash_path_is_idempotent() {
        for p in ["/a/b/c", "/a/../b/./c", "/", "/x"] {
            let once = wash_path(p);
            let twice = wash_path(once.as_str());
            assert_eq!(once.as_str(), twice.as_str());
        }
    }

    #[test]
    fn path_parse_splits_components() {
        let comps = path_parse("/usr/bin/sh");
        assert_eq!(comps.len(), 3);
        assert_eq!(comps[0].as_str(), "usr");
        assert_eq!(comps[1].as_str(), "bin");
        assert_eq!(comps[2].as_str(), "sh");
    }

    #[test]
    fn path_parse_root_forms_are_empty() {
        assert!(path_parse("/").is_empty());
        assert!(path_parse("/.").is_empty());
        assert!(path_parse("/..").is_empty());
    }
}
