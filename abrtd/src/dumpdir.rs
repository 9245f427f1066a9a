// SPDX-License-Identifier: GPL-2.0-or-later

//! Spool quota helpers: recursive directory sizing and largest-sibling
//! lookup, grounded on the source's `get_dirsize_find_largest_dir`. Kept
//! separate from [`crate::spool`] because both the scanner and its tests
//! want these as small, independently-checkable functions rather than
//! folded into the inotify callback.

use std::fs;
use std::path::{Path, PathBuf};

/// Recursively sums the apparent size (in bytes) of every regular file
/// under `root`. Symlinks are not followed; unreadable entries are skipped
/// rather than failing the whole walk, mirroring the source's tolerance of
/// a dump directory disappearing mid-scan (another actor may be deleting it
/// concurrently).
pub fn dir_size_bytes(root: &Path) -> u64 {
    let mut total = 0u64;
    let Ok(entries) = fs::read_dir(root) else {
        return 0;
    };
    for entry in entries.flatten() {
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_symlink() {
            continue;
        } else if file_type.is_dir() {
            total += dir_size_bytes(&entry.path());
        } else if let Ok(meta) = entry.metadata() {
            total += meta.len();
        }
    }
    total
}

/// Total size of `root`'s immediate directory children, in mebibytes.
pub fn total_size_mib(root: &Path) -> u64 {
    dir_size_bytes(root) / (1024 * 1024)
}

/// Finds the largest immediate subdirectory of `root`, excluding `exclude`
/// (the just-arrived directory, which the scanner must never evict while
/// processing its own event).
pub fn find_largest_sibling(root: &Path, exclude: &str) -> Option<PathBuf> {
    let entries = fs::read_dir(root).ok()?;
    let mut best: Option<(u64, PathBuf)> = None;
    for entry in entries.flatten() {
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if !file_type.is_dir() {
            continue;
        }
        if entry.file_name() == exclude {
            continue;
        }
        let size = dir_size_bytes(&entry.path());
        if best.as_ref().is_none_or(|(best_size, _)| size > *best_size) {
            best = Some((size, entry.path()));
        }
    }
    best.map(|(_, path)| path)
}

/// Deletes a dump directory from disk. The "and delete any database record"
/// half of the source's `delete_dump_dir` is MiddleWare's responsibility
/// (see `crate::middleware`); this only tears down the on-disk half, which
/// both the scanner and report workers need regardless of MiddleWare state.
pub fn delete_dump_dir(path: &Path) -> std::io::Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dir_size_sums_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a"), vec![0u8; 10]).unwrap();
        let sub = dir.path().join("sub");
        fs::create_dir(&sub).unwrap();
        fs::write(sub.join("b"), vec![0u8; 20]).unwrap();
        assert_eq!(dir_size_bytes(dir.path()), 30);
    }

    #[test]
    fn find_largest_sibling_excludes_arrival() {
        let dir = tempfile::tempdir().unwrap();
        let small = dir.path().join("small");
        let big = dir.path().join("big");
        let newest = dir.path().join("newest");
        fs::create_dir(&small).unwrap();
        fs::create_dir(&big).unwrap();
        fs::create_dir(&newest).unwrap();
        fs::write(small.join("f"), vec![0u8; 10]).unwrap();
        fs::write(big.join("f"), vec![0u8; 1000]).unwrap();
        fs::write(newest.join("f"), vec![0u8; 5000]).unwrap();

        let worst = find_largest_sibling(dir.path(), "newest").unwrap();
        assert_eq!(worst.file_name().unwrap(), "big");
    }

    #[test]
    fn delete_dump_dir_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("gone");
        fs::create_dir(&target).unwrap();
        delete_dump_dir(&target).unwrap();
        assert!(!target.exists());
        delete_dump_dir(&target).unwrap();
    }
}
