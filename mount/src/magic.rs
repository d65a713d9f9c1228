//! Filesystem magic numbers used to detect an in-memory root.

use crate::error::Result;
use std::path::Path;

/// `statfs` magic of tmpfs.
pub const TMPFS_MAGIC: i64 = 0x0102_1994;

/// `statfs` magic of ramfs.
pub const RAMFS_MAGIC: i64 = 0x8584_58f6;

/// Whether a filesystem magic belongs to an in-memory filesystem.
pub fn is_in_memory_magic(magic: i64) -> bool {
    magic == TMPFS_MAGIC || magic == RAMFS_MAGIC
}

/// Filesystem magic of the filesystem holding `path`.
pub fn filesystem_magic(path: &Path) -> Result<i64> {
    let stat = nix::sys::statfs::statfs(path)?;
    Ok(stat.filesystem_type().0 as i64)
}
