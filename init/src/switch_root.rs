//! Moving the process root from the initramfs onto persistent state.

use crate::error::{Error, Result};
use mount::{filesystem_magic, is_in_memory_magic};
use nix::mount::{mount, MsFlags};
use nix::unistd::{chdir, chroot};
use std::fs;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Kernel filesystems carried over to the new root.
pub const MOVED_MOUNTS: [&str; 4] = ["/dev", "/proc", "/sys", "/run"];

/// Directory that becomes `/`: `directory` inside the state mount.
pub fn new_root_path(state_root: &Path, directory: &str) -> PathBuf {
    let directory = directory.trim_start_matches('/');
    if directory.is_empty() {
        state_root.to_path_buf()
    } else {
        state_root.join(directory)
    }
}

/// Replace the process root with `directory` inside `state_root`.
///
/// Only valid while `/` is an in-memory filesystem. Not idempotent: the
/// caller must invoke it at most once per process.
pub fn switch_root(state_root: &Path, directory: &str, rm_usr: bool) -> Result<()> {
    let new_root = new_root_path(state_root, directory);

    let magic = filesystem_magic(Path::new("/"))?;
    if !is_in_memory_magic(magic) {
        return Err(Error::SwitchRoot {
            new_root,
            reason: format!("root filesystem is not in memory (magic {magic:#x})"),
        });
    }

    fs::create_dir_all(&new_root)?;
    if new_root != state_root {
        // MS_MOVE needs a mount point
        mount(
            Some(&new_root),
            &new_root,
            None::<&str>,
            MsFlags::MS_BIND,
            None::<&str>,
        )?;
    }

    for special in MOVED_MOUNTS {
        let source = Path::new(special);
        move_mount(source, &new_root.join(special.trim_start_matches('/')))?;
    }

    if rm_usr {
        remove_old_root(Path::new("/"), &[state_root]);
    }

    chdir(&new_root)?;
    mount(
        Some("."),
        "/",
        None::<&str>,
        MsFlags::MS_MOVE,
        None::<&str>,
    )
    .map_err(|e| Error::SwitchRoot {
        new_root: new_root.clone(),
        reason: format!("mount --move . /: {e}"),
    })?;
    chroot(".")?;
    chdir("/")?;

    info!(new_root = %new_root.display(), "Switched root");
    Ok(())
}

fn move_mount(source: &Path, target: &Path) -> Result<()> {
    fs::create_dir_all(target)?;
    if mount(
        Some(source),
        target,
        None::<&str>,
        MsFlags::MS_MOVE,
        None::<&str>,
    )
    .is_ok()
    {
        return Ok(());
    }

    debug!(source = %source.display(), "Move failed, binding instead");
    mount(
        Some(source),
        target,
        None::<&str>,
        MsFlags::MS_BIND | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(|e| Error::SwitchRoot {
        new_root: target.to_path_buf(),
        reason: format!("cannot carry over {}: {e}", source.display()),
    })
}

/// Top-level entries of `root` that may be deleted, skipping `keep`.
pub fn removable_entries(root: &Path, keep: &[&Path]) -> io::Result<Vec<PathBuf>> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(root)? {
        let path = entry?.path();
        if keep.iter().any(|k| path == *k || k.starts_with(&path)) {
            continue;
        }
        entries.push(path);
    }
    entries.sort();
    Ok(entries)
}

/// Delete `path` recursively without crossing onto other filesystems.
pub fn remove_tree(path: &Path, root_dev: u64) -> io::Result<()> {
    let meta = fs::symlink_metadata(path)?;
    if meta.dev() != root_dev {
        return Ok(());
    }
    if meta.is_dir() {
        for entry in fs::read_dir(path)? {
            remove_tree(&entry?.path(), root_dev)?;
        }
        // Still holds a mount point
        if let Err(e) = fs::remove_dir(path) {
            debug!(path = %path.display(), error = %e, "Directory kept");
        }
        Ok(())
    } else {
        fs::remove_file(path)
    }
}

/// Free the memory held by the old in-memory root.
fn remove_old_root(root: &Path, keep: &[&Path]) {
    let root_dev = match fs::symlink_metadata(root) {
        Ok(meta) => meta.dev(),
        Err(e) => {
            warn!(error = %e, "Cannot stat old root, keeping it");
            return;
        }
    };
    let entries = match removable_entries(root, keep) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(error = %e, "Cannot list old root, keeping it");
            return;
        }
    };
    for entry in entries {
        if let Err(e) = remove_tree(&entry, root_dev) {
            warn!(path = %entry.display(), error = %e, "Failed to remove old root entry");
        }
    }
    debug!("Removed old root userspace");
}
