//! Scoped mount that is released when dropped.

use crate::error::Result;
use crate::{resolve_and_mount, Mounter};
use std::path::{Path, PathBuf};

/// A mount that is unmounted on drop.
///
/// Created with [`MountGuard::mount`]; call [`MountGuard::unmount`] to
/// observe the unmount result instead of only logging it.
pub struct MountGuard<'a> {
    mounter: &'a dyn Mounter,
    target: PathBuf,
    mounted: bool,
}

impl<'a> MountGuard<'a> {
    /// Resolve and mount `spec` on `target`, returning a guard for it.
    pub fn mount(
        mounter: &'a dyn Mounter,
        name: &str,
        spec: &str,
        fs_type: &str,
        target: impl Into<PathBuf>,
    ) -> Result<Self> {
        let target = target.into();
        resolve_and_mount(mounter, name, spec, fs_type, &target)?;
        Ok(Self {
            mounter,
            target,
            mounted: !spec.is_empty(),
        })
    }

    /// Mount point held by this guard.
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Unmount now and report the result.
    pub fn unmount(mut self) -> Result<()> {
        self.mounted = false;
        self.mounter.unmount(&self.target)
    }
}

impl Drop for MountGuard<'_> {
    fn drop(&mut self) {
        if !self.mounted {
            return;
        }
        if let Err(e) = self.mounter.unmount(&self.target) {
            tracing::warn!(
                target_path = %self.target.display(),
                error = %e,
                "Failed to unmount on drop"
            );
        }
    }
}
