//! Free space gate run before the firmware download

use std::io;
use std::path::Path;

use sysinfo::Disks;
use tracing::{debug, info};

use crate::error::UpdateError;

/// Source of free space figures for the device filesystem
pub trait FilesystemStats: Send + Sync {
    /// Free space available to the updater below `path`, in kB
    fn available_kb(&self, path: &Path) -> io::Result<u64>;
}

/// Free space as reported by the operating system
///
/// Picks the mounted disk whose mount point is the longest prefix of the
/// canonicalised path.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemDiskStats;

impl FilesystemStats for SystemDiskStats {
    fn available_kb(&self, path: &Path) -> io::Result<u64> {
        let path = path.canonicalize()?;
        let disks = Disks::new_with_refreshed_list();

        let disk = disks
            .list()
            .iter()
            .filter(|disk| path.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no mounted disk contains {}", path.display()),
                )
            })?;

        debug!(
            mount = %disk.mount_point().display(),
            available = disk.available_space(),
            "Resolved disk for free space check"
        );
        Ok(disk.available_space() / 1024)
    }
}

/// Fixed free space figure, for tests and for devices that report it elsewhere
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedFreeSpace(pub u64);

impl FilesystemStats for FixedFreeSpace {
    fn available_kb(&self, _path: &Path) -> io::Result<u64> {
        Ok(self.0)
    }
}

/// Fail when the filesystem below `root` has less than `required_kb` free
///
/// A requirement of 0 means the manifest declared none, and the check is
/// skipped without querying the filesystem.
///
/// # Errors
///
/// Returns [`UpdateError::InsufficientSpace`] when free space is strictly
/// less than required, or [`UpdateError::Io`] if the query fails.
pub fn check_free_space(
    required_kb: u64,
    stats: &dyn FilesystemStats,
    root: &Path,
) -> Result<(), UpdateError> {
    if required_kb == 0 {
        debug!("No free space requirement declared, skipping check");
        return Ok(());
    }

    let available_kb = stats.available_kb(root)?;
    if available_kb < required_kb {
        return Err(UpdateError::InsufficientSpace {
            required_kb,
            available_kb,
        });
    }

    info!("Free space OK: {available_kb} kB available, {required_kb} kB required");
    Ok(())
}
