//! Post-install removal of stale paths

use std::io;
use std::path::Path;

use tokio::fs;
use tracing::debug;

use crate::error::UpdateError;
use crate::extract::relative_path;

/// Remove a file or directory tree below `root`
///
/// Returns `Ok(false)` when nothing existed at the path. Symlinks are removed
/// themselves, never followed.
///
/// # Errors
///
/// Returns [`UpdateError::Config`] for an empty path or one escaping `root`,
/// and [`UpdateError::Io`] if the removal fails.
pub async fn remove_path_recursive(root: &Path, rel: &str) -> Result<bool, UpdateError> {
    let normalised = relative_path(Path::new(rel.trim_start_matches('/')))
        .map_err(UpdateError::Config)?;
    if normalised.is_empty() {
        return Err(UpdateError::Config(format!(
            "refusing to delete `{rel}`: it names the update root"
        )));
    }

    let target = root.join(&normalised);
    let metadata = match fs::symlink_metadata(&target).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("{normalised} already absent");
            return Ok(false);
        }
        Err(e) => return Err(e.into()),
    };

    let removed = if metadata.is_dir() {
        fs::remove_dir_all(&target).await
    } else {
        fs::remove_file(&target).await
    };

    match removed {
        Ok(()) => {
            debug!("Removed {normalised}");
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}
