// storage/lock.rs
// Advisory directory lock backed by the owner-write permission bit.
//
// The lock coordinates a bulk scan against concurrent writers: it is coarse
// and advisory, not a mutex. A scan over a locked directory follows the
// unlock -> list -> re-lock protocol; correctness for mutations comes from
// re-reading a fresh listing immediately before touching a specific file.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::trace;

use crate::error::Result;

use super::io::list_dir;

/// Remove the owner write permission, marking the directory locked.
pub fn lock_dir(path: &Path) -> Result<()> {
    set_writable(path, false)
}

/// Restore the owner write permission.
pub fn unlock_dir(path: &Path) -> Result<()> {
    set_writable(path, true)
}

/// Inspect the permission bits to decide whether the directory is locked.
pub fn is_dir_locked(path: &Path) -> Result<bool> {
    let perms = fs::metadata(path)?.permissions();

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        Ok(perms.mode() & 0o200 == 0)
    }

    #[cfg(not(unix))]
    {
        Ok(perms.readonly())
    }
}

/// List a directory honoring the lock protocol: if the directory is locked,
/// unlock it for the duration of the listing and re-lock afterwards.
pub fn list_dir_locked(path: &Path) -> Result<Vec<PathBuf>> {
    if is_dir_locked(path)? {
        trace!(dir = %path.display(), "unlocking directory for listing");
        unlock_dir(path)?;
        let entries = list_dir(path);
        lock_dir(path)?;
        entries
    } else {
        list_dir(path)
    }
}

fn set_writable(path: &Path, writable: bool) -> Result<()> {
    let mut perms = fs::metadata(path)?.permissions();

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = perms.mode();
        let new_mode = if writable { mode | 0o200 } else { mode & !0o200 };
        perms.set_mode(new_mode);
    }

    #[cfg(not(unix))]
    {
        perms.set_readonly(!writable);
    }

    fs::set_permissions(path, perms)?;
    Ok(())
}
