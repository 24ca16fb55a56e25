/// Commit protocol: move a fully written staging file over the cached copy
use crate::config::types::{LaunchError, Result};
use log::warn;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::Path;

/// Platforms where an in-use destination may block rename but still accept
/// writes through a fresh handle.
pub const IN_PLACE_FALLBACK: bool = cfg!(windows);

/// Replace `dest` with `staging`.
///
/// The atomic rename is the normal path. When it fails and the platform
/// tolerates it, the destination is overwritten in place; that path is not
/// atomic and a concurrent reader may observe partial content.
pub fn replace(staging: &Path, dest: &Path) -> Result<()> {
    match fs::rename(staging, dest) {
        Ok(()) => Ok(()),
        Err(e) if IN_PLACE_FALLBACK => {
            warn!(
                "Atomic replace of {} failed ({}); overwriting in place",
                dest.display(),
                e
            );
            overwrite_in_place(staging, dest).map_err(|e| {
                warn!("In-place overwrite of {} failed: {}", dest.display(), e);
                LaunchError::ReplaceFailed {
                    path: dest.to_path_buf(),
                }
            })
        }
        Err(e) => {
            warn!("Atomic replace of {} failed: {}", dest.display(), e);
            Err(LaunchError::ReplaceFailed {
                path: dest.to_path_buf(),
            })
        }
    }
}

/// Stream `staging` over `dest` byte for byte, then drop the staging file.
pub fn overwrite_in_place(staging: &Path, dest: &Path) -> io::Result<()> {
    let mut src = File::open(staging)?;
    let mut out = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(dest)?;
    io::copy(&mut src, &mut out)?;
    out.sync_all()?;
    drop(src);
    fs::remove_file(staging)?;
    Ok(())
}
