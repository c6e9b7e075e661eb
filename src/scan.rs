//! Listing the directories immediately under a path.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::Path;

use log::{info, warn};

/// Returns the names of the immediate sub-directories of `path`.
///
/// A path that has disappeared or turned out not to be a directory is an
/// expected race with the filesystem and yields an empty list; any other
/// failure is the caller's problem. Entry order is whatever the kernel
/// returns.
pub fn list_sub_dirs(path: &Path) -> io::Result<Vec<OsString>> {
    let entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(error) if error.kind() == io::ErrorKind::NotFound => {
            info!("ignoring missing directory {}", path.display());
            return Ok(Vec::new());
        }
        Err(error) if error.raw_os_error() == Some(libc::ENOTDIR) => {
            info!("not a directory {}", path.display());
            return Ok(Vec::new());
        }
        Err(error) => return Err(error),
    };

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry?;
        match entry.file_type() {
            // Exact directory type only; symlinks to directories don't count.
            Ok(file_type) if file_type.is_dir() => names.push(entry.file_name()),
            Ok(_) => {}
            Err(error) => {
                warn!(
                    "cannot determine type of {}: {error}",
                    entry.path().display()
                );
            }
        }
    }

    Ok(names)
}
