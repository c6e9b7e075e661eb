//! The watch manager: keeps the recursive watch set in step with the
//! directory trees it covers.

use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::directory::{WatchDirectory, Wd, NULL_WD};
use crate::error::Fatal;
use crate::inotify::{Inotify, WatchMask};
use crate::scan;

/// Everything a watch reports: content changes plus the self events that
/// flag a watched directory being deleted or moved out from under us.
pub const WATCH_MASK: WatchMask = WatchMask::CLOSE_WRITE
    .union(WatchMask::CREATE)
    .union(WatchMask::DELETE)
    .union(WatchMask::MOVED_FROM)
    .union(WatchMask::MOVED_TO)
    .union(WatchMask::DELETE_SELF)
    .union(WatchMask::MOVE_SELF);

/// Owns the inotify instance, the watch-descriptor directory and the exclude
/// list, and keeps the three consistent while directories come and go.
pub struct WatchTree {
    inotify: Inotify,
    directory: WatchDirectory,
    excludes: Vec<PathBuf>,
}

impl WatchTree {
    /// Creates an empty watch set over `inotify`, skipping any path one of
    /// the `excludes` is a prefix of.
    pub fn new(inotify: Inotify, excludes: Vec<PathBuf>) -> WatchTree {
        WatchTree {
            inotify,
            directory: WatchDirectory::new(),
            excludes,
        }
    }

    /// The inotify instance, mainly for polling its descriptor.
    pub fn inotify(&self) -> &Inotify {
        &self.inotify
    }

    /// Read access to the descriptor store.
    pub fn directory(&self) -> &WatchDirectory {
        &self.directory
    }

    /// Watches `path` and, recursively, every directory below it.
    ///
    /// Returns `false` when the root of the subtree was skipped: excluded,
    /// already watched, or gone/unreadable by the time we got here. The
    /// latter two are races we tolerate — a directory that vanished between
    /// scan and watch will come back to us through a later MOVED_TO or
    /// CREATE event if it still exists anywhere under a watched root.
    ///
    /// The recursion is a worklist, not the call stack, so pathologically
    /// deep trees only cost heap.
    pub fn watch_tree(&mut self, parent_wd: Wd, path: &Path) -> Result<bool, Fatal> {
        let Some(root_wd) = self.watch_one(parent_wd, path)? else {
            return Ok(false);
        };

        let mut worklist = vec![(root_wd, path.to_path_buf())];
        while let Some((wd, dir)) = worklist.pop() {
            let children = scan::list_sub_dirs(&dir).map_err(|source| Fatal::Scan {
                path: dir.clone(),
                source,
            })?;
            for name in children {
                let child = dir.join(&name);
                if let Some(child_wd) = self.watch_one(wd, &child)? {
                    worklist.push((child_wd, child));
                }
            }
        }

        Ok(true)
    }

    /// Registers a single watch and records it. `None` means skipped.
    fn watch_one(&mut self, parent_wd: Wd, path: &Path) -> Result<Option<Wd>, Fatal> {
        if let Some(exclude) = self.matching_exclude(path) {
            info!(
                "excluding path {} ({})",
                path.display(),
                exclude.display()
            );
            return Ok(None);
        }

        let existing = self.directory.find_wd(path);
        if existing != NULL_WD {
            info!("already watching {} wd={existing}", path.display());
            return Ok(None);
        }

        debug!("watching {}", path.display());
        let wd = match self.inotify.add_watch(path, WATCH_MASK) {
            Ok(wd) => wd,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                info!("ignoring missing directory {}", path.display());
                return Ok(None);
            }
            Err(error) if error.kind() == io::ErrorKind::PermissionDenied => {
                info!("ignoring directory (access denied) {}", path.display());
                return Ok(None);
            }
            Err(source) => {
                return Err(Fatal::AddWatch {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        // The kernel deduplicates watches by inode, so getting back a wd we
        // already track means the directory was renamed while watched: the
        // wd is still good but every recorded path below it is stale. Drop
        // the stale subtree from the store, and the stale kernel watches
        // below it, before recording the new path. The watch behind `wd`
        // itself must survive — it is the watch we just confirmed.
        if self.directory.exists(wd) {
            warn!(
                "wd exists for new watch, pruning it {wd}, {}",
                path.display()
            );
            let pruned = self.directory.prune(wd);
            self.remove_kernel_watches(pruned.iter().skip(1).copied())?;
        }

        self.directory.add(wd, parent_wd, path.to_path_buf());
        Ok(Some(wd))
    }

    /// Drops the subtree rooted at `wd` from the store and retires every
    /// kernel watch in it.
    pub fn unwatch_subtree(&mut self, wd: Wd) -> Result<(), Fatal> {
        let pruned = self.directory.prune(wd);
        self.remove_kernel_watches(pruned.into_iter())
    }

    /// Forgets a single descriptor the kernel has already retired.
    pub fn forget(&mut self, wd: Wd) {
        self.directory.remove(wd);
    }

    fn remove_kernel_watches(&self, wds: impl Iterator<Item = Wd>) -> Result<(), Fatal> {
        for wd in wds {
            match self.inotify.rm_watch(wd) {
                Ok(()) => {}
                // Already gone: the kernel got there first.
                Err(error) if error.raw_os_error() == Some(libc::EINVAL) => {}
                Err(source) => return Err(Fatal::RemoveWatch { wd, source }),
            }
        }
        Ok(())
    }

    fn matching_exclude(&self, path: &Path) -> Option<&Path> {
        let candidate = path.as_os_str().as_bytes();
        self.excludes
            .iter()
            .find(|exclude| candidate.starts_with(exclude.as_os_str().as_bytes()))
            .map(PathBuf::as_path)
    }
}
