//! Thin safe wrapper around the kernel's inotify API.

use std::ffi::CString;
use std::io;
use std::mem;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::Path;

use inotify_sys as ffi;
use libc::{c_void, size_t};
use log::warn;

use crate::directory::Wd;
use crate::events::Events;

bitflags::bitflags! {
    /// Which changes a watch reports, as passed to `inotify_add_watch`.
    #[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Clone, Copy)]
    pub struct WatchMask: u32 {
        /// File opened for writing was closed
        const CLOSE_WRITE = ffi::IN_CLOSE_WRITE;

        /// File/directory created in watched directory
        const CREATE = ffi::IN_CREATE;

        /// File/directory deleted from watched directory
        const DELETE = ffi::IN_DELETE;

        /// Watched file/directory was itself deleted
        const DELETE_SELF = ffi::IN_DELETE_SELF;

        /// File moved out of watched directory
        const MOVED_FROM = ffi::IN_MOVED_FROM;

        /// File moved into watched directory
        const MOVED_TO = ffi::IN_MOVED_TO;

        /// Watched file/directory was itself moved
        const MOVE_SELF = ffi::IN_MOVE_SELF;
    }
}

/// An inotify instance.
///
/// Owns the file descriptor; the descriptor is closed on drop. The wrapper
/// adheres to the underlying API closely: each method maps to one syscall
/// and returns its error untranslated.
#[derive(Debug)]
pub struct Inotify {
    fd: RawFd,
}

impl Inotify {
    /// Creates an inotify instance via `inotify_init1`.
    ///
    /// `IN_CLOEXEC` is always passed so the descriptor does not leak into
    /// processes we spawn. The descriptor stays blocking: the daemon only
    /// reads after `poll` reported it ready.
    pub fn init() -> io::Result<Inotify> {
        let fd = unsafe { ffi::inotify_init1(ffi::IN_CLOEXEC) };
        match fd {
            -1 => Err(io::Error::last_os_error()),
            _ => Ok(Inotify { fd }),
        }
    }

    /// Adds or updates a watch for `path`.
    ///
    /// The kernel deduplicates watches by inode: adding a watch for a path
    /// that resolves to an already-watched inode returns the existing
    /// descriptor. Callers who track descriptors must be prepared for that
    /// (see the watch manager's duplicate handling).
    pub fn add_watch(&self, path: &Path, mask: WatchMask) -> io::Result<Wd> {
        let path = CString::new(path.as_os_str().as_bytes())?;

        let wd = unsafe { ffi::inotify_add_watch(self.fd, path.as_ptr() as *const _, mask.bits()) };

        match wd {
            -1 => Err(io::Error::last_os_error()),
            _ => Ok(wd),
        }
    }

    /// Removes a watch. `EINVAL` means the kernel already dropped the
    /// descriptor; callers decide whether that is worth reporting.
    pub fn rm_watch(&self, wd: Wd) -> io::Result<()> {
        let result = unsafe { ffi::inotify_rm_watch(self.fd, wd) };
        match result {
            0 => Ok(()),
            _ => Err(io::Error::last_os_error()),
        }
    }

    /// Reads one burst of events into `buffer` and returns an iterator over
    /// them.
    ///
    /// Performs a single `read(2)`. The buffer must be large enough for at
    /// least one maximal event (header + NAME_MAX); the daemon uses 64 KiB.
    /// A read shorter than a bare event header yields an empty iterator —
    /// the kernel only writes complete events, so the remainder of such a
    /// read is nothing at all.
    pub fn read_events<'a>(&self, buffer: &'a mut [u8]) -> io::Result<Events<'a>> {
        let num_bytes = unsafe {
            ffi::read(
                self.fd,
                buffer.as_mut_ptr() as *mut c_void,
                buffer.len() as size_t,
            )
        };

        let num_bytes = match num_bytes {
            0 => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "read from inotify fd returned 0",
                ));
            }
            -1 => {
                let error = io::Error::last_os_error();
                if error.kind() == io::ErrorKind::WouldBlock {
                    return Ok(Events::new(buffer, 0));
                }
                return Err(error);
            }
            _ => num_bytes as usize,
        };

        if num_bytes < mem::size_of::<ffi::inotify_event>() {
            warn!("short read on inotify ({num_bytes} bytes)");
            return Ok(Events::new(buffer, 0));
        }

        Ok(Events::new(buffer, num_bytes))
    }
}

impl AsRawFd for Inotify {
    #[inline]
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for Inotify {
    fn drop(&mut self) {
        unsafe {
            ffi::close(self.fd);
        }
    }
}
