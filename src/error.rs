use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::directory::Wd;

/// Conditions the daemon does not try to recover from.
///
/// Everything here terminates the process. The supervisor restarts the
/// daemon, which rebuilds the watch map from scratch, so the only thing that
/// matters about a `Fatal` is which distinguished exit code it maps to:
/// [`Fatal::QueueOverflow`] tells the supervisor events were lost and a full
/// rescan is required, while the remaining variants indicate configuration or
/// I/O trouble.
#[derive(Debug, Error)]
pub enum Fatal {
    /// `inotify_init1` failed; nothing can be watched.
    #[error("inotify_init: {0}")]
    Init(#[source] io::Error),

    /// `inotify_add_watch` failed for a reason other than the tolerated
    /// ENOENT/EACCES races.
    #[error("inotify_add_watch {}: {source}", .path.display())]
    AddWatch {
        /// Directory the watch was being added for.
        path: PathBuf,
        /// The kernel's verdict.
        source: io::Error,
    },

    /// `inotify_rm_watch` failed with something other than EINVAL.
    #[error("inotify_rm_watch failed {wd}: {source}")]
    RemoveWatch {
        /// Descriptor being removed.
        wd: Wd,
        /// The kernel's verdict.
        source: io::Error,
    },

    /// `read` on the inotify descriptor failed.
    #[error("read(inotify fd): {0}")]
    ReadEvents(#[source] io::Error),

    /// The kernel only writes complete events into the buffer; a short tail
    /// means we mismanaged the cursor, not that the read was unlucky.
    #[error("invalid event structure at offset {offset}: need {need} bytes, have {have}")]
    MalformedEvent {
        /// Cursor position the violation was detected at.
        offset: usize,
        /// Bytes the next event would have required.
        need: usize,
        /// Bytes actually remaining in the buffer.
        have: usize,
    },

    /// The kernel dropped events; the watch map can no longer be trusted.
    #[error("Inotify queue overflow")]
    QueueOverflow,

    /// Two consecutive MOVED_FROM events carried the same cookie.
    #[error("cookie {0} from IN_MOVED_TO present")]
    CookieReplayed(u32),

    /// The kernel delivered an event for a descriptor we never recorded.
    #[error("unable to find parent for wd {wd} event {mask:#010x} at {name}")]
    UnknownWatch {
        /// The unrecognized descriptor.
        wd: Wd,
        /// Raw event mask, for the post-mortem.
        mask: u32,
        /// Child entry name carried by the event, if any.
        name: String,
    },

    /// Listing a directory's children failed hard.
    #[error("scanning {}: {source}", .path.display())]
    Scan {
        /// Directory being scanned.
        path: PathBuf,
        /// The underlying failure.
        source: io::Error,
    },

    /// A configuration file could not be read.
    #[error("reading {}: {source}", .path.display())]
    Config {
        /// The unreadable file.
        path: PathBuf,
        /// The underlying failure.
        source: io::Error,
    },

    /// Writing or renaming a notification file failed.
    #[error("writing notification {}: {source}", .path.display())]
    Notify {
        /// The file being produced.
        path: PathBuf,
        /// The underlying failure.
        source: io::Error,
    },

    /// `poll` failed with something other than EINTR.
    #[error("poll: {0}")]
    Poll(#[source] io::Error),

    /// Installing the SIGTERM handler failed.
    #[error("signal(SIGTERM): {0}")]
    Signal(#[source] io::Error),
}

impl Fatal {
    /// Process exit code reported for this failure.
    ///
    /// The values are arbitrary but stable and distinct, so a supervisor can
    /// react differently to lost events (queue overflow) than to
    /// configuration or I/O failures.
    pub fn exit_code(&self) -> i32 {
        match self {
            Fatal::Init(_) => 2,
            Fatal::AddWatch { .. } => 3,
            Fatal::RemoveWatch { .. } => 4,
            Fatal::ReadEvents(_) => 5,
            Fatal::MalformedEvent { .. } => 6,
            Fatal::Scan { .. } => 7,
            Fatal::Config { .. } => 8,
            Fatal::Notify { .. } => 9,
            Fatal::Poll(_) => 10,
            Fatal::Signal(_) => 11,
            Fatal::QueueOverflow => 16,
            Fatal::CookieReplayed(_) => 17,
            Fatal::UnknownWatch { .. } => 19,
        }
    }
}
