#![deny(missing_docs)]

//! Recursive inotify directory watcher.
//!
//! # About
//!
//! dirnotify watches a configured set of directory trees through the Linux
//! kernel's [inotify] API and, for every burst of filesystem events, writes
//! one durable notification file listing the parent directories whose
//! contents changed. A sibling process consumes those files; this crate only
//! produces them.
//!
//! The moving parts, bottom up:
//!
//! - [`Inotify`] — thin safe wrapper around the inotify syscalls.
//! - [`Events`] — iterator over the events of one `read(2)` burst.
//! - [`WatchDirectory`] — the store mapping each watch descriptor to its
//!   parent descriptor and the absolute path it watches.
//! - [`WatchTree`] — the watch manager: recursive registration, exclude
//!   prefixes, and the pruning that keeps the store honest across renames
//!   and deletions.
//! - [`Dispatcher`] — classifies each event and applies it to the tree and
//!   the batch.
//! - [`NotifyDir`] — the batch emitter; writes `temp` and renames it to a
//!   sequentially numbered notification file.
//! - [`Daemon`] — owns all of the above and runs the poll loop.
//!
//! # Attention: inotify gotchas
//!
//! inotify deduplicates watches by inode and keeps delivering events under
//! descriptors whose recorded paths may have gone stale. The watch manager
//! exists to repair exactly that: see [`WatchTree::watch_tree`] and
//! [`WatchTree::unwatch_subtree`] for how subtree moves are handled.
//!
//! [inotify]: https://en.wikipedia.org/wiki/Inotify

mod config;
mod daemon;
mod directory;
mod dispatch;
mod error;
mod events;
mod inotify;
mod notify;
mod scan;
mod tree;

pub use config::{load_excludes, load_watch_roots, Args, Config};
pub use daemon::{install_sigterm_handler, Daemon};
pub use directory::{WatchDirectory, Wd, NULL_WD};
pub use dispatch::Dispatcher;
pub use error::Fatal;
pub use events::{Event, EventMask, Events, EVENT_BUFFER_LEN};
pub use inotify::{Inotify, WatchMask};
pub use notify::{write_error, NotifyDir};
pub use scan::list_sub_dirs;
pub use tree::{WatchTree, WATCH_MASK};
