//! Turns one burst of kernel events into watch-set updates and batch
//! entries.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::directory::NULL_WD;
use crate::error::Fatal;
use crate::events::{Event, EventMask, Events};
use crate::notify::NotifyDir;
use crate::tree::WatchTree;

/// Drains event bursts and applies them.
///
/// The only state that survives a drain is the cookie of the last move
/// event: `MOVED_FROM` and `MOVED_TO` pair up through it, and a `MOVED_FROM`
/// re-using the previous cookie means our ordering assumptions broke.
pub struct Dispatcher {
    prev_cookie: u32,
}

impl Dispatcher {
    /// Creates a dispatcher with no move in flight.
    pub fn new() -> Dispatcher {
        Dispatcher { prev_cookie: 0 }
    }

    /// Processes every event of one read-burst, in kernel order, then
    /// flushes the batch.
    ///
    /// Each event's parent directory is resolved through the store; runs of
    /// events for the same wd (the common case) resolve it once. Events
    /// that survive classification contribute that parent path to the
    /// batch.
    pub fn drain(
        &mut self,
        tree: &mut WatchTree,
        events: Events,
        notify: &mut NotifyDir,
    ) -> Result<(), Fatal> {
        let mut prev_wd = NULL_WD;
        let mut parent_path: Option<PathBuf> = None;

        for event in events {
            let event = event?;

            if event.wd != prev_wd {
                parent_path = tree
                    .directory()
                    .find_path(event.wd)
                    .map(Path::to_path_buf);
                prev_wd = event.wd;
            }

            debug!(
                "{:05} event {:#010x} {} {} at {} parent {}",
                event.wd,
                event.mask.bits(),
                event.mask.kind_name(),
                event.cookie,
                event
                    .name
                    .map_or_else(|| "*noname*".into(), |name| name.to_string_lossy()),
                parent_path
                    .as_deref()
                    .map_or_else(|| "*none*".to_string(), |path| path.display().to_string()),
            );

            if event.mask.contains(EventMask::Q_OVERFLOW) {
                // Events have been lost; only a full rescan can recover.
                return Err(Fatal::QueueOverflow);
            } else if event.mask.contains(EventMask::CREATE | EventMask::ISDIR) {
                let child = child_path(&event, parent_path.as_deref())?;
                if !tree.watch_tree(event.wd, &child)? {
                    // Skipped: excluded, already watched, or gone again.
                    continue;
                }
            } else if event.mask.contains(EventMask::DELETE_SELF) {
                // The parent's DELETE covers this. Deleting a top-level
                // root goes unreported.
                continue;
            } else if event.mask.contains(EventMask::MOVE_SELF) {
                // Covered by MOVED_FROM / MOVED_TO on the parent.
                continue;
            } else if event.mask.contains(EventMask::MOVED_FROM) {
                if event.cookie == self.prev_cookie {
                    return Err(Fatal::CookieReplayed(self.prev_cookie));
                }
                self.prev_cookie = event.cookie;

                if event.mask.contains(EventMask::ISDIR) {
                    let moved = child_path(&event, parent_path.as_deref())?;
                    let moved_wd = tree.directory().find_wd(&moved);
                    // No wd for the moved directory: it was created and
                    // renamed before we got around to watching it.
                    if moved_wd != NULL_WD {
                        tree.unwatch_subtree(moved_wd)?;
                    }
                }
            } else if event.mask.contains(EventMask::MOVED_TO) {
                if event.cookie != self.prev_cookie {
                    // No matching MOVED_FROM: the move came from somewhere
                    // we are not watching.
                    info!(
                        "cookie {} from IN_MOVED_FROM absent {} {} {}",
                        event.cookie,
                        self.prev_cookie,
                        parent_path
                            .as_deref()
                            .map_or_else(|| "*none*".to_string(), |p| p.display().to_string()),
                        event
                            .name
                            .map_or_else(|| "*noname*".into(), |name| name.to_string_lossy()),
                    );
                }
                self.prev_cookie = event.cookie;

                if event.mask.contains(EventMask::ISDIR) {
                    // Treat as an add and build a whole new watch subtree;
                    // the old one went away with the MOVED_FROM.
                    let child = child_path(&event, parent_path.as_deref())?;
                    tree.watch_tree(event.wd, &child)?;
                }
            } else if event.mask.contains(EventMask::IGNORED) {
                // The kernel retired this descriptor; stop carrying it.
                debug!("ignored event, removing wd {}", event.wd);
                tree.forget(event.wd);
                continue;
            }

            let parent = parent_path
                .as_deref()
                .ok_or_else(|| unknown_watch(&event))?;
            notify.record(parent);
        }

        notify.flush()?;
        Ok(())
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Dispatcher::new()
    }
}

fn child_path(event: &Event, parent: Option<&Path>) -> Result<PathBuf, Fatal> {
    let parent = parent.ok_or_else(|| unknown_watch(event))?;
    Ok(parent.join(event.name.unwrap_or(OsStr::new(""))))
}

fn unknown_watch(event: &Event) -> Fatal {
    Fatal::UnknownWatch {
        wd: event.wd,
        mask: event.mask.bits(),
        name: event
            .name
            .map_or_else(|| "*noname*".to_string(), |name| name.to_string_lossy().into_owned()),
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use inotify_sys as ffi;

    use super::Dispatcher;
    use crate::directory::NULL_WD;
    use crate::error::Fatal;
    use crate::events::tests::push_event;
    use crate::events::Events;
    use crate::inotify::Inotify;
    use crate::notify::NotifyDir;
    use crate::tree::WatchTree;

    struct Fixture {
        tree: WatchTree,
        notify: NotifyDir,
        root: PathBuf,
        _watched: tempfile::TempDir,
        _notify_dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let watched = tempfile::tempdir().unwrap();
        let notify_dir = tempfile::tempdir().unwrap();
        let mut tree = WatchTree::new(Inotify::init().unwrap(), Vec::new());
        let root = watched.path().to_path_buf();
        assert!(tree.watch_tree(NULL_WD, &root).unwrap());
        Fixture {
            tree,
            notify: NotifyDir::new(notify_dir.path()),
            root,
            _watched: watched,
            _notify_dir: notify_dir,
        }
    }

    #[test]
    fn queue_overflow_is_fatal() {
        let mut fixture = fixture();
        let mut buffer = Vec::new();
        push_event(&mut buffer, -1, ffi::IN_Q_OVERFLOW, 0, b"");

        let events = Events::new(&buffer, buffer.len());
        let result = Dispatcher::new().drain(&mut fixture.tree, events, &mut fixture.notify);

        assert!(matches!(result, Err(Fatal::QueueOverflow)));
    }

    #[test]
    fn replayed_move_cookie_is_fatal() {
        let mut fixture = fixture();
        let root_wd = fixture.tree.directory().find_wd(&fixture.root);

        let mut buffer = Vec::new();
        push_event(&mut buffer, root_wd, ffi::IN_MOVED_FROM, 41, b"a");
        push_event(&mut buffer, root_wd, ffi::IN_MOVED_FROM, 41, b"b");

        let events = Events::new(&buffer, buffer.len());
        let result = Dispatcher::new().drain(&mut fixture.tree, events, &mut fixture.notify);

        assert!(matches!(result, Err(Fatal::CookieReplayed(41))));
    }

    #[test]
    fn event_for_an_unknown_wd_is_fatal() {
        let mut fixture = fixture();
        let mut buffer = Vec::new();
        push_event(&mut buffer, 9999, ffi::IN_CLOSE_WRITE, 0, b"somefile");

        let events = Events::new(&buffer, buffer.len());
        let result = Dispatcher::new().drain(&mut fixture.tree, events, &mut fixture.notify);

        assert!(matches!(result, Err(Fatal::UnknownWatch { wd: 9999, .. })));
    }

    #[test]
    fn ignored_event_retires_the_wd_without_a_batch_entry() {
        let mut fixture = fixture();
        let root_wd = fixture.tree.directory().find_wd(&fixture.root);

        let mut buffer = Vec::new();
        push_event(&mut buffer, root_wd, ffi::IN_IGNORED, 0, b"");

        let events = Events::new(&buffer, buffer.len());
        Dispatcher::new()
            .drain(&mut fixture.tree, events, &mut fixture.notify)
            .unwrap();

        assert!(!fixture.tree.directory().exists(root_wd));
        assert_eq!(fixture.notify.batch_len(), 0);
    }

    #[test]
    fn content_events_batch_their_parent_path() {
        let mut fixture = fixture();
        let root_wd = fixture.tree.directory().find_wd(&fixture.root);

        let mut buffer = Vec::new();
        push_event(&mut buffer, root_wd, ffi::IN_CLOSE_WRITE, 0, b"f1");
        push_event(&mut buffer, root_wd, ffi::IN_DELETE, 0, b"f2");

        let events = Events::new(&buffer, buffer.len());
        Dispatcher::new()
            .drain(&mut fixture.tree, events, &mut fixture.notify)
            .unwrap();

        let written = fs::read_to_string(fixture._notify_dir.path().join("00000001.txt")).unwrap();
        let root = fixture.root.display().to_string();
        assert_eq!(written, format!("{root}\n{root}\n"));
    }
}
