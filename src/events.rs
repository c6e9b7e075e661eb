//! Event records and the iterator over one read-burst.

use std::ffi::OsStr;
use std::mem;
use std::os::unix::ffi::OsStrExt;

use inotify_sys as ffi;

use crate::directory::Wd;
use crate::error::Fatal;

/// Size of the buffer each drain reads into. Large enough for a few hundred
/// events; far more than one maximal event (header + NAME_MAX + 1).
pub const EVENT_BUFFER_LEN: usize = 64 * 1024;

bitflags::bitflags! {
    /// Indicates the type of an event, as read back from the kernel.
    ///
    /// Contains the bits of [`WatchMask`] plus the flags the kernel adds on
    /// its own initiative.
    ///
    /// [`WatchMask`]: crate::WatchMask
    #[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Clone, Copy)]
    pub struct EventMask: u32 {
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

        /// Watch was removed, explicitly or because the file was deleted or
        /// its filesystem unmounted
        const IGNORED = ffi::IN_IGNORED;

        /// Subject of this event is a directory
        const ISDIR = ffi::IN_ISDIR;

        /// Event queue overflowed; events have been lost
        const Q_OVERFLOW = ffi::IN_Q_OVERFLOW;

        /// Filesystem containing the watched object was unmounted
        const UNMOUNT = ffi::IN_UNMOUNT;
    }
}

impl EventMask {
    /// Human-readable name of the first recognized type bit, for event
    /// tracing.
    pub fn kind_name(self) -> &'static str {
        const NAMES: &[(EventMask, &str)] = &[
            (EventMask::CLOSE_WRITE, "IN_CLOSE_WRITE"),
            (EventMask::CREATE, "IN_CREATE"),
            (EventMask::DELETE, "IN_DELETE"),
            (EventMask::DELETE_SELF, "IN_DELETE_SELF"),
            (EventMask::MOVED_FROM, "IN_MOVED_FROM"),
            (EventMask::MOVED_TO, "IN_MOVED_TO"),
            (EventMask::MOVE_SELF, "IN_MOVE_SELF"),
            (EventMask::IGNORED, "IN_IGNORED"),
            (EventMask::Q_OVERFLOW, "IN_Q_OVERFLOW"),
        ];

        for &(bit, name) in NAMES {
            if self.contains(bit) {
                return name;
            }
        }
        "*unknown*"
    }
}

/// One filesystem event, borrowed out of the read buffer.
#[derive(Clone, Copy, Debug)]
pub struct Event<'a> {
    /// The watch this event originates from.
    pub wd: Wd,

    /// What happened.
    pub mask: EventMask,

    /// Correlates the `MOVED_FROM`/`MOVED_TO` halves of a rename.
    pub cookie: u32,

    /// Name of the affected child entry; `None` when the event concerns the
    /// watched directory itself.
    pub name: Option<&'a OsStr>,
}

/// Iterator over the events of a single read-burst.
///
/// Walks a cursor across the bytes one `read(2)` produced. The kernel only
/// writes complete events into the buffer, so a header or name that would
/// run past the valid tail is a protocol violation: the iterator yields the
/// error once and then fuses.
///
/// Obtained from [`Inotify::read_events`]; single-use, one per read.
///
/// [`Inotify::read_events`]: crate::Inotify::read_events
#[derive(Debug)]
pub struct Events<'a> {
    buffer: &'a [u8],
    num_bytes: usize,
    pos: usize,
}

impl<'a> Events<'a> {
    pub(crate) fn new(buffer: &'a [u8], num_bytes: usize) -> Self {
        Events {
            buffer,
            num_bytes,
            pos: 0,
        }
    }
}

impl<'a> Iterator for Events<'a> {
    type Item = Result<Event<'a>, Fatal>;

    fn next(&mut self) -> Option<Self::Item> {
        let header_size = mem::size_of::<ffi::inotify_event>();

        if self.pos >= self.num_bytes {
            return None;
        }

        if self.pos + header_size > self.num_bytes {
            let error = Fatal::MalformedEvent {
                offset: self.pos,
                need: header_size,
                have: self.num_bytes - self.pos,
            };
            self.pos = self.num_bytes;
            return Some(Err(error));
        }

        // The byte buffer has alignment 1 while `inotify_event` wants more,
        // so the header must be read unaligned.
        let header = unsafe {
            (self.buffer[self.pos..].as_ptr() as *const ffi::inotify_event).read_unaligned()
        };

        let consumed = header_size + header.len as usize;
        if self.pos + consumed > self.num_bytes {
            let error = Fatal::MalformedEvent {
                offset: self.pos,
                need: consumed,
                have: self.num_bytes - self.pos,
            };
            self.pos = self.num_bytes;
            return Some(Err(error));
        }

        // The name is padded with NUL bytes up to `header.len`; strip them.
        let name = &self.buffer[self.pos + header_size..self.pos + consumed];
        let name = name.splitn(2, |&byte| byte == 0).next().unwrap();
        let name = if name.is_empty() {
            None
        } else {
            Some(OsStr::from_bytes(name))
        };

        self.pos += consumed;

        Some(Ok(Event {
            wd: header.wd,
            mask: EventMask::from_bits_retain(header.mask),
            cookie: header.cookie,
            name,
        }))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::ffi::OsStr;
    use std::mem;
    use std::slice;

    use inotify_sys as ffi;

    use super::{EventMask, Events};
    use crate::error::Fatal;

    pub(crate) fn push_event(buffer: &mut Vec<u8>, wd: i32, mask: u32, cookie: u32, name: &[u8]) {
        // The kernel pads names with NULs to an alignment boundary; sixteen
        // is as good a boundary as any for a synthetic event.
        let len = if name.is_empty() {
            0
        } else {
            (name.len() / 16 + 1) * 16
        };
        let header = ffi::inotify_event {
            wd,
            mask,
            cookie,
            len: len as u32,
        };
        let header_bytes = unsafe {
            slice::from_raw_parts(
                &header as *const _ as *const u8,
                mem::size_of::<ffi::inotify_event>(),
            )
        };
        buffer.extend_from_slice(header_bytes);
        let start = buffer.len();
        buffer.resize(start + len, 0);
        buffer[start..start + name.len()].copy_from_slice(name);
    }

    #[test]
    fn visits_each_event_once_in_buffer_order() {
        let mut buffer = Vec::new();
        push_event(&mut buffer, 3, ffi::IN_CREATE | ffi::IN_ISDIR, 0, b"sub");
        push_event(&mut buffer, 3, ffi::IN_MOVED_FROM, 77, b"old");
        push_event(&mut buffer, 4, ffi::IN_DELETE_SELF, 0, b"");

        let num_bytes = buffer.len();
        let events: Vec<_> = Events::new(&buffer, num_bytes)
            .map(|event| event.unwrap())
            .collect();

        assert_eq!(events.len(), 3);

        assert_eq!(events[0].wd, 3);
        assert_eq!(events[0].mask, EventMask::CREATE | EventMask::ISDIR);
        assert_eq!(events[0].name, Some(OsStr::new("sub")));

        assert_eq!(events[1].cookie, 77);
        assert_eq!(events[1].name, Some(OsStr::new("old")));

        assert_eq!(events[2].wd, 4);
        assert_eq!(events[2].name, None);
    }

    #[test]
    fn empty_read_yields_none_immediately() {
        let buffer = [0u8; 256];
        assert!(Events::new(&buffer, 0).next().is_none());
    }

    #[test]
    fn does_not_mistake_next_event_for_name_of_previous_event() {
        let mut buffer = Vec::new();
        push_event(&mut buffer, 1, ffi::IN_CLOSE_WRITE, 0, b"");
        // A following event starting with a non-zero byte must not bleed
        // into the previous event's (absent) name.
        push_event(&mut buffer, i32::MAX, ffi::IN_CLOSE_WRITE, 0, b"");

        let num_bytes = buffer.len();
        let mut events = Events::new(&buffer, num_bytes);
        let first = events.next().unwrap().unwrap();
        assert_eq!(first.name, None);
    }

    #[test]
    fn truncated_tail_is_an_invariant_violation() {
        let mut buffer = Vec::new();
        push_event(&mut buffer, 2, ffi::IN_CREATE, 0, b"partial");
        buffer.truncate(buffer.len() - 4);

        let num_bytes = buffer.len();
        let mut events = Events::new(&buffer, num_bytes);
        assert!(matches!(
            events.next(),
            Some(Err(Fatal::MalformedEvent { .. }))
        ));
        // The iterator fuses after reporting the violation.
        assert!(events.next().is_none());
    }

    #[test]
    fn truncated_header_is_an_invariant_violation() {
        let mut buffer = Vec::new();
        push_event(&mut buffer, 2, ffi::IN_DELETE, 0, b"");
        push_event(&mut buffer, 3, ffi::IN_DELETE, 0, b"");
        buffer.truncate(buffer.len() - 10);

        let num_bytes = buffer.len();
        let mut events = Events::new(&buffer, num_bytes);
        assert!(events.next().unwrap().is_ok());
        assert!(matches!(
            events.next(),
            Some(Err(Fatal::MalformedEvent { .. }))
        ));
    }
}
