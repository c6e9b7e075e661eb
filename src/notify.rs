//! Durable change notifications: the batch emitter and the error mailbox.

use std::fs::File;
use std::io::Write;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use log::debug;

use crate::error::Fatal;

/// Accumulates the parent paths observed during one drain and flushes them
/// as a numbered notification file.
///
/// Each flush writes the batch to `temp` and renames it into place as
/// `00000001.txt`, `00000002.txt`, …; the rename is what makes a
/// notification visible to the consumer, and it is atomic. The counter is
/// process-local and starts over on restart, when the consumer is expected
/// to clear the directory and rescan anyway.
pub struct NotifyDir {
    temp_path: PathBuf,
    dir: PathBuf,
    count: u32,
    batch: Vec<PathBuf>,
}

impl NotifyDir {
    /// Creates an emitter writing into `dir`, which must already exist.
    pub fn new(dir: &Path) -> NotifyDir {
        NotifyDir {
            temp_path: dir.join("temp"),
            dir: dir.to_path_buf(),
            count: 0,
            batch: Vec::new(),
        }
    }

    /// Appends one parent path to the current batch. Duplicates within a
    /// batch are allowed; the consumer deals with them.
    pub fn record(&mut self, parent: &Path) {
        self.batch.push(parent.to_path_buf());
    }

    /// Number of entries recorded since the last flush.
    pub fn batch_len(&self) -> usize {
        self.batch.len()
    }

    /// Writes the batch out and clears it. An empty batch produces no file.
    ///
    /// Returns the path of the notification file, if one was written.
    pub fn flush(&mut self) -> Result<Option<PathBuf>, Fatal> {
        if self.batch.is_empty() {
            return Ok(None);
        }

        self.write_temp().map_err(|source| Fatal::Notify {
            path: self.temp_path.clone(),
            source,
        })?;
        self.batch.clear();

        self.count += 1;
        let final_path = self.dir.join(format!("{:08}.txt", self.count));
        std::fs::rename(&self.temp_path, &final_path).map_err(|source| Fatal::Notify {
            path: final_path.clone(),
            source,
        })?;

        debug!("notification {}", final_path.display());
        Ok(Some(final_path))
    }

    fn write_temp(&self) -> std::io::Result<()> {
        let mut temp = File::create(&self.temp_path)?;
        for parent in &self.batch {
            temp.write_all(parent.as_os_str().as_bytes())?;
            temp.write_all(b"\n")?;
        }
        Ok(())
    }
}

/// Overwrites `error.txt` in the notification directory with the last fatal
/// message.
///
/// This file is a single-slot mailbox for the supervisor: only the most
/// recent message matters, so it is truncated on every write. Failures are
/// swallowed — this runs on the way out of a process that is already dying.
pub fn write_error(notify_dir: &Path, message: &str) {
    let _ = std::fs::write(notify_dir.join("error.txt"), format!("{message}\n"));
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use super::{write_error, NotifyDir};

    #[test]
    fn flushes_are_numbered_sequentially_and_round_trip() {
        let scratch = tempfile::tempdir().unwrap();
        let mut notify = NotifyDir::new(scratch.path());

        notify.record(Path::new("/w"));
        notify.record(Path::new("/w/sub"));
        notify.record(Path::new("/w"));
        let first = notify.flush().unwrap().unwrap();

        notify.record(Path::new("/other"));
        let second = notify.flush().unwrap().unwrap();

        assert_eq!(first, scratch.path().join("00000001.txt"));
        assert_eq!(second, scratch.path().join("00000002.txt"));

        assert_eq!(fs::read_to_string(first).unwrap(), "/w\n/w/sub\n/w\n");
        assert_eq!(fs::read_to_string(second).unwrap(), "/other\n");
    }

    #[test]
    fn empty_batch_produces_no_file() {
        let scratch = tempfile::tempdir().unwrap();
        let mut notify = NotifyDir::new(scratch.path());

        assert!(notify.flush().unwrap().is_none());
        assert_eq!(fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[test]
    fn flush_clears_the_batch() {
        let scratch = tempfile::tempdir().unwrap();
        let mut notify = NotifyDir::new(scratch.path());

        notify.record(Path::new("/w"));
        notify.flush().unwrap();
        assert_eq!(notify.batch_len(), 0);
        assert!(notify.flush().unwrap().is_none());
    }

    #[test]
    fn error_mailbox_keeps_only_the_last_message() {
        let scratch = tempfile::tempdir().unwrap();

        write_error(scratch.path(), "first failure");
        write_error(scratch.path(), "second failure");

        let mailbox = scratch.path().join("error.txt");
        assert_eq!(fs::read_to_string(mailbox).unwrap(), "second failure\n");
    }
}
