//! Command line and configuration files.

use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use log::info;

use crate::error::Fatal;

/// Watches directory trees recursively and drops one notification file per
/// batch of changes into the notification directory.
#[derive(Debug, Parser)]
#[command(name = "dirnotify")]
pub struct Args {
    /// PID of the supervising process. Accepted for compatibility and never
    /// parsed; the daemon discovers its parent through getppid instead.
    pub parent_pid: String,

    /// File listing the top-level directories to watch, one absolute path
    /// per line.
    pub config_path: PathBuf,

    /// File listing excluded path prefixes, one per line.
    pub exclude_path: PathBuf,

    /// Directory the notification files are written to. Must exist and be
    /// writable.
    pub notify_dir: PathBuf,
}

/// The paths the daemon runs from.
#[derive(Debug)]
pub struct Config {
    /// File listing the top-level watch roots.
    pub config_path: PathBuf,
    /// File listing the excluded path prefixes.
    pub exclude_path: PathBuf,
    /// Directory notifications are written into.
    pub notify_dir: PathBuf,
}

impl From<Args> for Config {
    fn from(args: Args) -> Config {
        Config {
            config_path: args.config_path,
            exclude_path: args.exclude_path,
            notify_dir: args.notify_dir,
        }
    }
}

/// Reads the top-level watch roots.
///
/// One path per line, trailing newline stripped. Empty lines are kept: they
/// turn into watch attempts on "" which skip with ENOENT, same as any other
/// configured path that does not exist.
pub fn load_watch_roots(path: &Path) -> Result<Vec<PathBuf>, Fatal> {
    let roots = read_lines(path)?;
    for root in &roots {
        info!("top level path: '{}'", root.display());
    }
    Ok(roots)
}

/// Reads the exclude prefixes, one per line.
pub fn load_excludes(path: &Path) -> Result<Vec<PathBuf>, Fatal> {
    let excludes = read_lines(path)?;
    for exclude in &excludes {
        info!("exclude path: '{}'", exclude.display());
    }
    Ok(excludes)
}

fn read_lines(path: &Path) -> Result<Vec<PathBuf>, Fatal> {
    let content = fs::read_to_string(path).map_err(|source| Fatal::Config {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(content.lines().map(PathBuf::from).collect())
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use super::{load_excludes, load_watch_roots};
    use crate::error::Fatal;

    #[test]
    fn roots_are_read_line_by_line_with_newlines_stripped() {
        let scratch = tempfile::tempdir().unwrap();
        let config = scratch.path().join("roots.txt");
        fs::write(&config, "/home/user\n/srv/data\n").unwrap();

        let roots = load_watch_roots(&config).unwrap();
        assert_eq!(roots, vec![PathBuf::from("/home/user"), PathBuf::from("/srv/data")]);
    }

    #[test]
    fn empty_lines_are_kept_as_empty_paths() {
        let scratch = tempfile::tempdir().unwrap();
        let config = scratch.path().join("roots.txt");
        fs::write(&config, "/a\n\n/b\n").unwrap();

        let roots = load_watch_roots(&config).unwrap();
        assert_eq!(roots.len(), 3);
        assert_eq!(roots[1], PathBuf::from(""));
    }

    #[test]
    fn missing_file_is_fatal() {
        let scratch = tempfile::tempdir().unwrap();
        let gone = scratch.path().join("never-written.txt");

        assert!(matches!(load_excludes(&gone), Err(Fatal::Config { .. })));
    }
}
