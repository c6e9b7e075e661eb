//! The daemon: startup sequence, poll loop, lifecycle.

use std::io;
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, info, warn};

use crate::config::{self, Config};
use crate::directory::NULL_WD;
use crate::dispatch::Dispatcher;
use crate::error::Fatal;
use crate::events::EVENT_BUFFER_LEN;
use crate::inotify::Inotify;
use crate::notify::NotifyDir;
use crate::tree::WatchTree;

const POLL_TIMEOUT_MS: libc::c_int = 1000;

static ALIVE: AtomicBool = AtomicBool::new(true);

extern "C" fn handle_sigterm(signal: libc::c_int) {
    if signal == libc::SIGTERM {
        ALIVE.store(false, Ordering::Relaxed);
    }
}

/// Arranges for SIGTERM to request a clean shutdown: the flag is checked at
/// the top of every loop iteration, so the current drain always completes.
pub fn install_sigterm_handler() -> Result<(), Fatal> {
    let handler: extern "C" fn(libc::c_int) = handle_sigterm;
    let previous = unsafe { libc::signal(libc::SIGTERM, handler as libc::sighandler_t) };
    if previous == libc::SIG_ERR {
        return Err(Fatal::Signal(io::Error::last_os_error()));
    }
    Ok(())
}

/// The whole process in one value: the watch set, the dispatcher, the
/// notification sink, and the read buffer they share.
pub struct Daemon {
    tree: WatchTree,
    dispatcher: Dispatcher,
    notify: NotifyDir,
    buffer: Vec<u8>,
}

impl Daemon {
    /// Builds the daemon: inotify instance, excludes, then every configured
    /// root watched recursively.
    ///
    /// A root that cannot be watched (missing, excluded, unreadable) is
    /// logged and tolerated; a root is expected to appear later through
    /// rename traffic or a supervisor restart.
    pub fn new(config: &Config) -> Result<Daemon, Fatal> {
        let inotify = Inotify::init().map_err(Fatal::Init)?;

        let excludes = config::load_excludes(&config.exclude_path)?;
        let mut tree = WatchTree::new(inotify, excludes);

        for root in config::load_watch_roots(&config.config_path)? {
            if !tree.watch_tree(NULL_WD, &root)? {
                warn!("can't watch toplevel path {}", root.display());
            }
        }
        info!("watching {} directories", tree.directory().len());

        Ok(Daemon {
            tree,
            dispatcher: Dispatcher::new(),
            notify: NotifyDir::new(&config.notify_dir),
            buffer: vec![0u8; EVENT_BUFFER_LEN],
        })
    }

    /// Runs until SIGTERM arrives or the parent process goes away.
    ///
    /// Wakes on inotify readability or a one second timeout; the timeout
    /// exists so the parent check runs even while the filesystem is quiet.
    pub fn run(&mut self) -> Result<(), Fatal> {
        debug!("start poll loop");
        while ALIVE.load(Ordering::Relaxed) {
            let mut poll_fds = [libc::pollfd {
                fd: self.tree.inotify().as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            }];

            let ready = unsafe { libc::poll(poll_fds.as_mut_ptr(), 1, POLL_TIMEOUT_MS) };
            match ready {
                -1 => {
                    let error = io::Error::last_os_error();
                    if error.raw_os_error() == Some(libc::EINTR) {
                        info!("poll interrupted, assuming SIGTERM");
                        break;
                    }
                    return Err(Fatal::Poll(error));
                }
                0 => {
                    if parent_gone() {
                        break;
                    }
                }
                _ => {
                    if parent_gone() {
                        break;
                    }
                    if (poll_fds[0].revents & libc::POLLIN) != 0 {
                        self.drain()?;
                    }
                }
            }
        }
        debug!("end poll loop");
        Ok(())
    }

    fn drain(&mut self) -> Result<(), Fatal> {
        let events = self
            .tree
            .inotify()
            .read_events(&mut self.buffer)
            .map_err(Fatal::ReadEvents)?;
        self.dispatcher
            .drain(&mut self.tree, events, &mut self.notify)
    }
}

fn parent_gone() -> bool {
    if unsafe { libc::getppid() } == 1 {
        info!("parent process gone: stopping");
        return true;
    }
    false
}
