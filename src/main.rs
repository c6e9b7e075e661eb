use std::process;

use clap::Parser;
use log::{error, info};

use dirnotify::{install_sigterm_handler, write_error, Args, Config, Daemon};

fn main() {
    env_logger::init();

    // Notification files are supervisor-private.
    unsafe {
        libc::umask(0o077);
    }

    let config = Config::from(Args::parse());
    info!("program started");

    if let Err(fatal) = run(&config) {
        error!("{fatal}");
        write_error(&config.notify_dir, &fatal.to_string());
        process::exit(fatal.exit_code());
    }

    info!("program terminates normally");
}

fn run(config: &Config) -> Result<(), dirnotify::Fatal> {
    install_sigterm_handler()?;
    Daemon::new(config)?.run()
}
