//! bootlogd: boot-time console logger
//!
//! Captures everything the kernel and early userspace print to the
//! console, before a persistent log partition exists. The kernel
//! console is redirected onto a pty slave; the master side feeds a ring
//! buffer that is relayed raw to the real console devices and written,
//! stripped of escape sequences and timestamped per line, to a logfile
//! that is opened as soon as its path becomes usable.
//!
//! Exits 0 on graceful shutdown (termination signal, or every console
//! lost), 1 on any fatal startup condition.

mod buffer;
mod config;
mod console;
mod daemon;
mod discover;
mod error;
mod filter;
mod log;
mod pty;
mod sink;

use std::env;
use std::process::ExitCode;

use anyhow::{Context, Result};

use crate::config::{Action, Config, parse_args};
use crate::console::ConsoleFanout;
use crate::daemon::Driver;
use crate::error::StartupError;
use crate::log::{log_error, log_info};
use crate::pty::PtyPair;
use crate::sink::LogSink;

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();

    match parse_args(&args[1..]) {
        Ok(Action::Version) => {
            println!("bootlogd {}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
        Ok(Action::Run(config)) => match run(config) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                log_error("main", "startup.failed", &format!("{:#}", e));
                ExitCode::from(1)
            }
        },
        Err(usage) => {
            eprintln!("{}", usage);
            ExitCode::from(1)
        }
    }
}

fn run(config: Config) -> Result<()> {
    daemon::setup_signal_handlers().context("signal setup failed")?;

    let consoles = discover::discover_consoles().context("console discovery failed")?;
    if consoles.is_empty() {
        return Err(StartupError::NoConsoles.into());
    }
    log_info("main", "consoles.found", &consoles.join(","));

    let fanout = ConsoleFanout::open(&consoles)?;

    let pty = PtyPair::acquire()?;
    pty.redirect_console()?;

    let sink = LogSink::new(&config);
    log_info(
        "main",
        "startup",
        &format!("logging to {}", config.log_path.display()),
    );

    Driver::new(pty, fanout, sink).run()
}
