//! The capture loop.
//!
//! Single control flow: poll the pty master with a bounded timeout,
//! pull bytes into the capture buffer, relay the raw span to the
//! consoles, and feed the filtered backlog to the logfile once it can
//! be opened. Signals only ever set a flag; the loop polls it once per
//! iteration.

use std::os::fd::AsFd;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, bail};
use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};

use crate::buffer::CaptureBuffer;
use crate::console::ConsoleFanout;
use crate::filter::LineStamper;
use crate::log::{log_info, log_warn};
use crate::pty::PtyPair;
use crate::sink::LogSink;

/// Readiness wait bound. The timeout exists so the deferred logfile
/// open and the backlog drain still run while the console is quiet.
const POLL_TIMEOUT_MS: u16 = 500;

// Set by signal handlers, checked once per loop iteration.
static TERMINATE: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_termination(_: libc::c_int) {
    TERMINATE.store(true, Ordering::Release);
}

pub fn termination_requested() -> bool {
    TERMINATE.load(Ordering::Acquire)
}

fn install_handler(signal: Signal, handler: SigHandler) -> Result<()> {
    let action = SigAction::new(handler, SaFlags::empty(), SigSet::empty());
    unsafe { sigaction(signal, &action) }
        .context(format!("sigaction {:?} failed", signal))?;
    Ok(())
}

/// Register all signal dispositions.
pub fn setup_signal_handlers() -> Result<()> {
    // Termination signals share one minimal handler. No SA_RESTART:
    // poll() must return EINTR so the flag is seen within an iteration.
    for signal in [Signal::SIGTERM, Signal::SIGQUIT, Signal::SIGINT] {
        install_handler(signal, SigHandler::Handler(handle_termination))?;
    }

    // Job-control signals are meaningless for a daemon; SIGPIPE is
    // ignored so a racing console disappearance surfaces as a write
    // error instead of killing us.
    for signal in [
        Signal::SIGTTIN,
        Signal::SIGTTOU,
        Signal::SIGTSTP,
        Signal::SIGPIPE,
    ] {
        install_handler(signal, SigHandler::SigIgn)?;
    }

    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    /// Normal capture operation
    Running,
    /// Shutdown condition seen; final bookkeeping
    Draining,
    /// Loop exited, handles settled
    Terminated,
}

/// Composes the capture pipeline and owns every piece of it.
pub struct Driver {
    buffer: CaptureBuffer,
    stamper: LineStamper,
    sink: LogSink,
    fanout: ConsoleFanout,
    pty: PtyPair,
    state: DriverState,
}

impl Driver {
    pub fn new(pty: PtyPair, fanout: ConsoleFanout, sink: LogSink) -> Self {
        Self {
            buffer: CaptureBuffer::new(),
            stamper: LineStamper::new(),
            sink,
            fanout,
            pty,
            state: DriverState::Running,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn run(&mut self) -> Result<()> {
        log_info("daemon", "run.start", self.pty.slave_path());

        while self.state == DriverState::Running {
            self.step()?;
        }
        self.shutdown()
    }

    /// One loop iteration: wait, capture/relay, deferred open, drain,
    /// evaluate shutdown conditions.
    fn step(&mut self) -> Result<()> {
        let mut fds = [PollFd::new(self.pty.master.as_fd(), PollFlags::POLLIN)];
        let ready = match poll(&mut fds, PollTimeout::from(POLL_TIMEOUT_MS)) {
            Ok(0) => false,
            Ok(_) => fds[0]
                .revents()
                .is_some_and(|r| r.contains(PollFlags::POLLIN)),
            // Interrupted by a signal: the flag check below handles it.
            Err(Errno::EINTR) => false,
            Err(e) => bail!("poll failed: {}", e),
        };

        if ready {
            match self.buffer.capture(&self.pty.master) {
                Ok(span) => {
                    if !span.is_empty() {
                        self.fanout.write_raw(span);
                    }
                }
                Err(Errno::EINTR) | Err(Errno::EAGAIN) => {}
                Err(e) => log_warn("daemon", "pty.read_failed", &e.to_string()),
            }
        }

        if !self.sink.is_open() {
            self.sink.try_open();
        }
        if self.sink.is_open() {
            let todo = self.buffer.unread_len();
            if todo > 0 {
                let mut out = Vec::with_capacity(todo + 32);
                let stamped = self.stamper.process(self.buffer.drain(todo), &mut out);
                if let Err(e) = self.sink.write(&out, stamped) {
                    log_warn("daemon", "log.write_failed", &e.to_string());
                }
            }
        }

        // Losing the last console ends the run exactly like a
        // termination signal would.
        if termination_requested() || self.fanout.live() == 0 {
            self.state = DriverState::Draining;
        }

        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        if let Err(e) = self.sink.finish() {
            log_warn("daemon", "log.finish_failed", &e.to_string());
        }
        self.state = DriverState::Terminated;
        log_info("daemon", "run.stop", "graceful shutdown");
        Ok(())
    }
}
