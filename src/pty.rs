//! Pseudo-terminal acquisition and kernel console redirection.
//!
//! The capture source is the master side of a pty pair; TIOCCONS on the
//! slave makes the kernel route console output there. openpty() can
//! fail this early in boot when /dev/pts is not mounted yet, so there
//! is a fallback scan over the legacy BSD-style /dev/pty?? names.

use std::os::fd::{AsRawFd, OwnedFd};
use std::path::PathBuf;

use nix::errno::Errno;
use nix::fcntl::{OFlag, open};
use nix::pty::openpty;
use nix::sys::stat::Mode;
use nix::unistd::ttyname;

use crate::error::StartupError;
use crate::log::{log_info, log_warn};

pub struct PtyPair {
    /// Capture source: the driver reads console output here.
    pub master: OwnedFd,
    /// Redirection sink: TIOCCONS points the kernel console here.
    slave: OwnedFd,
    /// Slave device path, for diagnostics.
    slave_path: String,
}

impl PtyPair {
    /// Allocate a pty pair, falling back to the legacy name scan when
    /// openpty() fails.
    pub fn acquire() -> Result<Self, StartupError> {
        match openpty(None, None) {
            Ok(pty) => {
                let slave_path = ttyname(&pty.slave)
                    .map(|p: PathBuf| p.display().to_string())
                    .unwrap_or_else(|_| "<pty slave>".to_string());
                Ok(Self {
                    master: pty.master,
                    slave: pty.slave,
                    slave_path,
                })
            }
            Err(e) => {
                log_warn("pty", "openpty.failed", &format!("{}, scanning legacy ptys", e));
                Self::scan_legacy().ok_or(StartupError::PtyUnavailable)
            }
        }
    }

    /// Walk /dev/pty[p-z][0-9a-f], taking the first pair whose tty side
    /// also opens.
    fn scan_legacy() -> Option<Self> {
        for group in 'p'..='z' {
            for unit in "0123456789abcdef".chars() {
                let pty_path = format!("/dev/pty{}{}", group, unit);
                let tty_path = format!("/dev/tty{}{}", group, unit);

                let Ok(master) = open(
                    pty_path.as_str(),
                    OFlag::O_RDWR | OFlag::O_NOCTTY,
                    Mode::empty(),
                ) else {
                    continue;
                };
                let Ok(slave) = open(
                    tty_path.as_str(),
                    OFlag::O_RDWR | OFlag::O_NOCTTY,
                    Mode::empty(),
                ) else {
                    continue;
                };

                return Some(Self {
                    master,
                    slave,
                    slave_path: tty_path,
                });
            }
        }
        None
    }

    /// Point the kernel console at our slave. The first two ioctls
    /// clear any existing redirection (stdin is assumed connected to
    /// /dev/console; old kernels additionally need it on /dev/tty0) and
    /// are best-effort; the redirection onto the slave must succeed.
    pub fn redirect_console(&self) -> Result<(), StartupError> {
        // SAFETY: TIOCCONS takes no argument; fd 0 is inherited from
        // init and valid for the process lifetime. Failure only means
        // there was no redirection to clear.
        unsafe {
            libc::ioctl(libc::STDIN_FILENO, libc::TIOCCONS as libc::c_ulong);
        }

        if let Ok(fd) = open("/dev/tty0", OFlag::O_RDWR, Mode::empty()) {
            // SAFETY: fd is a freshly opened OwnedFd, closed on drop.
            // TIOCCONS takes no argument. Best-effort as above.
            unsafe {
                libc::ioctl(fd.as_raw_fd(), libc::TIOCCONS as libc::c_ulong);
            }
        }

        // SAFETY: self.slave is owned and valid; TIOCCONS takes no
        // argument. The return value is checked below.
        let ret = unsafe {
            libc::ioctl(self.slave.as_raw_fd(), libc::TIOCCONS as libc::c_ulong)
        };
        if ret < 0 {
            return Err(StartupError::RedirectFailed {
                dev: self.slave_path.clone(),
                source: Errno::last(),
            });
        }

        log_info("pty", "console.redirected", &self.slave_path);
        Ok(())
    }

    pub fn slave_path(&self) -> &str {
        &self.slave_path
    }

    #[cfg(test)]
    pub(crate) fn slave_fd(&self) -> &OwnedFd {
        &self.slave
    }
}
