//! Fan-out of the raw capture stream to the physical consoles.
//!
//! Every target gets the unfiltered bytes - escape sequences drive
//! cursor and color handling on a real terminal, so they must survive
//! this path. Targets are never removed from the set, only marked dead;
//! ordering is the discovery order.
//!
//! Failure handling per write:
//! - partial write: keep looping until the span is delivered
//! - EIO: the kernel detached the terminal under us (vhangup during
//!   getty startup is the usual cause); close, reopen the same path and
//!   resume with the remaining bytes
//! - reopen failure or any other errno: the target is dead for good

use std::os::fd::OwnedFd;

use nix::errno::Errno;
use nix::fcntl::{FcntlArg, OFlag, fcntl, open};
use nix::sys::stat::Mode;
use nix::unistd::write;

use crate::error::StartupError;
use crate::log::{log_info, log_warn};

/// Upper bound on the target set; discovery enforces it too, this is
/// the construction-time check.
pub const MAX_CONSOLES: usize = 16;

struct ConsoleTarget {
    path: String,
    /// None once the target is dead. A dead target is never revived.
    fd: Option<OwnedFd>,
}

pub struct ConsoleFanout {
    targets: Vec<ConsoleTarget>,
    live: usize,
}

/// Open a console device for writing. The open itself is non-blocking
/// so a carrier-less serial line cannot hang startup; the flag is
/// cleared afterwards and the actual writes block.
fn open_console(path: &str) -> nix::Result<OwnedFd> {
    let fd = open(
        path,
        OFlag::O_WRONLY | OFlag::O_NONBLOCK | OFlag::O_NOCTTY,
        Mode::empty(),
    )?;
    let flags = OFlag::from_bits_truncate(fcntl(&fd, FcntlArg::F_GETFL)?);
    fcntl(&fd, FcntlArg::F_SETFL(flags & !OFlag::O_NONBLOCK))?;
    Ok(fd)
}

/// Deliver `data` fully to one handle, recovering from hang-ups.
///
/// Generic over the write and reopen operations so the recovery logic
/// is testable without real terminal devices. On EIO the handle is
/// replaced via `reopen_fn` and delivery resumes with the remaining
/// bytes; any other failure (or a failed reopen) returns the errno that
/// killed the target. `handle` is None on return iff the target died.
fn deliver_all<H>(
    handle: &mut Option<H>,
    data: &[u8],
    write_fn: &mut impl FnMut(&H, &[u8]) -> nix::Result<usize>,
    reopen_fn: &mut impl FnMut() -> nix::Result<H>,
) -> Result<(), Errno> {
    let mut remaining = data;

    while !remaining.is_empty() {
        let Some(h) = handle.as_ref() else {
            return Err(Errno::EBADF);
        };
        match write_fn(h, remaining) {
            Ok(n) => remaining = &remaining[n..],
            Err(Errno::EINTR) | Err(Errno::EAGAIN) => continue,
            Err(Errno::EIO) => {
                *handle = None;
                match reopen_fn() {
                    Ok(h) => *handle = Some(h),
                    Err(e) => return Err(e),
                }
            }
            Err(e) => {
                *handle = None;
                return Err(e);
            }
        }
    }

    Ok(())
}

impl ConsoleFanout {
    /// Open every discovered device. Targets that fail to open start out
    /// dead (logged, not fatal); zero live targets is fatal.
    pub fn open(paths: &[String]) -> Result<Self, StartupError> {
        if paths.len() > MAX_CONSOLES {
            return Err(StartupError::TooManyConsoles(paths.len()));
        }

        let mut targets = Vec::with_capacity(paths.len());
        let mut live = 0;
        for path in paths {
            let fd = match open_console(path) {
                Ok(fd) => {
                    log_info("console", "console.open", path);
                    live += 1;
                    Some(fd)
                }
                Err(e) => {
                    log_warn("console", "console.open_failed", &format!("{}: {}", path, e));
                    None
                }
            };
            targets.push(ConsoleTarget {
                path: path.clone(),
                fd,
            });
        }

        if live == 0 {
            return Err(StartupError::NoConsoleWritable);
        }

        Ok(Self { targets, live })
    }

    /// Number of targets still accepting writes.
    pub fn live(&self) -> usize {
        self.live
    }

    /// Write the raw span to every live target.
    pub fn write_raw(&mut self, data: &[u8]) {
        for target in &mut self.targets {
            if target.fd.is_none() {
                continue;
            }
            let path = target.path.clone();
            let result = deliver_all(
                &mut target.fd,
                data,
                &mut |fd, buf| write(fd, buf),
                &mut || open_console(&path),
            );
            if let Err(e) = result {
                target.fd = None;
                self.live -= 1;
                log_warn("console", "console.lost", &format!("{}: {}", target.path, e));
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn from_fds(targets: Vec<(String, OwnedFd)>) -> Self {
        let live = targets.len();
        Self {
            targets: targets
                .into_iter()
                .map(|(path, fd)| ConsoleTarget { path, fd: Some(fd) })
                .collect(),
            live,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    /// Fake handle distinguishing pre- and post-reopen writes.
    #[derive(Clone, Copy, PartialEq, Debug)]
    struct Handle(u32);

    #[test]
    fn test_partial_writes_are_completed() {
        let mut handle = Some(Handle(1));
        let mut delivered = Vec::new();
        let result = deliver_all(
            &mut handle,
            b"0123456789",
            &mut |_, buf| {
                // Accept at most 3 bytes per call.
                let n = buf.len().min(3);
                delivered.extend_from_slice(&buf[..n]);
                Ok(n)
            },
            &mut || panic!("no reopen expected"),
        );
        assert!(result.is_ok());
        assert_eq!(delivered, b"0123456789");
        assert!(handle.is_some());
    }

    #[test]
    fn test_eintr_is_retried() {
        let mut handle = Some(Handle(1));
        let mut calls = 0;
        let mut delivered = Vec::new();
        let result = deliver_all(
            &mut handle,
            b"abc",
            &mut |_, buf| {
                calls += 1;
                if calls == 1 {
                    Err(Errno::EINTR)
                } else {
                    delivered.extend_from_slice(buf);
                    Ok(buf.len())
                }
            },
            &mut || panic!("no reopen expected"),
        );
        assert!(result.is_ok());
        assert_eq!(delivered, b"abc");
    }

    #[test]
    fn test_hangup_reopens_and_resumes_remaining_bytes() {
        // 100-byte write: 40 accepted, then the terminal hangs up.
        // After a successful reopen the remaining 60 go to the new
        // handle; the device sees all 100 bytes across both handles.
        let data = vec![b'x'; 100];
        let by_handle: RefCell<Vec<(Handle, usize)>> = RefCell::new(Vec::new());
        let mut handle = Some(Handle(1));
        let mut hung_up = false;

        let result = deliver_all(
            &mut handle,
            &data,
            &mut |h, buf| {
                if *h == Handle(1) && !hung_up {
                    if buf.len() > 40 {
                        by_handle.borrow_mut().push((*h, 40));
                        hung_up = true;
                        return Ok(40);
                    }
                    return Ok(buf.len());
                }
                if *h == Handle(1) {
                    return Err(Errno::EIO);
                }
                by_handle.borrow_mut().push((*h, buf.len()));
                Ok(buf.len())
            },
            &mut || Ok(Handle(2)),
        );

        assert!(result.is_ok());
        assert_eq!(handle, Some(Handle(2)));
        let log = by_handle.borrow();
        assert_eq!(log.as_slice(), &[(Handle(1), 40), (Handle(2), 60)]);
        assert_eq!(log.iter().map(|(_, n)| n).sum::<usize>(), 100);
    }

    #[test]
    fn test_failed_reopen_kills_target() {
        let mut handle = Some(Handle(1));
        let result = deliver_all(
            &mut handle,
            b"data",
            &mut |_, _| Err(Errno::EIO),
            &mut || Err(Errno::ENODEV),
        );
        assert_eq!(result, Err(Errno::ENODEV));
        assert!(handle.is_none());
    }

    #[test]
    fn test_non_hangup_error_kills_target_without_reopen() {
        let mut handle = Some(Handle(1));
        let result = deliver_all(
            &mut handle,
            b"data",
            &mut |_, _| Err(Errno::ENOSPC),
            &mut || panic!("reopen must not be attempted"),
        );
        assert_eq!(result, Err(Errno::ENOSPC));
        assert!(handle.is_none());
    }

    #[test]
    fn test_fanout_rejects_oversized_target_set() {
        let paths: Vec<String> = (0..MAX_CONSOLES + 1)
            .map(|i| format!("/dev/ttyS{}", i))
            .collect();
        match ConsoleFanout::open(&paths) {
            Err(StartupError::TooManyConsoles(n)) => assert_eq!(n, MAX_CONSOLES + 1),
            other => panic!("expected TooManyConsoles, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_fanout_evicts_on_permanent_error_and_tracks_live() {
        // Write ends of pipes whose read ends are closed: the first
        // write fails with EPIPE, a permanent error.
        let (r1, w1) = nix::unistd::pipe().unwrap();
        let (r2, w2) = nix::unistd::pipe().unwrap();
        drop(r1);
        drop(r2);

        let mut fanout = ConsoleFanout::from_fds(vec![
            ("fake0".to_string(), w1),
            ("fake1".to_string(), w2),
        ]);
        assert_eq!(fanout.live(), 2);

        fanout.write_raw(b"boot message\n");
        assert_eq!(fanout.live(), 0);
    }

    #[test]
    fn test_fanout_delivers_to_working_target() {
        let (r, w) = nix::unistd::pipe().unwrap();
        let mut fanout = ConsoleFanout::from_fds(vec![("fake0".to_string(), w)]);

        fanout.write_raw(b"hello console");
        assert_eq!(fanout.live(), 1);

        let mut buf = [0u8; 64];
        let n = nix::unistd::read(&r, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello console");
    }
}
