//! Fatal startup conditions.
//!
//! Runtime trouble (a console dropping out, the logfile refusing to
//! open) is survivable and handled in place; everything here aborts
//! startup with exit code 1.

use nix::errno::Errno;

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("no console devices could be determined")]
    NoConsoles,

    #[error("too many console devices ({0}), limit is 16")]
    TooManyConsoles(usize),

    #[error("none of the console devices could be opened for writing")]
    NoConsoleWritable,

    #[error("no pseudo-terminal could be allocated")]
    PtyUnavailable,

    #[error("failed to redirect the console onto {dev}: {source}")]
    RedirectFailed { dev: String, source: Errno },
}
