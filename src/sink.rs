//! Deferred-open transcript writer.
//!
//! At startup the log path usually lives on a filesystem that is not
//! mounted yet, so the sink stays closed and the driver retries every
//! iteration. Once open, the handle lives until shutdown. Flushing is
//! driven by the stamper: a write that emitted a timestamp is flushed
//! to the OS, and with `-s` also forced to stable storage.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::os::fd::AsFd;
use std::path::PathBuf;

use nix::unistd::fdatasync;

use crate::config::Config;
use crate::log::log_warn;

pub struct LogSink {
    path: PathBuf,
    rotate: bool,
    create: bool,
    sync_each_line: bool,
    file: Option<BufWriter<File>>,
    /// Whether the transcript currently ends with a newline, consulted
    /// at shutdown. Initialized true and never updated on the write
    /// path, so the trailing newline is in practice never appended -
    /// kept as the historical daemon behaves.
    ends_with_newline: bool,
}

impl LogSink {
    pub fn new(config: &Config) -> Self {
        Self {
            path: config.log_path.clone(),
            rotate: config.rotate,
            create: config.create,
            sync_each_line: config.sync_each_line,
            file: None,
            ends_with_newline: true,
        }
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Attempt the deferred open. Not being able to open yet is normal,
    /// not an error; the driver calls this again next iteration.
    pub fn try_open(&mut self) {
        if self.file.is_some() {
            return;
        }

        if self.path.exists() {
            if self.rotate {
                let mut backup = self.path.clone().into_os_string();
                backup.push("~");
                // Best effort: a failed rotation must not block logging.
                if let Err(e) = fs::rename(&self.path, &backup) {
                    log_warn("sink", "rotate.failed", &format!("{}: {}", self.path.display(), e));
                }
            }
            // create(true) so a just-rotated path is recreated even
            // without -c; the existence check above already gated this
            // branch on a logfile being present.
            match OpenOptions::new().create(true).append(true).open(&self.path) {
                Ok(f) => self.file = Some(BufWriter::new(f)),
                Err(e) => {
                    log_warn("sink", "open.failed", &format!("{}: {}", self.path.display(), e));
                }
            }
        }

        if self.file.is_none() && self.create {
            match OpenOptions::new().create(true).append(true).open(&self.path) {
                Ok(f) => self.file = Some(BufWriter::new(f)),
                Err(e) => {
                    log_warn("sink", "create.failed", &format!("{}: {}", self.path.display(), e));
                }
            }
        }
    }

    /// Append already-filtered, already-stamped bytes. `stamped` tells
    /// the sink whether this batch started at least one new line, which
    /// triggers the flush/sync policy.
    pub fn write(&mut self, bytes: &[u8], stamped: bool) -> io::Result<()> {
        let Some(file) = self.file.as_mut() else {
            return Ok(());
        };

        file.write_all(bytes)?;
        if stamped {
            file.flush()?;
            if self.sync_each_line {
                fdatasync(file.get_ref().as_fd()).map_err(io::Error::from)?;
            }
        }
        Ok(())
    }

    /// Shutdown bookkeeping: settle the trailing newline and flush.
    pub fn finish(&mut self) -> io::Result<()> {
        if let Some(mut file) = self.file.take() {
            if !self.ends_with_newline {
                file.write_all(b"\n")?;
            }
            file.flush()?;
        }
        Ok(())
    }
}
