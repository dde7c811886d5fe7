//! Fixed-capacity capture buffer between the pty and the log sink.
//!
//! A circular byte store with drop-oldest overwrite semantics: console
//! output keeps flowing whether or not the logfile can be opened yet,
//! and if the backlog overruns the arena the oldest unread bytes are
//! silently discarded. Exclusively owned by the driver - no locking.
//!
//! Reads and drains are both bounded by the distance to the arena end,
//! so neither ever wraps mid-call; a wrapped backlog simply takes one
//! more poll cycle to empty.

use std::os::fd::AsFd;

use nix::unistd::read;

/// Default arena size (1 MiB)
pub const DEFAULT_CAPACITY: usize = 1024 * 1024;

pub struct CaptureBuffer {
    arena: Vec<u8>,
    /// Next byte to fill. Always < arena.len().
    write: usize,
    /// Next byte to drain. Always < arena.len().
    read: usize,
    /// Bytes captured but not yet drained. Disambiguates read == write
    /// (empty vs just-overrun) where bare cursor arithmetic cannot.
    unread: usize,
}

impl CaptureBuffer {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "capture buffer capacity must be non-zero");
        Self {
            arena: vec![0; capacity],
            write: 0,
            read: 0,
            unread: 0,
        }
    }

    #[cfg(test)]
    pub fn capacity(&self) -> usize {
        self.arena.len()
    }

    /// Read from `fd` into the arena at the write cursor, bounded by the
    /// distance to the arena end. Returns the span just captured so the
    /// caller can relay the raw bytes immediately.
    ///
    /// If the incoming span overruns unread data, the read cursor is
    /// snapped to the new write cursor and the whole backlog is dropped.
    /// No error is signaled - by the time this happens the backlog was
    /// already stale.
    pub fn capture<F: AsFd>(&mut self, fd: &F) -> nix::Result<&[u8]> {
        let capacity = self.arena.len();
        let start = self.write;
        let n = read(fd, &mut self.arena[start..])?;

        let free = capacity - self.unread;
        self.write += n;
        if n > free {
            self.read = self.write;
            self.unread = 0;
        } else {
            self.unread += n;
        }
        if self.write >= capacity {
            self.write = 0;
        }
        if self.read >= capacity {
            self.read = 0;
        }

        Ok(&self.arena[start..start + n])
    }

    /// Length of the contiguous unread region starting at the read
    /// cursor. When the backlog wraps, only the part up to the arena end
    /// is reported; the remainder shows up on the next call.
    pub fn unread_len(&self) -> usize {
        if self.unread == 0 {
            0
        } else if self.write > self.read {
            self.write - self.read
        } else {
            self.arena.len() - self.read
        }
    }

    /// View `len` bytes at the read cursor and advance past them.
    /// `len` must not exceed `unread_len()`.
    pub fn drain(&mut self, len: usize) -> &[u8] {
        debug_assert!(len <= self.unread_len());
        let start = self.read;
        self.read += len;
        self.unread -= len;
        if self.read >= self.arena.len() {
            self.read = 0;
        }
        &self.arena[start..start + len]
    }

    #[cfg(test)]
    fn cursors(&self) -> (usize, usize) {
        (self.write, self.read)
    }
}
