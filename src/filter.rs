//! Escape stripping and line timestamping for the transcript.
//!
//! The consoles get the raw byte stream; only the logfile goes through
//! this path. Both transformers keep their state in explicit fields and
//! are resumable across arbitrarily chunked input - a control sequence
//! regularly straddles two pty reads.

use chrono::Local;

/// Escape-stripper state, carried across calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterState {
    /// Plain text
    Normal,
    /// Saw ESC; deciding between a single-char escape and a CSI sequence
    EscapeStart,
    /// Inside a CSI sequence; discarding until the final byte
    EscapeParams,
}

/// Removes terminal control sequences and carriage returns from a byte
/// stream. Never errors: unrecognized bytes pass through.
pub struct EscapeFilter {
    state: FilterState,
}

impl Default for EscapeFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl EscapeFilter {
    pub fn new() -> Self {
        Self {
            state: FilterState::Normal,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> FilterState {
        self.state
    }

    /// Feed one byte; returns true when the byte should be kept.
    pub fn feed(&mut self, byte: u8) -> bool {
        match self.state {
            FilterState::Normal => match byte {
                b'\r' => false,
                0x1b => {
                    self.state = FilterState::EscapeStart;
                    false
                }
                _ => true,
            },
            FilterState::EscapeStart => match byte {
                b'[' => {
                    self.state = FilterState::EscapeParams;
                    false
                }
                0x40..=0x5f => {
                    // single-char escape
                    self.state = FilterState::Normal;
                    false
                }
                _ => {
                    self.state = FilterState::Normal;
                    true
                }
            },
            FilterState::EscapeParams => match byte {
                // parameter and intermediate bytes
                b'0'..=b'9' | b';' | 0x20..=0x2f => false,
                // final byte
                0x40..=0x7e => {
                    self.state = FilterState::Normal;
                    false
                }
                // Bytes outside both ranges leak through without a state
                // reset. Matches the historical stripper; a malformed
                // sequence can spill stray bytes into the transcript.
                _ => true,
            },
        }
    }
}

/// Prefixes a wall-clock timestamp at the start of every raw line and
/// runs the bytes through the escape filter.
///
/// Line-start detection uses the raw pre-filter stream: the prefix is
/// written whenever the previous raw byte was `\n` (and before the very
/// first byte of the process lifetime), even if the byte that triggered
/// it is then filtered out.
pub struct LineStamper {
    filter: EscapeFilter,
    at_line_start: bool,
}

impl Default for LineStamper {
    fn default() -> Self {
        Self::new()
    }
}

impl LineStamper {
    pub fn new() -> Self {
        Self {
            filter: EscapeFilter::new(),
            at_line_start: true,
        }
    }

    /// Filter `raw` into `out`, stamping line starts. Returns true when
    /// at least one timestamp was written, which is the sink's cue to
    /// flush.
    pub fn process(&mut self, raw: &[u8], out: &mut Vec<u8>) -> bool {
        let mut stamped = false;

        for &byte in raw {
            if self.at_line_start {
                out.extend_from_slice(timestamp_prefix().as_bytes());
                stamped = true;
            }
            if self.filter.feed(byte) {
                out.push(byte);
            }
            self.at_line_start = byte == b'\n';
        }

        stamped
    }

    #[cfg(test)]
    pub fn filter_state(&self) -> FilterState {
        self.filter.state()
    }
}

/// ctime()-style fixed-width stamp, e.g. "Fri Aug 29 07:05:03 2026: ".
/// The date part is always exactly 24 characters.
fn timestamp_prefix() -> String {
    format!("{}: ", Local::now().format("%a %b %e %H:%M:%S %Y"))
}
