//! Diagnostic logging for bootlogd itself.
//!
//! Emits JSONL records to stderr. The daemon runs before any log
//! partition is writable, so stderr (normally the initial console) is
//! the only place diagnostics can go. The captured transcript never
//! passes through here - it has its own sink.

use chrono::Utc;
use serde::Serialize;

/// Diagnostic record structure for safe JSON serialization
#[derive(Serialize)]
struct LogEntry<'a> {
    ts: String,
    level: String,
    subsystem: &'a str,
    event: &'a str,
    msg: &'a str,
}

/// Write one diagnostic record to stderr.
pub fn log(level: &str, subsystem: &str, event: &str, message: &str) {
    let entry = LogEntry {
        ts: Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        level: level.to_uppercase(),
        subsystem,
        event,
        msg: message,
    };

    // Serialize with serde_json for proper escaping
    if let Ok(line) = serde_json::to_string(&entry) {
        eprintln!("{}", line);
    }
}

/// Log info message
pub fn log_info(subsystem: &str, event: &str, message: &str) {
    log("info", subsystem, event, message);
}

/// Log warning message
pub fn log_warn(subsystem: &str, event: &str, message: &str) {
    log("warn", subsystem, event, message);
}

/// Log error message
pub fn log_error(subsystem: &str, event: &str, message: &str) {
    log("error", subsystem, event, message);
}
