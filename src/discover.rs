//! Discovery of the real console devices.
//!
//! The kernel command line names the consoles (`console=ttyS0,115200
//! console=tty0` and similar); the last entry is the kernel's primary,
//! so tokens are scanned in reverse. Each candidate is mapped through a
//! prefix table to device paths (including the historical devfs spots)
//! and kept only when a probe open succeeds. If the command line names
//! nothing usable, a static fallback list is probed instead.

use std::fs;

use anyhow::{Context, Result};
use nix::fcntl::{OFlag, open};
use nix::mount::{MsFlags, mount, umount};
use nix::sys::stat::{Mode, stat};

use crate::console::MAX_CONSOLES;
use crate::log::log_warn;

struct ConsDev {
    /// Name prefix as it appears in console=
    prefix: &'static str,
    /// Device path prefix the suffix is appended to
    dev: &'static str,
    /// devfs-style alternate, probed first
    alt: Option<&'static str>,
}

/// Match order matters: longer prefixes first so ttySC0 is not taken
/// for a ttyS device.
const CONSDEV: &[ConsDev] = &[
    ConsDev { prefix: "ttyB", dev: "/dev/ttyB", alt: None },
    ConsDev { prefix: "ttySC", dev: "/dev/ttySC", alt: Some("/dev/ttsc/") },
    ConsDev { prefix: "ttyS", dev: "/dev/ttyS", alt: Some("/dev/tts/") },
    ConsDev { prefix: "tty", dev: "/dev/tty", alt: Some("/dev/vc/") },
    ConsDev { prefix: "hvc", dev: "/dev/hvc", alt: Some("/dev/hvc/") },
];

/// Devices to try when the command line names no usable console.
/// Probed left to right; only the first hit is used.
const DEFAULT_CONSOLES: &[&str] = &["tty0", "hvc0", "ttyS0", "ttySC0", "ttyB0"];

/// Device paths a console= value may map to, alternate first. Empty for
/// names outside the table or without a unit number. Anything after a
/// comma (baud rate, parity) is dropped.
fn candidate_paths(name: &str) -> Vec<String> {
    for entry in CONSDEV {
        let Some(rest) = name.strip_prefix(entry.prefix) else {
            continue;
        };
        if !rest.starts_with(|c: char| c.is_ascii_digit()) {
            continue;
        }
        let unit = rest.split(',').next().unwrap_or(rest);
        let mut paths = Vec::with_capacity(2);
        if let Some(alt) = entry.alt {
            paths.push(format!("{}{}", alt, unit));
        }
        paths.push(format!("{}{}", entry.dev, unit));
        return paths;
    }
    Vec::new()
}

/// First candidate for `name` that the probe accepts.
fn resolve_device(name: &str, probe: &mut impl FnMut(&str) -> bool) -> Option<String> {
    candidate_paths(name).into_iter().find(|p| probe(p))
}

/// Scan the command line in reverse for console= entries, resolving and
/// deduplicating as we go, capped at MAX_CONSOLES.
fn resolve_consoles(cmdline: &str, probe: &mut impl FnMut(&str) -> bool) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();

    for token in cmdline.split_ascii_whitespace().rev() {
        let Some(name) = token.strip_prefix("console=") else {
            continue;
        };
        let Some(path) = resolve_device(name, probe) else {
            continue;
        };
        if found.contains(&path) {
            continue;
        }
        found.push(path);
        if found.len() >= MAX_CONSOLES {
            break;
        }
    }

    found
}

/// Writing to the "current VC" device would loop our own output back
/// through the console we redirected, so pin it to the first VC.
fn vc_substitute(path: String) -> String {
    match path.as_str() {
        "/dev/tty0" => "/dev/tty1".to_string(),
        "/dev/vc/0" => "/dev/vc/1".to_string(),
        _ => path,
    }
}

/// Probe a device path: can it be opened at all? Non-blocking so a
/// serial port without carrier answers immediately.
fn probe_device(path: &str) -> bool {
    open(path, OFlag::O_RDONLY | OFlag::O_NONBLOCK, Mode::empty()).is_ok()
}

/// Read /proc/cmdline, mounting /proc transiently when it is not
/// mounted yet (this daemon starts very early).
fn read_cmdline() -> Result<String> {
    let root = stat("/").context("stat /")?;
    let proc = stat("/proc").context("stat /proc")?;

    let didmount = root.st_dev == proc.st_dev;
    if didmount {
        mount(
            Some("proc"),
            "/proc",
            Some("proc"),
            MsFlags::empty(),
            None::<&str>,
        )
        .context("mount /proc")?;
    }

    let cmdline = fs::read_to_string("/proc/cmdline").context("read /proc/cmdline");

    if didmount {
        if let Err(e) = umount("/proc") {
            log_warn("discover", "umount.failed", &format!("/proc: {}", e));
        }
    }

    cmdline
}

/// Ordered console device paths for the fanout. An empty result means
/// no console could be deduced, which is fatal to the caller.
pub fn discover_consoles() -> Result<Vec<String>> {
    let cmdline = read_cmdline()?;
    let mut probe = probe_device;

    let mut found = resolve_consoles(&cmdline, &mut probe);
    if found.is_empty() {
        for name in DEFAULT_CONSOLES {
            if let Some(path) = resolve_device(name, &mut probe) {
                found.push(path);
                break;
            }
        }
    }

    Ok(found.into_iter().map(vc_substitute).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accept_all(_: &str) -> bool {
        true
    }

    #[test]
    fn test_candidate_paths_serial() {
        assert_eq!(
            candidate_paths("ttyS0"),
            vec!["/dev/tts/0".to_string(), "/dev/ttyS0".to_string()]
        );
    }

    #[test]
    fn test_candidate_paths_strip_baud_suffix() {
        assert_eq!(
            candidate_paths("ttyS1,115200n8"),
            vec!["/dev/tts/1".to_string(), "/dev/ttyS1".to_string()]
        );
    }

    #[test]
    fn test_candidate_paths_longest_prefix_wins() {
        assert_eq!(
            candidate_paths("ttySC3"),
            vec!["/dev/ttsc/3".to_string(), "/dev/ttySC3".to_string()]
        );
    }

    #[test]
    fn test_candidate_paths_require_unit_digit() {
        assert!(candidate_paths("ttyS").is_empty());
        assert!(candidate_paths("ttyUSB0").is_empty());
        assert!(candidate_paths("netcon0").is_empty());
    }

    #[test]
    fn test_candidate_paths_no_alternate_for_ttyb() {
        assert_eq!(candidate_paths("ttyB2"), vec!["/dev/ttyB2".to_string()]);
    }

    #[test]
    fn test_resolve_prefers_first_probed_candidate() {
        // Alternate path rejected, primary accepted.
        let mut probe = |p: &str| p == "/dev/ttyS0";
        assert_eq!(
            resolve_device("ttyS0", &mut probe),
            Some("/dev/ttyS0".to_string())
        );
    }

    #[test]
    fn test_resolve_consoles_reverse_order() {
        let mut probe = |p: &str| p.starts_with("/dev/tty");
        let found = resolve_consoles("ro console=ttyS0 quiet console=tty0", &mut probe);
        // Last console= first: it is the kernel's primary.
        assert_eq!(found, vec!["/dev/tty0".to_string(), "/dev/ttyS0".to_string()]);
    }

    #[test]
    fn test_resolve_consoles_suppresses_duplicates() {
        let mut probe = |p: &str| p.starts_with("/dev/ttyS");
        let found = resolve_consoles("console=ttyS0 console=ttyS0,115200", &mut probe);
        assert_eq!(found, vec!["/dev/ttyS0".to_string()]);
    }

    #[test]
    fn test_resolve_consoles_skips_unprobeable() {
        let mut probe = |p: &str| p == "/dev/tty1";
        let found = resolve_consoles("console=ttyS0 console=tty1", &mut probe);
        assert_eq!(found, vec!["/dev/tty1".to_string()]);
    }

    #[test]
    fn test_resolve_consoles_empty_without_console_entries() {
        assert!(resolve_consoles("ro quiet splash", &mut accept_all).is_empty());
    }

    #[test]
    fn test_resolve_consoles_caps_at_max() {
        let cmdline: String = (0..MAX_CONSOLES + 4)
            .map(|i| format!("console=ttyS{} ", i))
            .collect();
        let mut probe = |p: &str| p.starts_with("/dev/ttyS");
        let found = resolve_consoles(&cmdline, &mut probe);
        assert_eq!(found.len(), MAX_CONSOLES);
    }

    #[test]
    fn test_vc_substitution() {
        assert_eq!(vc_substitute("/dev/tty0".to_string()), "/dev/tty1");
        assert_eq!(vc_substitute("/dev/vc/0".to_string()), "/dev/vc/1");
        assert_eq!(vc_substitute("/dev/ttyS0".to_string()), "/dev/ttyS0");
    }
}
