//! Command-line options.
//!
//! Flag surface:
//!   -l <logfile>   transcript path (default /run/log/stage-1.log)
//!   -r             rotate an existing logfile to <logfile>~ on open
//!   -c             create the logfile if it does not exist
//!   -s             fdatasync after every timestamped write
//!   -v             print version and exit

use std::path::PathBuf;

/// Default transcript location. /run is a tmpfs that exists before any
/// persistent partition is mounted; an init script later moves the file.
pub const DEFAULT_LOGFILE: &str = "/run/log/stage-1.log";

/// Runtime options, supplied to the sink at construction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Transcript file path
    pub log_path: PathBuf,
    /// Rename an existing logfile to `<path>~` before opening
    pub rotate: bool,
    /// Create the logfile when the path does not exist yet
    pub create: bool,
    /// Force written data to stable storage after every stamped line
    pub sync_each_line: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_path: PathBuf::from(DEFAULT_LOGFILE),
            rotate: false,
            create: false,
            sync_each_line: false,
        }
    }
}

/// Action to take based on command-line arguments
#[derive(Debug, PartialEq, Eq)]
pub enum Action {
    /// Run the capture daemon with these options
    Run(Config),
    /// Print version and exit 0
    Version,
}

/// Parse arguments (without argv[0]). Unknown flags and a missing `-l`
/// argument produce the usage string as the error.
pub fn parse_args(args: &[String]) -> Result<Action, String> {
    let mut config = Config::default();
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-l" => match iter.next() {
                Some(path) => config.log_path = PathBuf::from(path),
                None => return Err(usage()),
            },
            "-r" => config.rotate = true,
            "-c" => config.create = true,
            "-s" => config.sync_each_line = true,
            "-v" => return Ok(Action::Version),
            _ => return Err(usage()),
        }
    }

    Ok(Action::Run(config))
}

pub fn usage() -> String {
    "Usage: bootlogd [-v] [-r] [-s] [-c] [-l logfile]".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_no_args_runs_with_defaults() {
        match parse_args(&args(&[])) {
            Ok(Action::Run(config)) => assert_eq!(config, Config::default()),
            other => panic!("expected Run with defaults, got {:?}", other),
        }
    }

    #[test]
    fn test_logfile_flag() {
        match parse_args(&args(&["-l", "/tmp/boot.log"])) {
            Ok(Action::Run(config)) => {
                assert_eq!(config.log_path, PathBuf::from("/tmp/boot.log"));
            }
            other => panic!("expected Run, got {:?}", other),
        }
    }

    #[test]
    fn test_all_boolean_flags() {
        match parse_args(&args(&["-r", "-c", "-s"])) {
            Ok(Action::Run(config)) => {
                assert!(config.rotate);
                assert!(config.create);
                assert!(config.sync_each_line);
                assert_eq!(config.log_path, PathBuf::from(DEFAULT_LOGFILE));
            }
            other => panic!("expected Run, got {:?}", other),
        }
    }

    #[test]
    fn test_version_flag() {
        assert_eq!(parse_args(&args(&["-v"])), Ok(Action::Version));
    }

    #[test]
    fn test_version_wins_over_other_flags() {
        assert_eq!(parse_args(&args(&["-r", "-v", "-c"])), Ok(Action::Version));
    }

    #[test]
    fn test_unknown_flag_is_usage_error() {
        assert_eq!(parse_args(&args(&["-x"])), Err(usage()));
    }

    #[test]
    fn test_positional_argument_is_usage_error() {
        assert_eq!(parse_args(&args(&["logfile"])), Err(usage()));
    }

    #[test]
    fn test_logfile_flag_without_value_is_usage_error() {
        assert_eq!(parse_args(&args(&["-r", "-l"])), Err(usage()));
    }
}
