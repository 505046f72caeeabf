//! Core configuration types.
//! - Config holds the defaults applied to transactions opened by the CLI.
//! - LogLevel represents verbosity with simple parsing helpers.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::options::{AtomicOptions, DebugFlags, OpenMode};

/// Program-defined verbosity levels exposed to users/config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    /// Only errors
    Quiet,
    /// Warnings and commits (default)
    #[default]
    Normal,
    /// Lifecycle events
    Info,
    /// Lock protocol steps
    Debug,
}

impl LogLevel {
    /// Parse common string names into our LogLevel (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "quiet" | "error" | "none" => Some(LogLevel::Quiet),
            "normal" | "warn" => Some(LogLevel::Normal),
            "info" | "verbose" => Some(LogLevel::Info),
            "debug" | "trace" => Some(LogLevel::Debug),
            _ => None,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Quiet => "quiet",
            LogLevel::Normal => "normal",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        };
        f.write_str(s)
    }
}

impl FromStr for LogLevel {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("invalid log level: '{s}'"))
    }
}

/// Settings read from config.xml and overridden by CLI flags.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Config {
    /// Backup extension for file commits (None = no backups unless rotating)
    pub backup_ext: Option<String>,
    /// Numbered backups to keep; slot count for new rotation directories
    pub rotate: u32,
    /// Lock wait; zero waits forever
    pub timeout: Duration,
    /// Fail fast on recursive locking
    pub strict: bool,
    /// Console verbosity
    pub log_level: LogLevel,
    /// Optional path to a log file
    pub log_file: Option<PathBuf>,
}

impl Config {
    /// Transaction options carrying these settings.
    pub fn file_options(&self, mode: OpenMode) -> AtomicOptions {
        AtomicOptions {
            mode,
            backup_ext: self.backup_ext.clone(),
            rotate: self.rotate,
            timeout: self.timeout,
            debug: DebugFlags {
                strict: self.strict,
                trace: self.log_level == LogLevel::Debug,
            },
            ..AtomicOptions::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_aliases() {
        assert_eq!(LogLevel::parse("TRACE"), Some(LogLevel::Debug));
        assert_eq!("none".parse::<LogLevel>(), Ok(LogLevel::Quiet));
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn options_follow_config() {
        let cfg = Config {
            backup_ext: Some(".bak".into()),
            rotate: 5,
            timeout: Duration::from_secs(7),
            strict: true,
            log_level: LogLevel::Debug,
            log_file: None,
        };
        let opts = cfg.file_options(OpenMode::Write);
        assert_eq!(opts.mode, OpenMode::Write);
        assert_eq!(opts.backup_ext.as_deref(), Some(".bak"));
        assert_eq!(opts.rotate, 5);
        assert_eq!(opts.timeout, Duration::from_secs(7));
        assert!(opts.debug.strict && opts.debug.trace);
    }
}
