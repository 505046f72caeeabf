//! CLI definition and parsing.
//! Defines Args and provides parse() for command-line handling.
//!
//! Notes:
//! - --debug is a shorthand for --log-level debug.
//! - Flags given on a subcommand override the config file.

use clap::{Args as ClapArgs, Parser, Subcommand, ValueHint};
use std::path::PathBuf;
use std::time::Duration;

use atomicfile::{Config, LogLevel};

/// Atomic, NFS-safe file and directory updates from the shell.
/// CLI flags override config values (which are loaded from XML if present).
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Crash-safe atomic file and directory updates")]
pub struct Args {
    /// Enable debug logging (equivalent to `--log-level debug`).
    #[arg(short = 'd', long, global = true, help = "Enable debug logging (shorthand for --log-level debug)")]
    pub debug: bool,

    /// Set log level. One of: quiet, normal, info, debug.
    #[arg(long, global = true, help = "Set log level: quiet, normal, info, debug")]
    pub log_level: Option<String>,

    /// Emit logs in structured JSON.
    #[arg(long, global = true, help = "Emit logs in structured JSON")]
    pub json: bool,

    /// Also append logs to this file.
    #[arg(long, global = true, value_hint = ValueHint::FilePath)]
    pub log_file: Option<PathBuf>,

    /// Read settings from this config.xml instead of the default location.
    #[arg(long, global = true, value_hint = ValueHint::FilePath)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Replace PATH with the contents of stdin, atomically.
    Write {
        #[arg(value_hint = ValueHint::FilePath)]
        path: PathBuf,

        /// Create PATH if it does not exist.
        #[arg(long)]
        create: bool,

        #[command(flatten)]
        tx: TxArgs,
    },

    /// Print the committed contents of PATH.
    Cat {
        #[arg(value_hint = ValueHint::FilePath)]
        path: PathBuf,
    },

    /// Versioned rotation directories.
    #[command(subcommand)]
    Dir(DirCommand),
}

#[derive(Subcommand, Debug, Clone)]
pub enum DirCommand {
    /// Create a rotation directory (no-op if it already exists).
    Init {
        #[arg(value_hint = ValueHint::DirPath)]
        root: PathBuf,

        /// Number of slots (minimum 3).
        #[arg(long)]
        slots: Option<u32>,
    },

    /// Print the live slot directory.
    Current {
        #[arg(value_hint = ValueHint::DirPath)]
        root: PathBuf,
    },

    /// Copy a tree into the next slot and make it current.
    Commit {
        #[arg(value_hint = ValueHint::DirPath)]
        root: PathBuf,

        /// Directory whose contents become the new version.
        #[arg(long, value_hint = ValueHint::DirPath)]
        from: PathBuf,

        /// Version tag recorded with the slot.
        #[arg(long)]
        version: Option<String>,

        #[command(flatten)]
        tx: TxArgs,
    },

    /// Make SLOT current again.
    Rollback {
        #[arg(value_hint = ValueHint::DirPath)]
        root: PathBuf,

        slot: u32,

        #[command(flatten)]
        tx: TxArgs,
    },

    /// List slots newest first with their version tags.
    List {
        #[arg(value_hint = ValueHint::DirPath)]
        root: PathBuf,
    },
}

/// Options shared by writing commands.
#[derive(ClapArgs, Debug, Clone, Default)]
pub struct TxArgs {
    /// Keep a backup of the previous version with this extension.
    #[arg(long)]
    pub backup_ext: Option<String>,

    /// Keep this many numbered backups.
    #[arg(long)]
    pub rotate: Option<u32>,

    /// Give up waiting for the lock after this many seconds (0 = forever).
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Fail instead of deadlocking when this process already holds the lock.
    #[arg(long)]
    pub strict: bool,
}

impl TxArgs {
    /// Apply these flags to a loaded Config (in-place). No-ops for unset flags.
    pub fn apply(&self, cfg: &mut Config) {
        if let Some(ext) = &self.backup_ext {
            cfg.backup_ext = Some(ext.clone());
        }
        if let Some(n) = self.rotate {
            cfg.rotate = n;
        }
        if let Some(secs) = self.timeout {
            cfg.timeout = Duration::from_secs(secs);
        }
        if self.strict {
            cfg.strict = true;
        }
    }
}

impl Args {
    /// Effective log level derived from flags.
    /// Precedence: --debug > --log-level value > None (use config default).
    pub fn effective_log_level(&self) -> Option<LogLevel> {
        if self.debug {
            return Some(LogLevel::Debug);
        }
        self.log_level.as_deref().and_then(LogLevel::parse)
    }

    /// Apply CLI overrides to a loaded Config (in-place). No-ops for unset flags.
    pub fn apply_overrides(&self, cfg: &mut Config) {
        if let Some(level) = self.effective_log_level() {
            cfg.log_level = level;
        }
        if let Some(p) = &self.log_file {
            cfg.log_file = Some(p.clone());
        }
        match &self.command {
            Command::Write { tx, .. }
            | Command::Dir(DirCommand::Commit { tx, .. })
            | Command::Dir(DirCommand::Rollback { tx, .. }) => tx.apply(cfg),
            Command::Dir(DirCommand::Init { slots: Some(n), .. }) => cfg.rotate = *n,
            _ => {}
        }
    }
}

pub fn parse() -> Args {
    Args::parse()
}
