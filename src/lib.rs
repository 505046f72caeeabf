//! Core library for `atomicfile`.
//!
//! Crash-safe, NFS-safe atomic updates for single files ([`AtomicFile`]) and
//! for rotating sets of versioned directories ([`AtomicDir`]). Writers are
//! serialized by a hard-link lock next to the target; readers never lock and
//! always see a complete version.
//!
//! ```no_run
//! use atomicfile::{AtomicFile, AtomicOptions, OpenMode};
//!
//! let opts = AtomicOptions::new(OpenMode::CreateIfMissing).backup_ext(".bak");
//! let file = AtomicFile::open("settings.conf", opts)?;
//! file.commit_bytes(b"key = value\n")?;
//! # Ok::<(), atomicfile::AtomicError>(())
//! ```

pub mod config;
pub mod dir;
pub mod errors;
pub mod file;
pub mod fs_ops;
pub mod options;
pub mod output;
pub mod platform;

pub use config::{Config, LogLevel, load_config, load_config_from_xml_path, path_has_symlink_ancestor};
pub use dir::{AtomicDir, version_of};
pub use errors::{AtomicError, Result};
pub use file::AtomicFile;
pub use fs_ops::describe;
pub use options::{AtomicOptions, DebugFlags, OpenMode};
