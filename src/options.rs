//! Open options shared by file transactions and rotation directories.
//! - OpenMode selects read-only, write, or write-creating-if-missing.
//! - AtomicOptions carries backups, lock timeout, creation ownership and debug flags.

use std::time::Duration;

use crate::errors::{AtomicError, Result};

/// How a transaction opens its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpenMode {
    /// Lock-free reader.
    #[default]
    Read,
    /// Exclusive writer; the target must already exist.
    Write,
    /// Exclusive writer; a missing target is created on commit.
    CreateIfMissing,
}

impl OpenMode {
    #[inline]
    pub fn is_write(self) -> bool {
        !matches!(self, OpenMode::Read)
    }
}

/// Extra diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DebugFlags {
    /// Refuse to acquire a lock this process already holds.
    pub strict: bool,
    /// Log every lock protocol step at debug level instead of trace.
    pub trace: bool,
}

/// Options for [`AtomicFile::open`](crate::AtomicFile::open) and
/// [`AtomicDir::open`](crate::AtomicDir::open).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtomicOptions {
    pub mode: OpenMode,
    /// Appended to the target name to form backup names. Must not be empty.
    pub backup_ext: Option<String>,
    /// Number of numbered backups to keep (0 = single unnumbered backup, if
    /// `backup_ext` is set). For directories: slot count on creation.
    pub rotate: u32,
    /// How long to wait for the lock. Zero waits forever.
    pub timeout: Duration,
    /// Do not lock in `open`; call `lock()` later.
    pub defer_lock: bool,
    /// Owner for newly created targets (None = current user).
    pub owner: Option<u32>,
    /// Group for newly created targets (None = current group).
    pub group: Option<u32>,
    /// Permission bits for newly created targets, masked by the umask.
    pub create_mode: u32,
    pub debug: DebugFlags,
}

impl Default for AtomicOptions {
    fn default() -> Self {
        Self {
            mode: OpenMode::Read,
            backup_ext: None,
            rotate: 0,
            timeout: Duration::ZERO,
            defer_lock: false,
            owner: None,
            group: None,
            create_mode: 0o666,
            debug: DebugFlags::default(),
        }
    }
}

impl AtomicOptions {
    /// Options with the given mode; everything else defaulted.
    pub fn new(mode: OpenMode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }

    pub fn backup_ext(mut self, ext: impl Into<String>) -> Self {
        self.backup_ext = Some(ext.into());
        self
    }

    pub fn rotate(mut self, depth: u32) -> Self {
        self.rotate = depth;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn defer_lock(mut self, defer: bool) -> Self {
        self.defer_lock = defer;
        self
    }

    pub fn create_mode(mut self, mode: u32) -> Self {
        self.create_mode = mode;
        self
    }

    pub fn owner(mut self, uid: u32) -> Self {
        self.owner = Some(uid);
        self
    }

    pub fn group(mut self, gid: u32) -> Self {
        self.group = Some(gid);
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.debug.strict = strict;
        self
    }

    pub fn trace(mut self, trace: bool) -> Self {
        self.debug.trace = trace;
        self
    }

    /// Check the options and resolve the effective backup extension.
    ///
    /// An empty extension would alias the backup onto the original, so it is
    /// rejected here rather than at commit time. Rotation without an explicit
    /// extension uses `"."` (`name.1`, `name.2`, ...).
    pub(crate) fn effective_backup_ext(&self) -> Result<Option<String>> {
        match self.backup_ext.as_deref() {
            Some("") => Err(AtomicError::EmptyBackupExt),
            Some(ext) => Ok(Some(ext.to_owned())),
            None if self.rotate > 0 => Ok(Some(".".to_owned())),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_extension_rejected() {
        let opts = AtomicOptions::new(OpenMode::Write).backup_ext("");
        assert!(matches!(
            opts.effective_backup_ext(),
            Err(AtomicError::EmptyBackupExt)
        ));
    }

    #[test]
    fn builder_sets_ownership_and_debug() {
        let opts = AtomicOptions::new(OpenMode::CreateIfMissing)
            .owner(1000)
            .group(100)
            .trace(true)
            .strict(true);
        assert_eq!(opts.owner, Some(1000));
        assert_eq!(opts.group, Some(100));
        assert_eq!(opts.debug, DebugFlags { strict: true, trace: true });
        assert_eq!(AtomicOptions::default().create_mode, 0o666);
    }

    #[test]
    fn rotation_defaults_to_dot_extension() {
        let opts = AtomicOptions::new(OpenMode::Write).rotate(3);
        assert_eq!(opts.effective_backup_ext().unwrap().as_deref(), Some("."));
        let plain = AtomicOptions::new(OpenMode::Write);
        assert_eq!(plain.effective_backup_ext().unwrap(), None);
    }
}
