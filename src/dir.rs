//! Versioned rotation directories.
//!
//! Layout under a root `R`:
//! - `R/.lock`     guard file; writers hold an `AtomicFile` on it.
//! - `R/.top`      slot count `N` followed by a newline, fixed at creation.
//! - `R/1 ..= R/N` the slots.
//! - `R/current`   symlink naming the live slot (`"3"`).
//! - `R/<n>/atomic_version` optional symlink whose target is a version tag.
//!
//! A writer prepares the slot after `current` and publishes it by renaming a
//! fresh symlink over `current`. Readers resolve `current` once and use that
//! slot; it cannot be reused until `N - 1` further commits have happened.

use std::fs;
use std::io;
use std::ops::ControlFlow;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::errors::{AtomicError, Result};
use crate::file::AtomicFile;
use crate::fs_ops::util::{fsync_dir, unique_sibling};
use crate::options::{AtomicOptions, OpenMode};
use crate::platform::may_update;

pub const MIN_SLOTS: u32 = 3;
pub const VERSION_LINK: &str = "atomic_version";
/// Longest version tag kept, in characters.
pub const VERSION_MAX_LEN: usize = 254;

const LOCK_NAME: &str = ".lock";
const TOP_NAME: &str = ".top";
const CURRENT_NAME: &str = "current";

/// An open rotation directory.
#[derive(Debug)]
pub struct AtomicDir {
    root: PathBuf,
    current: PathBuf,
    top: u32,
    mode: OpenMode,
    // Some iff opened for writing and not yet committed/closed.
    lock: Option<AtomicFile>,
}

impl AtomicDir {
    /// Open (or with `CreateIfMissing`, initialise) the rotation directory at
    /// `root`.
    ///
    /// `opts.rotate` is the slot count used on creation (at least three).
    /// Backup extension and lock deferral do not apply to directories.
    pub fn open(root: impl AsRef<Path>, opts: AtomicOptions) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let mode = opts.mode;
        let slots = opts.rotate.max(MIN_SLOTS);
        let file_opts = AtomicOptions {
            backup_ext: None,
            rotate: 0,
            defer_lock: false,
            ..opts
        };

        match fs::metadata(&root) {
            Ok(meta) if !meta.is_dir() => return Err(AtomicError::NotDirectory { path: root }),
            Ok(meta) if mode.is_write() && !may_update(&meta) => {
                return Err(AtomicError::NotOwner { path: root });
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound && mode == OpenMode::CreateIfMissing => {
                fs::create_dir(&root).map_err(|source| AtomicError::CantMkdir {
                    path: root.clone(),
                    source,
                })?;
                debug!(root = %root.display(), "created rotation root");
            }
            Err(source) => return Err(AtomicError::CantOpen { path: root, source }),
        }

        let lock = open_guard(&root, &file_opts)?;
        let top = read_or_init_top(&root, slots, &file_opts)?;

        let this = Self {
            current: root.join(CURRENT_NAME),
            root,
            top,
            mode,
            lock,
        };
        if this.current_slot()?.is_none() && mode != OpenMode::CreateIfMissing {
            return Err(AtomicError::NoCurrent {
                path: this.current.clone(),
            });
        }
        debug!(root = %this.root.display(), ?mode, slots = top, "opened rotation directory");
        Ok(this)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// Number of slots, as recorded in `.top`.
    pub fn slot_count(&self) -> u32 {
        self.top
    }

    pub fn slot_path(&self, slot: u32) -> PathBuf {
        self.root.join(slot.to_string())
    }

    /// Slot named by `current`, re-read on every call. `None` until the first
    /// commit.
    pub fn current_slot(&self) -> Result<Option<u32>> {
        let target = match fs::read_link(&self.current) {
            Ok(t) => t,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(AtomicError::CantRead {
                    path: self.current.clone(),
                    source,
                });
            }
        };
        target
            .to_str()
            .and_then(|s| s.parse::<u32>().ok())
            .filter(|n| (1..=self.top).contains(n))
            .map(Some)
            .ok_or_else(|| AtomicError::InvalidCurrent {
                path: self.current.clone(),
            })
    }

    /// Directory of the live slot.
    pub fn current_dir(&self) -> Result<PathBuf> {
        match self.current_slot()? {
            Some(n) => Ok(self.slot_path(n)),
            None => Err(AtomicError::NoCurrent {
                path: self.current.clone(),
            }),
        }
    }

    /// Slot the next commit will publish: the one after `current`, or slot 1
    /// before the first commit.
    pub fn scratch_slot(&self) -> Result<u32> {
        if !self.mode.is_write() {
            return Err(AtomicError::OpenedReadOnly {
                path: self.root.clone(),
            });
        }
        Ok(self.current_slot()?.unwrap_or(0) % self.top + 1)
    }

    pub fn scratch_dir(&self) -> Result<PathBuf> {
        Ok(self.slot_path(self.scratch_slot()?))
    }

    /// Version tag of `slot`, if one was recorded.
    pub fn version(&self, slot: u32) -> Option<String> {
        version_of(&self.slot_path(slot))
    }

    /// Visit every slot once, newest first, wrapping around after the last.
    /// Stops early when `f` breaks. Returns how many slots were visited.
    pub fn scan<F>(&self, mut f: F) -> Result<u32>
    where
        F: FnMut(&Path, u32) -> ControlFlow<()>,
    {
        let mut slot = self.current_slot()?.unwrap_or(1);
        let mut visited = 0;
        for _ in 0..self.top {
            visited += 1;
            if f(&self.slot_path(slot), slot).is_break() {
                break;
            }
            slot = slot % self.top + 1;
        }
        Ok(visited)
    }

    /// Publish the scratch slot, tagging it with `version` when given, and
    /// release the directory.
    pub fn commit(mut self, version: Option<&str>) -> Result<()> {
        let slot = self.scratch_slot()?;
        let link = self.slot_path(slot).join(VERSION_LINK);
        match fs::remove_file(&link) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => return Err(AtomicError::CantUnlink { path: link, source }),
        }
        if let Some(v) = version {
            let tag = truncate_version(v);
            symlink(tag, &link).map_err(|source| AtomicError::CantLink {
                from: PathBuf::from(tag),
                to: link.clone(),
                source,
            })?;
        }
        self.swap_current(slot)?;
        info!(root = %self.root.display(), slot, version = version.unwrap_or(""), "committed slot");
        self.release()
    }

    /// Point `current` at `slot` and release the directory.
    pub fn rollback(mut self, slot: u32) -> Result<()> {
        if !self.mode.is_write() {
            return Err(AtomicError::OpenedReadOnly {
                path: self.root.clone(),
            });
        }
        if !(1..=self.top).contains(&slot) {
            return Err(AtomicError::InvalidSlot { slot, top: self.top });
        }
        self.swap_current(slot)?;
        info!(root = %self.root.display(), slot, "rolled back");
        self.release()
    }

    /// Release the directory without changing `current`.
    pub fn close(mut self) -> Result<()> {
        self.release()
    }

    fn swap_current(&self, slot: u32) -> Result<()> {
        let tmp = unique_sibling(&self.current);
        symlink(slot.to_string(), &tmp).map_err(|source| AtomicError::CantLink {
            from: PathBuf::from(slot.to_string()),
            to: tmp.clone(),
            source,
        })?;
        if let Err(source) = fs::rename(&tmp, &self.current) {
            let _ = fs::remove_file(&tmp);
            return Err(AtomicError::CantRename {
                from: tmp,
                to: self.current.clone(),
                source,
            });
        }
        let _ = fsync_dir(&self.root);
        Ok(())
    }

    /// Committing the (empty) guard both releases it and makes sure `.lock`
    /// exists for readers.
    fn release(&mut self) -> Result<()> {
        match self.lock.take() {
            Some(guard) => guard.commit_bytes(b""),
            None => Ok(()),
        }
    }
}

impl Drop for AtomicDir {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!(root = %self.root.display(), error = %e, "releasing rotation directory failed");
        }
    }
}

/// Version tag recorded in slot directory `dir`, if any.
pub fn version_of(dir: &Path) -> Option<String> {
    let target = fs::read_link(dir.join(VERSION_LINK)).ok()?;
    Some(truncate_version(&target.to_string_lossy()).to_owned())
}

fn truncate_version(v: &str) -> &str {
    match v.char_indices().nth(VERSION_MAX_LEN) {
        Some((i, _)) => &v[..i],
        None => v,
    }
}

/// Writers hold `.lock` for the whole session; readers only require it to
/// exist.
fn open_guard(root: &Path, opts: &AtomicOptions) -> Result<Option<AtomicFile>> {
    let path = root.join(LOCK_NAME);
    if !opts.mode.is_write() {
        return match fs::symlink_metadata(&path) {
            Ok(_) => Ok(None),
            Err(_) => Err(AtomicError::Uninitialised {
                path: root.to_path_buf(),
            }),
        };
    }
    match AtomicFile::open(&path, opts.clone()) {
        Ok(guard) => Ok(Some(guard)),
        Err(AtomicError::CantOpen { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
            Err(AtomicError::Uninitialised {
                path: root.to_path_buf(),
            })
        }
        Err(e) => Err(e),
    }
}

/// Read the slot count from `.top`; when creating and it is absent, record
/// `slots` and create the slot directories.
fn read_or_init_top(root: &Path, slots: u32, opts: &AtomicOptions) -> Result<u32> {
    let path = root.join(TOP_NAME);
    let creating = opts.mode == OpenMode::CreateIfMissing;
    let top_opts = AtomicOptions {
        mode: if creating { OpenMode::CreateIfMissing } else { OpenMode::Read },
        ..opts.clone()
    };

    let mut top = match AtomicFile::open(&path, top_opts) {
        Ok(f) => f,
        Err(AtomicError::CantOpen { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
            return Err(AtomicError::Uninitialised {
                path: root.to_path_buf(),
            });
        }
        Err(e) => return Err(e),
    };

    let first = top.read_line()?.map(<[u8]>::to_vec).unwrap_or_default();
    if !first.is_empty() {
        let n = parse_top(&first).ok_or_else(|| AtomicError::InvalidCurrent { path: path.clone() })?;
        top.close()?;
        return Ok(n);
    }
    if !creating {
        return Err(AtomicError::Uninitialised {
            path: root.to_path_buf(),
        });
    }

    top.commit_bytes(format!("{slots}\n").as_bytes())?;
    for i in 1..=slots {
        let slot = root.join(i.to_string());
        match fs::create_dir(&slot) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(source) => return Err(AtomicError::CantMkdir { path: slot, source }),
        }
    }
    debug!(root = %root.display(), slots, "initialised slots");
    Ok(slots)
}

/// Decimal digits optionally followed by a line ending; at least `MIN_SLOTS`.
fn parse_top(line: &[u8]) -> Option<u32> {
    let digits = line.iter().take_while(|b| b.is_ascii_digit()).count();
    let rest = &line[digits..];
    if digits == 0 || !(rest.is_empty() || rest[0] == b'\n' || rest[0] == b'\r') {
        return None;
    }
    let n: u32 = std::str::from_utf8(&line[..digits]).ok()?.parse().ok()?;
    (n >= MIN_SLOTS).then_some(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn top_parsing() {
        assert_eq!(parse_top(b"3\n"), Some(3));
        assert_eq!(parse_top(b"12\r\n"), Some(12));
        assert_eq!(parse_top(b"7"), Some(7));
        assert_eq!(parse_top(b"2\n"), None);
        assert_eq!(parse_top(b"x\n"), None);
        assert_eq!(parse_top(b"4 \n"), None);
    }

    #[test]
    fn version_truncated_on_char_boundary() {
        let long = "é".repeat(300);
        assert_eq!(truncate_version(&long).chars().count(), VERSION_MAX_LEN);
        assert_eq!(truncate_version("v1"), "v1");
    }

    #[test]
    fn create_lays_out_root() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("r");
        let d = AtomicDir::open(&root, AtomicOptions::new(OpenMode::CreateIfMissing).rotate(4)).unwrap();
        assert_eq!(d.slot_count(), 4);
        assert_eq!(d.current_slot().unwrap(), None);
        assert_eq!(d.scratch_slot().unwrap(), 1);
        d.close().unwrap();
        assert_eq!(fs::read(root.join(".top")).unwrap(), b"4\n");
        assert!(root.join(".lock").exists());
        for i in 1..=4 {
            assert!(root.join(i.to_string()).is_dir());
        }
    }

    #[test]
    fn slot_count_has_a_floor() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("r");
        let d = AtomicDir::open(&root, AtomicOptions::new(OpenMode::CreateIfMissing)).unwrap();
        assert_eq!(d.slot_count(), MIN_SLOTS);
    }

    #[test]
    fn plain_file_root_rejected() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("f");
        fs::write(&root, b"").unwrap();
        let err = AtomicDir::open(&root, AtomicOptions::new(OpenMode::CreateIfMissing)).unwrap_err();
        assert!(matches!(err, AtomicError::NotDirectory { .. }));
    }

    #[test]
    fn uninitialised_root_rejected_for_readers() {
        let dir = tempdir().unwrap();
        let err = AtomicDir::open(dir.path(), AtomicOptions::default()).unwrap_err();
        assert!(matches!(err, AtomicError::Uninitialised { .. }));
    }
}
