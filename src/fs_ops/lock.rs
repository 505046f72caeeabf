//! NFS-safe exclusive lock on a target file.
//!
//! Design:
//! - Ownership is a directory entry: the canonical lock name `.<name>.lck`
//!   next to the target. Whoever manages to `link()` a private scratch file to
//!   that name owns the lock; hard-link creation is atomic on NFS too and fails
//!   with EEXIST for everybody else.
//! - The scratch file is flock()ed *before* it is linked, so the inode behind
//!   the canonical name is always locked while its owner is alive.
//! - Losers open the canonical name and wait for its flock. Getting the flock
//!   while the name still points at the same inode means the owner died
//!   without cleaning up: the name is stale and is unlinked. Otherwise the
//!   owner released (or someone else already took over) and we race again.
//! - The scratch file doubles as the transaction's write scratch; commit
//!   renames it over the target and then releases via [`LockHandle::publish`].
//!
//! Notes:
//! - flock locks belong to the open file description, so two handles in one
//!   process contend like two processes do. The registry (see `registry`) is
//!   only consulted for strict recursion checks.
//! - Every error keeps the underlying io::Error.

use fs2::FileExt;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::thread::{self, sleep};
use std::time::{Duration, Instant};
use tempfile::{Builder, NamedTempFile};
use tracing::warn;

use super::registry;
use super::util::{fsync_dir, parent_dir};
use crate::errors::{AtomicError, Result};
use crate::options::AtomicOptions;
use crate::platform::FileId;

const NAME_MAX: usize = 255;
const SCRATCH_RAND_LEN: usize = 6;
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Protocol steps are chatty; `DebugFlags::trace` promotes them to debug.
macro_rules! step {
    ($loud:expr, $($arg:tt)+) => {
        if $loud {
            tracing::debug!($($arg)+)
        } else {
            tracing::trace!($($arg)+)
        }
    };
}

/// Canonical lock path for `target`: `<dir>/.<name>.lck`, with `dir` resolved
/// so that every alias of the directory maps to the same name.
pub fn lock_path_for(target: &Path) -> Result<PathBuf> {
    let name = target.file_name().ok_or_else(|| AtomicError::CantLock {
        path: target.to_path_buf(),
        source: io::Error::new(io::ErrorKind::InvalidInput, "target has no file name"),
    })?;
    if name.len() + 1 + SCRATCH_RAND_LEN > NAME_MAX || name.len() + 5 > NAME_MAX {
        return Err(AtomicError::PathTooLong {
            path: target.to_path_buf(),
        });
    }
    let dir = parent_dir(target);
    let dir = fs::canonicalize(dir).map_err(|source| AtomicError::CantOpen {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut lock_name = OsString::from(".");
    lock_name.push(name);
    lock_name.push(".lck");
    Ok(dir.join(lock_name))
}

/// RAII guard held while the lock is owned. Dropping it reverts: the scratch
/// file is removed and the canonical name released.
#[derive(Debug)]
pub struct LockHandle {
    lock_path: PathBuf,
    scratch_path: PathBuf,
    scratch: Option<NamedTempFile>,
    loud: bool,
}

/// Acquire the lock guarding `target`.
///
/// Blocks until the lock is free when `opts.timeout` is zero; otherwise polls
/// once per second and gives up with `LockTimeout` at the deadline.
pub fn acquire(target: &Path, opts: &AtomicOptions) -> Result<LockHandle> {
    let lock_path = lock_path_for(target)?;
    let loud = opts.debug.trace;

    if opts.debug.strict && registry::holder(&lock_path) == Some(thread::current().id()) {
        return Err(AtomicError::RecursiveLock { path: lock_path });
    }

    let dir = parent_dir(&lock_path).to_path_buf();
    let mut prefix = target.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    prefix.push(".");

    let scratch = Builder::new()
        .prefix(&prefix)
        .rand_bytes(SCRATCH_RAND_LEN)
        .tempfile_in(&dir)
        .map_err(|source| AtomicError::CantLock {
            path: dir.clone(),
            source,
        })?;
    // Uncontended by construction: nobody else knows this inode yet.
    FileExt::try_lock_exclusive(scratch.as_file()).map_err(|source| AtomicError::CantLock {
        path: scratch.path().to_path_buf(),
        source,
    })?;

    let start = Instant::now();
    let deadline = (!opts.timeout.is_zero()).then(|| start + opts.timeout);
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;
        match fs::hard_link(scratch.path(), &lock_path) {
            Ok(()) => break,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                step!(loud, path = %lock_path.display(), attempts, "lock busy, waiting for holder");
                wait_for_holder(&lock_path, deadline, start, loud)?;
            }
            Err(e) => {
                // NFS may report a failed link that actually happened.
                if linked_to(&lock_path, scratch.as_file()) {
                    step!(loud, path = %lock_path.display(), error = %e, "link reported failure but succeeded");
                    break;
                }
                return Err(AtomicError::CantLock {
                    path: lock_path,
                    source: e,
                });
            }
        }
    }

    registry::register(&lock_path);
    let waited = start.elapsed();
    if waited.is_zero() || attempts == 1 {
        step!(loud, path = %lock_path.display(), "lock acquired immediately");
    } else {
        step!(loud, path = %lock_path.display(), attempts, waited_ms = waited.as_millis() as u64, "lock acquired after wait");
    }
    Ok(LockHandle {
        lock_path,
        scratch_path: scratch.path().to_path_buf(),
        scratch: Some(scratch),
        loud,
    })
}

/// True if `lock_path` currently names the inode behind `file`.
fn linked_to(lock_path: &Path, file: &File) -> bool {
    match (FileId::of_path(lock_path), FileId::of_file(file)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Open the holder's inode for waiting. NFS emulates flock with fcntl
/// locks, where an exclusive lock needs a descriptor open for writing. The
/// inode carries the target's mode, so a read-only target falls back to a
/// read-only descriptor (enough for local filesystems).
fn open_for_wait(lock_path: &Path) -> io::Result<File> {
    match OpenOptions::new().read(true).write(true).open(lock_path) {
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => File::open(lock_path),
        other => other,
    }
}

/// Wait until the current holder of `lock_path` lets go, reclaiming the name
/// if it turns out to be stale. Returns once it is worth racing for the link
/// again.
fn wait_for_holder(
    lock_path: &Path,
    deadline: Option<Instant>,
    start: Instant,
    loud: bool,
) -> Result<()> {
    let file = match open_for_wait(lock_path) {
        Ok(f) => f,
        // Released between our link attempt and the open.
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(source) => {
            return Err(AtomicError::CantLock {
                path: lock_path.to_path_buf(),
                source,
            });
        }
    };

    match deadline {
        None => loop {
            match FileExt::lock_exclusive(&file) {
                Ok(()) => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(source) => {
                    return Err(AtomicError::CantLock {
                        path: lock_path.to_path_buf(),
                        source,
                    });
                }
            }
        },
        Some(deadline) => loop {
            match FileExt::try_lock_exclusive(&file) {
                Ok(()) => break,
                Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(AtomicError::LockTimeout {
                            path: lock_path.to_path_buf(),
                            waited: now - start,
                        });
                    }
                    sleep(POLL_INTERVAL.min(deadline - now));
                }
                Err(source) => {
                    return Err(AtomicError::CantLock {
                        path: lock_path.to_path_buf(),
                        source,
                    });
                }
            }
        },
    }

    // We hold the flock on the inode we opened. If the name still points at
    // it, nobody alive owns it.
    let held = FileId::of_file(&file).map_err(|source| AtomicError::CantLock {
        path: lock_path.to_path_buf(),
        source,
    })?;
    match FileId::of_path(lock_path) {
        Ok(current) if current == held => {
            warn!(path = %lock_path.display(), "reclaiming stale lock left by a dead holder");
            match fs::remove_file(lock_path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(source) => {
                    return Err(AtomicError::CantUnlink {
                        path: lock_path.to_path_buf(),
                        source,
                    });
                }
            }
        }
        Ok(_) => step!(loud, path = %lock_path.display(), "lock changed hands, retrying"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            step!(loud, path = %lock_path.display(), "lock released, retrying")
        }
        Err(source) => {
            return Err(AtomicError::CantLock {
                path: lock_path.to_path_buf(),
                source,
            });
        }
    }
    Ok(())
}

impl LockHandle {
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Path of the write scratch file (`<name>.XXXXXX`).
    pub fn scratch_path(&self) -> &Path {
        &self.scratch_path
    }

    /// The write scratch file. Never close or reopen it by path: the flock
    /// lives on this descriptor.
    pub fn scratch_file(&mut self) -> Option<&mut File> {
        self.scratch.as_mut().map(|s| s.as_file_mut())
    }

    /// Scratch descriptor and path together.
    pub fn scratch(&mut self) -> Option<(&mut File, &Path)> {
        let path = self.scratch_path.as_path();
        self.scratch.as_mut().map(|s| (s.as_file_mut(), path))
    }

    /// Rename the scratch file over `dest`, then release the lock.
    ///
    /// The canonical name is only removed after the rename, so a waiter can
    /// never wake up before the new content is visible. A freshly locked relay
    /// file is swapped in under the canonical name first; waiters parked on
    /// the published inode then see a different inode and go back to sleep on
    /// the relay instead of mistaking the release for a stale lock.
    ///
    /// On a failed rename the lock is still released (the handle is consumed
    /// and dropped) and the destination is untouched.
    pub fn publish(mut self, dest: &Path) -> Result<()> {
        let Some(scratch) = self.scratch.take() else {
            return Err(AtomicError::CommitBeforeTempFile {
                path: dest.to_path_buf(),
            });
        };
        let from = scratch.path().to_path_buf();
        let published = match scratch.persist(dest) {
            Ok(file) => file,
            Err(e) => {
                self.scratch = Some(e.file);
                return Err(AtomicError::CantRename {
                    from,
                    to: dest.to_path_buf(),
                    source: e.error,
                });
            }
        };
        let _ = fsync_dir(parent_dir(dest));

        // Before the unlink: the next holder registers as soon as it links.
        registry::unregister(&self.lock_path);
        let Some(relay) = self.relay() else {
            // Without a relay the name must go while the flock is still held.
            let result = self.unlink_lock();
            drop(published);
            return result;
        };
        drop(published);
        let result = self.unlink_lock();
        drop(relay);
        result
    }

    /// Swap a freshly locked file in under the canonical name.
    fn relay(&self) -> Option<File> {
        let dir = parent_dir(&self.lock_path);
        let relay = Builder::new()
            .prefix(".relay.")
            .rand_bytes(SCRATCH_RAND_LEN)
            .tempfile_in(dir)
            .and_then(|t| FileExt::try_lock_exclusive(t.as_file()).map(|()| t))
            .and_then(|t| t.persist(&self.lock_path).map_err(|e| e.error));
        match relay {
            Ok(file) => {
                step!(self.loud, path = %self.lock_path.display(), "relay lock in place");
                Some(file)
            }
            Err(e) => {
                warn!(path = %self.lock_path.display(), error = %e, "could not interpose relay lock; releasing directly");
                None
            }
        }
    }

    fn unlink_lock(&self) -> Result<()> {
        match fs::remove_file(&self.lock_path) {
            Ok(()) => {
                step!(self.loud, path = %self.lock_path.display(), "lock released");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(AtomicError::CantUnlink {
                path: self.lock_path.clone(),
                source,
            }),
        }
    }

    /// Abandon: drop the canonical name while still holding the flock, then
    /// remove the scratch file.
    pub fn release(mut self) -> Result<()> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> Result<()> {
        let Some(scratch) = self.scratch.take() else {
            return Ok(());
        };
        registry::unregister(&self.lock_path);
        let unlinked = self.unlink_lock();
        let closed = match scratch.close() {
            Ok(()) => Ok(()),
            // Someone removed it behind our back; nothing left to clean.
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(AtomicError::CantUnlink {
                path: self.scratch_path.clone(),
                source,
            }),
        };
        unlinked.and(closed)
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        if let Err(e) = self.release_inner() {
            warn!(path = %self.lock_path.display(), error = %e, "failed to release lock cleanly");
        }
    }
}
