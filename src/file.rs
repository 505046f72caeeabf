//! Atomic single-file transactions.
//!
//! Readers open the target read-only and never lock. Writers take the lock
//! from `fs_ops::lock`, write into the lock's scratch file and commit by
//! renaming it over the target, so concurrent readers see either the old or
//! the new content in full.
//!
//! Lifecycle:
//! - `open` validates ownership before anything is created.
//! - reads memory-map the content lazily; line/block iteration uses a cursor.
//! - `commit` rotates backups, publishes, releases the lock and consumes the
//!   transaction. On failure it reverts before returning.
//! - `revert`/`close`/drop remove scratch artifacts and release the lock; the
//!   target is never touched.

use memmap2::{Mmap, MmapOptions};
use std::fs::{self, File, Metadata, Permissions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::unix::fs::{MetadataExt, PermissionsExt, fchown};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::errors::{AtomicError, Result};
use crate::fs_ops::backup;
use crate::fs_ops::lock::{self, LockHandle};
use crate::options::{AtomicOptions, OpenMode};
use crate::platform::{effective_gid, effective_uid, may_update, process_umask};

const COPY_BUF: usize = 64 * 1024;

/// A read or write transaction on one file.
#[derive(Debug)]
pub struct AtomicFile {
    path: PathBuf,
    opts: AtomicOptions,
    backup_ext: Option<String>,

    // read side
    read_fd: Option<File>,
    meta: Option<Metadata>,
    map: Option<Mmap>,
    cursor: usize,

    // write side; Some iff we hold the lock
    lock: Option<LockHandle>,
}

impl AtomicFile {
    /// Open `path` according to `opts.mode`.
    ///
    /// Writers must own the target (or be root). This is checked up front so
    /// that a missing delete permission cannot surface halfway through a
    /// commit. Unless `defer_lock` is set, writers are locked on return.
    pub fn open(path: impl AsRef<Path>, opts: AtomicOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let backup_ext = opts.effective_backup_ext()?;

        match fs::metadata(&path) {
            Ok(meta) => {
                if opts.mode.is_write() && !may_update(&meta) {
                    return Err(AtomicError::NotOwner { path });
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound && opts.mode == OpenMode::CreateIfMissing => {}
            Err(source) => return Err(AtomicError::CantOpen { path, source }),
        }

        let mut this = Self {
            path,
            opts,
            backup_ext,
            read_fd: None,
            meta: None,
            map: None,
            cursor: 0,
            lock: None,
        };
        this.open_read_side()?;
        if this.opts.mode.is_write() && !this.opts.defer_lock {
            this.lock()?;
        }
        debug!(path = %this.path.display(), mode = ?this.opts.mode, locked = this.is_locked(), "opened");
        Ok(this)
    }

    /// Take the write lock (for transactions opened with `defer_lock`).
    ///
    /// The read side is reopened once the lock is held so reads see the
    /// latest committed content. No-op if already locked.
    pub fn lock(&mut self) -> Result<()> {
        if self.lock.is_some() {
            return Ok(());
        }
        if !self.opts.mode.is_write() {
            return Err(AtomicError::OpenedReadOnly {
                path: self.path.clone(),
            });
        }
        let mut handle = lock::acquire(&self.path, &self.opts)?;
        // Dropping `handle` on error releases the lock again.
        self.open_read_side()?;
        self.prepare_scratch(&mut handle);
        self.lock = Some(handle);
        Ok(())
    }

    fn open_read_side(&mut self) -> Result<()> {
        self.map = None;
        self.cursor = 0;
        match File::open(&self.path) {
            Ok(file) => {
                let meta = file.metadata().map_err(|source| AtomicError::CantOpen {
                    path: self.path.clone(),
                    source,
                })?;
                self.read_fd = Some(file);
                self.meta = Some(meta);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound && self.opts.mode == OpenMode::CreateIfMissing => {
                self.read_fd = None;
                self.meta = None;
            }
            Err(source) => {
                return Err(AtomicError::CantOpen {
                    path: self.path.clone(),
                    source,
                });
            }
        }
        Ok(())
    }

    /// Give the scratch file the target's permissions (or the configured
    /// creation ones). Best-effort: chown often fails for non-root users.
    fn prepare_scratch(&self, handle: &mut LockHandle) {
        let Some(file) = handle.scratch_file() else {
            return;
        };
        let (mode, owner, group) = match &self.meta {
            Some(meta) => {
                let owner = (meta.uid() != effective_uid() && effective_uid() == 0).then(|| meta.uid());
                let group = (meta.gid() != effective_gid()).then(|| meta.gid());
                (meta.mode() & 0o7777, owner, group)
            }
            None => (
                self.opts.create_mode & !process_umask() & 0o7777,
                self.opts.owner,
                self.opts.group,
            ),
        };
        if let Err(e) = file.set_permissions(Permissions::from_mode(mode)) {
            warn!(path = %self.path.display(), mode = format!("{mode:o}"), error = %e, "failed to set scratch permissions");
        }
        if (owner.is_some() || group.is_some())
            && let Err(e) = fchown(&*file, owner, group)
        {
            warn!(path = %self.path.display(), ?owner, ?group, error = %e, "failed to set scratch ownership");
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> OpenMode {
        self.opts.mode
    }

    /// Metadata of the content visible to this transaction; `None` while a
    /// CreateIfMissing target does not exist yet.
    pub fn metadata(&self) -> Option<&Metadata> {
        self.meta.as_ref()
    }

    /// Descriptor of the content visible to this transaction.
    pub fn read_handle(&self) -> Option<&File> {
        self.read_fd.as_ref()
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_some()
    }

    pub fn lock_path(&self) -> Option<&Path> {
        self.lock.as_ref().map(|l| l.lock_path())
    }

    pub fn scratch_path(&self) -> Option<&Path> {
        self.lock.as_ref().map(|l| l.scratch_path())
    }

    fn ensure_mapped(&mut self) -> Result<()> {
        if self.map.is_some() {
            return Ok(());
        }
        let (Some(file), Some(meta)) = (&self.read_fd, &self.meta) else {
            return Ok(());
        };
        // Zero-length maps are rejected on some platforms; empty needs no map.
        if meta.len() == 0 {
            return Ok(());
        }
        let len = usize::try_from(meta.len()).map_err(|_| AtomicError::CantMmap {
            path: self.path.clone(),
            source: io::Error::new(io::ErrorKind::OutOfMemory, "file larger than address space"),
        })?;
        // SAFETY: private read-only mapping. Cooperating writers replace the
        // file by rename and never modify a published inode in place.
        let map = unsafe { MmapOptions::new().len(len).map_copy_read_only(file) }.map_err(|source| {
            AtomicError::CantMmap {
                path: self.path.clone(),
                source,
            }
        })?;
        self.map = Some(map);
        Ok(())
    }

    /// The whole content. Empty for zero-length or not-yet-created targets.
    pub fn read_all(&mut self) -> Result<&[u8]> {
        self.ensure_mapped()?;
        Ok(self.map.as_deref().unwrap_or(&[]))
    }

    /// Next line including its `\n`; the last line may lack one. `None` at
    /// the end.
    pub fn read_line(&mut self) -> Result<Option<&[u8]>> {
        self.ensure_mapped()?;
        let rest = &self.map.as_deref().unwrap_or(&[])[self.cursor..];
        if rest.is_empty() {
            return Ok(None);
        }
        let end = rest
            .iter()
            .position(|&b| b == b'\n')
            .map_or(rest.len(), |i| i + 1);
        self.cursor += end;
        Ok(Some(&rest[..end]))
    }

    /// Next block of at most `len` bytes. `None` at the end (or for `len == 0`).
    pub fn read_block(&mut self, len: usize) -> Result<Option<&[u8]>> {
        self.ensure_mapped()?;
        let rest = &self.map.as_deref().unwrap_or(&[])[self.cursor..];
        if rest.is_empty() || len == 0 {
            return Ok(None);
        }
        let end = len.min(rest.len());
        self.cursor += end;
        Ok(Some(&rest[..end]))
    }

    /// Restart line/block iteration from the beginning.
    pub fn rewind(&mut self) {
        self.cursor = 0;
    }

    fn write_side(&mut self) -> Result<(&mut File, &Path)> {
        if !self.opts.mode.is_write() {
            return Err(AtomicError::OpenedReadOnly {
                path: self.path.clone(),
            });
        }
        match self.lock.as_mut().and_then(LockHandle::scratch) {
            Some(parts) => Ok(parts),
            None => Err(AtomicError::CommitBeforeTempFile {
                path: self.path.clone(),
            }),
        }
    }

    /// The scratch file that will replace the target, opened read/write.
    ///
    /// Do not close it or reopen it by name: the lock lives on this descriptor.
    pub fn scratch(&mut self) -> Result<(&mut File, &Path)> {
        self.write_side()
    }

    /// Append `bytes` to the scratch file.
    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let (file, path) = self.write_side()?;
        file.write_all(bytes).map_err(|source| AtomicError::CantWrite {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Stream everything from `reader` into the scratch file.
    pub fn write_from<R: Read>(&mut self, reader: &mut R) -> Result<u64> {
        let (file, path) = self.write_side()?;
        let mut buf = vec![0u8; COPY_BUF];
        let mut total = 0u64;
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(source) => {
                    return Err(AtomicError::CantRead {
                        path: PathBuf::from("<input>"),
                        source,
                    });
                }
            };
            file.write_all(&buf[..n]).map_err(|source| AtomicError::CantWrite {
                path: path.to_path_buf(),
                source,
            })?;
            total += n as u64;
        }
        Ok(total)
    }

    /// Discard anything written to the scratch file so far.
    pub fn truncate(&mut self) -> Result<()> {
        let (file, path) = self.write_side()?;
        file.set_len(0)
            .and_then(|()| file.seek(SeekFrom::Start(0)).map(drop))
            .map_err(|source| AtomicError::CantWrite {
                path: path.to_path_buf(),
                source,
            })
    }

    /// Replace the target with exactly `bytes` and commit.
    pub fn commit_bytes(mut self, bytes: &[u8]) -> Result<()> {
        self.truncate()?;
        self.write(bytes)?;
        self.commit()
    }

    /// Replace the target with everything read from `reader` and commit.
    pub fn commit_from<R: Read>(mut self, reader: &mut R) -> Result<()> {
        self.truncate()?;
        self.write_from(reader)?;
        self.commit()
    }

    /// Publish the scratch file as the new target content.
    ///
    /// Order: backups of the current target, rename of the scratch file over
    /// the target, then lock release. Any failure reverts (scratch removed,
    /// lock released, target untouched) before the error is returned.
    pub fn commit(mut self) -> Result<()> {
        if !self.opts.mode.is_write() {
            return Err(AtomicError::OpenedReadOnly {
                path: self.path.clone(),
            });
        }
        let Some(mut handle) = self.lock.take() else {
            return Err(AtomicError::CommitBeforeTempFile {
                path: self.path.clone(),
            });
        };
        // From here every early return drops `handle`, which reverts.

        let scratch_path = handle.scratch_path().to_path_buf();
        if fs::symlink_metadata(&scratch_path).is_err() {
            return Err(AtomicError::MissingTempFile { path: scratch_path });
        }
        if let Some(file) = handle.scratch_file() {
            file.flush()
                .and_then(|()| file.sync_all())
                .map_err(|source| AtomicError::BadClose {
                    path: scratch_path.clone(),
                    source,
                })?;
        }

        if let Some(ext) = self.backup_ext.as_deref()
            && fs::symlink_metadata(&self.path).is_ok()
        {
            backup::rotate(&self.path, self.opts.rotate, ext)?;
        }

        self.map = None;
        handle.publish(&self.path)?;
        info!(path = %self.path.display(), "committed");
        Ok(())
    }

    /// Abandon uncommitted changes: remove the scratch file and release the
    /// lock. The transaction stays open and can `lock()` again. Idempotent.
    pub fn revert(&mut self) -> Result<()> {
        match self.lock.take() {
            Some(handle) => {
                debug!(path = %self.path.display(), "reverting");
                handle.release()
            }
            None => Ok(()),
        }
    }

    /// Revert anything uncommitted and close the transaction.
    pub fn close(mut self) -> Result<()> {
        self.revert()
    }
}

impl Drop for AtomicFile {
    fn drop(&mut self) {
        if let Err(e) = self.revert() {
            warn!(path = %self.path.display(), error = %e, "revert on drop failed");
        }
    }
}
