//! Typed error definitions for atomicfile.
//! Every failure mode of the lock protocol, file transactions and rotation
//! directories maps to one variant. Variants backed by a syscall keep the
//! original `io::Error` so callers can tell EACCES from ESTALE.

use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AtomicError {
    #[error("cannot open {path}: {source}")]
    CantOpen { path: PathBuf, source: io::Error },

    #[error("{path} is not owned by the current user")]
    NotOwner { path: PathBuf },

    #[error("cannot lock {path}: {source}")]
    CantLock { path: PathBuf, source: io::Error },

    #[error("timed out after {waited:?} waiting for lock {path}")]
    LockTimeout { path: PathBuf, waited: Duration },

    #[error("lock {path} is already held by this process")]
    RecursiveLock { path: PathBuf },

    #[error("{path} is not a directory")]
    NotDirectory { path: PathBuf },

    #[error("cannot create directory {path}: {source}")]
    CantMkdir { path: PathBuf, source: io::Error },

    #[error("cannot read {path}: {source}")]
    CantRead { path: PathBuf, source: io::Error },

    #[error("cannot write {path}: {source}")]
    CantWrite { path: PathBuf, source: io::Error },

    #[error("cannot map {path}: {source}")]
    CantMmap { path: PathBuf, source: io::Error },

    #[error("cannot flush and close {path}: {source}")]
    BadClose { path: PathBuf, source: io::Error },

    #[error("commit of {path} requested before a scratch file exists")]
    CommitBeforeTempFile { path: PathBuf },

    #[error("scratch file {path} disappeared before commit")]
    MissingTempFile { path: PathBuf },

    #[error("cannot rename {from} -> {to}: {source}")]
    CantRename {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },

    #[error("cannot link {from} -> {to}: {source}")]
    CantLink {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },

    #[error("cannot unlink {path}: {source}")]
    CantUnlink { path: PathBuf, source: io::Error },

    #[error("backup extension must not be empty")]
    EmptyBackupExt,

    #[error("path too long: {path}")]
    PathTooLong { path: PathBuf },

    #[error("{path} is not an initialised rotation directory")]
    Uninitialised { path: PathBuf },

    #[error("invalid contents in {path}")]
    InvalidCurrent { path: PathBuf },

    #[error("{path} has no committed version")]
    NoCurrent { path: PathBuf },

    #[error("{path} was opened read-only")]
    OpenedReadOnly { path: PathBuf },

    #[error("slot {slot} is outside 1..={top}")]
    InvalidSlot { slot: u32, top: u32 },
}

pub type Result<T> = std::result::Result<T, AtomicError>;

impl AtomicError {
    /// Stable numeric code, mainly for structured logs and exit statuses.
    pub fn code(&self) -> u32 {
        match self {
            AtomicError::BadClose { .. } => 1,
            AtomicError::CantOpen { .. } => 2,
            AtomicError::CantLink { .. } => 3,
            AtomicError::CantUnlink { .. } => 4,
            AtomicError::CantLock { .. } => 5,
            AtomicError::CantMmap { .. } => 6,
            AtomicError::CantRead { .. } => 7,
            AtomicError::CantRename { .. } => 8,
            AtomicError::CantWrite { .. } => 9,
            AtomicError::CommitBeforeTempFile { .. } => 10,
            AtomicError::MissingTempFile { .. } => 11,
            AtomicError::NotOwner { .. } => 14,
            AtomicError::OpenedReadOnly { .. } => 15,
            AtomicError::NotDirectory { .. } => 16,
            AtomicError::CantMkdir { .. } => 17,
            AtomicError::NoCurrent { .. } => 18,
            AtomicError::InvalidCurrent { .. } => 19,
            AtomicError::Uninitialised { .. } => 20,
            AtomicError::PathTooLong { .. } => 21,
            AtomicError::RecursiveLock { .. } => 22,
            AtomicError::EmptyBackupExt => 23,
            AtomicError::LockTimeout { .. } => 24,
            AtomicError::InvalidSlot { .. } => 25,
        }
    }

    /// The underlying OS error, if this failure came from a syscall.
    pub fn io_error(&self) -> Option<&io::Error> {
        match self {
            AtomicError::CantOpen { source, .. }
            | AtomicError::CantLock { source, .. }
            | AtomicError::CantMkdir { source, .. }
            | AtomicError::CantRead { source, .. }
            | AtomicError::CantWrite { source, .. }
            | AtomicError::CantMmap { source, .. }
            | AtomicError::BadClose { source, .. }
            | AtomicError::CantRename { source, .. }
            | AtomicError::CantLink { source, .. }
            | AtomicError::CantUnlink { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Raw errno of the underlying OS error, if any.
    pub fn raw_os_error(&self) -> Option<i32> {
        self.io_error().and_then(io::Error::raw_os_error)
    }

    /// True for the two ways lock acquisition gives up on a live holder.
    pub fn is_lock_unavailable(&self) -> bool {
        matches!(self, AtomicError::LockTimeout { .. } | AtomicError::CantLock { .. })
    }
}
