//! Rotating backups of a file about to be replaced.
//! - depth 0: a single hard-linked backup `<path><ext>`, replaced each time.
//! - depth N: numbered ring `<path><ext>1..N` (zero-padded to the width of N),
//!   slot 1 most recent; the oldest falls off when the ring is full.
//!
//! Backups are hard links to the pre-commit inode, so no data is copied. A
//! failed rename mid-shift aborts the commit and may leave the ring shifted.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

use crate::errors::{AtomicError, Result};
use crate::platform::FileId;

/// Back up `path` before it is overwritten.
pub fn rotate(path: &Path, depth: u32, ext: &str) -> Result<()> {
    if depth == 0 {
        let backup = with_suffix(path, ext);
        return link_backup(path, &backup);
    }

    let slots: Vec<PathBuf> = (1..=depth).map(|i| slot_path(path, ext, i, depth)).collect();

    // Highest slot that has to move up: the one below the first gap, or the
    // second-oldest when the ring is full (the oldest is then overwritten).
    let mut top = depth as usize - 1;
    for (i, slot) in slots.iter().enumerate() {
        match fs::symlink_metadata(slot) {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                top = i;
                break;
            }
            Err(source) => {
                return Err(AtomicError::CantRead {
                    path: slot.clone(),
                    source,
                });
            }
        }
    }

    for i in (1..=top).rev() {
        let (from, to) = (&slots[i - 1], &slots[i]);
        fs::rename(from, to).map_err(|source| AtomicError::CantRename {
            from: from.clone(),
            to: to.clone(),
            source,
        })?;
        trace!(from = %from.display(), to = %to.display(), "shifted backup");
    }

    link_backup(path, &slots[0])?;
    debug!(path = %path.display(), depth, shifted = top, "rotated backups");
    Ok(())
}

/// `<path><ext><i>` with `i` zero-padded to the number of digits in `depth`.
pub fn slot_path(path: &Path, ext: &str, i: u32, depth: u32) -> PathBuf {
    let width = depth.to_string().len();
    with_suffix(path, &format!("{ext}{i:0width$}"))
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s: OsString = path.as_os_str().to_os_string();
    s.push(suffix);
    PathBuf::from(s)
}

/// Replace `backup` with a hard link to `path`.
fn link_backup(path: &Path, backup: &Path) -> Result<()> {
    match fs::remove_file(backup) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(source) => {
            return Err(AtomicError::CantUnlink {
                path: backup.to_path_buf(),
                source,
            });
        }
    }
    if let Err(source) = fs::hard_link(path, backup) {
        // NFS can report failure for a link that was in fact created.
        let same = matches!(
            (FileId::of_path(path), FileId::of_path(backup)),
            (Ok(a), Ok(b)) if a == b
        );
        if !same {
            return Err(AtomicError::CantLink {
                from: path.to_path_buf(),
                to: backup.to_path_buf(),
                source,
            });
        }
    }
    Ok(())
}
