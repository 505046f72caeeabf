//! Human-oriented hints for failed filesystem operations.
//!
//! Usage:
//!   eprintln!("{}", describe(&err));   // "cannot lock ...: ... (hint) [os code: 13]"

use std::io;

use crate::errors::AtomicError;

/// Short advice for a failed syscall, keyed on errno with a fallback on kind.
pub fn os_hint(e: &io::Error) -> Option<&'static str> {
    if let Some(code) = e.raw_os_error() {
        let hint = match code {
            libc::EACCES | libc::EPERM => "permission denied; check ownership and directory write permission",
            libc::EXDEV => "cross-filesystem; the scratch file must live next to the target",
            libc::ENOENT => "path not found; verify it exists",
            libc::EEXIST => "already exists",
            libc::ENOSPC => "no space left on device",
            libc::EROFS => "read-only filesystem",
            libc::ELOOP => "too many symbolic link levels; possible symlink cycle",
            libc::ENAMETOOLONG => "file name too long",
            libc::EMFILE | libc::ENFILE => "too many open files",
            libc::ENOLCK => "no locks available; check the NFS lock daemon",
            libc::ESTALE => "stale NFS file handle; the file was replaced on the server",
            _ => return None,
        };
        return Some(hint);
    }
    match e.kind() {
        io::ErrorKind::PermissionDenied => Some("permission denied; check ownership and directory write permission"),
        io::ErrorKind::NotFound => Some("path not found; verify it exists"),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Some("busy; another writer holds the lock"),
        _ => None,
    }
}

/// Hint for errors that carry no syscall.
fn variant_hint(err: &AtomicError) -> Option<&'static str> {
    match err {
        AtomicError::LockTimeout { .. } => Some("another writer holds the lock; retry or raise the timeout"),
        AtomicError::RecursiveLock { .. } => Some("this process already holds the lock; close the first handle"),
        AtomicError::NotOwner { .. } => Some("only the owner (or root) may update it"),
        AtomicError::Uninitialised { .. } => Some("run `atomicfile dir init` first"),
        AtomicError::NoCurrent { .. } => Some("nothing has been committed yet"),
        _ => None,
    }
}

/// Error message with an actionable hint and the OS code, if any.
pub fn describe(err: &AtomicError) -> String {
    let mut msg = err.to_string();
    let hint = err.io_error().and_then(os_hint).or_else(|| variant_hint(err));
    if let Some(h) = hint {
        msg.push_str(" (");
        msg.push_str(h);
        msg.push(')');
    }
    if let Some(code) = err.raw_os_error() {
        msg.push_str(&format!(" [os code: {code}]"));
    }
    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn errno_hint_and_code() {
        let err = AtomicError::CantLock {
            path: PathBuf::from("/x/.f.lck"),
            source: io::Error::from_raw_os_error(libc::ENOLCK),
        };
        let msg = describe(&err);
        assert!(msg.contains("lock daemon"), "{msg}");
        assert!(msg.ends_with(&format!("[os code: {}]", libc::ENOLCK)), "{msg}");
    }

    #[test]
    fn variant_hint_without_os_error() {
        let err = AtomicError::NoCurrent {
            path: PathBuf::from("/r/current"),
        };
        assert!(describe(&err).contains("nothing has been committed"));
    }

    #[test]
    fn unknown_errno_has_no_hint() {
        assert!(os_hint(&io::Error::from_raw_os_error(libc::EDOM)).is_none());
    }
}
