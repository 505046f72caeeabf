//! Platform-specific helpers.
//! The protocol relies on POSIX link/rename/flock semantics, so only Unix is
//! supported; this module keeps the libc calls out of the rest of the crate.

#[cfg(not(unix))]
compile_error!("atomicfile requires a POSIX filesystem (link, rename, flock)");

#[cfg(unix)]
mod unix;

#[cfg(unix)]
pub use unix::{
    FileId, effective_gid, effective_uid, may_update, open_log_file_secure_append, process_umask,
};
