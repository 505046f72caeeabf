//! Unix implementations of platform helpers.

use std::fs::{self, File, Metadata, OpenOptions};
use std::io;
use std::os::unix::fs::{MetadataExt, OpenOptionsExt, PermissionsExt};
use std::path::Path;
use std::sync::LazyLock;

/// Identity of an inode: two paths or descriptors with equal ids name the same file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId {
    pub dev: u64,
    pub ino: u64,
}

impl FileId {
    pub fn of(meta: &Metadata) -> Self {
        Self {
            dev: meta.dev(),
            ino: meta.ino(),
        }
    }

    /// Identity of the file an open descriptor refers to.
    pub fn of_file(file: &File) -> io::Result<Self> {
        file.metadata().map(|m| Self::of(&m))
    }

    /// Identity of whatever `path` names right now (symlinks not followed).
    pub fn of_path(path: &Path) -> io::Result<Self> {
        fs::symlink_metadata(path).map(|m| Self::of(&m))
    }
}

#[inline]
pub fn effective_uid() -> u32 {
    // SAFETY: geteuid has no failure mode and touches no memory.
    unsafe { libc::geteuid() }
}

#[inline]
pub fn effective_gid() -> u32 {
    // SAFETY: getegid has no failure mode and touches no memory.
    unsafe { libc::getegid() }
}

static UMASK: LazyLock<u32> = LazyLock::new(read_umask);

/// The process umask, read once.
pub fn process_umask() -> u32 {
    *UMASK
}

fn read_umask() -> u32 {
    // /proc reports it without touching process state.
    if let Ok(status) = fs::read_to_string("/proc/self/status") {
        let field = status
            .lines()
            .find_map(|l| l.strip_prefix("Umask:"))
            .and_then(|v| u32::from_str_radix(v.trim(), 8).ok());
        if let Some(mask) = field {
            return mask;
        }
    }
    // SAFETY: umask cannot fail; the previous mask is restored immediately.
    unsafe {
        let old = libc::umask(0o022);
        libc::umask(old);
        old as u32
    }
}

/// Root may update anyone's files; everybody else only their own.
pub fn may_update(meta: &Metadata) -> bool {
    let me = effective_uid();
    me == 0 || meta.uid() == me
}

/// Open log file for appending; set 0600 only when creating a new file.
/// If the file already exists, we preserve its existing permissions to avoid
/// clobbering administrator adjustments (e.g. group-readable for log shipping).
pub fn open_log_file_secure_append(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    let existed = path.exists();
    let f = OpenOptions::new()
        .create(true)
        .append(true)
        .mode(0o600) // applies on create
        .custom_flags(libc::O_NOFOLLOW)
        .open(path)?;
    if !existed {
        // Newly created: ensure 0600
        let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o600));
    }
    Ok(f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn preserve_existing_log_file_mode() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.txt");
        fs::write(&path, b"hello").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o640)).unwrap();
        let _f = open_log_file_secure_append(&path).unwrap();
        // Mode should remain 0640 (not forced to 0600) because file pre-existed.
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o640, "existing permissions should be preserved");
    }

    #[test]
    fn new_log_file_gets_0600() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("new_log.txt");
        let _f = open_log_file_secure_append(&path).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "newly created log file should be 0600");
    }

    #[test]
    fn hard_links_share_identity() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        let c = dir.path().join("c");
        fs::write(&a, b"x").unwrap();
        fs::write(&c, b"x").unwrap();
        fs::hard_link(&a, &b).unwrap();
        assert_eq!(FileId::of_path(&a).unwrap(), FileId::of_path(&b).unwrap());
        assert_ne!(FileId::of_path(&a).unwrap(), FileId::of_path(&c).unwrap());
        let f = File::open(&b).unwrap();
        assert_eq!(FileId::of_file(&f).unwrap(), FileId::of_path(&a).unwrap());
    }

    #[test]
    fn umask_matches_fresh_file_mode() {
        let dir = tempdir().unwrap();
        let p = dir.path().join("fresh");
        OpenOptions::new().write(true).create_new(true).mode(0o666).open(&p).unwrap();
        let mode = fs::metadata(&p).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o666 & !process_umask());
    }

    #[test]
    fn own_files_are_updatable() {
        let dir = tempdir().unwrap();
        let p = dir.path().join("mine");
        fs::write(&p, b"").unwrap();
        assert!(may_update(&fs::metadata(&p).unwrap()));
    }
}
