//! In-process registry of held canonical locks.
//!
//! Advisory locks cannot tell a process about locks it already holds, so a
//! second acquire from the same process would block forever. Every acquired
//! lock is recorded here; strict mode consults the table before acquiring and
//! fails fast with `RecursiveLock` instead of deadlocking.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, Mutex, MutexGuard};
use std::thread::{self, ThreadId};

static HELD: LazyLock<Mutex<HashMap<PathBuf, ThreadId>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

fn table() -> MutexGuard<'static, HashMap<PathBuf, ThreadId>> {
    // A panic while holding the table cannot leave it half-updated.
    HELD.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Thread currently holding `lock_path` in this process, if any.
pub(crate) fn holder(lock_path: &Path) -> Option<ThreadId> {
    table().get(lock_path).copied()
}

pub(crate) fn register(lock_path: &Path) {
    table().insert(lock_path.to_path_buf(), thread::current().id());
}

pub(crate) fn unregister(lock_path: &Path) {
    table().remove(lock_path);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_release() {
        let p = Path::new("/registry-test/.x.lck");
        assert!(holder(p).is_none());
        register(p);
        assert_eq!(holder(p), Some(thread::current().id()));
        unregister(p);
        assert!(holder(p).is_none());
    }
}
