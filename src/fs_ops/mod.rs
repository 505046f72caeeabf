//! Filesystem building blocks: the lock protocol, backup rotation and small
//! helpers shared by file and directory transactions.

pub mod backup;
pub mod helpers;
pub mod lock;
mod registry;
pub(crate) mod util;

pub use backup::{rotate, slot_path};
pub use helpers::{describe, os_hint};
pub use lock::{LockHandle, acquire, lock_path_for};
