//! Backups kept by committing transactions.

use std::fs;

use assert_fs::TempDir;
use assert_fs::prelude::*;
use atomicfile::{AtomicError, AtomicFile, AtomicOptions, OpenMode};

fn commit(path: &std::path::Path, opts: &AtomicOptions, content: &str) {
    let f = AtomicFile::open(path, opts.clone()).unwrap();
    f.commit_bytes(content.as_bytes()).unwrap();
}

#[test]
fn ring_holds_the_last_n_versions() {
    let td = TempDir::new().unwrap();
    let target = td.child("cfg");
    let opts = AtomicOptions::new(OpenMode::CreateIfMissing).rotate(3);

    // N + 2 commits: v0 creates, then v1..v4 each push the previous one.
    for i in 0..5 {
        commit(target.path(), &opts, &format!("v{i}"));
    }

    target.assert("v4");
    td.child("cfg.1").assert("v3");
    td.child("cfg.2").assert("v2");
    td.child("cfg.3").assert("v1");
    assert!(!td.child("cfg.4").path().exists());
}

#[test]
fn slots_are_zero_padded_to_depth_width() {
    let td = TempDir::new().unwrap();
    let target = td.child("log");
    target.write_str("first").unwrap();
    let opts = AtomicOptions::new(OpenMode::Write).rotate(12).backup_ext(".bak");

    commit(target.path(), &opts, "second");
    td.child("log.bak01").assert("first");
    assert!(!td.child("log.bak1").path().exists());
}

#[test]
fn single_backup_without_rotation() {
    let td = TempDir::new().unwrap();
    let target = td.child("f");
    target.write_str("a").unwrap();
    let opts = AtomicOptions::new(OpenMode::Write).backup_ext("~");

    commit(target.path(), &opts, "b");
    commit(target.path(), &opts, "c");
    td.child("f~").assert("b");
    target.assert("c");
}

#[test]
fn backups_are_links_to_the_replaced_inode() {
    use std::os::unix::fs::MetadataExt;

    let td = TempDir::new().unwrap();
    let target = td.child("f");
    target.write_str("a").unwrap();
    let before = fs::metadata(target.path()).unwrap().ino();

    commit(target.path(), &AtomicOptions::new(OpenMode::Write).rotate(2), "b");
    assert_eq!(fs::metadata(td.child("f.1").path()).unwrap().ino(), before);
}

#[test]
fn missing_target_makes_no_backup() {
    let td = TempDir::new().unwrap();
    let target = td.child("new");
    commit(target.path(), &AtomicOptions::new(OpenMode::CreateIfMissing).rotate(2), "x");
    assert!(!td.child("new.1").path().exists());
}

#[test]
fn empty_extension_rejected_at_open() {
    let td = TempDir::new().unwrap();
    let target = td.child("f");
    target.write_str("a").unwrap();
    let err = AtomicFile::open(target.path(), AtomicOptions::new(OpenMode::Write).backup_ext("")).unwrap_err();
    assert!(matches!(err, AtomicError::EmptyBackupExt));
    // Nothing was locked or created.
    assert_eq!(fs::read_dir(td.path()).unwrap().count(), 1);
}
