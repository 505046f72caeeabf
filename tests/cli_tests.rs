//! End-to-end runs of the `atomicfile` binary.

use std::fs;
use std::path::Path;
use std::process::Output;

use assert_cmd::Command;
use assert_fs::TempDir;
use assert_fs::prelude::*;
use atomicfile::{AtomicFile, AtomicOptions, OpenMode};

/// The binary, isolated from any user config.
fn bin(td: &TempDir) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("atomicfile"));
    cmd.env("ATOMICFILE_CONFIG", td.path().join("no-config.xml"));
    cmd
}

fn stdout_of(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).trim_end().to_owned()
}

#[test]
fn write_then_cat_round_trip() {
    let td = TempDir::new().unwrap();
    let target = td.child("settings");

    bin(&td)
        .args(["write", "--create"])
        .arg(target.path())
        .write_stdin("hello\nworld\n")
        .assert()
        .success();
    target.assert("hello\nworld\n");

    let out = bin(&td).arg("cat").arg(target.path()).output().unwrap();
    assert!(out.status.success());
    assert_eq!(out.stdout, b"hello\nworld\n");
}

#[test]
fn write_keeps_numbered_backups() {
    let td = TempDir::new().unwrap();
    let target = td.child("f");
    target.write_str("v0").unwrap();

    for v in ["v1", "v2"] {
        bin(&td)
            .args(["write", "--rotate", "2"])
            .arg(target.path())
            .write_stdin(v)
            .assert()
            .success();
    }
    target.assert("v2");
    td.child("f.1").assert("v1");
    td.child("f.2").assert("v0");
}

#[test]
fn write_to_missing_file_without_create_fails() {
    let td = TempDir::new().unwrap();
    let out = bin(&td)
        .arg("write")
        .arg(td.child("absent").path())
        .write_stdin("x")
        .output()
        .unwrap();
    assert_eq!(out.status.code(), Some(1));
    let err = String::from_utf8_lossy(&out.stderr);
    assert!(err.contains("error:") && err.contains("cannot open"), "{err}");
    assert!(!td.child("absent").path().exists());
}

#[test]
fn busy_lock_exits_tempfail() {
    let td = TempDir::new().unwrap();
    let target = td.child("held");
    target.write_str("x").unwrap();
    let _holder = AtomicFile::open(target.path(), AtomicOptions::new(OpenMode::Write)).unwrap();

    let out = bin(&td)
        .args(["write", "--timeout", "1"])
        .arg(target.path())
        .write_stdin("y")
        .output()
        .unwrap();
    assert_eq!(out.status.code(), Some(75));
    target.assert("x");
}

fn tree(src: &Path, content: &str) {
    fs::create_dir_all(src.join("sub")).unwrap();
    fs::write(src.join("top.txt"), content).unwrap();
    fs::write(src.join("sub/inner.txt"), content).unwrap();
}

#[test]
fn dir_commit_current_list_rollback() {
    let td = TempDir::new().unwrap();
    let root = td.child("site");
    let src = td.child("src");

    bin(&td)
        .args(["dir", "init", "--slots", "3"])
        .arg(root.path())
        .assert()
        .success();

    tree(src.path(), "one");
    let out = bin(&td)
        .args(["dir", "commit", "--version", "release-1", "--from"])
        .arg(src.path())
        .arg(root.path())
        .output()
        .unwrap();
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(stdout_of(&out), root.path().join("1").display().to_string());
    root.child("1/sub/inner.txt").assert("one");

    fs::remove_file(src.path().join("top.txt")).unwrap();
    tree(src.path(), "two");
    bin(&td)
        .args(["dir", "commit", "--from"])
        .arg(src.path())
        .arg(root.path())
        .assert()
        .success();

    let out = bin(&td).args(["dir", "current"]).arg(root.path()).output().unwrap();
    assert_eq!(stdout_of(&out), root.path().join("2").display().to_string());

    let out = bin(&td).args(["dir", "list"]).arg(root.path()).output().unwrap();
    let listing = stdout_of(&out);
    let lines: Vec<&str> = listing.lines().collect();
    assert_eq!(lines.len(), 3, "{listing}");
    assert!(lines[0].starts_with('*'), "{listing}");
    // Newest first: 2 (live), 3 (never used), 1 (tagged).
    assert!(lines[2].contains("release-1"), "{listing}");

    bin(&td)
        .args(["dir", "rollback"])
        .arg(root.path())
        .arg("1")
        .assert()
        .success();
    let out = bin(&td).args(["dir", "current"]).arg(root.path()).output().unwrap();
    assert_eq!(stdout_of(&out), root.path().join("1").display().to_string());

    let out = bin(&td)
        .args(["dir", "rollback"])
        .arg(root.path())
        .arg("9")
        .output()
        .unwrap();
    assert_eq!(out.status.code(), Some(1));
}

#[test]
fn commit_clears_reused_slot() {
    let td = TempDir::new().unwrap();
    let root = td.child("r");
    let src = td.child("src");
    fs::create_dir_all(src.path()).unwrap();

    fs::write(src.path().join("old.txt"), "stale").unwrap();
    for _ in 0..3 {
        bin(&td).args(["dir", "commit", "--from"]).arg(src.path()).arg(root.path()).assert().success();
    }
    fs::remove_file(src.path().join("old.txt")).unwrap();
    fs::write(src.path().join("new.txt"), "fresh").unwrap();
    // Fourth commit wraps around into slot 1.
    bin(&td).args(["dir", "commit", "--from"]).arg(src.path()).arg(root.path()).assert().success();

    root.child("1/new.txt").assert("fresh");
    assert!(!root.path().join("1/old.txt").exists());
}

#[test]
fn config_file_supplies_defaults() {
    let td = TempDir::new().unwrap();
    let cfg = td.child("config.xml");
    cfg.write_str("<config><backup_ext>.orig</backup_ext></config>").unwrap();
    let target = td.child("f");
    target.write_str("before").unwrap();

    bin(&td)
        .arg("--config")
        .arg(cfg.path())
        .arg("write")
        .arg(target.path())
        .write_stdin("after")
        .assert()
        .success();
    td.child("f.orig").assert("before");
}
