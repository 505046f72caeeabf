//! At most one writer holds a target; the rest wait or time out.
//! Threads each own their handle, so they contend like separate processes.

use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use assert_fs::TempDir;
use assert_fs::prelude::*;
use atomicfile::{AtomicError, AtomicFile, AtomicOptions, OpenMode};

#[test]
fn second_writer_times_out() {
    let td = TempDir::new().unwrap();
    let target = td.child("busy");
    target.write_str("x").unwrap();

    let _holder = AtomicFile::open(target.path(), AtomicOptions::new(OpenMode::Write)).unwrap();

    let started = Instant::now();
    let opts = AtomicOptions::new(OpenMode::Write).timeout(Duration::from_secs(1));
    let err = AtomicFile::open(target.path(), opts).unwrap_err();
    assert!(matches!(err, AtomicError::LockTimeout { .. }), "{err}");
    assert!(err.is_lock_unavailable());
    assert!(started.elapsed() >= Duration::from_secs(1));
}

#[test]
fn waiter_proceeds_after_commit_and_sees_new_content() {
    let td = TempDir::new().unwrap();
    let target = td.child("counter");
    target.write_str("0").unwrap();
    let path = target.path().to_path_buf();

    let first = AtomicFile::open(&path, AtomicOptions::new(OpenMode::Write)).unwrap();

    let (tx, rx) = mpsc::channel();
    let waiter = {
        let path = path.clone();
        thread::spawn(move || {
            tx.send("waiting").unwrap();
            let mut f = AtomicFile::open(&path, AtomicOptions::new(OpenMode::Write)).unwrap();
            let seen = f.read_all().unwrap().to_vec();
            f.commit_bytes(b"2").unwrap();
            seen
        })
    };

    assert_eq!(rx.recv().unwrap(), "waiting");
    thread::sleep(Duration::from_millis(300));
    assert!(!waiter.is_finished(), "second writer must block while the first holds the lock");

    first.commit_bytes(b"1").unwrap();
    let seen = waiter.join().unwrap();
    assert_eq!(seen, b"1");
    target.assert("2");
}

#[test]
fn many_writers_serialize() {
    let td = TempDir::new().unwrap();
    let target = td.child("n");
    target.write_str("0").unwrap();
    let path = target.path().to_path_buf();

    let workers: Vec<_> = (0..8)
        .map(|_| {
            let path = path.clone();
            thread::spawn(move || {
                for _ in 0..5 {
                    let mut f = AtomicFile::open(&path, AtomicOptions::new(OpenMode::Write)).unwrap();
                    let n: u32 = std::str::from_utf8(f.read_all().unwrap()).unwrap().parse().unwrap();
                    f.commit_bytes((n + 1).to_string().as_bytes()).unwrap();
                }
            })
        })
        .collect();
    for w in workers {
        w.join().unwrap();
    }
    // Lost updates would show up as a smaller count.
    target.assert("40");
}

#[test]
fn strict_mode_refuses_recursive_lock() {
    let td = TempDir::new().unwrap();
    let target = td.child("r");
    target.write_str("x").unwrap();

    let _held = AtomicFile::open(target.path(), AtomicOptions::new(OpenMode::Write)).unwrap();
    let err = AtomicFile::open(target.path(), AtomicOptions::new(OpenMode::Write).strict(true)).unwrap_err();
    assert!(matches!(err, AtomicError::RecursiveLock { .. }), "{err}");
}

#[test]
fn strict_writer_on_another_thread_waits_its_turn() {
    let td = TempDir::new().unwrap();
    let target = td.child("shared");
    target.write_str("0").unwrap();
    let path = target.path().to_path_buf();

    let first = AtomicFile::open(&path, AtomicOptions::new(OpenMode::Write)).unwrap();
    let second = {
        let path = path.clone();
        thread::spawn(move || {
            let opts = AtomicOptions::new(OpenMode::Write).strict(true).timeout(Duration::from_secs(5));
            let mut f = AtomicFile::open(&path, opts)?;
            let seen = f.read_all()?.to_vec();
            f.commit_bytes(b"2")?;
            Ok::<_, AtomicError>(seen)
        })
    };

    thread::sleep(Duration::from_millis(300));
    assert!(!second.is_finished());
    first.commit_bytes(b"1").unwrap();
    assert_eq!(second.join().unwrap().unwrap(), b"1");
    target.assert("2");
}

#[test]
fn readers_never_wait() {
    let td = TempDir::new().unwrap();
    let target = td.child("ro");
    target.write_str("content").unwrap();

    let _writer = AtomicFile::open(target.path(), AtomicOptions::new(OpenMode::Write)).unwrap();
    let mut reader = AtomicFile::open(target.path(), AtomicOptions::default()).unwrap();
    assert!(!reader.is_locked());
    assert_eq!(reader.read_all().unwrap(), b"content");
}
