//! Application orchestrator.
//! Loads/merges config, initializes logging, and runs the requested command.

use anyhow::{Context, Result, bail};
use std::fs;
use std::io::{self, Write};
use std::ops::ControlFlow;
use std::os::unix::fs::symlink;
use std::path::Path;
use std::process::ExitCode;
use tracing::{debug, error, info};
use walkdir::WalkDir;

use atomicfile::output as out;
use atomicfile::{AtomicDir, AtomicError, AtomicFile, Config, OpenMode, describe, load_config, version_of};

use crate::cli::{Args, Command, DirCommand};
use crate::logging::init_tracing;

/// Exit status for "lock busy, try again later" (sysexits EX_TEMPFAIL).
const EXIT_TEMPFAIL: u8 = 75;

/// Run the CLI application.
pub fn run(args: Args) -> Result<()> {
    // Config errors are reported before logging exists.
    let mut cfg = load_config(args.config.as_deref())?;
    args.apply_overrides(&mut cfg);

    // Held until return so the file appender flushes.
    let _guard = init_tracing(cfg.log_level, cfg.log_file.as_deref(), args.json)?;
    debug!(?args, ?cfg, "starting atomicfile");

    match &args.command {
        Command::Write { path, create, .. } => write_file(&cfg, path, *create),
        Command::Cat { path } => cat_file(&cfg, path),
        Command::Dir(cmd) => run_dir(&cfg, cmd),
    }
}

/// Print `err` for the user and pick an exit status.
pub fn report(err: &anyhow::Error) -> ExitCode {
    match err.downcast_ref::<AtomicError>() {
        Some(ae) => {
            error!(code = ae.code(), errno = ae.raw_os_error(), error = %ae, "command failed");
            out::print_error(&describe(ae));
            if ae.is_lock_unavailable() {
                ExitCode::from(EXIT_TEMPFAIL)
            } else {
                ExitCode::FAILURE
            }
        }
        None => {
            out::print_error(&format!("{err:#}"));
            ExitCode::FAILURE
        }
    }
}

fn write_file(cfg: &Config, path: &Path, create: bool) -> Result<()> {
    let mode = if create { OpenMode::CreateIfMissing } else { OpenMode::Write };
    let file = AtomicFile::open(path, cfg.file_options(mode))?;
    file.commit_from(&mut io::stdin().lock())?;
    info!(path = %path.display(), "write committed");
    Ok(())
}

fn cat_file(cfg: &Config, path: &Path) -> Result<()> {
    let mut file = AtomicFile::open(path, cfg.file_options(OpenMode::Read))?;
    let mut stdout = io::stdout().lock();
    stdout.write_all(file.read_all()?).context("write to stdout")?;
    stdout.flush().context("flush stdout")?;
    Ok(())
}

fn run_dir(cfg: &Config, cmd: &DirCommand) -> Result<()> {
    match cmd {
        DirCommand::Init { root, .. } => {
            let dir = AtomicDir::open(root, cfg.file_options(OpenMode::CreateIfMissing))?;
            let slots = dir.slot_count();
            dir.close()?;
            out::print_success(&format!("{} ready with {slots} slots", root.display()));
        }
        DirCommand::Current { root } => {
            let dir = AtomicDir::open(root, cfg.file_options(OpenMode::Read))?;
            out::print_user(&dir.current_dir()?.display().to_string());
        }
        DirCommand::Commit { root, from, version, .. } => {
            if !from.is_dir() {
                bail!("source '{}' is not a directory", from.display());
            }
            // The first commit into a fresh root has no `current` yet.
            let dir = AtomicDir::open(root, cfg.file_options(OpenMode::CreateIfMissing))?;
            let scratch = dir.scratch_dir()?;
            clear_dir(&scratch)?;
            copy_tree(from, &scratch)?;
            dir.commit(version.as_deref())?;
            out::print_user(&scratch.display().to_string());
        }
        DirCommand::Rollback { root, slot, .. } => {
            let dir = AtomicDir::open(root, cfg.file_options(OpenMode::Write))?;
            dir.rollback(*slot)?;
            out::print_success(&format!("{} now at slot {slot}", root.display()));
        }
        DirCommand::List { root } => {
            let dir = AtomicDir::open(root, cfg.file_options(OpenMode::Read))?;
            let live = dir.current_slot()?;
            dir.scan(|path, slot| {
                let version = version_of(path);
                out::print_slot(slot, &path.display().to_string(), version.as_deref(), live == Some(slot));
                ControlFlow::Continue(())
            })?;
        }
    }
    Ok(())
}

/// Empty a scratch slot left over from an older version.
fn clear_dir(dir: &Path) -> Result<()> {
    for entry in fs::read_dir(dir).with_context(|| format!("read directory '{}'", dir.display()))? {
        let entry = entry?;
        let path = entry.path();
        let removed = if entry.file_type()?.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        removed.with_context(|| format!("remove '{}'", path.display()))?;
    }
    Ok(())
}

/// Recreate the tree under `src` inside `dst`, keeping symlinks as symlinks.
fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    for entry in WalkDir::new(src).min_depth(1).follow_links(false) {
        let entry = entry.with_context(|| format!("walk '{}'", src.display()))?;
        let rel = entry.path().strip_prefix(src)?;
        let target = dst.join(rel);
        let ft = entry.file_type();
        if ft.is_dir() {
            fs::create_dir_all(&target).with_context(|| format!("create directory '{}'", target.display()))?;
        } else if ft.is_symlink() {
            let link = fs::read_link(entry.path())?;
            symlink(&link, &target).with_context(|| format!("create symlink '{}'", target.display()))?;
        } else {
            fs::copy(entry.path(), &target)
                .with_context(|| format!("copy '{}' -> '{}'", entry.path().display(), target.display()))?;
        }
    }
    debug!(src = %src.display(), dst = %dst.display(), "copied tree into scratch slot");
    Ok(())
}
