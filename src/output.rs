use owo_colors::OwoColorize;

/// Small wrapper around stdout/stderr printing to provide consistent, colored
/// user-facing messages. Colors are enabled only when the stream is a TTY.
fn stdout_is_tty() -> bool {
    atty::is(atty::Stream::Stdout)
}

pub fn stderr_is_tty() -> bool {
    atty::is(atty::Stream::Stderr)
}

pub fn print_warn(msg: &str) {
    if stderr_is_tty() {
        eprintln!("{} {}", "warn:".yellow().bold(), msg);
    } else {
        eprintln!("warn: {}", msg);
    }
}

pub fn print_error(msg: &str) {
    if stderr_is_tty() {
        eprintln!("{} {}", "error:".red().bold(), msg);
    } else {
        eprintln!("error: {}", msg);
    }
}

/// Confirmation on stderr so stdout stays clean for piping.
pub fn print_success(msg: &str) {
    if stderr_is_tty() {
        eprintln!("{} {}", "ok:".green().bold(), msg);
    } else {
        eprintln!("ok: {}", msg);
    }
}

/// Print a plain line on stdout (no prefix). Use this for primary outputs
/// such as slot paths which users may script against.
pub fn print_user(msg: &str) {
    println!("{}", msg);
}

/// A slot row for `dir list`; the live slot is highlighted on a terminal.
pub fn print_slot(slot: u32, path: &str, version: Option<&str>, live: bool) {
    let marker = if live { "*" } else { " " };
    let version = version.unwrap_or("-");
    if live && stdout_is_tty() {
        println!("{} {:>3} {} {}", marker.green().bold(), slot.bold(), path, version.cyan());
    } else {
        println!("{} {:>3} {} {}", marker, slot, path, version);
    }
}
