//! recache CLI
//!
//! Invoked under its own name, recache is a small administrative tool
//! (`--clear`, `--show-stats`, `--max-size`) or an explicit wrapper
//! (`recache gcc -c foo.c`). Invoked under any other name (a symlink
//! named like a compiler), the entire command line is the wrapped
//! compiler invocation.

mod cli;
mod commands;
mod exec;
mod logging;
mod wrappers;

use std::ffi::{OsStr, OsString};
use std::path::Path;

/// Our own executable name; anything else in `argv[0]` means symlink
/// invocation.
pub(crate) const EXE_NAME: &str = "recache";

const EXIT_ERROR: i32 = 1;

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    let args: Vec<OsString> = std::env::args_os().collect();

    if let Some(first) = args.first() {
        if !invoked_as_self(first) {
            logging::init_from_env();
            tracing::debug!(argv0 = %first.to_string_lossy(), "Invoked as symlink");
            return commands::wrap::run(args);
        }
    }

    let cli = match cli::parse(&args) {
        Ok(cli) => cli,
        Err(code) => return code,
    };
    logging::init(cli.level);

    if cli.clear {
        return commands::clear::run();
    }
    if cli.show_stats {
        return commands::stats::run();
    }
    if let Some(size) = &cli.max_size {
        return commands::max_size::run(size);
    }
    if !cli.command.is_empty() {
        return commands::wrap::run(cli.command);
    }

    cli::print_help();
    EXIT_ERROR
}

fn invoked_as_self(arg0: &OsStr) -> bool {
    Path::new(arg0)
        .file_stem()
        .map(|stem| stem == EXE_NAME)
        .unwrap_or(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn own_name_is_not_a_symlink_invocation() {
        assert!(invoked_as_self(OsStr::new("recache")));
        assert!(invoked_as_self(OsStr::new("/usr/local/bin/recache")));
        assert!(invoked_as_self(OsStr::new("recache.exe")));
    }

    #[test]
    fn compiler_names_are_symlink_invocations() {
        assert!(!invoked_as_self(OsStr::new("gcc")));
        assert!(!invoked_as_self(OsStr::new("/usr/lib/recache/bin/g++")));
        assert!(!invoked_as_self(OsStr::new("arm-none-eabi-gcc")));
    }
}
