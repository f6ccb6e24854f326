//! Wrapped-tool invocation
//!
//! The cache must never break a build: every failure on the cached path
//! degrades to running the command untouched and surfacing its exit
//! code.

use crate::exec;
use crate::wrappers;
use recache_cache::CacheEngine;
use recache_core::Config;
use std::ffi::OsString;
use std::path::Path;
use tracing::{debug, error, warn};

pub fn run(args: Vec<OsString>) -> i32 {
    let args: Vec<String> = args
        .iter()
        .map(|a| a.to_string_lossy().into_owned())
        .collect();
    if args.is_empty() {
        error!("Missing command");
        return 1;
    }

    // Resolve the true executable first: it decides which wrapper
    // matches, feeds the program identity, and stops symlink recursion.
    let resolved = match exec::find_executable(Path::new(&args[0]), crate::EXE_NAME) {
        Ok(path) => path,
        Err(e) => {
            error!(command = %args[0], error = %e, "Cannot resolve wrapped command");
            return 1;
        }
    };
    let mut argv = args;
    argv[0] = resolved.to_string_lossy().into_owned();

    if let Some(code) = try_wrapped(&resolved, &argv) {
        return code;
    }

    // Fall back to running the command as is.
    match exec::run_passthrough(Path::new(&argv[0]), &argv[1..]) {
        Ok(code) => code,
        Err(e) => {
            error!(command = %argv[0], error = %e, "Failed to run command");
            1
        }
    }
}

fn try_wrapped(resolved: &Path, argv: &[String]) -> Option<i32> {
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            warn!(error = %e, "Cannot load configuration; running uncached");
            return None;
        }
    };
    let mut engine = match CacheEngine::new(config) {
        Ok(engine) => engine,
        Err(e) => {
            warn!(error = %e, "Cannot open cache; running uncached");
            return None;
        }
    };
    let mut wrapper = wrappers::select_wrapper(resolved, argv.to_vec())?;

    match wrappers::handle_invocation(wrapper.as_mut(), &mut engine) {
        Ok(code) => Some(code),
        Err(e) => {
            debug!(error = %e, "Falling back to running the command");
            None
        }
    }
}
