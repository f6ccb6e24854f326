//! Process spawning, stdio capture and executable resolution

use recache_core::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};

/// Captured result of one tool run.
#[derive(Debug)]
pub struct RunResult {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub return_code: i32,
}

/// Run a command capturing stdout/stderr as raw bytes.
pub fn run_capture(program: &Path, args: &[String]) -> Result<RunResult> {
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::inherit())
        .output()
        .map_err(|e| Error::io(e, program, "spawn"))?;
    Ok(RunResult {
        stdout: output.stdout,
        stderr: output.stderr,
        return_code: exit_code(output.status),
    })
}

/// Run a command with inherited stdio; used for the fall-back path
/// where recache gets out of the way entirely.
pub fn run_passthrough(program: &Path, args: &[String]) -> Result<i32> {
    let status = Command::new(program)
        .args(args)
        .status()
        .map_err(|e| Error::io(e, program, "spawn"))?;
    Ok(exit_code(status))
}

fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(1)
}

/// Resolve the wrapped command to the real executable.
///
/// A name with a directory part is canonicalized directly. A bare name
/// is searched on `PATH`; candidates that resolve back to an executable
/// named `exclude_stem` are skipped, so a symlink farm pointing at
/// recache finds the real compiler further down the path instead of
/// recursing into itself.
pub fn find_executable(name: &Path, exclude_stem: &str) -> Result<PathBuf> {
    if name.components().count() > 1 {
        let resolved =
            fs::canonicalize(name).map_err(|e| Error::io(e, name, "canonicalize"))?;
        if stem_matches(&resolved, exclude_stem) {
            return Err(Error::configuration(format!(
                "{} resolves to {exclude_stem} itself",
                name.display()
            )));
        }
        return Ok(resolved);
    }

    let path_var = std::env::var_os("PATH").unwrap_or_default();
    for dir in std::env::split_paths(&path_var) {
        if dir.as_os_str().is_empty() {
            continue;
        }
        let candidate = dir.join(name);
        if !is_executable(&candidate) {
            continue;
        }
        let Ok(resolved) = fs::canonicalize(&candidate) else {
            continue;
        };
        if stem_matches(&resolved, exclude_stem) {
            continue;
        }
        return Ok(resolved);
    }
    Err(Error::configuration(format!(
        "could not find {} in PATH",
        name.display()
    )))
}

fn stem_matches(path: &Path, stem: &str) -> bool {
    path.file_stem().map(|s| s == stem).unwrap_or(false)
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.is_file()
        && fs::metadata(path)
            .map(|m| m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn run_capture_collects_streams_and_code() {
        let result = run_capture(
            Path::new("/bin/sh"),
            &["-c".to_string(), "echo out; echo err >&2; exit 3".to_string()],
        )
        .unwrap();
        assert_eq!(result.stdout, b"out\n");
        assert_eq!(result.stderr, b"err\n");
        assert_eq!(result.return_code, 3);
    }

    #[test]
    fn run_capture_missing_program_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = run_capture(&dir.path().join("no-such-tool"), &[]).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn find_executable_resolves_from_path() {
        let resolved = find_executable(Path::new("sh"), "recache").unwrap();
        assert!(resolved.is_absolute());
        assert!(is_executable(&resolved));
    }

    #[test]
    fn find_executable_unknown_name_fails() {
        assert!(find_executable(Path::new("definitely-not-a-real-tool-9431"), "recache").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn find_executable_refuses_to_recurse() {
        use std::os::unix::fs::symlink;
        let dir = tempfile::tempdir().unwrap();
        // A fake "recache" binary and a gcc symlink pointing at it.
        let me = dir.path().join("recache");
        fs::write(&me, "#!/bin/sh\n").unwrap();
        let mut perms = fs::metadata(&me).unwrap().permissions();
        use std::os::unix::fs::PermissionsExt;
        perms.set_mode(0o755);
        fs::set_permissions(&me, perms).unwrap();
        let link = dir.path().join("gcc");
        symlink(&me, &link).unwrap();

        let err = find_executable(&link, "recache").unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }
}
