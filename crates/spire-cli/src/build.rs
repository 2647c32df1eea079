//! `spire build` implementation.

use std::env;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info};

use crate::cli::BuildTarget;
use crate::error::CliError;

#[cfg(windows)]
const CARGO: &str = "cargo.exe";
#[cfg(not(windows))]
const CARGO: &str = "cargo";

/// Finds `program` in the directories of a `PATH`-style list.
pub fn find_in_path(program: &str, path_var: &OsStr) -> Option<PathBuf> {
    env::split_paths(path_var)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

/// Locates `cargo` on the current `PATH`.
pub fn locate_cargo() -> Result<PathBuf, CliError> {
    let path_var = env::var_os("PATH").ok_or(CliError::CargoNotFound)?;
    find_in_path(CARGO, &path_var).ok_or(CliError::CargoNotFound)
}

/// Runs `cargo build --release` in `dir`, returning the combined output.
pub fn cargo_build(cargo: &Path, dir: &Path) -> Result<String, CliError> {
    if !dir.is_dir() {
        return Err(CliError::ProjectNotFound(dir.to_path_buf()));
    }

    debug!(cargo = %cargo.display(), dir = %dir.display(), "Running cargo build --release");
    let output = Command::new(cargo)
        .args(["build", "--release"])
        .current_dir(dir)
        .output()
        .map_err(|source| CliError::Spawn {
            program: cargo.to_path_buf(),
            source,
        })?;

    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));

    if output.status.success() {
        Ok(combined)
    } else {
        Err(CliError::BuildFailed {
            status: output.status.to_string(),
            output: combined,
        })
    }
}

/// Executes `spire build <target>`.
pub fn run(target: &BuildTarget) -> Result<(), CliError> {
    let cargo = locate_cargo()?;
    let dir = &target.args().dir;
    info!(target = target.label(), dir = %dir.display(), "Building");

    cargo_build(&cargo, dir)?;
    println!(
        "build success, binaries are in {}",
        dir.join("target").join("release").display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn finds_program_in_path_list() {
        let empty = tempfile::tempdir().unwrap();
        let bin = tempfile::tempdir().unwrap();
        fs::write(bin.path().join("cargo"), "").unwrap();

        let path_var = env::join_paths([empty.path(), bin.path()]).unwrap();
        assert_eq!(
            find_in_path("cargo", &path_var),
            Some(bin.path().join("cargo"))
        );
        assert_eq!(find_in_path("rustc", &path_var), None);
    }

    #[test]
    fn missing_project_dir_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let err = cargo_build(Path::new("cargo"), &missing).unwrap_err();
        assert!(matches!(err, CliError::ProjectNotFound(path) if path == missing));
    }

    // `sh build --release` runs the script named `build` in the project dir.
    #[cfg(unix)]
    #[test]
    fn failed_build_keeps_combined_output() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("build"),
            "echo compiling\necho 'error[E0425]' >&2\nexit 101\n",
        )
        .unwrap();

        match cargo_build(Path::new("/bin/sh"), dir.path()).unwrap_err() {
            CliError::BuildFailed { output, .. } => {
                assert!(output.contains("compiling"));
                assert!(output.contains("error[E0425]"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn successful_build_returns_output() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("build"), "echo \"$@\"\n").unwrap();

        let output = cargo_build(Path::new("/bin/sh"), dir.path()).unwrap();
        assert_eq!(output.trim(), "--release");
    }
}
