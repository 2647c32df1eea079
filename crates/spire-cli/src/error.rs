use std::path::PathBuf;

use thiserror::Error;

/// Errors reported by the `spire` command.
#[derive(Error, Debug)]
pub enum CliError {
    #[error("please install cargo in your PATH first")]
    CargoNotFound,

    #[error("project directory not found: {0}")]
    ProjectNotFound(PathBuf),

    #[error("failed to run {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cargo build failed ({status})")]
    BuildFailed { status: String, output: String },
}
