//! The `spire` command.
//!
//! ```bash
//! spire build self
//! spire build backend -C ./my-app
//! ```

mod build;
mod cli;
mod error;

use std::process::ExitCode;

use clap::Parser;
use spire_runtime::LoggingBuilder;
use tracing::Level;

use crate::cli::{Cli, Commands};
use crate::error::CliError;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::WARN };
    let _guard = LoggingBuilder::new().with_level(level).with_target(false).init();

    let result = match &cli.command {
        Commands::Build { target } => build::run(target),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(CliError::BuildFailed { output, .. }) => {
            println!("cargo build error:");
            println!("{output}");
            println!("--------------");
            ExitCode::FAILURE
        }
        Err(err) => {
            eprintln!("spire: {err}");
            ExitCode::FAILURE
        }
    }
}
