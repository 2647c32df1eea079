//! Command definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Spire - build and manage Spire applications
#[derive(Debug, Parser)]
#[command(name = "spire")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Compilation commands
    Build {
        #[command(subcommand)]
        target: BuildTarget,
    },
}

/// What `spire build` compiles.
#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum BuildTarget {
    /// Build the spire command itself
    #[command(name = "self")]
    SelfCli(BuildArgs),

    /// Build the application backend
    Backend(BuildArgs),
}

impl BuildTarget {
    pub fn args(&self) -> &BuildArgs {
        match self {
            BuildTarget::SelfCli(args) | BuildTarget::Backend(args) => args,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            BuildTarget::SelfCli(_) => "spire",
            BuildTarget::Backend(_) => "backend",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, clap::Args)]
pub struct BuildArgs {
    /// Project directory containing Cargo.toml
    #[arg(short = 'C', long, default_value = ".")]
    pub dir: PathBuf,
}
