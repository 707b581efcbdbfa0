//! apex - inspect and verify APEX packages
//!
//! Thin command-line front end over `apex-core`. Every subcommand opens the
//! package read-only; nothing is mounted or installed.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub mod cmd;

/// Default location of the verifier configuration.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/apex/verifier.toml";

/// Command-line arguments.
#[derive(Debug, Parser)]
#[command(name = "apex")]
#[command(author, version, about = "apex - inspect and verify APEX packages")]
pub struct Cli {
    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Commands,
}

/// Subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Show the manifest and payload layout of a package
    Info {
        /// Package file
        package: PathBuf,
    },
    /// Verify the payload signature, key trust and hash-tree descriptor
    Verify {
        /// Package file
        package: PathBuf,
        /// Verifier configuration (TOML)
        #[arg(long, env = "APEX_VERIFIER_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
        /// Accept the key bundled in the package when none is installed
        #[arg(long)]
        allow_bundled_key: bool,
    },
    /// Print or save the public key bundled in a package
    Pubkey {
        /// Package file
        package: PathBuf,
        /// Write the raw key blob here instead of printing it as hex
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },
    /// List the packages in a directory
    List {
        /// Directory to scan (not recursive)
        dir: PathBuf,
    },
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}
