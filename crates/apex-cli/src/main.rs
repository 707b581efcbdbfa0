//! apex - inspect and verify APEX packages

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use apex_cli::cmd;
use apex_cli::{Cli, Commands};

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Info { package } => cmd::info::info(&package),
        Commands::Verify {
            package,
            config,
            allow_bundled_key,
        } => cmd::verify::verify(&package, &config, allow_bundled_key),
        Commands::Pubkey { package, output } => cmd::pubkey::pubkey(&package, output.as_deref()),
        Commands::List { dir } => cmd::list::list(&dir),
        Commands::Completions { shell } => {
            cmd::completions::completions(shell);
            Ok(())
        }
    }
}
