//! Verify command

use std::path::Path;

use anyhow::{Context, Result};
use apex_core::config::VerifierConfig;
use apex_core::{ApexFile, KeyPolicy};
use crossterm::style::Stylize;

/// Verify the payload signature, key trust and hash-tree descriptor
pub fn verify(package: &Path, config_path: &Path, allow_bundled_key: bool) -> Result<()> {
    let config = VerifierConfig::load(config_path)?;
    let policy = if allow_bundled_key {
        KeyPolicy::AllowBundledFallback
    } else {
        config.key_policy
    };

    let apex = ApexFile::open(package)
        .with_context(|| format!("Failed to read {}", package.display()))?;
    let verity = apex
        .verify_apex_verity(&config.trust_store(), policy)
        .with_context(|| format!("Verification of {} failed", apex.manifest().name()))?;

    let lw = 14;
    println!();
    println!(
        "  {} {} {}",
        "✓".green(),
        apex.manifest().name().white().bold(),
        apex.manifest().version().to_string().dark_grey()
    );
    println!();
    println!("  {:<lw$}{}", "algorithm", verity.hash_algorithm);
    println!("  {:<lw$}{}", "salt", verity.salt);
    println!("  {:<lw$}{}", "root digest", verity.root_digest);
    println!("  {:<lw$}{}", "data blocks", verity.desc.data_block_count());

    Ok(())
}
