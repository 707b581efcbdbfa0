//! Pubkey command

use std::path::Path;

use anyhow::{Context, Result};
use apex_core::ApexFile;

/// Print or save the public key bundled in a package
pub fn pubkey(package: &Path, output: Option<&Path>) -> Result<()> {
    let apex = ApexFile::open(package)
        .with_context(|| format!("Failed to read {}", package.display()))?;
    let key = apex
        .bundled_public_key()
        .context("Failed to extract bundled key")?;

    match output {
        Some(path) => {
            std::fs::write(path, &key)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Wrote {} byte key to {}", key.len(), path.display());
        }
        None => println!("{}", hex::encode(&key)),
    }

    Ok(())
}
