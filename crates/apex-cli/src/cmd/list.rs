//! List command

use std::path::Path;

use anyhow::{Context, Result};
use apex_core::{ApexFile, find_apex_files};
use crossterm::style::Stylize;

/// List the packages in a directory
pub fn list(dir: &Path) -> Result<()> {
    let files = find_apex_files(dir).with_context(|| format!("Failed to list {}", dir.display()))?;

    if files.is_empty() {
        println!();
        println!("  No packages in {}.", dir.display());
        return Ok(());
    }

    println!();
    for path in &files {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        match ApexFile::open(path) {
            Ok(apex) => println!(
                "  {:<40} {:<12} {}",
                apex.manifest().name(),
                apex.manifest().version(),
                file_name.dark_grey()
            ),
            Err(e) => {
                tracing::debug!("Skipping {}: {e}", path.display());
                println!("  {:<40} {:<12} {}", file_name, "invalid".red(), e);
            }
        }
    }
    println!();
    println!("  {} packages", files.len());

    Ok(())
}
