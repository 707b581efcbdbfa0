//! Info command

use std::path::Path;

use anyhow::{Context, Result};
use apex_core::ApexFile;
use crossterm::style::Stylize;

/// Show the manifest and payload layout of a package
pub fn info(package: &Path) -> Result<()> {
    let apex = ApexFile::open(package)
        .with_context(|| format!("Failed to read {}", package.display()))?;
    let manifest = apex.manifest();

    let lw = 14;

    println!();
    println!(
        "  {} {}",
        manifest.name().white().bold(),
        manifest.version().to_string().dark_grey()
    );
    println!();

    if !manifest.version_name.is_empty() {
        println!("  {:<lw$}{}", "version name", manifest.version_name);
    }
    println!("  {:<lw$}{}", "image offset", apex.image_offset());
    println!("  {:<lw$}{}", "image size", apex.image_size());
    if manifest.no_code {
        println!("  {:<lw$}yes", "no code");
    }
    for (label, libs) in [
        ("provides", &manifest.provide_native_libs),
        ("requires", &manifest.require_native_libs),
        ("jni libs", &manifest.jni_libs),
    ] {
        if !libs.is_empty() {
            println!("  {:<lw$}{}", label, libs.join(", "));
        }
    }

    Ok(())
}
