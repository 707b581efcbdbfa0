//! Verifier configuration.
//!
//! ```toml
//! key_dirs = ["/system/etc/security/apex", "/product/etc/security/apex"]
//! key_policy = "require-installed-key"
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::keys::{KeyDirectories, KeyPolicy};

/// Directories holding installed keys on a stock device.
pub const DEFAULT_KEY_DIRS: &[&str] = &["/system/etc/security/apex", "/product/etc/security/apex"];

/// Where installed keys live and how to treat packages without one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VerifierConfig {
    /// Key directories, searched in order.
    pub key_dirs: Vec<PathBuf>,
    /// Behaviour when no key is installed for a package.
    pub key_policy: KeyPolicy,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            key_dirs: DEFAULT_KEY_DIRS.iter().map(PathBuf::from).collect(),
            key_policy: KeyPolicy::default(),
        }
    }
}

impl VerifierConfig {
    /// Load from `path`, or return the defaults if the file does not exist.
    ///
    /// # Errors
    ///
    /// Fails if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Parse a TOML document. Absent keys take their default values.
    ///
    /// # Errors
    ///
    /// Fails on invalid TOML, unknown keys or an unknown policy name.
    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Trust store over [`Self::key_dirs`].
    pub fn trust_store(&self) -> KeyDirectories {
        KeyDirectories::new(self.key_dirs.iter().cloned())
    }
}
