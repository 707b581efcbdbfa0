//! Public key extraction and trust decisions.
//!
//! A package is signed with the key embedded in its own vbmeta (the bundled
//! key). That proves integrity only. Authenticity comes from a key installed
//! on the device for the package name, looked up through a [`TrustStore`].
//! Whether a package without an installed key may fall back to its bundled
//! key is an explicit [`KeyPolicy`].

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::avb::{self, ImageSource};
use crate::error::{ApexError, Result};

/// File extension of installed AVB public keys.
pub const KEY_EXTENSION: &str = "avbpubkey";

/// Return the raw AVB public key blob that signed the image's vbmeta.
///
/// No trust decision is made. The footer and vbmeta are still fully
/// validated, so a corrupt image fails with [`ApexError::InvalidFooter`].
///
/// # Errors
///
/// Returns the errors of [`avb::load_vbmeta`].
pub fn extract_bundled_key<S: ImageSource + ?Sized>(image: &S) -> Result<Vec<u8>> {
    let vbmeta = avb::load_vbmeta(image)?;
    Ok(vbmeta.public_key().to_vec())
}

/// Source of keys installed on the device, keyed by package name.
pub trait TrustStore {
    /// Look up the installed key for `package_name`.
    ///
    /// `Ok(None)` means no key is installed for that name.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the store exists but cannot be read.
    fn lookup_trusted_key(&self, package_name: &str) -> io::Result<Option<Vec<u8>>>;
}

/// Keys stored as files in an ordered list of directories.
///
/// For each directory, `<dir>/<name>.avbpubkey` is tried, then `<dir>/<name>`.
/// The first file found wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyDirectories {
    dirs: Vec<PathBuf>,
}

impl KeyDirectories {
    /// Search `dirs` in order.
    pub fn new(dirs: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            dirs: dirs.into_iter().collect(),
        }
    }

    /// Directories searched, in order.
    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    fn candidates<'a>(&'a self, package_name: &'a str) -> impl Iterator<Item = PathBuf> + 'a {
        self.dirs.iter().flat_map(move |dir| {
            [
                dir.join(format!("{package_name}.{KEY_EXTENSION}")),
                dir.join(package_name),
            ]
        })
    }
}

impl TrustStore for KeyDirectories {
    fn lookup_trusted_key(&self, package_name: &str) -> io::Result<Option<Vec<u8>>> {
        // Names come from an untrusted manifest and must not escape the directory.
        if package_name.is_empty()
            || package_name.contains(['/', '\\'])
            || package_name == "."
            || package_name == ".."
        {
            return Ok(None);
        }

        for path in self.candidates(package_name) {
            match fs::read(&path) {
                Ok(key) => {
                    tracing::debug!("Found installed key {}", path.display());
                    return Ok(Some(key));
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) if is_directory(&path) => {
                    tracing::debug!("Skipping {}: {e}", path.display());
                }
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }
}

fn is_directory(path: &Path) -> bool {
    path.metadata().is_ok_and(|m| m.is_dir())
}

/// In-memory trust store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticTrustStore {
    keys: HashMap<String, Vec<u8>>,
}

impl StaticTrustStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `key` for `package_name`, replacing any previous key.
    #[must_use]
    pub fn with_key(mut self, package_name: impl Into<String>, key: impl Into<Vec<u8>>) -> Self {
        self.insert(package_name, key);
        self
    }

    /// Install `key` for `package_name`, replacing any previous key.
    pub fn insert(&mut self, package_name: impl Into<String>, key: impl Into<Vec<u8>>) {
        self.keys.insert(package_name.into(), key.into());
    }
}

impl TrustStore for StaticTrustStore {
    fn lookup_trusted_key(&self, package_name: &str) -> io::Result<Option<Vec<u8>>> {
        Ok(self.keys.get(package_name).cloned())
    }
}

/// What to do when no key is installed for a package.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyPolicy {
    /// Reject the package.
    #[default]
    RequireInstalledKey,
    /// Trust the key bundled in the package itself.
    AllowBundledFallback,
}

/// Where a resolved key came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    /// Installed on the device.
    Installed,
    /// Taken from the package's own vbmeta.
    Bundled,
}

/// Key a package is checked against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedKey {
    /// Raw AVB public key blob.
    pub key: Vec<u8>,
    /// Origin of `key`.
    pub source: KeySource,
}

impl ResolvedKey {
    /// Whether a vbmeta signed with `signing_key` is acceptable.
    ///
    /// Keys are compared as raw blobs, byte for byte.
    pub fn authorizes(&self, signing_key: &[u8]) -> bool {
        self.key == signing_key
    }
}

/// Pick the key `package_name` must be signed with.
///
/// An installed key always wins. Without one, [`KeyPolicy::AllowBundledFallback`]
/// accepts `bundled` and [`KeyPolicy::RequireInstalledKey`] rejects the package.
///
/// # Errors
///
/// Returns [`ApexError::UntrustedKey`] when no key is acceptable.
pub fn resolve_trusted_key(
    package_name: &str,
    installed: Option<Vec<u8>>,
    bundled: &[u8],
    policy: KeyPolicy,
) -> Result<ResolvedKey> {
    if let Some(key) = installed {
        return Ok(ResolvedKey {
            key,
            source: KeySource::Installed,
        });
    }

    match policy {
        KeyPolicy::AllowBundledFallback => {
            tracing::warn!("No installed key for {package_name}, trusting the bundled key");
            Ok(ResolvedKey {
                key: bundled.to_vec(),
                source: KeySource::Bundled,
            })
        }
        KeyPolicy::RequireInstalledKey => Err(ApexError::untrusted(
            package_name,
            "no installed key and bundled keys are not allowed",
        )),
    }
}

/// Look up `package_name` in `store`, then apply [`resolve_trusted_key`].
///
/// # Errors
///
/// Returns [`ApexError::UntrustedKey`] if the lookup fails or no key is
/// acceptable.
pub fn resolve_from_store(
    store: &dyn TrustStore,
    package_name: &str,
    bundled: &[u8],
    policy: KeyPolicy,
) -> Result<ResolvedKey> {
    let installed = store
        .lookup_trusted_key(package_name)
        .map_err(|e| ApexError::untrusted(package_name, format!("key lookup failed: {e}")))?;
    resolve_trusted_key(package_name, installed, bundled, policy)
}
