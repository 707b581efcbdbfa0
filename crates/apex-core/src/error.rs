//! Error taxonomy shared by every stage of package verification.
//!
//! Each variant is one failure kind. None of them are retryable for a given
//! file: the checks are deterministic over immutable bytes.

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced while opening, parsing or verifying an APEX package.
#[derive(Error, Debug)]
pub enum ApexError {
    /// The file is missing, unreadable, or not a zip archive.
    #[error("Failed to open package {path}: {reason}")]
    OpenFailure {
        /// Path that was passed to `open`.
        path: PathBuf,
        /// Underlying cause, rendered for diagnostics.
        reason: String,
    },

    /// A required archive entry does not exist.
    #[error("Could not find entry \"{0}\" in package")]
    EntryNotFound(String),

    /// The payload entry cannot be mapped in place (compressed, misaligned or out of range).
    #[error("Invalid payload layout: {0}")]
    InvalidLayout(String),

    /// The manifest entry could not be decoded or lacks required fields.
    #[error("Malformed manifest: {0}")]
    MalformedManifest(String),

    /// The AVB footer or vbmeta structure is inconsistent.
    #[error("Invalid AVB footer: {0}")]
    InvalidFooter(String),

    /// The vbmeta is unsigned, its hash does not match, or the signature is wrong.
    #[error("Signature verification failed: {0}")]
    SignatureVerificationFailed(String),

    /// The vbmeta carries no hash-tree descriptor.
    #[error("No hash-tree descriptor found in vbmeta")]
    DescriptorNotFound,

    /// No acceptable key could be resolved for the package under the active policy.
    #[error("Untrusted key for {package}: {reason}")]
    UntrustedKey {
        /// Package name the key was resolved for.
        package: String,
        /// Why the key was rejected.
        reason: String,
    },

    /// The manifest of a mounted image differs from the one in the container.
    #[error("Manifest mismatch: {0}")]
    ManifestMismatch(String),

    /// A read of an already opened package failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ApexError {
    pub(crate) fn open_failure(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        Self::OpenFailure {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn untrusted(package: &str, reason: impl Into<String>) -> Self {
        Self::UntrustedKey {
            package: package.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T, E = ApexError> = std::result::Result<T, E>;
