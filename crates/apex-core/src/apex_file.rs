//! Opened APEX package.

use std::fs::File;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::avb::{self, ApexVerityData};
use crate::container::{ContainerReader, ImageRegion, MANIFEST_ENTRY, PAYLOAD_ENTRY, PayloadReader};
use crate::error::{ApexError, Result};
use crate::keys::{self, KeyPolicy, TrustStore};
use crate::manifest::ApexManifest;

/// File extension of APEX packages.
pub const APEX_EXTENSION: &str = "apex";

/// An APEX package whose layout and manifest have been validated.
///
/// The payload region and manifest are fixed at open time. Verification reads
/// the image with positioned reads, so a shared `&ApexFile` can be verified
/// from several threads.
#[derive(Debug)]
pub struct ApexFile {
    path: PathBuf,
    file: File,
    manifest: ApexManifest,
    region: ImageRegion,
}

impl ApexFile {
    /// Open `path`, locate the payload image and decode the manifest.
    ///
    /// # Errors
    ///
    /// Returns [`ApexError::OpenFailure`], [`ApexError::EntryNotFound`],
    /// [`ApexError::InvalidLayout`] or [`ApexError::MalformedManifest`]. No
    /// handle is returned unless every step succeeds.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut container = ContainerReader::open(path)?;
        let region = container.find_payload(PAYLOAD_ENTRY)?;
        let manifest = ApexManifest::decode(&container.read_entry(MANIFEST_ENTRY)?)?;

        tracing::debug!(
            "Opened {} v{} from {} (image at {}+{})",
            manifest.name(),
            manifest.version(),
            path.display(),
            region.offset,
            region.size
        );

        Ok(Self {
            path: path.to_path_buf(),
            file: container.into_file(),
            manifest,
            region,
        })
    }

    /// Path the package was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Decoded manifest.
    pub fn manifest(&self) -> &ApexManifest {
        &self.manifest
    }

    /// Absolute, page-aligned offset of the payload image in the file.
    pub fn image_offset(&self) -> u64 {
        self.region.offset
    }

    /// Length of the payload image.
    pub fn image_size(&self) -> u64 {
        self.region.size
    }

    fn payload(&self) -> PayloadReader<'_> {
        PayloadReader::new(&self.file, self.region)
    }

    /// Public key embedded in the payload's vbmeta.
    ///
    /// # Errors
    ///
    /// Returns [`ApexError::InvalidFooter`] if the footer or vbmeta is
    /// malformed, or [`ApexError::Io`] if the image cannot be read.
    pub fn bundled_public_key(&self) -> Result<Vec<u8>> {
        keys::extract_bundled_key(&self.payload())
    }

    /// Verify the payload's vbmeta and return its hash-tree parameters.
    ///
    /// The vbmeta must be correctly signed, the signing key must be the one
    /// resolved for the manifest name from `store` under `policy`, and a
    /// hash-tree descriptor must be present. The first failing check is
    /// returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`ApexError::InvalidFooter`],
    /// [`ApexError::SignatureVerificationFailed`], [`ApexError::UntrustedKey`]
    /// or [`ApexError::DescriptorNotFound`].
    pub fn verify_apex_verity(
        &self,
        store: &dyn TrustStore,
        policy: KeyPolicy,
    ) -> Result<ApexVerityData> {
        let name = self.manifest.name();

        let verity = avb::verify_verity_with(&self.payload(), |signing_key| {
            let resolved = keys::resolve_from_store(store, name, signing_key, policy)?;
            if !resolved.authorizes(signing_key) {
                tracing::warn!("{name} is signed with a key that does not match its installed key");
                return Err(ApexError::untrusted(
                    name,
                    "signing key does not match the installed key",
                ));
            }
            tracing::debug!("{name} signing key accepted ({:?})", resolved.source);
            Ok(())
        })?;

        tracing::info!(
            "Verified {name} ({} root digest {})",
            verity.hash_algorithm,
            verity.root_digest
        );
        Ok(verity)
    }

    /// Check that the image mounted at `mount_path` carries the same manifest.
    ///
    /// # Errors
    ///
    /// Returns [`ApexError::Io`] if `<mount_path>/apex_manifest.pb` cannot be
    /// read, [`ApexError::MalformedManifest`] if it does not decode, and
    /// [`ApexError::ManifestMismatch`] if its name or version differ.
    pub fn verify_manifest_matches(&self, mount_path: impl AsRef<Path>) -> Result<()> {
        let mounted_path = mount_path.as_ref().join(MANIFEST_ENTRY);
        let mounted = ApexManifest::decode(&std::fs::read(&mounted_path)?)?;

        if mounted.name() != self.manifest.name() {
            return Err(ApexError::ManifestMismatch(format!(
                "name is {} in the image but {} in the package",
                mounted.name(),
                self.manifest.name()
            )));
        }
        if mounted.version() != self.manifest.version() {
            return Err(ApexError::ManifestMismatch(format!(
                "version is {} in the image but {} in the package",
                mounted.version(),
                self.manifest.version()
            )));
        }
        Ok(())
    }
}

/// List the `.apex` files directly inside `dir`, sorted by path.
///
/// # Errors
///
/// Returns [`ApexError::Io`] if `dir` cannot be read.
pub fn find_apex_files(dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir.as_ref()).min_depth(1).max_depth(1) {
        let entry = entry.map_err(std::io::Error::from)?;
        if entry.file_type().is_file()
            && entry
                .path()
                .extension()
                .is_some_and(|ext| ext == APEX_EXTENSION)
        {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}
