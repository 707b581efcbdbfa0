//! Android Verified Boot metadata embedded at the end of the payload image.
//!
//! The image ends with a 64-byte [`AvbFooter`] that points at a vbmeta
//! structure. The vbmeta is self-signed: it carries the public key that
//! signed it, so [`VbMetaImage::verify_signature`] only proves the bytes were
//! not altered. Whether that key is trusted is decided in [`crate::keys`].
//!
//! Every structure here is parsed into an owned, validated value. Offsets and
//! lengths read from the image are checked before any slice is taken.

mod descriptor;
mod footer;
mod key;
mod vbmeta;

use std::io;

use sha2::{Digest, Sha256, Sha512};

pub use descriptor::{Descriptor, HashtreeDescriptor};
pub use footer::AvbFooter;
pub use key::decode_public_key;
pub use vbmeta::VbMetaImage;

use crate::error::{ApexError, Result};

/// Largest vbmeta accepted from a footer.
pub const MAX_VBMETA_SIZE: u64 = 64 * 1024;

/// Random-access view of an image whose trailing bytes hold the AVB footer.
pub trait ImageSource {
    /// Total image length in bytes.
    fn image_size(&self) -> u64;

    /// Fill `buf` from `offset`, failing if the range leaves the image.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the range is out of bounds or the read fails.
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()>;
}

impl ImageSource for [u8] {
    fn image_size(&self) -> u64 {
        self.len() as u64
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let start = usize::try_from(offset).map_err(io::Error::other)?;
        let src = start
            .checked_add(buf.len())
            .and_then(|end| self.get(start..end))
            .ok_or_else(|| io::Error::from(io::ErrorKind::UnexpectedEof))?;
        buf.copy_from_slice(src);
        Ok(())
    }
}

/// Signature algorithm declared in the vbmeta header.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AlgorithmType {
    /// Unsigned vbmeta.
    None,
    /// SHA-256 with a 2048-bit RSA key.
    Sha256Rsa2048,
    /// SHA-256 with a 4096-bit RSA key.
    Sha256Rsa4096,
    /// SHA-256 with an 8192-bit RSA key.
    Sha256Rsa8192,
    /// SHA-512 with a 2048-bit RSA key.
    Sha512Rsa2048,
    /// SHA-512 with a 4096-bit RSA key.
    Sha512Rsa4096,
    /// SHA-512 with an 8192-bit RSA key.
    Sha512Rsa8192,
}

impl AlgorithmType {
    /// Map the on-disk value, or `None` for values libavb does not define.
    pub fn from_raw(value: u32) -> Option<Self> {
        let algorithm = match value {
            0 => Self::None,
            1 => Self::Sha256Rsa2048,
            2 => Self::Sha256Rsa4096,
            3 => Self::Sha256Rsa8192,
            4 => Self::Sha512Rsa2048,
            5 => Self::Sha512Rsa4096,
            6 => Self::Sha512Rsa8192,
            _ => return None,
        };
        Some(algorithm)
    }

    /// Digest length in bytes.
    pub fn hash_len(self) -> usize {
        match self {
            Self::None => 0,
            Self::Sha256Rsa2048 | Self::Sha256Rsa4096 | Self::Sha256Rsa8192 => 32,
            Self::Sha512Rsa2048 | Self::Sha512Rsa4096 | Self::Sha512Rsa8192 => 64,
        }
    }

    /// RSA modulus length in bytes.
    pub fn key_bytes(self) -> usize {
        match self {
            Self::None => 0,
            Self::Sha256Rsa2048 | Self::Sha512Rsa2048 => 256,
            Self::Sha256Rsa4096 | Self::Sha512Rsa4096 => 512,
            Self::Sha256Rsa8192 | Self::Sha512Rsa8192 => 1024,
        }
    }

    /// Length of the AVB public key blob for this algorithm.
    pub fn public_key_len(self) -> usize {
        match self {
            Self::None => 0,
            _ => 8 + 2 * self.key_bytes(),
        }
    }

    /// Digest the concatenation of `parts`.
    pub fn hash(self, parts: &[&[u8]]) -> Vec<u8> {
        match self {
            Self::None => vec![],
            Self::Sha256Rsa2048 | Self::Sha256Rsa4096 | Self::Sha256Rsa8192 => {
                let mut hasher = Sha256::new();
                for part in parts {
                    hasher.update(part);
                }
                hasher.finalize().to_vec()
            }
            Self::Sha512Rsa2048 | Self::Sha512Rsa4096 | Self::Sha512Rsa8192 => {
                let mut hasher = Sha512::new();
                for part in parts {
                    hasher.update(part);
                }
                hasher.finalize().to_vec()
            }
        }
    }

    fn is_sha512(self) -> bool {
        matches!(
            self,
            Self::Sha512Rsa2048 | Self::Sha512Rsa4096 | Self::Sha512Rsa8192
        )
    }
}

/// Hash-tree parameters extracted from a verified vbmeta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApexVerityData {
    /// Hash algorithm of the tree, e.g. `sha256`.
    pub hash_algorithm: String,
    /// Lower-case hex salt.
    pub salt: String,
    /// Lower-case hex root digest.
    pub root_digest: String,
    /// The full descriptor, for building the dm-verity table.
    pub desc: HashtreeDescriptor,
}

impl ApexVerityData {
    /// Summarise a hash-tree descriptor.
    pub fn from_descriptor(desc: &HashtreeDescriptor) -> Self {
        Self {
            hash_algorithm: desc.hash_algorithm.clone(),
            salt: hex::encode(&desc.salt),
            root_digest: hex::encode(&desc.root_digest),
            desc: desc.clone(),
        }
    }
}

/// Read the footer at the end of `image` and the vbmeta it points at.
///
/// No signature check happens here; see [`VbMetaImage::verify_signature`].
///
/// # Errors
///
/// Returns [`ApexError::InvalidFooter`] if the footer, the vbmeta structure
/// or a hash-tree descriptor's ranges are inconsistent with the image, and
/// [`ApexError::Io`] if a read fails.
pub fn load_vbmeta<S: ImageSource + ?Sized>(image: &S) -> Result<VbMetaImage> {
    let image_size = image.image_size();
    if image_size < AvbFooter::SIZE as u64 {
        return Err(ApexError::InvalidFooter(format!(
            "image of {image_size} bytes cannot hold a footer"
        )));
    }

    let mut raw_footer = [0u8; AvbFooter::SIZE];
    image.read_exact_at(image_size - AvbFooter::SIZE as u64, &mut raw_footer)?;
    let footer = AvbFooter::parse(&raw_footer)?;
    footer.validate_against(image_size)?;

    let mut raw_vbmeta = vec![0u8; footer.vbmeta_size as usize];
    image.read_exact_at(footer.vbmeta_offset, &mut raw_vbmeta)?;

    let vbmeta = VbMetaImage::parse(raw_vbmeta)?;
    for descriptor in vbmeta.descriptors() {
        if let Descriptor::Hashtree(desc) = descriptor {
            desc.validate_against(&footer)?;
        }
    }
    Ok(vbmeta)
}

/// Check footer integrity and return the hash-tree parameters.
///
/// This authenticates the vbmeta against its own embedded key only.
///
/// # Errors
///
/// Returns [`ApexError::InvalidFooter`],
/// [`ApexError::SignatureVerificationFailed`] or
/// [`ApexError::DescriptorNotFound`] for the corresponding failures.
pub fn verify_verity<S: ImageSource + ?Sized>(image: &S) -> Result<ApexVerityData> {
    verify_verity_with(image, |_| Ok(()))
}

/// [`verify_verity`] with an extra check of the signing key.
///
/// `authorize` receives the raw public key blob once the signature has been
/// verified, and before the hash-tree descriptor is looked up.
pub(crate) fn verify_verity_with<S, F>(image: &S, authorize: F) -> Result<ApexVerityData>
where
    S: ImageSource + ?Sized,
    F: FnOnce(&[u8]) -> Result<()>,
{
    let vbmeta = load_vbmeta(image)?;
    vbmeta.verify_signature()?;
    authorize(vbmeta.public_key())?;
    let desc = vbmeta.hashtree().ok_or(ApexError::DescriptorNotFound)?;
    Ok(ApexVerityData::from_descriptor(desc))
}
