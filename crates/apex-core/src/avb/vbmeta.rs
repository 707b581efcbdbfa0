use std::io::{Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt};
use rsa::Pkcs1v15Sign;
use rsa::traits::PublicKeyParts;
use sha2::{Sha256, Sha512};

use super::descriptor::{Descriptor, HashtreeDescriptor, parse_descriptors};
use super::{AlgorithmType, decode_public_key};
use crate::error::{ApexError, Result};

const HEADER_MAGIC: [u8; 4] = *b"AVB0";
const SUPPORTED_MAJOR: u32 = 1;
const SUPPORTED_MINOR: u32 = 3;
const BLOCK_ALIGNMENT: u64 = 64;

/// A vbmeta structure whose every offset and length has been checked.
///
/// Construction copies the relevant bytes out of the image, so the value
/// stays valid independently of the file it came from.
#[derive(Clone, Debug)]
pub struct VbMetaImage {
    /// Minimum libavb major version needed to verify this vbmeta.
    pub required_libavb_version_major: u32,
    /// Minimum libavb minor version needed to verify this vbmeta.
    pub required_libavb_version_minor: u32,
    /// Signature algorithm.
    pub algorithm: AlgorithmType,
    /// Rollback index.
    pub rollback_index: u64,
    /// Header flags.
    pub flags: u32,
    /// Tool that produced the vbmeta, e.g. `avbtool 1.1.0`.
    pub release_string: String,
    header_block: Vec<u8>,
    aux_block: Vec<u8>,
    hash: Vec<u8>,
    signature: Vec<u8>,
    public_key: Vec<u8>,
    public_key_metadata: Vec<u8>,
    descriptors: Vec<Descriptor>,
}

impl VbMetaImage {
    /// Size of the fixed header.
    pub const HEADER_SIZE: usize = 256;

    /// Parse and bounds-check a vbmeta read from an image.
    ///
    /// `raw` may extend past the end of the auxiliary block; the excess is
    /// ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ApexError::InvalidFooter`] if the header is malformed, uses
    /// an unsupported version or algorithm, or declares ranges that do not fit.
    pub fn parse(raw: Vec<u8>) -> Result<Self> {
        if raw.len() < Self::HEADER_SIZE {
            return Err(invalid(format!(
                "vbmeta of {} bytes is smaller than its header",
                raw.len()
            )));
        }

        let mut reader = Cursor::new(&raw[..Self::HEADER_SIZE]);

        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != HEADER_MAGIC {
            return Err(invalid(format!("bad vbmeta magic {magic:02x?}")));
        }

        let required_libavb_version_major = reader.read_u32::<BigEndian>()?;
        let required_libavb_version_minor = reader.read_u32::<BigEndian>()?;
        if required_libavb_version_major != SUPPORTED_MAJOR
            || required_libavb_version_minor > SUPPORTED_MINOR
        {
            return Err(invalid(format!(
                "vbmeta requires libavb {required_libavb_version_major}.{required_libavb_version_minor}"
            )));
        }

        let auth_size = reader.read_u64::<BigEndian>()?;
        let aux_size = reader.read_u64::<BigEndian>()?;
        let algorithm_raw = reader.read_u32::<BigEndian>()?;
        let hash_range = (reader.read_u64::<BigEndian>()?, reader.read_u64::<BigEndian>()?);
        let signature_range = (reader.read_u64::<BigEndian>()?, reader.read_u64::<BigEndian>()?);
        let public_key_range = (reader.read_u64::<BigEndian>()?, reader.read_u64::<BigEndian>()?);
        let metadata_range = (reader.read_u64::<BigEndian>()?, reader.read_u64::<BigEndian>()?);
        let descriptors_range = (reader.read_u64::<BigEndian>()?, reader.read_u64::<BigEndian>()?);
        let rollback_index = reader.read_u64::<BigEndian>()?;
        let flags = reader.read_u32::<BigEndian>()?;
        let _rollback_index_location = reader.read_u32::<BigEndian>()?;
        let mut release_string = [0u8; 48];
        reader.read_exact(&mut release_string)?;

        if auth_size % BLOCK_ALIGNMENT != 0 || aux_size % BLOCK_ALIGNMENT != 0 {
            return Err(invalid(format!(
                "block sizes {auth_size}/{aux_size} are not multiples of {BLOCK_ALIGNMENT}"
            )));
        }
        let total = (Self::HEADER_SIZE as u64)
            .checked_add(auth_size)
            .and_then(|n| n.checked_add(aux_size));
        if total.is_none_or(|total| total > raw.len() as u64) {
            return Err(invalid(format!(
                "authentication ({auth_size}) and auxiliary ({aux_size}) blocks exceed vbmeta of {} bytes",
                raw.len()
            )));
        }

        let algorithm = AlgorithmType::from_raw(algorithm_raw)
            .ok_or_else(|| invalid(format!("unknown algorithm {algorithm_raw}")))?;

        let auth_start = Self::HEADER_SIZE;
        let aux_start = auth_start + auth_size as usize;
        let auth_block = &raw[auth_start..aux_start];
        let aux_block = &raw[aux_start..aux_start + aux_size as usize];

        let hash = sub_block(auth_block, hash_range, "hash")?;
        let signature = sub_block(auth_block, signature_range, "signature")?;
        let public_key = sub_block(aux_block, public_key_range, "public key")?;
        let public_key_metadata = sub_block(aux_block, metadata_range, "public key metadata")?;
        let descriptors_raw = sub_block(aux_block, descriptors_range, "descriptors")?;

        if hash.len() != algorithm.hash_len() {
            return Err(invalid(format!(
                "hash is {} bytes, {algorithm:?} needs {}",
                hash.len(),
                algorithm.hash_len()
            )));
        }
        if signature.len() != algorithm.key_bytes() {
            return Err(invalid(format!(
                "signature is {} bytes, {algorithm:?} needs {}",
                signature.len(),
                algorithm.key_bytes()
            )));
        }

        let descriptors = parse_descriptors(descriptors_raw)?;

        let image = Self {
            required_libavb_version_major,
            required_libavb_version_minor,
            algorithm,
            rollback_index,
            flags,
            release_string: padded_string(&release_string),
            header_block: raw[..Self::HEADER_SIZE].to_vec(),
            aux_block: aux_block.to_vec(),
            hash: hash.to_vec(),
            signature: signature.to_vec(),
            public_key: public_key.to_vec(),
            public_key_metadata: public_key_metadata.to_vec(),
            descriptors,
        };
        tracing::debug!(
            "Parsed vbmeta: {:?}, {} descriptors, {} byte key",
            image.algorithm,
            image.descriptors.len(),
            image.public_key.len()
        );

        Ok(image)
    }

    /// Raw AVB public key blob embedded in the auxiliary block.
    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    /// Optional metadata stored alongside the public key.
    pub fn public_key_metadata(&self) -> &[u8] {
        &self.public_key_metadata
    }

    /// All descriptors, in on-disk order.
    pub fn descriptors(&self) -> &[Descriptor] {
        &self.descriptors
    }

    /// The first hash-tree descriptor, if any.
    pub fn hashtree(&self) -> Option<&HashtreeDescriptor> {
        self.descriptors.iter().find_map(|d| match d {
            Descriptor::Hashtree(h) => Some(h),
            Descriptor::Other { .. } => None,
        })
    }

    /// Check the stored digest and the RSA signature against the embedded key.
    ///
    /// The digest covers the header followed by the auxiliary block.
    ///
    /// # Errors
    ///
    /// Returns [`ApexError::SignatureVerificationFailed`] if the vbmeta is
    /// unsigned, its digest does not match, the key cannot be decoded, or the
    /// signature is invalid.
    pub fn verify_signature(&self) -> Result<()> {
        if self.algorithm == AlgorithmType::None {
            return Err(ApexError::SignatureVerificationFailed(
                "vbmeta is not signed".to_string(),
            ));
        }

        let digest = self.algorithm.hash(&[&self.header_block, &self.aux_block]);
        if digest != self.hash {
            return Err(ApexError::SignatureVerificationFailed(format!(
                "vbmeta digest mismatch: expected {}, computed {}",
                hex::encode(&self.hash),
                hex::encode(&digest)
            )));
        }

        let key = decode_public_key(&self.public_key)?;
        if key.size() != self.algorithm.key_bytes() {
            return Err(ApexError::SignatureVerificationFailed(format!(
                "{}-bit key does not match {:?}",
                key.size() * 8,
                self.algorithm
            )));
        }

        let scheme = if self.algorithm.is_sha512() {
            Pkcs1v15Sign::new::<Sha512>()
        } else {
            Pkcs1v15Sign::new::<Sha256>()
        };
        key.verify(scheme, &digest, &self.signature).map_err(|e| {
            ApexError::SignatureVerificationFailed(format!("RSA signature mismatch: {e}"))
        })
    }
}

fn sub_block<'a>(block: &'a [u8], (offset, size): (u64, u64), field: &str) -> Result<&'a [u8]> {
    let range = offset
        .checked_add(size)
        .filter(|&end| end <= block.len() as u64)
        .map(|end| offset as usize..end as usize)
        .ok_or_else(|| {
            invalid(format!(
                "{field} at {offset}+{size} exceeds its {} byte block",
                block.len()
            ))
        })?;
    Ok(&block[range])
}

fn padded_string(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

fn invalid(reason: String) -> ApexError {
    ApexError::InvalidFooter(reason)
}
