use std::io::{Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt};

use super::footer::AvbFooter;
use crate::error::{ApexError, Result};

const DESCRIPTOR_HEADER_SIZE: usize = 16;
const HASHTREE_TAG: u64 = 1;
/// Fixed part of a hash-tree descriptor body, before the variable-length data.
const HASHTREE_FIXED_SIZE: usize = 164;

/// A single vbmeta descriptor.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Descriptor {
    /// dm-verity hash-tree parameters.
    Hashtree(HashtreeDescriptor),
    /// Any other descriptor, kept as its raw body.
    Other {
        /// Descriptor tag.
        tag: u64,
        /// Body bytes following the 16-byte header.
        data: Vec<u8>,
    },
}

/// Parameters of the dm-verity hash tree appended to the image.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HashtreeDescriptor {
    /// dm-verity on-disk format version.
    pub dm_verity_version: u32,
    /// Size of the hashed filesystem data.
    pub image_size: u64,
    /// Offset of the hash tree within the image.
    pub tree_offset: u64,
    /// Length of the hash tree.
    pub tree_size: u64,
    /// Block size of the hashed data.
    pub data_block_size: u32,
    /// Block size of the hash tree.
    pub hash_block_size: u32,
    /// Number of FEC parity roots, 0 if FEC is absent.
    pub fec_num_roots: u32,
    /// Offset of the FEC data.
    pub fec_offset: u64,
    /// Length of the FEC data.
    pub fec_size: u64,
    /// Hash algorithm name, e.g. `sha1` or `sha256`.
    pub hash_algorithm: String,
    /// Partition the descriptor was generated for.
    pub partition_name: String,
    /// Salt prepended to every hashed block.
    pub salt: Vec<u8>,
    /// Digest at the top of the tree.
    pub root_digest: Vec<u8>,
    /// AVB hash-tree flags.
    pub flags: u32,
}

impl HashtreeDescriptor {
    /// Number of data blocks covered by the tree.
    pub fn data_block_count(&self) -> u64 {
        if self.data_block_size == 0 {
            return 0;
        }
        self.image_size / u64::from(self.data_block_size)
    }

    /// Check the declared ranges against the footer of the image carrying
    /// this descriptor.
    ///
    /// The hashed data must fit in the original image, and the tree and FEC
    /// data must end before the vbmeta.
    ///
    /// # Errors
    ///
    /// Returns [`ApexError::InvalidFooter`] on a zero block size or a range
    /// that overflows or does not fit.
    pub fn validate_against(&self, footer: &AvbFooter) -> Result<()> {
        if self.data_block_size == 0 || self.hash_block_size == 0 {
            return Err(invalid(format!(
                "hash-tree block sizes {}/{} must be non-zero",
                self.data_block_size, self.hash_block_size
            )));
        }
        if self.image_size > footer.original_image_size {
            return Err(invalid(format!(
                "hash-tree covers {} bytes but the image holds {}",
                self.image_size, footer.original_image_size
            )));
        }
        check_range("hash tree", self.tree_offset, self.tree_size, footer.vbmeta_offset)?;
        if self.fec_num_roots != 0 {
            check_range("FEC data", self.fec_offset, self.fec_size, footer.vbmeta_offset)?;
        }
        Ok(())
    }

    fn parse(body: &[u8]) -> Result<Self> {
        if body.len() < HASHTREE_FIXED_SIZE {
            return Err(invalid(format!(
                "hash-tree descriptor body of {} bytes is too short",
                body.len()
            )));
        }

        let mut reader = Cursor::new(body);
        let dm_verity_version = reader.read_u32::<BigEndian>()?;
        let image_size = reader.read_u64::<BigEndian>()?;
        let tree_offset = reader.read_u64::<BigEndian>()?;
        let tree_size = reader.read_u64::<BigEndian>()?;
        let data_block_size = reader.read_u32::<BigEndian>()?;
        let hash_block_size = reader.read_u32::<BigEndian>()?;
        let fec_num_roots = reader.read_u32::<BigEndian>()?;
        let fec_offset = reader.read_u64::<BigEndian>()?;
        let fec_size = reader.read_u64::<BigEndian>()?;

        let mut hash_algorithm = [0u8; 32];
        reader.read_exact(&mut hash_algorithm)?;
        let hash_algorithm = padded_ascii(&hash_algorithm, "hash_algorithm")?;

        let partition_name_len = reader.read_u32::<BigEndian>()? as usize;
        let salt_len = reader.read_u32::<BigEndian>()? as usize;
        let root_digest_len = reader.read_u32::<BigEndian>()? as usize;
        let flags = reader.read_u32::<BigEndian>()?;
        // 60 reserved bytes bring the fixed part to HASHTREE_FIXED_SIZE.

        let variable = &body[HASHTREE_FIXED_SIZE..];
        let needed = partition_name_len
            .checked_add(salt_len)
            .and_then(|n| n.checked_add(root_digest_len));
        if needed.is_none_or(|n| n > variable.len()) {
            return Err(invalid(format!(
                "hash-tree descriptor lengths ({partition_name_len}+{salt_len}+{root_digest_len}) exceed its body"
            )));
        }

        let (partition_name, rest) = variable.split_at(partition_name_len);
        let (salt, rest) = rest.split_at(salt_len);
        let root_digest = &rest[..root_digest_len];

        let partition_name = std::str::from_utf8(partition_name)
            .map_err(|_| invalid("partition name is not UTF-8".to_string()))?
            .to_string();

        Ok(Self {
            dm_verity_version,
            image_size,
            tree_offset,
            tree_size,
            data_block_size,
            hash_block_size,
            fec_num_roots,
            fec_offset,
            fec_size,
            hash_algorithm,
            partition_name,
            salt: salt.to_vec(),
            root_digest: root_digest.to_vec(),
            flags,
        })
    }
}

/// Split the descriptors block of a vbmeta into descriptors.
///
/// Every descriptor is `tag: u64`, `num_bytes_following: u64`, then a body
/// whose length is a multiple of 8.
pub(super) fn parse_descriptors(mut data: &[u8]) -> Result<Vec<Descriptor>> {
    let mut descriptors = Vec::new();

    while !data.is_empty() {
        if data.len() < DESCRIPTOR_HEADER_SIZE {
            return Err(invalid(format!(
                "{} trailing bytes cannot hold a descriptor header",
                data.len()
            )));
        }

        let mut header = Cursor::new(&data[..DESCRIPTOR_HEADER_SIZE]);
        let tag = header.read_u64::<BigEndian>()?;
        let num_bytes_following = header.read_u64::<BigEndian>()?;

        let remaining = (data.len() - DESCRIPTOR_HEADER_SIZE) as u64;
        if num_bytes_following % 8 != 0 || num_bytes_following > remaining {
            return Err(invalid(format!(
                "descriptor with tag {tag} declares {num_bytes_following} bytes, {remaining} available"
            )));
        }

        let end = DESCRIPTOR_HEADER_SIZE + num_bytes_following as usize;
        let body = &data[DESCRIPTOR_HEADER_SIZE..end];
        let descriptor = match tag {
            HASHTREE_TAG => Descriptor::Hashtree(HashtreeDescriptor::parse(body)?),
            _ => Descriptor::Other {
                tag,
                data: body.to_vec(),
            },
        };
        descriptors.push(descriptor);
        data = &data[end..];
    }

    Ok(descriptors)
}

fn check_range(field: &str, offset: u64, size: u64, limit: u64) -> Result<()> {
    let end = offset.checked_add(size);
    if end.is_none_or(|end| end > limit) {
        return Err(invalid(format!(
            "{field} at {offset}+{size} extends past vbmeta offset {limit}"
        )));
    }
    Ok(())
}

fn padded_ascii(raw: &[u8], field: &str) -> Result<String> {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    let value = &raw[..end];
    if !value.is_ascii() {
        return Err(invalid(format!("{field} is not ASCII")));
    }
    Ok(String::from_utf8_lossy(value).into_owned())
}

fn invalid(reason: String) -> ApexError {
    ApexError::InvalidFooter(reason)
}
