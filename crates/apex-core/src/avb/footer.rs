use std::io::{Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt};

use super::MAX_VBMETA_SIZE;
use crate::error::{ApexError, Result};

const FOOTER_MAGIC: [u8; 4] = *b"AVBf";
const FOOTER_VERSION_MAJOR: u32 = 1;

/// Trailer in the last 64 bytes of an image that locates its vbmeta.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AvbFooter {
    /// Footer format major version.
    pub version_major: u32,
    /// Footer format minor version.
    pub version_minor: u32,
    /// Size of the filesystem data before the hash tree and vbmeta were appended.
    pub original_image_size: u64,
    /// Offset of the vbmeta from the start of the image.
    pub vbmeta_offset: u64,
    /// Length of the vbmeta.
    pub vbmeta_size: u64,
}

impl AvbFooter {
    /// On-disk footer length.
    pub const SIZE: usize = 64;

    /// Decode a footer and check its magic and version.
    ///
    /// # Errors
    ///
    /// Returns [`ApexError::InvalidFooter`] on a bad magic or an unsupported
    /// major version.
    pub fn parse(raw: &[u8; Self::SIZE]) -> Result<Self> {
        let mut reader = Cursor::new(&raw[..]);

        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != FOOTER_MAGIC {
            return Err(ApexError::InvalidFooter(format!(
                "bad footer magic {magic:02x?}"
            )));
        }

        let version_major = reader.read_u32::<BigEndian>()?;
        let version_minor = reader.read_u32::<BigEndian>()?;
        if version_major != FOOTER_VERSION_MAJOR {
            return Err(ApexError::InvalidFooter(format!(
                "unsupported footer version {version_major}.{version_minor}"
            )));
        }

        let original_image_size = reader.read_u64::<BigEndian>()?;
        let vbmeta_offset = reader.read_u64::<BigEndian>()?;
        let vbmeta_size = reader.read_u64::<BigEndian>()?;
        // The remaining 28 bytes are reserved.

        Ok(Self {
            version_major,
            version_minor,
            original_image_size,
            vbmeta_offset,
            vbmeta_size,
        })
    }

    /// Check that the vbmeta range lies inside an image of `image_size` bytes,
    /// before the footer.
    ///
    /// # Errors
    ///
    /// Returns [`ApexError::InvalidFooter`] if any declared length does not
    /// fit.
    pub fn validate_against(&self, image_size: u64) -> Result<()> {
        if self.vbmeta_size > MAX_VBMETA_SIZE {
            return Err(ApexError::InvalidFooter(format!(
                "vbmeta size {} exceeds {MAX_VBMETA_SIZE}",
                self.vbmeta_size
            )));
        }

        let footer_start = image_size.saturating_sub(Self::SIZE as u64);
        let end = self.vbmeta_offset.checked_add(self.vbmeta_size);
        if end.is_none_or(|end| end > footer_start) {
            return Err(ApexError::InvalidFooter(format!(
                "vbmeta at {}+{} overlaps the footer of a {image_size} byte image",
                self.vbmeta_offset, self.vbmeta_size
            )));
        }

        if self.original_image_size > self.vbmeta_offset {
            return Err(ApexError::InvalidFooter(format!(
                "original image size {} overlaps vbmeta at {}",
                self.original_image_size, self.vbmeta_offset
            )));
        }

        Ok(())
    }
}
