//! Zip container access for APEX packages.
//!
//! The payload image is consumed in place by the loop-device layer, so the
//! reader enforces that the payload entry is stored (no compression) and
//! starts on a page boundary before handing out its byte range.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use zip::result::ZipError;
use zip::{CompressionMethod, ZipArchive};

use crate::avb::ImageSource;
use crate::error::{ApexError, Result};

/// Alignment required of the payload entry's data offset.
pub const PAGE_SIZE: u64 = 4096;

/// Name of the filesystem image entry.
pub const PAYLOAD_ENTRY: &str = "apex_payload.img";

/// Name of the protobuf manifest entry.
pub const MANIFEST_ENTRY: &str = "apex_manifest.pb";

/// Upper bound on the decompressed size of small metadata entries.
pub const MAX_MANIFEST_SIZE: u64 = 1024 * 1024;

/// Location of an entry's data inside the container file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryLocation {
    /// Entry name as stored in the central directory.
    pub name: String,
    /// Absolute file offset of the first data byte.
    pub offset: u64,
    /// Length of the entry as stored in the file.
    pub compressed_size: u64,
    /// Length of the entry after decompression.
    pub uncompressed_size: u64,
    /// Whether the entry uses the `Stored` method.
    pub stored: bool,
}

/// Validated byte range of the payload image within the container file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageRegion {
    /// Page-aligned absolute offset of the image.
    pub offset: u64,
    /// Image length in bytes.
    pub size: u64,
}

/// Reader over an opened package archive.
#[derive(Debug)]
pub struct ContainerReader {
    path: PathBuf,
    file: File,
    file_len: u64,
    archive: ZipArchive<File>,
}

impl ContainerReader {
    /// Open `path` and parse its zip central directory.
    ///
    /// # Errors
    ///
    /// Returns [`ApexError::OpenFailure`] if the file cannot be opened or is
    /// not a zip archive.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| ApexError::open_failure(path, e))?;
        let file_len = file
            .metadata()
            .map_err(|e| ApexError::open_failure(path, e))?
            .len();
        let archive_file = file
            .try_clone()
            .map_err(|e| ApexError::open_failure(path, e))?;
        let archive = ZipArchive::new(archive_file).map_err(|e| ApexError::open_failure(path, e))?;

        tracing::debug!("Opened {} ({} entries)", path.display(), archive.len());

        Ok(Self {
            path: path.to_path_buf(),
            file,
            file_len,
            archive,
        })
    }

    /// Path the container was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Locate `name` by exact match.
    ///
    /// # Errors
    ///
    /// Returns [`ApexError::EntryNotFound`] if the archive has no such entry,
    /// or [`ApexError::InvalidLayout`] if its local header cannot be read.
    pub fn find_entry(&mut self, name: &str) -> Result<EntryLocation> {
        let entry = self.archive.by_name(name).map_err(|e| entry_error(name, e))?;

        let location = EntryLocation {
            name: entry.name().to_string(),
            offset: entry.data_start(),
            compressed_size: entry.compressed_size(),
            uncompressed_size: entry.size(),
            stored: entry.compression() == CompressionMethod::Stored,
        };
        tracing::debug!(
            "Entry {name}: offset={} size={} stored={}",
            location.offset,
            location.uncompressed_size,
            location.stored
        );

        Ok(location)
    }

    /// Locate the payload image and check that it can be mapped in place.
    ///
    /// # Errors
    ///
    /// Returns [`ApexError::EntryNotFound`] if the entry is absent and
    /// [`ApexError::InvalidLayout`] if it is compressed, not page aligned, or
    /// extends past the end of the file.
    pub fn find_payload(&mut self, name: &str) -> Result<ImageRegion> {
        let entry = self.find_entry(name)?;
        payload_region(&entry, self.file_len)
    }

    /// Read and decompress a small metadata entry.
    ///
    /// # Errors
    ///
    /// Returns [`ApexError::EntryNotFound`] if the entry is absent,
    /// [`ApexError::MalformedManifest`] if it exceeds [`MAX_MANIFEST_SIZE`],
    /// and [`ApexError::Io`] if decompression fails.
    pub fn read_entry(&mut self, name: &str) -> Result<Vec<u8>> {
        let entry = self.archive.by_name(name).map_err(|e| entry_error(name, e))?;
        if entry.size() > MAX_MANIFEST_SIZE {
            return Err(ApexError::MalformedManifest(format!(
                "{name} is {} bytes, limit is {MAX_MANIFEST_SIZE}",
                entry.size()
            )));
        }

        let mut data = Vec::with_capacity(entry.size() as usize);
        entry.take(MAX_MANIFEST_SIZE).read_to_end(&mut data)?;
        Ok(data)
    }

    /// Give up the archive index, keeping only the file for region reads.
    pub fn into_file(self) -> File {
        self.file
    }
}

/// Check that `entry` is stored, page aligned and inside a file of
/// `file_len` bytes.
fn payload_region(entry: &EntryLocation, file_len: u64) -> Result<ImageRegion> {
    let name = &entry.name;
    if !entry.stored || entry.compressed_size != entry.uncompressed_size {
        return Err(ApexError::InvalidLayout(format!(
            "{name} is compressed (stored {} bytes, uncompressed {} bytes)",
            entry.compressed_size, entry.uncompressed_size
        )));
    }
    if entry.offset % PAGE_SIZE != 0 {
        return Err(ApexError::InvalidLayout(format!(
            "{name} starts at offset {} which is not aligned to {PAGE_SIZE}",
            entry.offset
        )));
    }
    let end = entry.offset.checked_add(entry.uncompressed_size);
    if end.is_none_or(|end| end > file_len) {
        return Err(ApexError::InvalidLayout(format!(
            "{name} extends past the end of the file ({file_len} bytes)"
        )));
    }

    Ok(ImageRegion {
        offset: entry.offset,
        size: entry.uncompressed_size,
    })
}

fn entry_error(name: &str, err: ZipError) -> ApexError {
    match err {
        ZipError::FileNotFound => ApexError::EntryNotFound(name.to_string()),
        ZipError::Io(e) => ApexError::Io(e),
        other => ApexError::InvalidLayout(format!("{name}: {other}")),
    }
}

/// Positioned, bounds-checked reads of the payload image.
#[derive(Debug, Clone, Copy)]
pub struct PayloadReader<'a> {
    file: &'a File,
    region: ImageRegion,
}

impl<'a> PayloadReader<'a> {
    /// Create a reader over `region` of `file`.
    pub fn new(file: &'a File, region: ImageRegion) -> Self {
        Self { file, region }
    }
}

impl ImageSource for PayloadReader<'_> {
    fn image_size(&self) -> u64 {
        self.region.size
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let end = offset.checked_add(buf.len() as u64);
        if end.is_none_or(|end| end > self.region.size) {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "read of {} bytes at {offset} exceeds image size {}",
                    buf.len(),
                    self.region.size
                ),
            ));
        }
        read_exact_at(self.file, buf, self.region.offset + offset)
    }
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(not(unix))]
fn read_exact_at(mut file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    use std::io::{Seek, SeekFrom};
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(buf)
}
