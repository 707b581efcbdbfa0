//! Test package builder.
//!
//! Builds payload images with a real AVB footer and vbmeta signed by the keys
//! in `tests/testdata`, and wraps them in a zip laid out like a device package.

#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use apex_core::ApexManifest;
use rsa::pkcs8::DecodePrivateKey;
use rsa::{Pkcs1v15Sign, RsaPrivateKey};
use sha2::{Digest, Sha256};
use zip::CompressionMethod;
use zip::write::SimpleFileOptions;

pub const PACKAGE_NAME: &str = "com.android.apex.test_package";
pub const SALT_HEX: &str = "368a22e64858647bc45498e92f749f85482ac46850ca7ec8071f49dfa47a243c";
pub const ROOT_DIGEST_HEX: &str = "705d8ec15be38fe416ed75045056434132758008";

pub const TEST_PUBKEY: &[u8] = include_bytes!("../testdata/com.android.apex.test_package.avbpubkey");
pub const OTHER_PUBKEY: &[u8] = include_bytes!("../testdata/other_key.avbpubkey");
const TEST_KEY_PEM: &str = include_str!("../testdata/test_key.pem");
const OTHER_KEY_PEM: &str = include_str!("../testdata/other_key.pem");

const BLOCK_SIZE: usize = 4096;
const DATA_BLOCKS: usize = 2;
const SHA256_RSA2048: u32 = 1;

/// Key used to sign the vbmeta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signer {
    Test,
    Other,
    Unsigned,
}

/// Knobs for [`PayloadBuilder::build`].
#[derive(Debug, Clone)]
pub struct PayloadBuilder {
    pub signer: Signer,
    pub hashtree: bool,
    pub tamper_signature: bool,
    /// Flip a salt byte after the vbmeta has been signed.
    pub tamper_salt: bool,
    /// Override the hashed data size declared by the hash-tree descriptor.
    pub descriptor_image_size: Option<u64>,
    /// Override the hash-tree offset declared by the hash-tree descriptor.
    pub descriptor_tree_offset: Option<u64>,
    pub footer_magic: [u8; 4],
    pub vbmeta_size: Option<u64>,
}

impl Default for PayloadBuilder {
    fn default() -> Self {
        Self {
            signer: Signer::Test,
            hashtree: true,
            tamper_signature: false,
            tamper_salt: false,
            descriptor_image_size: None,
            descriptor_tree_offset: None,
            footer_magic: *b"AVBf",
            vbmeta_size: None,
        }
    }
}

impl PayloadBuilder {
    /// Data blocks, a placeholder hash tree, the vbmeta, then the footer.
    pub fn build(&self) -> Vec<u8> {
        let data_size = DATA_BLOCKS * BLOCK_SIZE;
        let mut image: Vec<u8> = (0..data_size).map(|i| (i % 251) as u8).collect();
        image.extend(std::iter::repeat_n(0x5a, BLOCK_SIZE));

        let vbmeta = self.vbmeta(data_size as u64);
        let vbmeta_offset = image.len() as u64;
        image.extend_from_slice(&vbmeta);
        image.resize(image.len().next_multiple_of(BLOCK_SIZE) + BLOCK_SIZE, 0);

        let mut footer = [0u8; 64];
        footer[0..4].copy_from_slice(&self.footer_magic);
        footer[4..8].copy_from_slice(&1u32.to_be_bytes());
        footer[8..12].copy_from_slice(&0u32.to_be_bytes());
        footer[12..20].copy_from_slice(&(data_size as u64).to_be_bytes());
        footer[20..28].copy_from_slice(&vbmeta_offset.to_be_bytes());
        footer[28..36]
            .copy_from_slice(&self.vbmeta_size.unwrap_or(vbmeta.len() as u64).to_be_bytes());
        let footer_start = image.len() - footer.len();
        image[footer_start..].copy_from_slice(&footer);
        image
    }

    fn vbmeta(&self, data_size: u64) -> Vec<u8> {
        let (private_key, public_key) = match self.signer {
            Signer::Test => (Some(TEST_KEY_PEM), TEST_PUBKEY),
            Signer::Other => (Some(OTHER_KEY_PEM), OTHER_PUBKEY),
            Signer::Unsigned => (None, &[][..]),
        };

        let mut descriptors = Vec::new();
        if self.hashtree {
            descriptors.extend(hashtree_descriptor(
                self.descriptor_image_size.unwrap_or(data_size),
                self.descriptor_tree_offset.unwrap_or(data_size),
            ));
        }

        let mut aux = descriptors.clone();
        let public_key_offset = aux.len() as u64;
        aux.extend_from_slice(public_key);
        let metadata_offset = aux.len() as u64;
        aux.resize(aux.len().next_multiple_of(64), 0);

        let (algorithm, hash_size, signature_size) = if private_key.is_some() {
            (SHA256_RSA2048, 32u64, 256u64)
        } else {
            (0, 0, 0)
        };
        let auth_size = (hash_size + signature_size).next_multiple_of(64);

        let mut header = vec![0u8; 256];
        header[0..4].copy_from_slice(b"AVB0");
        header[4..8].copy_from_slice(&1u32.to_be_bytes());
        header[8..12].copy_from_slice(&0u32.to_be_bytes());
        header[12..20].copy_from_slice(&auth_size.to_be_bytes());
        header[20..28].copy_from_slice(&(aux.len() as u64).to_be_bytes());
        header[28..32].copy_from_slice(&algorithm.to_be_bytes());
        let ranges = [
            (0, hash_size),
            (hash_size, signature_size),
            (public_key_offset, public_key.len() as u64),
            (metadata_offset, 0),
            (0, descriptors.len() as u64),
        ];
        for (i, (offset, size)) in ranges.into_iter().enumerate() {
            let at = 32 + i * 16;
            header[at..at + 8].copy_from_slice(&offset.to_be_bytes());
            header[at + 8..at + 16].copy_from_slice(&size.to_be_bytes());
        }
        header[128..141].copy_from_slice(b"avbtool 1.2.0");

        let mut auth = Vec::new();
        if let Some(pem) = private_key {
            let digest = Sha256::new()
                .chain_update(&header)
                .chain_update(&aux)
                .finalize()
                .to_vec();
            let key = RsaPrivateKey::from_pkcs8_pem(pem).expect("test key should parse");
            let mut signature = key
                .sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
                .expect("signing should succeed");
            if self.tamper_signature {
                signature[10] ^= 0xff;
            }
            auth.extend_from_slice(&digest);
            auth.extend_from_slice(&signature);
        }
        auth.resize(auth_size as usize, 0);

        if self.tamper_salt {
            aux[SALT_OFFSET_IN_AUX] ^= 0x01;
        }

        let mut vbmeta = header;
        vbmeta.extend_from_slice(&auth);
        vbmeta.extend_from_slice(&aux);
        vbmeta
    }
}

/// Descriptor header, fixed hash-tree fields, then the partition name.
const SALT_OFFSET_IN_AUX: usize = 16 + 164 + PACKAGE_NAME.len();

fn hashtree_descriptor(image_size: u64, tree_offset: u64) -> Vec<u8> {
    let salt = hex::decode(SALT_HEX).expect("valid hex");
    let digest = hex::decode(ROOT_DIGEST_HEX).expect("valid hex");

    let mut body = Vec::new();
    body.extend_from_slice(&1u32.to_be_bytes()); // dm-verity version
    body.extend_from_slice(&image_size.to_be_bytes());
    body.extend_from_slice(&tree_offset.to_be_bytes());
    body.extend_from_slice(&(BLOCK_SIZE as u64).to_be_bytes()); // tree size
    body.extend_from_slice(&(BLOCK_SIZE as u32).to_be_bytes()); // data block size
    body.extend_from_slice(&(BLOCK_SIZE as u32).to_be_bytes()); // hash block size
    body.extend_from_slice(&0u32.to_be_bytes()); // fec roots
    body.extend_from_slice(&0u64.to_be_bytes()); // fec offset
    body.extend_from_slice(&0u64.to_be_bytes()); // fec size
    let mut algorithm = [0u8; 32];
    algorithm[..4].copy_from_slice(b"sha1");
    body.extend_from_slice(&algorithm);
    body.extend_from_slice(&(PACKAGE_NAME.len() as u32).to_be_bytes());
    body.extend_from_slice(&(salt.len() as u32).to_be_bytes());
    body.extend_from_slice(&(digest.len() as u32).to_be_bytes());
    body.extend_from_slice(&0u32.to_be_bytes()); // flags
    body.extend_from_slice(&[0u8; 60]);
    body.extend_from_slice(PACKAGE_NAME.as_bytes());
    body.extend_from_slice(&salt);
    body.extend_from_slice(&digest);
    body.resize(body.len().next_multiple_of(8), 0);

    let mut descriptor = Vec::new();
    descriptor.extend_from_slice(&1u64.to_be_bytes());
    descriptor.extend_from_slice(&(body.len() as u64).to_be_bytes());
    descriptor.extend_from_slice(&body);
    descriptor
}

/// Knobs for [`ApexBuilder::write`].
#[derive(Debug, Clone)]
pub struct ApexBuilder {
    pub manifest: Option<Vec<u8>>,
    pub payload: Option<Vec<u8>>,
    pub compress_payload: bool,
    pub align_payload: bool,
}

impl Default for ApexBuilder {
    fn default() -> Self {
        Self {
            manifest: Some(ApexManifest::new(PACKAGE_NAME, 1).encode_to_vec()),
            payload: Some(PayloadBuilder::default().build()),
            compress_payload: false,
            align_payload: true,
        }
    }
}

impl ApexBuilder {
    pub fn with_payload(payload: PayloadBuilder) -> Self {
        Self {
            payload: Some(payload.build()),
            ..Self::default()
        }
    }

    /// Write `<dir>/<file_name>` and return its path.
    pub fn write(&self, dir: &Path, file_name: &str) -> PathBuf {
        let path = dir.join(file_name);
        let file = File::create(&path).expect("failed to create package");
        let mut zip = zip::ZipWriter::new(file);

        if let Some(manifest) = &self.manifest {
            let options =
                SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
            zip.start_file("apex_manifest.pb", options)
                .expect("failed to add manifest");
            zip.write_all(manifest).expect("failed to write manifest");
        }

        if let Some(payload) = &self.payload {
            let method = if self.compress_payload {
                CompressionMethod::Deflated
            } else {
                CompressionMethod::Stored
            };
            let mut options = SimpleFileOptions::default().compression_method(method);
            if self.align_payload {
                options = options.with_alignment(4096);
            }
            zip.start_file("apex_payload.img", options)
                .expect("failed to add payload");
            zip.write_all(payload).expect("failed to write payload");
        }

        zip.finish().expect("failed to finish package");
        path
    }
}
