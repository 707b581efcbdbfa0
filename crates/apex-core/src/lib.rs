//! apex-core - APEX package parsing and verification
//!
//! An APEX package is a zip archive holding a protobuf manifest
//! (`apex_manifest.pb`) and a filesystem image (`apex_payload.img`) that is
//! stored uncompressed on a page boundary so it can be mounted in place. The
//! image ends with an Android Verified Boot footer whose signed vbmeta
//! describes the dm-verity hash tree.
//!
//! # Example
//!
//! ```no_run
//! use apex_core::{ApexFile, KeyPolicy, config::VerifierConfig};
//! use std::path::Path;
//!
//! let config = VerifierConfig::load(Path::new("/etc/apex/verifier.toml"))?;
//! let apex = ApexFile::open("/system/apex/com.android.foo.apex")?;
//! let verity = apex.verify_apex_verity(&config.trust_store(), KeyPolicy::RequireInstalledKey)?;
//! println!("{} root digest {}", apex.manifest().name(), verity.root_digest);
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod apex_file;
pub mod avb;
pub mod config;
pub mod container;
pub mod error;
pub mod keys;
pub mod manifest;

pub use apex_file::{ApexFile, find_apex_files};
pub use avb::ApexVerityData;
pub use error::{ApexError, Result};
pub use keys::{KeyDirectories, KeyPolicy, KeySource, ResolvedKey, StaticTrustStore, TrustStore};
pub use manifest::ApexManifest;
