//! APEX manifest decoding.
//!
//! The manifest is a protobuf record stored as `apex_manifest.pb`. Only the
//! name and version are required; unknown fields are skipped so newer
//! manifests still decode.

use prost::Message;

use crate::error::{ApexError, Result};

/// Wire representation of `apex_manifest.pb`.
///
/// `name` and `version` are `optional` so that an absent field can be told
/// apart from an empty or zero one.
#[derive(Clone, PartialEq, Message)]
pub struct ManifestProto {
    /// Package name.
    #[prost(string, optional, tag = "1")]
    pub name: Option<String>,
    /// Package version.
    #[prost(int64, optional, tag = "2")]
    pub version: Option<i64>,
    /// Pre-install hook binary.
    #[prost(string, tag = "3")]
    pub pre_install_hook: String,
    /// Post-install hook binary.
    #[prost(string, tag = "4")]
    pub post_install_hook: String,
    /// Human-readable version.
    #[prost(string, tag = "5")]
    pub version_name: String,
    /// Whether the package contains no executable code.
    #[prost(bool, tag = "6")]
    pub no_code: bool,
    /// Native libraries exported to other packages.
    #[prost(string, repeated, tag = "7")]
    pub provide_native_libs: Vec<String>,
    /// Native libraries imported from other packages.
    #[prost(string, repeated, tag = "8")]
    pub require_native_libs: Vec<String>,
    /// JNI libraries.
    #[prost(string, repeated, tag = "9")]
    pub jni_libs: Vec<String>,
    /// Shared libraries required from other packages.
    #[prost(string, repeated, tag = "10")]
    pub require_shared_apex_libs: Vec<String>,
    /// Whether this package provides shared libraries.
    #[prost(bool, tag = "11")]
    pub provide_shared_apex_libs: bool,
}

/// Decoded and validated package manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApexManifest {
    name: String,
    version: u64,
    /// Human-readable version, empty if unset.
    pub version_name: String,
    /// Pre-install hook binary, empty if unset.
    pub pre_install_hook: String,
    /// Post-install hook binary, empty if unset.
    pub post_install_hook: String,
    /// Whether the package contains no executable code.
    pub no_code: bool,
    /// Native libraries exported to other packages.
    pub provide_native_libs: Vec<String>,
    /// Native libraries imported from other packages.
    pub require_native_libs: Vec<String>,
    /// JNI libraries.
    pub jni_libs: Vec<String>,
    /// Shared libraries required from other packages.
    pub require_shared_apex_libs: Vec<String>,
    /// Whether this package provides shared libraries.
    pub provide_shared_apex_libs: bool,
}

impl ApexManifest {
    /// Create a manifest with only the required fields set.
    pub fn new(name: impl Into<String>, version: u64) -> Self {
        Self {
            name: name.into(),
            version,
            version_name: String::new(),
            pre_install_hook: String::new(),
            post_install_hook: String::new(),
            no_code: false,
            provide_native_libs: Vec::new(),
            require_native_libs: Vec::new(),
            jni_libs: Vec::new(),
            require_shared_apex_libs: Vec::new(),
            provide_shared_apex_libs: false,
        }
    }

    /// Decode a manifest from protobuf bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ApexError::MalformedManifest`] if the bytes are not a valid
    /// record, or if `name` is missing or empty, or `version` is missing or
    /// negative.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let proto = ManifestProto::decode(bytes)
            .map_err(|e| ApexError::MalformedManifest(e.to_string()))?;

        let name = match proto.name {
            Some(name) if !name.is_empty() => name,
            Some(_) => return Err(ApexError::MalformedManifest("name is empty".to_string())),
            None => return Err(ApexError::MalformedManifest("name is missing".to_string())),
        };
        let version = proto
            .version
            .ok_or_else(|| ApexError::MalformedManifest("version is missing".to_string()))?;
        let version = u64::try_from(version)
            .map_err(|_| ApexError::MalformedManifest(format!("version {version} is negative")))?;

        Ok(Self {
            name,
            version,
            version_name: proto.version_name,
            pre_install_hook: proto.pre_install_hook,
            post_install_hook: proto.post_install_hook,
            no_code: proto.no_code,
            provide_native_libs: proto.provide_native_libs,
            require_native_libs: proto.require_native_libs,
            jni_libs: proto.jni_libs,
            require_shared_apex_libs: proto.require_shared_apex_libs,
            provide_shared_apex_libs: proto.provide_shared_apex_libs,
        })
    }

    /// Encode back to protobuf.
    pub fn encode_to_vec(&self) -> Vec<u8> {
        ManifestProto {
            name: Some(self.name.clone()),
            version: Some(self.version as i64),
            pre_install_hook: self.pre_install_hook.clone(),
            post_install_hook: self.post_install_hook.clone(),
            version_name: self.version_name.clone(),
            no_code: self.no_code,
            provide_native_libs: self.provide_native_libs.clone(),
            require_native_libs: self.require_native_libs.clone(),
            jni_libs: self.jni_libs.clone(),
            require_shared_apex_libs: self.require_shared_apex_libs.clone(),
            provide_shared_apex_libs: self.provide_shared_apex_libs,
        }
        .encode_to_vec()
    }

    /// Package name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Package version.
    pub fn version(&self) -> u64 {
        self.version
    }
}
