//! OCI and Docker distribution data structures.
//!
//! Manifests and indexes are parsed with the `oci-spec` types, which also
//! accept the Docker schema-2 media types. This module adds the media-type
//! table used for content negotiation, a [`Platform`] selector and the
//! schema-2 manifest shape written when publishing an image.

pub use oci_spec::image::{Descriptor, ImageConfiguration, ImageIndex, ImageManifest};

use crate::digest::Digest;
use crate::error::{DockhandError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;


/// Docker image manifest, schema 1.
pub const MEDIA_TYPE_MANIFEST_V1: &str = "application/vnd.docker.distribution.manifest.v1+json";
/// Docker image manifest, schema 2.
pub const MEDIA_TYPE_MANIFEST_V2: &str = "application/vnd.docker.distribution.manifest.v2+json";
/// Docker manifest list ("fat" manifest).
pub const MEDIA_TYPE_MANIFEST_LIST: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";
/// OCI image manifest.
pub const MEDIA_TYPE_OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
/// OCI image index.
pub const MEDIA_TYPE_OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
/// Docker container configuration blob.
pub const MEDIA_TYPE_CONTAINER_CONFIG: &str = "application/vnd.docker.container.image.v1+json";
/// Docker gzip-compressed filesystem layer.
pub const MEDIA_TYPE_LAYER: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";

/// Returns the `Accept` header for a manifest request.
///
/// Schema 1 and schema 2 are always accepted; manifest lists and OCI
/// manifests/indexes only when `fat` is set.
///
/// # Examples
///
/// ```
/// use libdockhand::oci::{accept_header, MEDIA_TYPE_MANIFEST_LIST};
///
/// assert!(!accept_header(false).contains(MEDIA_TYPE_MANIFEST_LIST));
/// assert!(accept_header(true).contains(MEDIA_TYPE_MANIFEST_LIST));
/// ```
pub fn accept_header(fat: bool) -> String {
    let mut types = vec![MEDIA_TYPE_MANIFEST_V1, MEDIA_TYPE_MANIFEST_V2];
    if fat {
        types.extend([
            MEDIA_TYPE_MANIFEST_LIST,
            MEDIA_TYPE_OCI_MANIFEST,
            MEDIA_TYPE_OCI_INDEX,
        ]);
    }
    types.join(", ")
}

/// A platform selector: `os/architecture[/variant]`.
///
/// # Examples
///
/// ```
/// use libdockhand::Platform;
///
/// let platform: Platform = "linux/arm/v7".parse().unwrap();
/// assert_eq!(platform.os, "linux");
/// assert_eq!(platform.architecture, "arm");
/// assert_eq!(platform.variant.as_deref(), Some("v7"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Platform {
    /// Operating system (e.g. `linux`)
    pub os: String,
    /// CPU architecture (e.g. `amd64`)
    pub architecture: String,
    /// Architecture variant (e.g. `v8`)
    pub variant: Option<String>,
}

impl Platform {
    /// Creates a platform without a variant.
    pub fn new(os: impl Into<String>, architecture: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            architecture: architecture.into(),
            variant: None,
        }
    }

    /// Sets the architecture variant.
    pub fn with_variant(mut self, variant: impl Into<String>) -> Self {
        self.variant = Some(variant.into());
        self
    }

    /// Returns true if an index entry's platform satisfies this selector.
    ///
    /// OS and architecture must be equal; the variant is compared only when
    /// this selector names one.
    pub fn matches(&self, candidate: &oci_spec::image::Platform) -> bool {
        if candidate.os().to_string() != self.os
            || candidate.architecture().to_string() != self.architecture
        {
            return false;
        }
        match &self.variant {
            Some(variant) => candidate.variant().as_deref() == Some(variant.as_str()),
            None => true,
        }
    }
}

impl FromStr for Platform {
    type Err = DockhandError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('/').collect();
        match parts.as_slice() {
            [os, arch] if !os.is_empty() && !arch.is_empty() => Ok(Self::new(*os, *arch)),
            [os, arch, variant] if !os.is_empty() && !arch.is_empty() && !variant.is_empty() => {
                Ok(Self::new(*os, *arch).with_variant(*variant))
            }
            _ => Err(DockhandError::validation(format!(
                "Invalid platform '{}', expected os/architecture[/variant]",
                s
            ))),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.architecture)?;
        if let Some(variant) = &self.variant {
            write!(f, "/{}", variant)?;
        }
        Ok(())
    }
}

/// Represents either a single-platform image manifest or a multi-platform image index.
///
/// Registries answer a "fat" manifest request with either, depending on
/// whether the tag is multi-architecture.
#[derive(Debug, Clone)]
#[allow(clippy::large_enum_variant)]
pub enum ManifestOrIndex {
    /// A single-platform image manifest
    Manifest(ImageManifest),
    /// A multi-platform image index (or Docker manifest list)
    Index(ImageIndex),
}

impl ManifestOrIndex {
    /// Parses manifest bytes, detecting whether they hold a manifest or an index.
    ///
    /// The `mediaType` field decides; without one, the presence of a
    /// `manifests` array marks an index.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_slice(bytes).map_err(|e| {
            DockhandError::validation_with_source("Failed to parse manifest JSON", e)
        })?;

        let media_type = value
            .get("mediaType")
            .and_then(|v| v.as_str())
            .unwrap_or("");

        if value.get("schemaVersion").and_then(|v| v.as_u64()) == Some(1)
            || media_type == MEDIA_TYPE_MANIFEST_V1
        {
            return Err(DockhandError::validation(
                "Schema 1 manifests carry no config or layer descriptors",
            ));
        }

        let is_index = if media_type.is_empty() {
            value.get("manifests").is_some()
        } else {
            media_type.contains("index") || media_type.contains("list")
        };

        if is_index {
            let index: ImageIndex = serde_json::from_value(value).map_err(|e| {
                DockhandError::validation_with_source("Failed to parse image index", e)
            })?;
            Ok(ManifestOrIndex::Index(index))
        } else if value.get("layers").is_some() || value.get("config").is_some() {
            let manifest: ImageManifest = serde_json::from_value(value).map_err(|e| {
                DockhandError::validation_with_source("Failed to parse image manifest", e)
            })?;
            Ok(ManifestOrIndex::Manifest(manifest))
        } else {
            Err(DockhandError::validation(
                "Unable to determine if content is a manifest or index",
            ))
        }
    }

    /// Returns true if this is a multi-platform index.
    pub fn is_index(&self) -> bool {
        matches!(self, ManifestOrIndex::Index(_))
    }

    /// Consumes self and returns the manifest if this is a single-platform image.
    pub fn into_manifest(self) -> Option<ImageManifest> {
        match self {
            ManifestOrIndex::Manifest(m) => Some(m),
            ManifestOrIndex::Index(_) => None,
        }
    }

    /// Finds the first index entry matching `platform`, scanning in index order.
    pub fn find_platform(&self, platform: &Platform) -> Option<&Descriptor> {
        match self {
            ManifestOrIndex::Manifest(_) => None,
            ManifestOrIndex::Index(index) => index.manifests().iter().find(|desc| {
                desc.platform()
                    .as_ref()
                    .is_some_and(|candidate| platform.matches(candidate))
            }),
        }
    }
}

/// A blob reference inside a schema-2 manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobReference {
    /// Media type of the referenced blob
    pub media_type: String,
    /// Size in bytes
    pub size: u64,
    /// Content digest
    pub digest: String,
}

impl BlobReference {
    /// Creates a blob reference.
    pub fn new(media_type: impl Into<String>, size: u64, digest: &Digest) -> Self {
        Self {
            media_type: media_type.into(),
            size,
            digest: digest.to_string(),
        }
    }
}

/// A Docker schema-2 image manifest as written when publishing.
///
/// # Examples
///
/// ```
/// use libdockhand::oci::{BlobReference, SchemaTwoManifest, MEDIA_TYPE_CONTAINER_CONFIG};
/// use libdockhand::Digest;
///
/// let config = BlobReference::new(MEDIA_TYPE_CONTAINER_CONFIG, 2, &Digest::sha256(b"{}"));
/// let manifest = SchemaTwoManifest::new(config, vec![]);
/// let json = manifest.to_json().unwrap();
/// assert!(json.contains("\"schemaVersion\":2"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaTwoManifest {
    /// Always 2
    pub schema_version: u32,
    /// Always the Docker schema-2 manifest media type
    pub media_type: String,
    /// The image configuration blob
    pub config: BlobReference,
    /// Layer blobs, bottom-most first
    pub layers: Vec<BlobReference>,
}

impl SchemaTwoManifest {
    /// Creates a manifest from a config and ordered layers.
    pub fn new(config: BlobReference, layers: Vec<BlobReference>) -> Self {
        Self {
            schema_version: 2,
            media_type: MEDIA_TYPE_MANIFEST_V2.to_string(),
            config,
            layers,
        }
    }

    /// Serializes the manifest to compact JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| DockhandError::validation_with_source("Failed to serialize manifest", e))
    }
}
