//! OCI Content Digest validation and computation.
//!
//! This module provides a wrapper around the `oci_spec::image::Digest` type
//! to integrate with Dockhand's error handling. Digests are both the content
//! address of a blob and the key used to name cache entries and archive
//! directories.

use crate::error::{DockhandError, Result};
use oci_spec::image::Digest as OciDigest;
use sha2::{Digest as Sha2Digest, Sha256};
use std::fmt;
use std::str::FromStr;


/// Represents a content digest, wrapping the `oci_spec::image::Digest` type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Digest(OciDigest);

impl FromStr for Digest {
    type Err = DockhandError;

    fn from_str(s: &str) -> Result<Self> {
        let oci_digest = OciDigest::from_str(s).map_err(|e| DockhandError::Validation {
            message: format!("Invalid digest format: {}", e),
            source: Some(Box::new(e)),
        })?;
        Ok(Digest(oci_digest))
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<OciDigest> for Digest {
    fn from(digest: OciDigest) -> Self {
        Digest(digest)
    }
}

impl From<&OciDigest> for Digest {
    fn from(digest: &OciDigest) -> Self {
        Digest(digest.clone())
    }
}

impl Digest {
    /// Computes the `sha256` digest of `content`.
    ///
    /// # Examples
    ///
    /// ```
    /// use libdockhand::Digest;
    ///
    /// let digest = Digest::sha256(b"");
    /// assert_eq!(
    ///     digest.to_string(),
    ///     "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
    /// );
    /// ```
    pub fn sha256(content: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content);
        Self::from_hasher(hasher)
    }

    /// Finishes an incremental `sha256` computation.
    pub(crate) fn from_hasher(hasher: Sha256) -> Self {
        let hex = format!("{:x}", hasher.finalize());
        // A sha256 hex string is always a valid digest
        let oci_digest = OciDigest::from_str(&format!("sha256:{}", hex))
            .unwrap_or_else(|_| unreachable!("sha256 output is a valid digest"));
        Digest(oci_digest)
    }

    /// Returns the algorithm part (e.g. `sha256`).
    pub fn algorithm(&self) -> &str {
        self.0.algorithm().as_ref()
    }

    /// Returns the hex-encoded hash part.
    pub fn hex(&self) -> &str {
        self.0.digest()
    }

    /// Returns true if `content` hashes to this digest.
    ///
    /// Only `sha256` is supported; other algorithms never verify.
    pub fn verify(&self, content: &[u8]) -> bool {
        self.algorithm() == "sha256" && Self::sha256(content) == *self
    }
}
