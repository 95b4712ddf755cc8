//! Manifest resolution and publication.
//!
//! Manifests are negotiated through the `Accept` header: a plain request
//! admits schema 1 and 2, a "fat" request also admits manifest lists and
//! OCI indexes. Multi-architecture tags are resolved to one platform by
//! scanning the list and fetching the matching manifest by digest.

use crate::client::RawResponse;
use crate::digest::Digest;
use crate::error::{DockhandError, Result};
use crate::oci::{
    ImageManifest, MEDIA_TYPE_MANIFEST_V2, ManifestOrIndex, Platform, SchemaTwoManifest,
    accept_header,
};
use crate::registry::Registry;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, CONTENT_TYPE};


/// Header carrying the registry-computed manifest digest.
pub const CONTENT_DIGEST_HEADER: &str = "docker-content-digest";

/// Platform assumed when a plain manifest request is answered with an index.
const DEFAULT_OS: &str = "linux";
const DEFAULT_ARCHITECTURE: &str = "amd64";

impl Registry {
    /// Fetches the manifest of the session's tag.
    ///
    /// With `fat`, manifest lists and OCI indexes are accepted. The response
    /// is memoised per `fat` flag for the lifetime of the session.
    ///
    /// # Errors
    ///
    /// Returns a not-found error for unknown tags and an authentication error
    /// if the registry keeps answering `401`.
    pub async fn get_manifest(&self, fat: bool) -> Result<RawResponse> {
        self.manifests
            .get_or_try_init(fat, || async move {
                let url = self.reference().manifest_url();
                self.fetch_manifest(&url, fat, self.reference().tag()).await
            })
            .await
    }

    async fn fetch_manifest(&self, url: &str, fat: bool, name: &str) -> Result<RawResponse> {
        let accept = accept_header(fat);
        let response = self
            .send(|http| http.get(url).header(ACCEPT, accept.as_str()), false)
            .await?;

        if response.status == StatusCode::NOT_FOUND {
            return Err(DockhandError::not_found(
                "manifest".to_string(),
                format!("{}@{}", self.reference().repository(), name),
            ));
        }
        tracing::debug!(%url, fat, "fetched manifest");
        response.error_for_status(url)
    }

    /// Resolves the single-platform manifest for `platform`.
    ///
    /// Without a platform the plain manifest is fetched. With one, the fat
    /// manifest is scanned in order for the first matching entry and that
    /// entry's manifest is fetched by digest. Memoised per platform.
    ///
    /// # Errors
    ///
    /// Returns [`DockhandError::PlatformNotFound`] when no entry matches.
    pub async fn resolve_for_platform(&self, platform: Option<&Platform>) -> Result<ImageManifest> {
        let key = platform.cloned();
        self.resolved
            .get_or_try_init(key, || async move {
                match platform {
                    None => {
                        let response = self.get_manifest(false).await?;
                        match ManifestOrIndex::from_bytes(&response.data)? {
                            ManifestOrIndex::Manifest(manifest) => Ok(manifest),
                            index @ ManifestOrIndex::Index(_) => {
                                let fallback = Platform::new(DEFAULT_OS, DEFAULT_ARCHITECTURE);
                                tracing::debug!(
                                    reference = %self.reference(),
                                    platform = %fallback,
                                    "registry returned an index for a plain manifest request"
                                );
                                self.fetch_platform_manifest(&index, &fallback).await
                            }
                        }
                    }
                    Some(platform) => {
                        let response = self.get_manifest(true).await?;
                        match ManifestOrIndex::from_bytes(&response.data)? {
                            index @ ManifestOrIndex::Index(_) => {
                                self.fetch_platform_manifest(&index, platform).await
                            }
                            ManifestOrIndex::Manifest(_) => Err(DockhandError::platform_not_found(
                                platform.to_string(),
                                format!("{} (single-platform image)", self.reference()),
                            )),
                        }
                    }
                }
            })
            .await
    }

    async fn fetch_platform_manifest(
        &self,
        index: &ManifestOrIndex,
        platform: &Platform,
    ) -> Result<ImageManifest> {
        let entry = index.find_platform(platform).ok_or_else(|| {
            DockhandError::platform_not_found(platform.to_string(), self.reference().to_string())
        })?;
        let digest = entry.digest().to_string();

        let url = self.reference().manifest_url_for(&digest);
        let response = self.fetch_manifest(&url, true, &digest).await?;
        ManifestOrIndex::from_bytes(&response.data)?
            .into_manifest()
            .ok_or_else(|| {
                DockhandError::validation(format!(
                    "Manifest {} for platform {} is itself an index",
                    digest, platform
                ))
            })
    }

    /// Fetches the image configuration blob for `platform`. Memoised per platform.
    pub async fn get_config(&self, platform: Option<&Platform>) -> Result<Vec<u8>> {
        self.configs
            .get_or_try_init(platform.cloned(), || async move {
                let manifest = self.resolve_for_platform(platform).await?;
                let digest = Digest::from(manifest.config().digest());
                self.pull_blob(&digest, true).await
            })
            .await
    }

    /// Returns the layer digests for `platform`, in manifest order.
    ///
    /// The order is the stacking order of the filesystem diffs; duplicates
    /// are kept.
    pub async fn get_layer_digests(&self, platform: Option<&Platform>) -> Result<Vec<Digest>> {
        let manifest = self.resolve_for_platform(platform).await?;
        Ok(manifest
            .layers()
            .iter()
            .map(|layer| Digest::from(layer.digest()))
            .collect())
    }

    /// Publishes a schema-2 manifest under the session's tag.
    ///
    /// Returns the digest reported in the `Docker-Content-Digest` header,
    /// or the digest of the uploaded bytes when the registry sends none.
    ///
    /// # Errors
    ///
    /// Returns [`DockhandError::UploadFailed`] on a non-success status.
    pub async fn push_manifest(&self, manifest: &SchemaTwoManifest) -> Result<Digest> {
        let body = manifest.to_json()?;
        let local_digest = Digest::sha256(body.as_bytes());
        let url = self.reference().manifest_url();

        let response = self
            .send(
                |http| {
                    http.put(&url)
                        .header(CONTENT_TYPE, MEDIA_TYPE_MANIFEST_V2)
                        .body(body.clone())
                },
                true,
            )
            .await?;

        if !response.status.is_success() {
            return Err(DockhandError::upload_failed(
                local_digest.to_string(),
                response.status.as_u16(),
                response.text(),
            ));
        }

        let digest = match response.header(CONTENT_DIGEST_HEADER) {
            Some(value) => value.parse()?,
            None => local_digest,
        };
        tracing::info!(reference = %self.reference(), %digest, "published manifest");
        Ok(digest)
    }
}
