//! Blob transfer: cache-first pulls and existence-checked pushes.
//!
//! Pulls consult the blob cache before the network and write fetched blobs
//! back to it once their digest has been verified. Pushes hash the content
//! first, skip the upload when the registry already has the blob, and
//! otherwise upload it monolithically (`POST` for a session, then one `PUT`).

use crate::client::status_error;
use crate::digest::Digest;
use crate::error::{DockhandError, Result};
use crate::registry::Registry;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, LOCATION};
use sha2::{Digest as _, Sha256};
use std::io::{Cursor, SeekFrom};
use std::path::PathBuf;
use tokio::io::{AsyncSeek, AsyncSeekExt, AsyncWrite, AsyncWriteExt};

#[cfg(test)]
mod tests;

/// Content handed to [`Registry::push_blob`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlobSource {
    /// Bytes already in memory
    Bytes(Vec<u8>),
    /// A file to read
    Path(PathBuf),
}

impl BlobSource {
    /// Reads the content into memory.
    pub async fn into_bytes(self) -> Result<Vec<u8>> {
        match self {
            BlobSource::Bytes(bytes) => Ok(bytes),
            BlobSource::Path(path) => tokio::fs::read(&path)
                .await
                .map_err(|e| DockhandError::io(format!("Failed to read {}", path.display()), e)),
        }
    }
}

impl From<Vec<u8>> for BlobSource {
    fn from(bytes: Vec<u8>) -> Self {
        BlobSource::Bytes(bytes)
    }
}

impl From<&[u8]> for BlobSource {
    fn from(bytes: &[u8]) -> Self {
        BlobSource::Bytes(bytes.to_vec())
    }
}

impl From<PathBuf> for BlobSource {
    fn from(path: PathBuf) -> Self {
        BlobSource::Path(path)
    }
}

/// The outcome of a blob push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobDescriptor {
    /// Digest computed from the pushed bytes
    pub digest: Digest,
    /// Size in bytes
    pub size: u64,
    /// Media type the blob is referenced with
    pub media_type: String,
    /// True if the registry already had the blob and nothing was uploaded
    pub existing: bool,
}

impl Registry {
    /// Pulls a blob into memory.
    ///
    /// With `use_cache`, a cached copy is returned without any network call
    /// and a fetched blob is written back to the cache.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the received bytes do not match `digest`.
    pub async fn pull_blob(&self, digest: &Digest, use_cache: bool) -> Result<Vec<u8>> {
        let mut buffer = Cursor::new(Vec::new());
        self.pull_blob_into(digest, &mut buffer, use_cache).await?;
        Ok(buffer.into_inner())
    }

    /// Streams a blob into `sink`, then rewinds the sink to its start.
    ///
    /// Returns the number of bytes written.
    pub async fn pull_blob_into<W>(&self, digest: &Digest, sink: &mut W, use_cache: bool) -> Result<u64>
    where
        W: AsyncWrite + AsyncSeek + Unpin + ?Sized,
    {
        if use_cache && let Some(data) = self.blob_cache().get(digest)? {
            tracing::debug!(%digest, "blob cache hit");
            write_all(sink, &data).await?;
            rewind(sink).await?;
            return Ok(data.len() as u64);
        }

        let url = format!("{}/{}", self.reference().blobs_url(), digest);
        let mut response = self.send_streaming(|http| http.get(&url), false).await?;
        if !response.status().is_success() {
            let status = response.status();
            let raw = self.client().buffer(response).await?;
            if status == StatusCode::NOT_FOUND {
                return Err(DockhandError::not_found("blob".to_string(), digest.to_string()));
            }
            return Err(status_error(status, &raw.headers, &url, &raw.text()));
        }

        let mut hasher = Sha256::new();
        let mut kept = use_cache.then(Vec::new);
        let mut written = 0u64;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| self.client().translate_reqwest_error(e, &url))?
        {
            hasher.update(&chunk);
            if let Some(kept) = kept.as_mut() {
                kept.extend_from_slice(&chunk);
            }
            write_all(sink, &chunk).await?;
            written += chunk.len() as u64;
        }

        let received = Digest::from_hasher(hasher);
        if received != *digest {
            return Err(DockhandError::validation(format!(
                "Digest mismatch for blob {}: received {}",
                digest, received
            )));
        }

        sink.flush()
            .await
            .map_err(|e| DockhandError::io(format!("Failed to flush blob {}", digest), e))?;
        rewind(sink).await?;

        if let Some(data) = kept {
            self.blob_cache().put(digest, &data)?;
        }
        tracing::debug!(%digest, bytes = written, "pulled blob");
        Ok(written)
    }

    /// Pushes a blob unless the registry already has it.
    ///
    /// The digest is computed from the content read here. With `force`, the
    /// upload happens even when the blob exists.
    ///
    /// # Errors
    ///
    /// Returns [`DockhandError::UploadFailed`] if the registry rejects the
    /// upload session or the final `PUT` is not answered with `201 Created`.
    pub async fn push_blob(
        &self,
        source: BlobSource,
        media_type: &str,
        force: bool,
    ) -> Result<BlobDescriptor> {
        let data = source.into_bytes().await?;
        let digest = Digest::sha256(&data);
        let descriptor = |existing| BlobDescriptor {
            digest: digest.clone(),
            size: data.len() as u64,
            media_type: media_type.to_string(),
            existing,
        };

        let blobs_url = self.reference().blobs_url();
        let blob_url = format!("{}/{}", blobs_url, digest);
        let head = self.send(|http| http.head(&blob_url), true).await?;
        if head.status.is_success() && !force {
            tracing::info!(%digest, "layer already exists");
            return Ok(descriptor(true));
        }

        let uploads_url = format!("{}/uploads/", blobs_url);
        let session = self
            .send(
                |http| http.post(&uploads_url).header(CONTENT_LENGTH, 0),
                true,
            )
            .await?;
        if !session.status.is_success() {
            return Err(DockhandError::upload_failed(
                digest.to_string(),
                session.status.as_u16(),
                session.text(),
            ));
        }
        let location = session.header(LOCATION.as_str()).ok_or_else(|| {
            DockhandError::upload_failed(
                digest.to_string(),
                session.status.as_u16(),
                "upload session response carries no Location header",
            )
        })?;
        let upload_url = self.upload_url(location, &digest)?;

        let put = self
            .send(
                |http| {
                    http.put(upload_url.clone())
                        .header(CONTENT_TYPE, "application/octet-stream")
                        .body(data.clone())
                },
                true,
            )
            .await?;
        if put.status != StatusCode::CREATED {
            return Err(DockhandError::upload_failed(
                digest.to_string(),
                put.status.as_u16(),
                put.text(),
            ));
        }

        tracing::info!(%digest, size = data.len(), "pushed blob");
        Ok(descriptor(false))
    }

    /// Resolves an upload `Location` against the registry and appends `digest`.
    fn upload_url(&self, location: &str, digest: &Digest) -> Result<url::Url> {
        let base = url::Url::parse(&self.reference().base_url()).map_err(|e| {
            DockhandError::validation_with_source(
                format!("Invalid registry URL {}", self.reference().base_url()),
                e,
            )
        })?;
        let mut url = base.join(location).map_err(|e| {
            DockhandError::validation_with_source(
                format!("Invalid upload location '{}'", location),
                e,
            )
        })?;
        url.query_pairs_mut()
            .append_pair("digest", &digest.to_string());
        Ok(url)
    }
}

async fn write_all<W>(sink: &mut W, data: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    sink.write_all(data)
        .await
        .map_err(|e| DockhandError::io("Failed to write blob to sink", e))
}

async fn rewind<W>(sink: &mut W) -> Result<()>
where
    W: AsyncSeek + Unpin + ?Sized,
{
    sink.seek(SeekFrom::Start(0))
        .await
        .map(|_| ())
        .map_err(|e| DockhandError::io("Failed to rewind blob sink", e))
}
