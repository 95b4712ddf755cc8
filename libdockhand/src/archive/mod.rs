//! Image archives: the tar layout exchanged with `docker save` / `docker load`.
//!
//! An archive holds a `manifest.json` array with one entry per tagged image,
//! the image configuration as `<hex>.json` and one `<hex>/layer.tar` per
//! layer. Archives are staged in a temporary directory that is removed when
//! the staging value is dropped, whatever the outcome.

use crate::blob::BlobSource;
use crate::digest::Digest;
use crate::error::{DockhandError, Result};
use crate::oci::{
    BlobReference, MEDIA_TYPE_CONTAINER_CONFIG, MEDIA_TYPE_LAYER, Platform, SchemaTwoManifest,
};
use crate::registry::Registry;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::File;
use std::io::Cursor;
use std::path::{Component, Path, PathBuf};
use tempfile::TempDir;


/// Name of the index file at the root of an archive.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Where [`Registry::write_archive`] puts the tar stream.
#[derive(Debug)]
pub enum ArchiveTarget<'a> {
    /// A file, created or truncated
    Path(PathBuf),
    /// An in-memory buffer, replaced with the archive bytes
    Buffer(&'a mut Vec<u8>),
}

/// Where [`ArchiveLayout::read`] reads the tar stream from.
#[derive(Debug, Clone)]
pub enum ArchiveSource {
    /// A tar file on disk
    Path(PathBuf),
    /// Tar bytes in memory
    Bytes(Vec<u8>),
}

/// One entry of `manifest.json`.
///
/// Producers disagree on key case; both spellings are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct ManifestEntry {
    #[serde(rename = "Config", alias = "config")]
    config: String,
    #[serde(rename = "RepoTags", alias = "repoTags", default)]
    repo_tags: Option<Vec<String>>,
    #[serde(rename = "Layers", alias = "layers")]
    layers: Vec<String>,
}

/// An extracted image archive.
///
/// The extracted files live in a temporary directory owned by this value.
#[derive(Debug)]
pub struct ArchiveLayout {
    dir: TempDir,
    config: PathBuf,
    repo_tags: Vec<String>,
    layers: Vec<PathBuf>,
}

impl ArchiveLayout {
    /// Extracts an archive and reads its `manifest.json`.
    ///
    /// When `manifest.json` lists several images, the last one is used.
    ///
    /// # Errors
    ///
    /// Returns [`DockhandError::InvalidArchive`] if the source is not a tar
    /// stream, has no usable `manifest.json`, or references files outside the
    /// archive or missing from it.
    pub async fn read(source: ArchiveSource) -> Result<Self> {
        tokio::task::spawn_blocking(move || Self::read_blocking(source))
            .await
            .map_err(|e| DockhandError::invalid_archive_with_source("Archive reader task failed", e))?
    }

    fn read_blocking(source: ArchiveSource) -> Result<Self> {
        let dir = staging_dir()?;

        let unpacked = match source {
            ArchiveSource::Path(path) => {
                let file = File::open(&path).map_err(|e| {
                    DockhandError::io(format!("Failed to open archive {}", path.display()), e)
                })?;
                tar::Archive::new(file).unpack(dir.path())
            }
            ArchiveSource::Bytes(bytes) => tar::Archive::new(Cursor::new(bytes)).unpack(dir.path()),
        };
        unpacked.map_err(|e| DockhandError::invalid_archive_with_source("Not a readable tar stream", e))?;

        let manifest_path = dir.path().join(MANIFEST_FILE);
        let contents = std::fs::read(&manifest_path).map_err(|e| {
            DockhandError::invalid_archive_with_source("Archive has no manifest.json", e)
        })?;
        let mut entries: Vec<ManifestEntry> = serde_json::from_slice(&contents).map_err(|e| {
            DockhandError::invalid_archive_with_source("Archive manifest.json is malformed", e)
        })?;
        let entry = entries
            .pop()
            .ok_or_else(|| DockhandError::invalid_archive("Archive manifest.json lists no image"))?;

        let config = contained_file(dir.path(), &entry.config)?;
        let layers = entry
            .layers
            .iter()
            .map(|layer| contained_file(dir.path(), layer))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            dir,
            config,
            repo_tags: entry.repo_tags.unwrap_or_default(),
            layers,
        })
    }

    /// Returns the directory the archive was extracted to.
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Returns the path of the image configuration file.
    pub fn config_path(&self) -> &Path {
        &self.config
    }

    /// Returns the layer tar paths, bottom-most first.
    pub fn layer_paths(&self) -> &[PathBuf] {
        &self.layers
    }

    /// Returns the `RepoTags` of the image.
    pub fn repo_tags(&self) -> &[String] {
        &self.repo_tags
    }
}

/// Resolves a path from `manifest.json`, refusing anything outside `root`.
fn contained_file(root: &Path, name: &str) -> Result<PathBuf> {
    let relative = Path::new(name);
    let escapes = relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if name.is_empty() || escapes {
        return Err(DockhandError::invalid_archive(format!(
            "Archive references a path outside the archive: '{}'",
            name
        )));
    }

    let path = root.join(relative);
    if !path.is_file() {
        return Err(DockhandError::invalid_archive(format!(
            "Archive references missing file '{}'",
            name
        )));
    }
    Ok(path)
}

fn staging_dir() -> Result<TempDir> {
    tempfile::Builder::new()
        .prefix("dockhand-")
        .tempdir()
        .map_err(|e| DockhandError::io("Failed to create temporary directory", e))
}

impl Registry {
    /// Pulls the image and writes it as a tar archive to `target`.
    ///
    /// Config and layers go through the blob cache. `RepoTags` is set to
    /// `registry/repository:tag`.
    pub async fn write_archive(
        &self,
        platform: Option<&Platform>,
        target: ArchiveTarget<'_>,
    ) -> Result<()> {
        let manifest = self.resolve_for_platform(platform).await?;
        let config = self.get_config(platform).await?;
        let layers = self.get_layer_digests(platform).await?;
        let config_digest = Digest::from(manifest.config().digest());

        let dir = staging_dir()?;
        let config_name = format!("{}.json", config_digest.hex());
        tokio::fs::write(dir.path().join(&config_name), &config)
            .await
            .map_err(|e| DockhandError::io("Failed to stage image config", e))?;

        let mut layer_names = Vec::with_capacity(layers.len());
        let mut staged = HashSet::new();
        for digest in &layers {
            let name = format!("{}/layer.tar", digest.hex());
            if staged.insert(digest.to_string()) {
                let layer_dir = dir.path().join(digest.hex());
                tokio::fs::create_dir_all(&layer_dir)
                    .await
                    .map_err(|e| DockhandError::io("Failed to stage layer directory", e))?;
                let mut file = tokio::fs::File::create(layer_dir.join("layer.tar"))
                    .await
                    .map_err(|e| DockhandError::io("Failed to stage layer", e))?;
                self.pull_blob_into(digest, &mut file, true).await?;
            }
            layer_names.push(name);
        }

        let entries = vec![ManifestEntry {
            config: config_name,
            repo_tags: Some(vec![self.reference().to_string()]),
            layers: layer_names,
        }];
        let manifest_json = serde_json::to_vec(&entries).map_err(|e| {
            DockhandError::validation_with_source("Failed to serialize manifest.json", e)
        })?;
        tokio::fs::write(dir.path().join(MANIFEST_FILE), manifest_json)
            .await
            .map_err(|e| DockhandError::io("Failed to stage manifest.json", e))?;

        match target {
            ArchiveTarget::Path(path) => {
                tokio::task::spawn_blocking(move || {
                    let file = File::create(&path).map_err(|e| {
                        DockhandError::io(format!("Failed to create {}", path.display()), e)
                    })?;
                    pack(&dir, entries_of(&dir)?, file).map(|_| ())
                })
                .await
                .map_err(|e| DockhandError::invalid_archive_with_source("Archive writer task failed", e))??;
            }
            ArchiveTarget::Buffer(buffer) => {
                let bytes = tokio::task::spawn_blocking(move || {
                    pack(&dir, entries_of(&dir)?, Vec::new())
                })
                .await
                .map_err(|e| DockhandError::invalid_archive_with_source("Archive writer task failed", e))??;
                *buffer = bytes;
            }
        }

        tracing::info!(reference = %self.reference(), layers = layers.len(), "pull complete");
        Ok(())
    }

    /// Publishes an extracted archive under the session's reference.
    ///
    /// The config is pushed first, then every layer in archive order. The
    /// returned digest is the one the registry reports for the manifest.
    pub async fn publish(&self, layout: &ArchiveLayout) -> Result<Digest> {
        let config = self
            .push_blob(
                BlobSource::Path(layout.config_path().to_path_buf()),
                MEDIA_TYPE_CONTAINER_CONFIG,
                false,
            )
            .await?;

        let mut layers = Vec::with_capacity(layout.layer_paths().len());
        for path in layout.layer_paths() {
            let layer = self
                .push_blob(BlobSource::Path(path.clone()), MEDIA_TYPE_LAYER, false)
                .await?;
            layers.push(BlobReference::new(layer.media_type, layer.size, &layer.digest));
        }

        let manifest = SchemaTwoManifest::new(
            BlobReference::new(config.media_type, config.size, &config.digest),
            layers,
        );
        let digest = self.push_manifest(&manifest).await?;
        tracing::info!(reference = %self.reference(), %digest, "published");
        Ok(digest)
    }
}

/// Lists the staged files relative to the staging root, manifest last.
fn entries_of(dir: &TempDir) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in walkdir::WalkDir::new(dir.path()).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            DockhandError::invalid_archive_with_source("Failed to walk staging directory", e)
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        if let Ok(relative) = entry.path().strip_prefix(dir.path())
            && relative != Path::new(MANIFEST_FILE)
        {
            files.push(relative.to_path_buf());
        }
    }
    files.push(PathBuf::from(MANIFEST_FILE));
    Ok(files)
}

/// Writes the staged files as a tar stream into `writer`.
fn pack<W: std::io::Write>(dir: &TempDir, files: Vec<PathBuf>, writer: W) -> Result<W> {
    let mut builder = tar::Builder::new(writer);
    builder.mode(tar::HeaderMode::Deterministic);
    for relative in files {
        builder
            .append_path_with_name(dir.path().join(&relative), &relative)
            .map_err(|e| {
                DockhandError::io(format!("Failed to add {} to archive", relative.display()), e)
            })?;
    }
    builder
        .into_inner()
        .map_err(|e| DockhandError::io("Failed to finish archive", e))
}
