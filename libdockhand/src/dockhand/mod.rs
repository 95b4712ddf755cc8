//! High-level API for Dockhand.
//!
//! [`Dockhand`] wires a configured HTTP client, credential store and blob
//! cache into per-reference [`Registry`] sessions, and offers the common
//! workflows on top of them: pulling an image into an archive, pushing an
//! archive, listing, and logging in.
//!
//! # Examples
//!
//! ```no_run
//! use libdockhand::{ArchiveTarget, Dockhand};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let dockhand = Dockhand::builder().build()?;
//!
//!     // Save alpine as a `docker load`-able archive
//!     dockhand
//!         .pull("alpine:3.19", ArchiveTarget::Path("alpine.tar".into()))
//!         .await?;
//!
//!     for tag in dockhand.list_tags("alpine", None, None, false).await? {
//!         println!("{}", tag);
//!     }
//!     Ok(())
//! }
//! ```

use crate::archive::{ArchiveLayout, ArchiveSource, ArchiveTarget};
use crate::auth::{CredentialStore, Credentials, FileCredentialStore};
use crate::cache::{BlobCache, CacheStats, ClearStats, DiskBlobCache, NoCache};
use crate::client::{Client, ClientConfig};
use crate::config::Config;
use crate::digest::Digest;
use crate::error::Result;
use crate::oci::Platform;
use crate::reference::{DEFAULT_TAG, ImageReference};
use crate::registry::Registry;
use std::num::NonZeroUsize;
use std::sync::Arc;

#[cfg(test)]
mod tests;

/// Entry point for registry workflows.
///
/// Cheap to share: sessions created from one `Dockhand` share its connection
/// pool, credential store and blob cache.
pub struct Dockhand {
    client: Client,
    credential_store: Arc<dyn CredentialStore>,
    blob_cache: Arc<dyn BlobCache>,
    /// Set when the cache is the built-in disk cache, for maintenance
    disk_cache: Option<Arc<DiskBlobCache>>,
    credentials: Option<Credentials>,
    platform: Option<Platform>,
}

impl Dockhand {
    /// Creates a builder.
    pub fn builder() -> DockhandBuilder {
        DockhandBuilder::new()
    }

    /// Opens a session for an image reference such as `alpine:3.19`.
    pub fn registry(&self, reference: &str) -> Registry {
        self.session(ImageReference::parse(reference))
    }

    fn session(&self, reference: ImageReference) -> Registry {
        let registry = Registry::new(reference, self.client.clone())
            .with_credential_store(Arc::clone(&self.credential_store))
            .with_blob_cache(Arc::clone(&self.blob_cache));
        match &self.credentials {
            Some(credentials) => registry.with_credentials(credentials.clone()),
            None => registry,
        }
    }

    /// Returns the platform pulls resolve to, if one is configured.
    pub fn platform(&self) -> Option<&Platform> {
        self.platform.as_ref()
    }

    /// Pulls an image and writes it as an archive.
    pub async fn pull(&self, reference: &str, target: ArchiveTarget<'_>) -> Result<()> {
        self.registry(reference)
            .write_archive(self.platform.as_ref(), target)
            .await
    }

    /// Reads an archive and publishes it under `reference`.
    ///
    /// Returns the manifest digest reported by the registry.
    pub async fn push(&self, source: ArchiveSource, reference: &str) -> Result<Digest> {
        let layout = ArchiveLayout::read(source).await?;
        self.registry(reference).publish(&layout).await
    }

    /// Lists the tags of an image's repository.
    ///
    /// `last` and `n` seed the first page request; `lazy` returns only the
    /// first page instead of following the registry's `Link` headers.
    pub async fn list_tags(
        &self,
        reference: &str,
        last: Option<&str>,
        n: Option<usize>,
        lazy: bool,
    ) -> Result<Vec<String>> {
        self.registry(reference).list_tags(last, n, lazy).await
    }

    /// Lists the repositories of a registry such as `localhost:5000`.
    pub async fn list_repositories(
        &self,
        registry: &str,
        last: Option<&str>,
        n: Option<usize>,
        lazy: bool,
    ) -> Result<Vec<String>> {
        self.session(registry_reference(registry))
            .list_repositories(last, n, lazy)
            .await
    }

    /// Verifies credentials against a registry, then stores them.
    ///
    /// Nothing is stored if the registry rejects the credentials.
    pub async fn login(&self, registry: &str, username: &str, password: &str) -> Result<()> {
        let reference = registry_reference(registry);
        let host = reference.registry().to_string();

        Registry::new(reference, self.client.clone())
            .with_credentials(Credentials::basic(username, password))
            .authenticate(None, false)
            .await?;

        self.credential_store.save(&host, username, password)?;
        tracing::info!(registry = %host, "login succeeded");
        Ok(())
    }

    /// Forgets the stored credentials of a registry.
    pub fn logout(&self, registry: &str) -> Result<()> {
        let reference = registry_reference(registry);
        self.credential_store.remove(reference.registry())
    }

    /// Returns disk cache statistics, or `None` when the built-in cache is not in use.
    pub fn cache_stats(&self) -> Result<Option<CacheStats>> {
        self.disk_cache.as_ref().map(|cache| cache.stats()).transpose()
    }

    /// Empties the built-in disk cache, if in use.
    pub fn clear_cache(&self) -> Result<Option<ClearStats>> {
        self.disk_cache.as_ref().map(|cache| cache.clear()).transpose()
    }
}

/// Builds a reference that names a registry only, e.g. for the catalog.
///
/// Accepts `host[:port]` with an optional `http://` or `https://` prefix.
fn registry_reference(registry: &str) -> ImageReference {
    let (host, use_tls) = match registry.split_once("://") {
        Some((scheme, host)) => (host, !scheme.eq_ignore_ascii_case("http")),
        None => (registry, true),
    };
    ImageReference::new(host.trim_end_matches('/'), "", DEFAULT_TAG, use_tls)
}

/// Builder for [`Dockhand`].
///
/// Collaborators not set explicitly come from the [`Config`]: a
/// [`FileCredentialStore`] at `auth.config_path` and, when `cache.enabled`,
/// a [`DiskBlobCache`] at `cache.dir`.
///
/// # Examples
///
/// ```no_run
/// use libdockhand::{Config, Dockhand, Platform};
/// use std::path::Path;
///
/// # fn example() -> libdockhand::Result<()> {
/// let dockhand = Dockhand::builder()
///     .with_config(Config::load(Some(Path::new("dockhand.yaml")))?)
///     .with_platform(Platform::new("linux", "arm64"))
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct DockhandBuilder {
    config: Option<Config>,
    credential_store: Option<Arc<dyn CredentialStore>>,
    blob_cache: Option<Arc<dyn BlobCache>>,
    credentials: Option<Credentials>,
    platform: Option<Platform>,
}

impl DockhandBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set configuration directly.
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Use this credential store instead of the configured file.
    pub fn with_credential_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.credential_store = Some(store);
        self
    }

    /// Use this blob cache instead of the configured one.
    pub fn with_blob_cache(mut self, cache: Arc<dyn BlobCache>) -> Self {
        self.blob_cache = Some(cache);
        self
    }

    /// Set credentials presented to every registry.
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Resolve pulls to this platform; overrides the configured one.
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }

    /// Build the `Dockhand` instance.
    ///
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be built, the configured platform is
    /// malformed, or no credential file location can be determined.
    pub fn build(self) -> Result<Dockhand> {
        let config = self.config.unwrap_or_default();

        let client = Client::with_config(
            ClientConfig::new()
                .with_timeout(config.network.timeout)
                .with_max_idle_per_host(config.network.max_idle_per_host),
        )?;

        let platform = match self.platform {
            Some(platform) => Some(platform),
            None => config
                .platform
                .as_deref()
                .map(str::parse::<Platform>)
                .transpose()?,
        };

        let credential_store = match self.credential_store {
            Some(store) => store,
            None => {
                let store = match &config.auth.config_path {
                    Some(path) => FileCredentialStore::new(path.clone()),
                    None => FileCredentialStore::default_location()?,
                };
                Arc::new(store)
            }
        };

        let (blob_cache, disk_cache) = match self.blob_cache {
            Some(cache) => (cache, None),
            None if config.cache.enabled => {
                let capacity =
                    NonZeroUsize::new(config.cache.memory_entries).unwrap_or(NonZeroUsize::MIN);
                let disk = Arc::new(DiskBlobCache::new(config.cache_dir(), capacity));
                (disk.clone() as Arc<dyn BlobCache>, Some(disk))
            }
            None => (Arc::new(NoCache) as Arc<dyn BlobCache>, None),
        };

        Ok(Dockhand {
            client,
            credential_store,
            blob_cache,
            disk_cache,
            credentials: self.credentials,
            platform,
        })
    }
}

