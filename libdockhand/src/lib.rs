//! Dockhand - Container Registry Client Library
//!
//! Dockhand speaks the Docker Registry V2 / OCI Distribution protocol: it
//! resolves image references, negotiates bearer tokens, fetches and publishes
//! manifests and blobs, and converts images to and from the tar archives used
//! by `docker save` / `docker load`.
//!
//! # Quick Start
//!
//! ```no_run
//! use libdockhand::{ArchiveSource, ArchiveTarget, Dockhand};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let dockhand = Dockhand::builder().build()?;
//!
//!     // Pull an image into an archive
//!     dockhand
//!         .pull("alpine:3.19", ArchiveTarget::Path("alpine.tar".into()))
//!         .await?;
//!
//!     // Publish it somewhere else
//!     let digest = dockhand
//!         .push(
//!             ArchiveSource::Path("alpine.tar".into()),
//!             "http://localhost:5000/alpine:3.19",
//!         )
//!         .await?;
//!     println!("published {}", digest);
//!
//!     Ok(())
//! }
//! ```
//!
//! # Main Types
//!
//! - [`Dockhand`] - Main entry point for registry workflows
//! - [`DockhandBuilder`] - Builder for advanced configuration
//! - [`Registry`] - A session against one image reference
//! - [`ImageReference`] - Image reference parsing and URL derivation
//! - [`Digest`] - Content digest validation and handling
//! - [`Platform`] - Platform selector for multi-architecture images
//!
//! # Architecture
//!
//! A [`Registry`] session owns the bearer token and the memoised manifest
//! lookups of one reference. Its operations are spread over modules by
//! concern: [`manifest`], [`blob`], [`archive`] and [`list`]. Credentials and
//! cached blobs are reached through the [`auth::CredentialStore`] and
//! [`cache::BlobCache`] traits, injected when the session is built.

#![warn(clippy::all)]

/// Returns the libdockhand crate version.
///
/// # Examples
///
/// ```
/// let version = libdockhand::version();
/// assert!(!version.is_empty());
/// ```
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

// High-level public API (main entry point)
mod dockhand;
pub use dockhand::{Dockhand, DockhandBuilder};

// Re-export commonly used types for convenience
pub use archive::{ArchiveLayout, ArchiveSource, ArchiveTarget};
pub use auth::Credentials;
pub use blob::{BlobDescriptor, BlobSource};
pub use config::Config;
pub use digest::Digest;
pub use error::{DockhandError, Result};
pub use oci::Platform;
pub use reference::ImageReference;
pub use registry::Registry;

pub mod archive;
pub mod auth;
pub mod blob;
pub mod cache;
pub mod client;
pub mod config;
pub mod digest;
pub mod error;
pub mod list;
pub mod manifest;
#[doc(hidden)]
pub mod memo;
pub mod oci;
pub mod reference;
pub mod registry;
