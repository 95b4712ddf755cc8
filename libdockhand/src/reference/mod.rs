//! Image reference parsing.
//!
//! Turns a human-supplied image string such as `alpine`, `gcr.io/distroless/cc:latest`
//! or `http://localhost:5000/team/app:v2` into a normalized [`ImageReference`].
//! Normalization mirrors the registry-side rules for Docker Hub short names.

use std::fmt;
use std::str::FromStr;


/// Registry used for Docker Hub short names such as `alpine`.
pub const DOCKER_HUB_REGISTRY: &str = "index.docker.io";

/// Tag used when no `:` follows the last `/`.
pub const DEFAULT_TAG: &str = "latest";

/// A normalized image reference: registry, repository, tag and transport.
///
/// Equality and hashing cover all four fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    registry: String,
    repository: String,
    tag: String,
    use_tls: bool,
}

impl ImageReference {
    /// Creates a reference from already-normalized parts.
    pub fn new(
        registry: impl Into<String>,
        repository: impl Into<String>,
        tag: impl Into<String>,
        use_tls: bool,
    ) -> Self {
        Self {
            registry: registry.into(),
            repository: repository.into(),
            tag: tag.into(),
            use_tls,
        }
    }

    /// Parses an image string. Never fails: anything that does not look like
    /// `registry/repository` is treated as a repository name.
    ///
    /// The tag is `latest` only when no `:` follows the last `/`; a trailing
    /// `:` yields an empty tag.
    ///
    /// # Examples
    ///
    /// ```
    /// use libdockhand::ImageReference;
    ///
    /// let reference = ImageReference::parse("alpine");
    /// assert_eq!(reference.registry(), "index.docker.io");
    /// assert_eq!(reference.repository(), "library/alpine");
    /// assert_eq!(reference.tag(), "latest");
    /// assert!(reference.use_tls());
    ///
    /// let reference = ImageReference::parse("localhost:5000/alpine:3.19");
    /// assert_eq!(reference.registry(), "localhost:5000");
    /// assert_eq!(reference.repository(), "alpine");
    /// assert_eq!(reference.tag(), "3.19");
    /// ```
    pub fn parse(text: &str) -> Self {
        let (scheme, remainder) = match text.split_once("://") {
            Some((scheme, rest)) => (Some(scheme.to_ascii_lowercase()), rest),
            None => (None, text),
        };

        let (registry, repository_raw) = if scheme.is_none() && is_hub_short_name(remainder) {
            let repository = if remainder.contains('/') {
                remainder.to_string()
            } else {
                format!("library/{}", remainder)
            };
            (DOCKER_HUB_REGISTRY.to_string(), repository)
        } else {
            let (registry, repository) = remainder.split_once('/').unwrap_or((remainder, ""));
            let repository = if is_docker_hub(registry) && !repository.contains('/') {
                format!("library/{}", repository)
            } else {
                repository.to_string()
            };
            (registry.to_string(), repository)
        };

        let mut parts = repository_raw.split(':');
        let name = parts.next().unwrap_or_default();
        let tag = parts.next().unwrap_or(DEFAULT_TAG);

        Self {
            registry,
            repository: name.trim_matches('/').to_string(),
            tag: tag.to_string(),
            use_tls: scheme.as_deref().unwrap_or("https") == "https",
        }
    }

    /// Returns a copy of this reference pointing at another tag.
    pub fn with_tag(&self, tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..self.clone()
        }
    }

    /// Returns the registry host (and port, if any).
    pub fn registry(&self) -> &str {
        &self.registry
    }

    /// Returns the repository path.
    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// Returns the tag.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Returns true if the registry is reached over HTTPS.
    pub fn use_tls(&self) -> bool {
        self.use_tls
    }

    /// Returns the registry base URL, e.g. `https://gcr.io`.
    pub fn base_url(&self) -> String {
        let scheme = if self.use_tls { "https" } else { "http" };
        format!("{}://{}", scheme, self.registry)
    }

    /// Returns the distribution API root, e.g. `https://gcr.io/v2`.
    pub fn v2_url(&self) -> String {
        format!("{}/v2", self.base_url())
    }

    /// Returns the manifest URL for this reference's tag.
    pub fn manifest_url(&self) -> String {
        self.manifest_url_for(&self.tag)
    }

    /// Returns the manifest URL for an arbitrary tag or digest in this repository.
    pub fn manifest_url_for(&self, reference: &str) -> String {
        format!("{}/{}/manifests/{}", self.v2_url(), self.repository, reference)
    }

    /// Returns the blobs collection URL of this repository.
    pub fn blobs_url(&self) -> String {
        format!("{}/{}/blobs", self.v2_url(), self.repository)
    }
}

impl FromStr for ImageReference {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.registry, self.repository, self.tag)
    }
}

/// Returns true if `registry` names Docker Hub.
pub fn is_docker_hub(registry: &str) -> bool {
    registry == "docker.io" || registry.ends_with(".docker.io")
}

/// A schemeless string with at most one `/` whose first segment cannot be a
/// host is a Docker Hub name. Without a `/`, a `:` starts the tag, so only
/// the name before it is checked for a `.`; with one, a `:` is a port.
fn is_hub_short_name(remainder: &str) -> bool {
    let first_segment = remainder.split('/').next().unwrap_or_default();
    match remainder.matches('/').count() {
        0 => {
            let name = first_segment.split(':').next().unwrap_or_default();
            !name.contains('.')
        }
        1 => !first_segment.contains('.') && !first_segment.contains(':'),
        _ => false,
    }
}
