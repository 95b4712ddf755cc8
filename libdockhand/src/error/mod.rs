//! Error types for Dockhand
//!
//! This module provides the error type shared by every registry, blob and
//! archive operation. Fatal errors carry the reference, digest or HTTP status
//! needed to act on them without re-running with verbose logging.

use thiserror::Error;


/// Main error type for Dockhand operations
#[derive(Error, Debug)]
pub enum DockhandError {
    /// Network-related errors (connection, timeout, DNS)
    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Authentication errors (unparsable challenge, repeated 401, token exchange failure)
    #[error("Authentication error (status: {status_code:?}): {message}")]
    Authentication {
        message: String,
        status_code: Option<u16>,
    },

    /// Resource not found errors (404)
    #[error("{resource_type} not found: {name}")]
    NotFound { resource_type: String, name: String },

    /// No entry of a manifest list matches the requested platform
    #[error("No manifest for platform {platform} in the manifest list of {reference}")]
    PlatformNotFound { platform: String, reference: String },

    /// A blob or manifest upload was rejected by the registry
    #[error("Upload of {digest} failed (status: {status_code}): {body}")]
    UploadFailed {
        digest: String,
        status_code: u16,
        body: String,
    },

    /// The archive is not a readable image tar stream
    #[error("Invalid archive: {message}")]
    InvalidArchive {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Rate limiting errors (429)
    #[error("Rate limit: {message}")]
    RateLimit {
        message: String,
        retry_after: Option<u64>,
    },

    /// Server errors (500, 503)
    #[error("Server error (status: {status_code}): {message}")]
    Server { message: String, status_code: u16 },

    /// Validation errors (invalid manifest, digest mismatch, etc.)
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration errors (invalid config file, missing settings)
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        path: Option<String>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Local filesystem errors (temporary directories, cache files, archive files)
    #[error("I/O error: {message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
    },
}

/// Result type alias for Dockhand operations
pub type Result<T> = std::result::Result<T, DockhandError>;

impl DockhandError {
    /// Creates a new network error.
    ///
    /// # Examples
    ///
    /// ```
    /// use libdockhand::error::DockhandError;
    ///
    /// let err = DockhandError::network("connection refused");
    /// assert!(matches!(err, DockhandError::Network { .. }));
    /// ```
    pub fn network<S: Into<String>>(message: S) -> Self {
        Self::Network {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new network error with a source error.
    pub fn network_with_source<S, E>(message: S, source: E) -> Self
    where
        S: Into<String>,
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Network {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new authentication error.
    ///
    /// # Examples
    ///
    /// ```
    /// use libdockhand::error::DockhandError;
    ///
    /// let err = DockhandError::authentication("invalid credentials", Some(401));
    /// assert!(matches!(err, DockhandError::Authentication { .. }));
    /// ```
    pub fn authentication<S: Into<String>>(message: S, status_code: Option<u16>) -> Self {
        Self::Authentication {
            message: message.into(),
            status_code,
        }
    }

    /// Creates a new not found error.
    pub fn not_found<S: Into<String>>(resource_type: S, name: S) -> Self {
        Self::NotFound {
            resource_type: resource_type.into(),
            name: name.into(),
        }
    }

    /// Creates a new platform-not-found error.
    ///
    /// # Examples
    ///
    /// ```
    /// use libdockhand::error::DockhandError;
    ///
    /// let err = DockhandError::platform_not_found("linux/s390x", "index.docker.io/library/alpine:latest");
    /// assert!(err.to_string().contains("linux/s390x"));
    /// ```
    pub fn platform_not_found<P, R>(platform: P, reference: R) -> Self
    where
        P: Into<String>,
        R: Into<String>,
    {
        Self::PlatformNotFound {
            platform: platform.into(),
            reference: reference.into(),
        }
    }

    /// Creates a new upload error carrying the registry's status and response body.
    pub fn upload_failed<D, B>(digest: D, status_code: u16, body: B) -> Self
    where
        D: Into<String>,
        B: Into<String>,
    {
        Self::UploadFailed {
            digest: digest.into(),
            status_code,
            body: body.into(),
        }
    }

    /// Creates a new invalid archive error.
    pub fn invalid_archive<S: Into<String>>(message: S) -> Self {
        Self::InvalidArchive {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new invalid archive error with a source error.
    pub fn invalid_archive_with_source<S, E>(message: S, source: E) -> Self
    where
        S: Into<String>,
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::InvalidArchive {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new rate limit error.
    pub fn rate_limit<S: Into<String>>(message: S, retry_after: Option<u64>) -> Self {
        Self::RateLimit {
            message: message.into(),
            retry_after,
        }
    }

    /// Creates a new server error.
    pub fn server<S: Into<String>>(message: S, status_code: u16) -> Self {
        Self::Server {
            message: message.into(),
            status_code,
        }
    }

    /// Creates a new validation error.
    ///
    /// # Examples
    ///
    /// ```
    /// use libdockhand::error::DockhandError;
    ///
    /// let err = DockhandError::validation("invalid manifest format");
    /// assert!(matches!(err, DockhandError::Validation { .. }));
    /// ```
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new validation error with a source error.
    pub fn validation_with_source<S, E>(message: S, source: E) -> Self
    where
        S: Into<String>,
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Validation {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new configuration error.
    pub fn config<S: Into<String>>(message: S, path: Option<S>) -> Self {
        Self::Config {
            message: message.into(),
            path: path.map(|p| p.into()),
            source: None,
        }
    }

    /// Creates a new configuration error with a source error.
    pub fn config_with_source<S, E>(message: S, path: Option<S>, source: E) -> Self
    where
        S: Into<String>,
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Config {
            message: message.into(),
            path: path.map(|p| p.into()),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new I/O error.
    ///
    /// # Examples
    ///
    /// ```
    /// use libdockhand::error::DockhandError;
    /// use std::io;
    ///
    /// let io_err = io::Error::new(io::ErrorKind::NotFound, "missing");
    /// let err = DockhandError::io("failed to open layer", io_err);
    /// assert!(matches!(err, DockhandError::Io { .. }));
    /// ```
    pub fn io<S: Into<String>>(message: S, source: std::io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }

    /// Returns the HTTP status code attached to this error, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Authentication { status_code, .. } => *status_code,
            Self::UploadFailed { status_code, .. } | Self::Server { status_code, .. } => {
                Some(*status_code)
            }
            Self::NotFound { .. } => Some(404),
            Self::RateLimit { .. } => Some(429),
            _ => None,
        }
    }
}
