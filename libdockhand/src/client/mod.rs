//! HTTP client for OCI registry communication.
//!
//! This module provides a thin HTTP client built on reqwest. It owns
//! connection pooling and timeouts, buffers responses into [`RawResponse`]
//! envelopes and translates transport failures and error statuses into
//! [`DockhandError`] values. Protocol logic (auth retry, pagination, uploads)
//! lives in the modules built on top of it.

use crate::error::{DockhandError, Result};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client as ReqwestClient, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;


/// Configuration for the HTTP client.
///
/// # Examples
///
/// ```
/// use libdockhand::client::ClientConfig;
///
/// let config = ClientConfig::new()
///     .with_timeout(60)
///     .with_max_idle_per_host(20);
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Request timeout in seconds (default: 30)
    pub timeout_seconds: u64,
    /// Maximum idle connections per host (default: 10)
    pub max_idle_per_host: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            max_idle_per_host: 10,
        }
    }
}

impl ClientConfig {
    /// Creates a new configuration with default values.
    ///
    /// # Examples
    ///
    /// ```
    /// use libdockhand::client::ClientConfig;
    ///
    /// let config = ClientConfig::new();
    /// assert_eq!(config.timeout_seconds, 30);
    /// assert_eq!(config.max_idle_per_host, 10);
    /// ```
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the request timeout in seconds.
    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    /// Sets the maximum idle connections per host.
    pub fn with_max_idle_per_host(mut self, max: usize) -> Self {
        self.max_idle_per_host = max;
        self
    }
}

/// A fully received HTTP response: status, headers and body bytes.
///
/// Cloneable so that resolved manifests and configs can be memoised.
#[derive(Debug, Clone)]
pub struct RawResponse {
    /// HTTP status code
    pub status: StatusCode,
    /// Response headers (lookups are case-insensitive)
    pub headers: HeaderMap,
    /// Raw body bytes
    pub data: Vec<u8>,
}

impl RawResponse {
    /// Returns a header value as a string, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns the body as (lossy) UTF-8 text.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }

    /// Deserializes the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.data)
            .map_err(|e| DockhandError::validation_with_source("Failed to parse JSON response", e))
    }

    /// Returns `self` if the status is a success, or the matching error otherwise.
    pub fn error_for_status(self, url: &str) -> Result<Self> {
        if self.status.is_success() {
            return Ok(self);
        }
        Err(status_error(
            self.status,
            &self.headers,
            url,
            &self.text(),
        ))
    }
}

/// HTTP client for OCI registry operations.
///
/// Cheap to clone; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct Client {
    /// The underlying HTTP client
    http_client: ReqwestClient,
    /// Configured timeout, for error messages
    timeout_seconds: u64,
}

impl Client {
    /// Creates a new client with default configuration.
    ///
    /// # Examples
    ///
    /// ```
    /// use libdockhand::client::Client;
    ///
    /// let client = Client::new().unwrap();
    /// ```
    pub fn new() -> Result<Self> {
        Self::with_config(ClientConfig::default())
    }

    /// Creates a new client with custom configuration.
    pub fn with_config(config: ClientConfig) -> Result<Self> {
        let http_client = ReqwestClient::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .pool_max_idle_per_host(config.max_idle_per_host)
            .build()
            .map_err(|e| DockhandError::network_with_source("Failed to create HTTP client", e))?;

        Ok(Self {
            http_client,
            timeout_seconds: config.timeout_seconds,
        })
    }

    /// Returns the underlying reqwest client for building requests.
    pub fn http(&self) -> &ReqwestClient {
        &self.http_client
    }

    /// Sends a request and buffers the whole response body.
    ///
    /// Error statuses are returned as responses, not errors; callers decide
    /// which statuses they can handle (e.g. `401` triggers authentication).
    pub async fn send(&self, request: RequestBuilder) -> Result<RawResponse> {
        let response = self.send_streaming(request).await?;
        self.buffer(response).await
    }

    /// Reads the rest of a streaming response into a [`RawResponse`].
    pub async fn buffer(&self, response: Response) -> Result<RawResponse> {
        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().to_string();
        let data = response
            .bytes()
            .await
            .map_err(|e| self.translate_reqwest_error(e, &url))?;

        Ok(RawResponse {
            status,
            headers,
            data: data.to_vec(),
        })
    }

    /// Sends a request and returns the response with its body unread.
    pub async fn send_streaming(&self, request: RequestBuilder) -> Result<Response> {
        let (client, request) = request.build_split();
        let request =
            request.map_err(|e| DockhandError::network_with_source("Failed to build request", e))?;
        let url = request.url().to_string();

        client
            .execute(request)
            .await
            .map_err(|e| self.translate_reqwest_error(e, &url))
    }

    /// Translates a reqwest error into a DockhandError.
    pub(crate) fn translate_reqwest_error(&self, error: reqwest::Error, url: &str) -> DockhandError {
        if error.is_timeout() {
            DockhandError::network(format!(
                "Request to {} timed out after {} seconds",
                url, self.timeout_seconds
            ))
        } else if error.is_connect() {
            DockhandError::network_with_source(
                format!("Failed to connect to registry at {}", url),
                error,
            )
        } else if error.is_request() {
            DockhandError::network_with_source(format!("Failed to send request to {}", url), error)
        } else {
            DockhandError::network_with_source(
                format!("Network error communicating with {}", url),
                error,
            )
        }
    }
}

/// Maps an error status to the matching error kind.
pub(crate) fn status_error(
    status: StatusCode,
    headers: &HeaderMap,
    url: &str,
    body: &str,
) -> DockhandError {
    match status {
        StatusCode::UNAUTHORIZED => DockhandError::authentication(
            format!("Authentication required for {}: {}", url, body),
            Some(401),
        ),
        StatusCode::FORBIDDEN => DockhandError::authentication(
            format!("Access forbidden for {}: {}", url, body),
            Some(403),
        ),
        StatusCode::NOT_FOUND => DockhandError::not_found("resource", url),
        StatusCode::TOO_MANY_REQUESTS => {
            let retry_after = headers
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            DockhandError::rate_limit(format!("Rate limit exceeded for {}", url), retry_after)
        }
        s if s.is_server_error() => DockhandError::server(
            format!("Server error from {}: {}", url, body),
            s.as_u16(),
        ),
        _ => DockhandError::network(format!(
            "HTTP {} from {}: {}",
            status.as_u16(),
            url,
            body
        )),
    }
}

/// Extracts the `(last, n)` cursor from a pagination `Link` header.
///
/// The distribution API announces the next page as
/// `Link: </v2/_catalog?last=nginx&n=100>; rel="next"`. Links without a
/// `rel` parameter are taken as the next page too; links whose `rel` names
/// anything else are skipped. Values are URL-decoded. Returns `None` when no
/// such link carries a `last` parameter.
///
/// # Examples
///
/// ```
/// use libdockhand::client::parse_link_cursor;
///
/// let cursor = parse_link_cursor(r#"</v2/_catalog?last=nginx&n=10>; rel="next""#);
/// assert_eq!(cursor, Some(("nginx".to_string(), Some(10))));
///
/// let cursor = parse_link_cursor("</v2/_catalog?last=a&n=10>");
/// assert_eq!(cursor, Some(("a".to_string(), Some(10))));
/// ```
pub fn parse_link_cursor(link: &str) -> Option<(String, Option<usize>)> {
    for link_part in link.split(',') {
        let link_part = link_part.trim();

        let (Some(start), Some(end)) = (link_part.find('<'), link_part.find('>')) else {
            continue;
        };
        if end < start {
            continue;
        }

        let rel = link_part[end + 1..]
            .split(';')
            .filter_map(|param| param.split_once('='))
            .find(|(key, _)| key.trim().eq_ignore_ascii_case("rel"))
            .map(|(_, value)| {
                value
                    .trim()
                    .trim_matches(|c: char| c == '"' || c == '\'')
                    .to_string()
            });
        if let Some(rel) = rel
            && !rel.split_whitespace().any(|r| r.eq_ignore_ascii_case("next"))
        {
            continue;
        }

        let target = &link_part[start + 1..end];
        let query = target.split_once('?').map(|(_, q)| q).unwrap_or_default();

        let mut last = None;
        let mut n = None;
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "last" => last = Some(value.into_owned()),
                "n" => n = value.parse::<usize>().ok(),
                _ => {}
            }
        }

        if let Some(last) = last {
            return Some((last, n));
        }
    }

    None
}
