//! Authentication handling for OCI registries.
//!
//! Registries answer an unauthenticated request with `401` and a
//! `WWW-Authenticate: Bearer realm="...",service="...",scope="..."` challenge.
//! This module parses that challenge, resolves which credentials to present
//! and exchanges them at the token endpoint for a bearer token.

use crate::client::Client;
use crate::error::{DockhandError, Result};
use serde::Deserialize;

pub mod store;

pub use store::{CredentialStore, FileCredentialStore, MemoryCredentialStore};



/// Credentials presented to a registry's token endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    /// No authentication (anonymous pull)
    Anonymous,

    /// HTTP Basic authentication with username and password
    Basic {
        /// Username for authentication
        username: String,
        /// Password for authentication
        password: String,
    },

    /// A pre-encoded `base64(username:password)` token, as stored in Docker-style config files
    Encoded {
        /// The base64 token
        token: String,
    },
}

impl Credentials {
    /// Creates anonymous credentials.
    pub fn anonymous() -> Self {
        Self::Anonymous
    }

    /// Creates Basic authentication credentials.
    ///
    /// # Examples
    ///
    /// ```
    /// use libdockhand::auth::Credentials;
    ///
    /// let creds = Credentials::basic("username", "password");
    /// ```
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Basic {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Creates credentials from a pre-encoded basic-auth token.
    pub fn encoded(token: impl Into<String>) -> Self {
        Self::Encoded {
            token: token.into(),
        }
    }

    /// Returns the Authorization header value for these credentials.
    ///
    /// # Examples
    ///
    /// ```
    /// use libdockhand::auth::Credentials;
    ///
    /// let creds = Credentials::basic("user", "pass");
    /// assert_eq!(creds.to_header_value().unwrap(), "Basic dXNlcjpwYXNz");
    /// ```
    pub fn to_header_value(&self) -> Option<String> {
        match self {
            Self::Anonymous => None,
            Self::Basic { username, password } => Some(format!(
                "Basic {}",
                encode_basic_token(username, password)
            )),
            Self::Encoded { token } => Some(format!("Basic {}", token)),
        }
    }
}

/// Encodes `username:password` the way Docker-style config files store it.
pub fn encode_basic_token(username: &str, password: &str) -> String {
    use base64::{Engine as _, engine::general_purpose};
    general_purpose::STANDARD.encode(format!("{}:{}", username, password))
}

/// Picks the credentials to present: explicit ones win, then the store's
/// entry for `registry`, then anonymous.
pub fn resolve_credentials(
    explicit: Option<&Credentials>,
    store: &dyn CredentialStore,
    registry: &str,
) -> Credentials {
    match explicit {
        Some(credentials) if *credentials != Credentials::Anonymous => credentials.clone(),
        _ => store
            .lookup(registry)
            .map(Credentials::encoded)
            .unwrap_or(Credentials::Anonymous),
    }
}

/// Information parsed from a WWW-Authenticate header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChallenge {
    /// The authentication scheme (e.g., "Bearer")
    pub scheme: String,

    /// The authentication realm
    pub realm: String,

    /// The service identifier
    pub service: Option<String>,

    /// The scope being requested
    pub scope: Option<String>,
}

impl AuthChallenge {
    /// Parses a WWW-Authenticate header value.
    ///
    /// Quoted values may contain commas (`scope="repository:app:pull,push"`).
    ///
    /// # Examples
    ///
    /// ```
    /// use libdockhand::auth::AuthChallenge;
    ///
    /// let header = r#"Bearer realm="https://auth.example.com/token",service="registry""#;
    /// let challenge = AuthChallenge::parse(header).unwrap();
    /// assert_eq!(challenge.scheme, "Bearer");
    /// ```
    pub fn parse(header: &str) -> Result<Self> {
        let header = header.trim();

        let (scheme, params) = header.split_once(' ').ok_or_else(|| {
            DockhandError::authentication("Invalid WWW-Authenticate header format", None)
        })?;

        let mut realm = None;
        let mut service = None;
        let mut scope = None;

        for (key, value) in split_params(params) {
            match key.as_str() {
                "realm" => realm = Some(value),
                "service" => service = Some(value),
                "scope" => scope = Some(value),
                _ => {}
            }
        }

        let realm = realm.ok_or_else(|| {
            DockhandError::authentication(
                "WWW-Authenticate header missing required 'realm' parameter",
                None,
            )
        })?;

        Ok(Self {
            scheme: scheme.to_string(),
            realm,
            service,
            scope,
        })
    }

    /// Parses a challenge and requires the `Bearer` scheme.
    pub fn parse_bearer(header: &str) -> Result<Self> {
        let challenge = Self::parse(header)?;
        if !challenge.scheme.eq_ignore_ascii_case("bearer") {
            return Err(DockhandError::authentication(
                format!(
                    "Unsupported authentication scheme '{}', expected Bearer",
                    challenge.scheme
                ),
                None,
            ));
        }
        Ok(challenge)
    }

    /// Returns the challenge with its scope actions upgraded to `pull,push`.
    ///
    /// `repository:team/app:pull` becomes `repository:team/app:pull,push`;
    /// without a scope, one is built for `repository`.
    pub fn with_push_scope(mut self, repository: &str) -> Self {
        let scope = match self.scope.as_deref() {
            Some(scope) => match scope.rsplit_once(':') {
                Some((resource, _actions)) => format!("{}:pull,push", resource),
                None => format!("{}:pull,push", scope),
            },
            None => format!("repository:{}:pull,push", repository),
        };
        self.scope = Some(scope);
        self
    }

    /// Builds the token endpoint URL from the realm, service and scope.
    pub fn token_url(&self) -> Result<url::Url> {
        let mut url = url::Url::parse(&self.realm).map_err(|e| {
            DockhandError::authentication(
                format!("Invalid token realm '{}': {}", self.realm, e),
                None,
            )
        })?;
        let params = [("service", &self.service), ("scope", &self.scope)];
        // A realm-only challenge keeps its URL untouched, without a bare `?`
        if params.iter().any(|(_, value)| value.is_some()) {
            let mut query = url.query_pairs_mut();
            for (key, value) in params {
                if let Some(value) = value {
                    query.append_pair(key, value);
                }
            }
        }
        Ok(url)
    }
}

/// Splits `key="value",key=value` pairs, honouring quotes.
fn split_params(params: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    let mut key = String::new();
    let mut value = String::new();
    let mut in_value = false;
    let mut in_quotes = false;

    for c in params.chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            '=' if !in_value && !in_quotes => in_value = true,
            ',' if !in_quotes => {
                if in_value {
                    pairs.push((key.trim().to_string(), value.trim().to_string()));
                }
                key.clear();
                value.clear();
                in_value = false;
            }
            _ if in_value => value.push(c),
            _ => key.push(c),
        }
    }
    if in_value {
        pairs.push((key.trim().to_string(), value.trim().to_string()));
    }

    pairs
}

/// Body returned by a token endpoint.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
}

/// Exchanges `credentials` for a bearer token at the endpoint named by `challenge`.
///
/// # Errors
///
/// Returns an authentication error if the challenge is not a Bearer challenge,
/// the endpoint answers with a non-success status, or the body carries neither
/// `token` nor `access_token`.
pub async fn fetch_token(
    client: &Client,
    challenge: &AuthChallenge,
    credentials: &Credentials,
) -> Result<String> {
    if !challenge.scheme.eq_ignore_ascii_case("bearer") {
        return Err(DockhandError::authentication(
            format!("Cannot exchange a '{}' challenge for a token", challenge.scheme),
            None,
        ));
    }

    let url = challenge.token_url()?;
    let mut request = client.http().get(url.clone());
    if let Some(auth_header) = credentials.to_header_value() {
        request = request.header(reqwest::header::AUTHORIZATION, auth_header);
    }

    let response = client.send(request).await?;
    if !response.status.is_success() {
        return Err(DockhandError::authentication(
            format!(
                "Token endpoint {} rejected the credentials: {}",
                challenge.realm,
                response.text()
            ),
            Some(response.status.as_u16()),
        ));
    }

    let body: TokenResponse = response.json()?;
    body.token
        .or(body.access_token)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| {
            DockhandError::authentication(
                format!("Token endpoint {} returned no token", challenge.realm),
                Some(response.status.as_u16()),
            )
        })
}
