//! Per-reference registry session.
//!
//! A [`Registry`] binds one [`ImageReference`] to the collaborators every
//! operation needs: the HTTP client, the credential store and the blob
//! cache. It owns the session's bearer token and the memoised manifest and
//! config lookups, so repeated calls on the same session never re-fetch.
//!
//! Operations are grouped by concern in sibling modules: manifests in
//! [`crate::manifest`], blobs in [`crate::blob`], archives in
//! [`crate::archive`] and listings in [`crate::list`].

use crate::auth::{self, AuthChallenge, CredentialStore, Credentials, MemoryCredentialStore};
use crate::cache::{BlobCache, NoCache};
use crate::client::{Client, RawResponse};
use crate::error::{DockhandError, Result};
use crate::memo::Memo;
use crate::oci::{ImageManifest, Platform};
use crate::reference::ImageReference;
use reqwest::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use reqwest::{RequestBuilder, Response, StatusCode};
use std::sync::{Arc, RwLock};


/// A session against one image reference.
///
/// # Examples
///
/// ```no_run
/// use libdockhand::client::Client;
/// use libdockhand::registry::Registry;
/// use libdockhand::ImageReference;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let registry = Registry::new(ImageReference::parse("alpine:3.19"), Client::new()?);
/// let layers = registry.get_layer_digests(None).await?;
/// println!("{} layers", layers.len());
/// # Ok(())
/// # }
/// ```
pub struct Registry {
    reference: ImageReference,
    client: Client,
    credential_store: Arc<dyn CredentialStore>,
    blob_cache: Arc<dyn BlobCache>,
    /// Explicit credentials; take priority over the store
    credentials: Option<Credentials>,
    /// Bearer token of this session, never persisted
    token: RwLock<Option<String>>,
    pub(crate) manifests: Memo<bool, RawResponse>,
    pub(crate) resolved: Memo<Option<Platform>, ImageManifest>,
    pub(crate) configs: Memo<Option<Platform>, Vec<u8>>,
}

impl Registry {
    /// Creates a session with an empty credential store and no blob cache.
    pub fn new(reference: ImageReference, client: Client) -> Self {
        Self {
            reference,
            client,
            credential_store: Arc::new(MemoryCredentialStore::new()),
            blob_cache: Arc::new(NoCache),
            credentials: None,
            token: RwLock::new(None),
            manifests: Memo::new(),
            resolved: Memo::new(),
            configs: Memo::new(),
        }
    }

    /// Uses `store` to look up credentials for the registry host.
    pub fn with_credential_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.credential_store = store;
        self
    }

    /// Uses `cache` for blob pulls.
    pub fn with_blob_cache(mut self, cache: Arc<dyn BlobCache>) -> Self {
        self.blob_cache = cache;
        self
    }

    /// Presents `credentials` instead of the stored ones.
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Returns the reference this session is bound to.
    pub fn reference(&self) -> &ImageReference {
        &self.reference
    }

    /// Returns the HTTP client.
    pub fn client(&self) -> &Client {
        &self.client
    }

    pub(crate) fn blob_cache(&self) -> &dyn BlobCache {
        self.blob_cache.as_ref()
    }

    /// Returns the current bearer token, if the session has authenticated.
    pub fn token(&self) -> Option<String> {
        self.token.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Negotiates a bearer token and stores it on the session.
    ///
    /// Without a `challenge`, an unauthenticated `GET /v2/` is issued and its
    /// `WWW-Authenticate` header is used. With `push`, the challenge scope is
    /// upgraded to `pull,push`.
    ///
    /// # Errors
    ///
    /// Returns an authentication error if no Bearer challenge is offered or
    /// the token endpoint rejects the credentials.
    pub async fn authenticate(&self, challenge: Option<&str>, push: bool) -> Result<String> {
        let header = match challenge {
            Some(header) => header.to_string(),
            None => self.probe_challenge().await?,
        };

        let mut challenge = AuthChallenge::parse_bearer(&header)?;
        if push {
            challenge = challenge.with_push_scope(self.reference.repository());
        }

        let credentials = auth::resolve_credentials(
            self.credentials.as_ref(),
            self.credential_store.as_ref(),
            self.reference.registry(),
        );
        let token = auth::fetch_token(&self.client, &challenge, &credentials).await?;

        *self.token.write().unwrap_or_else(|e| e.into_inner()) = Some(token.clone());
        tracing::info!(
            registry = self.reference.registry(),
            scope = challenge.scope.as_deref().unwrap_or_default(),
            "authenticated"
        );
        Ok(token)
    }

    /// Reads the challenge from an unauthenticated `GET /v2/`.
    async fn probe_challenge(&self) -> Result<String> {
        let url = format!("{}/", self.reference.v2_url());
        let response = self.client.send(self.client.http().get(&url)).await?;

        response
            .header(WWW_AUTHENTICATE.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                DockhandError::authentication(
                    format!(
                        "Registry {} answered {} without an authentication challenge",
                        self.reference.registry(),
                        response.status.as_u16()
                    ),
                    Some(response.status.as_u16()),
                )
            })
    }

    /// Adds the session token to a request, if there is one.
    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.token() {
            Some(token) => request.header(AUTHORIZATION, format!("Bearer {}", token)),
            None => request,
        }
    }

    /// Sends a request, re-authenticating once on `401`.
    ///
    /// `build` is called again for the retry. A second `401` is an
    /// authentication error; no third request is made.
    pub(crate) async fn send_streaming<F>(&self, build: F, push: bool) -> Result<Response>
    where
        F: Fn(&reqwest::Client) -> RequestBuilder,
    {
        let response = self
            .client
            .send_streaming(self.authorize(build(self.client.http())))
            .await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let challenge = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let url = response.url().to_string();
        drop(response);

        tracing::debug!(%url, "unauthorized, negotiating a token");
        self.authenticate(challenge.as_deref(), push).await?;

        let retried = self
            .client
            .send_streaming(self.authorize(build(self.client.http())))
            .await?;
        if retried.status() == StatusCode::UNAUTHORIZED {
            return Err(DockhandError::authentication(
                format!("Still unauthorized for {} after authenticating", url),
                Some(401),
            ));
        }
        Ok(retried)
    }

    /// Buffered variant of [`Registry::send_streaming`].
    pub(crate) async fn send<F>(&self, build: F, push: bool) -> Result<RawResponse>
    where
        F: Fn(&reqwest::Client) -> RequestBuilder,
    {
        let response = self.send_streaming(build, push).await?;
        self.client.buffer(response).await
    }
}
