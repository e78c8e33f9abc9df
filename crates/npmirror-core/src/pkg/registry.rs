//! npm registry access.
//!
//! The engine only sees the [`Registry`] trait. [`HttpRegistry`] talks to a
//! real registry over HTTP; [`super::memory::MemoryRegistry`] serves fixtures
//! from memory.

use super::error::MirrorError;
use super::metadata::PackageMetadata;
use super::npmrc::{resolve_scoped_registries, NpmrcConfig};
use crate::version::USER_AGENT;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, RequestBuilder, StatusCode};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Default npm registry URL.
pub const DEFAULT_REGISTRY: &str = "https://registry.npmjs.org/";

/// Environment variable to override registry URL.
pub const REGISTRY_ENV: &str = "NPMIRROR_REGISTRY";

/// Maximum tarball size (200 MB).
pub const MAX_TARBALL_SIZE: u64 = 200 * 1024 * 1024;

/// Source of packuments and tarballs.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Fetch the packument for `name`.
    ///
    /// Fails with a not-found error when the package does not exist and with a
    /// network error for anything transient.
    async fn fetch_metadata(&self, name: &str) -> Result<PackageMetadata, MirrorError>;

    /// Fetch the tarball at `url`.
    async fn fetch_tarball(&self, url: &str) -> Result<Bytes, MirrorError>;
}

#[derive(Debug, Clone)]
struct Endpoint {
    base_url: Url,
    auth_token: Option<String>,
}

/// Registry client over HTTP.
#[derive(Debug, Clone)]
pub struct HttpRegistry {
    default: Endpoint,
    /// Scope (`@org`) → endpoint, from `.npmrc`.
    scoped: HashMap<String, Endpoint>,
    http: Client,
    max_tarball_bytes: u64,
}

impl HttpRegistry {
    /// Create a new registry client with the given base URL.
    ///
    /// # Errors
    /// Returns an error if the URL is invalid or the HTTP client cannot be created.
    pub fn new(base_url: &str) -> Result<Self, MirrorError> {
        let base_url = parse_base_url(base_url)?;

        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(120))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| MirrorError::network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            default: Endpoint {
                base_url,
                auth_token: None,
            },
            scoped: HashMap::new(),
            http,
            max_tarball_bytes: MAX_TARBALL_SIZE,
        })
    }

    /// Send `token` as a bearer token to the default registry.
    #[must_use]
    pub fn with_auth_token(mut self, token: Option<String>) -> Self {
        self.default.auth_token = token;
        self
    }

    /// Route scoped packages and attach tokens as configured in `.npmrc`.
    #[must_use]
    pub fn with_npmrc(mut self, npmrc: &NpmrcConfig) -> Self {
        if self.default.auth_token.is_none() {
            self.default.auth_token = npmrc.token_for(&self.default.base_url);
        }

        for scoped in resolve_scoped_registries(npmrc) {
            self.scoped.insert(
                scoped.scope,
                Endpoint {
                    base_url: scoped.registry_url,
                    auth_token: scoped.auth_token,
                },
            );
        }
        self
    }

    /// Override the tarball size limit.
    #[must_use]
    pub fn with_max_tarball_bytes(mut self, max: u64) -> Self {
        self.max_tarball_bytes = max;
        self
    }

    /// Get the default base URL.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.default.base_url
    }

    fn endpoint_for(&self, name: &str) -> &Endpoint {
        name.split_once('/')
            .filter(|(scope, _)| scope.starts_with('@'))
            .and_then(|(scope, _)| self.scoped.get(scope))
            .unwrap_or(&self.default)
    }

    /// Bearer token for a tarball URL: only sent to a host we have a token for.
    fn token_for_url(&self, url: &Url) -> Option<&str> {
        std::iter::once(&self.default)
            .chain(self.scoped.values())
            .find(|e| e.auth_token.is_some() && e.base_url.host_str() == url.host_str())
            .and_then(|e| e.auth_token.as_deref())
    }

    /// URL of the packument for `name`.
    ///
    /// # Errors
    /// Returns an error if the URL cannot be built.
    pub fn metadata_url(&self, name: &str) -> Result<Url, MirrorError> {
        // URL-encode the name for scoped packages
        let encoded_name = if name.starts_with('@') {
            name.replace('/', "%2F")
        } else {
            name.to_string()
        };

        self.endpoint_for(name)
            .base_url
            .join(&encoded_name)
            .map_err(|e| MirrorError::spec_invalid(format!("Failed to build URL for '{name}': {e}")))
    }
}

fn authorize(request: RequestBuilder, token: Option<&str>) -> RequestBuilder {
    match token {
        Some(token) => request.bearer_auth(token),
        None => request,
    }
}

fn parse_base_url(base_url: &str) -> Result<Url, MirrorError> {
    // Ensure URL has trailing slash for proper joining
    let with_slash = if base_url.ends_with('/') {
        base_url.to_string()
    } else {
        format!("{base_url}/")
    };

    let url = Url::parse(&with_slash)
        .map_err(|e| MirrorError::spec_invalid(format!("Invalid registry URL '{base_url}': {e}")))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(MirrorError::spec_invalid(format!(
            "Invalid registry URL '{base_url}': unsupported scheme '{}'",
            url.scheme()
        )));
    }

    Ok(url)
}

#[async_trait]
impl Registry for HttpRegistry {
    async fn fetch_metadata(&self, name: &str) -> Result<PackageMetadata, MirrorError> {
        let url = self.metadata_url(name)?;
        let endpoint = self.endpoint_for(name);

        debug!(package = %name, url = %url, "Fetching packument");

        let request = authorize(self.http.get(url.as_str()), endpoint.auth_token.as_deref());
        let response = request.send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(MirrorError::not_found(name));
        }

        if !response.status().is_success() {
            return Err(MirrorError::network(format!(
                "Registry returned status {} for '{name}'",
                response.status()
            )));
        }

        let body = response.bytes().await?;
        PackageMetadata::from_slice(body)
    }

    async fn fetch_tarball(&self, url: &str) -> Result<Bytes, MirrorError> {
        let parsed = Url::parse(url)
            .map_err(|e| MirrorError::spec_invalid(format!("Invalid tarball URL '{url}': {e}")))?;

        debug!(url = %url, "Fetching tarball");

        let request = authorize(self.http.get(parsed.as_str()), self.token_for_url(&parsed));
        let response = request
            .send()
            .await
            .map_err(|e| MirrorError::network(format!("Failed to download '{url}': {e}")))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(MirrorError::not_found(url));
        }

        if !response.status().is_success() {
            return Err(MirrorError::network(format!(
                "Download failed with status {} for '{url}'",
                response.status()
            )));
        }

        // Check content length if available
        if let Some(len) = response.content_length() {
            if len > self.max_tarball_bytes {
                return Err(MirrorError::io(format!(
                    "Tarball too large: {len} bytes (max: {})",
                    self.max_tarball_bytes
                )));
            }
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| MirrorError::network(format!("Failed to read response body: {e}")))?;

        if bytes.len() as u64 > self.max_tarball_bytes {
            return Err(MirrorError::io(format!(
                "Tarball too large: {} bytes (max: {})",
                bytes.len(),
                self.max_tarball_bytes
            )));
        }

        Ok(bytes)
    }
}
