//! HTTP access for manifests and file downloads.
//!
//! A single [`HttpClient`] is built per run with connect/read timeouts and
//! the product User-Agent. Manifest fetching goes through the [`Fetch`]
//! trait so the cache layer can be exercised without a network.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use crate::config::NetworkConfig;
use crate::error::BootstrapError;

/// Product name reported in the User-Agent.
pub const PRODUCT_NAME: &str = "Tether";

/// Build the User-Agent header value.
///
/// Format: `<brand> (<product> v<version>, <os>, <arch>)`.
pub fn user_agent(brand: &str, version: &str) -> String {
    format!(
        "{} ({} v{}, {}, {})",
        brand,
        PRODUCT_NAME,
        version,
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}

/// Source of raw manifest documents.
#[async_trait]
pub trait Fetch: Send + Sync {
    /// Fetch the full body at `url`.
    async fn fetch_bytes(&self, url: &str) -> Result<Bytes, BootstrapError>;
}

/// Shared HTTP client configured with timeouts and User-Agent.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
}

impl HttpClient {
    /// Create a client from network settings.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::HttpError`] if the TLS backend cannot be
    /// initialised.
    pub fn new(network: &NetworkConfig, user_agent: &str) -> Result<Self, BootstrapError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(network.connect_timeout_secs))
            .read_timeout(Duration::from_secs(network.read_timeout_secs))
            .user_agent(user_agent)
            .build()
            .map_err(|e| BootstrapError::HttpError(e.to_string()))?;

        Ok(Self { client })
    }

    /// Issue a GET and return the response once the status is known to be successful.
    pub async fn get(&self, url: &str) -> Result<reqwest::Response, BootstrapError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(BootstrapError::DownloadFailed {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }

    /// Get the content length of a URL without downloading it.
    pub async fn content_length(&self, url: &str) -> Result<Option<u64>, BootstrapError> {
        let response = self.client.head(url).send().await?;

        if !response.status().is_success() {
            return Err(BootstrapError::DownloadFailed {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let length = response
            .headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok());

        Ok(length)
    }
}

#[async_trait]
impl Fetch for HttpClient {
    async fn fetch_bytes(&self, url: &str) -> Result<Bytes, BootstrapError> {
        debug!(url, "Fetching document");
        let response = self.get(url).await?;
        let bytes = response.bytes().await?;
        debug!(url, bytes = bytes.len(), "Fetched document");
        Ok(bytes)
    }
}
