// src/client.rs

use crate::error::{FetchError, NilaGateError};
use crate::model::JsonWebKeySet;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

/// Fetches the identity provider's published key set document.
///
/// The cache only talks to the provider through this trait, which lets tests
/// substitute counting or failing fetchers for the network.
#[async_trait]
pub trait KeySetFetcher: Send + Sync {
    async fn fetch(&self) -> Result<JsonWebKeySet, FetchError>;
}

/// Fetches the key set over HTTPS with `reqwest`.
#[derive(Clone, Debug)]
pub struct HttpKeySetFetcher {
    http_client: reqwest::Client,
    jwks_uri: Url,
}

impl HttpKeySetFetcher {
    /// Creates a fetcher whose requests are abandoned after `timeout`.
    pub fn new(jwks_uri: Url, timeout: Duration) -> Result<Self, NilaGateError> {
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(jwks_uri, http_client))
    }

    /// Uses a caller-provided client, e.g. one with custom TLS roots or proxies.
    pub fn with_client(jwks_uri: Url, http_client: reqwest::Client) -> Self {
        Self {
            http_client,
            jwks_uri,
        }
    }

    pub fn jwks_uri(&self) -> &Url {
        &self.jwks_uri
    }
}

#[async_trait]
impl KeySetFetcher for HttpKeySetFetcher {
    #[instrument(skip(self), fields(uri = %self.jwks_uri), err)]
    async fn fetch(&self) -> Result<JsonWebKeySet, FetchError> {
        let response = self.http_client.get(self.jwks_uri.clone()).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = response.bytes().await?;
        let jwks: JsonWebKeySet = serde_json::from_slice(&body)
            .map_err(|e| FetchError::MalformedDocument(e.to_string()))?;

        debug!("Fetched key set document with {} entries", jwks.keys.len());
        Ok(jwks)
    }
}
