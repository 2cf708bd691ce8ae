// src/gateway.rs

use crate::cache::KeySetSnapshot;
use crate::config::Config;
use crate::error::{FetchError, NilaGateError, Rejection, RejectionKind};
use crate::validator::{TokenVerifier, VerificationOutcome};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

const BEARER: &str = "Bearer";

/// The inbound authentication surface.
///
/// Turns an `Authorization` header value into a [`VerificationOutcome`]. Share one
/// gateway per identity provider (e.g. behind an `Arc`); dropping it stops the
/// background refresher, if one was started.
pub struct Gateway {
    verifier: TokenVerifier,
    refresher: Option<JoinHandle<()>>,
}

impl Gateway {
    /// Builds the HTTP fetcher, key set cache and verifier described by `config`.
    ///
    /// With `background_refresh` enabled this must run inside a Tokio runtime.
    pub fn new(config: Config) -> Result<Self, NilaGateError> {
        let verifier = TokenVerifier::from_config(&config)?;
        if config.key_source.background_refresh {
            if tokio::runtime::Handle::try_current().is_err() {
                return Err(NilaGateError::InvalidConfiguration(
                    "background refresh requires a Tokio runtime".to_string(),
                ));
            }
            let refresher = verifier.key_set().spawn_refresher();
            return Ok(Self {
                verifier,
                refresher: Some(refresher),
            });
        }
        Ok(Self::with_verifier(verifier))
    }

    /// Wraps an already wired verifier. No background refresher is started.
    pub fn with_verifier(verifier: TokenVerifier) -> Self {
        Self {
            verifier,
            refresher: None,
        }
    }

    pub fn verifier(&self) -> &TokenVerifier {
        &self.verifier
    }

    /// Fetches the key set eagerly, so the first request does not pay for it.
    pub async fn warm_up(&self) -> Result<Arc<KeySetSnapshot>, FetchError> {
        self.verifier.key_set().refresh().await
    }

    /// Authenticates one request from its `Authorization` header value.
    #[instrument(skip_all)]
    pub async fn authenticate(&self, authorization: Option<&str>) -> VerificationOutcome {
        let outcome = match bearer_token(authorization) {
            Ok(token) => self.verifier.verify(token).await,
            Err(rejection) => Err(rejection),
        };

        match &outcome {
            Ok(identity) => debug!(sub = %identity.subject, "Request authenticated"),
            Err(rejection) => log_rejection(rejection),
        }
        outcome
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        if let Some(refresher) = self.refresher.take() {
            refresher.abort();
        }
    }
}

/// Extracts the token from `Bearer <token>`. The scheme is case-insensitive.
fn bearer_token(authorization: Option<&str>) -> Result<&str, Rejection> {
    let value = authorization.ok_or_else(|| Rejection::malformed("missing Authorization header"))?;
    let (scheme, token) = value
        .trim()
        .split_once(' ')
        .ok_or_else(|| Rejection::malformed("Authorization header is not a bearer credential"))?;
    if !scheme.eq_ignore_ascii_case(BEARER) {
        return Err(Rejection::malformed(
            "Authorization header is not a bearer credential",
        ));
    }
    let token = token.trim();
    if token.is_empty() {
        return Err(Rejection::malformed("empty bearer token"));
    }
    Ok(token)
}

// Fetch failures point at the provider, not the caller, so they are worth a warning.
fn log_rejection(rejection: &Rejection) {
    let kind = rejection.kind();
    match kind {
        RejectionKind::KeyFetchFailed => warn!(%kind, "Request rejected: {}", rejection),
        _ => debug!(%kind, "Request rejected"),
    }
}
