// src/validator.rs

use crate::cache::KeySetCache;
use crate::claims::Claims;
use crate::client::HttpKeySetFetcher;
use crate::clock::{Clock, SystemClock};
use crate::config::{Config, ValidationDetails};
use crate::error::{NilaGateError, Rejection};
use crate::record::Identity;
use base64::engine::{general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::Algorithm;
use serde::Deserialize;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, instrument};

/// The result handed to the request pipeline.
pub type VerificationOutcome = Result<Identity, Rejection>;

/// The subset of the JOSE header the verifier reads.
#[derive(Debug, Deserialize)]
struct TokenHeader {
    alg: String,
    kid: Option<String>,
}

/// Verifies bearer tokens against the identity provider's published keys.
///
/// Create one per identity provider and share it; the only state it carries
/// between calls is its key set cache.
#[derive(Clone)]
pub struct TokenVerifier {
    expected_issuer: String,
    validation: ValidationDetails,
    keys: KeySetCache,
    clock: Arc<dyn Clock>,
}

impl TokenVerifier {
    pub fn new(
        expected_issuer: impl Into<String>,
        validation: ValidationDetails,
        keys: KeySetCache,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            expected_issuer: expected_issuer.into(),
            validation,
            keys,
            clock,
        }
    }

    /// Wires an HTTP-backed key set cache and the system clock from `config`.
    pub fn from_config(config: &Config) -> Result<Self, NilaGateError> {
        let fetcher =
            HttpKeySetFetcher::new(config.jwks_uri()?, config.key_source.fetch_timeout)?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let keys = KeySetCache::new(
            Arc::new(fetcher),
            config.key_source.clone(),
            Arc::clone(&clock),
        );
        Ok(Self::new(
            config.issuer(),
            config.validation.clone(),
            keys,
            clock,
        ))
    }

    pub fn key_set(&self) -> &KeySetCache {
        &self.keys
    }

    pub fn expected_issuer(&self) -> &str {
        &self.expected_issuer
    }

    /// Verifies a raw token.
    ///
    /// The checks run in a fixed order and stop at the first failure:
    /// 1. Three non-empty segments.
    /// 2. Header decodes and carries a `kid`.
    /// 3. The key set cache resolves the `kid`.
    /// 4. The declared algorithm is on the allow-list and matches the key.
    /// 5. The signature verifies.
    /// 6. The payload decodes into claims.
    /// 7. `exp`/`nbf`/`iat` against the clock, then issuer, then audience.
    ///
    /// The allow-list check must stay ahead of signature verification so that a
    /// token can never choose the algorithm its key material is used with.
    #[instrument(skip_all)]
    pub async fn verify(&self, token: &str) -> VerificationOutcome {
        // 1. Structure.
        let (header_segment, payload_segment, signature_segment) = split_token(token)?;

        // 2. Header.
        let header: TokenHeader = decode_segment(header_segment)
            .map_err(|e| Rejection::malformed(format!("header: {e}")))?;
        let kid = header
            .kid
            .as_deref()
            .filter(|kid| !kid.is_empty())
            .ok_or_else(|| Rejection::malformed("header is missing 'kid'"))?;

        // 3. Key.
        let key = self.keys.resolve(kid).await.map_err(Rejection::from)?;

        // 4. Algorithm allow-list, independent of anything the token claims about itself.
        let algorithm = Algorithm::from_str(&header.alg)
            .map_err(|_| Rejection::DisallowedAlgorithm(header.alg.clone()))?;
        if !self.validation.algorithms.contains(&algorithm) || algorithm != key.algorithm() {
            return Err(Rejection::DisallowedAlgorithm(header.alg));
        }

        // 5. Signature over `header.payload`.
        let signed_len = header_segment.len() + 1 + payload_segment.len();
        let message = token
            .get(..signed_len)
            .ok_or_else(|| Rejection::malformed("token segments"))?;
        let verified = jsonwebtoken::crypto::verify(
            signature_segment,
            message.as_bytes(),
            key.material(),
            algorithm,
        )
        .unwrap_or(false);
        if !verified {
            return Err(Rejection::InvalidSignature);
        }

        // 6. Claims.
        let claims: Claims = decode_segment(payload_segment)
            .map_err(|e| Rejection::malformed(format!("payload: {e}")))?;

        // 7. Semantic checks.
        self.validate_claims(&claims)?;

        debug!(sub = %claims.sub, "Token verified");
        Ok(Identity::new(claims))
    }

    fn validate_claims(&self, claims: &Claims) -> Result<(), Rejection> {
        let now = self.clock.now().timestamp();
        let leeway = i64::try_from(self.validation.leeway.as_secs()).unwrap_or(i64::MAX);

        if claims.exp.saturating_add(leeway) < now {
            return Err(Rejection::Expired {
                expired_at: claims.exp,
            });
        }
        for valid_from in [claims.nbf, claims.iat].into_iter().flatten() {
            if valid_from.saturating_sub(leeway) > now {
                return Err(Rejection::NotYetValid { valid_from });
            }
        }

        if claims.iss != self.expected_issuer {
            return Err(Rejection::IssuerMismatch);
        }

        if let Some(expected) = &self.validation.expected_audience {
            if !claims.is_addressed_to(expected) {
                return Err(Rejection::AudienceMismatch);
            }
        }

        Ok(())
    }
}

/// Splits a compact JWS into exactly three non-empty segments.
fn split_token(token: &str) -> Result<(&str, &str, &str), Rejection> {
    let mut segments = token.split('.');
    match (segments.next(), segments.next(), segments.next(), segments.next()) {
        (Some(header), Some(payload), Some(signature), None)
            if !header.is_empty() && !payload.is_empty() && !signature.is_empty() =>
        {
            Ok((header, payload, signature))
        }
        _ => Err(Rejection::malformed("expected three non-empty segments")),
    }
}

fn decode_segment<T: serde::de::DeserializeOwned>(segment: &str) -> Result<T, String> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| e.to_string())?;
    serde_json::from_slice(&bytes).map_err(|e| e.to_string())
}
