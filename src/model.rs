// src/model.rs

use jsonwebtoken::{Algorithm, DecodingKey};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Represents a single JSON Web Key (JWK) as defined in RFC 7517.
///
/// Every field is optional so that one incomplete entry cannot make the
/// whole key set document fail to deserialize.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct JsonWebKey {
    pub kid: Option<String>,
    pub kty: Option<String>,
    #[serde(rename = "use")]
    pub use_purpose: Option<String>,
    pub alg: Option<String>,
    // RSA
    pub n: Option<String>,
    pub e: Option<String>,
    // EC
    pub crv: Option<String>,
    pub x: Option<String>,
    pub y: Option<String>,
}

/// Represents a JSON Web Key Set (JWKS), which is a collection of JWKs.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct JsonWebKeySet {
    pub keys: Vec<JsonWebKey>,
}

/// Why a JWK entry was left out of a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnusableKey {
    MissingKeyId,
    NotForSigning(String),
    UnsupportedKeyType(String),
    UnsupportedAlgorithm(String),
    InvalidMaterial(String),
}

impl fmt::Display for UnusableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnusableKey::MissingKeyId => write!(f, "entry has no 'kid'"),
            UnusableKey::NotForSigning(u) => write!(f, "key use '{u}' is not 'sig'"),
            UnusableKey::UnsupportedKeyType(kty) => write!(f, "key type '{kty}' is not supported"),
            UnusableKey::UnsupportedAlgorithm(alg) => write!(f, "algorithm '{alg}' is not supported"),
            UnusableKey::InvalidMaterial(reason) => write!(f, "invalid key material: {reason}"),
        }
    }
}

/// A public verification key published by the identity provider.
#[derive(Clone)]
pub struct SigningKey {
    key_id: String,
    algorithm: Algorithm,
    material: DecodingKey,
}

impl SigningKey {
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn material(&self) -> &DecodingKey {
        &self.material
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("key_id", &self.key_id)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl TryFrom<&JsonWebKey> for SigningKey {
    type Error = UnusableKey;

    fn try_from(jwk: &JsonWebKey) -> Result<Self, Self::Error> {
        let key_id = jwk.kid.clone().ok_or(UnusableKey::MissingKeyId)?;

        if let Some(purpose) = jwk.use_purpose.as_deref() {
            if purpose != "sig" {
                return Err(UnusableKey::NotForSigning(purpose.to_string()));
            }
        }

        let kty = jwk.kty.as_deref().unwrap_or_default();
        let (algorithm, material) = match kty {
            "RSA" => {
                let algorithm = declared_algorithm(jwk, Algorithm::RS256)?;
                if !is_rsa(algorithm) {
                    return Err(UnusableKey::UnsupportedAlgorithm(format!("{algorithm:?}")));
                }
                let n = jwk.n.as_deref().ok_or_else(|| {
                    UnusableKey::InvalidMaterial("RSA key missing 'n' component".to_string())
                })?;
                let e = jwk.e.as_deref().ok_or_else(|| {
                    UnusableKey::InvalidMaterial("RSA key missing 'e' component".to_string())
                })?;
                let material = DecodingKey::from_rsa_components(n, e)
                    .map_err(|e| UnusableKey::InvalidMaterial(e.to_string()))?;
                (algorithm, material)
            }
            "EC" => {
                let curve_default = match jwk.crv.as_deref() {
                    Some("P-256") => Algorithm::ES256,
                    Some("P-384") => Algorithm::ES384,
                    Some(other) => return Err(UnusableKey::UnsupportedKeyType(format!("EC/{other}"))),
                    None => {
                        return Err(UnusableKey::InvalidMaterial(
                            "EC key missing 'crv'".to_string(),
                        ))
                    }
                };
                let algorithm = declared_algorithm(jwk, curve_default)?;
                if algorithm != curve_default {
                    return Err(UnusableKey::UnsupportedAlgorithm(format!("{algorithm:?}")));
                }
                let x = jwk.x.as_deref().ok_or_else(|| {
                    UnusableKey::InvalidMaterial("EC key missing 'x' coordinate".to_string())
                })?;
                let y = jwk.y.as_deref().ok_or_else(|| {
                    UnusableKey::InvalidMaterial("EC key missing 'y' coordinate".to_string())
                })?;
                let material = DecodingKey::from_ec_components(x, y)
                    .map_err(|e| UnusableKey::InvalidMaterial(e.to_string()))?;
                (algorithm, material)
            }
            other => return Err(UnusableKey::UnsupportedKeyType(other.to_string())),
        };

        Ok(SigningKey {
            key_id,
            algorithm,
            material,
        })
    }
}

/// Parses the entry's `alg`, falling back to the key type's default when absent.
fn declared_algorithm(jwk: &JsonWebKey, default: Algorithm) -> Result<Algorithm, UnusableKey> {
    match jwk.alg.as_deref() {
        None => Ok(default),
        Some(alg) => {
            let algorithm = Algorithm::from_str(alg)
                .map_err(|_| UnusableKey::UnsupportedAlgorithm(alg.to_string()))?;
            if is_asymmetric(algorithm) {
                Ok(algorithm)
            } else {
                Err(UnusableKey::UnsupportedAlgorithm(alg.to_string()))
            }
        }
    }
}

fn is_rsa(algorithm: Algorithm) -> bool {
    matches!(
        algorithm,
        Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512
    )
}

/// True for public-key signature algorithms. HMAC algorithms are never acceptable
/// for tokens minted by a remote identity provider.
pub fn is_asymmetric(algorithm: Algorithm) -> bool {
    !matches!(
        algorithm,
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
    )
}
