// src/error.rs

use thiserror::Error;

/// Errors raised while configuring or constructing the gateway.
#[derive(Debug, Error)]
pub enum NilaGateError {
    /// A provided URL could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// A required configuration field is missing.
    #[error("A required configuration field is missing: {0}")]
    MissingConfiguration(String),

    /// A configuration value is invalid.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The HTTP client used for key set fetches could not be built.
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// A failure reaching the identity provider or reading its key set document.
///
/// Cloneable so a single in-flight refresh can hand the same failure to every waiter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("key set request failed: {0}")]
    Transport(String),

    #[error("key set request timed out")]
    Timeout,

    #[error("key set endpoint returned HTTP {0}")]
    Status(u16),

    #[error("key set document is malformed: {0}")]
    MalformedDocument(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else if err.is_decode() {
            FetchError::MalformedDocument(err.to_string())
        } else {
            FetchError::Transport(err.to_string())
        }
    }
}

/// Why the key set cache could not produce a key.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeyLookupError {
    /// The key id is absent from a successfully refreshed key set.
    #[error("signing key not found in the published key set")]
    NotFound,

    /// The key set could not be refreshed and no cached key satisfies the lookup.
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

/// Classification of a rejected token, safe to log and to branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectionKind {
    Malformed,
    UnknownKey,
    KeyFetchFailed,
    DisallowedAlgorithm,
    InvalidSignature,
    Expired,
    NotYetValid,
    IssuerMismatch,
    AudienceMismatch,
}

impl RejectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionKind::Malformed => "malformed",
            RejectionKind::UnknownKey => "unknown_key",
            RejectionKind::KeyFetchFailed => "key_fetch_failed",
            RejectionKind::DisallowedAlgorithm => "disallowed_algorithm",
            RejectionKind::InvalidSignature => "invalid_signature",
            RejectionKind::Expired => "expired",
            RejectionKind::NotYetValid => "not_yet_valid",
            RejectionKind::IssuerMismatch => "issuer_mismatch",
            RejectionKind::AudienceMismatch => "audience_mismatch",
        }
    }
}

impl std::fmt::Display for RejectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A token the gateway refused.
///
/// Every variant is terminal for the request. The `Display` text is meant for
/// internal logs; callers answering the client should use [`Rejection::public_message`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Rejection {
    /// The header, token or claims are structurally invalid.
    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("token was signed with a key the identity provider does not publish")]
    UnknownKey,

    #[error("could not fetch the identity provider key set: {0}")]
    KeyFetchFailed(FetchError),

    /// The declared algorithm is not on the server-side allow-list or does not match the key.
    #[error("algorithm {0} is not allowed")]
    DisallowedAlgorithm(String),

    #[error("token signature does not verify")]
    InvalidSignature,

    #[error("token expired at {expired_at}")]
    Expired { expired_at: i64 },

    #[error("token is not valid before {valid_from}")]
    NotYetValid { valid_from: i64 },

    #[error("token issuer does not match the configured identity provider")]
    IssuerMismatch,

    #[error("token audience does not include the expected audience")]
    AudienceMismatch,
}

impl Rejection {
    pub fn kind(&self) -> RejectionKind {
        match self {
            Rejection::Malformed(_) => RejectionKind::Malformed,
            Rejection::UnknownKey => RejectionKind::UnknownKey,
            Rejection::KeyFetchFailed(_) => RejectionKind::KeyFetchFailed,
            Rejection::DisallowedAlgorithm(_) => RejectionKind::DisallowedAlgorithm,
            Rejection::InvalidSignature => RejectionKind::InvalidSignature,
            Rejection::Expired { .. } => RejectionKind::Expired,
            Rejection::NotYetValid { .. } => RejectionKind::NotYetValid,
            Rejection::IssuerMismatch => RejectionKind::IssuerMismatch,
            Rejection::AudienceMismatch => RejectionKind::AudienceMismatch,
        }
    }

    /// The only text a rejected caller ever sees, whatever the kind.
    pub fn public_message(&self) -> &'static str {
        "Unauthorized"
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Rejection::Malformed(reason.into())
    }
}

impl From<KeyLookupError> for Rejection {
    fn from(err: KeyLookupError) -> Self {
        match err {
            KeyLookupError::NotFound => Rejection::UnknownKey,
            KeyLookupError::Fetch(e) => Rejection::KeyFetchFailed(e),
        }
    }
}
