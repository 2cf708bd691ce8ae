// src/config.rs

use crate::error::NilaGateError;
use crate::model::is_asymmetric;
use jsonwebtoken::Algorithm;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

const DEFAULT_CACHE_TTL_SECS: u64 = 60 * 60;
const DEFAULT_LEEWAY_SECS: u64 = 60;
const DEFAULT_FETCH_TIMEOUT_MILLIS: u64 = 5_000;
const DEFAULT_REFRESH_COOLDOWN_SECS: u64 = 10;

/// Contains the validation settings applied to every token.
///
/// The algorithm list is the server-side allow-list: whatever a token header
/// declares, only these algorithms are ever used for verification.
#[derive(Clone, Debug)]
pub struct ValidationDetails {
    /// The signing algorithms that are permitted. Only asymmetric algorithms are accepted.
    pub algorithms: Vec<Algorithm>,
    /// The tolerance for clock skew when validating `exp`, `nbf` and `iat`.
    /// Defaults to 60 seconds.
    pub leeway: Duration,
    /// When set, the token's `aud` (or `client_id`) must contain this value.
    pub expected_audience: Option<String>,
}

impl Default for ValidationDetails {
    fn default() -> Self {
        Self {
            algorithms: vec![Algorithm::RS256],
            leeway: Duration::from_secs(DEFAULT_LEEWAY_SECS),
            expected_audience: None,
        }
    }
}

/// How the published key set is fetched and cached.
#[derive(Clone, Debug)]
pub struct KeySourceConfig {
    /// Optional override for the JWKS endpoint URL. If `None`, the URL is derived
    /// from the issuer as `{issuer}/.well-known/jwks.json`.
    pub jwks_uri: Option<Url>,
    /// How long a fetched key set is considered fresh.
    pub cache_ttl: Duration,
    /// How long a key that disappeared from the published set stays usable.
    pub grace_period: Duration,
    /// Minimum age of a fresh key set before an unknown `kid` may trigger another fetch.
    pub refresh_cooldown: Duration,
    /// Upper bound on a single key set fetch.
    pub fetch_timeout: Duration,
    /// Refresh proactively in the background instead of only on demand.
    pub background_refresh: bool,
}

impl Default for KeySourceConfig {
    fn default() -> Self {
        let cache_ttl = Duration::from_secs(DEFAULT_CACHE_TTL_SECS);
        Self {
            jwks_uri: None,
            cache_ttl,
            grace_period: cache_ttl,
            refresh_cooldown: Duration::from_secs(DEFAULT_REFRESH_COOLDOWN_SECS),
            fetch_timeout: Duration::from_millis(DEFAULT_FETCH_TIMEOUT_MILLIS),
            background_refresh: false,
        }
    }
}

/// The main configuration for the gateway.
///
/// It should be constructed using the `ConfigBuilder` or [`Config::from_env`].
#[derive(Clone, Debug)]
pub struct Config {
    /// The user pool identifier, e.g. `eu-west-1_AbCdEf123`.
    pub pool_id: String,
    /// The region hosting the user pool, e.g. `eu-west-1`.
    pub region: String,
    /// The specific validation parameters to apply to the token.
    pub validation: ValidationDetails,
    /// The source for obtaining verification keys.
    pub key_source: KeySourceConfig,
}

impl Config {
    /// The exact `iss` value tokens from the configured pool carry.
    pub fn issuer(&self) -> String {
        format!(
            "https://cognito-idp.{}.amazonaws.com/{}",
            self.region, self.pool_id
        )
    }

    /// The key set endpoint, either the configured override or the pool's well-known URL.
    pub fn jwks_uri(&self) -> Result<Url, NilaGateError> {
        if let Some(uri) = &self.key_source.jwks_uri {
            return Ok(uri.clone());
        }
        let well_known = format!("{}/.well-known/jwks.json", self.issuer());
        Url::parse(&well_known).map_err(|e| NilaGateError::InvalidUrl(e.to_string()))
    }

    /// Loads the configuration from process environment variables.
    ///
    /// | Variable | Fallbacks | Default |
    /// |---|---|---|
    /// | `IDENTITY_PROVIDER_POOL_ID` | `USER_POOL_ID` | required |
    /// | `IDENTITY_PROVIDER_REGION` | `AWS_REGION`, `AWS_DEFAULT_REGION` | required |
    /// | `EXPECTED_AUDIENCE` | `COGNITO_CLIENT_ID` | none |
    /// | `CACHE_TTL_SECONDS` | | 3600 |
    /// | `CLOCK_SKEW_TOLERANCE_SECONDS` | | 60 |
    /// | `FETCH_TIMEOUT_MILLISECONDS` | | 5000 |
    /// | `KEY_GRACE_PERIOD_SECONDS` | | cache TTL |
    /// | `REFRESH_COOLDOWN_SECONDS` | | 10 |
    /// | `JWKS_URI` | | derived from the issuer |
    /// | `ALLOWED_ALGORITHMS` | | `RS256` |
    /// | `BACKGROUND_REFRESH` | | `false` |
    pub fn from_env() -> Result<Self, NilaGateError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`Config::from_env`] with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, NilaGateError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let first = |names: &[&str]| {
            names
                .iter()
                .find_map(|name| lookup(name).filter(|v| !v.trim().is_empty()))
        };

        let mut builder = ConfigBuilder::new();
        if let Some(pool_id) = first(&["IDENTITY_PROVIDER_POOL_ID", "USER_POOL_ID"]) {
            builder = builder.pool_id(pool_id);
        }
        if let Some(region) = first(&[
            "IDENTITY_PROVIDER_REGION",
            "AWS_REGION",
            "AWS_DEFAULT_REGION",
        ]) {
            builder = builder.region(region);
        }
        if let Some(audience) = first(&["EXPECTED_AUDIENCE", "COGNITO_CLIENT_ID"]) {
            builder = builder.audience(audience);
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "CACHE_TTL_SECONDS")? {
            builder = builder.cache_ttl(Duration::from_secs(secs));
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "CLOCK_SKEW_TOLERANCE_SECONDS")? {
            builder = builder.leeway(Duration::from_secs(secs));
        }
        if let Some(millis) = parse_var::<u64>(&lookup, "FETCH_TIMEOUT_MILLISECONDS")? {
            builder = builder.fetch_timeout(Duration::from_millis(millis));
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "KEY_GRACE_PERIOD_SECONDS")? {
            builder = builder.grace_period(Duration::from_secs(secs));
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "REFRESH_COOLDOWN_SECONDS")? {
            builder = builder.refresh_cooldown(Duration::from_secs(secs));
        }
        if let Some(enabled) = parse_var::<bool>(&lookup, "BACKGROUND_REFRESH")? {
            builder = builder.background_refresh(enabled);
        }
        if let Some(uri) = first(&["JWKS_URI"]) {
            builder = builder.jwks_uri(&uri)?;
        }
        if let Some(list) = first(&["ALLOWED_ALGORITHMS"]) {
            let algorithms = list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    Algorithm::from_str(s).map_err(|_| {
                        NilaGateError::InvalidConfiguration(format!(
                            "ALLOWED_ALGORITHMS: unknown algorithm '{s}'"
                        ))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            builder = builder.algorithms(algorithms);
        }

        builder.build()
    }
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<T>, NilaGateError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw.trim().parse().map(Some).map_err(|e: T::Err| {
            NilaGateError::InvalidConfiguration(format!("{name}: {e}"))
        }),
    }
}

/// A builder for creating a `Config` instance.
///
/// This builder provides a fluent API to ensure that the configuration is
/// constructed correctly and with all required fields.
#[derive(Default)]
pub struct ConfigBuilder {
    pool_id: Option<String>,
    region: Option<String>,
    grace_period_option: Option<Duration>,
    validation: ValidationDetails,
    key_source: KeySourceConfig,
}

impl ConfigBuilder {
    /// Creates a new `ConfigBuilder`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the user pool identifier. This is a required field.
    pub fn pool_id(mut self, pool_id: impl Into<String>) -> Self {
        self.pool_id = Some(pool_id.into());
        self
    }

    /// Sets the region hosting the user pool. This is a required field.
    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Requires tokens to be addressed to this audience (usually the app client id).
    pub fn audience(mut self, audience: impl Into<String>) -> Self {
        self.validation.expected_audience = Some(audience.into());
        self
    }

    /// Sets an explicit JWKS URI instead of the pool's well-known endpoint.
    pub fn jwks_uri(mut self, url: &str) -> Result<Self, NilaGateError> {
        let parsed_url = Url::parse(url).map_err(|e| NilaGateError::InvalidUrl(e.to_string()))?;
        self.key_source.jwks_uri = Some(parsed_url);
        Ok(self)
    }

    /// Sets how long a fetched key set stays fresh. Defaults to one hour.
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.key_source.cache_ttl = ttl;
        self
    }

    /// Sets how long rotated-out keys remain usable. Defaults to the cache TTL.
    pub fn grace_period(mut self, grace: Duration) -> Self {
        self.grace_period_option = Some(grace);
        self
    }

    /// Sets the minimum age of a fresh key set before an unknown `kid` refetches it.
    pub fn refresh_cooldown(mut self, cooldown: Duration) -> Self {
        self.key_source.refresh_cooldown = cooldown;
        self
    }

    /// Sets the timeout for a single key set fetch.
    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.key_source.fetch_timeout = timeout;
        self
    }

    /// Enables the proactive background refresher.
    pub fn background_refresh(mut self, enabled: bool) -> Self {
        self.key_source.background_refresh = enabled;
        self
    }

    /// Sets the allowed signing algorithms.
    /// Defaults to `[Algorithm::RS256]` if not set.
    pub fn algorithms(mut self, algorithms: Vec<Algorithm>) -> Self {
        self.validation.algorithms = algorithms;
        self
    }

    /// Sets the clock skew tolerance. Defaults to 60 seconds.
    pub fn leeway(mut self, leeway: Duration) -> Self {
        self.validation.leeway = leeway;
        self
    }

    /// Consumes the builder and returns a `Config` object.
    ///
    /// # Errors
    ///
    /// Returns an error if `pool_id` or `region` is missing, a duration is zero,
    /// or the algorithm allow-list is empty or contains a symmetric algorithm.
    pub fn build(self) -> Result<Config, NilaGateError> {
        let pool_id = self
            .pool_id
            .filter(|p| !p.trim().is_empty())
            .ok_or(NilaGateError::MissingConfiguration("pool_id".to_string()))?;
        let region = self
            .region
            .filter(|r| !r.trim().is_empty())
            .ok_or(NilaGateError::MissingConfiguration("region".to_string()))?;

        if self.validation.algorithms.is_empty() {
            return Err(NilaGateError::InvalidConfiguration(
                "at least one signing algorithm must be allowed".to_string(),
            ));
        }
        if let Some(alg) = self
            .validation
            .algorithms
            .iter()
            .find(|alg| !is_asymmetric(**alg))
        {
            return Err(NilaGateError::InvalidConfiguration(format!(
                "symmetric algorithm {alg:?} cannot verify identity provider tokens"
            )));
        }
        if self.key_source.cache_ttl.is_zero() {
            return Err(NilaGateError::InvalidConfiguration(
                "cache_ttl must be greater than zero".to_string(),
            ));
        }
        if self.key_source.fetch_timeout.is_zero() {
            return Err(NilaGateError::InvalidConfiguration(
                "fetch_timeout must be greater than zero".to_string(),
            ));
        }

        let mut key_source = self.key_source;
        key_source.grace_period = self.grace_period_option.unwrap_or(key_source.cache_ttl);

        Ok(Config {
            pool_id,
            region,
            validation: self.validation,
            key_source,
        })
    }
}
