// src/lib.rs

//! Bearer token authentication against an OpenID Connect identity provider's
//! published JSON Web Key Set.

pub mod cache;
pub mod claims;
pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod gateway;
pub mod model;
pub mod record;
pub mod validator;

/// The public prelude for the `nila-gate` crate.
///
/// This module re-exports the most commonly used types for convenience.
pub mod prelude {
    pub use crate::cache::KeySetCache;
    pub use crate::claims::{Audience, Claims};
    pub use crate::client::{HttpKeySetFetcher, KeySetFetcher};
    pub use crate::clock::{Clock, SystemClock};
    pub use crate::config::{Config, ConfigBuilder};
    pub use crate::error::{FetchError, NilaGateError, Rejection, RejectionKind};
    pub use crate::gateway::Gateway;
    pub use crate::record::{AttributedRecord, Identity};
    pub use crate::validator::{TokenVerifier, VerificationOutcome};
    pub use jsonwebtoken::Algorithm;
}
