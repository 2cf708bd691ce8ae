// src/claims.rs

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The `aud` claim, which RFC 7519 allows to be a single string or an array.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Audience {
    Single(String),
    Many(Vec<String>),
}

impl Audience {
    pub fn contains(&self, audience: &str) -> bool {
        match self {
            Audience::Single(aud) => aud == audience,
            Audience::Many(auds) => auds.iter().any(|aud| aud == audience),
        }
    }
}

/// The claims decoded from a verified token.
///
/// `sub`, `iss` and `exp` are required. Claims not modelled here are kept in `extra`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Claims {
    pub sub: String,
    pub iss: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<Audience>,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    /// Cognito access tokens name the app client here instead of in `aud`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// `id` or `access` for Cognito tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_use: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Claims {
    /// True when the token is addressed to `audience`, via `aud` or, when
    /// `aud` is absent, via `client_id`.
    pub fn is_addressed_to(&self, audience: &str) -> bool {
        match (&self.aud, &self.client_id) {
            (Some(aud), _) => aud.contains(audience),
            (None, Some(client_id)) => client_id == audience,
            (None, None) => false,
        }
    }

    /// Looks up any claim by name, including the ones without a dedicated field.
    pub fn get(&self, name: &str) -> Option<Value> {
        match name {
            "sub" => Some(Value::from(self.sub.clone())),
            "iss" => Some(Value::from(self.iss.clone())),
            "exp" => Some(Value::from(self.exp)),
            "aud" => self.aud.as_ref().and_then(|aud| serde_json::to_value(aud).ok()),
            "iat" => self.iat.map(Value::from),
            "nbf" => self.nbf.map(Value::from),
            "client_id" => self.client_id.clone().map(Value::from),
            "token_use" => self.token_use.clone().map(Value::from),
            other => self.extra.get(other).cloned(),
        }
    }
}
