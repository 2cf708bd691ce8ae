// src/record.rs

use crate::claims::Claims;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The caller a verified token speaks for.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Identity {
    pub subject: String,
    pub claims: Claims,
}

impl Identity {
    pub fn new(claims: Claims) -> Self {
        Self {
            subject: claims.sub.clone(),
            claims,
        }
    }

    /// Stamps `payload` with a fresh record id and this identity's subject.
    ///
    /// The subject always comes from the verified token, never from the payload.
    pub fn attribute<T>(&self, payload: T) -> AttributedRecord<T> {
        AttributedRecord {
            id: Uuid::new_v4(),
            subject: self.subject.clone(),
            payload,
        }
    }
}

/// A record ready for the storage layer, owned by the subject that created it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributedRecord<T> {
    pub id: Uuid,
    pub subject: String,
    #[serde(flatten)]
    pub payload: T,
}
