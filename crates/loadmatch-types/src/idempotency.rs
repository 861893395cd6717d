//! Idempotency records.
//!
//! One record per client key, written in the same unit of work as the effects
//! of the request it deduplicates. Records are never updated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{IdempotencyKey, UserId};

/// The request shape a key was first used with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestSignature {
    pub method: String,
    pub path: String,
    pub caller_id: UserId,
    /// Canonical form of the request body, empty when there is none.
    #[serde(default)]
    pub body: String,
}

impl RequestSignature {
    #[must_use]
    pub fn new(method: impl Into<String>, path: impl Into<String>, caller_id: UserId) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            caller_id,
            body: String::new(),
        }
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Canonical bytes hashed into the record fingerprint.
    ///
    /// Format: `"loadmatch:idem:v1:" || method || 0x00 || path || 0x00 || caller_id || 0x00 || body`
    #[must_use]
    pub fn fingerprint_payload(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(64 + self.path.len() + self.body.len());
        payload.extend_from_slice(b"loadmatch:idem:v1:");
        payload.extend_from_slice(self.method.as_bytes());
        payload.push(0);
        payload.extend_from_slice(self.path.as_bytes());
        payload.push(0);
        payload.extend_from_slice(self.caller_id.0.as_bytes());
        payload.push(0);
        payload.extend_from_slice(self.body.as_bytes());
        payload
    }
}

/// Proof that a keyed request was already processed, plus its reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub key: IdempotencyKey,
    pub method: String,
    pub path: String,
    pub caller_id: UserId,
    /// Hex SHA-256 of [`RequestSignature::fingerprint_payload`].
    pub fingerprint: String,
    /// Reply served to the first caller, replayed to retries.
    pub response: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
