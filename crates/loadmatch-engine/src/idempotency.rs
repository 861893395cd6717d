//! Idempotency guard for keyed write requests.
//!
//! A keyed request either runs for the first time, writing its record in the
//! same unit of work as its effects, or replays the stored reply without
//! touching anything else. The record only becomes visible when the unit
//! commits, so a failed request leaves the key free for a retry.

use chrono::{DateTime, Utc};
use loadmatch_store::UnitOfWork;
use loadmatch_types::{IdempotencyKey, IdempotencyRecord, LoadmatchError, RequestSignature, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};

/// Result of a guarded operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Guarded<T> {
    pub value: T,
    /// `true` if `value` is the stored reply of an earlier request.
    pub replayed: bool,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct IdempotencyGuard;

impl IdempotencyGuard {
    /// Hex SHA-256 over the canonical request signature.
    #[must_use]
    pub fn fingerprint(signature: &RequestSignature) -> String {
        let mut hasher = Sha256::new();
        hasher.update(signature.fingerprint_payload());
        hex::encode(hasher.finalize())
    }

    /// Run `op` at most once per key.
    ///
    /// Without a key `op` simply runs.
    ///
    /// # Errors
    /// - `IdempotencyConflict` if the key was first used by a request with a
    ///   different method, path or caller
    /// - whatever `op` returns; the record is then never written
    pub fn run<T, F>(
        uow: &mut dyn UnitOfWork,
        key: Option<&IdempotencyKey>,
        signature: &RequestSignature,
        now: DateTime<Utc>,
        op: F,
    ) -> Result<Guarded<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&mut dyn UnitOfWork) -> Result<T>,
    {
        let Some(key) = key else {
            return op(uow).map(|value| Guarded {
                value,
                replayed: false,
            });
        };

        let fingerprint = Self::fingerprint(signature);
        if let Some(record) = uow.idempotency_record(key)? {
            if record.fingerprint != fingerprint {
                tracing::warn!(
                    key = %key,
                    first_path = %record.path,
                    path = %signature.path,
                    "Idempotency key reused for a different request"
                );
                return Err(LoadmatchError::IdempotencyConflict {
                    key: key.to_string(),
                });
            }
            tracing::debug!(key = %key, path = %signature.path, "Replaying stored reply");
            let value = serde_json::from_value(record.response)?;
            return Ok(Guarded {
                value,
                replayed: true,
            });
        }

        let value = op(uow)?;
        uow.insert_idempotency_record(IdempotencyRecord {
            key: key.clone(),
            method: signature.method.clone(),
            path: signature.path.clone(),
            caller_id: signature.caller_id,
            fingerprint,
            response: serde_json::to_value(&value)?,
            created_at: now,
        })?;
        Ok(Guarded {
            value,
            replayed: false,
        })
    }
}
