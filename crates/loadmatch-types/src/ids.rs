//! Globally unique identifiers used throughout LoadMatch.
//!
//! All entity IDs use UUIDv7 for time-ordered lexicographic sorting.
//! [`IdempotencyKey`] is the one client-supplied identifier and is validated
//! on construction.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{LoadmatchError, Result, constants};

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            #[must_use]
            pub fn from_bytes(bytes: [u8; 16]) -> Self {
                Self(Uuid::from_bytes(bytes))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Entity identifiers
// ---------------------------------------------------------------------------

uuid_id!(
    /// Unique shipment identifier.
    ShipmentId,
    "shp:"
);

uuid_id!(
    /// Unique offer identifier.
    OfferId,
    "ofr:"
);

uuid_id!(
    /// Unique identifier for any marketplace participant (shipper, carrier,
    /// driver, admin). Issued by the external auth component.
    UserId,
    ""
);

uuid_id!(
    /// Identifier of an append-only ledger row.
    LedgerTxId,
    "ltx:"
);

uuid_id!(
    /// Identifier of an escrow placeholder created at offer acceptance.
    EscrowId,
    "esc:"
);

uuid_id!(
    /// Identifier of a carrier-side market listing.
    ListingId,
    "lst:"
);

/// Wallets are keyed by their carrier.
pub type WalletId = UserId;

impl OfferId {
    /// Extract the embedded timestamp (milliseconds since UNIX epoch) from UUIDv7.
    #[must_use]
    pub fn timestamp_ms(&self) -> u64 {
        let bytes = self.0.as_bytes();
        u64::from_be_bytes([
            0, 0, bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5],
        ])
    }
}

// ---------------------------------------------------------------------------
// IdempotencyKey
// ---------------------------------------------------------------------------

/// Client-supplied token ensuring a retried write has at most one durable effect.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Validate and wrap a raw key: 1..=255 visible ASCII characters.
    pub fn parse(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        if raw.is_empty() || raw.len() > constants::MAX_IDEMPOTENCY_KEY_LEN {
            return Err(LoadmatchError::validation(format!(
                "idempotency key must be 1..={} characters",
                constants::MAX_IDEMPOTENCY_KEY_LEN
            )));
        }
        if !raw.bytes().all(|b| b.is_ascii_graphic()) {
            return Err(LoadmatchError::validation(
                "idempotency key must be visible ASCII",
            ));
        }
        Ok(Self(raw))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for IdempotencyKey {
    type Error = LoadmatchError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<IdempotencyKey> for String {
    fn from(key: IdempotencyKey) -> Self {
        key.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shipment_id_uniqueness() {
        let a = ShipmentId::new();
        let b = ShipmentId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn offer_id_ordering() {
        let a = OfferId::new();
        let b = OfferId::new();
        assert!(a < b);
    }

    #[test]
    #[allow(clippy::cast_possible_truncation)]
    fn offer_id_timestamp_extraction() {
        let before = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_millis() as u64;
        let id = OfferId::new();
        let after = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_millis() as u64;
        let ts = id.timestamp_ms();
        assert!(
            ts >= before && ts <= after,
            "ts={ts}, before={before}, after={after}"
        );
    }

    #[test]
    fn display_prefixes() {
        let id = ShipmentId::from_bytes([0u8; 16]);
        assert_eq!(id.to_string(), "shp:00000000-0000-0000-0000-000000000000");
        let user = UserId::from_bytes([0u8; 16]);
        assert_eq!(user.to_string(), "00000000-0000-0000-0000-000000000000");
    }

    #[test]
    fn idempotency_key_validation() {
        assert!(IdempotencyKey::parse("req-123").is_ok());
        assert!(IdempotencyKey::parse("").is_err());
        assert!(IdempotencyKey::parse("has space").is_err());
        assert!(IdempotencyKey::parse("x".repeat(256)).is_err());
        assert!(IdempotencyKey::parse("x".repeat(255)).is_ok());
    }

    #[test]
    fn idempotency_key_rejects_invalid_json() {
        let err = serde_json::from_str::<IdempotencyKey>("\"\"");
        assert!(err.is_err());
        let ok: IdempotencyKey = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(ok.as_str(), "abc");
    }
}
