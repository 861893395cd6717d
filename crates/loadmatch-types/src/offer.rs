//! Offer types.
//!
//! A carrier bids on an `open` shipment with an [`Offer`]. Offers only move
//! out of `pending`; once decided or expired they never change again.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{LoadmatchError, OfferId, Result, ShipmentId, UserId, constants, money};

/// Lifecycle status of an offer.
///
/// Transitions are **monotonic**: `Pending → Accepted | Rejected | Expired`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferStatus {
    Pending,
    Accepted,
    Rejected,
    Expired,
}

impl OfferStatus {
    #[must_use]
    pub fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Pending, Self::Accepted | Self::Rejected | Self::Expired)
        )
    }
}

impl std::fmt::Display for OfferStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Accepted => write!(f, "accepted"),
            Self::Rejected => write!(f, "rejected"),
            Self::Expired => write!(f, "expired"),
        }
    }
}

/// A carrier's bid on a shipment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    pub id: OfferId,
    pub shipment_id: ShipmentId,
    pub carrier_id: UserId,
    pub price: Decimal,
    pub message: Option<String>,
    pub status: OfferStatus,
    /// Set when this offer answers another one (counter offer).
    pub parent_offer_id: Option<OfferId>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Offer {
    /// Build a pending offer. Validates price and message.
    pub fn pending(
        shipment_id: ShipmentId,
        carrier_id: UserId,
        price: Decimal,
        message: Option<String>,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let price = money::positive(price, "offer price")?;
        let message = message
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty());
        if message
            .as_ref()
            .is_some_and(|m| m.chars().count() > constants::MAX_OFFER_MESSAGE_LEN)
        {
            return Err(LoadmatchError::validation(format!(
                "offer message exceeds {} characters",
                constants::MAX_OFFER_MESSAGE_LEN
            )));
        }
        Ok(Self {
            id: OfferId::new(),
            shipment_id,
            carrier_id,
            price,
            message,
            status: OfferStatus::Pending,
            parent_offer_id: None,
            expires_at: now + ttl,
            created_at: now,
            updated_at: now,
        })
    }

    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Pending and not yet past its expiry.
    #[must_use]
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.status == OfferStatus::Pending && !self.is_expired_at(now)
    }

    /// Move out of `pending`.
    ///
    /// # Errors
    /// Returns [`LoadmatchError::NotPending`] if the offer was already decided.
    pub fn decide(&mut self, target: OfferStatus, now: DateTime<Utc>) -> Result<()> {
        if !self.status.can_transition_to(target) {
            return Err(LoadmatchError::NotPending {
                offer: self.id,
                status: self.status,
            });
        }
        self.status = target;
        self.updated_at = now;
        Ok(())
    }
}

/// Test helpers.
#[cfg(any(test, feature = "test-helpers"))]
impl Offer {
    pub fn dummy(shipment_id: ShipmentId, carrier_id: UserId, price: Decimal) -> Self {
        Self::pending(
            shipment_id,
            carrier_id,
            price,
            None,
            Duration::days(constants::DEFAULT_OFFER_TTL_DAYS),
            Utc::now(),
        )
        .expect("dummy offer is valid")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_transitions_valid() {
        assert!(OfferStatus::Pending.can_transition_to(OfferStatus::Accepted));
        assert!(OfferStatus::Pending.can_transition_to(OfferStatus::Rejected));
        assert!(OfferStatus::Pending.can_transition_to(OfferStatus::Expired));
    }

    #[test]
    fn state_transitions_invalid() {
        assert!(!OfferStatus::Accepted.can_transition_to(OfferStatus::Rejected));
        assert!(!OfferStatus::Rejected.can_transition_to(OfferStatus::Accepted));
        assert!(!OfferStatus::Expired.can_transition_to(OfferStatus::Accepted));
        assert!(!OfferStatus::Accepted.can_transition_to(OfferStatus::Pending));
    }

    #[test]
    fn pending_expires_in_seven_days() {
        let now = Utc::now();
        let offer = Offer::pending(
            ShipmentId::new(),
            UserId::new(),
            Decimal::new(500, 0),
            Some("  can load tomorrow ".to_string()),
            Duration::days(7),
            now,
        )
        .unwrap();
        assert_eq!(offer.expires_at, now + Duration::days(7));
        assert_eq!(offer.message.as_deref(), Some("can load tomorrow"));
        assert!(offer.is_live_at(now));
        assert!(!offer.is_live_at(now + Duration::days(8)));
    }

    #[test]
    fn non_positive_price_rejected() {
        let err = Offer::pending(
            ShipmentId::new(),
            UserId::new(),
            Decimal::ZERO,
            None,
            Duration::days(7),
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, LoadmatchError::Validation { .. }));
    }

    #[test]
    fn double_decision_blocked() {
        let mut offer = Offer::dummy(ShipmentId::new(), UserId::new(), Decimal::new(500, 0));
        offer.decide(OfferStatus::Accepted, Utc::now()).unwrap();
        let err = offer.decide(OfferStatus::Rejected, Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            LoadmatchError::NotPending {
                status: OfferStatus::Accepted,
                ..
            }
        ));
    }
}
