//! # Escrow: funds held between offer acceptance and payout
//!
//! ## State Machine
//!
//! ```text
//!   ┌─────────────────┐   payout    ┌──────────┐  reversal  ┌──────────┐
//!   │ PENDING_RELEASE ├────────────▶│ RELEASED ├───────────▶│ REFUNDED │
//!   └───────┬─────────┘             └──────────┘            └──────────┘
//!           │ cancellation before payout
//!           ▼
//!       ┌────────┐
//!       │ VOIDED │
//!       └────────┘
//! ```
//!
//! The commission on an escrow is a quote taken at acceptance time. The
//! authoritative commission is recomputed from the shipment price at payout.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{EscrowId, LoadmatchError, OfferId, Result, ShipmentId, UserId};

/// Lifecycle state of an escrow placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowStatus {
    /// Offer accepted, shipment not yet completed.
    PendingRelease,
    /// Carrier paid out.
    Released,
    /// Payout reversed.
    Refunded,
    /// Shipment cancelled before payout.
    Voided,
}

impl EscrowStatus {
    #[must_use]
    pub fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::PendingRelease, Self::Released | Self::Voided) | (Self::Released, Self::Refunded)
        )
    }
}

impl std::fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PendingRelease => write!(f, "PENDING_RELEASE"),
            Self::Released => write!(f, "RELEASED"),
            Self::Refunded => write!(f, "REFUNDED"),
            Self::Voided => write!(f, "VOIDED"),
        }
    }
}

/// Escrow placeholder created atomically with offer acceptance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Escrow {
    pub id: EscrowId,
    pub shipment_id: ShipmentId,
    pub offer_id: OfferId,
    pub carrier_id: UserId,
    /// Accepted price.
    pub amount: Decimal,
    /// Commission quoted at acceptance.
    pub commission_quote: Decimal,
    pub status: EscrowStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Escrow {
    #[must_use]
    pub fn pending(
        shipment_id: ShipmentId,
        offer_id: OfferId,
        carrier_id: UserId,
        amount: Decimal,
        commission_quote: Decimal,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: EscrowId::new(),
            shipment_id,
            offer_id,
            carrier_id,
            amount,
            commission_quote,
            status: EscrowStatus::PendingRelease,
            created_at: now,
            updated_at: now,
        }
    }

    /// Attempt a state transition.
    ///
    /// # Errors
    /// Returns [`LoadmatchError::AlreadyDecided`] if the move is not allowed.
    pub fn mark(&mut self, target: EscrowStatus, now: DateTime<Utc>) -> Result<()> {
        if !self.status.can_transition_to(target) {
            return Err(LoadmatchError::AlreadyDecided {
                entity: "Escrow",
                id: self.id.to_string(),
                state: self.status.to_string(),
            });
        }
        self.status = target;
        self.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make() -> Escrow {
        Escrow::pending(
            ShipmentId::new(),
            OfferId::new(),
            UserId::new(),
            Decimal::new(500, 0),
            Decimal::new(5, 0),
            Utc::now(),
        )
    }

    #[test]
    fn release_then_refund() {
        let mut e = make();
        e.mark(EscrowStatus::Released, Utc::now()).unwrap();
        e.mark(EscrowStatus::Refunded, Utc::now()).unwrap();
        assert_eq!(e.status, EscrowStatus::Refunded);
    }

    #[test]
    fn voided_is_final() {
        let mut e = make();
        e.mark(EscrowStatus::Voided, Utc::now()).unwrap();
        assert!(e.mark(EscrowStatus::Released, Utc::now()).is_err());
        assert!(e.mark(EscrowStatus::Refunded, Utc::now()).is_err());
    }

    #[test]
    fn double_release_blocked() {
        let mut e = make();
        e.mark(EscrowStatus::Released, Utc::now()).unwrap();
        let err = e.mark(EscrowStatus::Released, Utc::now()).unwrap_err();
        assert!(matches!(err, LoadmatchError::AlreadyDecided { .. }));
    }
}
