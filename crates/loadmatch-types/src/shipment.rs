//! # Shipment: the aggregate every marketplace workflow revolves around
//!
//! ## State Machine
//!
//! ```text
//!   open ──▶ accepted ──▶ assigned ──▶ picked_up ──▶ in_transit ──▶ delivered ──▶ completed
//!                             └───────────────────────▲
//!   (every non-terminal state) ──▶ cancelled
//! ```
//!
//! `completed` and `cancelled` are terminal. The table in
//! [`ShipmentStatus::successors`] is the only place legality is decided.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{LoadmatchError, OfferId, Result, ShipmentId, UserId, constants, money};

/// Lifecycle status of a shipment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShipmentStatus {
    /// Published, collecting offers.
    Open,
    /// An offer was accepted; carrier and price are fixed.
    Accepted,
    /// The carrier assigned a driver.
    Assigned,
    /// Cargo collected at the pickup address.
    PickedUp,
    /// On the road.
    InTransit,
    /// Dropped at the delivery address, awaiting shipper confirmation.
    Delivered,
    /// Confirmed; the carrier is paid. Terminal.
    Completed,
    /// Withdrawn before completion. Terminal.
    Cancelled,
}

impl ShipmentStatus {
    /// Allowed successor states.
    #[must_use]
    pub fn successors(self) -> &'static [Self] {
        match self {
            Self::Open => &[Self::Accepted, Self::Cancelled],
            Self::Accepted => &[Self::Assigned, Self::Cancelled],
            Self::Assigned => &[Self::PickedUp, Self::InTransit, Self::Cancelled],
            Self::PickedUp => &[Self::InTransit, Self::Cancelled],
            Self::InTransit => &[Self::Delivered, Self::Cancelled],
            Self::Delivered => &[Self::Completed, Self::Cancelled],
            Self::Completed | Self::Cancelled => &[],
        }
    }

    /// Can a shipment in this state move to `target`?
    #[must_use]
    pub fn can_transition_to(self, target: Self) -> bool {
        self.successors().contains(&target)
    }

    /// Check a transition, naming both states on failure.
    pub fn ensure_transition(self, target: Self) -> Result<()> {
        if self.can_transition_to(target) {
            Ok(())
        } else {
            Err(LoadmatchError::InvalidTransition {
                from: self,
                to: target,
            })
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        self.successors().is_empty()
    }

    /// Has the shipment moved beyond the bidding phase?
    #[must_use]
    pub fn is_past_open(self) -> bool {
        self != Self::Open
    }
}

impl std::fmt::Display for ShipmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Accepted => write!(f, "accepted"),
            Self::Assigned => write!(f, "assigned"),
            Self::PickedUp => write!(f, "picked_up"),
            Self::InTransit => write!(f, "in_transit"),
            Self::Delivered => write!(f, "delivered"),
            Self::Completed => write!(f, "completed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Refund bookkeeping recorded on cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    /// The shipper is owed `refund_amount`; settlement is external.
    Pending,
    /// The carrier payout was reversed in the wallet ledger.
    Refunded,
}

/// Whether the carrier has been paid for this shipment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutStatus {
    #[default]
    Unpaid,
    Paid,
    Reversed,
}

/// Shipper-provided fields for a new shipment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShipmentDetails {
    pub pickup_address: String,
    pub delivery_address: String,
    #[serde(default)]
    pub cargo_description: String,
    /// Optional budget; replaced by the accepted offer's price.
    #[serde(default)]
    pub price: Option<Decimal>,
}

/// A shipment record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shipment {
    pub id: ShipmentId,
    pub shipper_id: UserId,
    pub carrier_id: Option<UserId>,
    pub driver_id: Option<UserId>,
    pub status: ShipmentStatus,
    pub price: Option<Decimal>,
    pub accepted_offer_id: Option<OfferId>,
    pub pickup_address: String,
    pub delivery_address: String,
    pub cargo_description: String,
    pub cancellation_reason: Option<String>,
    pub refund_amount: Option<Decimal>,
    pub refund_status: Option<RefundStatus>,
    #[serde(default)]
    pub payout_status: PayoutStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub picked_up_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Shipment {
    /// Validate `details` and build an `open` shipment owned by `shipper_id`.
    pub fn open(shipper_id: UserId, details: ShipmentDetails, now: DateTime<Utc>) -> Result<Self> {
        let pickup_address = details.pickup_address.trim().to_string();
        let delivery_address = details.delivery_address.trim().to_string();
        if pickup_address.is_empty() {
            return Err(LoadmatchError::validation("pickup address is required"));
        }
        if delivery_address.is_empty() {
            return Err(LoadmatchError::validation("delivery address is required"));
        }
        let price = details
            .price
            .map(|p| money::positive(p, "shipment price"))
            .transpose()?;

        Ok(Self {
            id: ShipmentId::new(),
            shipper_id,
            carrier_id: None,
            driver_id: None,
            status: ShipmentStatus::Open,
            price,
            accepted_offer_id: None,
            pickup_address,
            delivery_address,
            cargo_description: details.cargo_description.trim().to_string(),
            cancellation_reason: None,
            refund_amount: None,
            refund_status: None,
            payout_status: PayoutStatus::Unpaid,
            created_at: now,
            updated_at: now,
            assigned_at: None,
            picked_up_at: None,
            cancelled_at: None,
            delivered_at: None,
            completed_at: None,
        })
    }

    /// Is `user` the shipper, the carrier or the driver of this shipment?
    #[must_use]
    pub fn is_party(&self, user: UserId) -> bool {
        self.shipper_id == user || self.carrier_id == Some(user) || self.driver_id == Some(user)
    }

    /// Move to `target` after checking the transition table, stamping the
    /// matching timestamp.
    pub fn transition(&mut self, target: ShipmentStatus, now: DateTime<Utc>) -> Result<()> {
        self.status.ensure_transition(target)?;
        self.status = target;
        self.updated_at = now;
        match target {
            ShipmentStatus::Assigned => self.assigned_at = Some(now),
            ShipmentStatus::PickedUp => self.picked_up_at = Some(now),
            ShipmentStatus::Delivered => self.delivered_at = Some(now),
            ShipmentStatus::Completed => self.completed_at = Some(now),
            ShipmentStatus::Cancelled => self.cancelled_at = Some(now),
            ShipmentStatus::Open | ShipmentStatus::Accepted | ShipmentStatus::InTransit => {}
        }
        Ok(())
    }

    /// Price the carrier is paid on, if one was fixed.
    pub fn agreed_price(&self) -> Result<Decimal> {
        self.price.ok_or_else(|| {
            LoadmatchError::validation(format!("shipment {} has no agreed price", self.id))
        })
    }

    /// Carrier of an accepted shipment.
    pub fn assigned_carrier(&self) -> Result<UserId> {
        self.carrier_id.ok_or_else(|| {
            LoadmatchError::validation(format!("shipment {} has no carrier", self.id))
        })
    }
}

/// Normalise a free-text cancellation reason.
pub fn cancellation_reason(raw: &str) -> Result<Option<String>> {
    let reason = raw.trim();
    if reason.len() > constants::MAX_CANCELLATION_REASON_LEN {
        return Err(LoadmatchError::validation(format!(
            "cancellation reason exceeds {} characters",
            constants::MAX_CANCELLATION_REASON_LEN
        )));
    }
    Ok((!reason.is_empty()).then(|| reason.to_string()))
}

/// Test helpers.
#[cfg(any(test, feature = "test-helpers"))]
impl Shipment {
    pub fn dummy(shipper_id: UserId) -> Self {
        Self::open(
            shipper_id,
            ShipmentDetails {
                pickup_address: "Istanbul, Tuzla Port".to_string(),
                delivery_address: "Ankara, OSTIM".to_string(),
                cargo_description: "12 pallets".to_string(),
                price: None,
            },
            Utc::now(),
        )
        .expect("dummy shipment details are valid")
    }
}
