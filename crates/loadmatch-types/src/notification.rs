//! Outbound notification events.
//!
//! The engine emits one [`NotificationEvent`] per affected user after a
//! durable commit. Delivery (push, SMS, email) is someone else's problem.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ShipmentId, UserId};

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    ShipmentCreated,
    NewOffer,
    CounterOffer,
    OfferAccepted,
    OfferRejected,
    DriverAssigned,
    PickedUp,
    InTransit,
    Delivered,
    Completed,
    Cancelled,
    PaymentReceived,
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ShipmentCreated => write!(f, "SHIPMENT_CREATED"),
            Self::NewOffer => write!(f, "NEW_OFFER"),
            Self::CounterOffer => write!(f, "COUNTER_OFFER"),
            Self::OfferAccepted => write!(f, "OFFER_ACCEPTED"),
            Self::OfferRejected => write!(f, "OFFER_REJECTED"),
            Self::DriverAssigned => write!(f, "DRIVER_ASSIGNED"),
            Self::PickedUp => write!(f, "PICKED_UP"),
            Self::InTransit => write!(f, "IN_TRANSIT"),
            Self::Delivered => write!(f, "DELIVERED"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Cancelled => write!(f, "CANCELLED"),
            Self::PaymentReceived => write!(f, "PAYMENT_RECEIVED"),
        }
    }
}

/// A fire-and-forget event addressed to one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub shipment_id: ShipmentId,
    pub target_user_id: UserId,
    pub timestamp: DateTime<Utc>,
}

impl NotificationEvent {
    #[must_use]
    pub fn new(
        kind: NotificationKind,
        shipment_id: ShipmentId,
        target_user_id: UserId,
        title: impl Into<String>,
        message: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            title: title.into(),
            message: message.into(),
            shipment_id,
            target_user_id,
            timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_display() {
        assert_eq!(format!("{}", NotificationKind::OfferAccepted), "OFFER_ACCEPTED");
        assert_eq!(format!("{}", NotificationKind::InTransit), "IN_TRANSIT");
    }

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&NotificationKind::DriverAssigned).unwrap();
        assert_eq!(json, "\"driver_assigned\"");
    }
}
