//! Carrier-side market listings.
//!
//! After winning a shipment a carrier may list it on the driver market.
//! Listings are closed when the shipment is cancelled.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ListingId, ShipmentId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub id: ListingId,
    pub shipment_id: ShipmentId,
    pub carrier_id: UserId,
    pub status: ListingStatus,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Listing {
    #[must_use]
    pub fn open(shipment_id: ShipmentId, carrier_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            id: ListingId::new(),
            shipment_id,
            carrier_id,
            status: ListingStatus::Open,
            created_at: now,
            closed_at: None,
        }
    }

    /// Close the listing. Returns `false` if it was already closed.
    pub fn close(&mut self, now: DateTime<Utc>) -> bool {
        if self.status == ListingStatus::Closed {
            return false;
        }
        self.status = ListingStatus::Closed;
        self.closed_at = Some(now);
        true
    }
}
