//! Effects collected inside a unit of work and released after it commits.

use chrono::{DateTime, Utc};
use loadmatch_types::{NotificationEvent, NotificationKind, ShipmentId, UserId};

/// Post-commit work produced by an engine operation.
///
/// Nothing in here may run before the unit of work that produced it has
/// committed. If the unit is rolled back the outbox is simply dropped.
#[derive(Debug)]
pub struct Outbox {
    /// Timestamp stamped on every event.
    now: DateTime<Utc>,
    pub events: Vec<NotificationEvent>,
    /// Shipments that just reached `completed` and still need their payout.
    pub payouts: Vec<ShipmentId>,
}

impl Outbox {
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now,
            events: Vec::new(),
            payouts: Vec::new(),
        }
    }

    pub fn notify(
        &mut self,
        kind: NotificationKind,
        shipment_id: ShipmentId,
        target: UserId,
        title: impl Into<String>,
        message: impl Into<String>,
    ) {
        self.events.push(NotificationEvent::new(
            kind,
            shipment_id,
            target,
            title,
            message,
            self.now,
        ));
    }

    /// Same event for several users, skipping duplicates and `except`.
    pub fn notify_all(
        &mut self,
        kind: NotificationKind,
        shipment_id: ShipmentId,
        targets: impl IntoIterator<Item = UserId>,
        except: Option<UserId>,
        title: &str,
        message: &str,
    ) {
        let mut seen = Vec::new();
        for target in targets {
            if Some(target) == except || seen.contains(&target) {
                continue;
            }
            seen.push(target);
            self.notify(kind, shipment_id, target, title, message);
        }
    }

    pub fn schedule_payout(&mut self, shipment_id: ShipmentId) {
        self.payouts.push(shipment_id);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.payouts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notify_all_dedupes_and_skips_actor() {
        let now = Utc::now();
        let mut outbox = Outbox::new(now);
        let (a, b) = (UserId::new(), UserId::new());
        outbox.notify_all(
            NotificationKind::Cancelled,
            ShipmentId::new(),
            [a, b, a],
            Some(b),
            "Shipment cancelled",
            "",
        );
        assert_eq!(outbox.events.len(), 1);
        assert_eq!(outbox.events[0].target_user_id, a);
        assert_eq!(outbox.events[0].timestamp, now);
        assert!(!outbox.is_empty());
    }
}
