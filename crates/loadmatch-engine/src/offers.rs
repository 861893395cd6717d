//! Offer Engine: bidding and the exclusive accept protocol.
//!
//! ## Accept
//!
//! Accepting an offer is one unit of work:
//! 1. The offer becomes `accepted`
//! 2. Every other pending offer of the shipment becomes `rejected`, or
//!    `expired` if it already lapsed
//! 3. The shipment becomes `accepted` with carrier, offer and price fixed
//! 4. An escrow placeholder is created and its commission quote held
//!
//! The unit checks, before touching anything, that no other offer of the
//! shipment is already accepted. The store enforces the same constraint on
//! write, so two racing accepts can never both commit.

use chrono::{DateTime, Duration, Utc};
use loadmatch_store::UnitOfWork;
use loadmatch_types::{
    Actor, Escrow, LoadmatchError, NotificationKind, Offer, OfferId, OfferStatus, Result, Role,
    Shipment, ShipmentId, ShipmentStatus,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::outbox::Outbox;
use crate::wallet::WalletService;

/// Price and note of a bid or counter bid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferTerms {
    pub price: Decimal,
    #[serde(default)]
    pub message: Option<String>,
}

impl OfferTerms {
    #[must_use]
    pub fn new(price: Decimal, message: Option<String>) -> Self {
        Self { price, message }
    }
}

/// Everything an accept changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceptedOffer {
    pub offer: Offer,
    pub shipment: Shipment,
    pub escrow: Escrow,
    /// Offers that lost to this one.
    pub rejected: Vec<OfferId>,
}

#[derive(Debug, Clone, Copy)]
pub struct OfferEngine {
    ttl: Duration,
    wallet: WalletService,
}

impl OfferEngine {
    #[must_use]
    pub fn new(ttl: Duration, wallet: WalletService) -> Self {
        Self { ttl, wallet }
    }

    /// A carrier bids on an open shipment.
    pub fn submit(
        &self,
        uow: &mut dyn UnitOfWork,
        actor: &Actor,
        shipment_id: ShipmentId,
        terms: OfferTerms,
        outbox: &mut Outbox,
        now: DateTime<Utc>,
    ) -> Result<Offer> {
        if actor.role != Role::Carrier {
            return Err(LoadmatchError::forbidden("only carriers can submit offers"));
        }
        let shipment = load_shipment(uow, shipment_id)?;
        if shipment.shipper_id == actor.user_id {
            return Err(LoadmatchError::SelfOffer(actor.user_id));
        }
        if shipment.status != ShipmentStatus::Open {
            return Err(LoadmatchError::NotOpen {
                shipment: shipment.id,
                status: shipment.status,
            });
        }

        for mut existing in uow.offers_for_shipment(shipment_id)? {
            if existing.carrier_id != actor.user_id || existing.status != OfferStatus::Pending {
                continue;
            }
            if !existing.is_expired_at(now) {
                return Err(LoadmatchError::DuplicatePending {
                    shipment: shipment_id,
                    carrier: actor.user_id,
                });
            }
            // A lapsed offer the sweep has not reached yet no longer blocks.
            existing.decide(OfferStatus::Expired, now)?;
            uow.put_offer(existing)?;
        }

        let offer = Offer::pending(
            shipment_id,
            actor.user_id,
            terms.price,
            terms.message,
            self.ttl,
            now,
        )?;
        uow.put_offer(offer.clone())?;

        tracing::info!(
            offer = %offer.id,
            shipment = %shipment_id,
            carrier = %actor.user_id,
            price = %offer.price,
            "Offer submitted"
        );
        outbox.notify(
            NotificationKind::NewOffer,
            shipment_id,
            shipment.shipper_id,
            "New offer",
            format!("A carrier offered {} for your shipment", offer.price),
        );
        Ok(offer)
    }

    /// A carrier answers with a new price on the back of their own earlier
    /// offer, pending or declined by the shipper.
    ///
    /// The new pending offer carries `parent_offer_id`; a pending parent is
    /// superseded as `rejected`. The shipper decides on the counter like on
    /// any other offer.
    ///
    /// # Errors
    /// - `Forbidden` unless the actor is the carrier of the parent offer
    /// - `NotPending` if the parent was accepted, or expired
    /// - `DuplicatePending` if the carrier holds another live pending offer
    /// - `NotOpen` if the shipment left `open`
    pub fn counter(
        &self,
        uow: &mut dyn UnitOfWork,
        actor: &Actor,
        offer_id: OfferId,
        terms: OfferTerms,
        outbox: &mut Outbox,
        now: DateTime<Utc>,
    ) -> Result<Offer> {
        let mut parent = load_offer(uow, offer_id)?;
        if actor.user_id != parent.carrier_id {
            return Err(LoadmatchError::forbidden(
                "only the carrier of an offer can counter it",
            ));
        }
        let shipment = load_shipment(uow, parent.shipment_id)?;
        if parent.status != OfferStatus::Rejected {
            ensure_live(&parent, now)?;
        }
        if shipment.status != ShipmentStatus::Open {
            return Err(LoadmatchError::NotOpen {
                shipment: shipment.id,
                status: shipment.status,
            });
        }
        for mut other in uow.offers_for_shipment(shipment.id)? {
            if other.id == parent.id
                || other.carrier_id != actor.user_id
                || other.status != OfferStatus::Pending
            {
                continue;
            }
            if !other.is_expired_at(now) {
                return Err(LoadmatchError::DuplicatePending {
                    shipment: shipment.id,
                    carrier: actor.user_id,
                });
            }
            other.decide(OfferStatus::Expired, now)?;
            uow.put_offer(other)?;
        }

        let mut counter = Offer::pending(
            shipment.id,
            actor.user_id,
            terms.price,
            terms.message,
            self.ttl,
            now,
        )?;
        counter.parent_offer_id = Some(parent.id);

        if parent.status == OfferStatus::Pending {
            parent.decide(OfferStatus::Rejected, now)?;
            uow.put_offer(parent.clone())?;
        }
        uow.put_offer(counter.clone())?;

        tracing::info!(
            offer = %counter.id,
            parent = %parent.id,
            shipment = %shipment.id,
            price = %counter.price,
            "Counter offer"
        );
        outbox.notify(
            NotificationKind::CounterOffer,
            shipment.id,
            shipment.shipper_id,
            "Counter offer",
            format!(
                "A carrier countered their {} offer with {}",
                parent.price, counter.price
            ),
        );
        Ok(counter)
    }

    /// Exclusive accept. See the module docs for the unit's contents.
    ///
    /// # Errors
    /// - `NotFound` if the offer or shipment is missing
    /// - `Forbidden` unless the actor is the shipment's shipper
    /// - `AlreadyAccepted` if another offer of the shipment won first
    /// - `NotPending` if the offer is decided or expired
    /// - `ShipmentNotOpen` if the shipment left `open`
    pub fn accept(
        &self,
        uow: &mut dyn UnitOfWork,
        actor: &Actor,
        offer_id: OfferId,
        outbox: &mut Outbox,
        now: DateTime<Utc>,
    ) -> Result<AcceptedOffer> {
        let mut offer = load_offer(uow, offer_id)?;
        let mut shipment = load_shipment(uow, offer.shipment_id)?;
        if actor.user_id != shipment.shipper_id {
            return Err(LoadmatchError::forbidden(
                "only the shipper can accept an offer",
            ));
        }

        let siblings = uow.offers_for_shipment(shipment.id)?;
        if siblings
            .iter()
            .any(|o| o.id != offer.id && o.status == OfferStatus::Accepted)
        {
            return Err(LoadmatchError::AlreadyAccepted(shipment.id));
        }
        ensure_live(&offer, now)?;
        if shipment.status != ShipmentStatus::Open {
            return Err(LoadmatchError::ShipmentNotOpen {
                shipment: shipment.id,
                status: shipment.status,
            });
        }

        offer.decide(OfferStatus::Accepted, now)?;
        uow.put_offer(offer.clone())?;

        let mut rejected = Vec::new();
        for mut other in siblings {
            if other.id == offer.id || other.status != OfferStatus::Pending {
                continue;
            }
            if other.is_expired_at(now) {
                other.decide(OfferStatus::Expired, now)?;
                uow.put_offer(other)?;
                continue;
            }
            other.decide(OfferStatus::Rejected, now)?;
            tracing::debug!(offer = %other.id, carrier = %other.carrier_id, "Offer rejected by accept");
            outbox.notify(
                NotificationKind::OfferRejected,
                shipment.id,
                other.carrier_id,
                "Offer rejected",
                "The shipper accepted another offer",
            );
            rejected.push(other.id);
            uow.put_offer(other)?;
        }

        shipment.transition(ShipmentStatus::Accepted, now)?;
        shipment.carrier_id = Some(offer.carrier_id);
        shipment.accepted_offer_id = Some(offer.id);
        shipment.price = Some(offer.price);
        uow.put_shipment(shipment.clone())?;

        let escrow = self.wallet.hold_escrow(uow, &offer, now)?;

        tracing::info!(
            offer = %offer.id,
            shipment = %shipment.id,
            carrier = %offer.carrier_id,
            price = %offer.price,
            rejected = rejected.len(),
            "Offer accepted"
        );
        outbox.notify(
            NotificationKind::OfferAccepted,
            shipment.id,
            offer.carrier_id,
            "Offer accepted",
            format!("Your offer of {} was accepted", offer.price),
        );

        Ok(AcceptedOffer {
            offer,
            shipment,
            escrow,
            rejected,
        })
    }

    /// Decline an offer. The shipper can reject any offer on their shipment;
    /// a carrier can withdraw their own.
    ///
    /// # Errors
    /// Returns `AlreadyDecided` if the offer is no longer pending or has
    /// lapsed; a lapsed offer reports state `expired`.
    pub fn reject(
        &self,
        uow: &mut dyn UnitOfWork,
        actor: &Actor,
        offer_id: OfferId,
        outbox: &mut Outbox,
        now: DateTime<Utc>,
    ) -> Result<Offer> {
        let mut offer = load_offer(uow, offer_id)?;
        let shipment = load_shipment(uow, offer.shipment_id)?;
        let by_shipper = actor.user_id == shipment.shipper_id;
        if !by_shipper && actor.user_id != offer.carrier_id {
            return Err(LoadmatchError::forbidden(
                "only the shipper or the offering carrier can reject an offer",
            ));
        }
        if offer.status != OfferStatus::Pending {
            return Err(LoadmatchError::AlreadyDecided {
                entity: "Offer",
                id: offer.id.to_string(),
                state: offer.status.to_string(),
            });
        }
        if offer.is_expired_at(now) {
            return Err(LoadmatchError::AlreadyDecided {
                entity: "Offer",
                id: offer.id.to_string(),
                state: OfferStatus::Expired.to_string(),
            });
        }
        offer.decide(OfferStatus::Rejected, now)?;
        uow.put_offer(offer.clone())?;

        tracing::info!(offer = %offer.id, shipment = %shipment.id, by_shipper, "Offer rejected");
        let (target, message) = if by_shipper {
            (offer.carrier_id, "The shipper declined your offer")
        } else {
            (shipment.shipper_id, "A carrier withdrew their offer")
        };
        outbox.notify(
            NotificationKind::OfferRejected,
            shipment.id,
            target,
            "Offer rejected",
            message,
        );
        Ok(offer)
    }

    /// Move every pending offer past its expiry to `expired`.
    pub fn expire_stale(&self, uow: &mut dyn UnitOfWork, now: DateTime<Utc>) -> Result<Vec<OfferId>> {
        let mut expired = Vec::new();
        for mut offer in uow.pending_offers()? {
            if !offer.is_expired_at(now) {
                continue;
            }
            offer.decide(OfferStatus::Expired, now)?;
            expired.push(offer.id);
            uow.put_offer(offer)?;
        }
        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "Expired stale offers");
        }
        Ok(expired)
    }
}

/// Reject every pending offer of a shipment, notifying each carrier. Lapsed
/// offers become `expired` without a notification.
pub fn reject_all_pending(
    uow: &mut dyn UnitOfWork,
    shipment_id: ShipmentId,
    reason: &str,
    outbox: &mut Outbox,
    now: DateTime<Utc>,
) -> Result<Vec<OfferId>> {
    let mut rejected = Vec::new();
    for mut offer in uow.offers_for_shipment(shipment_id)? {
        if offer.status != OfferStatus::Pending {
            continue;
        }
        if offer.is_expired_at(now) {
            offer.decide(OfferStatus::Expired, now)?;
            uow.put_offer(offer)?;
            continue;
        }
        offer.decide(OfferStatus::Rejected, now)?;
        outbox.notify(
            NotificationKind::OfferRejected,
            shipment_id,
            offer.carrier_id,
            "Offer rejected",
            reason,
        );
        rejected.push(offer.id);
        uow.put_offer(offer)?;
    }
    Ok(rejected)
}

fn ensure_live(offer: &Offer, now: DateTime<Utc>) -> Result<()> {
    if offer.status != OfferStatus::Pending {
        return Err(LoadmatchError::NotPending {
            offer: offer.id,
            status: offer.status,
        });
    }
    if offer.is_expired_at(now) {
        return Err(LoadmatchError::NotPending {
            offer: offer.id,
            status: OfferStatus::Expired,
        });
    }
    Ok(())
}

pub(crate) fn load_offer(uow: &dyn UnitOfWork, id: OfferId) -> Result<Offer> {
    uow.offer(id)?
        .ok_or_else(|| LoadmatchError::not_found("Offer", id))
}

pub(crate) fn load_shipment(uow: &dyn UnitOfWork, id: ShipmentId) -> Result<Shipment> {
    uow.shipment(id)?
        .ok_or_else(|| LoadmatchError::not_found("Shipment", id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use loadmatch_store::{InMemoryLedgerStore, transact};
    use loadmatch_types::{EscrowStatus, UserId};

    struct Fixture {
        store: InMemoryLedgerStore,
        engine: OfferEngine,
        shipper: Actor,
        shipment: Shipment,
    }

    fn fixture() -> Fixture {
        let store = InMemoryLedgerStore::new();
        let shipper = Actor::shipper(UserId::new());
        let shipment = Shipment::dummy(shipper.user_id);
        let s = shipment.clone();
        transact(&store, |uow| uow.put_shipment(s)).unwrap();
        Fixture {
            store,
            engine: OfferEngine::new(Duration::days(7), WalletService::new(Decimal::ONE)),
            shipper,
            shipment,
        }
    }

    impl Fixture {
        fn submit(&self, carrier: &Actor, price: i64) -> Result<Offer> {
            transact(&self.store, |uow| {
                let mut outbox = Outbox::new(Utc::now());
                self.engine.submit(
                    uow,
                    carrier,
                    self.shipment.id,
                    OfferTerms::new(Decimal::new(price, 0), None),
                    &mut outbox,
                    Utc::now(),
                )
            })
        }

        fn accept(&self, actor: &Actor, offer: OfferId) -> Result<(AcceptedOffer, Outbox)> {
            transact(&self.store, |uow| {
                let mut outbox = Outbox::new(Utc::now());
                let accepted = self.engine.accept(uow, actor, offer, &mut outbox, Utc::now())?;
                Ok((accepted, outbox))
            })
        }

        fn offers(&self) -> Vec<Offer> {
            transact(&self.store, |uow| uow.offers_for_shipment(self.shipment.id)).unwrap()
        }
    }

    #[test]
    fn accept_rejects_the_rest() {
        let f = fixture();
        let carriers: Vec<Actor> = (0..3).map(|_| Actor::carrier(UserId::new())).collect();
        let offers: Vec<Offer> = carriers
            .iter()
            .zip([500, 450, 480])
            .map(|(c, p)| f.submit(c, p).unwrap())
            .collect();

        let (accepted, outbox) = f.accept(&f.shipper, offers[1].id).unwrap();
        assert_eq!(accepted.shipment.status, ShipmentStatus::Accepted);
        assert_eq!(accepted.shipment.carrier_id, Some(carriers[1].user_id));
        assert_eq!(accepted.shipment.price, Some(Decimal::new(450, 0)));
        assert_eq!(accepted.escrow.status, EscrowStatus::PendingRelease);
        assert_eq!(accepted.rejected.len(), 2);

        let statuses: Vec<OfferStatus> = f.offers().iter().map(|o| o.status).collect();
        assert_eq!(
            statuses,
            vec![OfferStatus::Rejected, OfferStatus::Accepted, OfferStatus::Rejected]
        );
        let kinds: Vec<NotificationKind> = outbox.events.iter().map(|e| e.kind).collect();
        assert_eq!(kinds.iter().filter(|k| **k == NotificationKind::OfferRejected).count(), 2);
        assert_eq!(kinds.last(), Some(&NotificationKind::OfferAccepted));
    }

    #[test]
    fn accept_by_stranger_forbidden() {
        let f = fixture();
        let offer = f.submit(&Actor::carrier(UserId::new()), 500).unwrap();
        let err = f.accept(&Actor::shipper(UserId::new()), offer.id).unwrap_err();
        assert!(matches!(err, LoadmatchError::Forbidden { .. }));
        assert!(f.offers().iter().all(|o| o.status == OfferStatus::Pending));
    }

    #[test]
    fn second_accept_loses() {
        let f = fixture();
        let a = f.submit(&Actor::carrier(UserId::new()), 500).unwrap();
        let b = f.submit(&Actor::carrier(UserId::new()), 600).unwrap();
        f.accept(&f.shipper, a.id).unwrap();
        let err = f.accept(&f.shipper, b.id).unwrap_err();
        assert!(matches!(err, LoadmatchError::AlreadyAccepted(id) if id == f.shipment.id));

        // Re-accepting the winner is a lifecycle conflict, not a second accept.
        let err = f.accept(&f.shipper, a.id).unwrap_err();
        assert!(matches!(err, LoadmatchError::NotPending { status: OfferStatus::Accepted, .. }));
    }

    #[test]
    fn self_offer_and_duplicate_pending() {
        let f = fixture();
        let as_carrier = Actor::carrier(f.shipper.user_id);
        assert!(matches!(
            f.submit(&as_carrier, 500).unwrap_err(),
            LoadmatchError::SelfOffer(_)
        ));

        let carrier = Actor::carrier(UserId::new());
        f.submit(&carrier, 500).unwrap();
        assert!(matches!(
            f.submit(&carrier, 450).unwrap_err(),
            LoadmatchError::DuplicatePending { .. }
        ));
    }

    #[test]
    fn submit_after_accept_is_not_open() {
        let f = fixture();
        let a = f.submit(&Actor::carrier(UserId::new()), 500).unwrap();
        f.accept(&f.shipper, a.id).unwrap();
        let err = f.submit(&Actor::carrier(UserId::new()), 400).unwrap_err();
        assert!(matches!(
            err,
            LoadmatchError::NotOpen {
                status: ShipmentStatus::Accepted,
                ..
            }
        ));
    }

    #[test]
    fn expired_offer_cannot_be_accepted_and_is_swept() {
        let f = fixture();
        let offer = f.submit(&Actor::carrier(UserId::new()), 500).unwrap();
        let later = Utc::now() + Duration::days(8);

        let err = transact(&f.store, |uow| {
            let mut outbox = Outbox::new(later);
            f.engine.accept(uow, &f.shipper, offer.id, &mut outbox, later)
        })
        .unwrap_err();
        assert!(matches!(err, LoadmatchError::NotPending { status: OfferStatus::Expired, .. }));

        let swept = transact(&f.store, |uow| f.engine.expire_stale(uow, later)).unwrap();
        assert_eq!(swept, vec![offer.id]);
        assert_eq!(f.offers()[0].status, OfferStatus::Expired);
    }

    impl Fixture {
        fn counter(&self, actor: &Actor, parent: OfferId, price: i64) -> Result<(Offer, Outbox)> {
            transact(&self.store, |uow| {
                let mut outbox = Outbox::new(Utc::now());
                let counter = self.engine.counter(
                    uow,
                    actor,
                    parent,
                    OfferTerms::new(Decimal::new(price, 0), Some("can do 450".into())),
                    &mut outbox,
                    Utc::now(),
                )?;
                Ok((counter, outbox))
            })
        }

        fn reject(&self, actor: &Actor, offer: OfferId, now: DateTime<Utc>) -> Result<Offer> {
            transact(&self.store, |uow| {
                let mut outbox = Outbox::new(now);
                self.engine.reject(uow, actor, offer, &mut outbox, now)
            })
        }
    }

    #[test]
    fn counter_offer_is_decided_by_the_shipper() {
        let f = fixture();
        let carrier = Actor::carrier(UserId::new());
        let original = f.submit(&carrier, 500).unwrap();

        assert!(matches!(
            f.counter(&f.shipper, original.id, 450).unwrap_err(),
            LoadmatchError::Forbidden { .. }
        ));

        let (counter, outbox) = f.counter(&carrier, original.id, 450).unwrap();
        assert_eq!(counter.parent_offer_id, Some(original.id));
        assert_eq!(counter.carrier_id, carrier.user_id);
        assert_eq!(counter.status, OfferStatus::Pending);
        assert_eq!(outbox.events[0].kind, NotificationKind::CounterOffer);
        assert_eq!(outbox.events[0].target_user_id, f.shipper.user_id);
        assert_eq!(f.offers()[0].status, OfferStatus::Rejected);

        assert!(matches!(
            f.accept(&carrier, counter.id).unwrap_err(),
            LoadmatchError::Forbidden { .. }
        ));
        let (accepted, _) = f.accept(&f.shipper, counter.id).unwrap();
        assert_eq!(accepted.shipment.price, Some(Decimal::new(450, 0)));
    }

    #[test]
    fn carrier_counters_a_declined_offer() {
        let f = fixture();
        let carrier = Actor::carrier(UserId::new());
        let original = f.submit(&carrier, 500).unwrap();
        f.reject(&f.shipper, original.id, Utc::now()).unwrap();

        let (counter, _) = f.counter(&carrier, original.id, 450).unwrap();
        assert_eq!(counter.parent_offer_id, Some(original.id));

        // The counter is now the carrier's pending offer.
        assert!(matches!(
            f.counter(&carrier, original.id, 440).unwrap_err(),
            LoadmatchError::DuplicatePending { .. }
        ));
    }

    #[test]
    fn lapsed_offer_cannot_be_rejected() {
        let f = fixture();
        let carrier = Actor::carrier(UserId::new());
        let offer = f.submit(&carrier, 500).unwrap();
        let later = Utc::now() + Duration::days(8);

        for actor in [&f.shipper, &carrier] {
            let err = f.reject(actor, offer.id, later).unwrap_err();
            assert!(matches!(
                err,
                LoadmatchError::AlreadyDecided { entity: "Offer", ref state, .. } if state == "expired"
            ));
        }
        assert_eq!(f.offers()[0].status, OfferStatus::Pending);
    }

    #[test]
    fn accept_expires_lapsed_siblings_instead_of_rejecting() {
        let f = fixture();
        let stale = f.submit(&Actor::carrier(UserId::new()), 500).unwrap();
        let later = Utc::now() + Duration::days(8);
        let fresh = transact(&f.store, |uow| {
            let mut outbox = Outbox::new(later);
            f.engine.submit(
                uow,
                &Actor::carrier(UserId::new()),
                f.shipment.id,
                OfferTerms::new(Decimal::new(480, 0), None),
                &mut outbox,
                later,
            )
        })
        .unwrap();

        let (accepted, outbox) = transact(&f.store, |uow| {
            let mut outbox = Outbox::new(later);
            let accepted = f.engine.accept(uow, &f.shipper, fresh.id, &mut outbox, later)?;
            Ok((accepted, outbox))
        })
        .unwrap();
        assert!(accepted.rejected.is_empty());
        assert!(
            outbox
                .events
                .iter()
                .all(|e| e.kind != NotificationKind::OfferRejected)
        );
        let stored = transact(&f.store, |uow| uow.offer(stale.id)).unwrap().unwrap();
        assert_eq!(stored.status, OfferStatus::Expired);
    }

    #[test]
    fn reject_twice_is_already_decided() {
        let f = fixture();
        let carrier = Actor::carrier(UserId::new());
        let offer = f.submit(&carrier, 500).unwrap();
        let reject = |actor: &Actor| {
            transact(&f.store, |uow| {
                let mut outbox = Outbox::new(Utc::now());
                f.engine.reject(uow, actor, offer.id, &mut outbox, Utc::now())
            })
        };
        reject(&carrier).unwrap();
        assert!(matches!(
            reject(&f.shipper).unwrap_err(),
            LoadmatchError::AlreadyDecided { entity: "Offer", .. }
        ));
        // A withdrawn offer frees the carrier to bid again.
        f.submit(&carrier, 520).unwrap();
    }
}
