//! In-memory [`LedgerStore`].
//!
//! A unit of work holds the table lock from `begin` until it is committed or
//! dropped, so units are fully serialised. Writes are staged in an overlay and
//! applied to the tables only on commit.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use rust_decimal::Decimal;

use loadmatch_types::{
    Escrow, IdempotencyKey, IdempotencyRecord, LedgerTransaction, Listing, ListingId,
    LoadmatchError, Offer, OfferId, OfferStatus, Result, Shipment, ShipmentId, Wallet, WalletId,
};

use crate::port::{LedgerStore, UnitOfWork};

/// The logical tables.
#[derive(Debug, Default)]
struct Tables {
    shipments: HashMap<ShipmentId, Shipment>,
    offers: HashMap<OfferId, Offer>,
    wallets: HashMap<WalletId, Wallet>,
    ledger: Vec<LedgerTransaction>,
    /// One escrow per shipment.
    escrows: HashMap<ShipmentId, Escrow>,
    listings: HashMap<ListingId, Listing>,
    idempotency: HashMap<IdempotencyKey, IdempotencyRecord>,
}

impl Tables {
    fn write_count(&self) -> usize {
        self.shipments.len()
            + self.offers.len()
            + self.wallets.len()
            + self.ledger.len()
            + self.escrows.len()
            + self.listings.len()
            + self.idempotency.len()
    }
}

/// Thread-safe in-memory ledger store.
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    tables: Mutex<Tables>,
    fail_next_commit: AtomicBool,
}

impl InMemoryLedgerStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next commit fail with `StoreUnavailable`, discarding the unit.
    ///
    /// Used to exercise the rollback paths.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Number of committed ledger rows across all wallets.
    pub fn ledger_len(&self) -> Result<usize> {
        Ok(self.lock()?.ledger.len())
    }

    /// Number of committed idempotency records.
    pub fn idempotency_len(&self) -> Result<usize> {
        Ok(self.lock()?.idempotency.len())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| LoadmatchError::StoreUnavailable("table lock poisoned".into()))
    }
}

impl LedgerStore for InMemoryLedgerStore {
    fn begin(&self) -> Result<Box<dyn UnitOfWork + '_>> {
        Ok(Box::new(MemoryUnit {
            base: self.lock()?,
            staged: Tables::default(),
            fail_commit: &self.fail_next_commit,
        }))
    }
}

/// A unit of work over [`InMemoryLedgerStore`].
struct MemoryUnit<'a> {
    base: MutexGuard<'a, Tables>,
    staged: Tables,
    fail_commit: &'a AtomicBool,
}

impl MemoryUnit<'_> {
    /// Merged view of a shipment's offers, oldest first.
    fn merged_offers(&self, filter: impl Fn(&Offer) -> bool) -> Vec<Offer> {
        let mut offers: Vec<Offer> = self
            .base
            .offers
            .values()
            .filter(|o| !self.staged.offers.contains_key(&o.id))
            .chain(self.staged.offers.values())
            .filter(|o| filter(o))
            .cloned()
            .collect();
        offers.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        offers
    }
}

impl UnitOfWork for MemoryUnit<'_> {
    fn shipment(&self, id: ShipmentId) -> Result<Option<Shipment>> {
        Ok(self
            .staged
            .shipments
            .get(&id)
            .or_else(|| self.base.shipments.get(&id))
            .cloned())
    }

    fn put_shipment(&mut self, shipment: Shipment) -> Result<()> {
        self.staged.shipments.insert(shipment.id, shipment);
        Ok(())
    }

    fn offer(&self, id: OfferId) -> Result<Option<Offer>> {
        Ok(self
            .staged
            .offers
            .get(&id)
            .or_else(|| self.base.offers.get(&id))
            .cloned())
    }

    fn offers_for_shipment(&self, shipment_id: ShipmentId) -> Result<Vec<Offer>> {
        Ok(self.merged_offers(|o| o.shipment_id == shipment_id))
    }

    fn pending_offers(&self) -> Result<Vec<Offer>> {
        Ok(self.merged_offers(|o| o.status == OfferStatus::Pending))
    }

    fn put_offer(&mut self, offer: Offer) -> Result<()> {
        let siblings = self.merged_offers(|o| o.shipment_id == offer.shipment_id && o.id != offer.id);
        match offer.status {
            OfferStatus::Pending
                if siblings
                    .iter()
                    .any(|o| o.status == OfferStatus::Pending && o.carrier_id == offer.carrier_id) =>
            {
                return Err(LoadmatchError::DuplicatePending {
                    shipment: offer.shipment_id,
                    carrier: offer.carrier_id,
                });
            }
            OfferStatus::Accepted if siblings.iter().any(|o| o.status == OfferStatus::Accepted) => {
                return Err(LoadmatchError::AlreadyAccepted(offer.shipment_id));
            }
            _ => {}
        }
        self.staged.offers.insert(offer.id, offer);
        Ok(())
    }

    fn wallet(&self, id: WalletId) -> Result<Option<Wallet>> {
        Ok(self
            .staged
            .wallets
            .get(&id)
            .or_else(|| self.base.wallets.get(&id))
            .cloned())
    }

    fn put_wallet(&mut self, wallet: Wallet) -> Result<()> {
        if wallet.balance < Decimal::ZERO {
            return Err(LoadmatchError::LedgerInvariantViolation {
                reason: format!("wallet {} balance {} below zero", wallet.carrier_id, wallet.balance),
            });
        }
        self.staged.wallets.insert(wallet.carrier_id, wallet);
        Ok(())
    }

    fn append_ledger(&mut self, entry: LedgerTransaction) -> Result<()> {
        self.staged.ledger.push(entry);
        Ok(())
    }

    fn ledger_for_wallet(&self, id: WalletId) -> Result<Vec<LedgerTransaction>> {
        Ok(self
            .base
            .ledger
            .iter()
            .chain(&self.staged.ledger)
            .filter(|e| e.wallet_id == id)
            .cloned()
            .collect())
    }

    fn escrow_for_shipment(&self, shipment_id: ShipmentId) -> Result<Option<Escrow>> {
        Ok(self
            .staged
            .escrows
            .get(&shipment_id)
            .or_else(|| self.base.escrows.get(&shipment_id))
            .cloned())
    }

    fn put_escrow(&mut self, escrow: Escrow) -> Result<()> {
        self.staged.escrows.insert(escrow.shipment_id, escrow);
        Ok(())
    }

    fn listings_for_shipment(&self, shipment_id: ShipmentId) -> Result<Vec<Listing>> {
        let mut listings: Vec<Listing> = self
            .base
            .listings
            .values()
            .filter(|l| !self.staged.listings.contains_key(&l.id))
            .chain(self.staged.listings.values())
            .filter(|l| l.shipment_id == shipment_id)
            .cloned()
            .collect();
        listings.sort_by_key(|l| l.id);
        Ok(listings)
    }

    fn put_listing(&mut self, listing: Listing) -> Result<()> {
        self.staged.listings.insert(listing.id, listing);
        Ok(())
    }

    fn idempotency_record(&self, key: &IdempotencyKey) -> Result<Option<IdempotencyRecord>> {
        Ok(self
            .staged
            .idempotency
            .get(key)
            .or_else(|| self.base.idempotency.get(key))
            .cloned())
    }

    fn insert_idempotency_record(&mut self, record: IdempotencyRecord) -> Result<()> {
        if self.idempotency_record(&record.key)?.is_some() {
            return Err(LoadmatchError::IdempotencyConflict {
                key: record.key.to_string(),
            });
        }
        self.staged.idempotency.insert(record.key.clone(), record);
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<()> {
        let MemoryUnit {
            mut base,
            staged,
            fail_commit,
        } = *self;

        if fail_commit.swap(false, Ordering::SeqCst) {
            tracing::warn!(
                writes = staged.write_count(),
                "Injected commit failure, unit discarded"
            );
            return Err(LoadmatchError::StoreUnavailable(
                "commit failed (injected)".into(),
            ));
        }

        let writes = staged.write_count();
        base.shipments.extend(staged.shipments);
        base.offers.extend(staged.offers);
        base.wallets.extend(staged.wallets);
        base.ledger.extend(staged.ledger);
        base.escrows.extend(staged.escrows);
        base.listings.extend(staged.listings);
        base.idempotency.extend(staged.idempotency);

        tracing::trace!(writes, "Unit of work committed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transact;
    use chrono::Utc;
    use loadmatch_types::{OfferStatus, UserId};
    use rust_decimal::Decimal;

    fn seeded() -> (InMemoryLedgerStore, Shipment) {
        let store = InMemoryLedgerStore::new();
        let shipment = Shipment::dummy(UserId::new());
        let s = shipment.clone();
        transact(&store, |uow| uow.put_shipment(s)).unwrap();
        (store, shipment)
    }

    #[test]
    fn committed_writes_are_visible() {
        let (store, shipment) = seeded();
        let got = transact(&store, |uow| uow.shipment(shipment.id)).unwrap();
        assert_eq!(got, Some(shipment));
    }

    #[test]
    fn dropped_unit_rolls_back() {
        let (store, shipment) = seeded();
        {
            let mut uow = store.begin().unwrap();
            let mut s = uow.shipment(shipment.id).unwrap().unwrap();
            s.cargo_description = "changed".into();
            uow.put_shipment(s).unwrap();
            // staged write visible inside the unit
            let inside = uow.shipment(shipment.id).unwrap().unwrap();
            assert_eq!(inside.cargo_description, "changed");
        }
        let after = transact(&store, |uow| uow.shipment(shipment.id)).unwrap().unwrap();
        assert_eq!(after.cargo_description, shipment.cargo_description);
    }

    #[test]
    fn failed_closure_discards_staged_writes() {
        let (store, shipment) = seeded();
        let carrier = UserId::new();
        let result: Result<()> = transact(&store, |uow| {
            uow.put_offer(Offer::dummy(shipment.id, carrier, Decimal::new(500, 0)))?;
            Err(LoadmatchError::validation("abort"))
        });
        assert!(result.is_err());
        let offers = transact(&store, |uow| uow.offers_for_shipment(shipment.id)).unwrap();
        assert!(offers.is_empty());
    }

    #[test]
    fn injected_commit_failure_discards_unit() {
        let (store, shipment) = seeded();
        store.fail_next_commit();
        let err = transact(&store, |uow| {
            uow.put_offer(Offer::dummy(shipment.id, UserId::new(), Decimal::new(500, 0)))
        })
        .unwrap_err();
        assert!(matches!(err, LoadmatchError::StoreUnavailable(_)));
        assert!(err.is_retryable());
        let offers = transact(&store, |uow| uow.offers_for_shipment(shipment.id)).unwrap();
        assert!(offers.is_empty());

        // Only the next commit fails.
        transact(&store, |uow| {
            uow.put_offer(Offer::dummy(shipment.id, UserId::new(), Decimal::new(500, 0)))
        })
        .unwrap();
    }

    #[test]
    fn second_pending_offer_per_carrier_rejected() {
        let (store, shipment) = seeded();
        let carrier = UserId::new();
        transact(&store, |uow| {
            uow.put_offer(Offer::dummy(shipment.id, carrier, Decimal::new(500, 0)))
        })
        .unwrap();
        let err = transact(&store, |uow| {
            uow.put_offer(Offer::dummy(shipment.id, carrier, Decimal::new(450, 0)))
        })
        .unwrap_err();
        assert!(matches!(err, LoadmatchError::DuplicatePending { .. }));

        // A different carrier is fine.
        transact(&store, |uow| {
            uow.put_offer(Offer::dummy(shipment.id, UserId::new(), Decimal::new(450, 0)))
        })
        .unwrap();
    }

    #[test]
    fn pending_allowed_after_previous_decided() {
        let (store, shipment) = seeded();
        let carrier = UserId::new();
        let mut first = Offer::dummy(shipment.id, carrier, Decimal::new(500, 0));
        transact(&store, |uow| uow.put_offer(first.clone())).unwrap();
        first.decide(OfferStatus::Rejected, Utc::now()).unwrap();
        transact(&store, |uow| {
            uow.put_offer(first)?;
            uow.put_offer(Offer::dummy(shipment.id, carrier, Decimal::new(480, 0)))
        })
        .unwrap();
    }

    #[test]
    fn second_accepted_offer_rejected() {
        let (store, shipment) = seeded();
        let mut a = Offer::dummy(shipment.id, UserId::new(), Decimal::new(500, 0));
        let mut b = Offer::dummy(shipment.id, UserId::new(), Decimal::new(600, 0));
        a.decide(OfferStatus::Accepted, Utc::now()).unwrap();
        b.decide(OfferStatus::Accepted, Utc::now()).unwrap();
        transact(&store, |uow| uow.put_offer(a)).unwrap();
        let err = transact(&store, |uow| uow.put_offer(b)).unwrap_err();
        assert!(matches!(err, LoadmatchError::AlreadyAccepted(id) if id == shipment.id));
    }

    #[test]
    fn negative_balance_never_stored() {
        let store = InMemoryLedgerStore::new();
        let mut wallet = Wallet::open(UserId::new(), Decimal::ONE, Utc::now());
        wallet.balance = Decimal::new(-1, 2);
        let err = transact(&store, |uow| uow.put_wallet(wallet)).unwrap_err();
        assert!(matches!(err, LoadmatchError::LedgerInvariantViolation { .. }));
    }

    #[test]
    fn ledger_keeps_append_order() {
        let store = InMemoryLedgerStore::new();
        let mut wallet = Wallet::open(UserId::new(), Decimal::ONE, Utc::now());
        let first = wallet.apply_deposit(Decimal::new(10, 0), Utc::now());
        transact(&store, |uow| uow.append_ledger(first.clone())).unwrap();
        let second = wallet.apply_deposit(Decimal::new(5, 0), Utc::now());
        let rows = transact(&store, |uow| {
            uow.append_ledger(second.clone())?;
            uow.ledger_for_wallet(wallet.carrier_id)
        })
        .unwrap();
        assert_eq!(rows, vec![first, second]);
        assert_eq!(store.ledger_len().unwrap(), 2);
    }

    #[test]
    fn units_are_serialised_across_threads() {
        let store = InMemoryLedgerStore::new();
        let carrier = UserId::new();
        transact(&store, |uow| {
            uow.put_wallet(Wallet::open(carrier, Decimal::ONE, Utc::now()))
        })
        .unwrap();

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..25 {
                        transact(&store, |uow| {
                            let mut w = uow.wallet(carrier)?.unwrap();
                            let entry = w.apply_deposit(Decimal::ONE, Utc::now());
                            uow.append_ledger(entry)?;
                            uow.put_wallet(w)
                        })
                        .unwrap();
                    }
                });
            }
        });

        let w = transact(&store, |uow| uow.wallet(carrier)).unwrap().unwrap();
        assert_eq!(w.balance, Decimal::new(200, 0));
        assert_eq!(store.ledger_len().unwrap(), 200);
    }
}
