//! The persistence port.
//!
//! Every mutation the engine performs runs inside one [`UnitOfWork`]. A unit
//! sees its own staged writes, and nothing it staged becomes visible to other
//! units until [`UnitOfWork::commit`] succeeds. Dropping a unit without
//! committing rolls it back.

use loadmatch_types::{
    Escrow, IdempotencyKey, IdempotencyRecord, LedgerTransaction, Listing, Offer, OfferId,
    Result, Shipment, ShipmentId, Wallet, WalletId,
};

/// One atomic, serialisable store transaction.
///
/// Constraint violations are reported from the write that breaks them, so the
/// engine can abort the whole unit before commit:
/// - [`put_offer`](Self::put_offer) rejects a second pending offer for the same
///   (shipment, carrier) with `DuplicatePending`, and a second accepted offer
///   for the same shipment with `AlreadyAccepted`.
/// - [`insert_idempotency_record`](Self::insert_idempotency_record) rejects an
///   existing key with `IdempotencyConflict`.
pub trait UnitOfWork {
    // --- shipments ---
    fn shipment(&self, id: ShipmentId) -> Result<Option<Shipment>>;
    fn put_shipment(&mut self, shipment: Shipment) -> Result<()>;

    // --- offers ---
    fn offer(&self, id: OfferId) -> Result<Option<Offer>>;
    /// All offers of a shipment, oldest first.
    fn offers_for_shipment(&self, shipment_id: ShipmentId) -> Result<Vec<Offer>>;
    /// Every offer still in `pending`, oldest first.
    fn pending_offers(&self) -> Result<Vec<Offer>>;
    fn put_offer(&mut self, offer: Offer) -> Result<()>;

    // --- wallets & ledger ---
    fn wallet(&self, id: WalletId) -> Result<Option<Wallet>>;
    fn put_wallet(&mut self, wallet: Wallet) -> Result<()>;
    /// Ledger rows are append-only.
    fn append_ledger(&mut self, entry: LedgerTransaction) -> Result<()>;
    /// A wallet's ledger in append order.
    fn ledger_for_wallet(&self, id: WalletId) -> Result<Vec<LedgerTransaction>>;

    // --- escrow ---
    fn escrow_for_shipment(&self, shipment_id: ShipmentId) -> Result<Option<Escrow>>;
    fn put_escrow(&mut self, escrow: Escrow) -> Result<()>;

    // --- listings ---
    fn listings_for_shipment(&self, shipment_id: ShipmentId) -> Result<Vec<Listing>>;
    fn put_listing(&mut self, listing: Listing) -> Result<()>;

    // --- idempotency ---
    fn idempotency_record(&self, key: &IdempotencyKey) -> Result<Option<IdempotencyRecord>>;
    fn insert_idempotency_record(&mut self, record: IdempotencyRecord) -> Result<()>;

    /// Make every staged write durable, all or nothing.
    fn commit(self: Box<Self>) -> Result<()>;
}

/// A store that hands out units of work.
pub trait LedgerStore: Send + Sync {
    /// Open a unit of work. Blocks while a conflicting unit is open.
    fn begin(&self) -> Result<Box<dyn UnitOfWork + '_>>;
}

/// Run `f` in a fresh unit of work and commit it if `f` succeeds.
///
/// On error the unit is dropped, which discards everything `f` staged.
pub fn transact<S, T, F>(store: &S, f: F) -> Result<T>
where
    S: LedgerStore + ?Sized,
    F: FnOnce(&mut dyn UnitOfWork) -> Result<T>,
{
    let mut uow = store.begin()?;
    let value = f(uow.as_mut())?;
    uow.commit()?;
    Ok(value)
}
