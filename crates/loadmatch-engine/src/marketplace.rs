//! The marketplace facade.
//!
//! Every mutating operation runs the same pipeline:
//! 1. Backpressure admission for the route (reject, or wait out a delay)
//! 2. One unit of work holding the idempotency check, the domain work and
//!    the idempotency record
//! 3. Commit
//! 4. Post-commit effects: carrier payouts for shipments that just completed,
//!    each in its own unit, then notifications
//!
//! Nothing in step 4 can fail the request. A payout that fails is logged and
//! left for [`Marketplace::retry_payout`].

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use loadmatch_ingress::{Admission, Backpressure, CallerIdentity};
use loadmatch_store::{LedgerStore, UnitOfWork, transact};
use loadmatch_types::{
    Actor, EngineConfig, Escrow, IdempotencyKey, LedgerTransaction, Listing, LoadmatchError,
    NotificationEvent, Offer, OfferId, RequestSignature, Result, Role, Route, Shipment,
    ShipmentDetails, ShipmentId, ShipmentStatus, UserId, Wallet,
};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::audit::{LedgerAudit, LedgerSummary};
use crate::clock::{Clock, SystemClock};
use crate::idempotency::IdempotencyGuard;
use crate::notify::{NotificationSink, publish_all};
use crate::offers::{AcceptedOffer, OfferEngine, OfferTerms, load_offer, load_shipment};
use crate::outbox::Outbox;
use crate::shipments::ShipmentMachine;
use crate::wallet::WalletService;

/// Who is calling and how the call should be deduplicated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub actor: Actor,
    pub caller: CallerIdentity,
    pub idempotency_key: Option<IdempotencyKey>,
}

impl RequestContext {
    #[must_use]
    pub fn new(actor: Actor, caller: CallerIdentity) -> Self {
        Self {
            actor,
            caller,
            idempotency_key: None,
        }
    }

    /// Context for in-process callers with no network address.
    #[must_use]
    pub fn local(actor: Actor) -> Self {
        Self::new(actor, CallerIdentity::from_ip(IpAddr::V4(Ipv4Addr::LOCALHOST)))
    }

    #[must_use]
    pub fn with_key(mut self, key: IdempotencyKey) -> Self {
        self.idempotency_key = Some(key);
        self
    }
}

/// Reply of a mutating operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply<T> {
    pub body: T,
    /// `true` if this is the stored reply of an earlier request with the
    /// same idempotency key.
    pub replayed: bool,
}

pub struct Marketplace<S: LedgerStore> {
    store: S,
    config: EngineConfig,
    backpressure: Backpressure,
    offers: OfferEngine,
    shipments: ShipmentMachine,
    wallet: WalletService,
    sink: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    /// Origin of the monotonic milliseconds fed to backpressure.
    epoch: Instant,
}

impl<S: LedgerStore> Marketplace<S> {
    /// Build a marketplace over `store`.
    ///
    /// # Errors
    /// Returns `Configuration` if `config` does not validate.
    pub fn new(store: S, config: EngineConfig, sink: Arc<dyn NotificationSink>) -> Result<Self> {
        config.validate()?;
        let wallet = WalletService::new(config.default_commission_rate);
        tracing::info!(
            commission_rate = %config.default_commission_rate,
            offer_ttl_days = config.offer_ttl_days,
            throttled_routes = config.backpressure.routes.len(),
            "Marketplace started"
        );
        Ok(Self {
            backpressure: Backpressure::new(&config.backpressure),
            offers: OfferEngine::new(config.offer_ttl(), wallet),
            shipments: ShipmentMachine::new(wallet),
            wallet,
            sink,
            clock: Arc::new(SystemClock),
            epoch: Instant::now(),
            store,
            config,
        })
    }

    /// Replace the wall clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    // --- shipments ---

    pub async fn create_shipment(
        &self,
        ctx: &RequestContext,
        details: ShipmentDetails,
    ) -> Result<Reply<Shipment>> {
        self.execute(Route::CreateShipment, ctx, None, |uow, outbox, now| {
            self.shipments.create(uow, &ctx.actor, details, outbox, now)
        })
        .await
    }

    pub async fn update_shipment_status(
        &self,
        ctx: &RequestContext,
        shipment_id: ShipmentId,
        target: ShipmentStatus,
    ) -> Result<Reply<Shipment>> {
        self.execute(
            Route::UpdateShipmentStatus,
            ctx,
            Some(shipment_id.to_string()),
            |uow, outbox, now| {
                self.shipments
                    .update_status(uow, &ctx.actor, shipment_id, target, outbox, now)
            },
        )
        .await
    }

    pub async fn assign_driver(
        &self,
        ctx: &RequestContext,
        shipment_id: ShipmentId,
        driver_id: UserId,
    ) -> Result<Reply<Shipment>> {
        self.execute(
            Route::AssignDriver,
            ctx,
            Some(shipment_id.to_string()),
            |uow, outbox, now| {
                self.shipments
                    .assign_driver(uow, &ctx.actor, shipment_id, driver_id, outbox, now)
            },
        )
        .await
    }

    pub async fn cancel_shipment(
        &self,
        ctx: &RequestContext,
        shipment_id: ShipmentId,
        reason: &str,
    ) -> Result<Reply<Shipment>> {
        self.execute(
            Route::CancelShipment,
            ctx,
            Some(shipment_id.to_string()),
            |uow, outbox, now| {
                self.shipments
                    .cancel(uow, &ctx.actor, shipment_id, reason, outbox, now)
            },
        )
        .await
    }

    /// Admin dispute resolution on a completed, paid shipment.
    pub async fn reverse_completed(
        &self,
        ctx: &RequestContext,
        shipment_id: ShipmentId,
        reason: &str,
    ) -> Result<Reply<Shipment>> {
        self.execute(
            Route::ReverseCompleted,
            ctx,
            Some(shipment_id.to_string()),
            |uow, outbox, now| {
                self.shipments
                    .reverse_completed(uow, &ctx.actor, shipment_id, reason, outbox, now)
            },
        )
        .await
    }

    pub async fn open_listing(
        &self,
        ctx: &RequestContext,
        shipment_id: ShipmentId,
    ) -> Result<Reply<Listing>> {
        self.execute(
            Route::OpenListing,
            ctx,
            Some(shipment_id.to_string()),
            |uow, _, now| self.shipments.open_listing(uow, &ctx.actor, shipment_id, now),
        )
        .await
    }

    // --- offers ---

    pub async fn submit_offer(
        &self,
        ctx: &RequestContext,
        shipment_id: ShipmentId,
        terms: OfferTerms,
    ) -> Result<Reply<Offer>> {
        let body = serde_json::to_string(&terms)?;
        self.execute_with_body(
            Route::SubmitOffer,
            ctx,
            Some(shipment_id.to_string()),
            body,
            |uow, outbox, now| {
                self.offers
                    .submit(uow, &ctx.actor, shipment_id, terms, outbox, now)
            },
        )
        .await
    }

    pub async fn counter_offer(
        &self,
        ctx: &RequestContext,
        offer_id: OfferId,
        terms: OfferTerms,
    ) -> Result<Reply<Offer>> {
        let body = serde_json::to_string(&terms)?;
        self.execute_with_body(
            Route::CounterOffer,
            ctx,
            Some(offer_id.to_string()),
            body,
            |uow, outbox, now| self.offers.counter(uow, &ctx.actor, offer_id, terms, outbox, now),
        )
        .await
    }

    /// Exclusive accept. Of any number of concurrent accepts on offers of the
    /// same shipment, exactly one commits; the rest fail with
    /// `AlreadyAccepted` or `NotPending`.
    pub async fn accept_offer(
        &self,
        ctx: &RequestContext,
        offer_id: OfferId,
    ) -> Result<Reply<AcceptedOffer>> {
        self.execute(
            Route::AcceptOffer,
            ctx,
            Some(offer_id.to_string()),
            |uow, outbox, now| self.offers.accept(uow, &ctx.actor, offer_id, outbox, now),
        )
        .await
    }

    pub async fn reject_offer(
        &self,
        ctx: &RequestContext,
        offer_id: OfferId,
    ) -> Result<Reply<Offer>> {
        self.execute(
            Route::RejectOffer,
            ctx,
            Some(offer_id.to_string()),
            |uow, outbox, now| self.offers.reject(uow, &ctx.actor, offer_id, outbox, now),
        )
        .await
    }

    // --- wallet ---

    /// A carrier adds funds to their own wallet.
    pub async fn deposit(
        &self,
        ctx: &RequestContext,
        amount: Decimal,
    ) -> Result<Reply<LedgerTransaction>> {
        let carrier = wallet_owner(&ctx.actor)?;
        self.execute_with_body(
            Route::Deposit,
            ctx,
            None,
            amount.normalize().to_string(),
            |uow, _, now| self.wallet.deposit(uow, carrier, amount, now),
        )
        .await
    }

    /// A carrier takes funds out of their own wallet.
    pub async fn withdraw(
        &self,
        ctx: &RequestContext,
        amount: Decimal,
    ) -> Result<Reply<LedgerTransaction>> {
        let carrier = wallet_owner(&ctx.actor)?;
        self.execute_with_body(
            Route::Withdraw,
            ctx,
            None,
            amount.normalize().to_string(),
            |uow, _, now| self.wallet.withdraw(uow, carrier, amount, now),
        )
        .await
    }

    // --- maintenance ---

    /// Admission check for routes served outside the engine, such as login.
    pub async fn admit(&self, route: Route, caller: &CallerIdentity) -> Result<()> {
        match self.backpressure.admit(route, caller, self.now_ms())? {
            Admission::Proceed => Ok(()),
            Admission::Delay(delay) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
        }
    }

    /// Expire every pending offer past its TTL.
    pub fn sweep_expired_offers(&self) -> Result<Vec<OfferId>> {
        let now = self.clock.now();
        transact(&self.store, |uow| self.offers.expire_stale(uow, now))
    }

    /// Pay the carrier of a completed shipment whose post-commit payout
    /// failed. Admin only.
    ///
    /// # Errors
    /// Returns `AlreadyDecided` if the carrier was already paid.
    pub fn retry_payout(&self, actor: &Actor, shipment_id: ShipmentId) -> Result<LedgerTransaction> {
        if !actor.is_admin() {
            return Err(LoadmatchError::forbidden("only admins can retry payouts"));
        }
        let (entry, events) = self.settle(shipment_id)?;
        publish_all(self.sink.as_ref(), &events);
        Ok(entry)
    }

    /// Drop backpressure state for callers idle past every window.
    pub fn evict_idle_callers(&self) {
        self.backpressure.evict_idle(self.now_ms());
    }

    // --- reads ---

    pub fn shipment(&self, id: ShipmentId) -> Result<Shipment> {
        self.read(|uow| load_shipment(uow, id))
    }

    pub fn offer(&self, id: OfferId) -> Result<Offer> {
        self.read(|uow| load_offer(uow, id))
    }

    pub fn offers_for_shipment(&self, id: ShipmentId) -> Result<Vec<Offer>> {
        self.read(|uow| uow.offers_for_shipment(id))
    }

    pub fn wallet(&self, carrier_id: UserId) -> Result<Option<Wallet>> {
        self.read(|uow| uow.wallet(carrier_id))
    }

    pub fn ledger(&self, carrier_id: UserId) -> Result<Vec<LedgerTransaction>> {
        self.read(|uow| uow.ledger_for_wallet(carrier_id))
    }

    pub fn escrow(&self, shipment_id: ShipmentId) -> Result<Option<Escrow>> {
        self.read(|uow| uow.escrow_for_shipment(shipment_id))
    }

    /// Replay a carrier's ledger against their wallet.
    pub fn audit_wallet(&self, carrier_id: UserId) -> Result<LedgerSummary> {
        self.read(|uow| {
            let wallet = uow
                .wallet(carrier_id)?
                .ok_or_else(|| LoadmatchError::not_found("Wallet", carrier_id))?;
            LedgerAudit::verify(&wallet, &uow.ledger_for_wallet(carrier_id)?)
        })
    }

    // --- pipeline ---

    async fn execute<T, F>(
        &self,
        route: Route,
        ctx: &RequestContext,
        target: Option<String>,
        op: F,
    ) -> Result<Reply<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&mut dyn UnitOfWork, &mut Outbox, DateTime<Utc>) -> Result<T>,
    {
        self.execute_with_body(route, ctx, target, String::new(), op)
            .await
    }

    /// `body` joins the idempotency fingerprint, so a key reused with a
    /// different payload conflicts instead of replaying.
    async fn execute_with_body<T, F>(
        &self,
        route: Route,
        ctx: &RequestContext,
        target: Option<String>,
        body: String,
        op: F,
    ) -> Result<Reply<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&mut dyn UnitOfWork, &mut Outbox, DateTime<Utc>) -> Result<T>,
    {
        self.admit(route, &ctx.caller).await?;

        let now = self.clock.now();
        let (method, template) = route.method_and_path();
        let path = match target {
            Some(id) => template.replace("{id}", &id),
            None => template.to_string(),
        };
        let signature = RequestSignature::new(method, path, ctx.actor.user_id).with_body(body);
        let mut outbox = Outbox::new(now);

        let guarded = transact(&self.store, |uow| {
            IdempotencyGuard::run(uow, ctx.idempotency_key.as_ref(), &signature, now, |uow| {
                op(uow, &mut outbox, now)
            })
        })
        .inspect_err(|err| {
            if err.is_client_conflict() {
                tracing::debug!(route = %route, actor = %ctx.actor.user_id, error = %err, "Request refused");
            } else {
                tracing::warn!(route = %route, actor = %ctx.actor.user_id, error = %err, "Request failed");
            }
        })?;

        self.flush(outbox);
        Ok(Reply {
            body: guarded.value,
            replayed: guarded.replayed,
        })
    }

    fn flush(&self, outbox: Outbox) {
        let mut events = outbox.events;
        for shipment_id in outbox.payouts {
            match self.settle(shipment_id) {
                Ok((_, paid)) => events.extend(paid),
                Err(err) => tracing::error!(
                    shipment = %shipment_id,
                    error = %err,
                    "Carrier payout failed, shipment stays completed and unpaid"
                ),
            }
        }
        publish_all(self.sink.as_ref(), &events);
    }

    fn settle(&self, shipment_id: ShipmentId) -> Result<(LedgerTransaction, Vec<NotificationEvent>)> {
        let now = self.clock.now();
        transact(&self.store, |uow| {
            let mut outbox = Outbox::new(now);
            let entry = self
                .shipments
                .settle_completion(uow, shipment_id, &mut outbox, now)?;
            Ok((entry, outbox.events))
        })
    }

    fn read<T>(&self, f: impl FnOnce(&dyn UnitOfWork) -> Result<T>) -> Result<T> {
        let uow = self.store.begin()?;
        f(uow.as_ref())
    }

    fn now_ms(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

fn wallet_owner(actor: &Actor) -> Result<UserId> {
    if actor.role == Role::Carrier {
        Ok(actor.user_id)
    } else {
        Err(LoadmatchError::forbidden("only carriers hold wallets"))
    }
}
