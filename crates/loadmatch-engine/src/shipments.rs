//! # Shipment State Machine
//!
//! Owns every status change of a shipment after creation, except the
//! `open → accepted` move which belongs to the offer accept unit.
//!
//! ## Cancellation cascade
//!
//! Cancelling runs as one unit of work:
//! 1. Status → `cancelled`, reason recorded
//! 2. Every pending offer → `rejected`
//! 3. Every open listing → closed
//! 4. Past `open` with a price: `refund_amount = price`, `refund_status = pending`
//! 5. Carrier already paid: payout reversed, `refund_status = refunded`;
//!    otherwise a pending escrow is voided
//!
//! ## Completion
//!
//! Entering `completed` commits the status first. The carrier payout runs in
//! its own unit afterwards (see [`ShipmentMachine::settle_completion`]); a
//! failed payout never reverts the status.

use chrono::{DateTime, Utc};
use loadmatch_store::UnitOfWork;
use loadmatch_types::{
    Actor, LedgerTransaction, Listing, LoadmatchError, NotificationKind, PayoutStatus,
    RefundStatus, Result, Role, Shipment, ShipmentDetails, ShipmentId, ShipmentStatus, UserId,
    shipment::cancellation_reason,
};

use crate::offers::{load_shipment, reject_all_pending};
use crate::outbox::Outbox;
use crate::wallet::WalletService;

#[derive(Debug, Clone, Copy)]
pub struct ShipmentMachine {
    wallet: WalletService,
}

impl ShipmentMachine {
    #[must_use]
    pub fn new(wallet: WalletService) -> Self {
        Self { wallet }
    }

    /// Publish a new shipment in `open`.
    pub fn create(
        &self,
        uow: &mut dyn UnitOfWork,
        actor: &Actor,
        details: ShipmentDetails,
        outbox: &mut Outbox,
        now: DateTime<Utc>,
    ) -> Result<Shipment> {
        if !matches!(actor.role, Role::Shipper | Role::Admin) {
            return Err(LoadmatchError::forbidden("only shippers can create shipments"));
        }
        let shipment = Shipment::open(actor.user_id, details, now)?;
        uow.put_shipment(shipment.clone())?;

        tracing::info!(
            shipment = %shipment.id,
            shipper = %shipment.shipper_id,
            price = ?shipment.price,
            "Shipment created"
        );
        outbox.notify(
            NotificationKind::ShipmentCreated,
            shipment.id,
            shipment.shipper_id,
            "Shipment published",
            format!(
                "{} → {} is open for offers",
                shipment.pickup_address, shipment.delivery_address
            ),
        );
        Ok(shipment)
    }

    /// Move a shipment along the lifecycle.
    ///
    /// `accepted` and `assigned` are only reachable through offer acceptance
    /// and driver assignment. A `cancelled` target goes through [`Self::cancel`]
    /// with no reason and is held to the same guards.
    ///
    /// # Errors
    /// - `Validation` for `accepted` / `assigned` targets
    /// - `Forbidden` unless the actor is a party of the shipment or an admin
    /// - `InvalidTransition` if the table does not allow the move
    pub fn update_status(
        &self,
        uow: &mut dyn UnitOfWork,
        actor: &Actor,
        shipment_id: ShipmentId,
        target: ShipmentStatus,
        outbox: &mut Outbox,
        now: DateTime<Utc>,
    ) -> Result<Shipment> {
        if matches!(target, ShipmentStatus::Accepted | ShipmentStatus::Assigned) {
            return Err(LoadmatchError::validation(format!(
                "status {target} is set by offer acceptance or driver assignment"
            )));
        }
        if target == ShipmentStatus::Cancelled {
            return self.cancel(uow, actor, shipment_id, "", outbox, now);
        }
        let mut shipment = load_shipment(uow, shipment_id)?;
        if !actor.is_admin() && !shipment.is_party(actor.user_id) {
            return Err(LoadmatchError::forbidden(
                "only shipment parties can change its status",
            ));
        }
        let from = shipment.status;
        shipment.transition(target, now)?;
        uow.put_shipment(shipment.clone())?;

        tracing::info!(shipment = %shipment.id, from = %from, to = %target, actor = %actor.user_id, "Status changed");
        self.announce(&shipment, actor.user_id, outbox);
        if target == ShipmentStatus::Completed {
            outbox.schedule_payout(shipment.id);
        }
        Ok(shipment)
    }

    /// The shipment's carrier hands it to a driver.
    pub fn assign_driver(
        &self,
        uow: &mut dyn UnitOfWork,
        actor: &Actor,
        shipment_id: ShipmentId,
        driver_id: UserId,
        outbox: &mut Outbox,
        now: DateTime<Utc>,
    ) -> Result<Shipment> {
        let mut shipment = load_shipment(uow, shipment_id)?;
        if shipment.carrier_id != Some(actor.user_id) {
            return Err(LoadmatchError::forbidden(
                "only the shipment's carrier can assign a driver",
            ));
        }
        shipment.transition(ShipmentStatus::Assigned, now)?;
        shipment.driver_id = Some(driver_id);
        uow.put_shipment(shipment.clone())?;

        tracing::info!(shipment = %shipment.id, driver = %driver_id, "Driver assigned");
        outbox.notify_all(
            NotificationKind::DriverAssigned,
            shipment.id,
            [driver_id, shipment.shipper_id],
            None,
            "Driver assigned",
            &format!(
                "Driver assigned for {} → {}",
                shipment.pickup_address, shipment.delivery_address
            ),
        );
        Ok(shipment)
    }

    /// The shipper withdraws a shipment.
    ///
    /// # Errors
    /// - `Forbidden` unless the actor is the shipper
    /// - `AlreadyTerminal` if completed or cancelled
    /// - `Undeliverable` if delivered
    pub fn cancel(
        &self,
        uow: &mut dyn UnitOfWork,
        actor: &Actor,
        shipment_id: ShipmentId,
        reason: &str,
        outbox: &mut Outbox,
        now: DateTime<Utc>,
    ) -> Result<Shipment> {
        let mut shipment = load_shipment(uow, shipment_id)?;
        if actor.user_id != shipment.shipper_id {
            return Err(LoadmatchError::forbidden(
                "only the shipper can cancel a shipment",
            ));
        }
        if shipment.status.is_terminal() {
            return Err(LoadmatchError::AlreadyTerminal {
                shipment: shipment.id,
                status: shipment.status,
            });
        }
        if shipment.status == ShipmentStatus::Delivered {
            return Err(LoadmatchError::Undeliverable(shipment.id));
        }
        let reason = cancellation_reason(reason)?;
        self.cascade_cancel(uow, &mut shipment, reason, Some(actor.user_id), outbox, now)?;
        uow.put_shipment(shipment.clone())?;
        Ok(shipment)
    }

    /// Admin dispute resolution for a completed, paid shipment: the payout is
    /// reversed and the refund recorded. The status stays `completed`.
    pub fn reverse_completed(
        &self,
        uow: &mut dyn UnitOfWork,
        actor: &Actor,
        shipment_id: ShipmentId,
        reason: &str,
        outbox: &mut Outbox,
        now: DateTime<Utc>,
    ) -> Result<Shipment> {
        if !actor.is_admin() {
            return Err(LoadmatchError::forbidden(
                "only admins can reverse a completed shipment",
            ));
        }
        let mut shipment = load_shipment(uow, shipment_id)?;
        if shipment.status != ShipmentStatus::Completed {
            return Err(LoadmatchError::validation(format!(
                "shipment {} is {}, only completed shipments can be reversed",
                shipment.id, shipment.status
            )));
        }
        let reversal = self.wallet.reverse_payment(uow, &mut shipment, now)?;
        shipment.cancellation_reason = cancellation_reason(reason)?;
        shipment.refund_amount = shipment.price;
        shipment.refund_status = Some(RefundStatus::Refunded);
        uow.put_shipment(shipment.clone())?;

        let message = format!("Payment of {} reversed after dispute", reversal.split.payout);
        outbox.notify_all(
            NotificationKind::Cancelled,
            shipment.id,
            [shipment.shipper_id, reversal.entry.wallet_id],
            None,
            "Shipment payment reversed",
            &message,
        );
        Ok(shipment)
    }

    /// Pay the carrier of a completed shipment in its own unit of work.
    pub fn settle_completion(
        &self,
        uow: &mut dyn UnitOfWork,
        shipment_id: ShipmentId,
        outbox: &mut Outbox,
        now: DateTime<Utc>,
    ) -> Result<LedgerTransaction> {
        let mut shipment = load_shipment(uow, shipment_id)?;
        if shipment.status != ShipmentStatus::Completed {
            return Err(LoadmatchError::validation(format!(
                "shipment {} is {}, only completed shipments are paid",
                shipment.id, shipment.status
            )));
        }
        let entry = self.wallet.pay_carrier(uow, &mut shipment, now, outbox)?;
        uow.put_shipment(shipment)?;
        Ok(entry)
    }

    /// The shipment's carrier offers it on the driver market.
    pub fn open_listing(
        &self,
        uow: &mut dyn UnitOfWork,
        actor: &Actor,
        shipment_id: ShipmentId,
        now: DateTime<Utc>,
    ) -> Result<Listing> {
        let shipment = load_shipment(uow, shipment_id)?;
        if shipment.carrier_id != Some(actor.user_id) {
            return Err(LoadmatchError::forbidden(
                "only the shipment's carrier can list it",
            ));
        }
        if !shipment.status.is_past_open() || shipment.status.is_terminal() {
            return Err(LoadmatchError::validation(format!(
                "shipment {} is {}, listings need an active accepted shipment",
                shipment.id, shipment.status
            )));
        }
        let listing = Listing::open(shipment.id, actor.user_id, now);
        uow.put_listing(listing.clone())?;
        tracing::debug!(listing = %listing.id, shipment = %shipment.id, "Listing opened");
        Ok(listing)
    }

    fn cascade_cancel(
        &self,
        uow: &mut dyn UnitOfWork,
        shipment: &mut Shipment,
        reason: Option<String>,
        actor: Option<UserId>,
        outbox: &mut Outbox,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let was_past_open = shipment.status.is_past_open();
        shipment.transition(ShipmentStatus::Cancelled, now)?;
        shipment.cancellation_reason = reason;

        let rejected = reject_all_pending(uow, shipment.id, "The shipment was cancelled", outbox, now)?;

        let mut closed = 0usize;
        for mut listing in uow.listings_for_shipment(shipment.id)? {
            if listing.close(now) {
                closed += 1;
                uow.put_listing(listing)?;
            }
        }

        if was_past_open {
            if let Some(price) = shipment.price {
                shipment.refund_amount = Some(price);
                shipment.refund_status = Some(RefundStatus::Pending);
            }
        }

        if shipment.payout_status == PayoutStatus::Paid {
            self.wallet.reverse_payment(uow, shipment, now)?;
            shipment.refund_status = Some(RefundStatus::Refunded);
        } else {
            self.wallet.void_escrow(uow, shipment, now)?;
        }

        tracing::info!(
            shipment = %shipment.id,
            rejected = rejected.len(),
            listings_closed = closed,
            refund = ?shipment.refund_amount,
            refund_status = ?shipment.refund_status,
            "Shipment cancelled"
        );

        let message = match (shipment.refund_amount, shipment.refund_status) {
            (Some(amount), Some(RefundStatus::Refunded)) => {
                format!("Shipment cancelled. {amount} refunded from the carrier payout")
            }
            (Some(amount), _) => format!("Shipment cancelled. A refund of {amount} is pending"),
            _ => "Shipment cancelled".to_string(),
        };
        outbox.notify_all(
            NotificationKind::Cancelled,
            shipment.id,
            parties(shipment),
            actor,
            "Shipment cancelled",
            &message,
        );
        Ok(())
    }

    fn announce(&self, shipment: &Shipment, actor: UserId, outbox: &mut Outbox) {
        let (kind, title) = match shipment.status {
            ShipmentStatus::PickedUp => (NotificationKind::PickedUp, "Cargo picked up"),
            ShipmentStatus::InTransit => (NotificationKind::InTransit, "Shipment in transit"),
            ShipmentStatus::Delivered => (NotificationKind::Delivered, "Shipment delivered"),
            ShipmentStatus::Completed => (NotificationKind::Completed, "Shipment completed"),
            _ => return,
        };
        let message = format!(
            "{} → {} is now {}",
            shipment.pickup_address, shipment.delivery_address, shipment.status
        );
        outbox.notify_all(kind, shipment.id, parties(shipment), Some(actor), title, &message);
    }
}

/// Shipper, carrier and driver of a shipment.
fn parties(shipment: &Shipment) -> impl Iterator<Item = UserId> {
    std::iter::once(shipment.shipper_id)
        .chain(shipment.carrier_id)
        .chain(shipment.driver_id)
}
