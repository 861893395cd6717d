//! Wallet Service: carrier payouts, reversals, deposits and withdrawals.
//!
//! Every method runs inside the caller's unit of work, which serialises all
//! wallet mutations. Each balance change appends exactly one ledger row.
//!
//! Commission is recomputed from the shipment price and the wallet's rate at
//! payout and reversal time. The quote held on the escrow at acceptance only
//! feeds `pending_commissions`.

use chrono::{DateTime, Utc};
use loadmatch_store::UnitOfWork;
use loadmatch_types::{
    Escrow, EscrowStatus, LedgerTransaction, LoadmatchError, NotificationKind, Offer,
    PayoutStatus, Result, Reversal, Shipment, UserId, Wallet, money,
};
use rust_decimal::Decimal;

use crate::outbox::Outbox;

#[derive(Debug, Clone, Copy)]
pub struct WalletService {
    /// Commission rate given to lazily opened wallets.
    default_rate: Decimal,
}

impl WalletService {
    #[must_use]
    pub fn new(default_rate: Decimal) -> Self {
        Self { default_rate }
    }

    /// Load a carrier's wallet, opening an empty one on first use.
    pub fn load_or_open(
        &self,
        uow: &mut dyn UnitOfWork,
        carrier_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<Wallet> {
        match uow.wallet(carrier_id)? {
            Some(wallet) => Ok(wallet),
            None => {
                tracing::debug!(carrier = %carrier_id, rate = %self.default_rate, "Opening wallet");
                Ok(Wallet::open(carrier_id, self.default_rate, now))
            }
        }
    }

    /// Create the escrow placeholder for an accepted offer and hold its
    /// commission quote on the carrier's wallet.
    pub fn hold_escrow(
        &self,
        uow: &mut dyn UnitOfWork,
        offer: &Offer,
        now: DateTime<Utc>,
    ) -> Result<Escrow> {
        let mut wallet = self.load_or_open(uow, offer.carrier_id, now)?;
        let quote = wallet.split(offer.price).commission;
        wallet.hold_commission(quote, now);
        let escrow = Escrow::pending(
            offer.shipment_id,
            offer.id,
            offer.carrier_id,
            offer.price,
            quote,
            now,
        );
        uow.put_wallet(wallet)?;
        uow.put_escrow(escrow.clone())?;
        Ok(escrow)
    }

    /// Pay the carrier of a completed shipment.
    ///
    /// The caller persists `shipment`.
    ///
    /// # Errors
    /// - `AlreadyDecided` if the shipment was already paid or reversed
    /// - `Validation` if it has no carrier or price
    pub fn pay_carrier(
        &self,
        uow: &mut dyn UnitOfWork,
        shipment: &mut Shipment,
        now: DateTime<Utc>,
        outbox: &mut Outbox,
    ) -> Result<LedgerTransaction> {
        if shipment.payout_status != PayoutStatus::Unpaid {
            return Err(payout_decided(shipment));
        }
        let carrier_id = shipment.assigned_carrier()?;
        let price = shipment.agreed_price()?;

        let mut wallet = self.load_or_open(uow, carrier_id, now)?;
        let (entry, split) = wallet.apply_payment(shipment.id, price, now);

        if let Some(mut escrow) = uow.escrow_for_shipment(shipment.id)? {
            if escrow.status == EscrowStatus::PendingRelease {
                wallet.release_commission(escrow.commission_quote, now);
                escrow.mark(EscrowStatus::Released, now)?;
                uow.put_escrow(escrow)?;
            }
        }

        uow.put_wallet(wallet)?;
        uow.append_ledger(entry.clone())?;
        shipment.payout_status = PayoutStatus::Paid;
        shipment.updated_at = now;

        tracing::info!(
            shipment = %shipment.id,
            carrier = %carrier_id,
            price = %price,
            commission = %split.commission,
            payout = %split.payout,
            balance = %entry.balance_after,
            "Carrier paid"
        );
        outbox.notify(
            NotificationKind::PaymentReceived,
            shipment.id,
            carrier_id,
            "Payment received",
            format!(
                "{} credited to your wallet ({} commission)",
                split.payout, split.commission
            ),
        );
        Ok(entry)
    }

    /// Claw back a carrier payout. The balance never goes below zero; any
    /// shortfall is logged.
    ///
    /// The caller persists `shipment`.
    pub fn reverse_payment(
        &self,
        uow: &mut dyn UnitOfWork,
        shipment: &mut Shipment,
        now: DateTime<Utc>,
    ) -> Result<Reversal> {
        if shipment.payout_status != PayoutStatus::Paid {
            return Err(payout_decided(shipment));
        }
        let carrier_id = shipment.assigned_carrier()?;
        let price = shipment.agreed_price()?;

        let mut wallet = self.load_or_open(uow, carrier_id, now)?;
        let reversal = wallet.apply_reversal(shipment.id, price, now);

        if let Some(mut escrow) = uow.escrow_for_shipment(shipment.id)? {
            if escrow.status == EscrowStatus::Released {
                escrow.mark(EscrowStatus::Refunded, now)?;
                uow.put_escrow(escrow)?;
            }
        }

        uow.put_wallet(wallet)?;
        uow.append_ledger(reversal.entry.clone())?;
        shipment.payout_status = PayoutStatus::Reversed;
        shipment.updated_at = now;

        if reversal.shortfall > Decimal::ZERO {
            tracing::warn!(
                shipment = %shipment.id,
                carrier = %carrier_id,
                payout = %reversal.split.payout,
                shortfall = %reversal.shortfall,
                "Reversal clamped at zero balance"
            );
        }
        tracing::info!(
            shipment = %shipment.id,
            carrier = %carrier_id,
            refunded = %reversal.split.payout,
            balance = %reversal.entry.balance_after,
            "Carrier payment reversed"
        );
        Ok(reversal)
    }

    /// Void a still-pending escrow and release its commission quote.
    ///
    /// Returns `false` if there was nothing to void.
    pub fn void_escrow(
        &self,
        uow: &mut dyn UnitOfWork,
        shipment: &Shipment,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let Some(mut escrow) = uow.escrow_for_shipment(shipment.id)? else {
            return Ok(false);
        };
        if escrow.status != EscrowStatus::PendingRelease {
            return Ok(false);
        }
        let mut wallet = self.load_or_open(uow, escrow.carrier_id, now)?;
        wallet.release_commission(escrow.commission_quote, now);
        escrow.mark(EscrowStatus::Voided, now)?;
        tracing::debug!(
            shipment = %shipment.id,
            escrow = %escrow.id,
            quote = %escrow.commission_quote,
            "Escrow voided"
        );
        uow.put_wallet(wallet)?;
        uow.put_escrow(escrow)?;
        Ok(true)
    }

    /// Add funds to a carrier's wallet.
    pub fn deposit(
        &self,
        uow: &mut dyn UnitOfWork,
        carrier_id: UserId,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<LedgerTransaction> {
        let amount = money::positive(amount, "deposit amount")?;
        let mut wallet = self.load_or_open(uow, carrier_id, now)?;
        let entry = wallet.apply_deposit(amount, now);
        uow.put_wallet(wallet)?;
        uow.append_ledger(entry.clone())?;
        tracing::info!(carrier = %carrier_id, amount = %amount, balance = %entry.balance_after, "Deposit");
        Ok(entry)
    }

    /// Take funds out of a carrier's wallet.
    ///
    /// # Errors
    /// Returns `InsufficientFunds` if `amount` exceeds the balance.
    pub fn withdraw(
        &self,
        uow: &mut dyn UnitOfWork,
        carrier_id: UserId,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<LedgerTransaction> {
        let amount = money::positive(amount, "withdrawal amount")?;
        let mut wallet = self.load_or_open(uow, carrier_id, now)?;
        let entry = wallet.apply_withdrawal(amount, now)?;
        uow.put_wallet(wallet)?;
        uow.append_ledger(entry.clone())?;
        tracing::info!(carrier = %carrier_id, amount = %amount, balance = %entry.balance_after, "Withdrawal");
        Ok(entry)
    }
}

fn payout_decided(shipment: &Shipment) -> LoadmatchError {
    LoadmatchError::AlreadyDecided {
        entity: "Payout",
        id: shipment.id.to_string(),
        state: format!("{:?}", shipment.payout_status).to_lowercase(),
    }
}
