//! Carrier wallet and ledger types.
//!
//! Every carrier has one [`Wallet`]. Each mutation of a wallet produces
//! exactly one [`LedgerTransaction`] carrying a before/after snapshot, so the
//! balance can be reproduced from history alone.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{
    CommissionSplit, LedgerTxId, LoadmatchError, OfferId, Result, ShipmentId, UserId, WalletId,
};

/// The kind of balance mutation a ledger row records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEntryType {
    /// Carrier payout on completion (price minus commission).
    Payment,
    /// Reversal of a payout on cancellation or dispute.
    Refund,
    /// Platform commission booked without moving the balance.
    Commission,
    /// Funds added by the carrier.
    Deposit,
    /// Funds taken out by the carrier.
    Withdrawal,
    /// Escrowed funds released without moving the balance.
    PaymentRelease,
}

impl LedgerEntryType {
    /// Balance after applying a row of this type with `amount` to `before`.
    #[must_use]
    pub fn apply(self, before: Decimal, amount: Decimal) -> Decimal {
        match self {
            Self::Payment | Self::Deposit => before + amount,
            Self::Withdrawal => before - amount,
            Self::Refund => (before - amount).max(Decimal::ZERO),
            Self::Commission | Self::PaymentRelease => before,
        }
    }
}

impl std::fmt::Display for LedgerEntryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Payment => write!(f, "payment"),
            Self::Refund => write!(f, "refund"),
            Self::Commission => write!(f, "commission"),
            Self::Deposit => write!(f, "deposit"),
            Self::Withdrawal => write!(f, "withdrawal"),
            Self::PaymentRelease => write!(f, "payment_release"),
        }
    }
}

/// What a ledger row refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum LedgerReference {
    Shipment(ShipmentId),
    Offer(OfferId),
}

/// Append-only audit row for a single wallet mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerTransaction {
    pub id: LedgerTxId,
    pub wallet_id: WalletId,
    pub entry_type: LedgerEntryType,
    pub amount: Decimal,
    /// Commission attached to payment and refund rows; zero otherwise.
    pub commission: Decimal,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub reference: Option<LedgerReference>,
    pub created_at: DateTime<Utc>,
}

/// A carrier's wallet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    /// Wallets are keyed by their carrier.
    pub carrier_id: UserId,
    /// Spendable balance. Never negative.
    pub balance: Decimal,
    /// Commission quoted on accepted-but-unpaid shipments.
    pub pending_commissions: Decimal,
    pub total_commissions: Decimal,
    pub total_refunds: Decimal,
    /// Percentage applied at payout and reversal time (e.g. `1` = 1 %).
    pub commission_rate: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of a payout reversal.
#[derive(Debug, Clone, PartialEq)]
pub struct Reversal {
    pub entry: LedgerTransaction,
    pub split: CommissionSplit,
    /// Portion of the payout that could not be clawed back because the
    /// balance was already too low.
    pub shortfall: Decimal,
}

impl Wallet {
    /// An empty wallet for `carrier_id`.
    #[must_use]
    pub fn open(carrier_id: UserId, commission_rate: Decimal, now: DateTime<Utc>) -> Self {
        Self {
            carrier_id,
            balance: Decimal::ZERO,
            pending_commissions: Decimal::ZERO,
            total_commissions: Decimal::ZERO,
            total_refunds: Decimal::ZERO,
            commission_rate,
            created_at: now,
            updated_at: now,
        }
    }

    /// Split `price` at this wallet's commission rate.
    #[must_use]
    pub fn split(&self, price: Decimal) -> CommissionSplit {
        CommissionSplit::compute(price, self.commission_rate)
    }

    fn entry(
        &self,
        entry_type: LedgerEntryType,
        amount: Decimal,
        commission: Decimal,
        balance_before: Decimal,
        reference: Option<LedgerReference>,
        now: DateTime<Utc>,
    ) -> LedgerTransaction {
        LedgerTransaction {
            id: LedgerTxId::new(),
            wallet_id: self.carrier_id,
            entry_type,
            amount,
            commission,
            balance_before,
            balance_after: self.balance,
            reference,
            created_at: now,
        }
    }

    /// Book a commission quote at offer acceptance.
    pub fn hold_commission(&mut self, quote: Decimal, now: DateTime<Utc>) {
        self.pending_commissions += quote;
        self.updated_at = now;
    }

    /// Drop a commission quote (payout or cancellation). Clamped at zero.
    pub fn release_commission(&mut self, quote: Decimal, now: DateTime<Utc>) {
        self.pending_commissions = (self.pending_commissions - quote).max(Decimal::ZERO);
        self.updated_at = now;
    }

    /// Credit the carrier's payout for a completed shipment.
    pub fn apply_payment(
        &mut self,
        shipment_id: ShipmentId,
        price: Decimal,
        now: DateTime<Utc>,
    ) -> (LedgerTransaction, CommissionSplit) {
        let split = self.split(price);
        let before = self.balance;
        self.balance += split.payout;
        self.total_commissions += split.commission;
        self.updated_at = now;
        let entry = self.entry(
            LedgerEntryType::Payment,
            split.payout,
            split.commission,
            before,
            Some(LedgerReference::Shipment(shipment_id)),
            now,
        );
        (entry, split)
    }

    /// Claw back a payout. Balance and commission totals clamp at zero.
    pub fn apply_reversal(
        &mut self,
        shipment_id: ShipmentId,
        price: Decimal,
        now: DateTime<Utc>,
    ) -> Reversal {
        let split = self.split(price);
        let before = self.balance;
        self.balance = LedgerEntryType::Refund.apply(before, split.payout);
        self.total_commissions = (self.total_commissions - split.commission).max(Decimal::ZERO);
        self.total_refunds += split.payout;
        self.updated_at = now;
        let shortfall = split.payout - (before - self.balance);
        let entry = self.entry(
            LedgerEntryType::Refund,
            split.payout,
            split.commission,
            before,
            Some(LedgerReference::Shipment(shipment_id)),
            now,
        );
        Reversal {
            entry,
            split,
            shortfall,
        }
    }

    /// Add funds. `amount` must already be validated as positive.
    pub fn apply_deposit(&mut self, amount: Decimal, now: DateTime<Utc>) -> LedgerTransaction {
        let before = self.balance;
        self.balance += amount;
        self.updated_at = now;
        self.entry(LedgerEntryType::Deposit, amount, Decimal::ZERO, before, None, now)
    }

    /// Remove funds.
    ///
    /// # Errors
    /// Returns [`LoadmatchError::InsufficientFunds`] if `amount > balance`.
    pub fn apply_withdrawal(
        &mut self,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<LedgerTransaction> {
        if amount > self.balance {
            return Err(LoadmatchError::InsufficientFunds {
                needed: amount,
                available: self.balance,
            });
        }
        let before = self.balance;
        self.balance -= amount;
        self.updated_at = now;
        Ok(self.entry(
            LedgerEntryType::Withdrawal,
            amount,
            Decimal::ZERO,
            before,
            None,
            now,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wallet() -> Wallet {
        Wallet::open(UserId::new(), Decimal::ONE, Utc::now())
    }

    #[test]
    fn payment_credits_payout_and_books_commission() {
        let mut w = wallet();
        let (entry, split) = w.apply_payment(ShipmentId::new(), Decimal::new(500, 0), Utc::now());
        assert_eq!(split.commission, Decimal::new(500, 2));
        assert_eq!(w.balance, Decimal::new(49500, 2));
        assert_eq!(w.total_commissions, Decimal::new(500, 2));
        assert_eq!(entry.balance_before, Decimal::ZERO);
        assert_eq!(entry.balance_after, w.balance);
        assert_eq!(entry.entry_type, LedgerEntryType::Payment);
    }

    #[test]
    fn reversal_clamps_at_zero_and_reports_shortfall() {
        let mut w = wallet();
        w.balance = Decimal::new(100, 0);
        w.total_commissions = Decimal::new(3, 0);
        let rev = w.apply_reversal(ShipmentId::new(), Decimal::new(900, 0), Utc::now());
        assert_eq!(w.balance, Decimal::ZERO);
        assert_eq!(w.total_commissions, Decimal::ZERO);
        assert_eq!(w.total_refunds, Decimal::new(891, 0));
        assert_eq!(rev.shortfall, Decimal::new(791, 0));
        assert_eq!(rev.entry.balance_after, Decimal::ZERO);
    }

    #[test]
    fn withdrawal_insufficient_leaves_wallet_unchanged() {
        let mut w = wallet();
        w.apply_deposit(Decimal::new(50, 0), Utc::now());
        let err = w.apply_withdrawal(Decimal::new(80, 0), Utc::now()).unwrap_err();
        assert!(matches!(err, LoadmatchError::InsufficientFunds { .. }));
        assert_eq!(w.balance, Decimal::new(50, 0));
    }

    #[test]
    fn commission_quote_release_clamps() {
        let mut w = wallet();
        w.hold_commission(Decimal::new(5, 0), Utc::now());
        w.release_commission(Decimal::new(7, 0), Utc::now());
        assert_eq!(w.pending_commissions, Decimal::ZERO);
    }

    #[test]
    fn entry_type_apply_matches_wallet_arithmetic() {
        assert_eq!(
            LedgerEntryType::Refund.apply(Decimal::new(10, 0), Decimal::new(15, 0)),
            Decimal::ZERO
        );
        assert_eq!(
            LedgerEntryType::PaymentRelease.apply(Decimal::new(10, 0), Decimal::new(15, 0)),
            Decimal::new(10, 0)
        );
    }
}
