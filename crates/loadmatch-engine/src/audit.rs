//! Ledger audit.
//!
//! Replays a wallet's ledger from an empty wallet and checks that:
//! ```text
//! ∀ row:  row.balance_before == running
//!         row.balance_after  == apply(row.type, running, row.amount)
//! final:  running            == wallet.balance           (and ≥ 0)
//!         Σ commission(pay) − Σ commission(refund), clamped ≥ 0
//!                            == wallet.total_commissions
//!         Σ amount(refund)   == wallet.total_refunds
//! ```
//!
//! A mismatch means a balance moved without a ledger row, or a row was
//! written out of order.

use loadmatch_types::{LedgerEntryType, LedgerTransaction, LoadmatchError, Result, Wallet};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Totals reconstructed from a ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSummary {
    pub entries: usize,
    pub balance: Decimal,
    pub total_commissions: Decimal,
    pub total_refunds: Decimal,
}

pub struct LedgerAudit;

impl LedgerAudit {
    /// Replay `history` (in append order) and compare it with `wallet`.
    ///
    /// # Errors
    /// Returns [`LoadmatchError::LedgerInvariantViolation`] naming the first
    /// row or total that does not add up.
    pub fn verify(wallet: &Wallet, history: &[LedgerTransaction]) -> Result<LedgerSummary> {
        let mut summary = LedgerSummary {
            entries: history.len(),
            balance: Decimal::ZERO,
            total_commissions: Decimal::ZERO,
            total_refunds: Decimal::ZERO,
        };

        for (index, row) in history.iter().enumerate() {
            if row.wallet_id != wallet.carrier_id {
                return Err(violation(format!(
                    "row {index} ({}) belongs to wallet {}",
                    row.id, row.wallet_id
                )));
            }
            if row.balance_before != summary.balance {
                return Err(violation(format!(
                    "row {index} ({}) starts at {} but the running balance is {}",
                    row.id, row.balance_before, summary.balance
                )));
            }
            let after = row.entry_type.apply(summary.balance, row.amount);
            if row.balance_after != after {
                return Err(violation(format!(
                    "row {index} ({}) ends at {} but {} {} from {} gives {after}",
                    row.id, row.balance_after, row.entry_type, row.amount, summary.balance
                )));
            }
            summary.balance = after;

            match row.entry_type {
                LedgerEntryType::Payment => summary.total_commissions += row.commission,
                LedgerEntryType::Refund => {
                    summary.total_commissions =
                        (summary.total_commissions - row.commission).max(Decimal::ZERO);
                    summary.total_refunds += row.amount;
                }
                _ => {}
            }
        }

        if summary.balance < Decimal::ZERO {
            return Err(violation(format!("replayed balance {} is negative", summary.balance)));
        }
        check("balance", summary.balance, wallet.balance)?;
        check("total_commissions", summary.total_commissions, wallet.total_commissions)?;
        check("total_refunds", summary.total_refunds, wallet.total_refunds)?;
        Ok(summary)
    }
}

fn check(field: &str, replayed: Decimal, stored: Decimal) -> Result<()> {
    if replayed == stored {
        Ok(())
    } else {
        Err(violation(format!(
            "wallet {field} is {stored} but the ledger adds up to {replayed}"
        )))
    }
}

fn violation(reason: String) -> LoadmatchError {
    tracing::error!(reason = %reason, "Ledger audit failed");
    LoadmatchError::LedgerInvariantViolation { reason }
}
