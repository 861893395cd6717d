//! Error types for the LoadMatch marketplace engine.
//!
//! All errors use the `LM_ERR_` prefix convention for easy grepping in logs.
//! Error codes are grouped by subsystem:
//! - 1xx: Validation / lookup / authorization errors
//! - 2xx: Shipment lifecycle errors
//! - 3xx: Offer errors
//! - 4xx: Wallet / ledger errors
//! - 5xx: Idempotency errors
//! - 8xx: Backpressure errors
//! - 9xx: Store / internal errors

use rust_decimal::Decimal;
use thiserror::Error;

use crate::{OfferId, OfferStatus, ShipmentId, ShipmentStatus, UserId};

/// Central error enum for all LoadMatch operations.
#[derive(Debug, Error)]
pub enum LoadmatchError {
    // =================================================================
    // Validation / Lookup / Authorization (1xx)
    // =================================================================
    /// Input failed shape or range validation.
    #[error("LM_ERR_100: Validation failed: {reason}")]
    Validation { reason: String },

    /// The referenced entity does not exist.
    #[error("LM_ERR_101: {entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The caller is not allowed to perform this operation.
    #[error("LM_ERR_102: Forbidden: {reason}")]
    Forbidden { reason: String },

    // =================================================================
    // Shipment Lifecycle (2xx)
    // =================================================================
    /// The target status is not an allowed successor of the current one.
    #[error("LM_ERR_200: Invalid transition from {from} to {to}")]
    InvalidTransition {
        from: ShipmentStatus,
        to: ShipmentStatus,
    },

    /// An offer can only be accepted while its shipment is open.
    #[error("LM_ERR_201: Shipment {shipment} is {status}, not OPEN")]
    ShipmentNotOpen {
        shipment: ShipmentId,
        status: ShipmentStatus,
    },

    /// The shipment is already completed or cancelled.
    #[error("LM_ERR_202: Shipment {shipment} is already terminal ({status})")]
    AlreadyTerminal {
        shipment: ShipmentId,
        status: ShipmentStatus,
    },

    /// A delivered shipment cannot be cancelled; it needs a delivery dispute.
    #[error("LM_ERR_203: Shipment {0} is delivered and cannot be cancelled")]
    Undeliverable(ShipmentId),

    // =================================================================
    // Offer Errors (3xx)
    // =================================================================
    /// A shipper tried to bid on their own shipment.
    #[error("LM_ERR_300: Carrier {0} owns the shipment and cannot bid on it")]
    SelfOffer(UserId),

    /// Offers can only be submitted against an open shipment.
    #[error("LM_ERR_301: Shipment {shipment} is {status}, not accepting offers")]
    NotOpen {
        shipment: ShipmentId,
        status: ShipmentStatus,
    },

    /// The offer is no longer pending (decided or expired).
    #[error("LM_ERR_302: Offer {offer} is {status}, not PENDING")]
    NotPending { offer: OfferId, status: OfferStatus },

    /// The target was already decided; repeating the decision is a no-op error.
    #[error("LM_ERR_303: {entity} {id} already decided ({state})")]
    AlreadyDecided {
        entity: &'static str,
        id: String,
        state: String,
    },

    /// Another offer for this shipment won the acceptance race.
    #[error("LM_ERR_304: Shipment {0} already has an accepted offer")]
    AlreadyAccepted(ShipmentId),

    /// The carrier already has a pending offer on this shipment.
    #[error("LM_ERR_305: Carrier {carrier} already has a pending offer on shipment {shipment}")]
    DuplicatePending {
        shipment: ShipmentId,
        carrier: UserId,
    },

    // =================================================================
    // Wallet / Ledger (4xx)
    // =================================================================
    /// Not enough balance for a withdrawal.
    #[error("LM_ERR_400: Insufficient funds: need {needed}, have {available}")]
    InsufficientFunds { needed: Decimal, available: Decimal },

    /// Replaying the ledger does not reproduce the stored wallet.
    #[error("LM_ERR_401: Ledger invariant violation: {reason}")]
    LedgerInvariantViolation { reason: String },

    // =================================================================
    // Idempotency (5xx)
    // =================================================================
    /// The key was already used for a different request.
    #[error("LM_ERR_500: Idempotency key {key} was used for a different request")]
    IdempotencyConflict { key: String },

    // =================================================================
    // Backpressure (8xx)
    // =================================================================
    /// The caller exhausted the route quota for the current window.
    #[error("LM_ERR_800: Too many requests on {route}, retry after {retry_after_ms}ms")]
    TooManyRequests { route: String, retry_after_ms: u64 },

    // =================================================================
    // Store / Internal (9xx)
    // =================================================================
    /// The persistence layer failed; the unit of work was rolled back.
    #[error("LM_ERR_900: Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Serialization / deserialization error.
    #[error("LM_ERR_901: Serialization error: {0}")]
    Serialization(String),

    /// Configuration error (invalid config file, bad environment value, etc.).
    #[error("LM_ERR_902: Configuration error: {0}")]
    Configuration(String),

    /// Unrecoverable internal error.
    #[error("LM_ERR_903: Internal error: {0}")]
    Internal(String),
}

/// Stable, client-facing classification of a [`LoadmatchError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Forbidden,
    InvalidTransition,
    NotOpen,
    NotPending,
    AlreadyDecided,
    AlreadyAccepted,
    AlreadyTerminal,
    Undeliverable,
    SelfOffer,
    DuplicatePending,
    InsufficientFunds,
    IdempotencyConflict,
    TooManyRequests,
    StoreUnavailable,
    Internal,
}

impl LoadmatchError {
    /// Shorthand for [`LoadmatchError::Validation`].
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    /// Shorthand for [`LoadmatchError::Forbidden`].
    pub fn forbidden(reason: impl Into<String>) -> Self {
        Self::Forbidden {
            reason: reason.into(),
        }
    }

    /// Shorthand for [`LoadmatchError::NotFound`].
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// The stable kind reported to callers.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Forbidden { .. } => ErrorKind::Forbidden,
            Self::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            Self::ShipmentNotOpen { .. } | Self::NotOpen { .. } => ErrorKind::NotOpen,
            Self::NotPending { .. } => ErrorKind::NotPending,
            Self::AlreadyDecided { .. } => ErrorKind::AlreadyDecided,
            Self::AlreadyAccepted(_) => ErrorKind::AlreadyAccepted,
            Self::AlreadyTerminal { .. } => ErrorKind::AlreadyTerminal,
            Self::Undeliverable(_) => ErrorKind::Undeliverable,
            Self::SelfOffer(_) => ErrorKind::SelfOffer,
            Self::DuplicatePending { .. } => ErrorKind::DuplicatePending,
            Self::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            Self::IdempotencyConflict { .. } => ErrorKind::IdempotencyConflict,
            Self::TooManyRequests { .. } => ErrorKind::TooManyRequests,
            Self::StoreUnavailable(_) => ErrorKind::StoreUnavailable,
            Self::LedgerInvariantViolation { .. }
            | Self::Serialization(_)
            | Self::Configuration(_)
            | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Lifecycle conflicts are expected outcomes of concurrent use, not
    /// server faults.
    #[must_use]
    pub fn is_client_conflict(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::InvalidTransition
                | ErrorKind::NotOpen
                | ErrorKind::NotPending
                | ErrorKind::AlreadyDecided
                | ErrorKind::AlreadyAccepted
                | ErrorKind::AlreadyTerminal
                | ErrorKind::Undeliverable
                | ErrorKind::DuplicatePending
                | ErrorKind::IdempotencyConflict
        )
    }

    /// Only store failures are worth retrying with the same idempotency key.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, LoadmatchError>;

impl From<serde_json::Error> for LoadmatchError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
