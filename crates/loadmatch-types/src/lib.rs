//! # loadmatch-types
//!
//! Shared types, errors, and configuration for the **LoadMatch** marketplace
//! transaction engine.
//!
//! This crate is the leaf dependency of the workspace; every other crate
//! depends on it. It defines:
//!
//! - **Identifiers**: [`ShipmentId`], [`OfferId`], [`UserId`], [`LedgerTxId`], [`EscrowId`], [`ListingId`], [`IdempotencyKey`]
//! - **Callers**: [`Actor`], [`Role`]
//! - **Shipment model**: [`Shipment`], [`ShipmentStatus`], [`ShipmentDetails`], [`RefundStatus`], [`PayoutStatus`]
//! - **Offer model**: [`Offer`], [`OfferStatus`]
//! - **Wallet model**: [`Wallet`], [`LedgerTransaction`], [`LedgerEntryType`], [`Escrow`], [`EscrowStatus`]
//! - **Idempotency model**: [`IdempotencyRecord`], [`RequestSignature`]
//! - **Listings and notifications**: [`Listing`], [`NotificationEvent`], [`NotificationKind`]
//! - **Money**: [`money::round`], [`CommissionSplit`]
//! - **Configuration**: [`EngineConfig`], [`BackpressureConfig`], [`Route`]
//! - **Errors**: [`LoadmatchError`] with `LM_ERR_` prefix codes
//! - **Constants**: system-wide limits and defaults

pub mod actor;
pub mod config;
pub mod constants;
pub mod error;
pub mod escrow;
pub mod idempotency;
pub mod ids;
pub mod listing;
pub mod money;
pub mod notification;
pub mod offer;
pub mod shipment;
pub mod wallet;

// Re-export all primary types at crate root for ergonomic imports:
//   use loadmatch_types::{Shipment, Offer, Wallet, ...};

pub use actor::*;
pub use config::*;
pub use error::*;
pub use escrow::*;
pub use idempotency::*;
pub use ids::*;
pub use listing::*;
pub use money::CommissionSplit;
pub use notification::*;
pub use offer::*;
pub use shipment::*;
pub use wallet::*;

// Constants are accessed via `loadmatch_types::constants::FOO`
// (not re-exported to avoid name collisions).
