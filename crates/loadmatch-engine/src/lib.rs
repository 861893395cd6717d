//! # loadmatch-engine
//!
//! Transaction engine of the **LoadMatch** freight marketplace.
//!
//! - [`Marketplace`]: facade running every operation through backpressure,
//!   one unit of work and idempotency, then post-commit effects
//! - [`ShipmentMachine`]: the shipment lifecycle and the cancellation cascade
//! - [`OfferEngine`]: bidding, counter offers and the exclusive accept
//! - [`WalletService`]: escrow, carrier payouts, reversals, deposits, withdrawals
//! - [`IdempotencyGuard`]: at most one durable effect per client key
//! - [`LedgerAudit`]: replays a wallet's ledger against its balances
//! - [`NotificationSink`]: best-effort outbound events
//!
//! ## Guarantees
//!
//! 1. **One winner per shipment**: of any number of concurrent accepts on a
//!    shipment's offers exactly one commits
//! 2. **All or nothing**: an accept or a cancellation either lands in full or
//!    leaves no trace
//! 3. **Non-negative balances**: a reversal clamps at zero instead of
//!    overdrawing, and every balance move writes a ledger row
//! 4. **At most once**: a retried request with the same idempotency key
//!    replays the first reply
//!
//! ## Shipment Lifecycle
//!
//! ```text
//! open ──▶ accepted ──▶ assigned ──▶ picked_up ──▶ in_transit ──▶ delivered ──▶ completed
//!                           │                         ▲
//!                           └─────────────────────────┘
//!
//! every non-terminal state ──▶ cancelled
//! ```

pub mod audit;
pub mod clock;
pub mod idempotency;
pub mod marketplace;
pub mod notify;
pub mod offers;
pub mod outbox;
pub mod shipments;
pub mod wallet;

pub use audit::{LedgerAudit, LedgerSummary};
pub use clock::{Clock, ManualClock, SystemClock};
pub use idempotency::{Guarded, IdempotencyGuard};
pub use marketplace::{Marketplace, Reply, RequestContext};
pub use notify::{ChannelSink, NotificationSink, NullSink, RecordingSink, SinkError, publish_all};
pub use offers::{AcceptedOffer, OfferEngine, OfferTerms, reject_all_pending};
pub use outbox::Outbox;
pub use shipments::ShipmentMachine;
pub use wallet::WalletService;
