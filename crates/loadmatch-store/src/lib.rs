//! # loadmatch-store
//!
//! **Ledger Store**: the transactional persistence port used by every
//! LoadMatch engine component, plus an in-memory implementation.
//!
//! ## Units of work
//!
//! All reads and writes go through a [`UnitOfWork`] opened with
//! [`LedgerStore::begin`]. A unit is atomic and serialisable:
//! 1. Reads see committed state plus the unit's own staged writes
//! 2. Constraint checks run at write time (pending-offer uniqueness,
//!    single accepted offer, unique idempotency keys)
//! 3. `commit` applies everything or nothing
//! 4. Dropping an uncommitted unit rolls it back

pub mod memory;
pub mod port;

pub use memory::InMemoryLedgerStore;
pub use port::{LedgerStore, UnitOfWork, transact};
