//! System-wide constants for the LoadMatch marketplace engine.

/// Fraction digits carried by every monetary value.
pub const MONEY_SCALE: u32 = 2;

/// Default platform commission, in percent of the shipment price.
pub const DEFAULT_COMMISSION_RATE_PERCENT: i64 = 1;

/// Days a pending offer stays open before the expiry sweep retires it.
pub const DEFAULT_OFFER_TTL_DAYS: i64 = 7;

/// Maximum length of a client-supplied idempotency key.
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 255;

/// Maximum length of an offer message.
pub const MAX_OFFER_MESSAGE_LEN: usize = 1_000;

/// Maximum length of a cancellation reason.
pub const MAX_CANCELLATION_REASON_LEN: usize = 500;

// --- Backpressure defaults ----------------------------------------------

/// Hard cap window for ordinary mutating routes (15 minutes).
pub const DEFAULT_WRITE_WINDOW_MS: u64 = 15 * 60 * 1000;

/// Requests allowed per caller per mutating route within the window.
pub const DEFAULT_WRITE_MAX_REQUESTS: usize = 100;

/// Hard cap window for authentication routes (15 minutes).
pub const DEFAULT_AUTH_WINDOW_MS: u64 = 15 * 60 * 1000;

/// Authentication attempts allowed per (IP, email) within the window.
pub const DEFAULT_AUTH_MAX_REQUESTS: usize = 5;

/// Slow-down window for real-time write routes (1 minute).
pub const DEFAULT_SLOW_DOWN_WINDOW_MS: u64 = 60 * 1000;

/// Requests admitted without delay inside the slow-down window.
pub const DEFAULT_SLOW_DOWN_DELAY_AFTER: usize = 10;

/// Delay added for each request beyond the burst threshold.
pub const DEFAULT_SLOW_DOWN_STEP_MS: u64 = 500;

/// Upper bound on a single slow-down delay.
pub const DEFAULT_SLOW_DOWN_MAX_DELAY_MS: u64 = 5_000;

// --- Environment overrides ----------------------------------------------

/// Overrides [`crate::EngineConfig::default_commission_rate`].
pub const ENV_COMMISSION_RATE: &str = "LOADMATCH_COMMISSION_RATE";

/// Overrides [`crate::EngineConfig::offer_ttl_days`].
pub const ENV_OFFER_TTL_DAYS: &str = "LOADMATCH_OFFER_TTL_DAYS";

/// Version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Engine name.
pub const ENGINE_NAME: &str = "LoadMatch";
