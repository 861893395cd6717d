//! # loadmatch-ingress
//!
//! **Backpressure Layer**: admission control in front of every mutating
//! marketplace operation.
//!
//! ## Architecture
//!
//! An inbound request is identified by a [`CallerIdentity`] and mapped to a
//! [`CallerKey`] per route. [`Backpressure::admit`] then:
//! 1. Enforces the route's hard cap ([`SlidingWindowLimiter`]) → `TooManyRequests`
//! 2. Applies progressive slow-down ([`SlowDown`]) → [`Admission::Delay`]
//!
//! Time is passed in explicitly as milliseconds so callers control the clock.

pub mod backpressure;
pub mod caller;
pub mod rate_limit;
pub mod slow_down;

pub use backpressure::{Admission, Backpressure};
pub use caller::{CallerIdentity, CallerKey};
pub use rate_limit::SlidingWindowLimiter;
pub use slow_down::SlowDown;
