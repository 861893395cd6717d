//! Route-level admission control.
//!
//! Every inbound mutating request passes [`Backpressure::admit`] before any
//! store work happens:
//! 1. The hard cap rejects the request outright when the caller's window is full
//! 2. Otherwise the slow-down policy records the hit and may ask for a delay
//!
//! Routes with no configured policy are always admitted immediately.
//!
//! Admission also drops callers idle past a route's longest window, at most
//! once per window. [`Backpressure::evict_idle`] does the same for every
//! route at once and can be scheduled by the host.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use loadmatch_types::{BackpressureConfig, Result, Route};

use crate::caller::CallerIdentity;
use crate::rate_limit::SlidingWindowLimiter;
use crate::slow_down::SlowDown;

/// Outcome of a successful admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Proceed,
    /// Admitted, but the caller should wait this long before dispatch.
    Delay(Duration),
}

impl Admission {
    #[must_use]
    pub fn delay(self) -> Duration {
        match self {
            Self::Proceed => Duration::ZERO,
            Self::Delay(d) => d,
        }
    }
}

#[derive(Debug, Default)]
struct RouteState {
    limiter: Option<SlidingWindowLimiter>,
    slow_down: Option<SlowDown>,
    /// Longest window of the route's policies.
    sweep_every_ms: u64,
    last_sweep_ms: u64,
}

impl RouteState {
    fn evict_idle(&mut self, now_ms: u64) {
        if let Some(limiter) = self.limiter.as_mut() {
            limiter.evict_idle(now_ms);
        }
        if let Some(sd) = self.slow_down.as_mut() {
            sd.evict_idle(now_ms);
        }
        self.last_sweep_ms = now_ms;
    }

    fn tracked_callers(&self) -> usize {
        let limited = self.limiter.as_ref().map_or(0, SlidingWindowLimiter::tracked_callers);
        let slowed = self.slow_down.as_ref().map_or(0, SlowDown::tracked_callers);
        limited.max(slowed)
    }
}

/// Per-route rate limiting and slow-down.
#[derive(Debug)]
pub struct Backpressure {
    routes: Mutex<HashMap<Route, RouteState>>,
}

impl Backpressure {
    #[must_use]
    pub fn new(config: &BackpressureConfig) -> Self {
        let routes = config
            .routes
            .iter()
            .map(|(&route, policy)| {
                (
                    route,
                    RouteState {
                        limiter: policy.limit.map(|p| SlidingWindowLimiter::new(route, p)),
                        slow_down: policy.slow_down.map(SlowDown::new),
                        sweep_every_ms: policy
                            .limit
                            .map_or(0, |p| p.window_ms)
                            .max(policy.slow_down.map_or(0, |p| p.window_ms)),
                        last_sweep_ms: 0,
                    },
                )
            })
            .collect();
        Self {
            routes: Mutex::new(routes),
        }
    }

    /// No throttling at all.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(&BackpressureConfig::disabled())
    }

    /// Admit a request on `route` from `caller` at `now_ms`.
    ///
    /// # Errors
    /// Returns `TooManyRequests` when the route's hard cap is exhausted.
    pub fn admit(&self, route: Route, caller: &CallerIdentity, now_ms: u64) -> Result<Admission> {
        let mut routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(state) = routes.get_mut(&route) else {
            return Ok(Admission::Proceed);
        };
        if now_ms.saturating_sub(state.last_sweep_ms) >= state.sweep_every_ms {
            state.evict_idle(now_ms);
        }
        let key = caller.key_for(route);

        if let Some(limiter) = state.limiter.as_mut() {
            if let Err(err) = limiter.check_and_record(&key, now_ms) {
                tracing::warn!(route = %route, caller = %key, "Caller throttled");
                return Err(err);
            }
        }

        let delay = state
            .slow_down
            .as_mut()
            .map_or(Duration::ZERO, |sd| sd.record(&key, now_ms));
        if delay.is_zero() {
            Ok(Admission::Proceed)
        } else {
            tracing::debug!(
                route = %route,
                caller = %key,
                delay_ms = delay.as_millis(),
                "Caller slowed down"
            );
            Ok(Admission::Delay(delay))
        }
    }

    /// Drop idle callers from every route.
    pub fn evict_idle(&self, now_ms: u64) {
        let mut routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
        for state in routes.values_mut() {
            state.evict_idle(now_ms);
        }
    }

    /// Callers currently held in `route`'s windows.
    #[must_use]
    pub fn tracked_callers(&self, route: Route) -> usize {
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&route)
            .map_or(0, RouteState::tracked_callers)
    }
}

impl Default for Backpressure {
    fn default() -> Self {
        Self::new(&BackpressureConfig::default())
    }
}
