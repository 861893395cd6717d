//! Per-caller sliding-window rate limiter.
//!
//! # Sliding Window Algorithm
//!
//! Tracks timestamps of recent requests per caller key. When a new request
//! arrives, expired timestamps are pruned. If the count has reached the
//! limit, the request is rejected and not recorded.

use std::collections::{HashMap, VecDeque};

use loadmatch_types::{LoadmatchError, RateLimitPolicy, Result, Route};

use crate::caller::CallerKey;

/// Hard request cap for one route.
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    route: Route,
    policy: RateLimitPolicy,
    /// `CallerKey → timestamps of recent requests` (monotonically increasing)
    windows: HashMap<CallerKey, VecDeque<u64>>,
}

impl SlidingWindowLimiter {
    #[must_use]
    pub fn new(route: Route, policy: RateLimitPolicy) -> Self {
        Self {
            route,
            policy,
            windows: HashMap::new(),
        }
    }

    /// Admit and record a request, or reject it with the time until the
    /// oldest request in the window ages out.
    ///
    /// # Errors
    /// Returns [`LoadmatchError::TooManyRequests`] when the window is full.
    pub fn check_and_record(&mut self, key: &CallerKey, now_ms: u64) -> Result<()> {
        let window_ms = self.policy.window_ms;
        let window = self.windows.entry(key.clone()).or_default();
        prune(window, now_ms, window_ms);

        if window.len() >= self.policy.max_requests {
            let oldest = window.front().copied().unwrap_or(now_ms);
            let retry_after_ms = (oldest + window_ms + 1).saturating_sub(now_ms);
            return Err(LoadmatchError::TooManyRequests {
                route: self.route.to_string(),
                retry_after_ms,
            });
        }

        window.push_back(now_ms);
        Ok(())
    }

    /// Requests currently counted for `key`.
    #[must_use]
    pub fn count(&self, key: &CallerKey) -> usize {
        self.windows.get(key).map_or(0, VecDeque::len)
    }

    /// Drop callers with no requests left in the window.
    pub fn evict_idle(&mut self, now_ms: u64) {
        let window_ms = self.policy.window_ms;
        self.windows.retain(|_, window| {
            prune(window, now_ms, window_ms);
            !window.is_empty()
        });
    }

    #[must_use]
    pub fn tracked_callers(&self) -> usize {
        self.windows.len()
    }
}

/// Remove timestamps older than `now_ms - window_ms`.
pub(crate) fn prune(window: &mut VecDeque<u64>, now_ms: u64, window_ms: u64) {
    let cutoff = now_ms.saturating_sub(window_ms);
    while let Some(&front) = window.front() {
        if front < cutoff {
            window.pop_front();
        } else {
            break;
        }
    }
}
