//! Progressive slow-down.
//!
//! Requests beyond `delay_after` within the window are still admitted, but
//! each one waits `(count - delay_after) * delay_step_ms`, capped at
//! `max_delay_ms`. `count` includes the current request.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use loadmatch_types::SlowDownPolicy;

use crate::caller::CallerKey;
use crate::rate_limit::prune;

#[derive(Debug)]
pub struct SlowDown {
    policy: SlowDownPolicy,
    windows: HashMap<CallerKey, VecDeque<u64>>,
}

impl SlowDown {
    #[must_use]
    pub fn new(policy: SlowDownPolicy) -> Self {
        Self {
            policy,
            windows: HashMap::new(),
        }
    }

    /// Record a request and return how long it must wait.
    pub fn record(&mut self, key: &CallerKey, now_ms: u64) -> Duration {
        let window = self.windows.entry(key.clone()).or_default();
        prune(window, now_ms, self.policy.window_ms);
        window.push_back(now_ms);
        let count = window.len();
        Duration::from_millis(self.delay_for(count))
    }

    /// Delay in milliseconds for the `count`-th request in a window.
    #[must_use]
    pub fn delay_for(&self, count: usize) -> u64 {
        let excess = count.saturating_sub(self.policy.delay_after) as u64;
        excess
            .saturating_mul(self.policy.delay_step_ms)
            .min(self.policy.max_delay_ms)
    }

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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CallerIdentity;
    use loadmatch_types::Route;
    use std::net::{IpAddr, Ipv6Addr};

    fn policy() -> SlowDownPolicy {
        SlowDownPolicy {
            window_ms: 60_000,
            delay_after: 10,
            delay_step_ms: 500,
            max_delay_ms: 2_000,
        }
    }

    fn key() -> CallerKey {
        CallerIdentity::from_ip(IpAddr::V6(Ipv6Addr::LOCALHOST)).key_for(Route::SubmitOffer)
    }

    #[test]
    fn burst_is_free() {
        let mut sd = SlowDown::new(policy());
        for t in 0..10 {
            assert_eq!(sd.record(&key(), t), Duration::ZERO);
        }
    }

    #[test]
    fn delay_grows_then_caps() {
        let mut sd = SlowDown::new(policy());
        for t in 0..10 {
            sd.record(&key(), t);
        }
        assert_eq!(sd.record(&key(), 10), Duration::from_millis(500));
        assert_eq!(sd.record(&key(), 11), Duration::from_millis(1_000));
        assert_eq!(sd.record(&key(), 12), Duration::from_millis(1_500));
        assert_eq!(sd.record(&key(), 13), Duration::from_millis(2_000));
        assert_eq!(sd.record(&key(), 14), Duration::from_millis(2_000));
    }

    #[test]
    fn delay_resets_after_window() {
        let mut sd = SlowDown::new(policy());
        for t in 0..15 {
            sd.record(&key(), t);
        }
        assert_eq!(sd.record(&key(), 120_000), Duration::ZERO);
        sd.evict_idle(240_000);
        assert_eq!(sd.tracked_callers(), 0);
    }
}
