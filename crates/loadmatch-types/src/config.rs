//! Configuration types for the LoadMatch engine and its backpressure layer.

use std::collections::HashMap;

use chrono::Duration;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{LoadmatchError, Result, constants};

/// Inbound operations the backpressure layer knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    CreateShipment,
    SubmitOffer,
    CounterOffer,
    AcceptOffer,
    RejectOffer,
    UpdateShipmentStatus,
    AssignDriver,
    CancelShipment,
    ReverseCompleted,
    Deposit,
    Withdraw,
    OpenListing,
    /// Login / OTP style routes, keyed by IP + email.
    Authenticate,
}

impl Route {
    /// Every route, for building default tables.
    pub const ALL: [Self; 13] = [
        Self::CreateShipment,
        Self::SubmitOffer,
        Self::CounterOffer,
        Self::AcceptOffer,
        Self::RejectOffer,
        Self::UpdateShipmentStatus,
        Self::AssignDriver,
        Self::CancelShipment,
        Self::ReverseCompleted,
        Self::Deposit,
        Self::Withdraw,
        Self::OpenListing,
        Self::Authenticate,
    ];

    /// HTTP-ish method and path template recorded in idempotency records.
    #[must_use]
    pub fn method_and_path(self) -> (&'static str, &'static str) {
        match self {
            Self::CreateShipment => ("POST", "/shipments"),
            Self::SubmitOffer => ("POST", "/shipments/{id}/offers"),
            Self::CounterOffer => ("POST", "/offers/{id}/counter"),
            Self::AcceptOffer => ("POST", "/offers/{id}/accept"),
            Self::RejectOffer => ("POST", "/offers/{id}/reject"),
            Self::UpdateShipmentStatus => ("PATCH", "/shipments/{id}/status"),
            Self::AssignDriver => ("POST", "/shipments/{id}/driver"),
            Self::CancelShipment => ("POST", "/shipments/{id}/cancel"),
            Self::ReverseCompleted => ("POST", "/shipments/{id}/reverse"),
            Self::Deposit => ("POST", "/wallet/deposit"),
            Self::Withdraw => ("POST", "/wallet/withdraw"),
            Self::OpenListing => ("POST", "/shipments/{id}/listings"),
            Self::Authenticate => ("POST", "/auth/login"),
        }
    }

    /// Authentication routes key callers by IP and email.
    #[must_use]
    pub fn is_authentication(self) -> bool {
        self == Self::Authenticate
    }
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (method, path) = self.method_and_path();
        write!(f, "{method} {path}")
    }
}

/// Hard cap: reject once `max_requests` were seen within `window_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    pub window_ms: u64,
    pub max_requests: usize,
}

/// Soft cap: admit, but delay requests beyond `delay_after` in the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlowDownPolicy {
    pub window_ms: u64,
    pub delay_after: usize,
    pub delay_step_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for SlowDownPolicy {
    fn default() -> Self {
        Self {
            window_ms: constants::DEFAULT_SLOW_DOWN_WINDOW_MS,
            delay_after: constants::DEFAULT_SLOW_DOWN_DELAY_AFTER,
            delay_step_ms: constants::DEFAULT_SLOW_DOWN_STEP_MS,
            max_delay_ms: constants::DEFAULT_SLOW_DOWN_MAX_DELAY_MS,
        }
    }
}

/// Policies applied to one route. Either, both or neither may be set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RoutePolicy {
    #[serde(default)]
    pub limit: Option<RateLimitPolicy>,
    #[serde(default)]
    pub slow_down: Option<SlowDownPolicy>,
}

/// Per-route backpressure configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackpressureConfig {
    pub routes: HashMap<Route, RoutePolicy>,
}

impl BackpressureConfig {
    /// No limits at all.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            routes: HashMap::new(),
        }
    }

    #[must_use]
    pub fn policy(&self, route: Route) -> RoutePolicy {
        self.routes.get(&route).copied().unwrap_or_default()
    }
}

impl Default for BackpressureConfig {
    /// Every route gets the write cap; authentication a stricter one; offer
    /// submission and wallet calls are smoothed with slow-down.
    fn default() -> Self {
        let write_cap = RateLimitPolicy {
            window_ms: constants::DEFAULT_WRITE_WINDOW_MS,
            max_requests: constants::DEFAULT_WRITE_MAX_REQUESTS,
        };
        let mut routes: HashMap<Route, RoutePolicy> = Route::ALL
            .into_iter()
            .map(|route| {
                (
                    route,
                    RoutePolicy {
                        limit: Some(write_cap),
                        slow_down: None,
                    },
                )
            })
            .collect();
        routes.insert(
            Route::Authenticate,
            RoutePolicy {
                limit: Some(RateLimitPolicy {
                    window_ms: constants::DEFAULT_AUTH_WINDOW_MS,
                    max_requests: constants::DEFAULT_AUTH_MAX_REQUESTS,
                }),
                slow_down: None,
            },
        );
        for route in [
            Route::SubmitOffer,
            Route::CounterOffer,
            Route::Deposit,
            Route::Withdraw,
        ] {
            routes.insert(
                route,
                RoutePolicy {
                    limit: Some(write_cap),
                    slow_down: Some(SlowDownPolicy::default()),
                },
            );
        }
        Self { routes }
    }
}

/// Engine-wide configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Commission percentage for newly opened wallets.
    pub default_commission_rate: Decimal,
    /// Lifetime of a pending offer.
    pub offer_ttl_days: i64,
    #[serde(default)]
    pub backpressure: BackpressureConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_commission_rate: Decimal::new(constants::DEFAULT_COMMISSION_RATE_PERCENT, 0),
            offer_ttl_days: constants::DEFAULT_OFFER_TTL_DAYS,
            backpressure: BackpressureConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parse a JSON document and validate it.
    pub fn from_json(json: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(json)
            .map_err(|e| LoadmatchError::Configuration(format!("invalid config JSON: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Defaults overridden by `LOADMATCH_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overridden through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut cfg = Self::default();
        if let Some(raw) = lookup(constants::ENV_COMMISSION_RATE) {
            cfg.default_commission_rate = raw.trim().parse().map_err(|e| {
                LoadmatchError::Configuration(format!(
                    "{}={raw:?} is not a decimal: {e}",
                    constants::ENV_COMMISSION_RATE
                ))
            })?;
        }
        if let Some(raw) = lookup(constants::ENV_OFFER_TTL_DAYS) {
            cfg.offer_ttl_days = raw.trim().parse().map_err(|e| {
                LoadmatchError::Configuration(format!(
                    "{}={raw:?} is not an integer: {e}",
                    constants::ENV_OFFER_TTL_DAYS
                ))
            })?;
        }
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_commission_rate < Decimal::ZERO
            || self.default_commission_rate > Decimal::ONE_HUNDRED
        {
            return Err(LoadmatchError::Configuration(format!(
                "commission rate {} outside 0..=100",
                self.default_commission_rate
            )));
        }
        if self.offer_ttl_days <= 0 {
            return Err(LoadmatchError::Configuration(format!(
                "offer TTL must be positive, got {} days",
                self.offer_ttl_days
            )));
        }
        for (route, policy) in &self.backpressure.routes {
            if policy.limit.is_some_and(|l| l.window_ms == 0 || l.max_requests == 0) {
                return Err(LoadmatchError::Configuration(format!(
                    "rate limit for {route} needs a non-zero window and quota"
                )));
            }
            if policy.slow_down.is_some_and(|s| s.window_ms == 0) {
                return Err(LoadmatchError::Configuration(format!(
                    "slow-down for {route} needs a non-zero window"
                )));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn offer_ttl(&self) -> Duration {
        Duration::days(self.offer_ttl_days)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.default_commission_rate, Decimal::ONE);
        assert_eq!(cfg.offer_ttl(), Duration::days(7));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn default_backpressure_shapes() {
        let bp = BackpressureConfig::default();
        assert!(bp.policy(Route::SubmitOffer).slow_down.is_some());
        assert!(bp.policy(Route::AcceptOffer).slow_down.is_none());
        assert_eq!(
            bp.policy(Route::Authenticate).limit.unwrap().max_requests,
            constants::DEFAULT_AUTH_MAX_REQUESTS
        );
        assert_eq!(BackpressureConfig::disabled().policy(Route::Deposit), RoutePolicy::default());
    }

    #[test]
    fn env_overrides() {
        let cfg = EngineConfig::from_lookup(|name| match name {
            constants::ENV_COMMISSION_RATE => Some("2.5".to_string()),
            constants::ENV_OFFER_TTL_DAYS => Some("3".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(cfg.default_commission_rate, Decimal::new(25, 1));
        assert_eq!(cfg.offer_ttl_days, 3);
    }

    #[test]
    fn env_rejects_garbage() {
        let err = EngineConfig::from_lookup(|name| {
            (name == constants::ENV_COMMISSION_RATE).then(|| "lots".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, LoadmatchError::Configuration(_)));
    }

    #[test]
    fn json_roundtrip_and_validation() {
        let cfg = EngineConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back = EngineConfig::from_json(&json).unwrap();
        assert_eq!(cfg, back);

        let bad = r#"{"default_commission_rate":"150","offer_ttl_days":7}"#;
        assert!(matches!(
            EngineConfig::from_json(bad),
            Err(LoadmatchError::Configuration(_))
        ));
    }
}
