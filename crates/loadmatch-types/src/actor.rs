//! Authenticated callers.
//!
//! The auth component is external: by the time a request reaches the engine
//! the caller has been identified and role-tagged.

use serde::{Deserialize, Serialize};

use crate::UserId;

/// Marketplace role of an authenticated caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Individual or corporate shipment owner.
    Shipper,
    /// Transport company ("nakliyeci") that bids on shipments.
    Carrier,
    /// Driver ("taşıyıcı") assigned by a carrier.
    Driver,
    /// Platform operator.
    Admin,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Shipper => write!(f, "shipper"),
            Self::Carrier => write!(f, "carrier"),
            Self::Driver => write!(f, "driver"),
            Self::Admin => write!(f, "admin"),
        }
    }
}

/// An authenticated, role-tagged caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: UserId,
    pub role: Role,
}

impl Actor {
    #[must_use]
    pub fn new(user_id: UserId, role: Role) -> Self {
        Self { user_id, role }
    }

    #[must_use]
    pub fn shipper(user_id: UserId) -> Self {
        Self::new(user_id, Role::Shipper)
    }

    #[must_use]
    pub fn carrier(user_id: UserId) -> Self {
        Self::new(user_id, Role::Carrier)
    }

    #[must_use]
    pub fn driver(user_id: UserId) -> Self {
        Self::new(user_id, Role::Driver)
    }

    #[must_use]
    pub fn admin(user_id: UserId) -> Self {
        Self::new(user_id, Role::Admin)
    }

    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}
