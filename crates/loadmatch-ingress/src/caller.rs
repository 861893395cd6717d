//! Caller identification for throttling.

use std::fmt;
use std::net::IpAddr;

use loadmatch_types::Route;
use serde::{Deserialize, Serialize};

/// What the transport layer knows about the remote caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerIdentity {
    pub ip: IpAddr,
    /// Login email, only meaningful on authentication routes.
    #[serde(default)]
    pub email: Option<String>,
}

impl CallerIdentity {
    #[must_use]
    pub fn from_ip(ip: IpAddr) -> Self {
        Self { ip, email: None }
    }

    #[must_use]
    pub fn with_email(ip: IpAddr, email: impl Into<String>) -> Self {
        Self {
            ip,
            email: Some(email.into()),
        }
    }

    /// Throttling key for `route`.
    ///
    /// Authentication routes key by IP plus lower-cased email, so one address
    /// cannot lock out every account behind a shared NAT. Everything else keys
    /// by IP.
    #[must_use]
    pub fn key_for(&self, route: Route) -> CallerKey {
        match (&self.email, route.is_authentication()) {
            (Some(email), true) => {
                let email = email.trim().to_lowercase();
                CallerKey(format!("{}|{email}", self.ip))
            }
            _ => CallerKey(self.ip.to_string()),
        }
    }
}

/// Opaque per-caller bucket key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct CallerKey(String);

impl CallerKey {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const IP: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7));

    #[test]
    fn ordinary_routes_key_by_ip() {
        let caller = CallerIdentity::with_email(IP, "Ayse@Example.com");
        assert_eq!(caller.key_for(Route::SubmitOffer).as_str(), "10.0.0.7");
    }

    #[test]
    fn auth_routes_key_by_ip_and_lowercased_email() {
        let a = CallerIdentity::with_email(IP, "Ayse@Example.com");
        let b = CallerIdentity::with_email(IP, "ayse@example.com ");
        assert_eq!(a.key_for(Route::Authenticate), b.key_for(Route::Authenticate));
        assert_eq!(
            a.key_for(Route::Authenticate).as_str(),
            "10.0.0.7|ayse@example.com"
        );
    }

    #[test]
    fn auth_route_without_email_falls_back_to_ip() {
        let caller = CallerIdentity::from_ip(IP);
        assert_eq!(caller.key_for(Route::Authenticate).as_str(), "10.0.0.7");
    }
}
