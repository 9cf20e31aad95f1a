use chrono::{DateTime, Duration, Utc};

use crate::auth::TokenMetadata;
use crate::models::TokenHealth;

/// Classifies token expiry; never refreshes anything itself.
#[derive(Debug, Clone)]
pub struct TokenHealthMonitor {
    warn_horizon: Duration,
}

impl TokenHealthMonitor {
    pub fn new(warn_horizon_secs: i64) -> Self {
        Self {
            warn_horizon: Duration::seconds(warn_horizon_secs),
        }
    }

    /// Pure function of expiry timestamp vs. the supplied clock.
    pub fn check(&self, meta: &TokenMetadata, now: DateTime<Utc>) -> TokenHealth {
        if meta.expires_at <= now {
            TokenHealth::Expired
        } else if meta.expires_at - now <= self.warn_horizon {
            TokenHealth::ExpiringSoon
        } else {
            TokenHealth::Valid
        }
    }
}

impl Default for TokenHealthMonitor {
    fn default() -> Self {
        Self::new(3600) // warn within an hour of expiry
    }
}
