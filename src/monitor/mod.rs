// ============== Monitor: watch loop, diffing, recreation ==============

pub mod engine;
pub mod ignore;
pub mod policy;
pub mod token_health;
pub mod tracker;

pub use engine::{CycleCounts, DashboardSnapshot, WatchLoop};
pub use ignore::IgnoreFilter;
pub use policy::{Action, RecreationPolicy, ReplacementOrder};
pub use token_health::TokenHealthMonitor;
pub use tracker::{StateTracker, Transition};

use thiserror::Error;

/// Failure classes surfaced on the dashboard. Each class has a distinct
/// remediation: re-auth, wait, investigate the order, or check the disk.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("auth token expired; re-run the auth flow")]
    AuthExpired,

    #[error("broker unavailable: {0}")]
    BrokerUnavailable(String),

    #[error("order submission rejected: {0}")]
    SubmissionRejected(String),

    #[error("persistence failure: {0}")]
    PersistenceFailure(String),
}

/// Tunables for the watch loop, sourced from the environment in `main`.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Seconds between poll cycles.
    pub check_interval_secs: u64,
    /// Lifetime cap on recreations per lineage.
    pub max_recreations: u32,
    /// One-shot backoff before resubmitting after a reject.
    pub reject_resubmit_delay_secs: u64,
    /// Warn when the access token expires within this many seconds.
    pub token_warn_secs: i64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 5,
            max_recreations: 3,
            reject_resubmit_delay_secs: 30,
            token_warn_secs: 3600,
        }
    }
}
