// Core modules
pub mod api;
pub mod auth;
pub mod models;
pub mod monitor;
pub mod persistence;

// Re-export commonly used types
pub use api::{BrokerClient, BrokerError, SchwabClient};
pub use auth::{TokenProvider, TokenStore};
pub use models::*;
pub use monitor::{DashboardSnapshot, MonitorConfig, MonitorError, WatchLoop};

// Error handling
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
