// Broker API boundary
pub mod schwab;

pub use schwab::SchwabClient;

use async_trait::async_trait;
use thiserror::Error;

use crate::auth::AuthError;
use crate::models::{OrderKind, OrderParams, OrderSnapshot};

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("broker returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected broker payload: {0}")]
    Decode(String),

    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl BrokerError {
    /// True when the broker actively refused the request, as opposed to
    /// being unreachable. Rejections count against the recreation cap;
    /// unavailability is retried next cycle.
    pub fn is_rejection(&self) -> bool {
        match self {
            BrokerError::Status { status, .. } => {
                (400..500).contains(status) && !matches!(status, 401 | 403 | 408 | 429)
            }
            _ => false,
        }
    }
}

/// The brokerage, seen from the engine. One account, pull-based.
#[async_trait]
pub trait BrokerClient {
    /// Fetch the current order snapshot for the account, already mapped
    /// into the fixed model. Orders of kinds we never recreate are dropped
    /// at this boundary.
    async fn list_open_orders(&self, account: &str) -> Result<Vec<OrderSnapshot>, BrokerError>;

    /// Submit a replacement order. Returns the broker-assigned order id
    /// when the broker reports one; `None` when the submission succeeded
    /// but the response carried no id (the next poll picks the order up).
    async fn submit_order(
        &self,
        account: &str,
        symbol: &str,
        kind: OrderKind,
        params: &OrderParams,
        client_ref: &str,
    ) -> Result<Option<String>, BrokerError>;
}
