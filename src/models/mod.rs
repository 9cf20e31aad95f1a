use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Order kinds we watch and recreate. Anything else the broker returns is
/// dropped at the wire boundary and never tracked.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OrderKind {
    Stop,
    StopLimit,
}

/// Broker-observed order status, normalized from the broker's wire vocabulary.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OrderStatus {
    Working,
    Filled,
    Cancelled,
    Rejected,
    Expired,
    Unknown,
}

impl OrderStatus {
    /// Terminal statuses that end a lineage without recreation.
    /// A fill is success; an expiry is an intentional time-in-force boundary.
    pub fn is_benign_terminal(&self) -> bool {
        matches!(self, OrderStatus::Filled | OrderStatus::Expired)
    }

    /// Terminal statuses that qualify a lineage for recreation.
    pub fn is_recreatable(&self) -> bool {
        matches!(self, OrderStatus::Cancelled | OrderStatus::Rejected)
    }

    pub fn is_terminal(&self) -> bool {
        self.is_benign_terminal() || self.is_recreatable()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
    BuyToOpen,
    BuyToClose,
    SellToOpen,
    SellToClose,
    SellShort,
    BuyToCover,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TimeInForce {
    Day,
    GoodTillCancel,
    FillOrKill,
}

/// Equity vs option, derived from the symbol format: option symbols always
/// embed expiry/strike digits, plain equity symbols never do.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AssetType {
    Equity,
    Option,
}

impl AssetType {
    pub fn from_symbol(symbol: &str) -> Self {
        if symbol.chars().any(|c| c.is_ascii_digit()) {
            AssetType::Option
        } else {
            AssetType::Equity
        }
    }
}

/// The full set of parameters needed to reconstruct an equivalent order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderParams {
    pub side: OrderSide,
    pub quantity: f64,
    pub trigger_price: f64,
    pub limit_price: Option<f64>,
    pub time_in_force: TimeInForce,
    pub asset_type: AssetType,
}

/// One broker order as observed on the wire, already mapped into the fixed
/// model. This is what the state tracker consumes each poll cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderSnapshot {
    pub order_id: String,
    pub symbol: String,
    pub kind: OrderKind,
    pub status: OrderStatus,
    pub params: OrderParams,
}

/// One broker order under observation.
///
/// All orders recreated from the same original share a `lineage_id`;
/// `recreation_count` increments once per recreation attempt of the lineage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchedOrder {
    pub order_id: String,
    pub symbol: String,
    pub kind: OrderKind,
    pub params: OrderParams,
    pub status: OrderStatus,
    pub lineage_id: Uuid,
    pub recreation_count: u32,
    /// Client-side idempotency tag of the submission that created this
    /// order; None for orders the user placed directly.
    pub client_ref: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl WatchedOrder {
    /// Start a fresh lineage from a broker-observed order.
    pub fn from_snapshot(snap: &OrderSnapshot, now: DateTime<Utc>) -> Self {
        Self {
            order_id: snap.order_id.clone(),
            symbol: snap.symbol.clone(),
            kind: snap.kind,
            params: snap.params.clone(),
            status: snap.status,
            lineage_id: Uuid::new_v4(),
            recreation_count: 0,
            client_ref: None,
            first_seen: now,
            last_seen: now,
        }
    }
}

/// What the user opted out of watching. An ignored symbol suppresses all
/// current and future orders on that symbol; an ignored order id suppresses
/// only that lineage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum IgnoreKey {
    OrderId(String),
    Symbol(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IgnoreEntry {
    pub key: IgnoreKey,
    pub added_at: DateTime<Utc>,
}

impl IgnoreEntry {
    pub fn order_id(id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            key: IgnoreKey::OrderId(id.into()),
            added_at: now,
        }
    }

    pub fn symbol(symbol: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            key: IgnoreKey::Symbol(symbol.into()),
            added_at: now,
        }
    }
}

/// Derived health of the auth token; computed each check, never stored.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TokenHealth {
    Valid,
    ExpiringSoon,
    Expired,
}
