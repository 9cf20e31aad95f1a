use async_trait::async_trait;
use chrono::{Duration, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::api::{BrokerClient, BrokerError};
use crate::auth::TokenStore;
use crate::models::{
    AssetType, OrderKind, OrderParams, OrderSide, OrderSnapshot, OrderStatus, TimeInForce,
};

const SCHWAB_API_BASE: &str = "https://api.schwabapi.com/trader/v1";

/// How far back to look when fetching the order feed. Terminal orders are
/// pruned by the broker eventually; a week covers GTC stops comfortably.
const ORDER_LOOKBACK_DAYS: i64 = 7;

/// Client for the Schwab Trader API.
///
/// Reads the access token from the token store on every call so an external
/// refresh of token.json is picked up without restarting.
#[derive(Clone)]
pub struct SchwabClient {
    client: Client,
    base_url: String,
    tokens: TokenStore,
}

// ============== Response Types ==============

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountNumberRaw {
    #[allow(dead_code)]
    account_number: Option<String>,
    hash_value: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderRaw {
    order_id: Option<i64>,
    status: Option<String>,
    order_type: Option<String>,
    duration: Option<String>,
    quantity: Option<f64>,
    stop_price: Option<f64>,
    price: Option<f64>,
    #[serde(default)]
    order_leg_collection: Vec<OrderLegRaw>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderLegRaw {
    instruction: Option<String>,
    quantity: Option<f64>,
    instrument: Option<InstrumentRaw>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstrumentRaw {
    symbol: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitResponseRaw {
    order_id: Option<i64>,
}

// ============== Wire Vocabulary ==============

fn parse_status(raw: &str) -> OrderStatus {
    match raw {
        "WORKING" | "ACCEPTED" | "PENDING_ACTIVATION" | "QUEUED" | "AWAITING_PARENT_ORDER" => {
            OrderStatus::Working
        }
        "FILLED" => OrderStatus::Filled,
        "CANCELED" => OrderStatus::Cancelled,
        "REJECTED" => OrderStatus::Rejected,
        "EXPIRED" => OrderStatus::Expired,
        _ => OrderStatus::Unknown,
    }
}

fn parse_kind(raw: &str) -> Option<OrderKind> {
    match raw {
        "STOP" => Some(OrderKind::Stop),
        "STOP_LIMIT" => Some(OrderKind::StopLimit),
        _ => None,
    }
}

fn parse_instruction(raw: &str) -> Option<OrderSide> {
    match raw {
        "BUY" => Some(OrderSide::Buy),
        "SELL" => Some(OrderSide::Sell),
        "BUY_TO_OPEN" => Some(OrderSide::BuyToOpen),
        "BUY_TO_CLOSE" => Some(OrderSide::BuyToClose),
        "SELL_TO_OPEN" => Some(OrderSide::SellToOpen),
        "SELL_TO_CLOSE" => Some(OrderSide::SellToClose),
        "SELL_SHORT" => Some(OrderSide::SellShort),
        "BUY_TO_COVER" => Some(OrderSide::BuyToCover),
        _ => None,
    }
}

fn parse_duration(raw: &str) -> Option<TimeInForce> {
    match raw {
        "DAY" => Some(TimeInForce::Day),
        "GOOD_TILL_CANCEL" => Some(TimeInForce::GoodTillCancel),
        "FILL_OR_KILL" => Some(TimeInForce::FillOrKill),
        _ => None,
    }
}

fn kind_str(kind: OrderKind) -> &'static str {
    match kind {
        OrderKind::Stop => "STOP",
        OrderKind::StopLimit => "STOP_LIMIT",
    }
}

fn instruction_str(side: OrderSide) -> &'static str {
    match side {
        OrderSide::Buy => "BUY",
        OrderSide::Sell => "SELL",
        OrderSide::BuyToOpen => "BUY_TO_OPEN",
        OrderSide::BuyToClose => "BUY_TO_CLOSE",
        OrderSide::SellToOpen => "SELL_TO_OPEN",
        OrderSide::SellToClose => "SELL_TO_CLOSE",
        OrderSide::SellShort => "SELL_SHORT",
        OrderSide::BuyToCover => "BUY_TO_COVER",
    }
}

fn duration_str(tif: TimeInForce) -> &'static str {
    match tif {
        TimeInForce::Day => "DAY",
        TimeInForce::GoodTillCancel => "GOOD_TILL_CANCEL",
        TimeInForce::FillOrKill => "FILL_OR_KILL",
    }
}

fn asset_type_str(asset_type: AssetType) -> &'static str {
    match asset_type {
        AssetType::Equity => "EQUITY",
        AssetType::Option => "OPTION",
    }
}

/// Map one loosely-typed broker order into the fixed model. Returns None
/// for orders we never watch (non-stop kinds, malformed legs) so internal
/// logic never branches on broker-specific fields.
fn map_order(raw: OrderRaw) -> Option<OrderSnapshot> {
    let order_id = raw.order_id?.to_string();
    let kind = parse_kind(raw.order_type.as_deref()?)?;
    let leg = raw.order_leg_collection.first()?;
    let symbol = leg.instrument.as_ref()?.symbol.clone()?;
    if symbol.is_empty() {
        return None;
    }
    let side = parse_instruction(leg.instruction.as_deref()?)?;
    let time_in_force = parse_duration(raw.duration.as_deref().unwrap_or("DAY"))
        .unwrap_or(TimeInForce::Day);
    let quantity = raw.quantity.or(leg.quantity)?;
    let trigger_price = raw.stop_price?;
    let status = raw
        .status
        .as_deref()
        .map(parse_status)
        .unwrap_or(OrderStatus::Unknown);

    Some(OrderSnapshot {
        order_id,
        symbol: symbol.clone(),
        kind,
        status,
        params: OrderParams {
            side,
            quantity,
            trigger_price,
            limit_price: raw.price,
            time_in_force,
            asset_type: AssetType::from_symbol(&symbol),
        },
    })
}

// ============== Implementation ==============

impl SchwabClient {
    pub fn new(tokens: TokenStore, timeout_secs: u64) -> Result<Self, BrokerError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: SCHWAB_API_BASE.to_string(),
            tokens,
        })
    }

    /// Point the client at a different API root (tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn bearer(&self) -> Result<String, BrokerError> {
        Ok(format!("Bearer {}", self.tokens.access_token()?))
    }

    /// Resolve the account hash for the (single) linked account.
    /// Endpoint: GET /accounts/accountNumbers
    pub async fn account_hash(&self) -> Result<String, BrokerError> {
        let url = format!("{}/accounts/accountNumbers", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("Authorization", self.bearer()?)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(BrokerError::Status {
                status: response.status().as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let accounts: Vec<AccountNumberRaw> = response.json().await?;
        accounts
            .into_iter()
            .find_map(|a| a.hash_value)
            .ok_or_else(|| BrokerError::Decode("no account hash in response".to_string()))
    }
}

#[async_trait]
impl BrokerClient for SchwabClient {
    /// Endpoint: GET /accounts/{hash}/orders?fromEnteredTime=..&toEnteredTime=..
    async fn list_open_orders(&self, account: &str) -> Result<Vec<OrderSnapshot>, BrokerError> {
        let to = Utc::now();
        let from = to - Duration::days(ORDER_LOOKBACK_DAYS);
        let url = format!(
            "{}/accounts/{}/orders?fromEnteredTime={}&toEnteredTime={}",
            self.base_url,
            account,
            from.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            to.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
        );

        let response = self
            .client
            .get(&url)
            .header("Authorization", self.bearer()?)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(BrokerError::Status {
                status: response.status().as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let orders: Vec<OrderRaw> = response.json().await?;
        let total = orders.len();
        let snapshots: Vec<OrderSnapshot> = orders.into_iter().filter_map(map_order).collect();

        tracing::debug!(
            "Fetched {} orders, {} stop/stop-limit after mapping",
            total,
            snapshots.len()
        );

        Ok(snapshots)
    }

    /// Endpoint: POST /accounts/{hash}/orders
    ///
    /// The reference tag is kept client-side only; the Schwab order body has
    /// no field for it.
    async fn submit_order(
        &self,
        account: &str,
        symbol: &str,
        kind: OrderKind,
        params: &OrderParams,
        client_ref: &str,
    ) -> Result<Option<String>, BrokerError> {
        let mut body = json!({
            "orderType": kind_str(kind),
            "session": "NORMAL",
            "duration": duration_str(params.time_in_force),
            "orderStrategyType": "SINGLE",
            "stopPrice": params.trigger_price,
            "orderLegCollection": [
                {
                    "instruction": instruction_str(params.side),
                    "quantity": params.quantity,
                    "instrument": {
                        "symbol": symbol,
                        "assetType": asset_type_str(params.asset_type)
                    }
                }
            ]
        });
        if let Some(limit) = params.limit_price {
            body["price"] = json!(limit);
        }

        tracing::info!(
            "Submitting {} {} x{} on {} (ref {})",
            kind_str(kind),
            instruction_str(params.side),
            params.quantity,
            symbol,
            client_ref
        );

        let url = format!("{}/accounts/{}/orders", self.base_url, account);
        let response = self
            .client
            .post(&url)
            .header("Authorization", self.bearer()?)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(BrokerError::Status {
                status: response.status().as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        // The order id normally arrives in the Location header; some
        // responses carry a JSON body with orderId instead, some are empty.
        let from_location = response
            .headers()
            .get("Location")
            .and_then(|v| v.to_str().ok())
            .and_then(|loc| loc.rsplit('/').next())
            .filter(|id| !id.is_empty())
            .map(str::to_string);

        if from_location.is_some() {
            return Ok(from_location);
        }

        let from_body = response
            .json::<SubmitResponseRaw>()
            .await
            .ok()
            .and_then(|r| r.order_id)
            .map(|id| id.to_string());

        Ok(from_body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    fn write_token_file(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "ordersentry-schwab-{}-{}.json",
            name,
            std::process::id()
        ));
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(
            br#"{ "creation_timestamp": 1714000000,
                  "token": { "access_token": "test-token", "expires_at": 9999999999 } }"#,
        )
        .unwrap();
        path
    }

    fn test_client(name: &str, base_url: &str) -> SchwabClient {
        let token_path = write_token_file(name);
        SchwabClient::new(TokenStore::new(token_path), 5)
            .unwrap()
            .with_base_url(base_url)
    }

    const ORDERS_BODY: &str = r#"[
        {
            "orderId": 1001,
            "status": "WORKING",
            "orderType": "STOP",
            "duration": "GOOD_TILL_CANCEL",
            "quantity": 100.0,
            "stopPrice": 50.0,
            "orderLegCollection": [
                {
                    "instruction": "SELL",
                    "quantity": 100.0,
                    "instrument": { "symbol": "XYZ", "assetType": "EQUITY" }
                }
            ]
        },
        {
            "orderId": 1002,
            "status": "WORKING",
            "orderType": "LIMIT",
            "duration": "DAY",
            "quantity": 10.0,
            "price": 42.0,
            "orderLegCollection": [
                {
                    "instruction": "BUY",
                    "quantity": 10.0,
                    "instrument": { "symbol": "ABC", "assetType": "EQUITY" }
                }
            ]
        },
        {
            "orderId": 1003,
            "status": "CANCELED",
            "orderType": "STOP_LIMIT",
            "duration": "DAY",
            "quantity": 1.0,
            "stopPrice": 12.5,
            "price": 12.4,
            "orderLegCollection": [
                {
                    "instruction": "SELL_TO_CLOSE",
                    "quantity": 1.0,
                    "instrument": { "symbol": "SPXW  250516P05000000", "assetType": "OPTION" }
                }
            ]
        }
    ]"#;

    #[tokio::test]
    async fn test_list_open_orders_maps_wire_format() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/accounts/hash123/orders")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(ORDERS_BODY)
            .create_async()
            .await;

        let client = test_client("list", &server.url());
        let orders = client.list_open_orders("hash123").await.unwrap();

        // The plain LIMIT order is dropped at the boundary
        assert_eq!(orders.len(), 2);

        let stop = &orders[0];
        assert_eq!(stop.order_id, "1001");
        assert_eq!(stop.symbol, "XYZ");
        assert_eq!(stop.kind, OrderKind::Stop);
        assert_eq!(stop.status, OrderStatus::Working);
        assert_eq!(stop.params.side, OrderSide::Sell);
        assert_eq!(stop.params.trigger_price, 50.0);
        assert_eq!(stop.params.limit_price, None);
        assert_eq!(stop.params.time_in_force, TimeInForce::GoodTillCancel);
        assert_eq!(stop.params.asset_type, AssetType::Equity);

        let stop_limit = &orders[1];
        assert_eq!(stop_limit.kind, OrderKind::StopLimit);
        assert_eq!(stop_limit.status, OrderStatus::Cancelled);
        assert_eq!(stop_limit.params.limit_price, Some(12.4));
        assert_eq!(stop_limit.params.asset_type, AssetType::Option);
    }

    #[tokio::test]
    async fn test_submit_order_reads_location_header() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/accounts/hash123/orders")
            .with_status(201)
            .with_header("Location", "https://api.example.com/trader/v1/accounts/hash123/orders/2002")
            .create_async()
            .await;

        let client = test_client("submit", &server.url());
        let params = OrderParams {
            side: OrderSide::Sell,
            quantity: 100.0,
            trigger_price: 50.0,
            limit_price: None,
            time_in_force: TimeInForce::Day,
            asset_type: AssetType::Equity,
        };

        let id = client
            .submit_order("hash123", "XYZ", OrderKind::Stop, &params, "ref-1")
            .await
            .unwrap();
        assert_eq!(id, Some("2002".to_string()));
    }

    #[tokio::test]
    async fn test_submit_order_rejection_status() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/accounts/hash123/orders")
            .with_status(400)
            .with_body(r#"{"message":"price outside band"}"#)
            .create_async()
            .await;

        let client = test_client("reject", &server.url());
        let params = OrderParams {
            side: OrderSide::Sell,
            quantity: 100.0,
            trigger_price: 50.0,
            limit_price: None,
            time_in_force: TimeInForce::Day,
            asset_type: AssetType::Equity,
        };

        let err = client
            .submit_order("hash123", "XYZ", OrderKind::Stop, &params, "ref-2")
            .await
            .unwrap_err();
        assert!(err.is_rejection());
        assert!(err.to_string().contains("400"));
    }

    #[tokio::test]
    async fn test_server_error_is_not_rejection() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/accounts/hash123/orders")
            .match_query(mockito::Matcher::Any)
            .with_status(503)
            .create_async()
            .await;

        let client = test_client("unavailable", &server.url());
        let err = client.list_open_orders("hash123").await.unwrap_err();
        assert!(!err.is_rejection());
    }

    #[tokio::test]
    async fn test_account_hash() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/accounts/accountNumbers")
            .with_status(200)
            .with_body(r#"[{"accountNumber":"12345678","hashValue":"ABCDEF01"}]"#)
            .create_async()
            .await;

        let client = test_client("hash", &server.url());
        assert_eq!(client.account_hash().await.unwrap(), "ABCDEF01");
    }

    #[test]
    fn test_map_order_requires_stop_fields() {
        // No stopPrice: not reconstructible, dropped
        let raw: OrderRaw = serde_json::from_str(
            r#"{
                "orderId": 7,
                "status": "WORKING",
                "orderType": "STOP",
                "duration": "DAY",
                "quantity": 5.0,
                "orderLegCollection": [
                    { "instruction": "SELL", "instrument": { "symbol": "XYZ" } }
                ]
            }"#,
        )
        .unwrap();
        assert!(map_order(raw).is_none());
    }

    #[test]
    fn test_unknown_status_maps_to_unknown() {
        assert_eq!(parse_status("AWAITING_UR_OUT"), OrderStatus::Unknown);
        assert_eq!(parse_status("QUEUED"), OrderStatus::Working);
        assert_eq!(parse_status("CANCELED"), OrderStatus::Cancelled);
    }
}
