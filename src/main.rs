use ordersentry::api::SchwabClient;
use ordersentry::auth::TokenStore;
use ordersentry::monitor::{IgnoreFilter, MonitorConfig, WatchLoop};
use ordersentry::persistence::{IgnoreStore, OrdersCache};
use ordersentry::Result;
use std::sync::{Arc, RwLock};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    tracing::info!("OrderSentry starting - stop order watch & recreate");

    // Get environment variables
    let token_path =
        std::env::var("SCHWAB_TOKEN_PATH").unwrap_or_else(|_| "token.json".to_string());
    let ignored_path =
        std::env::var("IGNORED_ITEMS_PATH").unwrap_or_else(|_| "ignored_items.json".to_string());
    let cache_path =
        std::env::var("ORDERS_CACHE_PATH").unwrap_or_else(|_| "active_orders.json".to_string());
    let broker_timeout_secs = env_u64("BROKER_TIMEOUT_SECS", 10);

    let config = MonitorConfig {
        check_interval_secs: env_u64("CHECK_INTERVAL_SECS", 5),
        max_recreations: env_u64("MAX_RECREATIONS", 3) as u32,
        reject_resubmit_delay_secs: env_u64("REJECT_RESUBMIT_DELAY_SECS", 30),
        token_warn_secs: env_u64("TOKEN_EXPIRY_WARN_SECS", 3600) as i64,
    };

    // Auth token comes from the separate auth flow; without it there is
    // nothing useful this process can do.
    let tokens = TokenStore::new(&token_path);
    if !tokens.exists() {
        return Err(format!(
            "No token file at {}; run the auth flow first to create it",
            token_path
        )
        .into());
    }

    let broker = SchwabClient::new(tokens.clone(), broker_timeout_secs)?;
    let account = match std::env::var("SCHWAB_ACCOUNT_HASH") {
        Ok(hash) => hash,
        Err(_) => {
            tracing::info!("SCHWAB_ACCOUNT_HASH not set, resolving from API");
            broker.account_hash().await?
        }
    };

    // Load persisted state
    let ignore_store = IgnoreStore::new(&ignored_path);
    let ignore_filter = IgnoreFilter::from_entries(ignore_store.load().await?);
    tracing::info!("Ignore filter has {} entries", ignore_filter.len());
    let ignore = Arc::new(RwLock::new(ignore_filter));

    let orders_cache = OrdersCache::new(&cache_path);
    let cached_orders = orders_cache.load().await?;

    let mut watch = WatchLoop::new(
        broker,
        account,
        tokens,
        &config,
        ignore.clone(),
        Some(orders_cache),
    );
    watch.seed(cached_orders);
    let snapshot = watch.snapshot_handle();

    let watch_handle = tokio::spawn(watch.run());

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
            if let Ok(snap) = snapshot.read() {
                tracing::info!(
                    "Final state: {} watched, {} recreated, {} abandoned over {} cycles",
                    snap.counts.working,
                    snap.counts.recreated_total,
                    snap.counts.abandoned_total,
                    snap.counts.cycles
                );
            }
        }
        result = watch_handle => {
            tracing::error!("Watch loop exited unexpectedly: {:?}", result);
        }
    }

    Ok(())
}

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "ordersentry=info".to_string()),
        )
        .init();
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
