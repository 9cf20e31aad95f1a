use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{IgnoreEntry, IgnoreKey, WatchedOrder};
use crate::Result;

// ============== Ignore store (ignored_items.json) ==============

#[derive(Debug, Serialize, Deserialize)]
struct IgnoredItemRaw {
    value: String,
    added_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct IgnoredFileRaw {
    #[serde(default)]
    orders: Vec<IgnoredItemRaw>,
    #[serde(default)]
    symbols: Vec<IgnoredItemRaw>,
}

/// Durable copy of the user's opt-out set.
///
/// The watch loop and dashboard work against the in-memory filter; this
/// store only mirrors it to disk so ignores survive restarts.
#[derive(Debug, Clone)]
pub struct IgnoreStore {
    path: PathBuf,
}

impl IgnoreStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load all ignore entries. A missing file is an empty set, not an
    /// error; a corrupt file is.
    pub async fn load(&self) -> Result<Vec<IgnoreEntry>> {
        if !self.path.exists() {
            tracing::debug!("No ignore file at {}, starting empty", self.path.display());
            return Ok(Vec::new());
        }

        let bytes = tokio::fs::read(&self.path).await?;
        let raw: IgnoredFileRaw = serde_json::from_slice(&bytes)?;

        let entries = raw
            .orders
            .into_iter()
            .map(|item| IgnoreEntry {
                key: IgnoreKey::OrderId(item.value),
                added_at: item.added_at,
            })
            .chain(raw.symbols.into_iter().map(|item| IgnoreEntry {
                key: IgnoreKey::Symbol(item.value),
                added_at: item.added_at,
            }))
            .collect::<Vec<_>>();

        tracing::info!(
            "Loaded {} ignore entries from {}",
            entries.len(),
            self.path.display()
        );
        Ok(entries)
    }

    pub async fn save(&self, entries: &[IgnoreEntry]) -> Result<()> {
        let mut raw = IgnoredFileRaw::default();
        for entry in entries {
            let item = IgnoredItemRaw {
                value: match &entry.key {
                    IgnoreKey::OrderId(id) => id.clone(),
                    IgnoreKey::Symbol(sym) => sym.clone(),
                },
                added_at: entry.added_at,
            };
            match entry.key {
                IgnoreKey::OrderId(_) => raw.orders.push(item),
                IgnoreKey::Symbol(_) => raw.symbols.push(item),
            }
        }

        write_json_atomic(&self.path, &raw).await
    }

    /// Write-behind save: the caller never waits on disk I/O. Failures are
    /// logged and the in-memory set stays authoritative.
    pub fn spawn_save(&self, entries: Vec<IgnoreEntry>) {
        let store = self.clone();
        tokio::spawn(async move {
            if let Err(e) = store.save(&entries).await {
                tracing::error!(
                    "Failed to persist ignore entries to {}: {}",
                    store.path.display(),
                    e
                );
            }
        });
    }
}

// ============== Active order cache (active_orders.json) ==============

/// Crash-recovery cache of the tracked order set, refreshed every cycle.
/// On restart the cache seeds lineage ids and recreation counts so the cap
/// survives the process.
#[derive(Debug, Clone)]
pub struct OrdersCache {
    path: PathBuf,
}

impl OrdersCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(&self) -> Result<Vec<WatchedOrder>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let bytes = tokio::fs::read(&self.path).await?;
        let orders: Vec<WatchedOrder> = serde_json::from_slice(&bytes)?;
        tracing::info!(
            "Loaded {} cached orders from {}",
            orders.len(),
            self.path.display()
        );
        Ok(orders)
    }

    pub async fn save(&self, orders: &[WatchedOrder]) -> Result<()> {
        write_json_atomic(&self.path, &orders).await
    }

    /// Write-behind save from inside the watch cycle.
    pub fn spawn_save(&self, orders: Vec<WatchedOrder>) {
        let cache = self.clone();
        tokio::spawn(async move {
            if let Err(e) = cache.save(&orders).await {
                tracing::error!(
                    "Failed to persist order cache to {}: {}",
                    cache.path.display(),
                    e
                );
            }
        });
    }
}

/// Serialize to a sibling temp file, then rename over the target so readers
/// never observe a half-written file.
async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value)?;

    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, &json).await?;
    tokio::fs::rename(&tmp, path).await?;

    tracing::debug!("Wrote {} bytes to {}", json.len(), path.display());
    Ok(())
}
