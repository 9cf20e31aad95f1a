use std::collections::VecDeque;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::api::{BrokerClient, BrokerError};
use crate::auth::TokenProvider;
use crate::models::{IgnoreEntry, OrderStatus, TokenHealth, WatchedOrder};
use crate::monitor::ignore::IgnoreFilter;
use crate::monitor::policy::{Action, RecreationPolicy, ReplacementOrder};
use crate::monitor::token_health::TokenHealthMonitor;
use crate::monitor::tracker::{StateTracker, Transition};
use crate::monitor::{MonitorConfig, MonitorError};
use crate::persistence::OrdersCache;

const MAX_WARNINGS: usize = 20;

/// Running totals surfaced to the dashboard.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleCounts {
    pub working: usize,
    pub pending_resubmits: usize,
    pub recreated_total: u64,
    pub abandoned_total: u64,
    pub cycles: u64,
}

/// What the dashboard reads: a consistent copy published wholesale at the
/// end of each cycle. The engine never pushes; consumers clone this.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DashboardSnapshot {
    pub orders: Vec<WatchedOrder>,
    pub ignored: Vec<IgnoreEntry>,
    pub token_health: Option<TokenHealth>,
    pub refresh_token_age_days: Option<f64>,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub counts: CycleCounts,
    pub warnings: Vec<String>,
}

/// A replacement waiting for its submission window: either the one-shot
/// reject backoff or a retry after a failed submission.
#[derive(Debug)]
struct PendingResubmit {
    replacement: ReplacementOrder,
    due_at: DateTime<Utc>,
}

/// The orchestrator. One cycle: token gate, fetch, diff, policy,
/// submissions, snapshot publish. Cycles are strictly serialized; all
/// tracker mutation happens here.
pub struct WatchLoop<B, T> {
    broker: B,
    account: String,
    tokens: T,
    health: TokenHealthMonitor,
    tracker: StateTracker,
    policy: RecreationPolicy,
    ignore: Arc<RwLock<IgnoreFilter>>,
    orders_cache: Option<OrdersCache>,
    pending: Vec<PendingResubmit>,
    snapshot: Arc<RwLock<DashboardSnapshot>>,
    counts: CycleCounts,
    warnings: VecDeque<String>,
    last_error: Option<String>,
    check_interval_secs: u64,
    reject_delay: Duration,
}

impl<B: BrokerClient, T: TokenProvider> WatchLoop<B, T> {
    pub fn new(
        broker: B,
        account: String,
        tokens: T,
        config: &MonitorConfig,
        ignore: Arc<RwLock<IgnoreFilter>>,
        orders_cache: Option<OrdersCache>,
    ) -> Self {
        Self {
            broker,
            account,
            tokens,
            health: TokenHealthMonitor::new(config.token_warn_secs),
            tracker: StateTracker::new(),
            policy: RecreationPolicy::new(
                config.max_recreations,
                config.reject_resubmit_delay_secs,
            ),
            ignore,
            orders_cache,
            pending: Vec::new(),
            snapshot: Arc::new(RwLock::new(DashboardSnapshot::default())),
            counts: CycleCounts::default(),
            warnings: VecDeque::new(),
            last_error: None,
            check_interval_secs: config.check_interval_secs,
            reject_delay: Duration::seconds(config.reject_resubmit_delay_secs as i64),
        }
    }

    /// Handle for dashboard readers. Reads clone the published snapshot.
    pub fn snapshot_handle(&self) -> Arc<RwLock<DashboardSnapshot>> {
        self.snapshot.clone()
    }

    /// Seed the tracker from the on-disk cache so lineage ids and
    /// recreation counts survive a restart. The first fetch reconciles
    /// stale records as disappearances.
    pub fn seed(&mut self, orders: Vec<WatchedOrder>) {
        for order in orders {
            self.tracker.insert(order);
        }
        if !self.tracker.is_empty() {
            tracing::info!("Seeded {} orders from cache", self.tracker.len());
        }
    }

    /// Run forever on the configured fixed interval. One cycle completes,
    /// including all broker calls, before the next begins.
    pub async fn run(mut self) {
        tracing::info!(
            "Watch loop starting, checking every {}s",
            self.check_interval_secs
        );

        let mut ticker =
            tokio::time::interval(std::time::Duration::from_secs(self.check_interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            self.run_cycle(Utc::now()).await;
        }
    }

    /// One poll cycle. Public so tests can drive the clock explicitly.
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) {
        self.counts.cycles += 1;

        // 1. Token health gate: no broker calls on an expired token.
        let (token_health, refresh_age) = match self.tokens.metadata() {
            Ok(meta) => (
                self.health.check(&meta, now),
                meta.refresh_token_age_days(now),
            ),
            Err(e) => {
                tracing::warn!("Token metadata unreadable: {}", e);
                (TokenHealth::Expired, None)
            }
        };

        match token_health {
            TokenHealth::Expired => {
                self.last_error = Some(MonitorError::AuthExpired.to_string());
                tracing::warn!("Auth token expired, skipping cycle (re-run the auth flow)");
                self.publish(token_health, refresh_age, now);
                return;
            }
            TokenHealth::ExpiringSoon => {
                tracing::warn!("Auth token expiring soon");
            }
            TokenHealth::Valid => {}
        }

        // 2. Fetch the current broker snapshot.
        let fetched = match self.broker.list_open_orders(&self.account).await {
            Ok(orders) => orders,
            Err(e) => {
                let err = MonitorError::BrokerUnavailable(e.to_string());
                tracing::error!("{}", err);
                self.last_error = Some(err.to_string());
                self.publish(token_health, refresh_age, now);
                return;
            }
        };

        // Consistent per-cycle view of the ignore set; dashboard mutations
        // arriving mid-cycle are picked up next cycle.
        let ignore = match self.ignore.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };

        self.prune_ignored(&ignore);

        // 3. Diff against the tracked set. Untracked orders only enter
        // when first observed working and not ignored.
        let watchable: Vec<_> = fetched
            .into_iter()
            .filter(|s| !ignore.is_ignored(&s.order_id, &s.symbol))
            .filter(|s| self.tracker.get(&s.order_id).is_some() || s.status == OrderStatus::Working)
            .collect();

        let transitions = self.tracker.apply_snapshot(&watchable, now);

        for (order, transition) in transitions {
            match transition {
                Transition::New => {
                    tracing::info!(
                        "Now watching order {} ({} {:?} @ {})",
                        order.order_id,
                        order.symbol,
                        order.kind,
                        order.params.trigger_price
                    );
                    continue;
                }
                Transition::Unchanged => continue,
                Transition::StatusChanged { from, to } => {
                    tracing::info!(
                        "Order {} ({}) moved {:?} -> {:?}",
                        order.order_id,
                        order.symbol,
                        from,
                        to
                    );
                }
                Transition::Disappeared => {
                    tracing::warn!(
                        "Order {} ({}) no longer returned by broker",
                        order.order_id,
                        order.symbol
                    );
                }
            }

            match self.policy.evaluate(&order, &transition, &ignore) {
                Action::None => {
                    // A lineage that ended benignly, or one evaluated while
                    // ignored, stops being tracked so a later pruning of
                    // the order from the feed is not read as disappearance.
                    let done = matches!(transition, Transition::Disappeared)
                        || matches!(transition, Transition::StatusChanged { to, .. } if to.is_terminal());
                    if done {
                        self.tracker.remove(&order.order_id);
                    }
                }
                Action::Abandon { reason } => {
                    self.abandon(&order.order_id, &order.symbol, order.recreation_count, &reason);
                }
                Action::Recreate { replacement, delay } => {
                    self.tracker.remove(&order.order_id);
                    let due_at = now + delay.unwrap_or_else(Duration::zero);
                    tracing::warn!(
                        "Queueing recreation of {} ({}) attempt {}{}",
                        order.order_id,
                        order.symbol,
                        replacement.recreation_count,
                        if delay.is_some() { " after reject backoff" } else { "" }
                    );
                    self.pending.push(PendingResubmit { replacement, due_at });
                }
            }
        }

        // 4. Submit every due replacement. Failures are isolated per
        // order; nothing here aborts the cycle.
        let (due, later): (Vec<_>, Vec<_>) = self
            .pending
            .drain(..)
            .partition(|p| p.due_at <= now);
        self.pending = later;

        for item in due {
            self.submit_replacement(item.replacement, now).await;
        }

        // 5. Publish metrics and the active-order cache.
        if let Some(cache) = &self.orders_cache {
            cache.spawn_save(self.tracker.all());
        }
        self.publish(token_health, refresh_age, now);
    }

    /// Drop tracked orders and queued resubmits the user has since ignored.
    fn prune_ignored(&mut self, ignore: &IgnoreFilter) {
        for order in self.tracker.all() {
            if ignore.is_ignored(&order.order_id, &order.symbol) {
                tracing::info!(
                    "Order {} ({}) is now ignored, dropping from watch",
                    order.order_id,
                    order.symbol
                );
                self.tracker.remove(&order.order_id);
            }
        }
        self.pending
            .retain(|p| !ignore.is_ignored(&p.replacement.source_order_id, &p.replacement.symbol));
    }

    async fn submit_replacement(&mut self, replacement: ReplacementOrder, now: DateTime<Utc>) {
        let symbol = replacement.symbol.clone();
        let result = self
            .broker
            .submit_order(
                &self.account,
                &replacement.symbol,
                replacement.kind,
                &replacement.params,
                &replacement.client_ref,
            )
            .await;

        match result {
            Ok(Some(order_id)) => {
                tracing::info!(
                    "Recreated {} as order {} (lineage attempt {})",
                    symbol,
                    order_id,
                    replacement.recreation_count
                );
                self.counts.recreated_total += 1;
                self.tracker.insert(replacement.into_watched(order_id, now));
            }
            Ok(None) => {
                // Submission accepted but no id in the response; the next
                // poll picks the order up as a fresh lineage.
                tracing::warn!(
                    "Recreated {} but broker returned no order id; will re-track on next poll",
                    symbol
                );
                self.counts.recreated_total += 1;
            }
            Err(e) => self.handle_submit_failure(replacement, e, now),
        }
    }

    fn handle_submit_failure(
        &mut self,
        replacement: ReplacementOrder,
        error: BrokerError,
        now: DateTime<Utc>,
    ) {
        if error.is_rejection() {
            let err = MonitorError::SubmissionRejected(error.to_string());
            tracing::error!("Replacement for {} rejected: {}", replacement.symbol, error);
            self.last_error = Some(err.to_string());

            // A rejected submission is an attempt; it counts against the cap.
            if replacement.recreation_count >= self.policy.max_recreations() {
                self.abandon(
                    &replacement.source_order_id,
                    &replacement.symbol,
                    replacement.recreation_count,
                    "max_recreations_exceeded",
                );
                return;
            }
            let retry = replacement.next_attempt();
            self.pending.push(PendingResubmit {
                replacement: retry,
                due_at: now + self.reject_delay,
            });
        } else {
            // Broker unreachable: same attempt again next cycle, no tight
            // in-cycle loop.
            let err = MonitorError::BrokerUnavailable(error.to_string());
            tracing::error!(
                "Could not submit replacement for {}: {}",
                replacement.symbol,
                error
            );
            self.last_error = Some(err.to_string());
            self.pending.push(PendingResubmit {
                replacement,
                due_at: now,
            });
        }
    }

    fn abandon(&mut self, order_id: &str, symbol: &str, attempts: u32, reason: &str) {
        let warning = format!(
            "Abandoned lineage of order {} ({}) after {} attempts: {}",
            order_id, symbol, attempts, reason
        );
        tracing::warn!("{}", warning);

        self.tracker.remove(order_id);
        self.counts.abandoned_total += 1;
        self.warnings.push_back(warning);
        while self.warnings.len() > MAX_WARNINGS {
            self.warnings.pop_front();
        }
    }

    /// Replace the published snapshot wholesale at the cycle boundary.
    fn publish(
        &mut self,
        token_health: TokenHealth,
        refresh_age: Option<f64>,
        now: DateTime<Utc>,
    ) {
        let orders = self.tracker.all();
        self.counts.working = orders
            .iter()
            .filter(|o| o.status == OrderStatus::Working)
            .count();
        self.counts.pending_resubmits = self.pending.len();

        let ignored = match self.ignore.read() {
            Ok(guard) => guard.list(),
            Err(poisoned) => poisoned.into_inner().list(),
        };

        let snap = DashboardSnapshot {
            orders,
            ignored,
            token_health: Some(token_health),
            refresh_token_age_days: refresh_age,
            last_cycle_at: Some(now),
            last_error: self.last_error.clone(),
            counts: self.counts.clone(),
            warnings: self.warnings.iter().cloned().collect(),
        };

        match self.snapshot.write() {
            Ok(mut guard) => *guard = snap,
            Err(poisoned) => *poisoned.into_inner() = snap,
        }
    }
}
