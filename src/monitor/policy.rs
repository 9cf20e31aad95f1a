use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::models::{OrderKind, OrderParams, OrderStatus, WatchedOrder};
use crate::monitor::ignore::IgnoreFilter;
use crate::monitor::tracker::Transition;

/// A replacement built by the policy but not yet accepted by the broker.
/// Carries everything needed to submit and, on success, to track the new
/// order under the original lineage.
#[derive(Debug, Clone)]
pub struct ReplacementOrder {
    pub symbol: String,
    pub kind: OrderKind,
    pub params: OrderParams,
    pub lineage_id: Uuid,
    pub recreation_count: u32,
    pub client_ref: String,
    pub source_order_id: String,
}

impl ReplacementOrder {
    /// Promote to a tracked order once the broker assigns an id.
    pub fn into_watched(self, order_id: String, now: DateTime<Utc>) -> WatchedOrder {
        WatchedOrder {
            order_id,
            symbol: self.symbol,
            kind: self.kind,
            params: self.params,
            status: OrderStatus::Working,
            lineage_id: self.lineage_id,
            recreation_count: self.recreation_count,
            client_ref: Some(self.client_ref),
            first_seen: now,
            last_seen: now,
        }
    }

    /// Next submission attempt of the same lineage: fresh reference tag,
    /// attempt counted against the cap.
    pub fn next_attempt(mut self) -> Self {
        self.recreation_count += 1;
        self.client_ref = Uuid::new_v4().to_string();
        self
    }
}

#[derive(Debug, Clone)]
pub enum Action {
    None,
    Recreate {
        replacement: ReplacementOrder,
        /// One-shot fixed backoff before resubmission; set for rejects so a
        /// transiently hostile broker (halted symbol, price band) is not
        /// hammered. Not exponential: attempts are capped anyway.
        delay: Option<Duration>,
    },
    Abandon {
        reason: String,
    },
}

/// Decides whether a terminal transition warrants recreation and builds the
/// replacement parameters. Recreates what was there; never re-prices.
#[derive(Debug, Clone)]
pub struct RecreationPolicy {
    max_recreations: u32,
    reject_delay: Duration,
}

impl RecreationPolicy {
    pub fn new(max_recreations: u32, reject_delay_secs: u64) -> Self {
        Self {
            max_recreations,
            reject_delay: Duration::seconds(reject_delay_secs as i64),
        }
    }

    pub fn max_recreations(&self) -> u32 {
        self.max_recreations
    }

    pub fn evaluate(
        &self,
        order: &WatchedOrder,
        transition: &Transition,
        ignore: &IgnoreFilter,
    ) -> Action {
        let observed = match transition {
            Transition::New | Transition::Unchanged => return Action::None,
            Transition::StatusChanged { to, .. } => *to,
            Transition::Disappeared => OrderStatus::Cancelled,
        };

        // Fills and expiries end a lineage on purpose; working/unknown are
        // not terminal at all.
        if !observed.is_recreatable() {
            return Action::None;
        }

        // The user may have opted out between polls; re-check on every
        // evaluation.
        if ignore.is_ignored(&order.order_id, &order.symbol) {
            return Action::None;
        }

        if order.recreation_count >= self.max_recreations {
            return Action::Abandon {
                reason: "max_recreations_exceeded".to_string(),
            };
        }

        let replacement = ReplacementOrder {
            symbol: order.symbol.clone(),
            kind: order.kind,
            params: order.params.clone(),
            lineage_id: order.lineage_id,
            recreation_count: order.recreation_count + 1,
            client_ref: Uuid::new_v4().to_string(),
            source_order_id: order.order_id.clone(),
        };

        let delay = if observed == OrderStatus::Rejected {
            Some(self.reject_delay)
        } else {
            None
        };

        Action::Recreate { replacement, delay }
    }
}

impl Default for RecreationPolicy {
    fn default() -> Self {
        Self::new(3, 30)
    }
}
