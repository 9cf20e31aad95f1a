use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};

use crate::models::{OrderSnapshot, OrderStatus, WatchedOrder};

/// Classification of one observed broker state relative to the prior record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    New,
    Unchanged,
    StatusChanged {
        from: OrderStatus,
        to: OrderStatus,
    },
    /// The broker no longer returns this order at all. Brokers prune
    /// terminal orders from the active feed, so absence is read as
    /// cancellation by the policy.
    Disappeared,
}

/// System of record for watched orders. Exactly one record per live
/// order id; all mutation happens on the single watch-loop worker.
#[derive(Debug, Default)]
pub struct StateTracker {
    orders: BTreeMap<String, WatchedOrder>,
}

impl StateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the latest broker-observed state for one order.
    ///
    /// Idempotent: applying the same observed status twice produces
    /// `Unchanged`, never a spurious transition.
    pub fn upsert(&mut self, snap: &OrderSnapshot, now: DateTime<Utc>) -> Transition {
        match self.orders.get_mut(&snap.order_id) {
            Some(order) => {
                order.last_seen = now;
                order.params = snap.params.clone();
                if order.status == snap.status {
                    Transition::Unchanged
                } else {
                    let from = order.status;
                    order.status = snap.status;
                    Transition::StatusChanged {
                        from,
                        to: snap.status,
                    }
                }
            }
            None => {
                self.orders
                    .insert(snap.order_id.clone(), WatchedOrder::from_snapshot(snap, now));
                Transition::New
            }
        }
    }

    /// Track an order we submitted ourselves (a recreation under an
    /// existing lineage).
    pub fn insert(&mut self, order: WatchedOrder) {
        self.orders.insert(order.order_id.clone(), order);
    }

    pub fn get(&self, order_id: &str) -> Option<&WatchedOrder> {
        self.orders.get(order_id)
    }

    pub fn remove(&mut self, order_id: &str) -> Option<WatchedOrder> {
        self.orders.remove(order_id)
    }

    /// Snapshot of all tracked orders, ordered by order id for
    /// deterministic dashboard rendering.
    pub fn all(&self) -> Vec<WatchedOrder> {
        self.orders.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    /// Diff a full broker snapshot against the tracked set.
    ///
    /// Upserts every fetched order and synthesizes `Disappeared` for every
    /// tracked order absent from the fetch. Returns the post-upsert record
    /// alongside each transition.
    pub fn apply_snapshot(
        &mut self,
        snaps: &[OrderSnapshot],
        now: DateTime<Utc>,
    ) -> Vec<(WatchedOrder, Transition)> {
        let seen: HashSet<&str> = snaps.iter().map(|s| s.order_id.as_str()).collect();

        let mut out = Vec::with_capacity(snaps.len());
        for snap in snaps {
            let transition = self.upsert(snap, now);
            if let Some(order) = self.orders.get(&snap.order_id) {
                out.push((order.clone(), transition));
            }
        }

        for order in self.orders.values() {
            if !seen.contains(order.order_id.as_str()) {
                out.push((order.clone(), Transition::Disappeared));
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AssetType, OrderKind, OrderParams, OrderSide, TimeInForce};

    fn snap(order_id: &str, symbol: &str, status: OrderStatus) -> OrderSnapshot {
        OrderSnapshot {
            order_id: order_id.to_string(),
            symbol: symbol.to_string(),
            kind: OrderKind::Stop,
            status,
            params: OrderParams {
                side: OrderSide::Sell,
                quantity: 100.0,
                trigger_price: 50.0,
                limit_price: None,
                time_in_force: TimeInForce::Day,
                asset_type: AssetType::Equity,
            },
        }
    }

    #[test]
    fn test_upsert_new_then_unchanged() {
        let mut tracker = StateTracker::new();
        let now = Utc::now();
        let s = snap("1001", "XYZ", OrderStatus::Working);

        assert_eq!(tracker.upsert(&s, now), Transition::New);
        assert_eq!(tracker.upsert(&s, now), Transition::Unchanged);
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_status_change_reported_once() {
        let mut tracker = StateTracker::new();
        let now = Utc::now();
        tracker.upsert(&snap("1001", "XYZ", OrderStatus::Working), now);

        let cancelled = snap("1001", "XYZ", OrderStatus::Cancelled);
        assert_eq!(
            tracker.upsert(&cancelled, now),
            Transition::StatusChanged {
                from: OrderStatus::Working,
                to: OrderStatus::Cancelled,
            }
        );
        // Same observation again: no spurious transition
        assert_eq!(tracker.upsert(&cancelled, now), Transition::Unchanged);
    }

    #[test]
    fn test_apply_snapshot_idempotent() {
        let mut tracker = StateTracker::new();
        let now = Utc::now();
        let snaps = vec![
            snap("1001", "XYZ", OrderStatus::Working),
            snap("1002", "ABC", OrderStatus::Working),
        ];

        let first = tracker.apply_snapshot(&snaps, now);
        assert!(first.iter().all(|(_, t)| *t == Transition::New));

        let second = tracker.apply_snapshot(&snaps, now);
        assert!(second.iter().all(|(_, t)| *t == Transition::Unchanged));
    }

    #[test]
    fn test_apply_snapshot_reports_disappearance() {
        let mut tracker = StateTracker::new();
        let now = Utc::now();
        tracker.apply_snapshot(
            &[
                snap("1001", "XYZ", OrderStatus::Working),
                snap("1002", "ABC", OrderStatus::Working),
            ],
            now,
        );

        let transitions = tracker.apply_snapshot(&[snap("1002", "ABC", OrderStatus::Working)], now);
        let disappeared: Vec<_> = transitions
            .iter()
            .filter(|(_, t)| *t == Transition::Disappeared)
            .collect();
        assert_eq!(disappeared.len(), 1);
        assert_eq!(disappeared[0].0.order_id, "1001");
        // The record stays tracked until the engine acts on the transition
        assert!(tracker.get("1001").is_some());
    }

    #[test]
    fn test_all_sorted_by_order_id() {
        let mut tracker = StateTracker::new();
        let now = Utc::now();
        tracker.upsert(&snap("30", "C", OrderStatus::Working), now);
        tracker.upsert(&snap("10", "A", OrderStatus::Working), now);
        tracker.upsert(&snap("20", "B", OrderStatus::Working), now);

        let ids: Vec<String> = tracker.all().into_iter().map(|o| o.order_id).collect();
        assert_eq!(ids, vec!["10", "20", "30"]);
    }

    #[test]
    fn test_upsert_refreshes_parameters() {
        let mut tracker = StateTracker::new();
        let now = Utc::now();
        tracker.upsert(&snap("1001", "XYZ", OrderStatus::Working), now);

        let mut repriced = snap("1001", "XYZ", OrderStatus::Working);
        repriced.params.trigger_price = 48.0;
        assert_eq!(tracker.upsert(&repriced, now), Transition::Unchanged);
        assert_eq!(tracker.get("1001").unwrap().params.trigger_price, 48.0);
    }

    #[test]
    fn test_remove() {
        let mut tracker = StateTracker::new();
        let now = Utc::now();
        tracker.upsert(&snap("1001", "XYZ", OrderStatus::Working), now);

        let removed = tracker.remove("1001").unwrap();
        assert_eq!(removed.order_id, "1001");
        assert!(tracker.is_empty());
        assert!(tracker.remove("1001").is_none());
    }
}
