use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::models::{IgnoreEntry, IgnoreKey};

/// In-memory predicate over the user's opt-out set.
///
/// Pure lookups only; persistence is write-behind through the ignore store
/// so the watch loop never blocks on I/O during evaluation.
#[derive(Debug, Clone, Default)]
pub struct IgnoreFilter {
    orders: HashMap<String, DateTime<Utc>>,
    symbols: HashMap<String, DateTime<Utc>>,
}

impl IgnoreFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<IgnoreEntry>) -> Self {
        let mut filter = Self::new();
        for entry in entries {
            filter.add(entry);
        }
        filter
    }

    /// An ignored symbol suppresses every order on the symbol; an ignored
    /// order id suppresses only that lineage.
    pub fn is_ignored(&self, order_id: &str, symbol: &str) -> bool {
        self.orders.contains_key(order_id) || self.symbols.contains_key(symbol)
    }

    /// Returns true when the entry was not already present.
    pub fn add(&mut self, entry: IgnoreEntry) -> bool {
        match entry.key {
            IgnoreKey::OrderId(id) => self.orders.insert(id, entry.added_at).is_none(),
            IgnoreKey::Symbol(sym) => self.symbols.insert(sym, entry.added_at).is_none(),
        }
    }

    /// Returns true when an entry was removed.
    pub fn remove(&mut self, key: &IgnoreKey) -> bool {
        match key {
            IgnoreKey::OrderId(id) => self.orders.remove(id).is_some(),
            IgnoreKey::Symbol(sym) => self.symbols.remove(sym).is_some(),
        }
    }

    /// Full entry list, order ids first then symbols, each sorted for
    /// stable dashboard rendering.
    pub fn list(&self) -> Vec<IgnoreEntry> {
        let mut orders: Vec<_> = self.orders.iter().collect();
        orders.sort_by(|a, b| a.0.cmp(b.0));
        let mut symbols: Vec<_> = self.symbols.iter().collect();
        symbols.sort_by(|a, b| a.0.cmp(b.0));

        orders
            .into_iter()
            .map(|(id, at)| IgnoreEntry {
                key: IgnoreKey::OrderId(id.clone()),
                added_at: *at,
            })
            .chain(symbols.into_iter().map(|(sym, at)| IgnoreEntry {
                key: IgnoreKey::Symbol(sym.clone()),
                added_at: *at,
            }))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.orders.len() + self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty() && self.symbols.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_id_suppresses_only_that_order() {
        let mut filter = IgnoreFilter::new();
        filter.add(IgnoreEntry::order_id("1001", Utc::now()));

        assert!(filter.is_ignored("1001", "XYZ"));
        assert!(!filter.is_ignored("1002", "XYZ"));
    }

    #[test]
    fn test_symbol_suppresses_all_orders_on_symbol() {
        let mut filter = IgnoreFilter::new();
        filter.add(IgnoreEntry::symbol("XYZ", Utc::now()));

        assert!(filter.is_ignored("1001", "XYZ"));
        assert!(filter.is_ignored("9999", "XYZ"));
        assert!(!filter.is_ignored("1001", "ABC"));
    }

    #[test]
    fn test_add_is_idempotent() {
        let mut filter = IgnoreFilter::new();
        assert!(filter.add(IgnoreEntry::order_id("1001", Utc::now())));
        assert!(!filter.add(IgnoreEntry::order_id("1001", Utc::now())));
        assert_eq!(filter.len(), 1);
    }

    #[test]
    fn test_remove() {
        let mut filter = IgnoreFilter::new();
        filter.add(IgnoreEntry::symbol("XYZ", Utc::now()));

        assert!(filter.remove(&IgnoreKey::Symbol("XYZ".to_string())));
        assert!(!filter.remove(&IgnoreKey::Symbol("XYZ".to_string())));
        assert!(!filter.is_ignored("1001", "XYZ"));
    }

    #[test]
    fn test_list_round_trips_through_from_entries() {
        let now = Utc::now();
        let mut filter = IgnoreFilter::new();
        filter.add(IgnoreEntry::order_id("1001", now));
        filter.add(IgnoreEntry::symbol("XYZ", now));

        let rebuilt = IgnoreFilter::from_entries(filter.list());
        assert!(rebuilt.is_ignored("1001", "ABC"));
        assert!(rebuilt.is_ignored("42", "XYZ"));
        assert_eq!(rebuilt.len(), 2);
    }
}
