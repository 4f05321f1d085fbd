use std::collections::HashMap;

use crate::matching::{Dedup, IdentityKey};
use crate::models::{FixtureRecord, OrderLine};
use crate::size::SizeParser;

/// Pending order quantities keyed the same way as inventory deduplication.
#[derive(Debug, Clone, Default)]
pub struct PendingOrders {
    quantities: HashMap<IdentityKey<Dedup>, u32>,
}

impl PendingOrders {
    pub fn len(&self) -> usize {
        self.quantities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quantities.is_empty()
    }

    pub fn quantity(&self, key: &IdentityKey<Dedup>) -> u32 {
        self.quantities.get(key).copied().unwrap_or(0)
    }

    /// Pending quantity for an inventory item.
    pub fn quantity_for(&self, parser: &SizeParser, item: &FixtureRecord) -> u32 {
        self.quantity(&IdentityKey::for_fixture(parser, item))
    }
}

/// Sum order quantities per dedup identity key.
pub fn aggregate_pending_orders(parser: &SizeParser, orders: &[OrderLine]) -> PendingOrders {
    let mut quantities: HashMap<IdentityKey<Dedup>, u32> = HashMap::new();
    for order in orders {
        let key = IdentityKey::build_with(parser, &order.manufacturer, &order.brand, &order.size);
        let total = quantities.entry(key).or_default();
        *total = total.saturating_add(order.quantity);
    }
    PendingOrders { quantities }
}

/// Pending quantity for an inventory item, with the default rules.
pub fn pending_quantity_for(item: &FixtureRecord, orders: &PendingOrders) -> u32 {
    orders.quantity_for(SizeParser::default_parser(), item)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_orders_aggregate_across_notations() {
        let parser = SizeParser::new();
        let orders = vec![
            OrderLine::new("Dentium", "SuperLine", "3507", 5),
            OrderLine::new("DENTIUM", "Super Line", "Φ3.5 X 7", 2),
            OrderLine::new("Dentium", "SuperLine", "Φ4 X 10", 1),
        ];
        let pending = aggregate_pending_orders(&parser, &orders);
        assert_eq!(pending.len(), 2);

        let item = FixtureRecord::new("Dentium", "SuperLine", "35-07");
        assert_eq!(pending_quantity_for(&item, &pending), 7);
    }

    #[test]
    fn test_orders_keep_exchange_category_separate() {
        let parser = SizeParser::new();
        let orders = vec![OrderLine::new("수술중교환_IBS", "Magicore", "C4 Φ3.5 X 11", 3)];
        let pending = aggregate_pending_orders(&parser, &orders);

        let ordinary = FixtureRecord::new("IBS", "Magicore", "C4 Φ3.5 X 11");
        assert_eq!(pending.quantity_for(&parser, &ordinary), 0);
        assert_eq!(pending.quantity_for(&parser, &ordinary.exchange_counterpart()), 3);
    }

    #[test]
    fn test_orders_quantity_saturates() {
        let parser = SizeParser::new();
        let orders = vec![
            OrderLine::new("Osstem", "TS III", "Φ4.0 X 10", u32::MAX),
            OrderLine::new("Osstem", "TS III", "Φ4 x 10", 2),
        ];
        let pending = aggregate_pending_orders(&parser, &orders);
        let item = FixtureRecord::new("Osstem", "TS III", "Φ4.0 X 10");
        assert_eq!(pending.quantity_for(&parser, &item), u32::MAX);
    }

    #[test]
    fn test_orders_empty() {
        let pending = aggregate_pending_orders(&SizeParser::new(), &[]);
        assert!(pending.is_empty());
    }
}
