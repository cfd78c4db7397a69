//! Order-line consolidation
//!
//! Collapses raw unpaid order-item rows — possibly spread across several
//! tickets for one table — into deduplicated, quantity-summed display lines.
//! The key is (trimmed menu name, unit price), deliberately NOT the ticket
//! id, so the same dish ordered on two tickets merges into one line.
//!
//! This is display aggregation, not validation: malformed quantities are
//! corrected (default 1), never rejected. The system of record validates.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::model::{ItemId, TicketId, UnpaidItemRow};

/// One consolidated display row
///
/// Derived, never persisted: rebuilt from scratch on every load of the
/// unpaid-item set so the sum always matches the current source rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidatedLine {
    pub menu_name: String,
    /// Unit price in minor currency units
    pub unit_price: i64,
    /// Summed quantity across contributing rows
    pub quantity: i64,
    /// Tickets that contributed rows to this line
    pub ticket_ids: BTreeSet<TicketId>,
    /// Source item rows folded into this line
    pub item_ids: BTreeSet<ItemId>,
}

/// Consolidate raw unpaid item rows into display lines
///
/// Order-independent: any permutation of the input yields the same lines,
/// the same summed quantities and the same contributing-id sets. Output is
/// sorted by (menu name, unit price).
pub fn consolidate_order_items(rows: &[UnpaidItemRow]) -> Vec<ConsolidatedLine> {
    let mut lines: BTreeMap<(String, i64), ConsolidatedLine> = BTreeMap::new();

    for row in rows {
        let menu_name = row.menu_name.trim();
        let key = (menu_name.to_string(), row.unit_price);

        // Guard against malformed upstream rows: missing or non-positive
        // quantities count as one
        let quantity = match row.quantity {
            Some(q) if q > 0 => q,
            _ => 1,
        };

        let line = lines.entry(key).or_insert_with(|| ConsolidatedLine {
            menu_name: menu_name.to_string(),
            unit_price: row.unit_price,
            quantity: 0,
            ticket_ids: BTreeSet::new(),
            item_ids: BTreeSet::new(),
        });

        line.quantity += quantity;
        line.ticket_ids.insert(row.ticket_id);
        line.item_ids.insert(row.item_id);
    }

    // Defensive: a zero or negative summed line must never render
    lines
        .into_values()
        .filter(|line| line.quantity > 0)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(item_id: ItemId, ticket_id: TicketId, menu: &str, price: i64, qty: Option<i64>) -> UnpaidItemRow {
        UnpaidItemRow {
            item_id,
            ticket_id,
            menu_name: menu.to_string(),
            unit_price: price,
            quantity: qty,
        }
    }

    #[test]
    fn test_merges_same_dish_across_tickets() {
        let rows = vec![
            row(1, 1, "Kimchi Stew", 8000, Some(1)),
            row(2, 2, "Kimchi Stew", 8000, Some(1)),
            row(3, 1, "Rice", 2000, Some(2)),
        ];

        let lines = consolidate_order_items(&rows);
        assert_eq!(lines.len(), 2);

        let stew = lines.iter().find(|l| l.menu_name == "Kimchi Stew").unwrap();
        assert_eq!(stew.quantity, 2);
        assert_eq!(stew.ticket_ids, BTreeSet::from([1, 2]));
        assert_eq!(stew.item_ids, BTreeSet::from([1, 2]));

        let rice = lines.iter().find(|l| l.menu_name == "Rice").unwrap();
        assert_eq!(rice.quantity, 2);
        assert_eq!(rice.ticket_ids, BTreeSet::from([1]));
    }

    #[test]
    fn test_price_splits_the_key() {
        // Same dish at two prices (e.g. lunch special) stays on two lines
        let rows = vec![
            row(1, 1, "Bibimbap", 9000, Some(1)),
            row(2, 1, "Bibimbap", 7000, Some(1)),
        ];

        let lines = consolidate_order_items(&rows);
        assert_eq!(lines.len(), 2);
    }

    #[test]
    fn test_menu_name_is_trimmed() {
        let rows = vec![
            row(1, 1, "  Rice", 2000, Some(1)),
            row(2, 2, "Rice  ", 2000, Some(3)),
        ];

        let lines = consolidate_order_items(&rows);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].menu_name, "Rice");
        assert_eq!(lines[0].quantity, 4);
    }

    #[test]
    fn test_defensive_quantity_defaults_to_one() {
        let rows = vec![
            row(1, 1, "Rice", 2000, Some(0)),
            row(2, 1, "Rice", 2000, None),
            row(3, 1, "Rice", 2000, Some(-2)),
        ];

        let lines = consolidate_order_items(&rows);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].quantity, 3);
    }

    #[test]
    fn test_permutation_invariance() {
        let rows = vec![
            row(1, 1, "Kimchi Stew", 8000, Some(1)),
            row(2, 2, "Kimchi Stew", 8000, Some(1)),
            row(3, 1, "Rice", 2000, Some(2)),
            row(4, 3, "Bibimbap", 9000, None),
        ];

        let baseline = consolidate_order_items(&rows);

        // Exercise a handful of distinct orderings
        let mut shuffled = rows.clone();
        shuffled.reverse();
        assert_eq!(consolidate_order_items(&shuffled), baseline);

        shuffled.swap(0, 2);
        shuffled.swap(1, 3);
        assert_eq!(consolidate_order_items(&shuffled), baseline);
    }

    #[test]
    fn test_empty_input() {
        assert!(consolidate_order_items(&[]).is_empty());
    }
}
