use chrono::{DateTime, Utc};
use common::{LineItem, OrderId, Sku};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stock on hand for one SKU.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryRecord {
    pub sku: Sku,
    /// Never negative.
    pub quantity: i64,
}

/// Units of one SKU held for one order.
///
/// The presence of reservations for an order marks its inventory step as
/// done; only compensation deletes them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    pub id: Uuid,
    pub order_id: OrderId,
    pub sku: Sku,
    pub quantity: u32,
    /// Position of the line in the order, so rows read back in item order.
    pub line_no: u32,
    /// Advisory only; nothing reclaims expired reservations.
    pub expires_at: DateTime<Utc>,
}

impl Reservation {
    /// Returns the reserved line as it travels in events.
    pub fn line_item(&self) -> LineItem {
        LineItem::new(self.sku.clone(), self.quantity)
    }
}

/// A line that failed the stock check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shortfall {
    pub sku: Sku,
    pub requested: u32,
    /// `None` when the SKU has no inventory record.
    pub available: Option<i64>,
}

/// Result of [`InventoryStore::reserve`](crate::InventoryStore::reserve).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// Stock was decremented and these rows inserted.
    Reserved(Vec<Reservation>),
    /// The order already held these rows; nothing was touched.
    AlreadyReserved(Vec<Reservation>),
    /// At least one line failed; nothing was touched.
    Insufficient(Vec<Shortfall>),
}

/// Result of [`InventoryStore::release`](crate::InventoryStore::release).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseOutcome {
    /// Rows that were deleted.
    pub released: Vec<Reservation>,
    /// SKUs whose inventory record vanished; their units could not be returned.
    pub missing_records: Vec<Sku>,
}

impl ReleaseOutcome {
    /// Returns true if the order held no reservations.
    pub fn is_empty(&self) -> bool {
        self.released.is_empty()
    }
}

/// Checks every line against the stock levels found for it.
///
/// `stock` yields the current quantity for a SKU, or `None` if unknown.
pub(crate) fn shortfalls(
    items: &[LineItem],
    stock: impl Fn(&Sku) -> Option<i64>,
) -> Vec<Shortfall> {
    items
        .iter()
        .filter_map(|item| {
            let available = stock(&item.sku);
            match available {
                Some(q) if q >= i64::from(item.quantity) => None,
                _ => Some(Shortfall {
                    sku: item.sku.clone(),
                    requested: item.quantity,
                    available,
                }),
            }
        })
        .collect()
}

/// Builds the reservation rows for an accepted order, one per line.
pub(crate) fn reservations_for(
    order_id: OrderId,
    items: &[LineItem],
    expires_at: DateTime<Utc>,
) -> Vec<Reservation> {
    items
        .iter()
        .enumerate()
        .map(|(line_no, item)| Reservation {
            id: Uuid::new_v4(),
            order_id,
            sku: item.sku.clone(),
            quantity: item.quantity,
            line_no: line_no as u32,
            expires_at,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shortfalls_cover_unknown_and_understocked() {
        let items = vec![
            LineItem::new("A", 5),
            LineItem::new("B", 999_999),
            LineItem::new("C", 1),
        ];
        let stock = |sku: &Sku| match sku.as_str() {
            "A" => Some(10),
            "B" => Some(3),
            _ => None,
        };

        let short = shortfalls(&items, stock);
        assert_eq!(short.len(), 2);
        assert_eq!(short[0].sku, Sku::from("B"));
        assert_eq!(short[0].available, Some(3));
        assert_eq!(short[1].sku, Sku::from("C"));
        assert_eq!(short[1].available, None);
    }

    #[test]
    fn exact_stock_is_enough() {
        let items = vec![LineItem::new("A", 10)];
        assert!(shortfalls(&items, |_| Some(10)).is_empty());
    }

    #[test]
    fn reservations_keep_line_order() {
        let order_id = OrderId::new();
        let items = vec![LineItem::new("B", 1), LineItem::new("A", 2)];
        let rows = reservations_for(order_id, &items, Utc::now());

        let lines: Vec<_> = rows.iter().map(Reservation::line_item).collect();
        assert_eq!(lines, items);
        assert_eq!(rows[1].line_no, 1);
        assert!(rows.iter().all(|r| r.order_id == order_id));
    }
}
