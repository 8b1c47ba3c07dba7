use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use novaerp_core::{AggregateRoot, CompanyId, DomainError, DomainResult, ProductId, WarehouseId};

/// Ledger key: one stock item per (product, warehouse) within a company.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StockKey {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
}

impl StockKey {
    pub fn new(product_id: ProductId, warehouse_id: WarehouseId) -> Self {
        Self {
            product_id,
            warehouse_id,
        }
    }
}

impl core::fmt::Display for StockKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}@{}", self.product_id, self.warehouse_id)
    }
}

/// Stock ledger row: on-hand quantity and moving-average unit cost.
///
/// Created lazily (version 0) on the first movement into its key and mutated
/// only through [`crate::posting`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockItem {
    pub company_id: CompanyId,
    pub key: StockKey,
    pub quantity_on_hand: Decimal,
    pub average_unit_cost: Decimal,
    /// Reorder threshold; `None` excludes the item from low-stock reports.
    pub min_quantity: Option<Decimal>,
    pub max_quantity: Option<Decimal>,
    pub last_updated_at: DateTime<Utc>,
    pub version: u64,
}

impl StockItem {
    /// A not-yet-persisted item with nothing on hand.
    pub fn empty(company_id: CompanyId, key: StockKey, now: DateTime<Utc>) -> Self {
        Self {
            company_id,
            key,
            quantity_on_hand: Decimal::ZERO,
            average_unit_cost: Decimal::ZERO,
            min_quantity: None,
            max_quantity: None,
            last_updated_at: now,
            version: 0,
        }
    }

    pub fn product_id(&self) -> ProductId {
        self.key.product_id
    }

    pub fn warehouse_id(&self) -> WarehouseId {
        self.key.warehouse_id
    }

    /// Quantity × average cost, computed on demand and never stored.
    pub fn total_value(&self) -> DomainResult<Decimal> {
        self.quantity_on_hand
            .checked_mul(self.average_unit_cost)
            .ok_or_else(|| {
                DomainError::validation(format!(
                    "stock value of product {} in warehouse {} overflows decimal range",
                    self.key.product_id, self.key.warehouse_id
                ))
            })
    }

    pub fn is_low_stock(&self) -> bool {
        matches!(self.min_quantity, Some(min) if self.quantity_on_hand <= min)
    }

    pub fn is_persisted(&self) -> bool {
        self.version > 0
    }
}

impl AggregateRoot for StockItem {
    type Id = StockKey;

    fn id(&self) -> &Self::Id {
        &self.key
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn item(qty: Decimal, cost: Decimal, min: Option<Decimal>) -> StockItem {
        let mut item = StockItem::empty(
            CompanyId::new(),
            StockKey::new(ProductId::new(), WarehouseId::new()),
            Utc::now(),
        );
        item.quantity_on_hand = qty;
        item.average_unit_cost = cost;
        item.min_quantity = min;
        item
    }

    #[test]
    fn total_value_is_quantity_times_average_cost() {
        assert_eq!(item(dec!(150), dec!(12), None).total_value().unwrap(), dec!(1800));
    }

    #[test]
    fn total_value_overflow_is_an_error() {
        let err = item(Decimal::MAX, dec!(2), None).total_value().unwrap_err();
        assert_eq!(err.code(), "validation_error");
    }

    #[test]
    fn low_stock_requires_a_threshold() {
        assert!(!item(dec!(0), dec!(1), None).is_low_stock());
        assert!(item(dec!(5), dec!(1), Some(dec!(5))).is_low_stock());
        assert!(!item(dec!(6), dec!(1), Some(dec!(5))).is_low_stock());
    }
}
