//! Read-only projections over the ledger and posted documents.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use novaerp_core::{DomainError, DomainResult, ProductId, WarehouseId};

use crate::document::{DocStatus, DocType, DocumentId, InventoryDocument, LineType};
use crate::stock::StockItem;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockFilter {
    pub product_id: Option<ProductId>,
    pub warehouse_id: Option<WarehouseId>,
}

impl StockFilter {
    pub fn matches(&self, item: &StockItem) -> bool {
        self.product_id.is_none_or(|p| p == item.product_id())
            && self.warehouse_id.is_none_or(|w| w == item.warehouse_id())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockBalanceRow {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub quantity_on_hand: Decimal,
    pub average_unit_cost: Decimal,
    pub total_value: Decimal,
    pub min_quantity: Option<Decimal>,
    pub max_quantity: Option<Decimal>,
    pub last_updated_at: DateTime<Utc>,
}

impl TryFrom<&StockItem> for StockBalanceRow {
    type Error = DomainError;

    fn try_from(item: &StockItem) -> DomainResult<Self> {
        Ok(Self {
            product_id: item.product_id(),
            warehouse_id: item.warehouse_id(),
            quantity_on_hand: item.quantity_on_hand,
            average_unit_cost: item.average_unit_cost,
            total_value: item.total_value()?,
            min_quantity: item.min_quantity,
            max_quantity: item.max_quantity,
            last_updated_at: item.last_updated_at,
        })
    }
}

/// Current balance per (product, warehouse), ordered by key.
pub fn stock_balance(items: &[StockItem], filter: &StockFilter) -> DomainResult<Vec<StockBalanceRow>> {
    let mut rows = items
        .iter()
        .filter(|item| filter.matches(item))
        .map(StockBalanceRow::try_from)
        .collect::<DomainResult<Vec<_>>>()?;
    rows.sort_by_key(|r| (r.product_id, r.warehouse_id));
    Ok(rows)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementQuery {
    pub product_id: ProductId,
    pub warehouse_id: Option<WarehouseId>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRow {
    pub doc_date: NaiveDate,
    pub document_id: DocumentId,
    pub doc_number: Option<String>,
    pub doc_type: DocType,
    pub status: DocStatus,
    pub source_type: Option<String>,
    pub line_no: u32,
    pub warehouse_id: WarehouseId,
    pub line_type: LineType,
    pub quantity: Decimal,
    pub unit_cost: Option<Decimal>,
    /// Balance after this row, starting from the opening balance.
    pub running_balance: Decimal,
}

/// Cardex for one product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementReport {
    pub product_id: ProductId,
    pub warehouse_id: Option<WarehouseId>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    /// Net movement dated before `from`.
    pub opening_balance: Decimal,
    pub rows: Vec<MovementRow>,
    pub closing_balance: Decimal,
}

/// Movement history for a product, ordered by (doc date, document, line).
///
/// Documents that were ever applied (Posted or Canceled) contribute; a
/// canceled document and its compensating document both appear. Drafts are
/// ignored.
pub fn movements(documents: &[InventoryDocument], query: &MovementQuery) -> MovementReport {
    let mut opening_balance = Decimal::ZERO;
    let mut rows = Vec::new();

    for doc in documents {
        if doc.status == DocStatus::Draft {
            continue;
        }
        for line in &doc.lines {
            if line.product_id != query.product_id
                || query.warehouse_id.is_some_and(|w| w != line.warehouse_id)
            {
                continue;
            }
            if query.from.is_some_and(|from| doc.doc_date < from) {
                opening_balance += line.signed_quantity();
                continue;
            }
            if query.to.is_some_and(|to| doc.doc_date > to) {
                continue;
            }
            rows.push(MovementRow {
                doc_date: doc.doc_date,
                document_id: doc.id,
                doc_number: doc.doc_number.clone(),
                doc_type: doc.doc_type,
                status: doc.status,
                source_type: doc.source_type.clone(),
                line_no: line.line_no,
                warehouse_id: line.warehouse_id,
                line_type: line.line_type,
                quantity: line.quantity,
                unit_cost: line.unit_cost,
                running_balance: Decimal::ZERO,
            });
        }
    }

    rows.sort_by_key(|r| (r.doc_date, r.document_id, r.line_no));

    let mut balance = opening_balance;
    for row in &mut rows {
        balance += row.line_type.signed(row.quantity);
        row.running_balance = balance;
    }

    MovementReport {
        product_id: query.product_id,
        warehouse_id: query.warehouse_id,
        from: query.from,
        to: query.to,
        opening_balance,
        rows,
        closing_balance: balance,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LowStockRow {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub quantity_on_hand: Decimal,
    pub min_quantity: Decimal,
    pub shortfall: Decimal,
}

/// Items at or below their reorder threshold. Items without one never show.
pub fn low_stock(items: &[StockItem], filter: &StockFilter) -> Vec<LowStockRow> {
    let mut rows: Vec<LowStockRow> = items
        .iter()
        .filter(|item| filter.matches(item))
        .filter_map(|item| {
            let min = item.min_quantity?;
            item.is_low_stock().then(|| LowStockRow {
                product_id: item.product_id(),
                warehouse_id: item.warehouse_id(),
                quantity_on_hand: item.quantity_on_hand,
                min_quantity: min,
                shortfall: min - item.quantity_on_hand,
            })
        })
        .collect();
    rows.sort_by_key(|r| (r.product_id, r.warehouse_id));
    rows
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarehouseValuation {
    pub warehouse_id: WarehouseId,
    pub total_quantity: Decimal,
    pub total_value: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValuationReport {
    pub rows: Vec<StockBalanceRow>,
    pub by_warehouse: Vec<WarehouseValuation>,
    pub total_quantity: Decimal,
    pub total_value: Decimal,
}

pub fn valuation(items: &[StockItem], filter: &StockFilter) -> DomainResult<ValuationReport> {
    let rows = stock_balance(items, filter)?;

    let mut per_warehouse: BTreeMap<WarehouseId, (Decimal, Decimal)> = BTreeMap::new();
    for row in &rows {
        let entry = per_warehouse.entry(row.warehouse_id).or_default();
        entry.0 = checked_sum(entry.0, row.quantity_on_hand)?;
        entry.1 = checked_sum(entry.1, row.total_value)?;
    }

    let by_warehouse: Vec<WarehouseValuation> = per_warehouse
        .into_iter()
        .map(|(warehouse_id, (total_quantity, total_value))| WarehouseValuation {
            warehouse_id,
            total_quantity,
            total_value,
        })
        .collect();

    let mut total_quantity = Decimal::ZERO;
    let mut total_value = Decimal::ZERO;
    for w in &by_warehouse {
        total_quantity = checked_sum(total_quantity, w.total_quantity)?;
        total_value = checked_sum(total_value, w.total_value)?;
    }
    Ok(ValuationReport {
        total_quantity,
        total_value,
        rows,
        by_warehouse,
    })
}

fn checked_sum(acc: Decimal, value: Decimal) -> DomainResult<Decimal> {
    acc.checked_add(value)
        .ok_or_else(|| DomainError::validation("valuation total overflows decimal range"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::InventoryDocumentLine;
    use crate::stock::StockKey;
    use novaerp_core::{CompanyId, UnitId, UserId};
    use rust_decimal_macros::dec;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 4, day).unwrap()
    }

    fn item(product: ProductId, warehouse: WarehouseId, qty: Decimal, cost: Decimal) -> StockItem {
        let mut item = StockItem::empty(CompanyId::new(), StockKey::new(product, warehouse), Utc::now());
        item.quantity_on_hand = qty;
        item.average_unit_cost = cost;
        item
    }

    fn doc(
        id: DocumentId,
        day: u32,
        status: DocStatus,
        lines: Vec<(ProductId, WarehouseId, LineType, Decimal)>,
    ) -> InventoryDocument {
        InventoryDocument {
            id,
            company_id: CompanyId::new(),
            branch_id: None,
            doc_number: Some(format!("IN-{day:06}")),
            doc_date: date(day),
            doc_type: DocType::In,
            status,
            source_type: None,
            source_id: None,
            notes: None,
            reverses: None,
            created_by: UserId::new(),
            created_at: Utc::now(),
            posted_by: None,
            posted_at: None,
            canceled_by: None,
            canceled_at: None,
            lines: lines
                .into_iter()
                .enumerate()
                .map(|(i, (product_id, warehouse_id, line_type, quantity))| InventoryDocumentLine {
                    line_no: i as u32 + 1,
                    product_id,
                    warehouse_id,
                    unit_id: UnitId::new(),
                    line_type,
                    quantity,
                    unit_cost: Some(dec!(1)),
                })
                .collect(),
            version: 1,
        }
    }

    #[test]
    fn cardex_orders_by_date_document_and_line() {
        let p = ProductId::new();
        let w = WarehouseId::new();
        let first = DocumentId::from_uuid(uuid::Uuid::from_u128(1));
        let second = DocumentId::from_uuid(uuid::Uuid::from_u128(2));
        let docs = vec![
            doc(second, 3, DocStatus::Posted, vec![(p, w, LineType::Out, dec!(2))]),
            doc(
                first,
                3,
                DocStatus::Posted,
                vec![(p, w, LineType::In, dec!(5)), (p, w, LineType::In, dec!(1))],
            ),
            doc(DocumentId::new(), 1, DocStatus::Posted, vec![(p, w, LineType::In, dec!(10))]),
        ];

        let report = movements(
            &docs,
            &MovementQuery {
                product_id: p,
                warehouse_id: None,
                from: None,
                to: None,
            },
        );
        let order: Vec<(u32, Decimal)> = report.rows.iter().map(|r| (r.line_no, r.running_balance)).collect();
        assert_eq!(
            order,
            vec![(1, dec!(10)), (1, dec!(15)), (2, dec!(16)), (1, dec!(14))]
        );
        assert_eq!(report.rows[1].document_id, first);
        assert_eq!(report.closing_balance, dec!(14));
    }

    #[test]
    fn cardex_window_carries_opening_balance_and_skips_drafts() {
        let p = ProductId::new();
        let w = WarehouseId::new();
        let other = WarehouseId::new();
        let docs = vec![
            doc(DocumentId::new(), 1, DocStatus::Posted, vec![(p, w, LineType::In, dec!(10))]),
            doc(DocumentId::new(), 2, DocStatus::Canceled, vec![(p, w, LineType::In, dec!(4))]),
            doc(DocumentId::new(), 5, DocStatus::Draft, vec![(p, w, LineType::In, dec!(99))]),
            doc(DocumentId::new(), 6, DocStatus::Posted, vec![(p, w, LineType::Out, dec!(3))]),
            doc(DocumentId::new(), 6, DocStatus::Posted, vec![(p, other, LineType::In, dec!(7))]),
            doc(DocumentId::new(), 9, DocStatus::Posted, vec![(p, w, LineType::In, dec!(1))]),
        ];

        let report = movements(
            &docs,
            &MovementQuery {
                product_id: p,
                warehouse_id: Some(w),
                from: Some(date(3)),
                to: Some(date(8)),
            },
        );
        assert_eq!(report.opening_balance, dec!(14));
        assert_eq!(report.rows.len(), 1);
        assert_eq!(report.rows[0].running_balance, dec!(11));
    }

    #[test]
    fn low_stock_reports_shortfall_for_thresholded_items_only() {
        let p = ProductId::new();
        let mut low = item(p, WarehouseId::new(), dec!(3), dec!(1));
        low.min_quantity = Some(dec!(10));
        let no_threshold = item(p, WarehouseId::new(), dec!(0), dec!(1));
        let mut fine = item(p, WarehouseId::new(), dec!(20), dec!(1));
        fine.min_quantity = Some(dec!(10));

        let rows = low_stock(&[low.clone(), no_threshold, fine], &StockFilter::default());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].warehouse_id, low.warehouse_id());
        assert_eq!(rows[0].shortfall, dec!(7));
    }

    #[test]
    fn valuation_totals_per_warehouse() {
        let x = WarehouseId::new();
        let y = WarehouseId::new();
        let items = vec![
            item(ProductId::new(), x, dec!(120), dec!(12)),
            item(ProductId::new(), x, dec!(2), dec!(0.5)),
            item(ProductId::new(), y, dec!(30), dec!(12)),
        ];

        let report = valuation(&items, &StockFilter::default()).unwrap();
        assert_eq!(report.rows.len(), 3);
        assert_eq!(report.total_quantity, dec!(152));
        assert_eq!(report.total_value, dec!(1801));

        let x_total = report.by_warehouse.iter().find(|w| w.warehouse_id == x).unwrap();
        assert_eq!(x_total.total_value, dec!(1441));

        let only_y = valuation(
            &items,
            &StockFilter {
                warehouse_id: Some(y),
                ..StockFilter::default()
            },
        )
        .unwrap();
        assert_eq!(only_y.total_value, dec!(360));
    }
}
