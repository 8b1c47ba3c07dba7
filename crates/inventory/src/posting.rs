//! Applying documents to the stock ledger.
//!
//! Posting is a pure computation: a [`DocumentDraft`] plus a snapshot of the
//! ledger rows it touches yields a [`PostingPlan`] (the posted document and
//! the new ledger rows) or an error, in which case nothing has changed. The
//! caller persists a plan in a single commit.
//!
//! Every line type goes through [`apply_line`]; document types differ only in
//! how their draft lines resolve into `In`/`Out` movements.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use novaerp_core::{CompanyId, DomainError, DomainResult, UnitId, UserId};

use crate::costing::weighted_average_cost;
use crate::document::{
    DocType, DocumentDraft, DocumentId, DraftLine, InventoryDocument, InventoryDocumentLine,
    LineType,
};
use crate::stock::{StockItem, StockKey};

/// Source type stamped on compensating documents.
pub const REVERSAL_SOURCE: &str = "InventoryReversal";

/// Snapshot of ledger rows keyed by (product, warehouse).
pub type Ledger = HashMap<StockKey, StockItem>;

pub fn ledger_from(items: impl IntoIterator<Item = StockItem>) -> Ledger {
    items.into_iter().map(|item| (item.key, item)).collect()
}

/// Tenant-level costing and stock-check settings.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostingPolicy {
    /// Decimal places kept on the moving-average unit cost.
    pub cost_scale: u32,
    /// Whether adjustment Out legs must respect on-hand quantity.
    pub adjustment_checks_stock: bool,
}

impl Default for PostingPolicy {
    fn default() -> Self {
        Self {
            cost_scale: 4,
            adjustment_checks_stock: false,
        }
    }
}

/// A movement with its cost resolved against the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLine {
    pub key: StockKey,
    pub unit_id: UnitId,
    pub line_type: LineType,
    pub quantity: Decimal,
    /// Incoming cost for `In`; the average relieved for `Out`.
    pub unit_cost: Decimal,
    pub check_stock: bool,
}

/// Apply one movement to one ledger row.
///
/// `In` blends the incoming cost into the moving average and adds quantity.
/// `Out` subtracts quantity and leaves the average untouched, failing with
/// `InsufficientStock` when `check_stock` is set and on-hand is short.
pub fn apply_line(
    policy: &PostingPolicy,
    item: &StockItem,
    line: &ResolvedLine,
) -> DomainResult<StockItem> {
    let mut next = item.clone();
    match line.line_type {
        LineType::In => {
            next.average_unit_cost = weighted_average_cost(
                item.quantity_on_hand,
                item.average_unit_cost,
                line.quantity,
                line.unit_cost,
                policy.cost_scale,
            )?;
            next.quantity_on_hand = item
                .quantity_on_hand
                .checked_add(line.quantity)
                .ok_or_else(|| DomainError::validation("on-hand quantity overflows"))?;
        }
        LineType::Out => {
            if line.check_stock && item.quantity_on_hand < line.quantity {
                return Err(DomainError::InsufficientStock {
                    product: item.product_id().to_string(),
                    warehouse: item.warehouse_id().to_string(),
                    on_hand: item.quantity_on_hand,
                    requested: line.quantity,
                });
            }
            next.quantity_on_hand = item.quantity_on_hand - line.quantity;
        }
    }
    Ok(next)
}

/// Result of planning a posting: the Posted document and every ledger row it
/// changed, each still carrying the version it was loaded at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostingPlan {
    pub document: InventoryDocument,
    pub stock_items: Vec<StockItem>,
}

/// Result of planning a cancellation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReversalPlan {
    /// The original document, now Canceled.
    pub original: InventoryDocument,
    /// The Posted compensating document.
    pub document: InventoryDocument,
    pub stock_items: Vec<StockItem>,
}

/// Working copy of the ledger for one document.
struct WorkingLedger<'a> {
    base: &'a Ledger,
    company_id: CompanyId,
    now: DateTime<Utc>,
    touched: HashMap<StockKey, StockItem>,
    order: Vec<StockKey>,
}

impl<'a> WorkingLedger<'a> {
    fn new(base: &'a Ledger, company_id: CompanyId, now: DateTime<Utc>) -> Self {
        Self {
            base,
            company_id,
            now,
            touched: HashMap::new(),
            order: Vec::new(),
        }
    }

    fn current(&self, key: StockKey) -> DomainResult<StockItem> {
        if let Some(item) = self.touched.get(&key) {
            return Ok(item.clone());
        }
        match self.base.get(&key) {
            Some(item) if item.company_id != self.company_id => Err(DomainError::cross_company(
                format!("stock item {key} belongs to another company"),
            )),
            Some(item) => Ok(item.clone()),
            None => Ok(StockItem::empty(self.company_id, key, self.now)),
        }
    }

    fn average_cost(&self, key: StockKey) -> DomainResult<Decimal> {
        Ok(self.current(key)?.average_unit_cost)
    }

    fn apply(&mut self, policy: &PostingPolicy, line: &ResolvedLine) -> DomainResult<()> {
        let item = self.current(line.key)?;
        let mut next = apply_line(policy, &item, line)?;
        next.last_updated_at = self.now;
        if !self.touched.contains_key(&line.key) {
            self.order.push(line.key);
        }
        self.touched.insert(line.key, next);
        Ok(())
    }

    fn into_items(mut self) -> Vec<StockItem> {
        self.order
            .iter()
            .filter_map(|key| self.touched.remove(key))
            .collect()
    }
}

/// Accumulates document lines while applying them.
struct LineWriter<'l, 'a> {
    ledger: &'l mut WorkingLedger<'a>,
    policy: PostingPolicy,
    lines: Vec<InventoryDocumentLine>,
}

impl LineWriter<'_, '_> {
    fn push(&mut self, line: ResolvedLine) -> DomainResult<()> {
        self.ledger.apply(&self.policy, &line)?;
        let line_no = u32::try_from(self.lines.len() + 1)
            .map_err(|_| DomainError::validation("too many document lines"))?;
        self.lines.push(InventoryDocumentLine {
            line_no,
            product_id: line.key.product_id,
            warehouse_id: line.key.warehouse_id,
            unit_id: line.unit_id,
            line_type: line.line_type,
            quantity: line.quantity,
            unit_cost: Some(line.unit_cost),
        });
        Ok(())
    }
}

/// Validate `draft` and compute its effect on `ledger`.
///
/// Lines apply in declaration order against a working copy, so a later line
/// sees the effect of an earlier one on the same stock item. Any failing line
/// rejects the whole document.
pub fn plan_posting(
    draft: &DocumentDraft,
    ledger: &Ledger,
    policy: &PostingPolicy,
    posted_by: UserId,
    now: DateTime<Utc>,
) -> DomainResult<PostingPlan> {
    draft.validate()?;

    let mut working = WorkingLedger::new(ledger, draft.header.company_id, now);
    let mut writer = LineWriter {
        ledger: &mut working,
        policy: *policy,
        lines: Vec::new(),
    };

    for line in &draft.lines {
        match line {
            DraftLine::Receive {
                product_id,
                warehouse_id,
                unit_id,
                quantity,
                unit_cost,
            } => {
                let key = StockKey::new(*product_id, *warehouse_id);
                let unit_cost = match unit_cost {
                    Some(cost) => *cost,
                    None => writer.ledger.average_cost(key)?,
                };
                writer.push(ResolvedLine {
                    key,
                    unit_id: *unit_id,
                    line_type: LineType::In,
                    quantity: *quantity,
                    unit_cost,
                    check_stock: false,
                })?;
            }
            DraftLine::Issue {
                product_id,
                warehouse_id,
                unit_id,
                quantity,
            } => {
                let key = StockKey::new(*product_id, *warehouse_id);
                let unit_cost = writer.ledger.average_cost(key)?;
                writer.push(ResolvedLine {
                    key,
                    unit_id: *unit_id,
                    line_type: LineType::Out,
                    quantity: *quantity,
                    unit_cost,
                    check_stock: true,
                })?;
            }
            DraftLine::Transfer {
                product_id,
                from_warehouse_id,
                to_warehouse_id,
                unit_id,
                quantity,
            } => {
                let from = StockKey::new(*product_id, *from_warehouse_id);
                let to = StockKey::new(*product_id, *to_warehouse_id);
                let unit_cost = writer.ledger.average_cost(from)?;
                writer.push(ResolvedLine {
                    key: from,
                    unit_id: *unit_id,
                    line_type: LineType::Out,
                    quantity: *quantity,
                    unit_cost,
                    check_stock: true,
                })?;
                writer.push(ResolvedLine {
                    key: to,
                    unit_id: *unit_id,
                    line_type: LineType::In,
                    quantity: *quantity,
                    unit_cost,
                    check_stock: false,
                })?;
            }
            DraftLine::Count {
                product_id,
                warehouse_id,
                unit_id,
                actual_quantity,
                unit_cost,
            } => {
                let key = StockKey::new(*product_id, *warehouse_id);
                let item = writer.ledger.current(key)?;
                let diff = *actual_quantity - item.quantity_on_hand;
                if diff > Decimal::ZERO {
                    writer.push(ResolvedLine {
                        key,
                        unit_id: *unit_id,
                        line_type: LineType::In,
                        quantity: diff,
                        unit_cost: unit_cost.unwrap_or(item.average_unit_cost),
                        check_stock: false,
                    })?;
                } else if diff < Decimal::ZERO {
                    writer.push(ResolvedLine {
                        key,
                        unit_id: *unit_id,
                        line_type: LineType::Out,
                        quantity: -diff,
                        unit_cost: item.average_unit_cost,
                        check_stock: policy.adjustment_checks_stock,
                    })?;
                }
            }
        }
    }

    let lines = writer.lines;
    if lines.is_empty() {
        return Err(DomainError::validation(
            "counted quantities match on-hand; nothing to post",
        ));
    }

    let mut document = InventoryDocument::from_draft(draft, now);
    document.lines = lines;
    document.post(posted_by, now)?;

    Ok(PostingPlan {
        document,
        stock_items: working.into_items(),
    })
}

/// Plan the cancellation of a Posted document.
///
/// The original becomes Canceled and a new Posted document applies each of
/// its lines with the opposite direction, last line first. Reversed `In` legs
/// re-enter at the cost recorded on the original line; the average is not
/// rolled back. Reversed `Out` legs are stock-checked unless the original was
/// an adjustment.
pub fn plan_reversal(
    original: &InventoryDocument,
    ledger: &Ledger,
    policy: &PostingPolicy,
    canceled_by: UserId,
    now: DateTime<Utc>,
) -> DomainResult<ReversalPlan> {
    if let Some(reversed) = original.reverses {
        return Err(DomainError::invariant(format!(
            "document {} reverses {reversed} and cannot itself be canceled",
            original.display_ref()
        )));
    }

    let mut canceled = original.clone();
    canceled.cancel(canceled_by, now)?;

    let check_out_legs = original.doc_type != DocType::Adjustment;
    let mut working = WorkingLedger::new(ledger, original.company_id, now);
    let mut writer = LineWriter {
        ledger: &mut working,
        policy: *policy,
        lines: Vec::new(),
    };

    for line in original.lines.iter().rev() {
        let key = line.key();
        let line_type = line.line_type.reversed();
        let unit_cost = match (line_type, line.unit_cost) {
            (LineType::In, Some(cost)) => cost,
            _ => writer.ledger.average_cost(key)?,
        };
        writer.push(ResolvedLine {
            key,
            unit_id: line.unit_id,
            line_type,
            quantity: line.quantity,
            unit_cost,
            check_stock: line_type == LineType::Out && check_out_legs,
        })?;
    }
    let lines = writer.lines;

    let mut document = InventoryDocument {
        id: DocumentId::new(),
        company_id: original.company_id,
        branch_id: original.branch_id,
        doc_number: None,
        doc_date: now.date_naive(),
        doc_type: original.doc_type.reversal(),
        status: crate::document::DocStatus::Draft,
        source_type: Some(REVERSAL_SOURCE.to_string()),
        source_id: Some(Uuid::from(original.id)),
        notes: Some(format!("Reversal of {}", original.display_ref())),
        reverses: Some(original.id),
        created_by: canceled_by,
        created_at: now,
        posted_by: None,
        posted_at: None,
        canceled_by: None,
        canceled_at: None,
        lines,
        version: 0,
    };
    document.post(canceled_by, now)?;

    Ok(ReversalPlan {
        original: canceled,
        document,
        stock_items: working.into_items(),
    })
}
