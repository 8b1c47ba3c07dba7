//! Inventory posting engine.
//!
//! ## Execution flow
//!
//! ```text
//! request
//!   ↓
//! 1. Module gate + acting-company check
//!   ↓
//! 2. Catalog ownership (products, warehouses, units)
//!   ↓
//! 3. Load the stock items the document touches
//!   ↓
//! 4. Plan (pure: validate, apply lines to a working copy, post document)
//!   ↓
//! 5. Commit document + stock items as one change set
//! ```
//!
//! A failure at any step leaves the store untouched. A stale stock item at
//! step 5 surfaces as `Conflict`; the caller may retry the whole request.

use std::collections::HashSet;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use novaerp_core::{
    BranchId, CompanyId, DomainError, ProductId, RequestContext, UnitId, WarehouseId,
};
use novaerp_inventory::{
    DocType, DocumentDraft, DocumentHeader, DocumentId, DraftLine, InventoryDocument,
    PostingPlan, PostingPolicy, ReversalPlan, StockBalanceRow, StockItem, StockKey, ledger_from,
    plan_posting, plan_reversal,
};

use crate::catalog::ensure_owned;
use crate::error::EngineResult;
use crate::fulfillment::{DELIVERY_SOURCE, RETURN_SOURCE};
use crate::modules::ModuleGuard;
use crate::store::{CatalogRef, ChangeSet, ErpStore};

/// Header of a posting command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostingHeader {
    pub company_id: CompanyId,
    pub branch_id: Option<BranchId>,
    pub doc_date: NaiveDate,
    pub source_type: Option<String>,
    pub source_id: Option<Uuid>,
    pub notes: Option<String>,
}

impl PostingHeader {
    pub fn new(company_id: CompanyId, doc_date: NaiveDate) -> Self {
        Self {
            company_id,
            branch_id: None,
            doc_date,
            source_type: None,
            source_id: None,
            notes: None,
        }
    }

    fn into_document_header(self, ctx: &RequestContext) -> DocumentHeader {
        DocumentHeader {
            company_id: self.company_id,
            branch_id: self.branch_id.or(ctx.branch_id()),
            doc_date: self.doc_date,
            source_type: self.source_type,
            source_id: self.source_id,
            notes: self.notes,
            created_by: ctx.user_id(),
        }
    }
}

/// A posting command: header plus lines of one shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostingRequest<L> {
    pub header: PostingHeader,
    pub lines: Vec<L>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockInLine {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub unit_id: UnitId,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockOutLine {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub unit_id: UnitId,
    pub quantity: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferLine {
    pub product_id: ProductId,
    pub from_warehouse_id: WarehouseId,
    pub to_warehouse_id: WarehouseId,
    pub unit_id: UnitId,
    pub quantity: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustmentLine {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub unit_id: UnitId,
    pub actual_quantity: Decimal,
    pub unit_cost: Option<Decimal>,
}

pub type StockInRequest = PostingRequest<StockInLine>;
pub type StockOutRequest = PostingRequest<StockOutLine>;
pub type TransferRequest = PostingRequest<TransferLine>;
pub type AdjustmentRequest = PostingRequest<AdjustmentLine>;

impl From<StockInLine> for DraftLine {
    fn from(l: StockInLine) -> Self {
        DraftLine::Receive {
            product_id: l.product_id,
            warehouse_id: l.warehouse_id,
            unit_id: l.unit_id,
            quantity: l.quantity,
            unit_cost: Some(l.unit_cost),
        }
    }
}

impl From<StockOutLine> for DraftLine {
    fn from(l: StockOutLine) -> Self {
        DraftLine::Issue {
            product_id: l.product_id,
            warehouse_id: l.warehouse_id,
            unit_id: l.unit_id,
            quantity: l.quantity,
        }
    }
}

impl From<TransferLine> for DraftLine {
    fn from(l: TransferLine) -> Self {
        DraftLine::Transfer {
            product_id: l.product_id,
            from_warehouse_id: l.from_warehouse_id,
            to_warehouse_id: l.to_warehouse_id,
            unit_id: l.unit_id,
            quantity: l.quantity,
        }
    }
}

impl From<AdjustmentLine> for DraftLine {
    fn from(l: AdjustmentLine) -> Self {
        DraftLine::Count {
            product_id: l.product_id,
            warehouse_id: l.warehouse_id,
            unit_id: l.unit_id,
            actual_quantity: l.actual_quantity,
            unit_cost: l.unit_cost,
        }
    }
}

impl<L: Into<DraftLine>> PostingRequest<L> {
    pub fn new(header: PostingHeader, lines: Vec<L>) -> Self {
        Self { header, lines }
    }

    fn into_draft(self, doc_type: DocType, ctx: &RequestContext) -> DocumentDraft {
        DocumentDraft::new(
            doc_type,
            self.header.into_document_header(ctx),
            self.lines.into_iter().map(Into::into).collect(),
        )
    }
}

/// Outcome of a posting or cancellation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostingResult {
    pub document_id: DocumentId,
    pub doc_number: Option<String>,
}

/// Distinct ledger keys in first-seen order.
pub(crate) fn distinct_keys(keys: impl IntoIterator<Item = StockKey>) -> Vec<StockKey> {
    let mut seen = HashSet::new();
    keys.into_iter().filter(|k| seen.insert(*k)).collect()
}

/// Applies inventory documents to the stock ledger.
#[derive(Debug, Clone)]
pub struct InventoryPostingEngine<S, M> {
    store: S,
    modules: M,
    policy: PostingPolicy,
}

impl<S, M> InventoryPostingEngine<S, M>
where
    S: ErpStore,
    M: ModuleGuard,
{
    pub fn new(store: S, modules: M, policy: PostingPolicy) -> Self {
        Self {
            store,
            modules,
            policy,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn modules(&self) -> &M {
        &self.modules
    }

    pub fn policy(&self) -> PostingPolicy {
        self.policy
    }

    #[instrument(skip_all, fields(company_id = %ctx.company_id(), lines = request.lines.len()), err)]
    pub async fn post_stock_in(
        &self,
        ctx: &RequestContext,
        request: StockInRequest,
    ) -> EngineResult<PostingResult> {
        self.post(ctx, request.into_draft(DocType::In, ctx)).await
    }

    #[instrument(skip_all, fields(company_id = %ctx.company_id(), lines = request.lines.len()), err)]
    pub async fn post_opening_balance(
        &self,
        ctx: &RequestContext,
        request: StockInRequest,
    ) -> EngineResult<PostingResult> {
        self.post(ctx, request.into_draft(DocType::Opening, ctx)).await
    }

    #[instrument(skip_all, fields(company_id = %ctx.company_id(), lines = request.lines.len()), err)]
    pub async fn post_stock_out(
        &self,
        ctx: &RequestContext,
        request: StockOutRequest,
    ) -> EngineResult<PostingResult> {
        self.post(ctx, request.into_draft(DocType::Out, ctx)).await
    }

    #[instrument(skip_all, fields(company_id = %ctx.company_id(), lines = request.lines.len()), err)]
    pub async fn post_transfer(
        &self,
        ctx: &RequestContext,
        request: TransferRequest,
    ) -> EngineResult<PostingResult> {
        self.post(ctx, request.into_draft(DocType::Transfer, ctx)).await
    }

    #[instrument(skip_all, fields(company_id = %ctx.company_id(), lines = request.lines.len()), err)]
    pub async fn post_adjustment(
        &self,
        ctx: &RequestContext,
        request: AdjustmentRequest,
    ) -> EngineResult<PostingResult> {
        self.post(ctx, request.into_draft(DocType::Adjustment, ctx)).await
    }

    /// Validate `draft` against the store and plan its posting without
    /// committing anything.
    pub async fn prepare(
        &self,
        ctx: &RequestContext,
        draft: &DocumentDraft,
    ) -> EngineResult<PostingPlan> {
        self.modules.ensure_inventory_enabled(ctx.company_id()).await?;
        ctx.ensure_company(draft.header.company_id)?;

        let references = draft.lines.iter().flat_map(|line| {
            let mut refs = vec![
                CatalogRef::Product(line.product_id()),
                CatalogRef::Unit(line.unit_id()),
            ];
            refs.extend(line.warehouses().into_iter().map(CatalogRef::Warehouse));
            refs
        });
        ensure_owned(&self.store, ctx.company_id(), references).await?;

        let keys = distinct_keys(draft.lines.iter().flat_map(DraftLine::keys));
        let ledger = ledger_from(self.store.load_stock_items(ctx.company_id(), &keys).await?);

        Ok(plan_posting(
            draft,
            &ledger,
            &self.policy,
            ctx.user_id(),
            Utc::now(),
        )?)
    }

    async fn post(&self, ctx: &RequestContext, draft: DocumentDraft) -> EngineResult<PostingResult> {
        let doc_type = draft.doc_type;
        let plan = match self.prepare(ctx, &draft).await {
            Ok(plan) => plan,
            Err(err) => {
                tracing::warn!(doc_type = doc_type.as_str(), error = %err, "posting rejected");
                return Err(err);
            }
        };

        let document_id = plan.document.id;
        let mut changes = ChangeSet::new(ctx.company_id());
        changes.stock_items = plan.stock_items;
        changes.documents = vec![plan.document];
        let outcome = self.store.commit(changes).await?;

        let doc_number = outcome.doc_number(document_id).map(str::to_string);
        tracing::info!(
            document_id = %document_id,
            doc_type = doc_type.as_str(),
            doc_number = doc_number.as_deref().unwrap_or_default(),
            "inventory document posted"
        );
        Ok(PostingResult {
            document_id,
            doc_number,
        })
    }

    pub(crate) async fn load_document(
        &self,
        ctx: &RequestContext,
        id: DocumentId,
    ) -> EngineResult<InventoryDocument> {
        self.store
            .load_document(ctx.company_id(), id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("inventory document {id}")).into())
    }

    /// Plan the compensating document for a posted document without
    /// committing anything.
    pub async fn prepare_reversal(
        &self,
        ctx: &RequestContext,
        id: DocumentId,
    ) -> EngineResult<ReversalPlan> {
        self.modules.ensure_inventory_enabled(ctx.company_id()).await?;
        let original = self.load_document(ctx, id).await?;

        let keys = distinct_keys(original.lines.iter().map(|l| l.key()));
        let ledger = ledger_from(self.store.load_stock_items(ctx.company_id(), &keys).await?);

        Ok(plan_reversal(
            &original,
            &ledger,
            &self.policy,
            ctx.user_id(),
            Utc::now(),
        )?)
    }

    /// Cancel a posted document through a compensating document.
    ///
    /// Documents posted on behalf of a delivery or return are reversed
    /// through the sales document instead, so invoice quantities stay in step.
    #[instrument(skip_all, fields(company_id = %ctx.company_id(), document_id = %id), err)]
    pub async fn cancel_document(
        &self,
        ctx: &RequestContext,
        id: DocumentId,
    ) -> EngineResult<PostingResult> {
        let plan = self.prepare_reversal(ctx, id).await?;
        if let Some(source) = plan
            .original
            .source_type
            .as_deref()
            .filter(|s| *s == DELIVERY_SOURCE || *s == RETURN_SOURCE)
        {
            return Err(DomainError::posted(format!(
                "document {} belongs to a {source}; reverse that instead",
                plan.original.display_ref()
            ))
            .into());
        }

        let compensating_id = plan.document.id;
        let mut changes = ChangeSet::new(ctx.company_id());
        changes.stock_items = plan.stock_items;
        changes.documents = vec![plan.original, plan.document];
        let outcome = self.store.commit(changes).await?;

        let doc_number = outcome.doc_number(compensating_id).map(str::to_string);
        tracing::info!(
            canceled = %id,
            compensating = %compensating_id,
            doc_number = doc_number.as_deref().unwrap_or_default(),
            "inventory document canceled"
        );
        Ok(PostingResult {
            document_id: compensating_id,
            doc_number,
        })
    }

    /// Set the low-stock thresholds of a stock item, creating the row if the
    /// pair has never moved.
    #[instrument(skip_all, fields(company_id = %ctx.company_id(), product_id = %product_id, warehouse_id = %warehouse_id), err)]
    pub async fn set_reorder_levels(
        &self,
        ctx: &RequestContext,
        product_id: ProductId,
        warehouse_id: WarehouseId,
        min_quantity: Option<Decimal>,
        max_quantity: Option<Decimal>,
    ) -> EngineResult<StockBalanceRow> {
        self.modules.ensure_inventory_enabled(ctx.company_id()).await?;

        if min_quantity.is_some_and(|q| q < Decimal::ZERO)
            || max_quantity.is_some_and(|q| q < Decimal::ZERO)
        {
            return Err(DomainError::validation("reorder levels must not be negative").into());
        }
        match (min_quantity, max_quantity) {
            (Some(min), Some(max)) if min > max => {
                return Err(DomainError::validation(format!(
                    "minimum quantity {min} exceeds maximum {max}"
                ))
                .into());
            }
            _ => {}
        }

        ensure_owned(
            &self.store,
            ctx.company_id(),
            [
                CatalogRef::Product(product_id),
                CatalogRef::Warehouse(warehouse_id),
            ],
        )
        .await?;

        let key = StockKey::new(product_id, warehouse_id);
        let now = Utc::now();
        let mut item = self
            .store
            .load_stock_items(ctx.company_id(), &[key])
            .await?
            .pop()
            .unwrap_or_else(|| StockItem::empty(ctx.company_id(), key, now));
        item.min_quantity = min_quantity;
        item.max_quantity = max_quantity;
        item.last_updated_at = now;

        let row = StockBalanceRow::try_from(&item)?;
        let mut changes = ChangeSet::new(ctx.company_id());
        changes.stock_items = vec![item];
        self.store.commit(changes).await?;
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use novaerp_core::{Module, UserId};
    use rust_decimal_macros::dec;

    use crate::modules::InMemoryModuleRegistry;
    use crate::store::InMemoryErpStore;

    type Engine = InventoryPostingEngine<Arc<InMemoryErpStore>, Arc<InMemoryModuleRegistry>>;

    struct Fixture {
        engine: Engine,
        store: Arc<InMemoryErpStore>,
        ctx: RequestContext,
        product: ProductId,
        unit: UnitId,
        warehouse: WarehouseId,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryErpStore::new());
        let modules = Arc::new(InMemoryModuleRegistry::new());
        let ctx = RequestContext::new(CompanyId::new(), UserId::new());
        modules.enable(ctx.company_id(), Module::Inventory).unwrap();

        let product = ProductId::new();
        let unit = UnitId::new();
        let warehouse = WarehouseId::new();
        store.register(ctx.company_id(), CatalogRef::Product(product)).unwrap();
        store.register(ctx.company_id(), CatalogRef::Unit(unit)).unwrap();
        store.register(ctx.company_id(), CatalogRef::Warehouse(warehouse)).unwrap();

        Fixture {
            engine: InventoryPostingEngine::new(store.clone(), modules, PostingPolicy::default()),
            store,
            ctx,
            product,
            unit,
            warehouse,
        }
    }

    fn header(ctx: &RequestContext) -> PostingHeader {
        PostingHeader::new(ctx.company_id(), NaiveDate::from_ymd_opt(2026, 3, 1).unwrap())
    }

    #[tokio::test]
    async fn stock_in_commits_document_and_ledger() {
        let f = fixture();
        let result = f
            .engine
            .post_stock_in(
                &f.ctx,
                StockInRequest::new(
                    header(&f.ctx),
                    vec![StockInLine {
                        product_id: f.product,
                        warehouse_id: f.warehouse,
                        unit_id: f.unit,
                        quantity: dec!(10),
                        unit_cost: dec!(3),
                    }],
                ),
            )
            .await
            .unwrap();
        assert_eq!(result.doc_number.as_deref(), Some("IN-000001"));

        let doc = f
            .store
            .load_document(f.ctx.company_id(), result.document_id)
            .await
            .unwrap()
            .unwrap();
        assert!(doc.is_posted());
        assert_eq!(doc.created_by, f.ctx.user_id());

        let items = f
            .store
            .load_stock_items(f.ctx.company_id(), &[StockKey::new(f.product, f.warehouse)])
            .await
            .unwrap();
        assert_eq!(items[0].quantity_on_hand, dec!(10));
        assert_eq!(items[0].version, 1);
    }

    #[tokio::test]
    async fn foreign_header_company_is_rejected() {
        let f = fixture();
        let err = f
            .engine
            .post_stock_out(
                &f.ctx,
                StockOutRequest::new(
                    PostingHeader::new(CompanyId::new(), NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()),
                    vec![],
                ),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "cross_company");
    }

    #[tokio::test]
    async fn unknown_unit_is_not_found_and_nothing_is_written() {
        let f = fixture();
        let err = f
            .engine
            .post_stock_in(
                &f.ctx,
                StockInRequest::new(
                    header(&f.ctx),
                    vec![StockInLine {
                        product_id: f.product,
                        warehouse_id: f.warehouse,
                        unit_id: UnitId::new(),
                        quantity: dec!(1),
                        unit_cost: dec!(1),
                    }],
                ),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "not_found");
        assert!(f.store.list_stock_items(f.ctx.company_id()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reorder_levels_create_row_and_validate_bounds() {
        let f = fixture();
        let row = f
            .engine
            .set_reorder_levels(&f.ctx, f.product, f.warehouse, Some(dec!(5)), Some(dec!(50)))
            .await
            .unwrap();
        assert_eq!(row.quantity_on_hand, dec!(0));
        assert_eq!(row.min_quantity, Some(dec!(5)));

        let err = f
            .engine
            .set_reorder_levels(&f.ctx, f.product, f.warehouse, Some(dec!(10)), Some(dec!(2)))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "validation_error");

        let items = f.store.list_stock_items(f.ctx.company_id()).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].max_quantity, Some(dec!(50)));
    }
}
