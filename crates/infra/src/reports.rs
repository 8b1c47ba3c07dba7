//! Inventory reports engine. Reads only; nothing here commits.

use tracing::instrument;

use novaerp_core::{DomainError, RequestContext};
use novaerp_inventory::report;
use novaerp_inventory::{
    LowStockRow, MovementQuery, MovementReport, StockBalanceRow, StockFilter, ValuationReport,
};

use crate::catalog::ensure_owned;
use crate::error::EngineResult;
use crate::modules::ModuleGuard;
use crate::store::{CatalogRef, ErpStore};

#[derive(Debug, Clone)]
pub struct InventoryReportsEngine<S, M> {
    store: S,
    modules: M,
}

impl<S, M> InventoryReportsEngine<S, M>
where
    S: ErpStore,
    M: ModuleGuard,
{
    pub fn new(store: S, modules: M) -> Self {
        Self { store, modules }
    }

    #[instrument(skip_all, fields(company_id = %ctx.company_id()), err)]
    pub async fn stock_balance(
        &self,
        ctx: &RequestContext,
        filter: &StockFilter,
    ) -> EngineResult<Vec<StockBalanceRow>> {
        self.modules.ensure_inventory_enabled(ctx.company_id()).await?;
        let items = self.store.list_stock_items(ctx.company_id()).await?;
        Ok(report::stock_balance(&items, filter)?)
    }

    /// Cardex for one product, optionally narrowed to a warehouse and a
    /// date range.
    #[instrument(skip_all, fields(company_id = %ctx.company_id(), product_id = %query.product_id), err)]
    pub async fn movements(
        &self,
        ctx: &RequestContext,
        query: &MovementQuery,
    ) -> EngineResult<MovementReport> {
        self.modules.ensure_inventory_enabled(ctx.company_id()).await?;
        if let (Some(from), Some(to)) = (query.from, query.to) {
            if from > to {
                return Err(DomainError::validation(format!(
                    "date range starts after it ends ({from} > {to})"
                ))
                .into());
            }
        }

        let mut references = vec![CatalogRef::Product(query.product_id)];
        references.extend(query.warehouse_id.map(CatalogRef::Warehouse));
        ensure_owned(&self.store, ctx.company_id(), references).await?;

        let documents = self
            .store
            .list_documents_for_product(ctx.company_id(), query.product_id)
            .await?;
        Ok(report::movements(&documents, query))
    }

    #[instrument(skip_all, fields(company_id = %ctx.company_id()), err)]
    pub async fn low_stock(
        &self,
        ctx: &RequestContext,
        filter: &StockFilter,
    ) -> EngineResult<Vec<LowStockRow>> {
        self.modules.ensure_inventory_enabled(ctx.company_id()).await?;
        let items = self.store.list_stock_items(ctx.company_id()).await?;
        Ok(report::low_stock(&items, filter))
    }

    #[instrument(skip_all, fields(company_id = %ctx.company_id()), err)]
    pub async fn valuation(
        &self,
        ctx: &RequestContext,
        filter: &StockFilter,
    ) -> EngineResult<ValuationReport> {
        self.modules.ensure_inventory_enabled(ctx.company_id()).await?;
        let items = self.store.list_stock_items(ctx.company_id()).await?;
        Ok(report::valuation(&items, filter)?)
    }
}
