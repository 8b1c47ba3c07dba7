//! Receipt allocation engine: customer money applied to invoice balances.

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use novaerp_core::{CustomerId, DomainError, RequestContext};
use novaerp_sales::{
    ReceiptAllocation, ReceiptId, ReceiptPlan, SalesInvoice, SalesReceipt,
    plan_receipt_cancellation, plan_receipt_posting, suggest_allocations,
};

use crate::catalog::ensure_owned;
use crate::error::EngineResult;
use crate::modules::ModuleGuard;
use crate::store::{CatalogRef, ChangeSet, ErpStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateReceiptRequest {
    pub customer_id: CustomerId,
    pub receipt_number: String,
    pub receipt_date: NaiveDate,
    pub amount: Decimal,
    pub notes: Option<String>,
    pub allocations: Vec<ReceiptAllocation>,
}

#[derive(Debug, Clone)]
pub struct ReceiptAllocationEngine<S, M> {
    store: S,
    modules: M,
}

impl<S, M> ReceiptAllocationEngine<S, M>
where
    S: ErpStore,
    M: ModuleGuard,
{
    pub fn new(store: S, modules: M) -> Self {
        Self { store, modules }
    }

    async fn load_receipt(&self, ctx: &RequestContext, id: ReceiptId) -> EngineResult<SalesReceipt> {
        self.store
            .load_receipt(ctx.company_id(), id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("receipt {id}")).into())
    }

    /// Invoices the receipt allocates to. Missing ones are left out; the
    /// plan reports them as not found.
    async fn load_invoices(&self, ctx: &RequestContext, receipt: &SalesReceipt) -> EngineResult<Vec<SalesInvoice>> {
        let mut invoices = Vec::new();
        for id in receipt.invoice_ids() {
            if let Some(invoice) = self.store.load_invoice(ctx.company_id(), id).await? {
                invoices.push(invoice);
            }
        }
        Ok(invoices)
    }

    async fn commit(&self, ctx: &RequestContext, plan: ReceiptPlan) -> EngineResult<SalesReceipt> {
        let mut changes = ChangeSet::new(ctx.company_id());
        changes.invoices = plan.invoices;
        changes.receipts = vec![plan.receipt.clone()];
        self.store.commit(changes).await?;

        let mut stored = plan.receipt;
        stored.version += 1;
        Ok(stored)
    }

    #[instrument(skip_all, fields(company_id = %ctx.company_id(), customer_id = %request.customer_id), err)]
    pub async fn create_receipt(
        &self,
        ctx: &RequestContext,
        request: CreateReceiptRequest,
    ) -> EngineResult<SalesReceipt> {
        self.modules.ensure_sales_enabled(ctx.company_id()).await?;
        ensure_owned(
            &self.store,
            ctx.company_id(),
            [CatalogRef::Customer(request.customer_id)],
        )
        .await?;

        let receipt = SalesReceipt::draft(
            ctx.company_id(),
            request.customer_id,
            request.receipt_number,
            request.receipt_date,
            request.amount,
            request.notes,
            request.allocations,
            ctx.user_id(),
            Utc::now(),
        )?;
        self.commit(
            ctx,
            ReceiptPlan {
                receipt,
                invoices: Vec::new(),
            },
        )
        .await
    }

    /// Apply every allocation to its invoice and mark the receipt posted.
    #[instrument(skip_all, fields(company_id = %ctx.company_id(), receipt_id = %id), err)]
    pub async fn post_receipt(&self, ctx: &RequestContext, id: ReceiptId) -> EngineResult<SalesReceipt> {
        self.modules.ensure_sales_enabled(ctx.company_id()).await?;
        let receipt = self.load_receipt(ctx, id).await?;
        let invoices = self.load_invoices(ctx, &receipt).await?;

        let plan = match plan_receipt_posting(&receipt, invoices, ctx.user_id(), Utc::now()) {
            Ok(plan) => plan,
            Err(err) => {
                tracing::warn!(receipt = %receipt.receipt_number, error = %err, "receipt rejected");
                return Err(err.into());
            }
        };
        let posted = self.commit(ctx, plan).await?;
        tracing::info!(
            receipt = %posted.receipt_number,
            allocated = %posted.total_allocated(),
            "receipt posted"
        );
        Ok(posted)
    }

    /// Cancel a receipt, giving back what a posted receipt allocated.
    #[instrument(skip_all, fields(company_id = %ctx.company_id(), receipt_id = %id), err)]
    pub async fn cancel_receipt(&self, ctx: &RequestContext, id: ReceiptId) -> EngineResult<SalesReceipt> {
        self.modules.ensure_sales_enabled(ctx.company_id()).await?;
        let receipt = self.load_receipt(ctx, id).await?;
        let invoices = self.load_invoices(ctx, &receipt).await?;

        let plan = plan_receipt_cancellation(&receipt, invoices, ctx.user_id(), Utc::now())?;
        let canceled = self.commit(ctx, plan).await?;
        tracing::info!(receipt = %canceled.receipt_number, "receipt canceled");
        Ok(canceled)
    }

    /// Oldest-first allocation proposal over the customer's open invoices.
    #[instrument(skip_all, fields(company_id = %ctx.company_id(), customer_id = %customer_id), err)]
    pub async fn suggest_allocations(
        &self,
        ctx: &RequestContext,
        customer_id: CustomerId,
        amount: Decimal,
    ) -> EngineResult<Vec<ReceiptAllocation>> {
        self.modules.ensure_sales_enabled(ctx.company_id()).await?;
        if amount <= Decimal::ZERO {
            return Err(DomainError::validation("amount must be greater than zero").into());
        }
        ensure_owned(&self.store, ctx.company_id(), [CatalogRef::Customer(customer_id)]).await?;

        let open = self.store.list_open_invoices(ctx.company_id(), customer_id).await?;
        Ok(suggest_allocations(&open, amount))
    }
}
