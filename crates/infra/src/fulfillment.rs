//! Sales fulfillment bridge: deliveries and returns moving stock.
//!
//! Posting a delivery issues the goods from the delivery warehouse through
//! an `Out` inventory document and raises the invoice's delivered
//! quantities. Posting a return receives the goods back through an `In`
//! document at the current average cost. In both cases the inventory
//! document, the stock items, the invoice and the sales document are
//! written in one commit.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use novaerp_core::{DomainError, RequestContext, WarehouseId};
use novaerp_inventory::{DocType, DocumentDraft, DocumentHeader, DocumentId, DraftLine};
use novaerp_sales::{
    DeliveryId, FulfillmentLine, FulfillmentStatus, InvoiceId, LineRequest, ReturnId,
    SalesDelivery, SalesInvoice, SalesReturn,
};

use crate::catalog::ensure_owned;
use crate::error::EngineResult;
use crate::modules::ModuleGuard;
use crate::posting::InventoryPostingEngine;
use crate::store::{CatalogRef, ChangeSet, ErpStore};

/// Source type stamped on inventory documents posted for a delivery.
pub const DELIVERY_SOURCE: &str = "SalesDelivery";
/// Source type stamped on inventory documents posted for a return.
pub const RETURN_SOURCE: &str = "SalesReturn";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateDeliveryRequest {
    pub invoice_id: InvoiceId,
    pub warehouse_id: WarehouseId,
    pub delivery_date: NaiveDate,
    pub notes: Option<String>,
    pub lines: Vec<LineRequest>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateReturnRequest {
    pub invoice_id: InvoiceId,
    pub warehouse_id: WarehouseId,
    pub return_date: NaiveDate,
    pub reason: Option<String>,
    pub lines: Vec<LineRequest>,
}

/// State of a delivery or return after an operation.
///
/// For a reversal, `inventory_document_id` and `doc_number` name the
/// compensating document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FulfillmentResult {
    pub id: Uuid,
    pub status: FulfillmentStatus,
    pub inventory_document_id: Option<Uuid>,
    pub doc_number: Option<String>,
}

fn inventory_draft(
    ctx: &RequestContext,
    doc_type: DocType,
    doc_date: NaiveDate,
    source: (&str, Uuid),
    notes: String,
    lines: Vec<DraftLine>,
) -> DocumentDraft {
    DocumentDraft::new(
        doc_type,
        DocumentHeader {
            company_id: ctx.company_id(),
            branch_id: ctx.branch_id(),
            doc_date,
            source_type: Some(source.0.to_string()),
            source_id: Some(source.1),
            notes: Some(notes),
            created_by: ctx.user_id(),
        },
        lines,
    )
}

fn issue_lines(warehouse_id: WarehouseId, lines: &[FulfillmentLine]) -> Vec<DraftLine> {
    lines
        .iter()
        .map(|l| DraftLine::Issue {
            product_id: l.product_id,
            warehouse_id,
            unit_id: l.unit_id,
            quantity: l.quantity,
        })
        .collect()
}

fn receive_lines(warehouse_id: WarehouseId, lines: &[FulfillmentLine]) -> Vec<DraftLine> {
    lines
        .iter()
        .map(|l| DraftLine::Receive {
            product_id: l.product_id,
            warehouse_id,
            unit_id: l.unit_id,
            quantity: l.quantity,
            unit_cost: None,
        })
        .collect()
}

/// Drives deliveries and returns through the inventory posting engine.
#[derive(Debug, Clone)]
pub struct SalesFulfillmentBridge<S, M> {
    engine: InventoryPostingEngine<S, M>,
}

impl<S, M> SalesFulfillmentBridge<S, M>
where
    S: ErpStore,
    M: ModuleGuard,
{
    pub fn new(engine: InventoryPostingEngine<S, M>) -> Self {
        Self { engine }
    }

    fn store(&self) -> &S {
        self.engine.store()
    }

    async fn load_invoice(&self, ctx: &RequestContext, id: InvoiceId) -> EngineResult<SalesInvoice> {
        self.store()
            .load_invoice(ctx.company_id(), id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("invoice {id}")).into())
    }

    async fn load_delivery(&self, ctx: &RequestContext, id: DeliveryId) -> EngineResult<SalesDelivery> {
        self.store()
            .load_delivery(ctx.company_id(), id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("delivery {id}")).into())
    }

    async fn load_return(&self, ctx: &RequestContext, id: ReturnId) -> EngineResult<SalesReturn> {
        self.store()
            .load_return(ctx.company_id(), id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("return {id}")).into())
    }

    #[instrument(skip_all, fields(company_id = %ctx.company_id(), invoice_id = %request.invoice_id), err)]
    pub async fn create_delivery(
        &self,
        ctx: &RequestContext,
        request: CreateDeliveryRequest,
    ) -> EngineResult<FulfillmentResult> {
        self.engine.modules().ensure_sales_enabled(ctx.company_id()).await?;
        let invoice = self.load_invoice(ctx, request.invoice_id).await?;
        ensure_owned(
            self.store(),
            ctx.company_id(),
            [CatalogRef::Warehouse(request.warehouse_id)],
        )
        .await?;

        let delivery = SalesDelivery::draft(
            &invoice,
            request.warehouse_id,
            request.delivery_date,
            request.notes,
            &request.lines,
            ctx.user_id(),
            Utc::now(),
        )?;
        let result = FulfillmentResult {
            id: delivery.id.into(),
            status: delivery.status(),
            inventory_document_id: None,
            doc_number: None,
        };

        let mut changes = ChangeSet::new(ctx.company_id());
        changes.deliveries = vec![delivery];
        self.store().commit(changes).await?;
        Ok(result)
    }

    /// Issue the delivered goods and raise the invoice's delivered quantities.
    #[instrument(skip_all, fields(company_id = %ctx.company_id(), delivery_id = %id), err)]
    pub async fn post_delivery(
        &self,
        ctx: &RequestContext,
        id: DeliveryId,
    ) -> EngineResult<FulfillmentResult> {
        self.engine.modules().ensure_sales_enabled(ctx.company_id()).await?;
        self.engine.modules().ensure_inventory_enabled(ctx.company_id()).await?;
        let mut delivery = self.load_delivery(ctx, id).await?;
        if delivery.status() != FulfillmentStatus::Draft {
            return Err(DomainError::posted(format!(
                "delivery {id} is {}",
                delivery.status().as_str()
            ))
            .into());
        }

        let mut invoice = self.load_invoice(ctx, delivery.invoice_id).await?;
        if let Err(err) = delivery.apply_to_invoice(&mut invoice) {
            tracing::warn!(delivery_id = %id, error = %err, "delivery rejected");
            return Err(err.into());
        }

        let draft = inventory_draft(
            ctx,
            DocType::Out,
            delivery.delivery_date,
            (DELIVERY_SOURCE, delivery.id.into()),
            format!("Delivery for invoice {}", invoice.invoice_number),
            issue_lines(delivery.warehouse_id, &delivery.lines),
        );
        let plan = self.engine.prepare(ctx, &draft).await?;
        let document_id = plan.document.id;
        delivery.post(document_id.into(), ctx.user_id(), Utc::now())?;

        let result_status = delivery.status();
        let mut changes = ChangeSet::new(ctx.company_id());
        changes.stock_items = plan.stock_items;
        changes.documents = vec![plan.document];
        changes.invoices = vec![invoice];
        changes.deliveries = vec![delivery];
        let outcome = self.store().commit(changes).await?;

        let doc_number = outcome.doc_number(document_id).map(str::to_string);
        tracing::info!(
            delivery_id = %id,
            doc_number = doc_number.as_deref().unwrap_or_default(),
            "delivery posted"
        );
        Ok(FulfillmentResult {
            id: id.into(),
            status: result_status,
            inventory_document_id: Some(document_id.into()),
            doc_number,
        })
    }

    /// Cancel a draft delivery. A posted delivery must be reversed.
    #[instrument(skip_all, fields(company_id = %ctx.company_id(), delivery_id = %id), err)]
    pub async fn cancel_delivery(
        &self,
        ctx: &RequestContext,
        id: DeliveryId,
    ) -> EngineResult<FulfillmentResult> {
        self.engine.modules().ensure_sales_enabled(ctx.company_id()).await?;
        let mut delivery = self.load_delivery(ctx, id).await?;
        delivery.cancel_draft(ctx.user_id(), Utc::now())?;

        let result = FulfillmentResult {
            id: id.into(),
            status: delivery.status(),
            inventory_document_id: None,
            doc_number: None,
        };
        let mut changes = ChangeSet::new(ctx.company_id());
        changes.deliveries = vec![delivery];
        self.store().commit(changes).await?;
        Ok(result)
    }

    /// Undo a posted delivery: compensate its inventory document, lower the
    /// invoice's delivered quantities and mark the delivery canceled.
    #[instrument(skip_all, fields(company_id = %ctx.company_id(), delivery_id = %id), err)]
    pub async fn reverse_delivery(
        &self,
        ctx: &RequestContext,
        id: DeliveryId,
    ) -> EngineResult<FulfillmentResult> {
        self.engine.modules().ensure_sales_enabled(ctx.company_id()).await?;
        self.engine.modules().ensure_inventory_enabled(ctx.company_id()).await?;
        let mut delivery = self.load_delivery(ctx, id).await?;
        delivery.reverse(ctx.user_id(), Utc::now())?;
        let document_id = delivery
            .inventory_document_id
            .ok_or_else(|| DomainError::invariant(format!("posted delivery {id} has no inventory document")))?;

        let plan = self
            .engine
            .prepare_reversal(ctx, DocumentId::from_uuid(document_id))
            .await?;
        let mut invoice = self.load_invoice(ctx, delivery.invoice_id).await?;
        delivery.undo_on_invoice(&mut invoice)?;

        let compensating_id = plan.document.id;
        let result_status = delivery.status();
        let mut changes = ChangeSet::new(ctx.company_id());
        changes.stock_items = plan.stock_items;
        changes.documents = vec![plan.original, plan.document];
        changes.invoices = vec![invoice];
        changes.deliveries = vec![delivery];
        let outcome = self.store().commit(changes).await?;

        let doc_number = outcome.doc_number(compensating_id).map(str::to_string);
        tracing::info!(
            delivery_id = %id,
            doc_number = doc_number.as_deref().unwrap_or_default(),
            "delivery reversed"
        );
        Ok(FulfillmentResult {
            id: id.into(),
            status: result_status,
            inventory_document_id: Some(compensating_id.into()),
            doc_number,
        })
    }

    #[instrument(skip_all, fields(company_id = %ctx.company_id(), invoice_id = %request.invoice_id), err)]
    pub async fn create_return(
        &self,
        ctx: &RequestContext,
        request: CreateReturnRequest,
    ) -> EngineResult<FulfillmentResult> {
        self.engine.modules().ensure_sales_enabled(ctx.company_id()).await?;
        let invoice = self.load_invoice(ctx, request.invoice_id).await?;
        ensure_owned(
            self.store(),
            ctx.company_id(),
            [CatalogRef::Warehouse(request.warehouse_id)],
        )
        .await?;

        let sales_return = SalesReturn::draft(
            &invoice,
            request.warehouse_id,
            request.return_date,
            request.reason,
            &request.lines,
            ctx.user_id(),
            Utc::now(),
        )?;
        let result = FulfillmentResult {
            id: sales_return.id.into(),
            status: sales_return.status(),
            inventory_document_id: None,
            doc_number: None,
        };

        let mut changes = ChangeSet::new(ctx.company_id());
        changes.returns = vec![sales_return];
        self.store().commit(changes).await?;
        Ok(result)
    }

    /// Receive returned goods at the current average cost and raise the
    /// invoice's returned quantities. Delivered quantities are left unchanged.
    #[instrument(skip_all, fields(company_id = %ctx.company_id(), return_id = %id), err)]
    pub async fn post_return(
        &self,
        ctx: &RequestContext,
        id: ReturnId,
    ) -> EngineResult<FulfillmentResult> {
        self.engine.modules().ensure_sales_enabled(ctx.company_id()).await?;
        self.engine.modules().ensure_inventory_enabled(ctx.company_id()).await?;
        let mut sales_return = self.load_return(ctx, id).await?;
        if sales_return.status() != FulfillmentStatus::Draft {
            return Err(DomainError::posted(format!(
                "return {id} is {}",
                sales_return.status().as_str()
            ))
            .into());
        }

        let mut invoice = self.load_invoice(ctx, sales_return.invoice_id).await?;
        if let Err(err) = sales_return.apply_to_invoice(&mut invoice) {
            tracing::warn!(return_id = %id, error = %err, "return rejected");
            return Err(err.into());
        }

        let draft = inventory_draft(
            ctx,
            DocType::In,
            sales_return.return_date,
            (RETURN_SOURCE, sales_return.id.into()),
            format!("Return for invoice {}", invoice.invoice_number),
            receive_lines(sales_return.warehouse_id, &sales_return.lines),
        );
        let plan = self.engine.prepare(ctx, &draft).await?;
        let document_id = plan.document.id;
        sales_return.post(document_id.into(), ctx.user_id(), Utc::now())?;

        let result_status = sales_return.status();
        let mut changes = ChangeSet::new(ctx.company_id());
        changes.stock_items = plan.stock_items;
        changes.documents = vec![plan.document];
        changes.invoices = vec![invoice];
        changes.returns = vec![sales_return];
        let outcome = self.store().commit(changes).await?;

        let doc_number = outcome.doc_number(document_id).map(str::to_string);
        tracing::info!(
            return_id = %id,
            doc_number = doc_number.as_deref().unwrap_or_default(),
            "return posted"
        );
        Ok(FulfillmentResult {
            id: id.into(),
            status: result_status,
            inventory_document_id: Some(document_id.into()),
            doc_number,
        })
    }

    #[instrument(skip_all, fields(company_id = %ctx.company_id(), return_id = %id), err)]
    pub async fn cancel_return(
        &self,
        ctx: &RequestContext,
        id: ReturnId,
    ) -> EngineResult<FulfillmentResult> {
        self.engine.modules().ensure_sales_enabled(ctx.company_id()).await?;
        let mut sales_return = self.load_return(ctx, id).await?;
        sales_return.cancel_draft(ctx.user_id(), Utc::now())?;

        let result = FulfillmentResult {
            id: id.into(),
            status: sales_return.status(),
            inventory_document_id: None,
            doc_number: None,
        };
        let mut changes = ChangeSet::new(ctx.company_id());
        changes.returns = vec![sales_return];
        self.store().commit(changes).await?;
        Ok(result)
    }

    #[instrument(skip_all, fields(company_id = %ctx.company_id(), return_id = %id), err)]
    pub async fn reverse_return(
        &self,
        ctx: &RequestContext,
        id: ReturnId,
    ) -> EngineResult<FulfillmentResult> {
        self.engine.modules().ensure_sales_enabled(ctx.company_id()).await?;
        self.engine.modules().ensure_inventory_enabled(ctx.company_id()).await?;
        let mut sales_return = self.load_return(ctx, id).await?;
        sales_return.reverse(ctx.user_id(), Utc::now())?;
        let document_id = sales_return
            .inventory_document_id
            .ok_or_else(|| DomainError::invariant(format!("posted return {id} has no inventory document")))?;

        let plan = self
            .engine
            .prepare_reversal(ctx, DocumentId::from_uuid(document_id))
            .await?;
        let mut invoice = self.load_invoice(ctx, sales_return.invoice_id).await?;
        sales_return.undo_on_invoice(&mut invoice)?;

        let compensating_id = plan.document.id;
        let result_status = sales_return.status();
        let mut changes = ChangeSet::new(ctx.company_id());
        changes.stock_items = plan.stock_items;
        changes.documents = vec![plan.original, plan.document];
        changes.invoices = vec![invoice];
        changes.returns = vec![sales_return];
        let outcome = self.store().commit(changes).await?;

        let doc_number = outcome.doc_number(compensating_id).map(str::to_string);
        tracing::info!(
            return_id = %id,
            doc_number = doc_number.as_deref().unwrap_or_default(),
            "return reversed"
        );
        Ok(FulfillmentResult {
            id: id.into(),
            status: result_status,
            inventory_document_id: Some(compensating_id.into()),
            doc_number,
        })
    }
}
