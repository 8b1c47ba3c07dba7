//! Deliveries and returns against posted invoices.
//!
//! Both documents move stock through the inventory ledger when posted; this
//! module holds their state machines and the invoice-side checks.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use novaerp_core::{
    AggregateRoot, CompanyId, DomainError, DomainResult, ProductId, UnitId, UserId, WarehouseId,
    uuid_newtype,
};

use crate::invoice::{InvoiceId, InvoiceLineId, SalesInvoice};

uuid_newtype!(DeliveryId, "DeliveryId");
uuid_newtype!(ReturnId, "ReturnId");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FulfillmentStatus {
    Draft,
    Posted,
    Canceled,
}

impl FulfillmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FulfillmentStatus::Draft => "draft",
            FulfillmentStatus::Posted => "posted",
            FulfillmentStatus::Canceled => "canceled",
        }
    }
}

impl core::str::FromStr for FulfillmentStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(FulfillmentStatus::Draft),
            "posted" => Ok(FulfillmentStatus::Posted),
            "canceled" => Ok(FulfillmentStatus::Canceled),
            other => Err(DomainError::validation(format!(
                "unknown fulfillment status '{other}'"
            ))),
        }
    }
}

/// Requested quantity against one invoice line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRequest {
    pub invoice_line_id: InvoiceLineId,
    pub quantity: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FulfillmentLine {
    pub invoice_line_id: InvoiceLineId,
    pub product_id: ProductId,
    pub unit_id: UnitId,
    pub quantity: Decimal,
}

/// Status and audit stamps shared by deliveries and returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lifecycle {
    pub status: FulfillmentStatus,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub posted_by: Option<UserId>,
    pub posted_at: Option<DateTime<Utc>>,
    pub canceled_by: Option<UserId>,
    pub canceled_at: Option<DateTime<Utc>>,
}

impl Lifecycle {
    fn new(created_by: UserId, now: DateTime<Utc>) -> Self {
        Self {
            status: FulfillmentStatus::Draft,
            created_by,
            created_at: now,
            posted_by: None,
            posted_at: None,
            canceled_by: None,
            canceled_at: None,
        }
    }

    fn ensure_draft(&self, what: &str) -> DomainResult<()> {
        if self.status != FulfillmentStatus::Draft {
            return Err(DomainError::posted(format!(
                "{what} is {}",
                self.status.as_str()
            )));
        }
        Ok(())
    }

    fn post(&mut self, what: &str, user: UserId, now: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_draft(what)?;
        self.status = FulfillmentStatus::Posted;
        self.posted_by = Some(user);
        self.posted_at = Some(now);
        Ok(())
    }

    /// Draft → Canceled. A posted document needs an explicit reversal.
    fn cancel_draft(&mut self, what: &str, user: UserId, now: DateTime<Utc>) -> DomainResult<()> {
        match self.status {
            FulfillmentStatus::Draft => {
                self.mark_canceled(user, now);
                Ok(())
            }
            FulfillmentStatus::Posted => Err(DomainError::posted(format!(
                "{what} is posted to inventory and must be reversed"
            ))),
            FulfillmentStatus::Canceled => {
                Err(DomainError::posted(format!("{what} is already canceled")))
            }
        }
    }

    /// Posted → Canceled, once the inventory effect has been compensated.
    fn reverse(&mut self, what: &str, user: UserId, now: DateTime<Utc>) -> DomainResult<()> {
        match self.status {
            FulfillmentStatus::Posted => {
                self.mark_canceled(user, now);
                Ok(())
            }
            FulfillmentStatus::Draft => Err(DomainError::invariant(format!(
                "{what} is not posted; cancel it instead"
            ))),
            FulfillmentStatus::Canceled => {
                Err(DomainError::posted(format!("{what} is already canceled")))
            }
        }
    }

    fn mark_canceled(&mut self, user: UserId, now: DateTime<Utc>) {
        self.status = FulfillmentStatus::Canceled;
        self.canceled_by = Some(user);
        self.canceled_at = Some(now);
    }
}

fn resolve_lines(invoice: &SalesInvoice, requests: &[LineRequest]) -> DomainResult<Vec<FulfillmentLine>> {
    if requests.is_empty() {
        return Err(DomainError::validation("at least one line is required"));
    }
    requests
        .iter()
        .map(|req| {
            if req.quantity <= Decimal::ZERO {
                return Err(DomainError::validation(format!(
                    "invoice line {}: quantity must be greater than zero",
                    req.invoice_line_id
                )));
            }
            let line = invoice.line(req.invoice_line_id)?;
            Ok(FulfillmentLine {
                invoice_line_id: line.id,
                product_id: line.product_id,
                unit_id: line.unit_id,
                quantity: req.quantity,
            })
        })
        .collect()
}

fn ensure_invoice(invoice: &SalesInvoice, company_id: CompanyId, invoice_id: InvoiceId) -> DomainResult<()> {
    if invoice.company_id != company_id {
        return Err(DomainError::cross_company(format!(
            "invoice {} belongs to another company",
            invoice.invoice_number
        )));
    }
    if invoice.id != invoice_id {
        return Err(DomainError::invariant(format!(
            "document references invoice {invoice_id}, got {}",
            invoice.id
        )));
    }
    invoice.ensure_posted()
}

/// Aggregate root: SalesDelivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesDelivery {
    pub id: DeliveryId,
    pub company_id: CompanyId,
    pub invoice_id: InvoiceId,
    pub warehouse_id: WarehouseId,
    pub delivery_date: NaiveDate,
    pub notes: Option<String>,
    pub lines: Vec<FulfillmentLine>,
    /// Out document created when the delivery was posted.
    pub inventory_document_id: Option<Uuid>,
    #[serde(flatten)]
    pub lifecycle: Lifecycle,
    pub version: u64,
}

impl SalesDelivery {
    pub fn draft(
        invoice: &SalesInvoice,
        warehouse_id: WarehouseId,
        delivery_date: NaiveDate,
        notes: Option<String>,
        lines: &[LineRequest],
        created_by: UserId,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        invoice.ensure_posted()?;
        Ok(Self {
            id: DeliveryId::new(),
            company_id: invoice.company_id,
            invoice_id: invoice.id,
            warehouse_id,
            delivery_date,
            notes,
            lines: resolve_lines(invoice, lines)?,
            inventory_document_id: None,
            lifecycle: Lifecycle::new(created_by, now),
            version: 0,
        })
    }

    pub fn status(&self) -> FulfillmentStatus {
        self.lifecycle.status
    }

    fn label(&self) -> String {
        format!("delivery {}", self.id)
    }

    /// Raise `delivered_quantity` on the invoice for every line.
    ///
    /// Lines are applied in order against the same invoice, so several lines
    /// hitting one invoice line are checked cumulatively.
    pub fn apply_to_invoice(&self, invoice: &mut SalesInvoice) -> DomainResult<()> {
        ensure_invoice(invoice, self.company_id, self.invoice_id)?;
        for line in &self.lines {
            invoice.record_delivery(line.invoice_line_id, line.quantity)?;
        }
        Ok(())
    }

    pub fn undo_on_invoice(&self, invoice: &mut SalesInvoice) -> DomainResult<()> {
        if invoice.id != self.invoice_id {
            return Err(DomainError::invariant("delivery references a different invoice"));
        }
        for line in &self.lines {
            invoice.undo_delivery(line.invoice_line_id, line.quantity)?;
        }
        Ok(())
    }

    pub fn post(&mut self, inventory_document_id: Uuid, user: UserId, now: DateTime<Utc>) -> DomainResult<()> {
        let label = self.label();
        self.lifecycle.post(&label, user, now)?;
        self.inventory_document_id = Some(inventory_document_id);
        Ok(())
    }

    pub fn cancel_draft(&mut self, user: UserId, now: DateTime<Utc>) -> DomainResult<()> {
        let label = self.label();
        self.lifecycle.cancel_draft(&label, user, now)
    }

    pub fn reverse(&mut self, user: UserId, now: DateTime<Utc>) -> DomainResult<()> {
        let label = self.label();
        self.lifecycle.reverse(&label, user, now)
    }
}

impl AggregateRoot for SalesDelivery {
    type Id = DeliveryId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Aggregate root: SalesReturn.
///
/// Goods come back at the current average cost. The invoice's delivered
/// quantity is left as is; posted returns are tracked in `returned_quantity`
/// and together may not exceed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesReturn {
    pub id: ReturnId,
    pub company_id: CompanyId,
    pub invoice_id: InvoiceId,
    pub warehouse_id: WarehouseId,
    pub return_date: NaiveDate,
    pub reason: Option<String>,
    pub lines: Vec<FulfillmentLine>,
    /// In document created when the return was posted.
    pub inventory_document_id: Option<Uuid>,
    #[serde(flatten)]
    pub lifecycle: Lifecycle,
    pub version: u64,
}

impl SalesReturn {
    pub fn draft(
        invoice: &SalesInvoice,
        warehouse_id: WarehouseId,
        return_date: NaiveDate,
        reason: Option<String>,
        lines: &[LineRequest],
        created_by: UserId,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        invoice.ensure_posted()?;
        Ok(Self {
            id: ReturnId::new(),
            company_id: invoice.company_id,
            invoice_id: invoice.id,
            warehouse_id,
            return_date,
            reason,
            lines: resolve_lines(invoice, lines)?,
            inventory_document_id: None,
            lifecycle: Lifecycle::new(created_by, now),
            version: 0,
        })
    }

    pub fn status(&self) -> FulfillmentStatus {
        self.lifecycle.status
    }

    fn label(&self) -> String {
        format!("return {}", self.id)
    }

    /// Raise `returned_quantity` on the invoice for every line.
    ///
    /// Earlier posted returns and earlier lines of this return count against
    /// the same delivered quantity.
    pub fn apply_to_invoice(&self, invoice: &mut SalesInvoice) -> DomainResult<()> {
        ensure_invoice(invoice, self.company_id, self.invoice_id)?;
        for line in &self.lines {
            invoice.record_return(line.invoice_line_id, line.quantity)?;
        }
        Ok(())
    }

    pub fn undo_on_invoice(&self, invoice: &mut SalesInvoice) -> DomainResult<()> {
        if invoice.id != self.invoice_id {
            return Err(DomainError::invariant("return references a different invoice"));
        }
        for line in &self.lines {
            invoice.undo_return(line.invoice_line_id, line.quantity)?;
        }
        Ok(())
    }

    pub fn post(&mut self, inventory_document_id: Uuid, user: UserId, now: DateTime<Utc>) -> DomainResult<()> {
        let label = self.label();
        self.lifecycle.post(&label, user, now)?;
        self.inventory_document_id = Some(inventory_document_id);
        Ok(())
    }

    pub fn cancel_draft(&mut self, user: UserId, now: DateTime<Utc>) -> DomainResult<()> {
        let label = self.label();
        self.lifecycle.cancel_draft(&label, user, now)
    }

    pub fn reverse(&mut self, user: UserId, now: DateTime<Utc>) -> DomainResult<()> {
        let label = self.label();
        self.lifecycle.reverse(&label, user, now)
    }
}

impl AggregateRoot for SalesReturn {
    type Id = ReturnId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoice::SalesInvoiceLine;
    use novaerp_core::CustomerId;
    use rust_decimal_macros::dec;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 6, 1).unwrap()
    }

    fn posted_invoice(qty: Decimal) -> SalesInvoice {
        let line = SalesInvoiceLine::new(1, ProductId::new(), UnitId::new(), qty, dec!(5));
        let mut inv =
            SalesInvoice::draft(CompanyId::new(), CustomerId::new(), "INV-1", date(), vec![line]).unwrap();
        inv.post().unwrap();
        inv
    }

    fn request(invoice: &SalesInvoice, qty: Decimal) -> LineRequest {
        LineRequest {
            invoice_line_id: invoice.lines[0].id,
            quantity: qty,
        }
    }

    #[test]
    fn delivery_lines_copy_product_and_unit_from_invoice() {
        let inv = posted_invoice(dec!(10));
        let delivery = SalesDelivery::draft(
            &inv,
            WarehouseId::new(),
            date(),
            None,
            &[request(&inv, dec!(3))],
            UserId::new(),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(delivery.status(), FulfillmentStatus::Draft);
        assert_eq!(delivery.lines[0].product_id, inv.lines[0].product_id);
        assert_eq!(delivery.company_id, inv.company_id);
    }

    #[test]
    fn cumulative_lines_are_checked_against_remaining() {
        let mut inv = posted_invoice(dec!(10));
        let delivery = SalesDelivery::draft(
            &inv,
            WarehouseId::new(),
            date(),
            None,
            &[request(&inv, dec!(6)), request(&inv, dec!(6))],
            UserId::new(),
            Utc::now(),
        )
        .unwrap();

        let mut working = inv.clone();
        let err = delivery.apply_to_invoice(&mut working).unwrap_err();
        assert_eq!(err.code(), "exceeds_remaining_quantity");

        assert_eq!(inv.lines[0].remaining_quantity(), dec!(10));

        let single = SalesDelivery {
            lines: delivery.lines[..1].to_vec(),
            ..delivery.clone()
        };
        single.apply_to_invoice(&mut inv).unwrap();
        assert_eq!(inv.lines[0].remaining_quantity(), dec!(4));
    }

    #[test]
    fn posted_delivery_cannot_be_canceled_only_reversed() {
        let inv = posted_invoice(dec!(10));
        let mut delivery = SalesDelivery::draft(
            &inv,
            WarehouseId::new(),
            date(),
            None,
            &[request(&inv, dec!(1))],
            UserId::new(),
            Utc::now(),
        )
        .unwrap();
        delivery.post(Uuid::now_v7(), UserId::new(), Utc::now()).unwrap();
        assert!(delivery.inventory_document_id.is_some());

        let err = delivery.cancel_draft(UserId::new(), Utc::now()).unwrap_err();
        assert_eq!(err.code(), "cannot_modify_posted_document");

        delivery.reverse(UserId::new(), Utc::now()).unwrap();
        assert_eq!(delivery.status(), FulfillmentStatus::Canceled);
    }

    #[test]
    fn return_is_capped_by_delivered_quantity() {
        let mut inv = posted_invoice(dec!(10));
        inv.record_delivery(inv.lines[0].id, dec!(4)).unwrap();

        let ret = SalesReturn::draft(
            &inv,
            WarehouseId::new(),
            date(),
            Some("damaged".into()),
            &[request(&inv, dec!(3)), request(&inv, dec!(2))],
            UserId::new(),
            Utc::now(),
        )
        .unwrap();
        match ret.apply_to_invoice(&mut inv.clone()).unwrap_err() {
            DomainError::ExceedsRemainingQuantity {
                remaining, requested, ..
            } => {
                assert_eq!(remaining, dec!(4));
                assert_eq!(requested, dec!(5));
            }
            other => panic!("expected ExceedsRemainingQuantity, got {other:?}"),
        }
    }

    #[test]
    fn earlier_returns_reduce_what_can_come_back() {
        let mut inv = posted_invoice(dec!(10));
        inv.record_delivery(inv.lines[0].id, dec!(4)).unwrap();
        let draft_return = |qty| {
            SalesReturn::draft(
                &inv,
                WarehouseId::new(),
                date(),
                None,
                &[request(&inv, qty)],
                UserId::new(),
                Utc::now(),
            )
            .unwrap()
        };
        let first = draft_return(dec!(4));
        let second = draft_return(dec!(1));

        first.apply_to_invoice(&mut inv).unwrap();
        assert_eq!(inv.lines[0].returned_quantity, dec!(4));
        assert_eq!(inv.lines[0].delivered_quantity, dec!(4));

        let err = second.apply_to_invoice(&mut inv.clone()).unwrap_err();
        assert_eq!(err.code(), "exceeds_remaining_quantity");

        first.undo_on_invoice(&mut inv).unwrap();
        second.apply_to_invoice(&mut inv).unwrap();
        assert_eq!(inv.lines[0].returned_quantity, dec!(1));
    }

    #[test]
    fn unknown_invoice_line_is_not_found() {
        let inv = posted_invoice(dec!(10));
        let err = SalesDelivery::draft(
            &inv,
            WarehouseId::new(),
            date(),
            None,
            &[LineRequest {
                invoice_line_id: InvoiceLineId::new(),
                quantity: dec!(1),
            }],
            UserId::new(),
            Utc::now(),
        )
        .unwrap_err();
        assert_eq!(err.code(), "not_found");
    }
}
