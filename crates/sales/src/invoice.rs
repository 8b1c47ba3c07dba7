use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use novaerp_core::{
    AggregateRoot, CompanyId, CustomerId, DomainError, DomainResult, ProductId, UnitId,
    uuid_newtype,
};

uuid_newtype!(InvoiceId, "InvoiceId");
uuid_newtype!(InvoiceLineId, "InvoiceLineId");

/// Invoice document lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Draft,
    Posted,
    Canceled,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Posted => "posted",
            InvoiceStatus::Canceled => "canceled",
        }
    }
}

impl core::str::FromStr for InvoiceStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(InvoiceStatus::Draft),
            "posted" => Ok(InvoiceStatus::Posted),
            "canceled" => Ok(InvoiceStatus::Canceled),
            other => Err(DomainError::validation(format!("unknown invoice status '{other}'"))),
        }
    }
}

/// Settlement state derived from `paid_amount` against `grand_total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Unpaid,
    PartiallyPaid,
    Paid,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Unpaid => "unpaid",
            PaymentStatus::PartiallyPaid => "partially_paid",
            PaymentStatus::Paid => "paid",
        }
    }

    pub fn derive(grand_total: Decimal, paid_amount: Decimal) -> Self {
        if paid_amount <= Decimal::ZERO {
            PaymentStatus::Unpaid
        } else if paid_amount >= grand_total {
            PaymentStatus::Paid
        } else {
            PaymentStatus::PartiallyPaid
        }
    }
}

impl core::str::FromStr for PaymentStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unpaid" => Ok(PaymentStatus::Unpaid),
            "partially_paid" => Ok(PaymentStatus::PartiallyPaid),
            "paid" => Ok(PaymentStatus::Paid),
            other => Err(DomainError::validation(format!("unknown payment status '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesInvoiceLine {
    pub id: InvoiceLineId,
    pub line_no: u32,
    pub product_id: ProductId,
    pub unit_id: UnitId,
    pub quantity: Decimal,
    /// Invariant: `0 <= delivered_quantity <= quantity`.
    pub delivered_quantity: Decimal,
    /// Sum of posted returns. Invariant: `0 <= returned_quantity <= delivered_quantity`.
    #[serde(default)]
    pub returned_quantity: Decimal,
    pub unit_price: Decimal,
}

impl SalesInvoiceLine {
    pub fn new(
        line_no: u32,
        product_id: ProductId,
        unit_id: UnitId,
        quantity: Decimal,
        unit_price: Decimal,
    ) -> Self {
        Self {
            id: InvoiceLineId::new(),
            line_no,
            product_id,
            unit_id,
            quantity,
            delivered_quantity: Decimal::ZERO,
            returned_quantity: Decimal::ZERO,
            unit_price,
        }
    }

    pub fn remaining_quantity(&self) -> Decimal {
        self.quantity - self.delivered_quantity
    }

    /// Delivered units not yet taken back by a return.
    pub fn returnable_quantity(&self) -> Decimal {
        self.delivered_quantity - self.returned_quantity
    }

    pub fn line_total(&self) -> Decimal {
        self.quantity * self.unit_price
    }
}

/// Aggregate root: SalesInvoice.
///
/// Quantities delivered and amounts paid are tracked here; stock and cash
/// movements themselves live in the inventory ledger and in receipts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesInvoice {
    pub id: InvoiceId,
    pub company_id: CompanyId,
    pub customer_id: CustomerId,
    pub invoice_number: String,
    pub invoice_date: NaiveDate,
    pub status: InvoiceStatus,
    pub grand_total: Decimal,
    pub paid_amount: Decimal,
    pub payment_status: PaymentStatus,
    pub lines: Vec<SalesInvoiceLine>,
    pub version: u64,
}

impl SalesInvoice {
    /// A Draft invoice whose grand total is the sum of its line totals.
    pub fn draft(
        company_id: CompanyId,
        customer_id: CustomerId,
        invoice_number: impl Into<String>,
        invoice_date: NaiveDate,
        lines: Vec<SalesInvoiceLine>,
    ) -> DomainResult<Self> {
        if lines.is_empty() {
            return Err(DomainError::validation("invoice must have at least one line"));
        }
        for line in &lines {
            if line.quantity <= Decimal::ZERO {
                return Err(DomainError::validation(format!(
                    "invoice line {}: quantity must be greater than zero",
                    line.line_no
                )));
            }
            if line.unit_price < Decimal::ZERO {
                return Err(DomainError::validation(format!(
                    "invoice line {}: unit price cannot be negative",
                    line.line_no
                )));
            }
        }
        let grand_total = lines.iter().map(SalesInvoiceLine::line_total).sum();

        Ok(Self {
            id: InvoiceId::new(),
            company_id,
            customer_id,
            invoice_number: invoice_number.into(),
            invoice_date,
            status: InvoiceStatus::Draft,
            grand_total,
            paid_amount: Decimal::ZERO,
            payment_status: PaymentStatus::Unpaid,
            lines,
            version: 0,
        })
    }

    pub fn post(&mut self) -> DomainResult<()> {
        if self.status != InvoiceStatus::Draft {
            return Err(DomainError::posted(format!(
                "invoice {} is already {}",
                self.invoice_number,
                self.status.as_str()
            )));
        }
        self.status = InvoiceStatus::Posted;
        Ok(())
    }

    /// Deliveries, returns and receipts may only reference Posted invoices.
    pub fn ensure_posted(&self) -> DomainResult<()> {
        if self.status != InvoiceStatus::Posted {
            return Err(DomainError::invariant(format!(
                "invoice {} is {}, not posted",
                self.invoice_number,
                self.status.as_str()
            )));
        }
        Ok(())
    }

    /// Derived, never stored.
    pub fn balance_due(&self) -> Decimal {
        self.grand_total - self.paid_amount
    }

    pub fn line(&self, id: InvoiceLineId) -> DomainResult<&SalesInvoiceLine> {
        self.lines
            .iter()
            .find(|l| l.id == id)
            .ok_or_else(|| DomainError::not_found(format!("invoice line {id}")))
    }

    fn line_mut(&mut self, id: InvoiceLineId) -> DomainResult<&mut SalesInvoiceLine> {
        self.lines
            .iter_mut()
            .find(|l| l.id == id)
            .ok_or_else(|| DomainError::not_found(format!("invoice line {id}")))
    }

    /// Increase a line's delivered quantity, bounded by what remains.
    pub fn record_delivery(&mut self, line_id: InvoiceLineId, quantity: Decimal) -> DomainResult<()> {
        let line = self.line_mut(line_id)?;
        let remaining = line.remaining_quantity();
        if quantity > remaining {
            return Err(DomainError::ExceedsRemainingQuantity {
                invoice_line: line_id.to_string(),
                remaining,
                requested: quantity,
            });
        }
        line.delivered_quantity += quantity;
        Ok(())
    }

    /// Lower a line's delivered quantity. Units already returned stay
    /// delivered until their return is reversed.
    pub fn undo_delivery(&mut self, line_id: InvoiceLineId, quantity: Decimal) -> DomainResult<()> {
        let line = self.line_mut(line_id)?;
        let returnable = line.returnable_quantity();
        if quantity > returnable {
            return Err(DomainError::invariant(format!(
                "invoice line {line_id}: cannot undo {quantity} delivered, only {returnable} not returned"
            )));
        }
        line.delivered_quantity -= quantity;
        Ok(())
    }

    /// Take back `quantity` delivered units, bounded by what earlier returns
    /// left on the line.
    pub fn record_return(&mut self, line_id: InvoiceLineId, quantity: Decimal) -> DomainResult<()> {
        let line = self.line_mut(line_id)?;
        let returnable = line.returnable_quantity();
        if quantity > returnable {
            return Err(DomainError::ExceedsRemainingQuantity {
                invoice_line: line_id.to_string(),
                remaining: returnable,
                requested: quantity,
            });
        }
        line.returned_quantity += quantity;
        Ok(())
    }

    pub fn undo_return(&mut self, line_id: InvoiceLineId, quantity: Decimal) -> DomainResult<()> {
        let line = self.line_mut(line_id)?;
        if quantity > line.returned_quantity {
            return Err(DomainError::invariant(format!(
                "invoice line {line_id}: cannot undo {quantity} returned, only {} returned",
                line.returned_quantity
            )));
        }
        line.returned_quantity -= quantity;
        Ok(())
    }

    /// Allocate `amount` of a receipt to this invoice.
    pub fn apply_payment(&mut self, amount: Decimal) -> DomainResult<()> {
        let balance_due = self.balance_due();
        if amount > balance_due {
            return Err(DomainError::AllocationExceedsBalance {
                invoice: self.invoice_number.clone(),
                balance_due,
                requested: amount,
            });
        }
        self.paid_amount += amount;
        self.payment_status = PaymentStatus::derive(self.grand_total, self.paid_amount);
        Ok(())
    }

    /// Take back a previously applied allocation. Paid amount never drops below zero.
    pub fn reverse_payment(&mut self, amount: Decimal) -> DomainResult<()> {
        if amount > self.paid_amount {
            return Err(DomainError::invariant(format!(
                "invoice {}: cannot reverse {amount}, only {} paid",
                self.invoice_number, self.paid_amount
            )));
        }
        self.paid_amount -= amount;
        self.payment_status = PaymentStatus::derive(self.grand_total, self.paid_amount);
        Ok(())
    }
}

impl AggregateRoot for SalesInvoice {
    type Id = InvoiceId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}
