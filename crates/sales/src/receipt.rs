//! Customer receipts and their allocation across invoices.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use novaerp_core::{
    AggregateRoot, CompanyId, CustomerId, DomainError, DomainResult, UserId, uuid_newtype,
};

use crate::invoice::{InvoiceId, SalesInvoice};

uuid_newtype!(ReceiptId, "ReceiptId");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptStatus {
    Draft,
    Posted,
    Canceled,
}

impl ReceiptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReceiptStatus::Draft => "draft",
            ReceiptStatus::Posted => "posted",
            ReceiptStatus::Canceled => "canceled",
        }
    }
}

impl core::str::FromStr for ReceiptStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(ReceiptStatus::Draft),
            "posted" => Ok(ReceiptStatus::Posted),
            "canceled" => Ok(ReceiptStatus::Canceled),
            other => Err(DomainError::validation(format!("unknown receipt status '{other}'"))),
        }
    }
}

/// Portion of a receipt applied to one invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptAllocation {
    pub invoice_id: InvoiceId,
    pub allocated_amount: Decimal,
}

/// Aggregate root: SalesReceipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesReceipt {
    pub id: ReceiptId,
    pub company_id: CompanyId,
    pub customer_id: CustomerId,
    pub receipt_number: String,
    pub receipt_date: NaiveDate,
    pub amount: Decimal,
    pub status: ReceiptStatus,
    pub notes: Option<String>,
    pub allocations: Vec<ReceiptAllocation>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub posted_by: Option<UserId>,
    pub posted_at: Option<DateTime<Utc>>,
    pub canceled_by: Option<UserId>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub version: u64,
}

impl SalesReceipt {
    #[allow(clippy::too_many_arguments)]
    pub fn draft(
        company_id: CompanyId,
        customer_id: CustomerId,
        receipt_number: impl Into<String>,
        receipt_date: NaiveDate,
        amount: Decimal,
        notes: Option<String>,
        allocations: Vec<ReceiptAllocation>,
        created_by: UserId,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let receipt = Self {
            id: ReceiptId::new(),
            company_id,
            customer_id,
            receipt_number: receipt_number.into(),
            receipt_date,
            amount,
            status: ReceiptStatus::Draft,
            notes,
            allocations,
            created_by,
            created_at: now,
            posted_by: None,
            posted_at: None,
            canceled_by: None,
            canceled_at: None,
            version: 0,
        };
        receipt.validate()?;
        Ok(receipt)
    }

    pub fn total_allocated(&self) -> Decimal {
        self.allocations.iter().map(|a| a.allocated_amount).sum()
    }

    pub fn unallocated(&self) -> Decimal {
        self.amount - self.total_allocated()
    }

    /// Amount positive, every allocation positive, and the allocations
    /// together within the receipt amount.
    pub fn validate(&self) -> DomainResult<()> {
        if self.amount <= Decimal::ZERO {
            return Err(DomainError::validation("receipt amount must be greater than zero"));
        }
        if let Some(a) = self.allocations.iter().find(|a| a.allocated_amount <= Decimal::ZERO) {
            return Err(DomainError::validation(format!(
                "allocation to invoice {} must be greater than zero",
                a.invoice_id
            )));
        }
        let allocated = self.total_allocated();
        if allocated > self.amount {
            return Err(DomainError::AllocationExceedsReceipt {
                receipt: self.receipt_number.clone(),
                amount: self.amount,
                allocated,
            });
        }
        Ok(())
    }

    /// Distinct invoices this receipt allocates to, in first-seen order.
    pub fn invoice_ids(&self) -> Vec<InvoiceId> {
        let mut ids = Vec::new();
        for a in &self.allocations {
            if !ids.contains(&a.invoice_id) {
                ids.push(a.invoice_id);
            }
        }
        ids
    }
}

impl AggregateRoot for SalesReceipt {
    type Id = ReceiptId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Receipt and the invoices it touched, ready to commit together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptPlan {
    pub receipt: SalesReceipt,
    pub invoices: Vec<SalesInvoice>,
}

fn index_invoices(receipt: &SalesReceipt, invoices: Vec<SalesInvoice>) -> DomainResult<HashMap<InvoiceId, SalesInvoice>> {
    let mut by_id = HashMap::with_capacity(invoices.len());
    for invoice in invoices {
        if invoice.company_id != receipt.company_id {
            return Err(DomainError::cross_company(format!(
                "invoice {} belongs to another company",
                invoice.invoice_number
            )));
        }
        by_id.insert(invoice.id, invoice);
    }
    Ok(by_id)
}

fn collect(receipt: &SalesReceipt, mut by_id: HashMap<InvoiceId, SalesInvoice>) -> Vec<SalesInvoice> {
    receipt
        .invoice_ids()
        .into_iter()
        .filter_map(|id| by_id.remove(&id))
        .collect()
}

/// Apply every allocation of a Draft receipt to its invoices.
///
/// Allocations apply in order, each checked against the invoice balance left
/// after the ones before it (including earlier allocations of this receipt to
/// the same invoice). Any failure rejects the receipt as a whole.
pub fn plan_receipt_posting(
    receipt: &SalesReceipt,
    invoices: Vec<SalesInvoice>,
    posted_by: UserId,
    now: DateTime<Utc>,
) -> DomainResult<ReceiptPlan> {
    if receipt.status != ReceiptStatus::Draft {
        return Err(DomainError::posted(format!(
            "receipt {} is already {}",
            receipt.receipt_number,
            receipt.status.as_str()
        )));
    }
    receipt.validate()?;

    let mut by_id = index_invoices(receipt, invoices)?;
    for allocation in &receipt.allocations {
        let invoice = by_id
            .get_mut(&allocation.invoice_id)
            .ok_or_else(|| DomainError::not_found(format!("invoice {}", allocation.invoice_id)))?;
        if invoice.customer_id != receipt.customer_id {
            return Err(DomainError::validation(format!(
                "invoice {} belongs to a different customer",
                invoice.invoice_number
            )));
        }
        invoice.ensure_posted()?;
        invoice.apply_payment(allocation.allocated_amount)?;
    }

    let mut posted = receipt.clone();
    posted.status = ReceiptStatus::Posted;
    posted.posted_by = Some(posted_by);
    posted.posted_at = Some(now);

    Ok(ReceiptPlan {
        invoices: collect(receipt, by_id),
        receipt: posted,
    })
}

/// Cancel a receipt. A Posted receipt gives its allocations back.
pub fn plan_receipt_cancellation(
    receipt: &SalesReceipt,
    invoices: Vec<SalesInvoice>,
    canceled_by: UserId,
    now: DateTime<Utc>,
) -> DomainResult<ReceiptPlan> {
    let mut canceled = receipt.clone();
    canceled.status = ReceiptStatus::Canceled;
    canceled.canceled_by = Some(canceled_by);
    canceled.canceled_at = Some(now);

    match receipt.status {
        ReceiptStatus::Canceled => Err(DomainError::posted(format!(
            "receipt {} is already canceled",
            receipt.receipt_number
        ))),
        ReceiptStatus::Draft => Ok(ReceiptPlan {
            receipt: canceled,
            invoices: Vec::new(),
        }),
        ReceiptStatus::Posted => {
            let mut by_id = index_invoices(receipt, invoices)?;
            for allocation in &receipt.allocations {
                let invoice = by_id.get_mut(&allocation.invoice_id).ok_or_else(|| {
                    DomainError::not_found(format!("invoice {}", allocation.invoice_id))
                })?;
                invoice.reverse_payment(allocation.allocated_amount)?;
            }
            Ok(ReceiptPlan {
                invoices: collect(receipt, by_id),
                receipt: canceled,
            })
        }
    }
}

/// Propose allocations of `amount` over open invoices, oldest first.
///
/// Only Posted invoices with a positive balance are considered. Stops when the
/// amount runs out; any remainder stays unallocated.
pub fn suggest_allocations(open_invoices: &[SalesInvoice], amount: Decimal) -> Vec<ReceiptAllocation> {
    let mut candidates: Vec<&SalesInvoice> = open_invoices
        .iter()
        .filter(|inv| inv.ensure_posted().is_ok() && inv.balance_due() > Decimal::ZERO)
        .collect();
    candidates.sort_by(|a, b| {
        a.invoice_date
            .cmp(&b.invoice_date)
            .then_with(|| a.invoice_number.cmp(&b.invoice_number))
    });

    let mut left = amount;
    let mut out = Vec::new();
    for inv in candidates {
        if left <= Decimal::ZERO {
            break;
        }
        let take = left.min(inv.balance_due());
        out.push(ReceiptAllocation {
            invoice_id: inv.id,
            allocated_amount: take,
        });
        left -= take;
    }
    out
}
