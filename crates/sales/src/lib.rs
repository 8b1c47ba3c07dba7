//! Sales domain module.
//!
//! Invoices, deliveries, returns and receipts: the sales side of
//! fulfillment and receivables. Deterministic domain logic only (no IO, no
//! storage); stock effects are planned by the inventory crate and committed
//! together with these documents by the infra engines.

pub mod delivery;
pub mod invoice;
pub mod receipt;

pub use delivery::{
    DeliveryId, FulfillmentLine, FulfillmentStatus, Lifecycle, LineRequest, ReturnId,
    SalesDelivery, SalesReturn,
};
pub use invoice::{
    InvoiceId, InvoiceLineId, InvoiceStatus, PaymentStatus, SalesInvoice, SalesInvoiceLine,
};
pub use receipt::{
    ReceiptAllocation, ReceiptId, ReceiptPlan, ReceiptStatus, SalesReceipt,
    plan_receipt_cancellation, plan_receipt_posting, suggest_allocations,
};
