//! Inventory domain module.
//!
//! Stock ledger, inventory documents, moving-average costing and the pure
//! posting/reporting functions over them. Deterministic domain logic only
//! (no IO, no storage); the infra crate loads snapshots and commits plans.

pub mod costing;
pub mod document;
pub mod posting;
pub mod report;
pub mod stock;

pub use costing::{round_cost, weighted_average_cost};
pub use document::{
    DocStatus, DocType, DocumentDraft, DocumentHeader, DocumentId, DraftLine, InventoryDocument,
    InventoryDocumentLine, LineType,
};
pub use posting::{
    Ledger, PostingPlan, PostingPolicy, REVERSAL_SOURCE, ResolvedLine, ReversalPlan, apply_line,
    ledger_from, plan_posting, plan_reversal,
};
pub use report::{
    LowStockRow, MovementQuery, MovementReport, MovementRow, StockBalanceRow, StockFilter,
    ValuationReport, WarehouseValuation,
};
pub use stock::{StockItem, StockKey};
