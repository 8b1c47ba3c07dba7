//! Domain error model.

use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

use crate::module::Module;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// invariants, conflicts). Infrastructure concerns belong elsewhere.
///
/// Every variant maps to a stable machine-readable [`code`](Self::code) and an
/// HTTP-equivalent [`http_status`](Self::http_status) so the boundary layer can
/// translate it without inspecting messages.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A domain invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A referenced entity does not exist for the acting company.
    #[error("not found: {0}")]
    NotFound(String),

    /// An outbound movement would drive on-hand quantity negative.
    #[error(
        "insufficient stock for product {product} in warehouse {warehouse}: on hand {on_hand}, requested {requested}"
    )]
    InsufficientStock {
        product: String,
        warehouse: String,
        on_hand: Decimal,
        requested: Decimal,
    },

    /// A delivery line asks for more than the invoice line has left to deliver.
    #[error("invoice line {invoice_line}: requested {requested} exceeds remaining {remaining}")]
    ExceedsRemainingQuantity {
        invoice_line: String,
        remaining: Decimal,
        requested: Decimal,
    },

    /// A receipt allocation exceeds the invoice's current balance due.
    #[error("invoice {invoice}: allocation {requested} exceeds balance due {balance_due}")]
    AllocationExceedsBalance {
        invoice: String,
        balance_due: Decimal,
        requested: Decimal,
    },

    /// A receipt's allocations add up to more than the receipt amount.
    #[error("receipt {receipt}: allocations total {allocated} exceeds amount {amount}")]
    AllocationExceedsReceipt {
        receipt: String,
        amount: Decimal,
        allocated: Decimal,
    },

    /// The document has already been posted (or canceled) and cannot change
    /// outside the compensating path.
    #[error("cannot modify posted document: {0}")]
    CannotModifyPostedDocument(String),

    /// The acting company has not enabled the module.
    #[error("module disabled: {0}")]
    ModuleDisabled(Module),

    /// The request references an entity owned by another company.
    #[error("cross-company access: {0}")]
    CrossCompany(String),

    /// A conflict occurred (e.g. stale version / optimistic concurrency).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Authorization failure at the domain boundary.
    #[error("unauthorized")]
    Unauthorized,
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn cross_company(what: impl Into<String>) -> Self {
        Self::CrossCompany(what.into())
    }

    pub fn posted(what: impl Into<String>) -> Self {
        Self::CannotModifyPostedDocument(what.into())
    }

    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            DomainError::Validation(_) => "validation_error",
            DomainError::InvariantViolation(_) => "invariant_violation",
            DomainError::InvalidId(_) => "invalid_id",
            DomainError::NotFound(_) => "not_found",
            DomainError::InsufficientStock { .. } => "insufficient_stock",
            DomainError::ExceedsRemainingQuantity { .. } => "exceeds_remaining_quantity",
            DomainError::AllocationExceedsBalance { .. } => "allocation_exceeds_balance",
            DomainError::AllocationExceedsReceipt { .. } => "allocation_exceeds_receipt",
            DomainError::CannotModifyPostedDocument(_) => "cannot_modify_posted_document",
            DomainError::ModuleDisabled(_) => "module_disabled",
            DomainError::CrossCompany(_) => "cross_company",
            DomainError::Conflict(_) => "conflict",
            DomainError::Unauthorized => "unauthorized",
        }
    }

    /// HTTP-equivalent status code.
    pub fn http_status(&self) -> u16 {
        match self {
            DomainError::Validation(_) | DomainError::InvalidId(_) => 400,
            DomainError::Unauthorized
            | DomainError::ModuleDisabled(_)
            | DomainError::CrossCompany(_) => 403,
            DomainError::NotFound(_) => 404,
            DomainError::CannotModifyPostedDocument(_) | DomainError::Conflict(_) => 409,
            DomainError::InvariantViolation(_)
            | DomainError::InsufficientStock { .. }
            | DomainError::ExceedsRemainingQuantity { .. }
            | DomainError::AllocationExceedsBalance { .. }
            | DomainError::AllocationExceedsReceipt { .. } => 422,
        }
    }

    /// Client-facing representation (`{"error", "message", "status"}`).
    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            error: self.code(),
            message: self.to_string(),
            status: self.http_status(),
        }
    }
}

/// Serializable error payload handed to the boundary layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
    pub status: u16,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn insufficient_stock_maps_to_unprocessable() {
        let err = DomainError::InsufficientStock {
            product: "p".into(),
            warehouse: "w".into(),
            on_hand: dec!(150),
            requested: dec!(200),
        };
        assert_eq!(err.code(), "insufficient_stock");
        assert_eq!(err.http_status(), 422);
        assert!(err.to_string().contains("on hand 150, requested 200"));
    }

    #[test]
    fn body_serializes_code_message_and_status() {
        let body = DomainError::ModuleDisabled(Module::Inventory).body();
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["error"], "module_disabled");
        assert_eq!(json["status"], 403);
        assert_eq!(json["message"], "module disabled: inventory");
    }

    #[test]
    fn posted_document_is_a_conflict_status() {
        let err = DomainError::posted("delivery D-1");
        assert_eq!(err.code(), "cannot_modify_posted_document");
        assert_eq!(err.http_status(), 409);
    }
}
