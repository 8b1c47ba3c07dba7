//! Engine-level error: a domain failure or an infrastructure failure.

use thiserror::Error;

use novaerp_core::{DomainError, ErrorBody};

use crate::store::StoreError;

/// Error returned by every engine operation.
///
/// Store concurrency and tenant-isolation failures are folded into their
/// domain equivalents ([`DomainError::Conflict`], [`DomainError::CrossCompany`])
/// so callers see one taxonomy. Only genuine backend failures stay as
/// [`EngineError::Store`] and surface as a generic internal error.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Concurrency(msg) => EngineError::Domain(DomainError::Conflict(msg)),
            StoreError::TenantIsolation(msg) => EngineError::Domain(DomainError::CrossCompany(msg)),
            other @ StoreError::Backend(_) => EngineError::Store(other),
        }
    }
}

impl EngineError {
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Domain(e) => e.code(),
            EngineError::Store(_) => "internal_error",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            EngineError::Domain(e) => e.http_status(),
            EngineError::Store(_) => 500,
        }
    }

    pub fn body(&self) -> ErrorBody {
        match self {
            EngineError::Domain(e) => e.body(),
            // Backend detail stays in the logs.
            EngineError::Store(_) => ErrorBody {
                error: self.code(),
                message: "internal error".to_string(),
                status: self.http_status(),
            },
        }
    }

    pub fn as_domain(&self) -> Option<&DomainError> {
        match self {
            EngineError::Domain(e) => Some(e),
            EngineError::Store(_) => None,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_fold_into_domain_taxonomy() {
        let err: EngineError = StoreError::Concurrency("stock item".into()).into();
        assert_eq!(err.code(), "conflict");
        assert_eq!(err.http_status(), 409);

        let err: EngineError = StoreError::TenantIsolation("invoice".into()).into();
        assert_eq!(err.code(), "cross_company");
    }

    #[test]
    fn backend_failures_hide_detail() {
        let err: EngineError = StoreError::Backend("connection refused to 10.0.0.1".into()).into();
        let body = err.body();
        assert_eq!(body.error, "internal_error");
        assert_eq!(body.status, 500);
        assert!(!body.message.contains("10.0.0.1"));
    }
}
