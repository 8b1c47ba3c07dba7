use crate::error::{DomainError, DomainResult};
use crate::id::{BranchId, CompanyId, UserId};

/// Acting tenant and user for a single call.
///
/// This is immutable and threaded explicitly through every engine operation.
/// Caller-supplied company identifiers are never trusted on their own; they
/// must match the context via [`ensure_company`](Self::ensure_company).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RequestContext {
    company_id: CompanyId,
    user_id: UserId,
    branch_id: Option<BranchId>,
}

impl RequestContext {
    pub fn new(company_id: CompanyId, user_id: UserId) -> Self {
        Self {
            company_id,
            user_id,
            branch_id: None,
        }
    }

    pub fn with_branch(mut self, branch_id: BranchId) -> Self {
        self.branch_id = Some(branch_id);
        self
    }

    pub fn company_id(&self) -> CompanyId {
        self.company_id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn branch_id(&self) -> Option<BranchId> {
        self.branch_id
    }

    /// Reject a company identifier that differs from the acting company.
    pub fn ensure_company(&self, company_id: CompanyId) -> DomainResult<()> {
        if company_id != self.company_id {
            return Err(DomainError::cross_company(format!(
                "company {company_id} does not match acting company {}",
                self.company_id
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn foreign_company_is_rejected() {
        let ctx = RequestContext::new(CompanyId::new(), UserId::new());
        assert!(ctx.ensure_company(ctx.company_id()).is_ok());

        let err = ctx.ensure_company(CompanyId::new()).unwrap_err();
        assert_eq!(err.code(), "cross_company");
    }
}
