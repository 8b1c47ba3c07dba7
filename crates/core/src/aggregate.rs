//! Aggregate root trait and optimistic concurrency tokens.

use crate::error::{DomainError, DomainResult};

/// A versioned row owned by one company.
///
/// Every row the posting workflows read-modify-write (stock items, documents,
/// invoices, receipts) is an aggregate root carrying the version it was
/// loaded at. A version of `0` means the row has not been persisted yet.
pub trait AggregateRoot {
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> &Self::Id;

    /// Version of the persisted row this value was loaded from.
    fn version(&self) -> u64;

    /// Concurrency expectation to use when writing this value back.
    fn expected_version(&self) -> ExpectedVersion {
        ExpectedVersion(self.version())
    }
}

/// The stored version a writer expects; `0` means the row must not exist yet.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ExpectedVersion(pub u64);

impl ExpectedVersion {
    pub fn matches(self, actual: u64) -> bool {
        self.0 == actual
    }

    pub fn check(self, actual: u64) -> DomainResult<()> {
        if self.matches(actual) {
            Ok(())
        } else {
            Err(DomainError::conflict(format!(
                "stale write (expected version {}, stored version {actual})",
                self.0
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_version_mismatch_is_conflict() {
        assert!(ExpectedVersion(3).check(3).is_ok());
        let err = ExpectedVersion(3).check(4).unwrap_err();
        assert_eq!(err.code(), "conflict");
        assert!(!ExpectedVersion(0).matches(1));
    }
}
