//! `novaerp-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod aggregate;
pub mod context;
pub mod error;
pub mod id;
pub mod module;

pub use aggregate::{AggregateRoot, ExpectedVersion};
pub use context::RequestContext;
pub use error::{DomainError, DomainResult, ErrorBody};
pub use id::{BranchId, CompanyId, CustomerId, ProductId, UnitId, UserId, WarehouseId};
pub use module::Module;

#[doc(hidden)]
pub use uuid::Uuid;
