//! Tenant-scoped persistence boundary for the posting workflows.
//!
//! Engines load snapshots through [`ErpStore`], plan in pure domain code and
//! hand the result back as one [`ChangeSet`]. Both adapters apply a change set
//! atomically under optimistic concurrency.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryErpStore;
pub use postgres::PostgresErpStore;
pub use r#trait::{CatalogRef, ChangeSet, CommitOutcome, ErpStore, StoreError, format_doc_number};
