use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use novaerp_core::{CompanyId, CustomerId, ProductId, UnitId, WarehouseId};
use novaerp_inventory::{DocumentId, InventoryDocument, StockItem, StockKey};
use novaerp_sales::{
    DeliveryId, InvoiceId, ReceiptId, ReturnId, SalesDelivery, SalesInvoice, SalesReceipt,
    SalesReturn,
};

/// Store operation error.
///
/// These are **infrastructure errors** (storage, concurrency, isolation) as
/// opposed to domain errors (validation, invariants).
#[derive(Debug, Error)]
pub enum StoreError {
    /// A row changed since it was loaded, or a new row already exists.
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    /// A row belongs to a company other than the acting one.
    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// Reference to a catalog row owned by some company.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum CatalogRef {
    Product(ProductId),
    Warehouse(WarehouseId),
    Unit(UnitId),
    Customer(CustomerId),
}

impl CatalogRef {
    pub fn kind(&self) -> &'static str {
        match self {
            CatalogRef::Product(_) => "product",
            CatalogRef::Warehouse(_) => "warehouse",
            CatalogRef::Unit(_) => "unit",
            CatalogRef::Customer(_) => "customer",
        }
    }

    pub fn uuid(&self) -> uuid::Uuid {
        match self {
            CatalogRef::Product(id) => (*id).into(),
            CatalogRef::Warehouse(id) => (*id).into(),
            CatalogRef::Unit(id) => (*id).into(),
            CatalogRef::Customer(id) => (*id).into(),
        }
    }
}

impl core::fmt::Display for CatalogRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} {}", self.kind(), self.uuid())
    }
}

/// Everything one operation writes, committed atomically.
///
/// Each row carries the version it was loaded at; `0` inserts a new row.
/// The store rejects the whole set with [`StoreError::Concurrency`] if any
/// row's stored version differs, and bumps every written row's version by one.
/// New inventory documents without a number get the next
/// `{PREFIX}-{seq:06}` for their company and document type.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub company_id: CompanyId,
    pub stock_items: Vec<StockItem>,
    pub documents: Vec<InventoryDocument>,
    pub invoices: Vec<SalesInvoice>,
    pub deliveries: Vec<SalesDelivery>,
    pub returns: Vec<SalesReturn>,
    pub receipts: Vec<SalesReceipt>,
}

impl ChangeSet {
    pub fn new(company_id: CompanyId) -> Self {
        Self {
            company_id,
            ..Self::default()
        }
    }

    /// Every row must belong to the change set's company.
    pub fn check_tenant(&self) -> Result<(), StoreError> {
        let foreign = self
            .stock_items
            .iter()
            .map(|r| (r.company_id, "stock item"))
            .chain(self.documents.iter().map(|r| (r.company_id, "inventory document")))
            .chain(self.invoices.iter().map(|r| (r.company_id, "invoice")))
            .chain(self.deliveries.iter().map(|r| (r.company_id, "delivery")))
            .chain(self.returns.iter().map(|r| (r.company_id, "return")))
            .chain(self.receipts.iter().map(|r| (r.company_id, "receipt")))
            .find(|(company, _)| *company != self.company_id);

        match foreign {
            Some((company, what)) => Err(StoreError::TenantIsolation(format!(
                "{what} of company {company} in change set for {}",
                self.company_id
            ))),
            None => Ok(()),
        }
    }
}

/// What the store assigned during a commit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitOutcome {
    pub doc_numbers: HashMap<DocumentId, String>,
}

impl CommitOutcome {
    pub fn doc_number(&self, id: DocumentId) -> Option<&str> {
        self.doc_numbers.get(&id).map(String::as_str)
    }
}

/// Tenant-scoped persistence boundary for the posting workflows.
///
/// ## Tenant isolation
///
/// Every read takes the acting company. A row that exists but belongs to
/// another company is reported as [`StoreError::TenantIsolation`], never
/// returned. Missing rows are `None` / absent from the result.
///
/// ## Atomicity
///
/// [`commit`](ErpStore::commit) applies a whole [`ChangeSet`] or nothing.
#[async_trait]
pub trait ErpStore: Send + Sync {
    /// Owning company of a catalog row, `None` if it does not exist.
    async fn catalog_owner(&self, reference: CatalogRef) -> Result<Option<CompanyId>, StoreError>;

    /// Existing stock items for `keys`; keys never moved are simply absent.
    async fn load_stock_items(
        &self,
        company_id: CompanyId,
        keys: &[StockKey],
    ) -> Result<Vec<StockItem>, StoreError>;

    async fn list_stock_items(&self, company_id: CompanyId) -> Result<Vec<StockItem>, StoreError>;

    async fn load_document(
        &self,
        company_id: CompanyId,
        id: DocumentId,
    ) -> Result<Option<InventoryDocument>, StoreError>;

    /// Documents with at least one line for `product_id`.
    async fn list_documents_for_product(
        &self,
        company_id: CompanyId,
        product_id: ProductId,
    ) -> Result<Vec<InventoryDocument>, StoreError>;

    async fn load_invoice(
        &self,
        company_id: CompanyId,
        id: InvoiceId,
    ) -> Result<Option<SalesInvoice>, StoreError>;

    /// Posted invoices of `customer_id` with a positive balance due.
    async fn list_open_invoices(
        &self,
        company_id: CompanyId,
        customer_id: CustomerId,
    ) -> Result<Vec<SalesInvoice>, StoreError>;

    async fn load_delivery(
        &self,
        company_id: CompanyId,
        id: DeliveryId,
    ) -> Result<Option<SalesDelivery>, StoreError>;

    async fn load_return(
        &self,
        company_id: CompanyId,
        id: ReturnId,
    ) -> Result<Option<SalesReturn>, StoreError>;

    async fn load_receipt(
        &self,
        company_id: CompanyId,
        id: ReceiptId,
    ) -> Result<Option<SalesReceipt>, StoreError>;

    async fn commit(&self, changes: ChangeSet) -> Result<CommitOutcome, StoreError>;
}

#[async_trait]
impl<S> ErpStore for Arc<S>
where
    S: ErpStore + ?Sized,
{
    async fn catalog_owner(&self, reference: CatalogRef) -> Result<Option<CompanyId>, StoreError> {
        (**self).catalog_owner(reference).await
    }

    async fn load_stock_items(
        &self,
        company_id: CompanyId,
        keys: &[StockKey],
    ) -> Result<Vec<StockItem>, StoreError> {
        (**self).load_stock_items(company_id, keys).await
    }

    async fn list_stock_items(&self, company_id: CompanyId) -> Result<Vec<StockItem>, StoreError> {
        (**self).list_stock_items(company_id).await
    }

    async fn load_document(
        &self,
        company_id: CompanyId,
        id: DocumentId,
    ) -> Result<Option<InventoryDocument>, StoreError> {
        (**self).load_document(company_id, id).await
    }

    async fn list_documents_for_product(
        &self,
        company_id: CompanyId,
        product_id: ProductId,
    ) -> Result<Vec<InventoryDocument>, StoreError> {
        (**self).list_documents_for_product(company_id, product_id).await
    }

    async fn load_invoice(
        &self,
        company_id: CompanyId,
        id: InvoiceId,
    ) -> Result<Option<SalesInvoice>, StoreError> {
        (**self).load_invoice(company_id, id).await
    }

    async fn list_open_invoices(
        &self,
        company_id: CompanyId,
        customer_id: CustomerId,
    ) -> Result<Vec<SalesInvoice>, StoreError> {
        (**self).list_open_invoices(company_id, customer_id).await
    }

    async fn load_delivery(
        &self,
        company_id: CompanyId,
        id: DeliveryId,
    ) -> Result<Option<SalesDelivery>, StoreError> {
        (**self).load_delivery(company_id, id).await
    }

    async fn load_return(
        &self,
        company_id: CompanyId,
        id: ReturnId,
    ) -> Result<Option<SalesReturn>, StoreError> {
        (**self).load_return(company_id, id).await
    }

    async fn load_receipt(
        &self,
        company_id: CompanyId,
        id: ReceiptId,
    ) -> Result<Option<SalesReceipt>, StoreError> {
        (**self).load_receipt(company_id, id).await
    }

    async fn commit(&self, changes: ChangeSet) -> Result<CommitOutcome, StoreError> {
        (**self).commit(changes).await
    }
}

/// `{PREFIX}-{seq:06}`.
pub fn format_doc_number(prefix: &str, seq: u64) -> String {
    format!("{prefix}-{seq:06}")
}
