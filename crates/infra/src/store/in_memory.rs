use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;
use std::sync::RwLock;

use async_trait::async_trait;

use novaerp_core::{AggregateRoot, CompanyId, CustomerId, ProductId};
use novaerp_inventory::{DocType, DocumentId, InventoryDocument, StockItem, StockKey};
use novaerp_sales::{
    DeliveryId, InvoiceId, InvoiceStatus, ReceiptId, ReturnId, SalesDelivery, SalesInvoice,
    SalesReceipt, SalesReturn,
};

use super::r#trait::{
    CatalogRef, ChangeSet, CommitOutcome, ErpStore, StoreError, format_doc_number,
};

/// Row stored under a company, with a version the store bumps on write.
trait TenantRow: AggregateRoot + Clone {
    fn company_id(&self) -> CompanyId;
    fn set_version(&mut self, version: u64);
}

macro_rules! tenant_row {
    ($($t:ty),* $(,)?) => {
        $(
            impl TenantRow for $t {
                fn company_id(&self) -> CompanyId {
                    self.company_id
                }

                fn set_version(&mut self, version: u64) {
                    self.version = version;
                }
            }
        )*
    };
}

tenant_row!(
    StockItem,
    InventoryDocument,
    SalesInvoice,
    SalesDelivery,
    SalesReturn,
    SalesReceipt,
);

type Table<T> = HashMap<<T as AggregateRoot>::Id, T>;

#[derive(Debug, Default)]
struct State {
    catalog: HashMap<CatalogRef, CompanyId>,
    stock_items: Table<StockItem>,
    documents: Table<InventoryDocument>,
    invoices: Table<SalesInvoice>,
    deliveries: Table<SalesDelivery>,
    returns: Table<SalesReturn>,
    receipts: Table<SalesReceipt>,
    sequences: HashMap<(CompanyId, DocType), u64>,
}

/// Fetch a row for `company_id`, refusing rows of other companies.
fn scoped<T>(table: &Table<T>, company_id: CompanyId, id: &T::Id, what: &str) -> Result<Option<T>, StoreError>
where
    T: TenantRow,
    T::Id: Display,
{
    match table.get(id) {
        Some(row) if row.company_id() != company_id => Err(StoreError::TenantIsolation(format!(
            "{what} {id} does not belong to company {company_id}"
        ))),
        Some(row) => Ok(Some(row.clone())),
        None => Ok(None),
    }
}

fn check_versions<T>(table: &Table<T>, rows: &[T], what: &str) -> Result<(), StoreError>
where
    T: TenantRow,
    T::Id: Display,
{
    for row in rows {
        let current = match table.get(row.id()) {
            Some(existing) if existing.company_id() != row.company_id() => {
                return Err(StoreError::TenantIsolation(format!(
                    "{what} {} belongs to another company",
                    row.id()
                )));
            }
            Some(existing) => existing.version(),
            None => 0,
        };
        row.expected_version()
            .check(current)
            .map_err(|e| StoreError::Concurrency(format!("{what} {}: {e}", row.id())))?;
    }
    Ok(())
}

fn write_rows<T>(table: &mut Table<T>, rows: Vec<T>)
where
    T: TenantRow,
    T::Id: Hash + Eq,
{
    for mut row in rows {
        row.set_version(row.version() + 1);
        table.insert(row.id().clone(), row);
    }
}

/// In-memory ERP store.
///
/// Intended for tests/dev. A single lock guards all tables, so a commit is
/// trivially atomic: every version is checked before anything is written.
#[derive(Debug, Default)]
pub struct InMemoryErpStore {
    state: RwLock<State>,
}

impl InMemoryErpStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, State>, StoreError> {
        self.state
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }

    /// Record that a catalog row (product, warehouse, unit, customer) exists
    /// and is owned by `company_id`.
    pub fn register(&self, company_id: CompanyId, reference: CatalogRef) -> Result<(), StoreError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;
        state.catalog.insert(reference, company_id);
        Ok(())
    }
}

#[async_trait]
impl ErpStore for InMemoryErpStore {
    async fn catalog_owner(&self, reference: CatalogRef) -> Result<Option<CompanyId>, StoreError> {
        Ok(self.read()?.catalog.get(&reference).copied())
    }

    async fn load_stock_items(
        &self,
        company_id: CompanyId,
        keys: &[StockKey],
    ) -> Result<Vec<StockItem>, StoreError> {
        let state = self.read()?;
        let mut items = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(item) = scoped(&state.stock_items, company_id, key, "stock item")? {
                items.push(item);
            }
        }
        Ok(items)
    }

    async fn list_stock_items(&self, company_id: CompanyId) -> Result<Vec<StockItem>, StoreError> {
        let state = self.read()?;
        Ok(state
            .stock_items
            .values()
            .filter(|i| i.company_id == company_id)
            .cloned()
            .collect())
    }

    async fn load_document(
        &self,
        company_id: CompanyId,
        id: DocumentId,
    ) -> Result<Option<InventoryDocument>, StoreError> {
        scoped(&self.read()?.documents, company_id, &id, "inventory document")
    }

    async fn list_documents_for_product(
        &self,
        company_id: CompanyId,
        product_id: ProductId,
    ) -> Result<Vec<InventoryDocument>, StoreError> {
        let state = self.read()?;
        Ok(state
            .documents
            .values()
            .filter(|d| d.company_id == company_id)
            .filter(|d| d.lines.iter().any(|l| l.product_id == product_id))
            .cloned()
            .collect())
    }

    async fn load_invoice(
        &self,
        company_id: CompanyId,
        id: InvoiceId,
    ) -> Result<Option<SalesInvoice>, StoreError> {
        scoped(&self.read()?.invoices, company_id, &id, "invoice")
    }

    async fn list_open_invoices(
        &self,
        company_id: CompanyId,
        customer_id: CustomerId,
    ) -> Result<Vec<SalesInvoice>, StoreError> {
        let state = self.read()?;
        Ok(state
            .invoices
            .values()
            .filter(|i| i.company_id == company_id && i.customer_id == customer_id)
            .filter(|i| i.status == InvoiceStatus::Posted && i.balance_due() > rust_decimal::Decimal::ZERO)
            .cloned()
            .collect())
    }

    async fn load_delivery(
        &self,
        company_id: CompanyId,
        id: DeliveryId,
    ) -> Result<Option<SalesDelivery>, StoreError> {
        scoped(&self.read()?.deliveries, company_id, &id, "delivery")
    }

    async fn load_return(
        &self,
        company_id: CompanyId,
        id: ReturnId,
    ) -> Result<Option<SalesReturn>, StoreError> {
        scoped(&self.read()?.returns, company_id, &id, "return")
    }

    async fn load_receipt(
        &self,
        company_id: CompanyId,
        id: ReceiptId,
    ) -> Result<Option<SalesReceipt>, StoreError> {
        scoped(&self.read()?.receipts, company_id, &id, "receipt")
    }

    async fn commit(&self, mut changes: ChangeSet) -> Result<CommitOutcome, StoreError> {
        changes.check_tenant()?;

        let mut state = self
            .state
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;

        check_versions(&state.stock_items, &changes.stock_items, "stock item")?;
        check_versions(&state.documents, &changes.documents, "inventory document")?;
        check_versions(&state.invoices, &changes.invoices, "invoice")?;
        check_versions(&state.deliveries, &changes.deliveries, "delivery")?;
        check_versions(&state.returns, &changes.returns, "return")?;
        check_versions(&state.receipts, &changes.receipts, "receipt")?;

        // Numbers are only consumed once the commit can no longer fail.
        let mut outcome = CommitOutcome::default();
        for doc in changes.documents.iter_mut() {
            if doc.version == 0 && doc.doc_number.is_none() {
                let seq = state.sequences.entry((doc.company_id, doc.doc_type)).or_insert(0);
                *seq += 1;
                let number = format_doc_number(doc.doc_type.number_prefix(), *seq);
                outcome.doc_numbers.insert(doc.id, number.clone());
                doc.doc_number = Some(number);
            }
        }

        write_rows(&mut state.stock_items, changes.stock_items);
        write_rows(&mut state.documents, changes.documents);
        write_rows(&mut state.invoices, changes.invoices);
        write_rows(&mut state.deliveries, changes.deliveries);
        write_rows(&mut state.returns, changes.returns);
        write_rows(&mut state.receipts, changes.receipts);

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use novaerp_core::{UserId, WarehouseId};
    use novaerp_inventory::{DocStatus, InventoryDocumentLine, LineType};
    use rust_decimal_macros::dec;

    fn document(company_id: CompanyId, doc_type: DocType) -> InventoryDocument {
        InventoryDocument {
            id: DocumentId::new(),
            company_id,
            branch_id: None,
            doc_number: None,
            doc_date: NaiveDate::from_ymd_opt(2026, 8, 1).unwrap(),
            doc_type,
            status: DocStatus::Posted,
            source_type: None,
            source_id: None,
            notes: None,
            reverses: None,
            created_by: UserId::new(),
            created_at: Utc::now(),
            posted_by: None,
            posted_at: None,
            canceled_by: None,
            canceled_at: None,
            lines: vec![InventoryDocumentLine {
                line_no: 1,
                product_id: ProductId::new(),
                warehouse_id: WarehouseId::new(),
                unit_id: novaerp_core::UnitId::new(),
                line_type: LineType::In,
                quantity: dec!(1),
                unit_cost: Some(dec!(1)),
            }],
            version: 0,
        }
    }

    fn item(company_id: CompanyId) -> StockItem {
        StockItem::empty(company_id, StockKey::new(ProductId::new(), WarehouseId::new()), Utc::now())
    }

    #[tokio::test]
    async fn commit_bumps_versions_and_numbers_documents_per_type() {
        let store = InMemoryErpStore::new();
        let company = CompanyId::new();

        let mut changes = ChangeSet::new(company);
        changes.documents = vec![document(company, DocType::In), document(company, DocType::In)];
        changes.stock_items = vec![item(company)];
        let outcome = store.commit(changes.clone()).await.unwrap();

        let mut numbers: Vec<_> = outcome.doc_numbers.values().cloned().collect();
        numbers.sort();
        assert_eq!(numbers, vec!["IN-000001", "IN-000002"]);

        let stored = store.load_stock_items(company, &[changes.stock_items[0].key]).await.unwrap();
        assert_eq!(stored[0].version, 1);

        let mut next = ChangeSet::new(company);
        next.documents = vec![document(company, DocType::Out)];
        let outcome = store.commit(next).await.unwrap();
        assert_eq!(outcome.doc_numbers.values().next().map(String::as_str), Some("OUT-000001"));
    }

    #[tokio::test]
    async fn stale_version_rejects_whole_commit() {
        let store = InMemoryErpStore::new();
        let company = CompanyId::new();
        let stock = item(company);

        let mut first = ChangeSet::new(company);
        first.stock_items = vec![stock.clone()];
        store.commit(first).await.unwrap();

        // Same row written again as if new, alongside a fresh document.
        let mut stale = ChangeSet::new(company);
        stale.stock_items = vec![stock.clone()];
        stale.documents = vec![document(company, DocType::In)];
        let err = store.commit(stale).await.unwrap_err();
        assert!(matches!(err, StoreError::Concurrency(_)));

        // No number was consumed by the failed commit.
        let mut ok = ChangeSet::new(company);
        ok.documents = vec![document(company, DocType::In)];
        let outcome = store.commit(ok).await.unwrap();
        assert_eq!(outcome.doc_numbers.values().next().map(String::as_str), Some("IN-000001"));
    }

    #[tokio::test]
    async fn foreign_rows_are_isolated() {
        let store = InMemoryErpStore::new();
        let owner = CompanyId::new();
        let intruder = CompanyId::new();
        let stock = item(owner);

        let mut changes = ChangeSet::new(owner);
        changes.stock_items = vec![stock.clone()];
        store.commit(changes).await.unwrap();

        let err = store.load_stock_items(intruder, &[stock.key]).await.unwrap_err();
        assert!(matches!(err, StoreError::TenantIsolation(_)));

        let mut mixed = ChangeSet::new(intruder);
        mixed.stock_items = vec![item(owner)];
        let err = store.commit(mixed).await.unwrap_err();
        assert!(matches!(err, StoreError::TenantIsolation(_)));
    }
}
