//! Postgres-backed ERP store.
//!
//! ## Error Mapping
//!
//! SQLx errors are mapped to `StoreError` as follows:
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database (unique violation) | `23505` | `Concurrency` | Row inserted concurrently, doc number raced |
//! | Database (check constraint violation) | `23514` | `Backend` | Row violates a schema invariant |
//! | Database (other) | Any other | `Backend` | Other database errors |
//! | PoolClosed / other | N/A | `Backend` | Connection failures, etc. |
//!
//! ## Optimistic Concurrency
//!
//! `commit()` runs in one transaction. Existing rows are written with
//! `UPDATE ... WHERE version = $n` and must affect exactly one row; new rows
//! use `INSERT ... ON CONFLICT DO NOTHING` and must affect exactly one row.
//! Anything else rolls the whole transaction back with `Concurrency`.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use tracing::{Span, instrument};
use uuid::Uuid;

use novaerp_core::{CompanyId, CustomerId, DomainError, ProductId};
use novaerp_inventory::{
    DocumentId, InventoryDocument, InventoryDocumentLine, StockItem, StockKey,
};
use novaerp_sales::{
    DeliveryId, FulfillmentLine, InvoiceId, Lifecycle, ReceiptAllocation, ReceiptId, ReturnId,
    SalesDelivery, SalesInvoice, SalesInvoiceLine, SalesReceipt, SalesReturn,
};

use super::r#trait::{
    CatalogRef, ChangeSet, CommitOutcome, ErpStore, StoreError, format_doc_number,
};

/// Schema applied by [`PostgresErpStore::migrate`].
pub const SCHEMA: &str = include_str!("schema.sql");

/// Postgres-backed ERP store.
///
/// Every query includes `company_id` in the WHERE clause or checks the row's
/// company after loading by primary key, so a foreign row is reported as a
/// tenant isolation violation rather than returned.
#[derive(Debug, Clone)]
pub struct PostgresErpStore {
    pool: Arc<PgPool>,
}

impl PostgresErpStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create all tables and indexes (idempotent).
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    async fn load_document_lines(
        &self,
        ids: &[Uuid],
    ) -> Result<HashMap<Uuid, Vec<InventoryDocumentLine>>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT document_id, line_no, product_id, warehouse_id, unit_id, line_type, quantity, unit_cost
            FROM inventory_document_lines
            WHERE document_id = ANY($1)
            ORDER BY document_id, line_no
            "#,
        )
        .bind(ids)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_document_lines", e))?;

        let mut by_doc: HashMap<Uuid, Vec<InventoryDocumentLine>> = HashMap::new();
        for row in rows {
            let doc: Uuid = get(&row, "document_id")?;
            by_doc.entry(doc).or_default().push(document_line_from_row(&row)?);
        }
        Ok(by_doc)
    }

    async fn load_invoice_lines(
        &self,
        ids: &[Uuid],
    ) -> Result<HashMap<Uuid, Vec<SalesInvoiceLine>>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, invoice_id, line_no, product_id, unit_id, quantity, delivered_quantity, returned_quantity,
                   unit_price
            FROM sales_invoice_lines
            WHERE invoice_id = ANY($1)
            ORDER BY invoice_id, line_no
            "#,
        )
        .bind(ids)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_invoice_lines", e))?;

        let mut by_invoice: HashMap<Uuid, Vec<SalesInvoiceLine>> = HashMap::new();
        for row in rows {
            let invoice: Uuid = get(&row, "invoice_id")?;
            by_invoice.entry(invoice).or_default().push(SalesInvoiceLine {
                id: get::<Uuid>(&row, "id")?.into(),
                line_no: narrow(get::<i32>(&row, "line_no")?, "line_no")?,
                product_id: get::<Uuid>(&row, "product_id")?.into(),
                unit_id: get::<Uuid>(&row, "unit_id")?.into(),
                quantity: get(&row, "quantity")?,
                delivered_quantity: get(&row, "delivered_quantity")?,
                returned_quantity: get(&row, "returned_quantity")?,
                unit_price: get(&row, "unit_price")?,
            });
        }
        Ok(by_invoice)
    }

    async fn load_fulfillment_lines(
        &self,
        table: &'static str,
        owner_column: &'static str,
        id: Uuid,
    ) -> Result<Vec<FulfillmentLine>, StoreError> {
        let sql = format!(
            "SELECT invoice_line_id, product_id, unit_id, quantity FROM {table} WHERE {owner_column} = $1 ORDER BY line_no"
        );
        let rows = sqlx::query(&sql)
            .bind(id)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_fulfillment_lines", e))?;

        rows.iter()
            .map(|row| {
                Ok(FulfillmentLine {
                    invoice_line_id: get::<Uuid>(row, "invoice_line_id")?.into(),
                    product_id: get::<Uuid>(row, "product_id")?.into(),
                    unit_id: get::<Uuid>(row, "unit_id")?.into(),
                    quantity: get(row, "quantity")?,
                })
            })
            .collect()
    }

    async fn invoices_with_lines(&self, rows: Vec<PgRow>) -> Result<Vec<SalesInvoice>, StoreError> {
        let ids = rows
            .iter()
            .map(|r| get::<Uuid>(r, "id"))
            .collect::<Result<Vec<_>, _>>()?;
        let mut lines = self.load_invoice_lines(&ids).await?;
        rows.iter()
            .map(|row| {
                let id: Uuid = get(row, "id")?;
                invoice_from_row(row, lines.remove(&id).unwrap_or_default())
            })
            .collect()
    }
}

#[async_trait]
impl ErpStore for PostgresErpStore {
    #[instrument(skip(self), fields(reference = %reference), err)]
    async fn catalog_owner(&self, reference: CatalogRef) -> Result<Option<CompanyId>, StoreError> {
        let table = match reference {
            CatalogRef::Product(_) => "products",
            CatalogRef::Warehouse(_) => "warehouses",
            CatalogRef::Unit(_) => "units",
            CatalogRef::Customer(_) => "customers",
        };
        let sql = format!("SELECT company_id FROM {table} WHERE id = $1 AND NOT is_deleted");
        let row = sqlx::query(&sql)
            .bind(reference.uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("catalog_owner", e))?;

        row.map(|r| get::<Uuid>(&r, "company_id").map(CompanyId::from))
            .transpose()
    }

    #[instrument(skip(self, keys), fields(company_id = %company_id, keys = keys.len(), loaded = tracing::field::Empty), err)]
    async fn load_stock_items(
        &self,
        company_id: CompanyId,
        keys: &[StockKey],
    ) -> Result<Vec<StockItem>, StoreError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let products: Vec<Uuid> = keys.iter().map(|k| k.product_id.into()).collect();
        let warehouses: Vec<Uuid> = keys.iter().map(|k| k.warehouse_id.into()).collect();

        let rows = sqlx::query(
            r#"
            SELECT company_id, product_id, warehouse_id, quantity_on_hand, average_unit_cost,
                   min_quantity, max_quantity, last_updated_at, version
            FROM stock_items
            WHERE product_id = ANY($1) AND warehouse_id = ANY($2) AND NOT is_deleted
            "#,
        )
        .bind(&products)
        .bind(&warehouses)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_stock_items", e))?;

        let wanted: HashSet<StockKey> = keys.iter().copied().collect();
        let mut items = Vec::with_capacity(keys.len());
        for row in rows {
            let item = stock_item_from_row(&row)?;
            if !wanted.contains(&item.key) {
                continue;
            }
            if item.company_id != company_id {
                return Err(StoreError::TenantIsolation(format!(
                    "stock item {} does not belong to company {company_id}",
                    item.key
                )));
            }
            items.push(item);
        }
        Span::current().record("loaded", items.len());
        Ok(items)
    }

    #[instrument(skip(self), fields(company_id = %company_id), err)]
    async fn list_stock_items(&self, company_id: CompanyId) -> Result<Vec<StockItem>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT company_id, product_id, warehouse_id, quantity_on_hand, average_unit_cost,
                   min_quantity, max_quantity, last_updated_at, version
            FROM stock_items
            WHERE company_id = $1 AND NOT is_deleted
            ORDER BY product_id, warehouse_id
            "#,
        )
        .bind(Uuid::from(company_id))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_stock_items", e))?;

        rows.iter().map(stock_item_from_row).collect()
    }

    #[instrument(skip(self), fields(company_id = %company_id, document_id = %id), err)]
    async fn load_document(
        &self,
        company_id: CompanyId,
        id: DocumentId,
    ) -> Result<Option<InventoryDocument>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM inventory_documents WHERE id = $1 AND NOT is_deleted"
        ))
        .bind(Uuid::from(id))
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_document", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        ensure_owner(&row, company_id, "inventory document", id)?;
        let mut lines = self.load_document_lines(&[id.into()]).await?;
        document_from_row(&row, lines.remove(&Uuid::from(id)).unwrap_or_default()).map(Some)
    }

    #[instrument(
        skip(self),
        fields(company_id = %company_id, product_id = %product_id, documents = tracing::field::Empty),
        err
    )]
    async fn list_documents_for_product(
        &self,
        company_id: CompanyId,
        product_id: ProductId,
    ) -> Result<Vec<InventoryDocument>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {DOCUMENT_COLUMNS} FROM inventory_documents d
            WHERE d.company_id = $1 AND NOT d.is_deleted
              AND EXISTS (
                SELECT 1 FROM inventory_document_lines l
                WHERE l.document_id = d.id AND l.product_id = $2
              )
            "#
        ))
        .bind(Uuid::from(company_id))
        .bind(Uuid::from(product_id))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_documents_for_product", e))?;

        let ids = rows
            .iter()
            .map(|r| get::<Uuid>(r, "id"))
            .collect::<Result<Vec<_>, _>>()?;
        let mut lines = self.load_document_lines(&ids).await?;
        let documents = rows
            .iter()
            .zip(ids)
            .map(|(row, id)| document_from_row(row, lines.remove(&id).unwrap_or_default()))
            .collect::<Result<Vec<_>, _>>()?;
        Span::current().record("documents", documents.len());
        Ok(documents)
    }

    #[instrument(skip(self), fields(company_id = %company_id, invoice_id = %id), err)]
    async fn load_invoice(
        &self,
        company_id: CompanyId,
        id: InvoiceId,
    ) -> Result<Option<SalesInvoice>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {INVOICE_COLUMNS} FROM sales_invoices WHERE id = $1 AND NOT is_deleted"
        ))
        .bind(Uuid::from(id))
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_invoice", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        ensure_owner(&row, company_id, "invoice", id)?;
        Ok(self.invoices_with_lines(vec![row]).await?.pop())
    }

    #[instrument(skip(self), fields(company_id = %company_id, customer_id = %customer_id), err)]
    async fn list_open_invoices(
        &self,
        company_id: CompanyId,
        customer_id: CustomerId,
    ) -> Result<Vec<SalesInvoice>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {INVOICE_COLUMNS} FROM sales_invoices
            WHERE company_id = $1 AND customer_id = $2 AND status = 'posted'
              AND paid_amount < grand_total AND NOT is_deleted
            ORDER BY invoice_date, invoice_number
            "#
        ))
        .bind(Uuid::from(company_id))
        .bind(Uuid::from(customer_id))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_open_invoices", e))?;

        self.invoices_with_lines(rows).await
    }

    #[instrument(skip(self), fields(company_id = %company_id, delivery_id = %id), err)]
    async fn load_delivery(
        &self,
        company_id: CompanyId,
        id: DeliveryId,
    ) -> Result<Option<SalesDelivery>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {FULFILLMENT_COLUMNS}, delivery_date, notes FROM sales_deliveries WHERE id = $1 AND NOT is_deleted"
        ))
        .bind(Uuid::from(id))
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_delivery", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        ensure_owner(&row, company_id, "delivery", id)?;
        let lines = self
            .load_fulfillment_lines("sales_delivery_lines", "delivery_id", id.into())
            .await?;
        Ok(Some(SalesDelivery {
            id,
            company_id,
            invoice_id: get::<Uuid>(&row, "invoice_id")?.into(),
            warehouse_id: get::<Uuid>(&row, "warehouse_id")?.into(),
            delivery_date: get(&row, "delivery_date")?,
            notes: get(&row, "notes")?,
            lines,
            inventory_document_id: get(&row, "inventory_document_id")?,
            lifecycle: lifecycle_from_row(&row)?,
            version: narrow(get::<i64>(&row, "version")?, "version")?,
        }))
    }

    #[instrument(skip(self), fields(company_id = %company_id, return_id = %id), err)]
    async fn load_return(
        &self,
        company_id: CompanyId,
        id: ReturnId,
    ) -> Result<Option<SalesReturn>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {FULFILLMENT_COLUMNS}, return_date, reason FROM sales_returns WHERE id = $1 AND NOT is_deleted"
        ))
        .bind(Uuid::from(id))
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_return", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        ensure_owner(&row, company_id, "return", id)?;
        let lines = self
            .load_fulfillment_lines("sales_return_lines", "return_id", id.into())
            .await?;
        Ok(Some(SalesReturn {
            id,
            company_id,
            invoice_id: get::<Uuid>(&row, "invoice_id")?.into(),
            warehouse_id: get::<Uuid>(&row, "warehouse_id")?.into(),
            return_date: get(&row, "return_date")?,
            reason: get(&row, "reason")?,
            lines,
            inventory_document_id: get(&row, "inventory_document_id")?,
            lifecycle: lifecycle_from_row(&row)?,
            version: narrow(get::<i64>(&row, "version")?, "version")?,
        }))
    }

    #[instrument(skip(self), fields(company_id = %company_id, receipt_id = %id), err)]
    async fn load_receipt(
        &self,
        company_id: CompanyId,
        id: ReceiptId,
    ) -> Result<Option<SalesReceipt>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, company_id, customer_id, receipt_number, receipt_date, amount, status, notes,
                   created_by, created_at, posted_by, posted_at, canceled_by, canceled_at, version
            FROM sales_receipts
            WHERE id = $1 AND NOT is_deleted
            "#,
        )
        .bind(Uuid::from(id))
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_receipt", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        ensure_owner(&row, company_id, "receipt", id)?;

        let allocation_rows = sqlx::query(
            "SELECT invoice_id, allocated_amount FROM sales_receipt_allocations WHERE receipt_id = $1 ORDER BY line_no",
        )
        .bind(Uuid::from(id))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_receipt_allocations", e))?;
        let allocations = allocation_rows
            .iter()
            .map(|r| {
                Ok(ReceiptAllocation {
                    invoice_id: get::<Uuid>(r, "invoice_id")?.into(),
                    allocated_amount: get(r, "allocated_amount")?,
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        Ok(Some(SalesReceipt {
            id,
            company_id,
            customer_id: get::<Uuid>(&row, "customer_id")?.into(),
            receipt_number: get(&row, "receipt_number")?,
            receipt_date: get(&row, "receipt_date")?,
            amount: get(&row, "amount")?,
            status: parse(&get::<String>(&row, "status")?)?,
            notes: get(&row, "notes")?,
            allocations,
            created_by: get::<Uuid>(&row, "created_by")?.into(),
            created_at: get(&row, "created_at")?,
            posted_by: get::<Option<Uuid>>(&row, "posted_by")?.map(Into::into),
            posted_at: get(&row, "posted_at")?,
            canceled_by: get::<Option<Uuid>>(&row, "canceled_by")?.map(Into::into),
            canceled_at: get(&row, "canceled_at")?,
            version: narrow(get::<i64>(&row, "version")?, "version")?,
        }))
    }

    #[instrument(
        skip(self, changes),
        fields(
            company_id = %changes.company_id,
            stock_items = changes.stock_items.len(),
            documents = changes.documents.len()
        ),
        err
    )]
    async fn commit(&self, changes: ChangeSet) -> Result<CommitOutcome, StoreError> {
        changes.check_tenant()?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        match write_changes(&mut tx, changes).await {
            Ok(outcome) => {
                tx.commit()
                    .await
                    .map_err(|e| map_sqlx_error("commit_transaction", e))?;
                Ok(outcome)
            }
            Err(err) => {
                tx.rollback()
                    .await
                    .map_err(|e| map_sqlx_error("rollback", e))?;
                Err(err)
            }
        }
    }
}

const DOCUMENT_COLUMNS: &str = "id, company_id, branch_id, doc_number, doc_date, doc_type, status, \
     source_type, source_id, notes, reverses, created_by, created_at, posted_by, posted_at, \
     canceled_by, canceled_at, version";

const INVOICE_COLUMNS: &str = "id, company_id, customer_id, invoice_number, invoice_date, status, \
     grand_total, paid_amount, payment_status, version";

const FULFILLMENT_COLUMNS: &str = "id, company_id, invoice_id, warehouse_id, inventory_document_id, \
     status, created_by, created_at, posted_by, posted_at, canceled_by, canceled_at, version";

async fn write_changes(
    tx: &mut Transaction<'_, Postgres>,
    changes: ChangeSet,
) -> Result<CommitOutcome, StoreError> {
    let company = Uuid::from(changes.company_id);
    let mut outcome = CommitOutcome::default();

    for item in &changes.stock_items {
        write_stock_item(tx, item).await?;
    }

    for mut doc in changes.documents {
        if doc.version == 0 {
            if doc.doc_number.is_none() {
                let seq = next_sequence(tx, company, doc.doc_type.as_str()).await?;
                let number = format_doc_number(doc.doc_type.number_prefix(), seq);
                outcome.doc_numbers.insert(doc.id, number.clone());
                doc.doc_number = Some(number);
            }
            insert_document(tx, &doc).await?;
        } else {
            update_document(tx, &doc).await?;
        }
    }

    for invoice in &changes.invoices {
        write_invoice(tx, invoice).await?;
    }
    for delivery in &changes.deliveries {
        write_fulfillment(tx, FulfillmentRow::delivery(delivery)).await?;
    }
    for ret in &changes.returns {
        write_fulfillment(tx, FulfillmentRow::sales_return(ret)).await?;
    }
    for receipt in &changes.receipts {
        write_receipt(tx, receipt).await?;
    }

    Ok(outcome)
}

fn expect_one(affected: u64, what: &str, id: impl std::fmt::Display) -> Result<(), StoreError> {
    if affected == 1 {
        Ok(())
    } else {
        Err(StoreError::Concurrency(format!(
            "{what} {id} was modified concurrently"
        )))
    }
}

async fn next_sequence(
    tx: &mut Transaction<'_, Postgres>,
    company: Uuid,
    doc_type: &str,
) -> Result<u64, StoreError> {
    let row = sqlx::query(
        r#"
        INSERT INTO document_sequences (company_id, doc_type, last_value)
        VALUES ($1, $2, 1)
        ON CONFLICT (company_id, doc_type)
        DO UPDATE SET last_value = document_sequences.last_value + 1
        RETURNING last_value
        "#,
    )
    .bind(company)
    .bind(doc_type)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("next_sequence", e))?;
    narrow(get::<i64>(&row, "last_value")?, "document sequence")
}

async fn write_stock_item(tx: &mut Transaction<'_, Postgres>, item: &StockItem) -> Result<(), StoreError> {
    let result = if item.version == 0 {
        sqlx::query(
            r#"
            INSERT INTO stock_items (
                company_id, product_id, warehouse_id, quantity_on_hand, average_unit_cost,
                min_quantity, max_quantity, last_updated_at, version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 1)
            ON CONFLICT (product_id, warehouse_id) DO NOTHING
            "#,
        )
        .bind(Uuid::from(item.company_id))
        .bind(Uuid::from(item.product_id()))
        .bind(Uuid::from(item.warehouse_id()))
        .bind(item.quantity_on_hand)
        .bind(item.average_unit_cost)
        .bind(item.min_quantity)
        .bind(item.max_quantity)
        .bind(item.last_updated_at)
        .execute(&mut **tx)
        .await
    } else {
        sqlx::query(
            r#"
            UPDATE stock_items
            SET quantity_on_hand = $4, average_unit_cost = $5, min_quantity = $6,
                max_quantity = $7, last_updated_at = $8, version = version + 1
            WHERE company_id = $1 AND product_id = $2 AND warehouse_id = $3 AND version = $9
            "#,
        )
        .bind(Uuid::from(item.company_id))
        .bind(Uuid::from(item.product_id()))
        .bind(Uuid::from(item.warehouse_id()))
        .bind(item.quantity_on_hand)
        .bind(item.average_unit_cost)
        .bind(item.min_quantity)
        .bind(item.max_quantity)
        .bind(item.last_updated_at)
        .bind(narrow::<_, i64>(item.version, "version")?)
        .execute(&mut **tx)
        .await
    }
    .map_err(|e| map_sqlx_error("write_stock_item", e))?;

    expect_one(result.rows_affected(), "stock item", item.key)
}

async fn insert_document(
    tx: &mut Transaction<'_, Postgres>,
    doc: &InventoryDocument,
) -> Result<(), StoreError> {
    let result = sqlx::query(
        r#"
        INSERT INTO inventory_documents (
            id, company_id, branch_id, doc_number, doc_date, doc_type, status, source_type,
            source_id, notes, reverses, created_by, created_at, posted_by, posted_at,
            canceled_by, canceled_at, version
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, 1)
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(Uuid::from(doc.id))
    .bind(Uuid::from(doc.company_id))
    .bind(doc.branch_id.map(Uuid::from))
    .bind(&doc.doc_number)
    .bind(doc.doc_date)
    .bind(doc.doc_type.as_str())
    .bind(doc.status.as_str())
    .bind(&doc.source_type)
    .bind(doc.source_id)
    .bind(&doc.notes)
    .bind(doc.reverses.map(Uuid::from))
    .bind(Uuid::from(doc.created_by))
    .bind(doc.created_at)
    .bind(doc.posted_by.map(Uuid::from))
    .bind(doc.posted_at)
    .bind(doc.canceled_by.map(Uuid::from))
    .bind(doc.canceled_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("insert_document", e))?;
    expect_one(result.rows_affected(), "inventory document", doc.id)?;

    for line in &doc.lines {
        sqlx::query(
            r#"
            INSERT INTO inventory_document_lines (
                document_id, line_no, product_id, warehouse_id, unit_id, line_type, quantity, unit_cost
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(Uuid::from(doc.id))
        .bind(narrow::<_, i32>(line.line_no, "line_no")?)
        .bind(Uuid::from(line.product_id))
        .bind(Uuid::from(line.warehouse_id))
        .bind(Uuid::from(line.unit_id))
        .bind(line.line_type.as_str())
        .bind(line.quantity)
        .bind(line.unit_cost)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("insert_document_line", e))?;
    }
    Ok(())
}

/// Lines are immutable; only status and stamps change after insert.
async fn update_document(
    tx: &mut Transaction<'_, Postgres>,
    doc: &InventoryDocument,
) -> Result<(), StoreError> {
    let result = sqlx::query(
        r#"
        UPDATE inventory_documents
        SET status = $3, posted_by = $4, posted_at = $5, canceled_by = $6, canceled_at = $7,
            version = version + 1
        WHERE id = $1 AND company_id = $2 AND version = $8
        "#,
    )
    .bind(Uuid::from(doc.id))
    .bind(Uuid::from(doc.company_id))
    .bind(doc.status.as_str())
    .bind(doc.posted_by.map(Uuid::from))
    .bind(doc.posted_at)
    .bind(doc.canceled_by.map(Uuid::from))
    .bind(doc.canceled_at)
    .bind(narrow::<_, i64>(doc.version, "version")?)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("update_document", e))?;
    expect_one(result.rows_affected(), "inventory document", doc.id)
}

async fn write_invoice(
    tx: &mut Transaction<'_, Postgres>,
    invoice: &SalesInvoice,
) -> Result<(), StoreError> {
    if invoice.version == 0 {
        let result = sqlx::query(
            r#"
            INSERT INTO sales_invoices (
                id, company_id, customer_id, invoice_number, invoice_date, status,
                grand_total, paid_amount, payment_status, version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 1)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(Uuid::from(invoice.id))
        .bind(Uuid::from(invoice.company_id))
        .bind(Uuid::from(invoice.customer_id))
        .bind(&invoice.invoice_number)
        .bind(invoice.invoice_date)
        .bind(invoice.status.as_str())
        .bind(invoice.grand_total)
        .bind(invoice.paid_amount)
        .bind(invoice.payment_status.as_str())
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("insert_invoice", e))?;
        expect_one(result.rows_affected(), "invoice", invoice.id)?;

        for line in &invoice.lines {
            sqlx::query(
                r#"
                INSERT INTO sales_invoice_lines (
                    id, invoice_id, line_no, product_id, unit_id, quantity, delivered_quantity,
                    returned_quantity, unit_price
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(Uuid::from(line.id))
            .bind(Uuid::from(invoice.id))
            .bind(narrow::<_, i32>(line.line_no, "line_no")?)
            .bind(Uuid::from(line.product_id))
            .bind(Uuid::from(line.unit_id))
            .bind(line.quantity)
            .bind(line.delivered_quantity)
            .bind(line.returned_quantity)
            .bind(line.unit_price)
            .execute(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("insert_invoice_line", e))?;
        }
        return Ok(());
    }

    let result = sqlx::query(
        r#"
        UPDATE sales_invoices
        SET status = $3, paid_amount = $4, payment_status = $5, version = version + 1
        WHERE id = $1 AND company_id = $2 AND version = $6
        "#,
    )
    .bind(Uuid::from(invoice.id))
    .bind(Uuid::from(invoice.company_id))
    .bind(invoice.status.as_str())
    .bind(invoice.paid_amount)
    .bind(invoice.payment_status.as_str())
    .bind(narrow::<_, i64>(invoice.version, "version")?)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("update_invoice", e))?;
    expect_one(result.rows_affected(), "invoice", invoice.id)?;

    for line in &invoice.lines {
        sqlx::query(
            "UPDATE sales_invoice_lines SET delivered_quantity = $2, returned_quantity = $3 WHERE id = $1",
        )
        .bind(Uuid::from(line.id))
        .bind(line.delivered_quantity)
        .bind(line.returned_quantity)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("update_invoice_line", e))?;
    }
    Ok(())
}

/// Deliveries and returns share their persisted shape.
struct FulfillmentRow<'a> {
    table: &'static str,
    lines_table: &'static str,
    owner_column: &'static str,
    date_column: &'static str,
    text_column: &'static str,
    id: Uuid,
    company_id: CompanyId,
    invoice_id: InvoiceId,
    warehouse_id: Uuid,
    date: chrono::NaiveDate,
    text: &'a Option<String>,
    inventory_document_id: Option<Uuid>,
    lines: &'a [FulfillmentLine],
    lifecycle: &'a Lifecycle,
    version: u64,
}

impl<'a> FulfillmentRow<'a> {
    fn delivery(d: &'a SalesDelivery) -> Self {
        Self {
            table: "sales_deliveries",
            lines_table: "sales_delivery_lines",
            owner_column: "delivery_id",
            date_column: "delivery_date",
            text_column: "notes",
            id: d.id.into(),
            company_id: d.company_id,
            invoice_id: d.invoice_id,
            warehouse_id: d.warehouse_id.into(),
            date: d.delivery_date,
            text: &d.notes,
            inventory_document_id: d.inventory_document_id,
            lines: &d.lines,
            lifecycle: &d.lifecycle,
            version: d.version,
        }
    }

    fn sales_return(r: &'a SalesReturn) -> Self {
        Self {
            table: "sales_returns",
            lines_table: "sales_return_lines",
            owner_column: "return_id",
            date_column: "return_date",
            text_column: "reason",
            id: r.id.into(),
            company_id: r.company_id,
            invoice_id: r.invoice_id,
            warehouse_id: r.warehouse_id.into(),
            date: r.return_date,
            text: &r.reason,
            inventory_document_id: r.inventory_document_id,
            lines: &r.lines,
            lifecycle: &r.lifecycle,
            version: r.version,
        }
    }
}

async fn write_fulfillment(
    tx: &mut Transaction<'_, Postgres>,
    row: FulfillmentRow<'_>,
) -> Result<(), StoreError> {
    let lc = row.lifecycle;
    if row.version == 0 {
        let sql = format!(
            r#"
            INSERT INTO {} (
                id, company_id, invoice_id, warehouse_id, {}, {}, inventory_document_id, status,
                created_by, created_at, posted_by, posted_at, canceled_by, canceled_at, version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, 1)
            ON CONFLICT (id) DO NOTHING
            "#,
            row.table, row.date_column, row.text_column
        );
        let result = sqlx::query(&sql)
            .bind(row.id)
            .bind(Uuid::from(row.company_id))
            .bind(Uuid::from(row.invoice_id))
            .bind(row.warehouse_id)
            .bind(row.date)
            .bind(row.text)
            .bind(row.inventory_document_id)
            .bind(lc.status.as_str())
            .bind(Uuid::from(lc.created_by))
            .bind(lc.created_at)
            .bind(lc.posted_by.map(Uuid::from))
            .bind(lc.posted_at)
            .bind(lc.canceled_by.map(Uuid::from))
            .bind(lc.canceled_at)
            .execute(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("insert_fulfillment", e))?;
        expect_one(result.rows_affected(), row.table, row.id)?;

        let line_sql = format!(
            "INSERT INTO {} ({}, line_no, invoice_line_id, product_id, unit_id, quantity) VALUES ($1, $2, $3, $4, $5, $6)",
            row.lines_table, row.owner_column
        );
        for (idx, line) in row.lines.iter().enumerate() {
            sqlx::query(&line_sql)
                .bind(row.id)
                .bind(narrow::<_, i32>(idx + 1, "line_no")?)
                .bind(Uuid::from(line.invoice_line_id))
                .bind(Uuid::from(line.product_id))
                .bind(Uuid::from(line.unit_id))
                .bind(line.quantity)
                .execute(&mut **tx)
                .await
                .map_err(|e| map_sqlx_error("insert_fulfillment_line", e))?;
        }
        return Ok(());
    }

    let sql = format!(
        r#"
        UPDATE {}
        SET status = $3, inventory_document_id = $4, posted_by = $5, posted_at = $6,
            canceled_by = $7, canceled_at = $8, version = version + 1
        WHERE id = $1 AND company_id = $2 AND version = $9
        "#,
        row.table
    );
    let result = sqlx::query(&sql)
        .bind(row.id)
        .bind(Uuid::from(row.company_id))
        .bind(lc.status.as_str())
        .bind(row.inventory_document_id)
        .bind(lc.posted_by.map(Uuid::from))
        .bind(lc.posted_at)
        .bind(lc.canceled_by.map(Uuid::from))
        .bind(lc.canceled_at)
        .bind(narrow::<_, i64>(row.version, "version")?)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("update_fulfillment", e))?;
    expect_one(result.rows_affected(), row.table, row.id)
}

async fn write_receipt(
    tx: &mut Transaction<'_, Postgres>,
    receipt: &SalesReceipt,
) -> Result<(), StoreError> {
    if receipt.version == 0 {
        let result = sqlx::query(
            r#"
            INSERT INTO sales_receipts (
                id, company_id, customer_id, receipt_number, receipt_date, amount, status, notes,
                created_by, created_at, posted_by, posted_at, canceled_by, canceled_at, version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, 1)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(Uuid::from(receipt.id))
        .bind(Uuid::from(receipt.company_id))
        .bind(Uuid::from(receipt.customer_id))
        .bind(&receipt.receipt_number)
        .bind(receipt.receipt_date)
        .bind(receipt.amount)
        .bind(receipt.status.as_str())
        .bind(&receipt.notes)
        .bind(Uuid::from(receipt.created_by))
        .bind(receipt.created_at)
        .bind(receipt.posted_by.map(Uuid::from))
        .bind(receipt.posted_at)
        .bind(receipt.canceled_by.map(Uuid::from))
        .bind(receipt.canceled_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("insert_receipt", e))?;
        expect_one(result.rows_affected(), "receipt", receipt.id)?;

        for (idx, allocation) in receipt.allocations.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO sales_receipt_allocations (receipt_id, line_no, invoice_id, allocated_amount)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(Uuid::from(receipt.id))
            .bind(narrow::<_, i32>(idx + 1, "line_no")?)
            .bind(Uuid::from(allocation.invoice_id))
            .bind(allocation.allocated_amount)
            .execute(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("insert_receipt_allocation", e))?;
        }
        return Ok(());
    }

    let result = sqlx::query(
        r#"
        UPDATE sales_receipts
        SET status = $3, posted_by = $4, posted_at = $5, canceled_by = $6, canceled_at = $7,
            version = version + 1
        WHERE id = $1 AND company_id = $2 AND version = $8
        "#,
    )
    .bind(Uuid::from(receipt.id))
    .bind(Uuid::from(receipt.company_id))
    .bind(receipt.status.as_str())
    .bind(receipt.posted_by.map(Uuid::from))
    .bind(receipt.posted_at)
    .bind(receipt.canceled_by.map(Uuid::from))
    .bind(receipt.canceled_at)
    .bind(narrow::<_, i64>(receipt.version, "version")?)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("update_receipt", e))?;
    expect_one(result.rows_affected(), "receipt", receipt.id)
}

fn get<'r, T>(row: &'r PgRow, column: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(column)
        .map_err(|e| StoreError::Backend(format!("failed to decode column {column}: {e}")))
}

/// Integer conversion between domain and column types that fails instead of
/// wrapping.
fn narrow<T, U>(value: T, column: &str) -> Result<U, StoreError>
where
    T: Copy + std::fmt::Display,
    U: TryFrom<T>,
{
    U::try_from(value)
        .map_err(|_| StoreError::Backend(format!("{column} value {value} is out of range")))
}

fn parse<T>(value: &str) -> Result<T, StoreError>
where
    T: FromStr<Err = DomainError>,
{
    value
        .parse()
        .map_err(|e: DomainError| StoreError::Backend(format!("corrupt row: {e}")))
}

fn ensure_owner(
    row: &PgRow,
    company_id: CompanyId,
    what: &str,
    id: impl std::fmt::Display,
) -> Result<(), StoreError> {
    let owner: Uuid = get(row, "company_id")?;
    if CompanyId::from(owner) != company_id {
        return Err(StoreError::TenantIsolation(format!(
            "{what} {id} does not belong to company {company_id}"
        )));
    }
    Ok(())
}

fn stock_item_from_row(row: &PgRow) -> Result<StockItem, StoreError> {
    Ok(StockItem {
        company_id: get::<Uuid>(row, "company_id")?.into(),
        key: StockKey::new(
            get::<Uuid>(row, "product_id")?.into(),
            get::<Uuid>(row, "warehouse_id")?.into(),
        ),
        quantity_on_hand: get(row, "quantity_on_hand")?,
        average_unit_cost: get(row, "average_unit_cost")?,
        min_quantity: get(row, "min_quantity")?,
        max_quantity: get(row, "max_quantity")?,
        last_updated_at: get(row, "last_updated_at")?,
        version: narrow(get::<i64>(row, "version")?, "version")?,
    })
}

fn document_line_from_row(row: &PgRow) -> Result<InventoryDocumentLine, StoreError> {
    Ok(InventoryDocumentLine {
        line_no: narrow(get::<i32>(row, "line_no")?, "line_no")?,
        product_id: get::<Uuid>(row, "product_id")?.into(),
        warehouse_id: get::<Uuid>(row, "warehouse_id")?.into(),
        unit_id: get::<Uuid>(row, "unit_id")?.into(),
        line_type: parse(&get::<String>(row, "line_type")?)?,
        quantity: get(row, "quantity")?,
        unit_cost: get(row, "unit_cost")?,
    })
}

fn document_from_row(
    row: &PgRow,
    lines: Vec<InventoryDocumentLine>,
) -> Result<InventoryDocument, StoreError> {
    Ok(InventoryDocument {
        id: get::<Uuid>(row, "id")?.into(),
        company_id: get::<Uuid>(row, "company_id")?.into(),
        branch_id: get::<Option<Uuid>>(row, "branch_id")?.map(Into::into),
        doc_number: get(row, "doc_number")?,
        doc_date: get(row, "doc_date")?,
        doc_type: parse(&get::<String>(row, "doc_type")?)?,
        status: parse(&get::<String>(row, "status")?)?,
        source_type: get(row, "source_type")?,
        source_id: get(row, "source_id")?,
        notes: get(row, "notes")?,
        reverses: get::<Option<Uuid>>(row, "reverses")?.map(Into::into),
        created_by: get::<Uuid>(row, "created_by")?.into(),
        created_at: get(row, "created_at")?,
        posted_by: get::<Option<Uuid>>(row, "posted_by")?.map(Into::into),
        posted_at: get(row, "posted_at")?,
        canceled_by: get::<Option<Uuid>>(row, "canceled_by")?.map(Into::into),
        canceled_at: get(row, "canceled_at")?,
        lines,
        version: narrow(get::<i64>(row, "version")?, "version")?,
    })
}

fn invoice_from_row(row: &PgRow, lines: Vec<SalesInvoiceLine>) -> Result<SalesInvoice, StoreError> {
    Ok(SalesInvoice {
        id: get::<Uuid>(row, "id")?.into(),
        company_id: get::<Uuid>(row, "company_id")?.into(),
        customer_id: get::<Uuid>(row, "customer_id")?.into(),
        invoice_number: get(row, "invoice_number")?,
        invoice_date: get(row, "invoice_date")?,
        status: parse(&get::<String>(row, "status")?)?,
        grand_total: get(row, "grand_total")?,
        paid_amount: get(row, "paid_amount")?,
        payment_status: parse(&get::<String>(row, "payment_status")?)?,
        lines,
        version: narrow(get::<i64>(row, "version")?, "version")?,
    })
}

fn lifecycle_from_row(row: &PgRow) -> Result<Lifecycle, StoreError> {
    Ok(Lifecycle {
        status: parse(&get::<String>(row, "status")?)?,
        created_by: get::<Uuid>(row, "created_by")?.into(),
        created_at: get(row, "created_at")?,
        posted_by: get::<Option<Uuid>>(row, "posted_by")?.map(Into::into),
        posted_at: get(row, "posted_at")?,
        canceled_by: get::<Option<Uuid>>(row, "canceled_by")?.map(Into::into),
        canceled_at: get(row, "canceled_at")?,
    })
}

/// Map SQLx errors to `StoreError`.
pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                // Unique violation
                Some("23505") => StoreError::Concurrency(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {}", operation))
        }
        _ => StoreError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn narrowing_out_of_range_values_is_an_error() {
        let version: i64 = narrow(7u64, "version").unwrap();
        assert_eq!(version, 7);

        let err = narrow::<_, i64>(u64::MAX, "version").unwrap_err();
        assert!(matches!(err, StoreError::Backend(msg) if msg.contains("version")));

        assert!(narrow::<_, i32>(u32::MAX, "line_no").is_err());
        assert!(narrow::<_, u64>(-1i64, "version").is_err());
        assert_eq!(narrow::<_, u32>(3i32, "line_no").unwrap(), 3);
    }
}
