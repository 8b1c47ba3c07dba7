use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use novaerp_core::{
    AggregateRoot, BranchId, CompanyId, DomainError, DomainResult, ProductId, UnitId, UserId,
    WarehouseId, uuid_newtype,
};

use crate::stock::StockKey;

uuid_newtype!(
    /// Inventory document identifier.
    DocumentId,
    "DocumentId"
);

/// Kind of stock movement a document records.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocType {
    In,
    Out,
    Transfer,
    Adjustment,
    Opening,
}

impl DocType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocType::In => "in",
            DocType::Out => "out",
            DocType::Transfer => "transfer",
            DocType::Adjustment => "adjustment",
            DocType::Opening => "opening",
        }
    }

    /// Prefix of the human-readable document number.
    pub fn number_prefix(&self) -> &'static str {
        match self {
            DocType::In => "IN",
            DocType::Out => "OUT",
            DocType::Transfer => "TRF",
            DocType::Adjustment => "ADJ",
            DocType::Opening => "OPN",
        }
    }

    /// Document type of the compensating document that reverses this one.
    pub fn reversal(&self) -> DocType {
        match self {
            DocType::In | DocType::Opening => DocType::Out,
            DocType::Out => DocType::In,
            DocType::Transfer => DocType::Transfer,
            DocType::Adjustment => DocType::Adjustment,
        }
    }
}

impl core::str::FromStr for DocType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in" => Ok(DocType::In),
            "out" => Ok(DocType::Out),
            "transfer" => Ok(DocType::Transfer),
            "adjustment" => Ok(DocType::Adjustment),
            "opening" => Ok(DocType::Opening),
            other => Err(DomainError::validation(format!("unknown doc type '{other}'"))),
        }
    }
}

/// Document lifecycle: Draft → Posted → (Canceled, via a compensating document).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocStatus {
    Draft,
    Posted,
    Canceled,
}

impl DocStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocStatus::Draft => "draft",
            DocStatus::Posted => "posted",
            DocStatus::Canceled => "canceled",
        }
    }
}

impl core::str::FromStr for DocStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(DocStatus::Draft),
            "posted" => Ok(DocStatus::Posted),
            "canceled" => Ok(DocStatus::Canceled),
            other => Err(DomainError::validation(format!("unknown doc status '{other}'"))),
        }
    }
}

/// Direction of a single line. Quantities are magnitudes; direction lives here.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineType {
    In,
    Out,
}

impl LineType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineType::In => "in",
            LineType::Out => "out",
        }
    }

    pub fn reversed(&self) -> LineType {
        match self {
            LineType::In => LineType::Out,
            LineType::Out => LineType::In,
        }
    }

    pub fn signed(&self, quantity: Decimal) -> Decimal {
        match self {
            LineType::In => quantity,
            LineType::Out => -quantity,
        }
    }
}

impl core::str::FromStr for LineType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in" => Ok(LineType::In),
            "out" => Ok(LineType::Out),
            other => Err(DomainError::validation(format!("unknown line type '{other}'"))),
        }
    }
}

/// A posted movement line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryDocumentLine {
    /// 1-based position within the document; the line's identity.
    pub line_no: u32,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub unit_id: UnitId,
    pub line_type: LineType,
    pub quantity: Decimal,
    /// Cost absorbed (In) or relieved at the average in effect (Out).
    pub unit_cost: Option<Decimal>,
}

impl InventoryDocumentLine {
    pub fn key(&self) -> StockKey {
        StockKey::new(self.product_id, self.warehouse_id)
    }

    pub fn signed_quantity(&self) -> Decimal {
        self.line_type.signed(self.quantity)
    }
}

/// Header fields shared by every posting request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentHeader {
    pub company_id: CompanyId,
    pub branch_id: Option<BranchId>,
    pub doc_date: NaiveDate,
    pub source_type: Option<String>,
    pub source_id: Option<Uuid>,
    pub notes: Option<String>,
    pub created_by: UserId,
}

/// A line as submitted, before it is resolved against the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DraftLine {
    /// Goods coming in. `unit_cost = None` re-enters at the current average.
    Receive {
        product_id: ProductId,
        warehouse_id: WarehouseId,
        unit_id: UnitId,
        quantity: Decimal,
        unit_cost: Option<Decimal>,
    },
    /// Goods going out at the current average cost.
    Issue {
        product_id: ProductId,
        warehouse_id: WarehouseId,
        unit_id: UnitId,
        quantity: Decimal,
    },
    /// Out of one warehouse and into another; cost follows the goods.
    Transfer {
        product_id: ProductId,
        from_warehouse_id: WarehouseId,
        to_warehouse_id: WarehouseId,
        unit_id: UnitId,
        quantity: Decimal,
    },
    /// Physical count reconciling on-hand quantity to `actual_quantity`.
    Count {
        product_id: ProductId,
        warehouse_id: WarehouseId,
        unit_id: UnitId,
        actual_quantity: Decimal,
        unit_cost: Option<Decimal>,
    },
}

impl DraftLine {
    pub fn product_id(&self) -> ProductId {
        match self {
            DraftLine::Receive { product_id, .. }
            | DraftLine::Issue { product_id, .. }
            | DraftLine::Transfer { product_id, .. }
            | DraftLine::Count { product_id, .. } => *product_id,
        }
    }

    pub fn unit_id(&self) -> UnitId {
        match self {
            DraftLine::Receive { unit_id, .. }
            | DraftLine::Issue { unit_id, .. }
            | DraftLine::Transfer { unit_id, .. }
            | DraftLine::Count { unit_id, .. } => *unit_id,
        }
    }

    /// Warehouses touched by this line (one, or two for a transfer).
    pub fn warehouses(&self) -> Vec<WarehouseId> {
        match self {
            DraftLine::Receive { warehouse_id, .. }
            | DraftLine::Issue { warehouse_id, .. }
            | DraftLine::Count { warehouse_id, .. } => vec![*warehouse_id],
            DraftLine::Transfer {
                from_warehouse_id,
                to_warehouse_id,
                ..
            } => vec![*from_warehouse_id, *to_warehouse_id],
        }
    }

    pub fn keys(&self) -> Vec<StockKey> {
        let product_id = self.product_id();
        self.warehouses()
            .into_iter()
            .map(|w| StockKey::new(product_id, w))
            .collect()
    }

    fn allowed_in(&self, doc_type: DocType) -> bool {
        matches!(
            (self, doc_type),
            (DraftLine::Receive { .. }, DocType::In | DocType::Opening)
                | (DraftLine::Issue { .. }, DocType::Out)
                | (DraftLine::Transfer { .. }, DocType::Transfer)
                | (DraftLine::Count { .. }, DocType::Adjustment)
        )
    }
}

/// An unposted document: header, type and the lines in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentDraft {
    pub id: DocumentId,
    pub doc_type: DocType,
    pub header: DocumentHeader,
    pub lines: Vec<DraftLine>,
}

impl DocumentDraft {
    pub fn new(doc_type: DocType, header: DocumentHeader, lines: Vec<DraftLine>) -> Self {
        Self {
            id: DocumentId::new(),
            doc_type,
            header,
            lines,
        }
    }

    /// Structural checks that need no ledger state.
    ///
    /// Every line must fit the document type, quantities must be positive
    /// (counts non-negative), explicit costs non-negative, and a transfer must
    /// move goods between two different warehouses.
    pub fn validate(&self) -> DomainResult<()> {
        if self.lines.is_empty() {
            return Err(DomainError::validation("document must have at least one line"));
        }

        for (idx, line) in self.lines.iter().enumerate() {
            let n = idx + 1;
            if !line.allowed_in(self.doc_type) {
                return Err(DomainError::validation(format!(
                    "line {n}: not allowed in a {} document",
                    self.doc_type.as_str()
                )));
            }
            match line {
                DraftLine::Receive {
                    quantity, unit_cost, ..
                } => {
                    ensure_positive(n, *quantity)?;
                    ensure_cost(n, *unit_cost)?;
                }
                DraftLine::Issue { quantity, .. } => ensure_positive(n, *quantity)?,
                DraftLine::Transfer {
                    quantity,
                    from_warehouse_id,
                    to_warehouse_id,
                    ..
                } => {
                    ensure_positive(n, *quantity)?;
                    if from_warehouse_id == to_warehouse_id {
                        return Err(DomainError::validation(format!(
                            "line {n}: transfer source and destination must differ"
                        )));
                    }
                }
                DraftLine::Count {
                    actual_quantity,
                    unit_cost,
                    ..
                } => {
                    if actual_quantity.is_sign_negative() && !actual_quantity.is_zero() {
                        return Err(DomainError::validation(format!(
                            "line {n}: actual quantity cannot be negative"
                        )));
                    }
                    ensure_cost(n, *unit_cost)?;
                }
            }
        }
        Ok(())
    }
}

fn ensure_positive(line: usize, quantity: Decimal) -> DomainResult<()> {
    if quantity <= Decimal::ZERO {
        return Err(DomainError::validation(format!(
            "line {line}: quantity must be greater than zero"
        )));
    }
    Ok(())
}

fn ensure_cost(line: usize, unit_cost: Option<Decimal>) -> DomainResult<()> {
    match unit_cost {
        Some(cost) if cost < Decimal::ZERO => Err(DomainError::validation(format!(
            "line {line}: unit cost cannot be negative"
        ))),
        _ => Ok(()),
    }
}

/// Persisted inventory document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryDocument {
    pub id: DocumentId,
    pub company_id: CompanyId,
    pub branch_id: Option<BranchId>,
    /// Assigned by the store when the posting commits.
    pub doc_number: Option<String>,
    pub doc_date: NaiveDate,
    pub doc_type: DocType,
    pub status: DocStatus,
    pub source_type: Option<String>,
    pub source_id: Option<Uuid>,
    pub notes: Option<String>,
    /// Set on compensating documents: the document this one reverses.
    pub reverses: Option<DocumentId>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub posted_by: Option<UserId>,
    pub posted_at: Option<DateTime<Utc>>,
    pub canceled_by: Option<UserId>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub lines: Vec<InventoryDocumentLine>,
    pub version: u64,
}

impl InventoryDocument {
    /// A draft document carrying the header of `draft` and no lines yet.
    pub fn from_draft(draft: &DocumentDraft, now: DateTime<Utc>) -> Self {
        let h = &draft.header;
        Self {
            id: draft.id,
            company_id: h.company_id,
            branch_id: h.branch_id,
            doc_number: None,
            doc_date: h.doc_date,
            doc_type: draft.doc_type,
            status: DocStatus::Draft,
            source_type: h.source_type.clone(),
            source_id: h.source_id,
            notes: h.notes.clone(),
            reverses: None,
            created_by: h.created_by,
            created_at: now,
            posted_by: None,
            posted_at: None,
            canceled_by: None,
            canceled_at: None,
            lines: Vec::new(),
            version: 0,
        }
    }

    pub fn display_ref(&self) -> String {
        self.doc_number.clone().unwrap_or_else(|| self.id.to_string())
    }

    pub fn is_posted(&self) -> bool {
        self.status == DocStatus::Posted
    }

    /// Draft → Posted. Posting twice is rejected.
    pub fn post(&mut self, user: UserId, now: DateTime<Utc>) -> DomainResult<()> {
        if self.status != DocStatus::Draft {
            return Err(DomainError::posted(format!(
                "document {} is already {}",
                self.display_ref(),
                self.status.as_str()
            )));
        }
        self.status = DocStatus::Posted;
        self.posted_by = Some(user);
        self.posted_at = Some(now);
        Ok(())
    }

    /// Posted → Canceled. Only the compensating-document path calls this.
    pub fn cancel(&mut self, user: UserId, now: DateTime<Utc>) -> DomainResult<()> {
        match self.status {
            DocStatus::Posted => {
                self.status = DocStatus::Canceled;
                self.canceled_by = Some(user);
                self.canceled_at = Some(now);
                Ok(())
            }
            DocStatus::Canceled => Err(DomainError::posted(format!(
                "document {} is already canceled",
                self.display_ref()
            ))),
            DocStatus::Draft => Err(DomainError::invariant(format!(
                "document {} was never posted",
                self.display_ref()
            ))),
        }
    }
}

impl AggregateRoot for InventoryDocument {
    type Id = DocumentId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn header() -> DocumentHeader {
        DocumentHeader {
            company_id: CompanyId::new(),
            branch_id: None,
            doc_date: NaiveDate::from_ymd_opt(2026, 1, 15).unwrap(),
            source_type: None,
            source_id: None,
            notes: None,
            created_by: UserId::new(),
        }
    }

    fn receive(quantity: Decimal, unit_cost: Option<Decimal>) -> DraftLine {
        DraftLine::Receive {
            product_id: ProductId::new(),
            warehouse_id: WarehouseId::new(),
            unit_id: UnitId::new(),
            quantity,
            unit_cost,
        }
    }

    #[test]
    fn rejects_line_kind_foreign_to_doc_type() {
        let draft = DocumentDraft::new(DocType::Out, header(), vec![receive(dec!(1), Some(dec!(1)))]);
        let err = draft.validate().unwrap_err();
        assert!(matches!(err, DomainError::Validation(msg) if msg.contains("not allowed in a out")));
    }

    #[test]
    fn rejects_zero_quantity_and_negative_cost() {
        let zero = DocumentDraft::new(DocType::In, header(), vec![receive(dec!(0), Some(dec!(1)))]);
        assert!(zero.validate().is_err());

        let negative = DocumentDraft::new(DocType::In, header(), vec![receive(dec!(1), Some(dec!(-1)))]);
        assert!(negative.validate().is_err());
    }

    #[test]
    fn rejects_transfer_to_same_warehouse() {
        let w = WarehouseId::new();
        let draft = DocumentDraft::new(
            DocType::Transfer,
            header(),
            vec![DraftLine::Transfer {
                product_id: ProductId::new(),
                from_warehouse_id: w,
                to_warehouse_id: w,
                unit_id: UnitId::new(),
                quantity: dec!(3),
            }],
        );
        assert!(draft.validate().is_err());
    }

    #[test]
    fn count_to_zero_is_valid() {
        let draft = DocumentDraft::new(
            DocType::Adjustment,
            header(),
            vec![DraftLine::Count {
                product_id: ProductId::new(),
                warehouse_id: WarehouseId::new(),
                unit_id: UnitId::new(),
                actual_quantity: dec!(0),
                unit_cost: None,
            }],
        );
        assert!(draft.validate().is_ok());
    }

    #[test]
    fn posting_is_one_way() {
        let draft = DocumentDraft::new(DocType::In, header(), vec![receive(dec!(1), Some(dec!(1)))]);
        let mut doc = InventoryDocument::from_draft(&draft, Utc::now());
        doc.post(UserId::new(), Utc::now()).unwrap();
        assert_eq!(doc.status, DocStatus::Posted);

        let err = doc.post(UserId::new(), Utc::now()).unwrap_err();
        assert_eq!(err.code(), "cannot_modify_posted_document");

        doc.cancel(UserId::new(), Utc::now()).unwrap();
        let err = doc.cancel(UserId::new(), Utc::now()).unwrap_err();
        assert_eq!(err.code(), "cannot_modify_posted_document");
    }

    #[test]
    fn status_uses_lowercase_wire_names() {
        assert_eq!(serde_json::to_value(DocStatus::Canceled).unwrap(), "canceled");
        assert_eq!("transfer".parse::<DocType>().unwrap(), DocType::Transfer);
    }
}
