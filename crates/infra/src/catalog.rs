//! Ownership checks for catalog references named in a request.

use std::collections::HashSet;

use novaerp_core::{CompanyId, DomainError};

use crate::error::EngineResult;
use crate::store::{CatalogRef, ErpStore};

/// Every reference must exist and belong to `company_id`.
///
/// A missing row is `NotFound`; a row owned by another company is
/// `CrossCompany`. Duplicates are looked up once.
pub(crate) async fn ensure_owned<S>(
    store: &S,
    company_id: CompanyId,
    references: impl IntoIterator<Item = CatalogRef>,
) -> EngineResult<()>
where
    S: ErpStore + ?Sized,
{
    let mut seen = HashSet::new();
    for reference in references {
        if !seen.insert(reference) {
            continue;
        }
        match store.catalog_owner(reference).await? {
            None => return Err(DomainError::not_found(reference.to_string()).into()),
            Some(owner) if owner != company_id => {
                return Err(DomainError::cross_company(format!(
                    "{reference} does not belong to company {company_id}"
                ))
                .into());
            }
            Some(_) => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryErpStore;
    use novaerp_core::{ProductId, WarehouseId};

    #[tokio::test]
    async fn missing_and_foreign_references_are_rejected() {
        let store = InMemoryErpStore::new();
        let company = CompanyId::new();
        let other = CompanyId::new();
        let product = CatalogRef::Product(ProductId::new());
        let foreign = CatalogRef::Warehouse(WarehouseId::new());
        store.register(company, product).unwrap();
        store.register(other, foreign).unwrap();

        ensure_owned(&store, company, [product, product]).await.unwrap();

        let err = ensure_owned(&store, company, [CatalogRef::Product(ProductId::new())])
            .await
            .unwrap_err();
        assert_eq!(err.code(), "not_found");

        let err = ensure_owned(&store, company, [product, foreign]).await.unwrap_err();
        assert_eq!(err.code(), "cross_company");
    }
}
