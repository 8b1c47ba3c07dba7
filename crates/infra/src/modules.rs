//! Per-company module enablement.
//!
//! Every engine operation starts by asking the guard whether the acting
//! company has the module turned on; a disabled module fails with
//! [`DomainError::ModuleDisabled`] before anything is loaded.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::instrument;
use uuid::Uuid;

use novaerp_core::{CompanyId, DomainError, Module};

use crate::error::EngineError;
use crate::store::postgres::map_sqlx_error;
use crate::store::{PostgresErpStore, StoreError};

#[async_trait]
pub trait ModuleGuard: Send + Sync {
    async fn is_enabled(&self, company_id: CompanyId, module: Module) -> Result<bool, StoreError>;

    async fn ensure_enabled(&self, company_id: CompanyId, module: Module) -> Result<(), EngineError> {
        if self.is_enabled(company_id, module).await? {
            Ok(())
        } else {
            tracing::warn!(company_id = %company_id, module = %module, "module disabled");
            Err(DomainError::ModuleDisabled(module).into())
        }
    }

    async fn ensure_inventory_enabled(&self, company_id: CompanyId) -> Result<(), EngineError> {
        self.ensure_enabled(company_id, Module::Inventory).await
    }

    async fn ensure_sales_enabled(&self, company_id: CompanyId) -> Result<(), EngineError> {
        self.ensure_enabled(company_id, Module::Sales).await
    }
}

#[async_trait]
impl<M> ModuleGuard for Arc<M>
where
    M: ModuleGuard + ?Sized,
{
    async fn is_enabled(&self, company_id: CompanyId, module: Module) -> Result<bool, StoreError> {
        (**self).is_enabled(company_id, module).await
    }
}

/// In-memory module registry (tests/dev). Nothing is enabled until
/// [`enable`](Self::enable) is called.
#[derive(Debug, Default)]
pub struct InMemoryModuleRegistry {
    enabled: RwLock<HashSet<(CompanyId, Module)>>,
}

impl InMemoryModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enable(&self, company_id: CompanyId, module: Module) -> Result<(), StoreError> {
        self.enabled
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?
            .insert((company_id, module));
        Ok(())
    }

    pub fn disable(&self, company_id: CompanyId, module: Module) -> Result<(), StoreError> {
        self.enabled
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?
            .remove(&(company_id, module));
        Ok(())
    }
}

#[async_trait]
impl ModuleGuard for InMemoryModuleRegistry {
    async fn is_enabled(&self, company_id: CompanyId, module: Module) -> Result<bool, StoreError> {
        let enabled = self
            .enabled
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;
        Ok(enabled.contains(&(company_id, module)))
    }
}

impl PostgresErpStore {
    /// Turn a module on or off for a company.
    #[instrument(skip(self), fields(company_id = %company_id, module = %module), err)]
    pub async fn set_module_enabled(
        &self,
        company_id: CompanyId,
        module: Module,
        enabled: bool,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO company_modules (company_id, module, enabled, updated_at)
            VALUES ($1, $2, $3, now())
            ON CONFLICT (company_id, module)
            DO UPDATE SET enabled = EXCLUDED.enabled, updated_at = now()
            "#,
        )
        .bind(Uuid::from(company_id))
        .bind(module.as_str())
        .bind(enabled)
        .execute(self.pool())
        .await
        .map_err(|e| map_sqlx_error("set_module_enabled", e))?;
        Ok(())
    }
}

#[async_trait]
impl ModuleGuard for PostgresErpStore {
    #[instrument(skip(self), fields(company_id = %company_id, module = %module), err)]
    async fn is_enabled(&self, company_id: CompanyId, module: Module) -> Result<bool, StoreError> {
        let enabled: Option<bool> =
            sqlx::query_scalar("SELECT enabled FROM company_modules WHERE company_id = $1 AND module = $2")
                .bind(Uuid::from(company_id))
                .bind(module.as_str())
                .fetch_optional(self.pool())
                .await
                .map_err(|e| map_sqlx_error("module_enabled", e))?;
        Ok(enabled.unwrap_or(false))
    }
}
