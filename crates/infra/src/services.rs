//! Backend selection and engine wiring.

use std::sync::Arc;

use novaerp_inventory::PostingPolicy;

use crate::config::AppConfig;
use crate::fulfillment::SalesFulfillmentBridge;
use crate::modules::{InMemoryModuleRegistry, ModuleGuard};
use crate::posting::InventoryPostingEngine;
use crate::receipts::ReceiptAllocationEngine;
use crate::reports::InventoryReportsEngine;
use crate::store::{ErpStore, InMemoryErpStore, PostgresErpStore, StoreError};

pub type SharedStore = Arc<dyn ErpStore>;
pub type SharedModules = Arc<dyn ModuleGuard>;

/// Storage backend chosen at startup.
#[derive(Debug, Clone)]
pub enum Backend {
    InMemory {
        store: Arc<InMemoryErpStore>,
        modules: Arc<InMemoryModuleRegistry>,
    },
    Postgres(Arc<PostgresErpStore>),
}

impl Backend {
    /// `USE_PERSISTENT_STORES=true` selects Postgres (and requires
    /// `DATABASE_URL`); anything else runs in memory.
    pub async fn from_config(config: &AppConfig) -> Result<Self, StoreError> {
        if !config.use_persistent_stores {
            return Ok(Self::in_memory());
        }
        let url = config.database_url.as_deref().ok_or_else(|| {
            StoreError::Backend("DATABASE_URL must be set when USE_PERSISTENT_STORES=true".to_string())
        })?;
        let store = PostgresErpStore::connect(url, config.database_max_connections).await?;
        tracing::info!(max_connections = config.database_max_connections, "using postgres store");
        Ok(Backend::Postgres(Arc::new(store)))
    }

    pub fn in_memory() -> Self {
        Backend::InMemory {
            store: Arc::new(InMemoryErpStore::new()),
            modules: Arc::new(InMemoryModuleRegistry::new()),
        }
    }

    pub fn services(&self, policy: PostingPolicy) -> ErpServices {
        match self {
            Backend::InMemory { store, modules } => {
                ErpServices::new(store.clone(), modules.clone(), policy)
            }
            Backend::Postgres(store) => ErpServices::new(store.clone(), store.clone(), policy),
        }
    }
}

/// The four engines over one store and module guard.
#[derive(Clone)]
pub struct ErpServices {
    pub posting: InventoryPostingEngine<SharedStore, SharedModules>,
    pub fulfillment: SalesFulfillmentBridge<SharedStore, SharedModules>,
    pub receipts: ReceiptAllocationEngine<SharedStore, SharedModules>,
    pub reports: InventoryReportsEngine<SharedStore, SharedModules>,
}

impl ErpServices {
    pub fn new(store: SharedStore, modules: SharedModules, policy: PostingPolicy) -> Self {
        let posting = InventoryPostingEngine::new(store.clone(), modules.clone(), policy);
        Self {
            fulfillment: SalesFulfillmentBridge::new(posting.clone()),
            receipts: ReceiptAllocationEngine::new(store.clone(), modules.clone()),
            reports: InventoryReportsEngine::new(store, modules),
            posting,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn defaults_to_in_memory() {
        let backend = Backend::from_config(&AppConfig::default()).await.unwrap();
        assert!(matches!(backend, Backend::InMemory { .. }));
        let services = backend.services(AppConfig::default().posting_policy());
        assert_eq!(services.posting.policy(), PostingPolicy::default());
    }

    #[tokio::test]
    async fn persistent_without_url_is_an_error() {
        let config = AppConfig {
            use_persistent_stores: true,
            ..AppConfig::default()
        };
        let err = Backend::from_config(&config).await.unwrap_err();
        assert!(matches!(err, StoreError::Backend(msg) if msg.contains("DATABASE_URL")));
    }
}
