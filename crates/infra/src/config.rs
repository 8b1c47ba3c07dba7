//! Process configuration read from the environment.

use novaerp_inventory::PostingPolicy;

/// Runtime settings for the engines and the storage backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// Decimal places kept on `average_unit_cost` (`ERP_COST_SCALE`).
    pub cost_scale: u32,
    /// Whether adjustment Out legs may fail with insufficient stock
    /// (`ERP_ADJUSTMENT_CHECKS_STOCK`).
    pub adjustment_checks_stock: bool,
    pub use_persistent_stores: bool,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        let policy = PostingPolicy::default();
        Self {
            cost_scale: policy.cost_scale,
            adjustment_checks_stock: policy.adjustment_checks_stock,
            use_persistent_stores: false,
            database_url: None,
            database_max_connections: 5,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unparseable values fall back to
    /// the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let cost_scale = lookup("ERP_COST_SCALE")
            .and_then(|v| v.trim().parse::<u32>().ok())
            .filter(|scale| *scale <= 28)
            .unwrap_or(defaults.cost_scale);

        let adjustment_checks_stock = lookup("ERP_ADJUSTMENT_CHECKS_STOCK")
            .unwrap_or_else(|| "false".to_string())
            .parse::<bool>()
            .unwrap_or(defaults.adjustment_checks_stock);

        let use_persistent_stores = lookup("USE_PERSISTENT_STORES")
            .unwrap_or_else(|| "false".to_string())
            .parse::<bool>()
            .unwrap_or(false);

        let database_max_connections = lookup("DATABASE_MAX_CONNECTIONS")
            .and_then(|v| v.trim().parse::<u32>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(defaults.database_max_connections);

        Self {
            cost_scale,
            adjustment_checks_stock,
            use_persistent_stores,
            database_url: lookup("DATABASE_URL").filter(|v| !v.trim().is_empty()),
            database_max_connections,
        }
    }

    pub fn posting_policy(&self) -> PostingPolicy {
        PostingPolicy {
            cost_scale: self.cost_scale,
            adjustment_checks_stock: self.adjustment_checks_stock,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = AppConfig::from_lookup(lookup(&[]));
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.posting_policy(), PostingPolicy::default());
        assert_eq!(config.cost_scale, 4);
        assert!(!config.use_persistent_stores);
    }

    #[test]
    fn reads_overrides() {
        let config = AppConfig::from_lookup(lookup(&[
            ("ERP_COST_SCALE", "6"),
            ("ERP_ADJUSTMENT_CHECKS_STOCK", "true"),
            ("USE_PERSISTENT_STORES", "true"),
            ("DATABASE_URL", "postgres://erp@localhost/erp"),
            ("DATABASE_MAX_CONNECTIONS", "12"),
        ]));
        assert_eq!(config.cost_scale, 6);
        assert!(config.adjustment_checks_stock);
        assert!(config.use_persistent_stores);
        assert_eq!(config.database_url.as_deref(), Some("postgres://erp@localhost/erp"));
        assert_eq!(config.database_max_connections, 12);
    }

    #[test]
    fn garbage_falls_back() {
        let config = AppConfig::from_lookup(lookup(&[
            ("ERP_COST_SCALE", "lots"),
            ("ERP_ADJUSTMENT_CHECKS_STOCK", "yes"),
            ("DATABASE_MAX_CONNECTIONS", "0"),
            ("DATABASE_URL", "  "),
        ]));
        assert_eq!(config.cost_scale, 4);
        assert!(!config.adjustment_checks_stock);
        assert_eq!(config.database_max_connections, 5);
        assert!(config.database_url.is_none());
    }
}
