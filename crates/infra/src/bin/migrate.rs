//! Apply the database schema and optionally enable modules for a company.
//!
//! ```text
//! DATABASE_URL=postgres://... novaerp-migrate [<company-uuid> <module>...]
//! ```

use anyhow::{Context, bail};

use novaerp_core::{CompanyId, Module};
use novaerp_infra::AppConfig;
use novaerp_infra::store::PostgresErpStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    novaerp_observability::init();

    let config = AppConfig::from_env();
    let Some(url) = config.database_url.as_deref() else {
        bail!("DATABASE_URL must be set");
    };

    let store = PostgresErpStore::connect(url, config.database_max_connections)
        .await
        .context("failed to connect to Postgres")?;
    store.migrate().await.context("failed to apply schema")?;
    tracing::info!("schema applied");

    let mut args = std::env::args().skip(1);
    if let Some(company) = args.next() {
        let company_id: CompanyId = company
            .parse()
            .with_context(|| format!("invalid company id '{company}'"))?;
        for name in args {
            let module: Module = name
                .parse()
                .with_context(|| format!("invalid module '{name}'"))?;
            store
                .set_module_enabled(company_id, module, true)
                .await
                .with_context(|| format!("failed to enable {module}"))?;
            tracing::info!(company_id = %company_id, module = %module, "module enabled");
        }
    }

    Ok(())
}
