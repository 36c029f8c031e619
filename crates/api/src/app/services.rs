//! Infrastructure wiring: pick the store and audit sink from configuration.

use std::sync::Arc;

use tracing::{info, warn};

use classbook_infra::audit::PostgresAuditLog;
use classbook_infra::config::AppConfig;
use classbook_infra::db;
use classbook_infra::services::Services;
use classbook_infra::store::{PostgresBillingStore, StoreError};

/// Postgres-backed services when a database is configured, in-memory otherwise.
pub async fn build_services(config: &AppConfig) -> Result<Services, StoreError> {
    match &config.database {
        Some(db_config) => {
            let pool = db::connect_and_migrate(db_config).await?;
            info!("using postgres billing store");
            Ok(Services::new(
                Arc::new(PostgresBillingStore::new(pool.clone())),
                Arc::new(PostgresAuditLog::new(pool)),
            ))
        }
        None => {
            warn!("DATABASE_URL not set, falling back to in-memory stores (data is lost on restart)");
            Ok(Services::in_memory())
        }
    }
}
