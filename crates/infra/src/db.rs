//! Postgres pool setup and schema migrations.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use crate::config::DatabaseConfig;
use crate::store::StoreError;

/// Connect and apply pending migrations from `migrations/`.
pub async fn connect_and_migrate(cfg: &DatabaseConfig) -> Result<PgPool, StoreError> {
    let pool = PgPoolOptions::new()
        .max_connections(cfg.max_connections)
        .connect(&cfg.url)
        .await
        .map_err(|e| StoreError::Backend(format!("failed to connect to database: {e}")))?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| StoreError::Backend(format!("failed to run migrations: {e}")))?;

    info!(max_connections = cfg.max_connections, "database ready");
    Ok(pool)
}
