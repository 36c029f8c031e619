use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use classbook_core::AuditEntryId;

use super::{AuditEntry, AuditSink};
use crate::store::postgres::map_sqlx_error;
use crate::store::StoreError;

/// Audit log persisted in the `audit_log` table.
#[derive(Debug, Clone)]
pub struct PostgresAuditLog {
    pool: Arc<PgPool>,
}

impl PostgresAuditLog {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl AuditSink for PostgresAuditLog {
    async fn record(&self, entry: AuditEntry) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO audit_log (
                id, actor, action, entity, entity_id, before_state, after_state,
                ip, user_agent, recorded_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(entry.id.as_uuid())
        .bind(&entry.actor)
        .bind(&entry.action)
        .bind(&entry.entity)
        .bind(entry.entity_id.as_deref())
        .bind(&entry.before)
        .bind(&entry.after)
        .bind(entry.ip.as_deref())
        .bind(entry.user_agent.as_deref())
        .bind(entry.recorded_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("record_audit", e))?;
        Ok(())
    }

    async fn list(&self, limit: usize) -> Result<Vec<AuditEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, actor, action, entity, entity_id, before_state, after_state,
                   ip, user_agent, recorded_at
            FROM audit_log
            ORDER BY recorded_at DESC
            LIMIT $1
            "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_audit", e))?;

        rows.iter()
            .map(|row| {
                Ok(AuditEntry {
                    id: AuditEntryId::from_uuid(row.try_get("id")?),
                    actor: row.try_get("actor")?,
                    action: row.try_get("action")?,
                    entity: row.try_get("entity")?,
                    entity_id: row.try_get("entity_id")?,
                    before: row.try_get("before_state")?,
                    after: row.try_get("after_state")?,
                    ip: row.try_get("ip")?,
                    user_agent: row.try_get("user_agent")?,
                    recorded_at: row.try_get("recorded_at")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(|e| StoreError::Backend(format!("failed to decode audit row: {e}")))
    }
}
