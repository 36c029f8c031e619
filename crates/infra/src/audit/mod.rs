//! Append-only audit log of admin mutations.

pub mod postgres;

use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use classbook_core::AuditEntryId;

use crate::store::StoreError;

pub use postgres::PostgresAuditLog;

/// Action names recorded in the log.
pub mod actions {
    pub const CREATE: &str = "CREATE";
    pub const UPDATE: &str = "UPDATE";
    pub const DELETE: &str = "DELETE";
    pub const GENERATE_INVOICES: &str = "GENERATE_INVOICES";
    pub const DECIDE_INVOICE: &str = "DECIDE_INVOICE";
    pub const RECORD_PAYMENT: &str = "RECORD_PAYMENT";
}

/// Who performed a mutation, and the request it came from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Actor {
    pub name: String,
    /// Client address (`x-forwarded-for` first hop, else the peer address).
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

impl Actor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ip: None,
            user_agent: None,
        }
    }

    pub fn with_origin(mut self, ip: Option<String>, user_agent: Option<String>) -> Self {
        self.ip = ip;
        self.user_agent = user_agent;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: AuditEntryId,
    /// Principal that performed the action.
    pub actor: String,
    pub action: String,
    /// Entity kind, e.g. `invoice`.
    pub entity: String,
    pub entity_id: Option<String>,
    pub before: Option<JsonValue>,
    pub after: Option<JsonValue>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        actor: &Actor,
        action: &str,
        entity: &str,
        entity_id: Option<String>,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: AuditEntryId::new(),
            actor: actor.name.clone(),
            action: action.to_string(),
            entity: entity.to_string(),
            entity_id,
            before: None,
            after: None,
            ip: actor.ip.clone(),
            user_agent: actor.user_agent.clone(),
            recorded_at,
        }
    }

    /// Attach before/after snapshots. Values that fail to serialize are dropped.
    pub fn with_snapshots<B: Serialize, A: Serialize>(
        mut self,
        before: Option<&B>,
        after: Option<&A>,
    ) -> Self {
        self.before = before.and_then(|b| serde_json::to_value(b).ok());
        self.after = after.and_then(|a| serde_json::to_value(a).ok());
        self
    }
}

/// Destination for audit entries.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: AuditEntry) -> Result<(), StoreError>;

    /// Newest first, at most `limit` entries.
    async fn list(&self, limit: usize) -> Result<Vec<AuditEntry>, StoreError>;
}

/// In-memory audit log (tests/dev).
#[derive(Debug, Default)]
pub struct InMemoryAuditLog {
    entries: RwLock<Vec<AuditEntry>>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditLog {
    async fn record(&self, entry: AuditEntry) -> Result<(), StoreError> {
        self.entries
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?
            .push(entry);
        Ok(())
    }

    async fn list(&self, limit: usize) -> Result<Vec<AuditEntry>, StoreError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;
        Ok(entries.iter().rev().take(limit).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lists_newest_first_with_limit() {
        let log = InMemoryAuditLog::new();
        for action in [actions::CREATE, actions::GENERATE_INVOICES, actions::RECORD_PAYMENT] {
            log.record(AuditEntry::new(&Actor::new("admin"), action, "invoice", None, Utc::now()))
                .await
                .unwrap();
        }

        let latest = log.list(2).await.unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].action, actions::RECORD_PAYMENT);
        assert_eq!(latest[1].action, actions::GENERATE_INVOICES);
    }

    #[test]
    fn snapshots_are_serialized() {
        let admin = Actor::new("admin");
        let entry = AuditEntry::new(&admin, actions::DECIDE_INVOICE, "invoice", None, Utc::now())
            .with_snapshots(Some(&"pending"), Some(&"approved"));
        assert_eq!(entry.before, Some(JsonValue::from("pending")));
        assert_eq!(entry.after, Some(JsonValue::from("approved")));
    }

    #[test]
    fn entries_carry_request_origin() {
        let actor = Actor::new("admin")
            .with_origin(Some("203.0.113.7".to_string()), Some("curl/8.5".to_string()));
        let entry = AuditEntry::new(&actor, actions::DELETE, "cash_entry", None, Utc::now());
        assert_eq!(entry.actor, "admin");
        assert_eq!(entry.ip.as_deref(), Some("203.0.113.7"));
        assert_eq!(entry.user_agent.as_deref(), Some("curl/8.5"));

        let bare = AuditEntry::new(&Actor::new("admin"), actions::CREATE, "class", None, Utc::now());
        assert_eq!(bare.ip, None);
        assert_eq!(bare.user_agent, None);
    }
}
