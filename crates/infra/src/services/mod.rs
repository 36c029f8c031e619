//! Application services: validation, storage and auditing for each operation.
//!
//! Callers pass the acting principal (for the audit trail) and `now`; the
//! services never read the clock themselves.

pub mod billing;
pub mod cashbook;
pub mod portal;
pub mod registry;

use std::sync::Arc;

use thiserror::Error;
use tracing::warn;

use classbook_core::DomainError;

use crate::audit::{AuditEntry, AuditSink, InMemoryAuditLog};
use crate::store::{BillingStore, InMemoryBillingStore, StoreError};

pub use billing::{BillingService, InvoiceView};
pub use cashbook::CashBookService;
pub use portal::{GuardianSummary, LinkedStudent, PortalService, StudentSummary};
pub use registry::{NewClass, RegisterGuardian, RegisterStudent, RegistryService};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// All services sharing one store and audit sink.
#[derive(Clone)]
pub struct Services {
    pub registry: RegistryService,
    pub billing: BillingService,
    pub portal: PortalService,
    pub cashbook: CashBookService,
    pub audit: Arc<dyn AuditSink>,
}

impl Services {
    pub fn new(store: Arc<dyn BillingStore>, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            registry: RegistryService::new(store.clone(), audit.clone()),
            billing: BillingService::new(store.clone(), audit.clone()),
            cashbook: CashBookService::new(store.clone(), audit.clone()),
            portal: PortalService::new(store),
            audit,
        }
    }

    /// In-memory wiring for dev and tests.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(InMemoryBillingStore::new()),
            Arc::new(InMemoryAuditLog::new()),
        )
    }

    pub async fn audit_log(&self, limit: usize) -> ServiceResult<Vec<AuditEntry>> {
        Ok(self.audit.list(limit).await?)
    }
}

/// Record an audit entry without failing the operation that produced it.
pub(crate) async fn record_audit(sink: &dyn AuditSink, entry: AuditEntry) {
    let action = entry.action.clone();
    if let Err(err) = sink.record(entry).await {
        warn!(action = %action, error = %err, "failed to record audit entry");
    }
}
