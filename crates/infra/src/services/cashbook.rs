use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, instrument};

use classbook_billing::{enrollment_fee_total, CashEntry, CashEntryFilter, CashEntryInput, CashSummary};
use classbook_core::CashEntryId;

use super::{record_audit, ServiceResult};
use crate::audit::{actions, Actor, AuditEntry, AuditSink};
use crate::store::{BillingStore, StoreError};

/// Manual cash book entries and the cash summary.
#[derive(Clone)]
pub struct CashBookService {
    store: Arc<dyn BillingStore>,
    audit: Arc<dyn AuditSink>,
}

impl CashBookService {
    pub fn new(store: Arc<dyn BillingStore>, audit: Arc<dyn AuditSink>) -> Self {
        Self { store, audit }
    }

    #[instrument(skip(self, input, now), err)]
    pub async fn create_entry(
        &self,
        actor: &Actor,
        input: CashEntryInput,
        now: DateTime<Utc>,
    ) -> ServiceResult<CashEntry> {
        let entry = CashEntry::record(input, now)?;
        self.store.insert_cash_entry(&entry).await?;

        record_audit(
            self.audit.as_ref(),
            AuditEntry::new(actor, actions::CREATE, "cash_entry", Some(entry.id.to_string()), now)
                .with_snapshots(None::<&()>, Some(&entry)),
        )
        .await;
        info!(entry_id = %entry.id, kind = entry.kind.as_str(), "cash entry recorded");
        Ok(entry)
    }

    /// Replace every field of an entry.
    #[instrument(skip(self, input, now), err)]
    pub async fn update_entry(
        &self,
        actor: &Actor,
        id: CashEntryId,
        input: CashEntryInput,
        now: DateTime<Utc>,
    ) -> ServiceResult<CashEntry> {
        let before = self
            .store
            .get_cash_entry(id)
            .await?
            .ok_or(StoreError::NotFound("cash entry"))?;
        let after = before.revise(input, now)?;
        self.store.update_cash_entry(&after).await?;

        record_audit(
            self.audit.as_ref(),
            AuditEntry::new(actor, actions::UPDATE, "cash_entry", Some(id.to_string()), now)
                .with_snapshots(Some(&before), Some(&after)),
        )
        .await;
        Ok(after)
    }

    #[instrument(skip(self, now), err)]
    pub async fn delete_entry(
        &self,
        actor: &Actor,
        id: CashEntryId,
        now: DateTime<Utc>,
    ) -> ServiceResult<CashEntry> {
        let removed = self.store.delete_cash_entry(id).await?;

        record_audit(
            self.audit.as_ref(),
            AuditEntry::new(actor, actions::DELETE, "cash_entry", Some(id.to_string()), now)
                .with_snapshots(Some(&removed), None::<&()>),
        )
        .await;
        info!(entry_id = %id, "cash entry deleted");
        Ok(removed)
    }

    pub async fn list_entries(&self, filter: CashEntryFilter) -> ServiceResult<Vec<CashEntry>> {
        Ok(self.store.list_cash_entries(filter).await?)
    }

    /// Entries matching `filter` with income, expense and enrollment-fee
    /// totals. The fee total follows the period filter only.
    pub async fn summary(&self, filter: CashEntryFilter) -> ServiceResult<CashSummary> {
        let entries = self.store.list_cash_entries(filter).await?;
        let classes = self.store.list_classes().await?;
        let memberships = self.store.active_memberships().await?;
        let fees = enrollment_fee_total(&classes, &memberships, filter.period)?;
        Ok(CashSummary::compute(entries, fees)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use classbook_billing::{EntryCategory, EntryKind, Period};
    use classbook_core::{DomainError, Money};

    use crate::audit::InMemoryAuditLog;
    use crate::services::{NewClass, RegisterStudent, ServiceError, Services};
    use crate::store::InMemoryBillingStore;

    fn fixture() -> (Services, Arc<InMemoryAuditLog>) {
        let audit = Arc::new(InMemoryAuditLog::new());
        (
            Services::new(Arc::new(InMemoryBillingStore::new()), audit.clone()),
            audit,
        )
    }

    fn entry(kind: EntryKind, amount: i64, day: u32) -> CashEntryInput {
        CashEntryInput {
            kind: Some(kind),
            category: Some(EntryCategory::Variable),
            description: Some("Material".to_string()),
            amount: Some(amount),
            occurred_on: NaiveDate::from_ymd_opt(2025, 3, day),
            notes: None,
        }
    }

    #[tokio::test]
    async fn entries_are_audited_through_their_lifecycle() {
        let (services, audit) = fixture();
        let actor = Actor::new("admin")
            .with_origin(Some("203.0.113.7".to_string()), Some("curl/8.5".to_string()));
        let now = Utc::now();

        let created = services
            .cashbook
            .create_entry(&actor, entry(EntryKind::Expense, 12_000, 5), now)
            .await
            .unwrap();
        let updated = services
            .cashbook
            .update_entry(&actor, created.id, entry(EntryKind::Expense, 15_000, 6), now)
            .await
            .unwrap();
        assert_eq!(updated.amount, Money::from_cents(15_000));
        assert_eq!(updated.created_at, created.created_at);

        services.cashbook.delete_entry(&actor, created.id, now).await.unwrap();
        assert!(services
            .cashbook
            .list_entries(CashEntryFilter::default())
            .await
            .unwrap()
            .is_empty());

        let entries = audit.list(10).await.unwrap();
        let recorded: Vec<&str> = entries.iter().map(|e| e.action.as_str()).collect();
        assert_eq!(recorded, vec![actions::DELETE, actions::UPDATE, actions::CREATE]);
        assert_eq!(entries[1].before.as_ref().unwrap()["amount"], 12_000);
        assert_eq!(entries[1].after.as_ref().unwrap()["amount"], 15_000);
        assert!(entries[0].after.is_none());
        assert_eq!(entries[0].ip.as_deref(), Some("203.0.113.7"));
        assert_eq!(entries[0].user_agent.as_deref(), Some("curl/8.5"));

        let err = services
            .cashbook
            .delete_entry(&actor, created.id, now)
            .await
            .unwrap_err();
        assert_eq!(err, ServiceError::Store(StoreError::NotFound("cash entry")));
    }

    #[tokio::test]
    async fn invalid_entries_are_rejected_before_storage() {
        let (services, audit) = fixture();
        let err = services
            .cashbook
            .create_entry(&Actor::new("admin"), entry(EntryKind::Income, 0, 5), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Domain(DomainError::Validation(_))));
        assert!(audit.list(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn summary_adds_enrollment_fees_for_the_period() {
        let (services, _) = fixture();
        let admin = Actor::new("admin");
        let now = Utc::now();

        let class = services
            .registry
            .create_class(
                &admin,
                NewClass {
                    name: "Turma A".into(),
                    enrollment_fee: Some(20_000),
                    monthly_tuition: Some(85_000),
                },
                now,
            )
            .await
            .unwrap();
        for name in ["Ana", "Bia"] {
            services
                .registry
                .register_student(
                    &admin,
                    RegisterStudent {
                        name: name.into(),
                        phone: "11987654321".into(),
                        class_ids: vec![class.id],
                    },
                    now,
                )
                .await
                .unwrap();
        }

        services
            .cashbook
            .create_entry(&admin, entry(EntryKind::Income, 50_000, 3), now)
            .await
            .unwrap();
        services
            .cashbook
            .create_entry(&admin, entry(EntryKind::Expense, 120_000, 4), now)
            .await
            .unwrap();

        let all = services.cashbook.summary(CashEntryFilter::default()).await.unwrap();
        assert_eq!(all.entries.len(), 2);
        assert_eq!(all.income, Money::from_cents(50_000));
        assert_eq!(all.expenses, Money::from_cents(120_000));
        assert_eq!(all.enrollment_fees, Money::from_cents(40_000));
        assert_eq!(all.balance, Money::from_cents(-30_000));

        let march = CashEntryFilter {
            period: Some("2025-03".parse::<Period>().unwrap()),
            ..CashEntryFilter::default()
        };
        let summary = services.cashbook.summary(march).await.unwrap();
        assert_eq!(summary.entries.len(), 2);
        // Memberships started now, outside March 2025.
        assert_eq!(summary.enrollment_fees, Money::ZERO);
    }
}
