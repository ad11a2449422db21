//! In-memory stores for tests and local development.
//!
//! Each store enforces the same uniqueness rules as the Postgres schema,
//! under a single lock so check and write are atomic.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::StoreError;
use crate::ledger::{CommissionStore, EarningsTotal, InsertOutcome};
use crate::notifications::{MembershipSource, NotificationLog};
use crate::ranking;
use crate::referral::AffiliateDirectory;
use crate::types::{
    AffiliateIdentity, Commission, CommissionStatus, Membership, MembershipExpiryNotification,
    NotificationKind,
};

#[derive(Default)]
struct CommissionTable {
    rows: Vec<Commission>,
    by_payment: HashMap<String, usize>,
}

#[derive(Default)]
pub struct MemoryCommissionStore {
    table: RwLock<CommissionTable>,
}

#[async_trait]
impl CommissionStore for MemoryCommissionStore {
    async fn find_by_payment(&self, payment_id: &str) -> Result<Option<Commission>, StoreError> {
        let table = self.table.read().await;
        Ok(table
            .by_payment
            .get(payment_id)
            .map(|&idx| table.rows[idx].clone()))
    }

    async fn get(&self, id: Uuid) -> Result<Option<Commission>, StoreError> {
        let table = self.table.read().await;
        Ok(table.rows.iter().find(|c| c.id == id).cloned())
    }

    async fn insert(&self, commission: &Commission) -> Result<InsertOutcome, StoreError> {
        let mut table = self.table.write().await;
        if table.by_payment.contains_key(&commission.payment_id) {
            return Ok(InsertOutcome::Duplicate);
        }
        let idx = table.rows.len();
        table.rows.push(commission.clone());
        table.by_payment.insert(commission.payment_id.clone(), idx);
        Ok(InsertOutcome::Inserted(commission.clone()))
    }

    async fn update_status(
        &self,
        id: Uuid,
        from: CommissionStatus,
        to: CommissionStatus,
        paid_at: Option<DateTime<Utc>>,
    ) -> Result<Option<Commission>, StoreError> {
        let mut table = self.table.write().await;
        let Some(row) = table.rows.iter_mut().find(|c| c.id == id) else {
            return Ok(None);
        };
        if row.status != from {
            return Ok(None);
        }
        row.status = to;
        if paid_at.is_some() {
            row.paid_at = paid_at;
        }
        Ok(Some(row.clone()))
    }

    async fn list(&self) -> Result<Vec<Commission>, StoreError> {
        Ok(self.table.read().await.rows.clone())
    }

    async fn earnings_totals(&self) -> Result<Vec<EarningsTotal>, StoreError> {
        Ok(ranking::earnings_totals(&self.table.read().await.rows))
    }
}

#[derive(Default)]
pub struct MemoryAffiliateDirectory {
    affiliates: RwLock<HashMap<Uuid, AffiliateIdentity>>,
}

#[async_trait]
impl AffiliateDirectory for MemoryAffiliateDirectory {
    async fn find_by_referral_code(
        &self,
        code: &str,
    ) -> Result<Option<AffiliateIdentity>, StoreError> {
        let affiliates = self.affiliates.read().await;
        Ok(affiliates
            .values()
            .find(|a| a.referral_code == code)
            .cloned())
    }

    async fn get(&self, id: Uuid) -> Result<Option<AffiliateIdentity>, StoreError> {
        Ok(self.affiliates.read().await.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<AffiliateIdentity>, StoreError> {
        let mut all: Vec<_> = self.affiliates.read().await.values().cloned().collect();
        all.sort_by_key(|a| a.created_at);
        Ok(all)
    }

    async fn upsert(&self, affiliate: AffiliateIdentity) -> Result<(), StoreError> {
        let mut affiliates = self.affiliates.write().await;
        let taken = affiliates
            .values()
            .any(|a| a.referral_code == affiliate.referral_code && a.id != affiliate.id);
        if taken {
            return Err(StoreError::UniqueViolation(format!(
                "referral code {} already belongs to another affiliate",
                affiliate.referral_code
            )));
        }
        affiliates.insert(affiliate.id, affiliate);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryMembershipSource {
    memberships: RwLock<Vec<Membership>>,
}

impl MemoryMembershipSource {
    pub async fn add(&self, membership: Membership) {
        self.memberships.write().await.push(membership);
    }
}

#[async_trait]
impl MembershipSource for MemoryMembershipSource {
    async fn expiring_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Membership>, StoreError> {
        Ok(self
            .memberships
            .read()
            .await
            .iter()
            .filter(|m| m.expires_at >= start && m.expires_at < end)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct MemoryNotificationLog {
    rows: RwLock<HashMap<(Uuid, NotificationKind), MembershipExpiryNotification>>,
}

impl MemoryNotificationLog {
    pub async fn rows(&self) -> Vec<MembershipExpiryNotification> {
        let mut rows: Vec<_> = self.rows.read().await.values().cloned().collect();
        rows.sort_by_key(|r| (r.membership_id, r.kind));
        rows
    }
}

#[async_trait]
impl NotificationLog for MemoryNotificationLog {
    async fn exists(&self, membership_id: Uuid, kind: NotificationKind) -> Result<bool, StoreError> {
        Ok(self.rows.read().await.contains_key(&(membership_id, kind)))
    }

    async fn record(&self, row: MembershipExpiryNotification) -> Result<bool, StoreError> {
        let mut rows = self.rows.write().await;
        let key = (row.membership_id, row.kind);
        if rows.contains_key(&key) {
            return Ok(false);
        }
        rows.insert(key, row);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::types::CommissionSource;

    fn commission(payment_id: &str, affiliate_id: Uuid, amount: Decimal) -> Commission {
        Commission {
            id: Uuid::new_v4(),
            payment_id: payment_id.into(),
            affiliate_id,
            referral_id: Uuid::new_v4(),
            source: CommissionSource::Webhook,
            base_amount: amount,
            base_currency: "USD".into(),
            commission_rate: dec!(1),
            commission_amount: amount,
            commission_currency: "USD".into(),
            status: CommissionStatus::Available,
            created_at: Utc::now(),
            paid_at: None,
        }
    }

    #[tokio::test]
    async fn payment_reference_is_unique() {
        let store = MemoryCommissionStore::default();
        let a = Uuid::new_v4();

        let first = store.insert(&commission("pay_1", a, dec!(5))).await.unwrap();
        assert!(matches!(first, InsertOutcome::Inserted(_)));
        let second = store.insert(&commission("pay_1", a, dec!(7))).await.unwrap();
        assert!(matches!(second, InsertOutcome::Duplicate));

        let kept = store.find_by_payment("pay_1").await.unwrap().unwrap();
        assert_eq!(kept.commission_amount, dec!(5));
    }

    #[tokio::test]
    async fn status_update_is_compare_and_set() {
        let store = MemoryCommissionStore::default();
        let c = commission("pay_1", Uuid::new_v4(), dec!(5));
        store.insert(&c).await.unwrap();

        let stale = store
            .update_status(c.id, CommissionStatus::Pending, CommissionStatus::Available, None)
            .await
            .unwrap();
        assert!(stale.is_none());

        let now = Utc::now();
        let paid = store
            .update_status(c.id, CommissionStatus::Available, CommissionStatus::Paid, Some(now))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(paid.paid_at, Some(now));
    }

    #[tokio::test]
    async fn totals_skip_cancelled_commissions() {
        let store = MemoryCommissionStore::default();
        let a = Uuid::new_v4();
        store.insert(&commission("p1", a, dec!(5))).await.unwrap();
        store.insert(&commission("p2", a, dec!(2.50))).await.unwrap();
        let mut cancelled = commission("p3", a, dec!(100));
        cancelled.status = CommissionStatus::Cancelled;
        store.insert(&cancelled).await.unwrap();

        let totals = store.earnings_totals().await.unwrap();
        assert_eq!(
            totals,
            vec![EarningsTotal {
                affiliate_id: a,
                total_earnings: dec!(7.50),
                referral_count: 2,
            }]
        );
    }

    #[tokio::test]
    async fn dedup_log_rejects_second_row() {
        let log = MemoryNotificationLog::default();
        let row = MembershipExpiryNotification {
            membership_id: Uuid::new_v4(),
            kind: NotificationKind::Expired,
            user_id: Uuid::new_v4(),
            sent_at: Utc::now(),
        };

        assert!(log.record(row.clone()).await.unwrap());
        assert!(!log.record(row.clone()).await.unwrap());
        assert!(log.exists(row.membership_id, NotificationKind::Expired).await.unwrap());
        assert!(!log.exists(row.membership_id, NotificationKind::DayOfWarning).await.unwrap());
        assert_eq!(log.rows().await.len(), 1);
    }

    #[tokio::test]
    async fn expiring_between_is_half_open() {
        let source = MemoryMembershipSource::default();
        let start = Utc::now();
        let end = start + Duration::days(1);
        for expires_at in [start, end - Duration::seconds(1), end] {
            source
                .add(Membership {
                    id: Uuid::new_v4(),
                    user_id: Uuid::new_v4(),
                    recipient: "member@example.com".into(),
                    expires_at,
                })
                .await;
        }

        let found = source.expiring_between(start, end).await.unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|m| m.expires_at < end));
    }
}
