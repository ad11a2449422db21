//! Postgres-backed stores.
//!
//! Uniqueness comes from the schema in `migrations/`: `commissions.payment_id`,
//! `affiliates.referral_code` and the `(membership_id, kind)` primary key of
//! the dedup log. Conflicts are reported through `ON CONFLICT DO NOTHING`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::StoreError;
use crate::ledger::{CommissionStore, EarningsTotal, InsertOutcome};
use crate::notifications::{MembershipSource, NotificationLog};
use crate::referral::AffiliateDirectory;
use crate::types::{
    AffiliateIdentity, Commission, CommissionStatus, Membership, MembershipExpiryNotification,
    NotificationKind,
};

// NOTE: 23505 = unique_violation
const PG_UNIQUE_VIOLATION: &str = "23505";

const COMMISSION_COLUMNS: &str = "id, payment_id, affiliate_id, referral_id, source, base_amount, \
     base_currency, commission_rate, commission_amount, commission_currency, status, created_at, paid_at";

const AFFILIATE_COLUMNS: &str = "id, referral_id, referral_code, display_name, payout_currency, \
     commission_rate, onboarded, is_active, created_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct CommissionRow {
    id: Uuid,
    payment_id: String,
    affiliate_id: Uuid,
    referral_id: Uuid,
    source: String,
    base_amount: Decimal,
    base_currency: String,
    commission_rate: Decimal,
    commission_amount: Decimal,
    commission_currency: String,
    status: String,
    created_at: DateTime<Utc>,
    paid_at: Option<DateTime<Utc>>,
}

impl TryFrom<CommissionRow> for Commission {
    type Error = StoreError;

    fn try_from(row: CommissionRow) -> Result<Self, Self::Error> {
        Ok(Commission {
            id: row.id,
            payment_id: row.payment_id,
            affiliate_id: row.affiliate_id,
            referral_id: row.referral_id,
            source: row.source.parse()?,
            base_amount: row.base_amount,
            base_currency: row.base_currency,
            commission_rate: row.commission_rate,
            commission_amount: row.commission_amount,
            commission_currency: row.commission_currency,
            status: row.status.parse()?,
            created_at: row.created_at,
            paid_at: row.paid_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AffiliateRow {
    id: Uuid,
    referral_id: Uuid,
    referral_code: String,
    display_name: Option<String>,
    payout_currency: String,
    commission_rate: Option<Decimal>,
    onboarded: bool,
    is_active: bool,
    created_at: DateTime<Utc>,
}

impl From<AffiliateRow> for AffiliateIdentity {
    fn from(row: AffiliateRow) -> Self {
        AffiliateIdentity {
            id: row.id,
            referral_id: row.referral_id,
            referral_code: row.referral_code,
            display_name: row.display_name,
            payout_currency: row.payout_currency,
            commission_rate: row.commission_rate,
            onboarded: row.onboarded,
            is_active: row.is_active,
            created_at: row.created_at,
        }
    }
}

#[async_trait]
impl CommissionStore for PgStore {
    async fn find_by_payment(&self, payment_id: &str) -> Result<Option<Commission>, StoreError> {
        let sql = format!("SELECT {COMMISSION_COLUMNS} FROM commissions WHERE payment_id = $1");
        sqlx::query_as::<_, CommissionRow>(&sql)
            .bind(payment_id)
            .fetch_optional(&self.pool)
            .await?
            .map(Commission::try_from)
            .transpose()
    }

    async fn get(&self, id: Uuid) -> Result<Option<Commission>, StoreError> {
        let sql = format!("SELECT {COMMISSION_COLUMNS} FROM commissions WHERE id = $1");
        sqlx::query_as::<_, CommissionRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Commission::try_from)
            .transpose()
    }

    async fn insert(&self, c: &Commission) -> Result<InsertOutcome, StoreError> {
        let sql = format!(
            "INSERT INTO commissions ({COMMISSION_COLUMNS})
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
             ON CONFLICT (payment_id) DO NOTHING
             RETURNING {COMMISSION_COLUMNS}"
        );
        let row = sqlx::query_as::<_, CommissionRow>(&sql)
            .bind(c.id)
            .bind(&c.payment_id)
            .bind(c.affiliate_id)
            .bind(c.referral_id)
            .bind(c.source.as_str())
            .bind(c.base_amount)
            .bind(&c.base_currency)
            .bind(c.commission_rate)
            .bind(c.commission_amount)
            .bind(&c.commission_currency)
            .bind(c.status.as_str())
            .bind(c.created_at)
            .bind(c.paid_at)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(InsertOutcome::Inserted(row.try_into()?)),
            None => Ok(InsertOutcome::Duplicate),
        }
    }

    async fn update_status(
        &self,
        id: Uuid,
        from: CommissionStatus,
        to: CommissionStatus,
        paid_at: Option<DateTime<Utc>>,
    ) -> Result<Option<Commission>, StoreError> {
        let sql = format!(
            "UPDATE commissions SET status = $3, paid_at = COALESCE($4, paid_at)
             WHERE id = $1 AND status = $2
             RETURNING {COMMISSION_COLUMNS}"
        );
        sqlx::query_as::<_, CommissionRow>(&sql)
            .bind(id)
            .bind(from.as_str())
            .bind(to.as_str())
            .bind(paid_at)
            .fetch_optional(&self.pool)
            .await?
            .map(Commission::try_from)
            .transpose()
    }

    async fn list(&self) -> Result<Vec<Commission>, StoreError> {
        let sql = format!("SELECT {COMMISSION_COLUMNS} FROM commissions ORDER BY created_at, id");
        sqlx::query_as::<_, CommissionRow>(&sql)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Commission::try_from)
            .collect()
    }

    async fn earnings_totals(&self) -> Result<Vec<EarningsTotal>, StoreError> {
        let rows = sqlx::query_as::<_, (Uuid, Decimal, i64)>(
            r#"SELECT affiliate_id, SUM(commission_amount), COUNT(*)
               FROM commissions
               WHERE status <> 'cancelled'
               GROUP BY affiliate_id"#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(affiliate_id, total_earnings, count)| EarningsTotal {
                affiliate_id,
                total_earnings,
                referral_count: count.max(0) as u64,
            })
            .collect())
    }
}

#[async_trait]
impl AffiliateDirectory for PgStore {
    async fn find_by_referral_code(
        &self,
        code: &str,
    ) -> Result<Option<AffiliateIdentity>, StoreError> {
        let sql = format!("SELECT {AFFILIATE_COLUMNS} FROM affiliates WHERE referral_code = $1");
        let row = sqlx::query_as::<_, AffiliateRow>(&sql)
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Into::into))
    }

    async fn get(&self, id: Uuid) -> Result<Option<AffiliateIdentity>, StoreError> {
        let sql = format!("SELECT {AFFILIATE_COLUMNS} FROM affiliates WHERE id = $1");
        let row = sqlx::query_as::<_, AffiliateRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Into::into))
    }

    async fn list(&self) -> Result<Vec<AffiliateIdentity>, StoreError> {
        let sql = format!("SELECT {AFFILIATE_COLUMNS} FROM affiliates ORDER BY created_at, id");
        let rows = sqlx::query_as::<_, AffiliateRow>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn upsert(&self, a: AffiliateIdentity) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO affiliates ({AFFILIATE_COLUMNS})
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             ON CONFLICT (id) DO UPDATE SET
                 referral_code = EXCLUDED.referral_code,
                 display_name = EXCLUDED.display_name,
                 payout_currency = EXCLUDED.payout_currency,
                 commission_rate = EXCLUDED.commission_rate,
                 onboarded = EXCLUDED.onboarded,
                 is_active = EXCLUDED.is_active"
        );
        sqlx::query(&sql)
            .bind(a.id)
            .bind(a.referral_id)
            .bind(&a.referral_code)
            .bind(&a.display_name)
            .bind(&a.payout_currency)
            .bind(a.commission_rate)
            .bind(a.onboarded)
            .bind(a.is_active)
            .bind(a.created_at)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if let sqlx::Error::Database(db_err) = &e {
                    if db_err.code().as_deref() == Some(PG_UNIQUE_VIOLATION) {
                        return StoreError::UniqueViolation(format!(
                            "referral code {} already in use",
                            a.referral_code
                        ));
                    }
                }
                StoreError::Database(e)
            })?;
        Ok(())
    }
}

#[async_trait]
impl MembershipSource for PgStore {
    async fn expiring_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Membership>, StoreError> {
        let rows = sqlx::query_as::<_, (Uuid, Uuid, String, DateTime<Utc>)>(
            r#"SELECT id, user_id, recipient, expires_at
               FROM memberships
               WHERE expires_at >= $1 AND expires_at < $2
               ORDER BY expires_at, id"#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, user_id, recipient, expires_at)| Membership {
                id,
                user_id,
                recipient,
                expires_at,
            })
            .collect())
    }
}

#[async_trait]
impl NotificationLog for PgStore {
    async fn exists(&self, membership_id: Uuid, kind: NotificationKind) -> Result<bool, StoreError> {
        let found = sqlx::query_scalar::<_, bool>(
            r#"SELECT EXISTS(
                   SELECT 1 FROM membership_expiry_notifications
                   WHERE membership_id = $1 AND kind = $2
               )"#,
        )
        .bind(membership_id)
        .bind(kind.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(found)
    }

    async fn record(&self, row: MembershipExpiryNotification) -> Result<bool, StoreError> {
        let res = sqlx::query(
            r#"INSERT INTO membership_expiry_notifications (membership_id, kind, user_id, sent_at)
               VALUES ($1, $2, $3, $4)
               ON CONFLICT (membership_id, kind) DO NOTHING"#,
        )
        .bind(row.membership_id)
        .bind(row.kind.as_str())
        .bind(row.user_id)
        .bind(row.sent_at)
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected() == 1)
    }
}
