//! The commission ledger.
//!
//! At most one commission exists per payment. The store's unique index on
//! the payment reference is what guarantees it; the lookup before insert only
//! saves a write in the common retry case.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::currency::CurrencyNormalizer;
use crate::error::{LedgerError, StoreError};
use crate::status::{CommissionAction, transition};
use crate::types::{AffiliateIdentity, Commission, CommissionSource, CommissionStatus, PaymentEvent};

/// Decimal places kept on commission amounts.
pub const AMOUNT_SCALE: u32 = 2;

/// Result of an insert attempt against the unique payment reference.
#[derive(Debug)]
pub enum InsertOutcome {
    Inserted(Commission),
    /// Another commission already references the payment.
    Duplicate,
}

/// Per-affiliate totals over non-cancelled commissions.
#[derive(Debug, Clone, PartialEq)]
pub struct EarningsTotal {
    pub affiliate_id: Uuid,
    pub total_earnings: Decimal,
    pub referral_count: u64,
}

#[async_trait]
pub trait CommissionStore: Send + Sync {
    async fn find_by_payment(&self, payment_id: &str) -> Result<Option<Commission>, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<Commission>, StoreError>;

    /// Inserts `commission` unless one already references its payment.
    async fn insert(&self, commission: &Commission) -> Result<InsertOutcome, StoreError>;

    /// Moves commission `id` from `from` to `to`. Returns `None` without
    /// writing when the row no longer has status `from`.
    async fn update_status(
        &self,
        id: Uuid,
        from: CommissionStatus,
        to: CommissionStatus,
        paid_at: Option<DateTime<Utc>>,
    ) -> Result<Option<Commission>, StoreError>;

    async fn list(&self) -> Result<Vec<Commission>, StoreError>;

    async fn earnings_totals(&self) -> Result<Vec<EarningsTotal>, StoreError>;
}

/// Rates and initial status applied to new commissions.
#[derive(Debug, Clone)]
pub struct CommissionPolicy {
    default_rate: Decimal,
    initial_status: CommissionStatus,
}

impl CommissionPolicy {
    /// New commissions start `available`. Fails when `default_rate` is
    /// outside `(0, 1]`.
    pub fn new(default_rate: Decimal) -> Result<Self, LedgerError> {
        validate_rate(default_rate)?;
        Ok(Self {
            default_rate,
            initial_status: CommissionStatus::Available,
        })
    }

    pub fn with_initial_status(mut self, status: CommissionStatus) -> Self {
        self.initial_status = status;
        self
    }

    pub fn default_rate(&self) -> Decimal {
        self.default_rate
    }

    pub fn initial_status(&self) -> CommissionStatus {
        self.initial_status
    }

    /// The affiliate's override when set, else the default rate.
    pub fn rate_for(&self, affiliate: &AffiliateIdentity) -> Result<Decimal, LedgerError> {
        match affiliate.commission_rate {
            Some(rate) => {
                validate_rate(rate).inspect_err(|e| {
                    tracing::error!(affiliate_id = %affiliate.id, "{e}");
                })?;
                Ok(rate)
            }
            None => Ok(self.default_rate),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CommissionResult {
    pub commission: Commission,
    /// True when the payment already had a commission and nothing was written.
    pub skipped: bool,
}

#[derive(Clone)]
pub struct CommissionLedger {
    store: Arc<dyn CommissionStore>,
    normalizer: Arc<CurrencyNormalizer>,
    policy: CommissionPolicy,
}

impl CommissionLedger {
    pub fn new(
        store: Arc<dyn CommissionStore>,
        normalizer: Arc<CurrencyNormalizer>,
        policy: CommissionPolicy,
    ) -> Self {
        Self {
            store,
            normalizer,
            policy,
        }
    }

    pub fn store(&self) -> &Arc<dyn CommissionStore> {
        &self.store
    }

    /// Records the commission `affiliate` earned on `payment`.
    ///
    /// Safe to call any number of times, concurrently, for the same payment:
    /// every caller gets the single persisted row back, and all but the
    /// writer see `skipped = true`.
    pub async fn record_commission(
        &self,
        payment: &PaymentEvent,
        affiliate: &AffiliateIdentity,
        referral_id: Uuid,
        source: CommissionSource,
    ) -> Result<CommissionResult, LedgerError> {
        validate_amount(payment.amount)?;

        if let Some(existing) = self.store.find_by_payment(&payment.payment_id).await? {
            tracing::info!(
                payment_id = %payment.payment_id,
                commission_id = %existing.id,
                "commission already recorded, skipping"
            );
            return Ok(CommissionResult {
                commission: existing,
                skipped: true,
            });
        }

        let rate = self.policy.rate_for(affiliate)?;
        let base_reference = self.normalizer.normalize(payment.amount, &payment.currency)?;
        let commission = Commission {
            id: Uuid::new_v4(),
            payment_id: payment.payment_id.clone(),
            affiliate_id: affiliate.id,
            referral_id,
            source,
            base_amount: payment.amount,
            base_currency: payment.currency.trim().to_ascii_uppercase(),
            commission_rate: rate,
            commission_amount: commission_amount(base_reference, rate)?,
            commission_currency: self.normalizer.reference_currency().to_string(),
            status: self.policy.initial_status,
            created_at: Utc::now(),
            paid_at: None,
        };

        match self
            .store
            .insert(&commission)
            .await
            .map_err(LedgerError::InsertFailed)?
        {
            InsertOutcome::Inserted(row) => {
                tracing::info!(
                    payment_id = %row.payment_id,
                    commission_id = %row.id,
                    affiliate_id = %row.affiliate_id,
                    amount = %row.commission_amount,
                    currency = %row.commission_currency,
                    source = row.source.as_str(),
                    "commission recorded"
                );
                Ok(CommissionResult {
                    commission: row,
                    skipped: false,
                })
            }
            InsertOutcome::Duplicate => {
                tracing::warn!(
                    payment_id = %payment.payment_id,
                    "lost insert race for payment, returning existing commission"
                );
                let existing = self
                    .store
                    .find_by_payment(&payment.payment_id)
                    .await?
                    .ok_or_else(|| {
                        LedgerError::InsertFailed(StoreError::Corrupt(format!(
                            "duplicate reported for payment {} but no row found",
                            payment.payment_id
                        )))
                    })?;
                Ok(CommissionResult {
                    commission: existing,
                    skipped: true,
                })
            }
        }
    }

    pub async fn get(&self, id: Uuid) -> Result<Commission, LedgerError> {
        self.store
            .get(id)
            .await?
            .ok_or(LedgerError::CommissionNotFound(id))
    }

    /// Applies an administrative action to a stored commission.
    ///
    /// Invalid transitions fail without touching the row. When another
    /// writer changes the status first, the action is re-checked against the
    /// new status.
    pub async fn apply_action(
        &self,
        id: Uuid,
        action: CommissionAction,
        at: DateTime<Utc>,
    ) -> Result<Commission, LedgerError> {
        let current = self.get(id).await?;
        let to = transition(current.status, action)?;
        let paid_at = (to == CommissionStatus::Paid).then_some(at);

        match self.store.update_status(id, current.status, to, paid_at).await? {
            Some(updated) => {
                tracing::info!(
                    commission_id = %id,
                    from = %current.status,
                    to = %updated.status,
                    action = action.as_str(),
                    "commission status changed"
                );
                Ok(updated)
            }
            None => {
                let latest = self.get(id).await?;
                tracing::warn!(
                    commission_id = %id,
                    expected = %current.status,
                    found = %latest.status,
                    "commission status changed concurrently"
                );
                Err(LedgerError::InvalidTransition {
                    from: latest.status,
                    action: action.as_str(),
                })
            }
        }
    }
}

/// Rejects amounts no payment can have.
pub fn validate_amount(amount: Decimal) -> Result<(), LedgerError> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::InvalidAmount(format!(
            "amount must be positive, got {amount}"
        )));
    }
    Ok(())
}

/// Converts a wire amount into a decimal, rejecting NaN and infinities.
pub fn amount_from_f64(amount: f64) -> Result<Decimal, LedgerError> {
    if !amount.is_finite() {
        return Err(LedgerError::InvalidAmount(format!(
            "amount must be finite, got {amount}"
        )));
    }
    let value = Decimal::try_from(amount)
        .map_err(|e| LedgerError::InvalidAmount(format!("amount {amount} out of range: {e}")))?;
    validate_amount(value)?;
    Ok(value)
}

/// Rejects commission rates outside `(0, 1]`.
pub fn validate_rate(rate: Decimal) -> Result<(), LedgerError> {
    if rate <= Decimal::ZERO || rate > Decimal::ONE {
        return Err(LedgerError::InvalidRate(format!(
            "rate must be in (0, 1], got {rate}"
        )));
    }
    Ok(())
}

pub fn commission_amount(base_reference: Decimal, rate: Decimal) -> Result<Decimal, LedgerError> {
    base_reference
        .checked_mul(rate)
        .map(|amount| amount.round_dp(AMOUNT_SCALE))
        .ok_or_else(|| {
            LedgerError::InvalidAmount(format!("{base_reference} * {rate} overflows"))
        })
}
