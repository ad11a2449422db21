//! Affiliate commission ledger, leaderboard and membership expiry notifications.

pub mod api;
pub mod config;
pub mod currency;
pub mod error;
pub mod ledger;
pub mod memory;
pub mod notifications;
pub mod postgres;
pub mod ranking;
pub mod referral;
pub mod responses;
pub mod status;
pub mod types;

use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
pub use api::{AppState, Stores, init_router};
use sqlx::{PgPool, postgres::PgPoolOptions};

use crate::config::Config;
use crate::error::LedgerError;
use crate::ledger::{CommissionLedger, CommissionResult};
use crate::notifications::{LogNotifier, Notifier, WebhookNotifier};
use crate::referral::ReferralResolver;
use crate::types::{CommissionSource, PaymentEvent};

/// Initializes the database pool and applies pending migrations.
pub async fn init_pool(config: &Config) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to Postgres")?;
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    Ok(pool)
}

/// Picks the notification delivery configured for this deployment.
pub fn init_notifier(config: &Config) -> Arc<dyn Notifier> {
    match &config.notification_webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url.clone())),
        None => Arc::new(LogNotifier),
    }
}

/// Records the commission owed on a completed payment.
///
/// Returns `Ok(None)` when the payment carries no referral code. An unknown
/// referral code is reported as [`LedgerError::ReferralNotFound`]; the
/// payment itself is never affected.
pub async fn process_payment(
    resolver: &ReferralResolver,
    ledger: &CommissionLedger,
    payment: &PaymentEvent,
    source: CommissionSource,
) -> Result<Option<CommissionResult>, LedgerError> {
    let Some(code) = payment
        .referral_code
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
    else {
        tracing::debug!(payment_id = %payment.payment_id, "payment has no referral code");
        return Ok(None);
    };

    let affiliate = resolver.resolve(code).await.inspect_err(|e| {
        tracing::warn!(payment_id = %payment.payment_id, code, "referral not resolved: {e}");
    })?;

    let result = ledger
        .record_commission(payment, &affiliate, affiliate.referral_id, source)
        .await?;
    Ok(Some(result))
}
