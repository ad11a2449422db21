//! Membership expiry notifications.
//!
//! A daily sweep looks at three one-day windows relative to the sweep day:
//! memberships expiring in seven days, today, and yesterday. Each membership
//! is notified at most once per window kind. The dedup row is written only
//! after the notifier reports success, so a failed send is retried on the
//! next sweep, and a crash between send and write can repeat one send.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{NotifyError, StoreError};
use crate::types::{Membership, MembershipExpiryNotification, NotificationKind};

#[async_trait]
pub trait MembershipSource: Send + Sync {
    /// Memberships with `start <= expires_at < end`.
    async fn expiring_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Membership>, StoreError>;
}

/// The dedup ledger. At most one row per `(membership_id, kind)`.
#[async_trait]
pub trait NotificationLog: Send + Sync {
    async fn exists(&self, membership_id: Uuid, kind: NotificationKind) -> Result<bool, StoreError>;

    /// Returns false when the row already existed.
    async fn record(&self, row: MembershipExpiryNotification) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, dispatch: &NotificationDispatch) -> Result<(), NotifyError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchType {
    MembershipExpiryWarning,
    MembershipExpired,
}

/// The payload handed to the delivery collaborator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationDispatch {
    #[serde(rename = "type")]
    pub dispatch_type: DispatchType,
    pub recipient: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days_remaining: Option<u32>,
    pub expiry_date: NaiveDate,
    pub renewal_url: String,
}

impl NotificationDispatch {
    pub fn for_membership(kind: NotificationKind, membership: &Membership, renewal_url: &str) -> Self {
        let (dispatch_type, days_remaining) = match kind {
            NotificationKind::SevenDayWarning => (DispatchType::MembershipExpiryWarning, Some(7)),
            NotificationKind::DayOfWarning => (DispatchType::MembershipExpiryWarning, Some(0)),
            NotificationKind::Expired => (DispatchType::MembershipExpired, None),
        };
        Self {
            dispatch_type,
            recipient: membership.recipient.clone(),
            days_remaining,
            expiry_date: membership.expires_at.date_naive(),
            renewal_url: renewal_url.to_string(),
        }
    }
}

/// Logs notifications instead of delivering them.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, dispatch: &NotificationDispatch) -> Result<(), NotifyError> {
        tracing::info!(
            recipient = %dispatch.recipient,
            kind = ?dispatch.dispatch_type,
            expiry_date = %dispatch.expiry_date,
            "notification delivery not configured, logging only"
        );
        Ok(())
    }
}

/// POSTs each notification as JSON to a delivery service.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, dispatch: &NotificationDispatch) -> Result<(), NotifyError> {
        let resp = self.client.post(&self.url).json(dispatch).send().await?;
        if !resp.status().is_success() {
            return Err(NotifyError::Rejected(resp.status().as_u16()));
        }
        Ok(())
    }
}

/// `[start, end)` bounds of the window `kind` covers for a sweep at `now`.
pub fn window(kind: NotificationKind, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let day_start = now.date_naive().and_time(NaiveTime::MIN).and_utc();
    let start = day_start + Duration::days(kind.day_offset());
    (start, start + Duration::days(1))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepResult {
    /// Notifications delivered during this sweep.
    pub sent: u32,
    /// Memberships skipped because the dedup log already had their row.
    pub already_notified: u32,
    /// Memberships whose check or send failed; retried next sweep.
    pub failed: u32,
    /// Windows whose membership query failed.
    pub failed_windows: u32,
}

#[derive(Clone)]
pub struct ExpiryScheduler {
    memberships: Arc<dyn MembershipSource>,
    log: Arc<dyn NotificationLog>,
    notifier: Arc<dyn Notifier>,
    renewal_url: String,
}

impl ExpiryScheduler {
    pub fn new(
        memberships: Arc<dyn MembershipSource>,
        log: Arc<dyn NotificationLog>,
        notifier: Arc<dyn Notifier>,
        renewal_url: impl Into<String>,
    ) -> Self {
        Self {
            memberships,
            log,
            notifier,
            renewal_url: renewal_url.into(),
        }
    }

    /// Runs one sweep. Never fails as a whole; problems are counted and logged.
    pub async fn sweep(&self, now: DateTime<Utc>) -> SweepResult {
        let mut result = SweepResult::default();

        for kind in NotificationKind::ALL {
            let (start, end) = window(kind, now);
            let due = match self.memberships.expiring_between(start, end).await {
                Ok(due) => due,
                Err(e) => {
                    tracing::error!(kind = %kind, %start, %end, "failed to load expiring memberships: {e}");
                    result.failed_windows += 1;
                    continue;
                }
            };

            for membership in &due {
                self.notify_once(kind, membership, now, &mut result).await;
            }
        }

        tracing::info!(
            sent = result.sent,
            already_notified = result.already_notified,
            failed = result.failed,
            failed_windows = result.failed_windows,
            "membership expiry sweep finished"
        );
        result
    }

    async fn notify_once(
        &self,
        kind: NotificationKind,
        membership: &Membership,
        now: DateTime<Utc>,
        result: &mut SweepResult,
    ) {
        match self.log.exists(membership.id, kind).await {
            Ok(true) => {
                result.already_notified += 1;
                return;
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(membership_id = %membership.id, kind = %kind, "dedup lookup failed: {e}");
                result.failed += 1;
                return;
            }
        }

        let dispatch = NotificationDispatch::for_membership(kind, membership, &self.renewal_url);
        if let Err(e) = self.notifier.send(&dispatch).await {
            tracing::warn!(membership_id = %membership.id, kind = %kind, "notification failed: {e}");
            result.failed += 1;
            return;
        }
        result.sent += 1;

        let row = MembershipExpiryNotification {
            membership_id: membership.id,
            kind,
            user_id: membership.user_id,
            sent_at: now,
        };
        match self.log.record(row).await {
            Ok(true) => {
                tracing::info!(membership_id = %membership.id, kind = %kind, "expiry notification sent");
            }
            Ok(false) => {
                tracing::debug!(
                    membership_id = %membership.id,
                    kind = %kind,
                    "dedup row written by a concurrent sweep"
                );
            }
            Err(e) => {
                // The next sweep will send this one again.
                tracing::error!(
                    membership_id = %membership.id,
                    kind = %kind,
                    "failed to record sent notification: {e}"
                );
            }
        }
    }
}
