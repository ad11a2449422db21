use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A persisted value that does not name any known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} `{value}`")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownVariant {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// A completed payment, as reported by the payment verification step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentEvent {
    /// The gateway's payment ID. Globally unique.
    pub payment_id: String,
    /// The gross amount, in `currency`.
    pub amount: Decimal,
    /// The ISO currency code of the payment.
    pub currency: String,
    /// The referral code carried in the payment metadata, if any.
    pub referral_code: Option<String>,
    /// When the payment completed.
    pub occurred_at: DateTime<Utc>,
}

/// A user holding affiliate capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AffiliateIdentity {
    /// The ID of the affiliate.
    pub id: Uuid,
    /// The ID of the affiliate's referral link.
    pub referral_id: Uuid,
    /// The shareable referral code. Unique across affiliates.
    pub referral_code: String,
    /// The name shown on the leaderboard.
    pub display_name: Option<String>,
    /// The currency the affiliate wants to be paid out in.
    pub payout_currency: String,
    /// Overrides the system default commission rate when set.
    pub commission_rate: Option<Decimal>,
    /// Whether the affiliate finished onboarding.
    pub onboarded: bool,
    /// Deactivated affiliates no longer resolve from their referral code.
    pub is_active: bool,
    /// The timestamp when the affiliate was created.
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommissionStatus {
    Pending,
    Available,
    Paid,
    Cancelled,
}

impl CommissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommissionStatus::Pending => "pending",
            CommissionStatus::Available => "available",
            CommissionStatus::Paid => "paid",
            CommissionStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CommissionStatus::Paid | CommissionStatus::Cancelled)
    }
}

impl fmt::Display for CommissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommissionStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(CommissionStatus::Pending),
            "available" => Ok(CommissionStatus::Available),
            "paid" => Ok(CommissionStatus::Paid),
            "cancelled" => Ok(CommissionStatus::Cancelled),
            other => Err(UnknownVariant::new("commission status", other)),
        }
    }
}

/// What triggered the commission to be recorded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommissionSource {
    #[default]
    Webhook,
    Verification,
    Manual,
}

impl CommissionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommissionSource::Webhook => "webhook",
            CommissionSource::Verification => "verification",
            CommissionSource::Manual => "manual",
        }
    }
}

impl FromStr for CommissionSource {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "webhook" => Ok(CommissionSource::Webhook),
            "verification" => Ok(CommissionSource::Verification),
            "manual" => Ok(CommissionSource::Manual),
            other => Err(UnknownVariant::new("commission source", other)),
        }
    }
}

/// An affiliate's share of one completed payment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commission {
    /// The ID of the commission.
    pub id: Uuid,
    /// The payment this commission was earned on. Unique across commissions.
    pub payment_id: String,
    /// The ID of the affiliate who earned it.
    pub affiliate_id: Uuid,
    /// The ID of the referral that attributed the payment.
    pub referral_id: Uuid,
    pub source: CommissionSource,
    /// The payment amount in its original currency.
    pub base_amount: Decimal,
    pub base_currency: String,
    /// The rate applied when the commission was created. Never recomputed.
    pub commission_rate: Decimal,
    /// The earned amount in the reference currency.
    pub commission_amount: Decimal,
    pub commission_currency: String,
    pub status: CommissionStatus,
    pub created_at: DateTime<Utc>,
    /// Set only on the transition into `paid`.
    pub paid_at: Option<DateTime<Utc>>,
}

/// A membership that can expire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Membership {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Where notifications for this membership are delivered.
    pub recipient: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    SevenDayWarning,
    DayOfWarning,
    Expired,
}

impl NotificationKind {
    pub const ALL: [NotificationKind; 3] = [
        NotificationKind::SevenDayWarning,
        NotificationKind::DayOfWarning,
        NotificationKind::Expired,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::SevenDayWarning => "seven_day_warning",
            NotificationKind::DayOfWarning => "day_of_warning",
            NotificationKind::Expired => "expired",
        }
    }

    /// Days between the start of the sweep day and the start of the
    /// expiry day for memberships of this kind.
    pub fn day_offset(&self) -> i64 {
        match self {
            NotificationKind::SevenDayWarning => 7,
            NotificationKind::DayOfWarning => 0,
            NotificationKind::Expired => -1,
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "seven_day_warning" => Ok(NotificationKind::SevenDayWarning),
            "day_of_warning" => Ok(NotificationKind::DayOfWarning),
            "expired" => Ok(NotificationKind::Expired),
            other => Err(UnknownVariant::new("notification kind", other)),
        }
    }
}

/// A row of the notification dedup log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MembershipExpiryNotification {
    pub membership_id: Uuid,
    pub kind: NotificationKind,
    pub user_id: Uuid,
    pub sent_at: DateTime<Utc>,
}
