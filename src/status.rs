//! Payout lifecycle of a commission.
//!
//! ```text
//! pending ──approve──▶ available ──mark_paid──▶ paid
//!    │                     │
//!    └──────reject─────────┴──────reject──────▶ cancelled
//! ```
//!
//! `paid` and `cancelled` are terminal.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::LedgerError;
use crate::types::CommissionStatus;

/// An administrative action on a commission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommissionAction {
    Approve,
    Reject,
    MarkPaid,
}

impl CommissionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommissionAction::Approve => "approve",
            CommissionAction::Reject => "reject",
            CommissionAction::MarkPaid => "mark_paid",
        }
    }
}

impl fmt::Display for CommissionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommissionAction {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approve" => Ok(CommissionAction::Approve),
            "reject" => Ok(CommissionAction::Reject),
            "mark_paid" => Ok(CommissionAction::MarkPaid),
            other => Err(LedgerError::InvalidAction(other.to_string())),
        }
    }
}

/// Returns the status `action` moves a commission in `from` to.
pub fn transition(
    from: CommissionStatus,
    action: CommissionAction,
) -> Result<CommissionStatus, LedgerError> {
    use CommissionAction::*;
    use CommissionStatus::*;

    let invalid = || LedgerError::InvalidTransition {
        from,
        action: action.as_str(),
    };
    if from.is_terminal() {
        return Err(invalid());
    }

    match (from, action) {
        (Pending, Approve) => Ok(Available),
        (Pending | Available, Reject) => Ok(Cancelled),
        (Available, MarkPaid) => Ok(Paid),
        _ => Err(invalid()),
    }
}
