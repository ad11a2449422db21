//! Affiliate leaderboard.
//!
//! Always computed from the current commissions; never stored.

use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::error::LedgerError;
use crate::ledger::{CommissionStore, EarningsTotal};
use crate::referral::AffiliateDirectory;
use crate::types::{AffiliateIdentity, Commission, CommissionStatus};

/// Inclusive upper rank of each level, best first.
pub const LEVEL_BANDS: [(usize, &str); 5] = [
    (3, "Legends"),
    (6, "Champions"),
    (10, "Elites"),
    (15, "Rising Stars"),
    (20, "Dream Chasers"),
];

pub const BASE_LEVEL: &str = "Starter";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AffiliateRankingEntry {
    pub affiliate_id: Uuid,
    pub display_name: String,
    pub total_earnings: Decimal,
    pub referral_count: u64,
    /// 1-based.
    pub rank: usize,
    pub level: &'static str,
}

pub fn level_for_rank(rank: usize) -> &'static str {
    LEVEL_BANDS
        .iter()
        .find(|(upper, _)| rank <= *upper)
        .map(|(_, label)| *label)
        .unwrap_or(BASE_LEVEL)
}

/// Only onboarded affiliates with a display name appear on the leaderboard.
pub fn is_eligible(affiliate: &AffiliateIdentity) -> bool {
    affiliate.onboarded
        && affiliate
            .display_name
            .as_deref()
            .is_some_and(|name| !name.trim().is_empty())
}

/// Sums non-cancelled commissions per affiliate.
pub fn earnings_totals(commissions: &[Commission]) -> Vec<EarningsTotal> {
    let mut totals: HashMap<Uuid, EarningsTotal> = HashMap::new();
    for c in commissions
        .iter()
        .filter(|c| c.status != CommissionStatus::Cancelled)
    {
        let total = totals.entry(c.affiliate_id).or_insert(EarningsTotal {
            affiliate_id: c.affiliate_id,
            total_earnings: Decimal::ZERO,
            referral_count: 0,
        });
        total.total_earnings += c.commission_amount;
        total.referral_count += 1;
    }
    totals.into_values().collect()
}

pub fn compute_leaderboard(
    commissions: &[Commission],
    affiliates: &[AffiliateIdentity],
) -> Vec<AffiliateRankingEntry> {
    rank_totals(&earnings_totals(commissions), affiliates)
}

/// Ranks eligible affiliates by earnings, highest first.
///
/// Equal earnings are ordered by affiliate id ascending. Eligible affiliates
/// without any totals rank with zero earnings.
pub fn rank_totals(
    totals: &[EarningsTotal],
    affiliates: &[AffiliateIdentity],
) -> Vec<AffiliateRankingEntry> {
    let by_affiliate: HashMap<Uuid, &EarningsTotal> =
        totals.iter().map(|t| (t.affiliate_id, t)).collect();

    let mut entries: Vec<AffiliateRankingEntry> = affiliates
        .iter()
        .filter(|a| is_eligible(a))
        .map(|a| {
            let (total_earnings, referral_count) = by_affiliate
                .get(&a.id)
                .map(|t| (t.total_earnings, t.referral_count))
                .unwrap_or((Decimal::ZERO, 0));
            AffiliateRankingEntry {
                affiliate_id: a.id,
                display_name: a.display_name.clone().unwrap_or_default(),
                total_earnings,
                referral_count,
                rank: 0,
                level: BASE_LEVEL,
            }
        })
        .collect();

    entries.sort_by(|a, b| {
        b.total_earnings
            .cmp(&a.total_earnings)
            .then_with(|| a.affiliate_id.cmp(&b.affiliate_id))
    });

    for (idx, entry) in entries.iter_mut().enumerate() {
        entry.rank = idx + 1;
        entry.level = level_for_rank(entry.rank);
    }
    entries
}

/// Builds the leaderboard from the stores on every call.
#[derive(Clone)]
pub struct Leaderboard {
    commissions: Arc<dyn CommissionStore>,
    directory: Arc<dyn AffiliateDirectory>,
}

impl Leaderboard {
    pub fn new(commissions: Arc<dyn CommissionStore>, directory: Arc<dyn AffiliateDirectory>) -> Self {
        Self {
            commissions,
            directory,
        }
    }

    pub async fn compute(&self) -> Result<Vec<AffiliateRankingEntry>, LedgerError> {
        let totals = self.commissions.earnings_totals().await?;
        let affiliates = self.directory.list().await?;
        Ok(rank_totals(&totals, &affiliates))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::types::CommissionSource;

    fn affiliate(id: u128, name: &str) -> AffiliateIdentity {
        AffiliateIdentity {
            id: Uuid::from_u128(id),
            referral_id: Uuid::new_v4(),
            referral_code: format!("AFF{id}"),
            display_name: Some(name.to_string()),
            payout_currency: "USD".into(),
            commission_rate: None,
            onboarded: true,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    fn commission(affiliate: &AffiliateIdentity, amount: Decimal) -> Commission {
        Commission {
            id: Uuid::new_v4(),
            payment_id: Uuid::new_v4().to_string(),
            affiliate_id: affiliate.id,
            referral_id: affiliate.referral_id,
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

    #[test]
    fn level_bands() {
        let expected = [
            (1, "Legends"),
            (3, "Legends"),
            (4, "Champions"),
            (6, "Champions"),
            (7, "Elites"),
            (10, "Elites"),
            (11, "Rising Stars"),
            (15, "Rising Stars"),
            (16, "Dream Chasers"),
            (20, "Dream Chasers"),
            (21, "Starter"),
            (500, "Starter"),
        ];
        for (rank, level) in expected {
            assert_eq!(level_for_rank(rank), level, "rank {rank}");
        }
    }

    #[test]
    fn sums_and_counts_per_affiliate() {
        let a = affiliate(1, "Ama");
        let b = affiliate(2, "Kofi");
        let commissions = vec![
            commission(&a, dec!(10)),
            commission(&b, dec!(40)),
            commission(&a, dec!(15.50)),
        ];

        let board = compute_leaderboard(&commissions, &[a.clone(), b.clone()]);

        assert_eq!(board[0].affiliate_id, b.id);
        assert_eq!(board[0].total_earnings, dec!(40));
        assert_eq!(board[0].referral_count, 1);
        assert_eq!(board[0].rank, 1);
        assert_eq!(board[1].affiliate_id, a.id);
        assert_eq!(board[1].total_earnings, dec!(25.50));
        assert_eq!(board[1].referral_count, 2);
        assert_eq!(board[1].rank, 2);
    }

    #[test]
    fn ties_break_by_affiliate_id() {
        let low = affiliate(5, "Low id");
        let high = affiliate(9, "High id");
        let commissions = vec![commission(&high, dec!(30)), commission(&low, dec!(30))];

        for affiliates in [
            vec![high.clone(), low.clone()],
            vec![low.clone(), high.clone()],
        ] {
            let board = compute_leaderboard(&commissions, &affiliates);
            assert_eq!(board[0].affiliate_id, low.id);
            assert_eq!(board[1].affiliate_id, high.id);
        }

        let mut reversed = commissions.clone();
        reversed.reverse();
        assert_eq!(
            compute_leaderboard(&commissions, &[high.clone(), low.clone()]),
            compute_leaderboard(&reversed, &[low, high]),
        );
    }

    #[test]
    fn affiliates_without_commissions_rank_last_with_zero() {
        let earner = affiliate(1, "Earner");
        let idle = affiliate(2, "Idle");

        let board = compute_leaderboard(&[commission(&earner, dec!(1))], &[idle.clone(), earner]);

        assert_eq!(board.len(), 2);
        assert_eq!(board[1].affiliate_id, idle.id);
        assert_eq!(board[1].total_earnings, Decimal::ZERO);
        assert_eq!(board[1].referral_count, 0);
    }

    #[test]
    fn ineligible_affiliates_are_excluded() {
        let ok = affiliate(1, "Ready");
        let mut not_onboarded = affiliate(2, "New");
        not_onboarded.onboarded = false;
        let mut nameless = affiliate(3, "");
        nameless.display_name = Some("   ".into());
        let mut unnamed = affiliate(4, "");
        unnamed.display_name = None;

        let commissions = vec![
            commission(&not_onboarded, dec!(100)),
            commission(&nameless, dec!(100)),
            commission(&unnamed, dec!(100)),
        ];
        let board = compute_leaderboard(&commissions, &[ok.clone(), not_onboarded, nameless, unnamed]);

        assert_eq!(board.len(), 1);
        assert_eq!(board[0].affiliate_id, ok.id);
        assert_eq!(board[0].rank, 1);
    }

    #[test]
    fn cancelled_commissions_do_not_count() {
        let a = affiliate(1, "Ama");
        let mut reversed = commission(&a, dec!(50));
        reversed.status = CommissionStatus::Cancelled;
        let mut paid = commission(&a, dec!(5));
        paid.status = CommissionStatus::Paid;

        let board = compute_leaderboard(&[reversed, paid], &[a]);
        assert_eq!(board[0].total_earnings, dec!(5));
        assert_eq!(board[0].referral_count, 1);
    }

    #[test]
    fn levels_follow_rank() {
        let affiliates: Vec<_> = (1..=22).map(|i| affiliate(i, &format!("A{i}"))).collect();
        let commissions: Vec<_> = affiliates
            .iter()
            .enumerate()
            .map(|(i, a)| commission(a, Decimal::from(100 - i as i64)))
            .collect();

        let board = compute_leaderboard(&commissions, &affiliates);
        assert_eq!(board[0].level, "Legends");
        assert_eq!(board[3].level, "Champions");
        assert_eq!(board[9].level, "Elites");
        assert_eq!(board[14].level, "Rising Stars");
        assert_eq!(board[19].level, "Dream Chasers");
        assert_eq!(board[21].level, "Starter");
        assert_eq!(board[21].rank, 22);
    }

    #[tokio::test]
    async fn leaderboard_reads_current_store_state() {
        use crate::ledger::{CommissionStore, InsertOutcome};
        use crate::memory::{MemoryAffiliateDirectory, MemoryCommissionStore};

        let store = Arc::new(MemoryCommissionStore::default());
        let directory = Arc::new(MemoryAffiliateDirectory::default());
        let a = affiliate(1, "Ama");
        directory.upsert(a.clone()).await.unwrap();
        let board = Leaderboard::new(store.clone(), directory);

        assert_eq!(board.compute().await.unwrap()[0].total_earnings, Decimal::ZERO);

        let outcome = store.insert(&commission(&a, dec!(12))).await.unwrap();
        assert!(matches!(outcome, InsertOutcome::Inserted(_)));
        assert_eq!(board.compute().await.unwrap()[0].total_earnings, dec!(12));
    }
}
