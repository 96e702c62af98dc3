use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{BidStatus, BidWithLoanAmount, Loan, OfficerId, UserId};

/// Loan officer profile as seen by the marketplace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfficerProfile {
    pub id: OfficerId,
    pub user_id: UserId,
    pub nmls_id: String,
    pub company_name: String,
    /// Billing-derived; read, never written, by the marketplace
    pub is_active: bool,
    #[serde(flatten)]
    pub preferences: LoanPreferences,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOfficer {
    pub user_id: UserId,
    pub nmls_id: String,
    pub company_name: String,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub preferences: LoanPreferences,
}

fn default_active() -> bool {
    true
}

impl NewOfficer {
    pub fn into_profile(self, id: OfficerId, now: DateTime<Utc>) -> OfficerProfile {
        OfficerProfile {
            id,
            user_id: self.user_id,
            nmls_id: self.nmls_id,
            company_name: self.company_name,
            is_active: self.is_active,
            preferences: self.preferences,
            created_at: now,
        }
    }
}

/// Lead preferences used when recommending guaranteed loans
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoanPreferences {
    #[serde(default)]
    pub min_loan_amount: Option<Decimal>,
    #[serde(default)]
    pub max_loan_amount: Option<Decimal>,
    #[serde(default)]
    pub min_credit_score: Option<i32>,
    /// Empty means any location
    #[serde(default)]
    pub preferred_locations: Vec<String>,
}

impl LoanPreferences {
    pub fn matches(&self, loan: &Loan) -> bool {
        if self.min_loan_amount.is_some_and(|min| loan.amount < min) {
            return false;
        }
        if self.max_loan_amount.is_some_and(|max| loan.amount > max) {
            return false;
        }
        if self.min_credit_score.is_some_and(|min| loan.fico_score < min) {
            return false;
        }
        self.preferred_locations.is_empty()
            || self
                .preferred_locations
                .iter()
                .any(|loc| loc.eq_ignore_ascii_case(&loan.location))
    }
}

/// Performance figures derived from an officer's bids
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OfficerMetrics {
    pub active_bids_count: i64,
    pub total_loans_won: i64,
    /// Percent of settled bids that were accepted
    pub success_rate: Decimal,
    pub total_value: Decimal,
}

impl OfficerMetrics {
    pub fn from_bids(bids: &[BidWithLoanAmount]) -> Self {
        let mut metrics = Self::default();
        let mut settled = 0i64;
        for entry in bids {
            match entry.bid.status {
                BidStatus::Active => metrics.active_bids_count += 1,
                BidStatus::Accepted => {
                    metrics.total_loans_won += 1;
                    metrics.total_value += entry.loan_amount;
                    settled += 1;
                }
                _ => settled += 1,
            }
        }
        if settled > 0 {
            metrics.success_rate = (Decimal::from(metrics.total_loans_won)
                / Decimal::from(settled)
                * Decimal::ONE_HUNDRED)
                .round_dp(2);
        }
        metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::loan::fixtures::loan;
    use crate::domain::Bid;
    use rust_decimal_macros::dec;

    fn bid(id: i64, status: BidStatus, amount: Decimal) -> BidWithLoanAmount {
        let now = Utc::now();
        BidWithLoanAmount {
            bid: Bid {
                id,
                loan_id: id,
                officer_id: 1,
                rate: dec!(4.5),
                status,
                is_lowest: false,
                is_final: status == BidStatus::Accepted,
                rebid_count: 0,
                created_at: now,
                updated_at: now,
            },
            loan_amount: amount,
        }
    }

    #[test]
    fn metrics_ignore_active_bids_in_success_rate() {
        let bids = vec![
            bid(1, BidStatus::Active, dec!(100000)),
            bid(2, BidStatus::Accepted, dec!(250000)),
            bid(3, BidStatus::Rejected, dec!(300000)),
            bid(4, BidStatus::Outbid, dec!(300000)),
        ];
        let m = OfficerMetrics::from_bids(&bids);
        assert_eq!(m.active_bids_count, 1);
        assert_eq!(m.total_loans_won, 1);
        assert_eq!(m.total_value, dec!(250000));
        assert_eq!(m.success_rate, dec!(33.33));
    }

    #[test]
    fn metrics_without_settled_bids_report_zero_rate() {
        let m = OfficerMetrics::from_bids(&[bid(1, BidStatus::Active, dec!(1))]);
        assert_eq!(m.success_rate, Decimal::ZERO);
    }

    #[test]
    fn preferences_match_bounds_and_locations() {
        let l = loan(1);
        assert!(LoanPreferences::default().matches(&l));

        let prefs = LoanPreferences {
            min_loan_amount: Some(dec!(100000)),
            max_loan_amount: Some(dec!(500000)),
            min_credit_score: Some(700),
            preferred_locations: vec!["ny".into(), "ca".into()],
        };
        assert!(prefs.matches(&l));

        let strict = LoanPreferences {
            min_credit_score: Some(750),
            ..prefs
        };
        assert!(!strict.matches(&l));
    }
}
