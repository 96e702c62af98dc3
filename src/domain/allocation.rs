//! Guaranteed-pool credit rules

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{LeadType, Loan, LoanId, OfficerId};
use crate::error::{MarketError, Result};

/// Thresholds and credit policy for the guaranteed pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuaranteedRules {
    pub min_fico: i32,
    pub max_amount: Decimal,
    pub default_credits: i32,
    pub credit_reset_days: i64,
}

impl Default for GuaranteedRules {
    fn default() -> Self {
        Self {
            min_fico: 680,
            max_amount: Decimal::from(1_000_000),
            default_credits: 3,
            credit_reset_days: 30,
        }
    }
}

/// Per-officer claim budget
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuaranteedAllocation {
    pub officer_id: OfficerId,
    pub credits_available: i32,
    pub credits_used: i32,
    pub reset_date: DateTime<Utc>,
}

impl GuaranteedAllocation {
    pub fn fresh(officer_id: OfficerId, rules: &GuaranteedRules, now: DateTime<Utc>) -> Self {
        Self {
            officer_id,
            credits_available: rules.default_credits,
            credits_used: 0,
            reset_date: now + Duration::days(rules.credit_reset_days),
        }
    }

    pub fn needs_reset(&self, now: DateTime<Utc>) -> bool {
        self.reset_date <= now
    }

    /// Restore the full budget and push the reset date forward.
    ///
    /// Returns false when the reset date has not passed yet.
    pub fn reset_if_due(&mut self, rules: &GuaranteedRules, now: DateTime<Utc>) -> bool {
        if !self.needs_reset(now) {
            return false;
        }
        self.credits_available = rules.default_credits;
        self.credits_used = 0;
        let period = Duration::days(rules.credit_reset_days.max(1));
        while self.reset_date <= now {
            self.reset_date += period;
        }
        true
    }

    pub fn consume_credit(&mut self) -> Result<()> {
        if self.credits_available <= 0 {
            return Err(MarketError::NoCreditsAvailable);
        }
        self.credits_available -= 1;
        self.credits_used += 1;
        Ok(())
    }
}

/// Link between a loan held in the guaranteed pool and its officer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuaranteedAssignment {
    pub id: i64,
    pub loan_id: LoanId,
    pub officer_id: OfficerId,
    pub assigned_at: DateTime<Utc>,
}

pub fn is_eligible_for_guaranteed(loan: &Loan, rules: &GuaranteedRules) -> bool {
    loan.is_open()
        && loan.fico_score >= rules.min_fico
        && loan.amount <= rules.max_amount
        && !loan.is_guaranteed
        && loan.lead_type != LeadType::Competitive
}

/// Validate a claim from a locked snapshot.
///
/// Checks run in a fixed order: existing assignment, eligibility, credits.
/// The allocation must already have had its lazy reset applied.
pub fn check_claim(
    loan: &Loan,
    already_assigned: bool,
    allocation: Option<&GuaranteedAllocation>,
    rules: &GuaranteedRules,
) -> Result<()> {
    if already_assigned {
        return Err(MarketError::AlreadyAssigned { loan_id: loan.id });
    }
    if !is_eligible_for_guaranteed(loan, rules) {
        return Err(MarketError::LoanUnavailable(
            "loan is not eligible for the guaranteed pool".to_string(),
        ));
    }
    match allocation {
        Some(alloc) if alloc.credits_available > 0 => Ok(()),
        _ => Err(MarketError::NoCreditsAvailable),
    }
}

pub fn apply_claim_to_loan(loan: &mut Loan, now: DateTime<Utc>) {
    loan.is_guaranteed = true;
    loan.lead_type = LeadType::Guaranteed;
    loan.updated_at = now;
}

/// Release a loan back to competitive bidding. Returns whether anything changed.
pub fn apply_conversion(loan: &mut Loan, now: DateTime<Utc>) -> bool {
    if !loan.is_guaranteed && loan.lead_type == LeadType::Competitive {
        return false;
    }
    loan.is_guaranteed = false;
    loan.lead_type = LeadType::Competitive;
    loan.updated_at = now;
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::loan::fixtures::loan;
    use crate::domain::LoanStatus;
    use rust_decimal_macros::dec;

    fn guaranteed_loan(id: LoanId) -> Loan {
        let mut l = loan(id);
        l.lead_type = LeadType::Guaranteed;
        l
    }

    #[test]
    fn eligibility_applies_each_threshold() {
        let rules = GuaranteedRules::default();
        assert!(is_eligible_for_guaranteed(&guaranteed_loan(1), &rules));

        let mut l = guaranteed_loan(1);
        l.fico_score = 679;
        assert!(!is_eligible_for_guaranteed(&l, &rules));

        let mut l = guaranteed_loan(1);
        l.amount = dec!(1000000.01);
        assert!(!is_eligible_for_guaranteed(&l, &rules));

        let mut l = guaranteed_loan(1);
        l.is_guaranteed = true;
        assert!(!is_eligible_for_guaranteed(&l, &rules));

        let mut l = guaranteed_loan(1);
        l.status = LoanStatus::InProgress;
        assert!(!is_eligible_for_guaranteed(&l, &rules));

        // Competitive leads stay in the auction.
        assert!(!is_eligible_for_guaranteed(&loan(1), &rules));
    }

    #[test]
    fn claim_checks_run_in_order() {
        let rules = GuaranteedRules::default();
        let now = Utc::now();
        let mut alloc = GuaranteedAllocation::fresh(7, &rules, now);

        let l = guaranteed_loan(1);
        assert!(matches!(
            check_claim(&l, true, Some(&alloc), &rules),
            Err(MarketError::AlreadyAssigned { loan_id: 1 })
        ));
        assert!(matches!(
            check_claim(&loan(2), false, Some(&alloc), &rules),
            Err(MarketError::LoanUnavailable(_))
        ));
        assert!(matches!(
            check_claim(&l, false, None, &rules),
            Err(MarketError::NoCreditsAvailable)
        ));

        alloc.credits_available = 0;
        assert!(matches!(
            check_claim(&l, false, Some(&alloc), &rules),
            Err(MarketError::NoCreditsAvailable)
        ));
    }

    #[test]
    fn consuming_conserves_total_credits() {
        let rules = GuaranteedRules::default();
        let mut alloc = GuaranteedAllocation::fresh(7, &rules, Utc::now());
        for _ in 0..3 {
            alloc.consume_credit().unwrap();
            assert_eq!(alloc.credits_available + alloc.credits_used, 3);
        }
        assert!(matches!(
            alloc.consume_credit(),
            Err(MarketError::NoCreditsAvailable)
        ));
        assert_eq!(alloc.credits_available, 0);
    }

    #[test]
    fn reset_restores_budget_once_due() {
        let rules = GuaranteedRules::default();
        let now = Utc::now();
        let mut alloc = GuaranteedAllocation::fresh(7, &rules, now);
        alloc.consume_credit().unwrap();
        assert!(!alloc.reset_if_due(&rules, now));

        alloc.reset_date = now - Duration::days(45);
        assert!(alloc.reset_if_due(&rules, now));
        assert_eq!(alloc.credits_available, 3);
        assert_eq!(alloc.credits_used, 0);
        assert!(alloc.reset_date > now);
    }

    #[test]
    fn conversion_never_touches_credits_and_reports_change() {
        let now = Utc::now();
        let mut l = guaranteed_loan(1);
        apply_claim_to_loan(&mut l, now);
        assert!(l.is_guaranteed);

        assert!(apply_conversion(&mut l, now));
        assert!(!l.is_guaranteed);
        assert_eq!(l.lead_type, LeadType::Competitive);
        assert!(!apply_conversion(&mut l, now));
    }
}
