use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::info;

use super::active_officer;
use crate::domain::{
    recommend, routing_score, GuaranteedAllocation, GuaranteedRules, Loan, LoanId,
    NotificationEvent, OfficerId,
};
use crate::error::{MarketError, Result};
use crate::ledger::{ClaimedLoan, LedgerStore};
use crate::notify::Notifier;

/// What an officer sees on the guaranteed board
#[derive(Debug, Clone, Serialize)]
pub struct GuaranteedDashboard {
    /// Loans the officer already holds that are still AVAILABLE
    pub held: Vec<Loan>,
    /// Unreserved suggestions topping `held` up to the display limit
    pub recommended: Vec<Loan>,
    pub allocation: Option<GuaranteedAllocation>,
}

#[derive(Clone)]
pub struct AllocationEngine {
    ledger: Arc<dyn LedgerStore>,
    notifier: Notifier,
    rules: GuaranteedRules,
    recommendation_limit: usize,
}

impl AllocationEngine {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        notifier: Notifier,
        rules: GuaranteedRules,
        recommendation_limit: usize,
    ) -> Self {
        Self {
            ledger,
            notifier,
            rules,
            recommendation_limit,
        }
    }

    pub fn rules(&self) -> &GuaranteedRules {
        &self.rules
    }

    /// Spend one of the officer's credits to take the loan into their pool.
    pub async fn assign_to_guaranteed_pool(
        &self,
        loan_id: LoanId,
        officer_id: OfficerId,
    ) -> Result<ClaimedLoan> {
        active_officer(self.ledger.as_ref(), officer_id).await?;
        let claimed = self
            .ledger
            .claim_guaranteed(loan_id, officer_id, &self.rules, Utc::now())
            .await?;
        info!(
            loan_id,
            officer_id,
            credits_left = claimed.allocation.credits_available,
            "loan assigned to guaranteed pool"
        );

        self.notifier
            .notify_officers([(officer_id, NotificationEvent::LoanAssigned { loan_id })])
            .await;
        Ok(claimed)
    }

    /// Release a guaranteed loan to the auction. The spent credit is not refunded.
    pub async fn convert_to_competitive(&self, loan_id: LoanId) -> Result<bool> {
        let changed = self
            .ledger
            .convert_to_competitive(loan_id, Utc::now())
            .await?;
        if changed {
            info!(loan_id, "loan converted to competitive");
        }
        Ok(changed)
    }

    pub async fn get_guaranteed_recommendations(
        &self,
        officer_id: OfficerId,
        limit: usize,
    ) -> Result<Vec<Loan>> {
        let officer = self
            .ledger
            .officer(officer_id)
            .await?
            .ok_or_else(|| MarketError::not_found("officer", officer_id))?;
        let loans = self.ledger.open_loans().await?;
        let assigned = self.ledger.assigned_loan_ids().await?;
        Ok(recommend(
            &loans,
            &officer.preferences,
            &assigned,
            &self.rules,
            limit,
        ))
    }

    pub async fn guaranteed_dashboard(&self, officer_id: OfficerId) -> Result<GuaranteedDashboard> {
        let mut held = Vec::new();
        for assignment in self.ledger.assignments_for_officer(officer_id).await? {
            if let Some(loan) = self.ledger.loan(assignment.loan_id).await? {
                if loan.is_open() {
                    held.push(loan);
                }
            }
        }

        let remaining = self.recommendation_limit.saturating_sub(held.len());
        let recommended = if remaining > 0 {
            self.get_guaranteed_recommendations(officer_id, remaining)
                .await?
        } else {
            Vec::new()
        };

        Ok(GuaranteedDashboard {
            held,
            recommended,
            allocation: self.ledger.allocation(officer_id).await?,
        })
    }

    /// Give an officer a fresh allocation unless one already exists.
    pub async fn ensure_allocation(&self, officer_id: OfficerId) -> Result<GuaranteedAllocation> {
        if let Some(existing) = self.ledger.allocation(officer_id).await? {
            return Ok(existing);
        }
        let allocation = GuaranteedAllocation::fresh(officer_id, &self.rules, Utc::now());
        self.ledger.upsert_allocation(&allocation).await?;
        Ok(allocation)
    }

    pub async fn rescore(&self, loan_id: LoanId) -> Result<Decimal> {
        let loan = self
            .ledger
            .loan(loan_id)
            .await?
            .ok_or_else(|| MarketError::not_found("loan", loan_id))?;
        let score = routing_score(&loan);
        self.ledger.set_routing_score(loan_id, score).await?;
        Ok(score)
    }

    /// Recompute the routing score of every open loan; returns how many.
    pub async fn rescore_open_loans(&self) -> Result<usize> {
        let loans = self.ledger.open_loans().await?;
        for loan in &loans {
            self.ledger
                .set_routing_score(loan.id, routing_score(loan))
                .await?;
        }
        info!(count = loans.len(), "routing scores recomputed");
        Ok(loans.len())
    }
}
