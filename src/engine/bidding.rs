use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::info;

use super::active_officer;
use crate::domain::{
    Bid, BidId, BidWithLoanAmount, CompetitiveFilter, Loan, LoanId, NotificationEvent, OfficerId,
    OfficerMetrics,
};
use crate::error::{MarketError, Result};
use crate::identity::Identity;
use crate::ledger::{AcceptedBid, LedgerStore, PlacedBid};
use crate::notify::Notifier;

/// One row of the competitive board
#[derive(Debug, Clone, Serialize)]
pub struct CompetitiveLoan {
    #[serde(flatten)]
    pub loan: Loan,
    /// Lowest ACTIVE rate on the loan
    pub best_offer: Option<Decimal>,
    /// The caller's own ACTIVE bid, if any
    pub my_bid: Option<Bid>,
    pub ltv_ratio: Option<Decimal>,
    pub days_remaining: Option<i64>,
}

#[derive(Clone)]
pub struct BiddingEngine {
    ledger: Arc<dyn LedgerStore>,
    notifier: Notifier,
}

impl BiddingEngine {
    pub fn new(ledger: Arc<dyn LedgerStore>, notifier: Notifier) -> Self {
        Self { ledger, notifier }
    }

    /// Place a bid of `rate` on a competitive loan. Rates carry at most two decimals.
    pub async fn place_bid(
        &self,
        loan_id: LoanId,
        officer_id: OfficerId,
        rate: Decimal,
    ) -> Result<PlacedBid> {
        let mut rate = rate.normalize();
        if rate.scale() > 2 {
            return Err(MarketError::InvalidBid(format!(
                "rate {} has more than two decimal places",
                rate
            )));
        }
        rate.rescale(2);
        active_officer(self.ledger.as_ref(), officer_id).await?;

        let placed = self
            .ledger
            .place_bid(loan_id, officer_id, rate, Utc::now())
            .await?;
        info!(
            loan_id,
            officer_id,
            bid_id = placed.bid.id,
            %rate,
            outbid = placed.outbid.len(),
            "bid placed"
        );

        let deliveries: Vec<_> = placed
            .outbid
            .iter()
            .map(|displaced| {
                (
                    displaced.officer_id,
                    NotificationEvent::Outbid {
                        loan_id,
                        new_rate: rate,
                    },
                )
            })
            .collect();
        self.notifier.notify_officers(deliveries).await;
        self.notifier.publish_bid_update(&placed.loan);
        Ok(placed)
    }

    /// Accept a bid on behalf of an administrator or the loan's borrower.
    pub async fn accept_bid(&self, actor: Identity, bid_id: BidId) -> Result<AcceptedBid> {
        let bid = self
            .ledger
            .bid(bid_id)
            .await?
            .ok_or_else(|| MarketError::not_found("bid", bid_id))?;
        let loan = self
            .ledger
            .loan(bid.loan_id)
            .await?
            .ok_or_else(|| MarketError::not_found("loan", bid.loan_id))?;

        if !actor.is_admin() {
            let borrower = self.ledger.borrower(loan.borrower_id).await?;
            let owns_loan = borrower.is_some_and(|b| b.user_id == Some(actor.user_id));
            if !owns_loan {
                return Err(MarketError::NotAuthorized(
                    "only the borrower or an administrator can accept bids".to_string(),
                ));
            }
        }

        let accepted = self.ledger.accept_bid(bid_id, Utc::now()).await?;
        let plan = &accepted.plan;
        info!(
            loan_id = plan.loan_id,
            bid_id,
            officer_id = plan.winning_officer_id,
            rejected = plan.rejected.len(),
            "bid accepted, loan closed"
        );

        let mut deliveries = vec![(
            plan.winning_officer_id,
            NotificationEvent::BidWon {
                loan_id: plan.loan_id,
                bid_id,
                rate: bid.rate,
            },
        )];
        deliveries.extend(
            plan.losing_officers()
                .into_iter()
                .map(|officer| (officer, NotificationEvent::BidLost { loan_id: plan.loan_id })),
        );
        self.notifier.notify_officers(deliveries).await;
        self.notifier.publish_loan_closed(&accepted.loan);
        Ok(accepted)
    }

    pub async fn loan(&self, loan_id: LoanId) -> Result<Loan> {
        self.ledger
            .loan(loan_id)
            .await?
            .ok_or_else(|| MarketError::not_found("loan", loan_id))
    }

    /// Open competitive loans with the current best offer and the caller's bid.
    pub async fn competitive_loans(
        &self,
        officer_id: Option<OfficerId>,
        filter: &CompetitiveFilter,
    ) -> Result<Vec<CompetitiveLoan>> {
        let loans = self.ledger.competitive_loans(filter).await?;
        let ids: Vec<LoanId> = loans.iter().map(|l| l.id).collect();
        let active = self.ledger.active_bids_for_loans(&ids).await?;

        let mut best: HashMap<LoanId, Decimal> = HashMap::new();
        let mut mine: HashMap<LoanId, Bid> = HashMap::new();
        for bid in active {
            best.entry(bid.loan_id)
                .and_modify(|rate| *rate = (*rate).min(bid.rate))
                .or_insert(bid.rate);
            if Some(bid.officer_id) == officer_id {
                // Keep the officer's most recent active bid.
                let newer = mine.get(&bid.loan_id).map_or(true, |b| b.id < bid.id);
                if newer {
                    mine.insert(bid.loan_id, bid);
                }
            }
        }

        let now = Utc::now();
        Ok(loans
            .into_iter()
            .map(|loan| CompetitiveLoan {
                best_offer: best.get(&loan.id).copied(),
                my_bid: mine.remove(&loan.id),
                ltv_ratio: loan.ltv_ratio(),
                days_remaining: loan.days_remaining(now),
                loan,
            })
            .collect())
    }

    pub async fn bid_history(&self, officer_id: OfficerId) -> Result<Vec<BidWithLoanAmount>> {
        self.ledger.bids_by_officer(officer_id).await
    }

    pub async fn won_loans(&self, officer_id: OfficerId) -> Result<Vec<Loan>> {
        self.ledger.won_loans(officer_id).await
    }

    pub async fn metrics(&self, officer_id: OfficerId) -> Result<OfficerMetrics> {
        let bids = self.ledger.bids_by_officer(officer_id).await?;
        Ok(OfficerMetrics::from_bids(&bids))
    }
}
