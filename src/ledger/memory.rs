//! In-process ledger for tests and `serve --memory`
//!
//! All tables sit behind one async mutex, so every method is a serialized
//! transaction. Methods plan first and mutate only after validation passes.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use super::{AcceptedBid, ClaimedLoan, ExpiredLoan, LedgerStore, PlacedBid};
use crate::domain::{
    apply_claim_to_loan, apply_conversion, check_claim, plan_acceptance, plan_bid, plan_expiry,
    Bid, BidId, BidWithLoanAmount, Borrower, BorrowerId, CommunicationPreferences,
    CompetitiveFilter, GuaranteedAllocation, GuaranteedAssignment, GuaranteedRules, Loan, LoanId,
    LoanStatus, DEFAULT_MAX_BIDS, NewBorrower, NewLoan, NewNotification, NewOfficer, Notification, NotificationId,
    OfficerId, OfficerProfile, UserId,
};
use crate::error::{MarketError, Result};

#[derive(Default)]
struct Tables {
    next_id: i64,
    officers: BTreeMap<OfficerId, OfficerProfile>,
    borrowers: BTreeMap<BorrowerId, Borrower>,
    loans: BTreeMap<LoanId, Loan>,
    bids: BTreeMap<BidId, Bid>,
    allocations: HashMap<OfficerId, GuaranteedAllocation>,
    /// Keyed by loan: one assignment per loan
    assignments: BTreeMap<LoanId, GuaranteedAssignment>,
    notifications: BTreeMap<NotificationId, Notification>,
    preferences: HashMap<UserId, CommunicationPreferences>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn loan(&self, id: LoanId) -> Result<&Loan> {
        self.loans
            .get(&id)
            .ok_or_else(|| MarketError::not_found("loan", id))
    }

    fn loan_mut(&mut self, id: LoanId) -> Result<&mut Loan> {
        self.loans
            .get_mut(&id)
            .ok_or_else(|| MarketError::not_found("loan", id))
    }

    fn bids_of(&self, loan_id: LoanId) -> Vec<Bid> {
        self.bids
            .values()
            .filter(|b| b.loan_id == loan_id)
            .cloned()
            .collect()
    }
}

/// Ledger held entirely in memory
#[derive(Default)]
pub struct MemoryLedger {
    tables: Mutex<Tables>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn insert_officer(&self, officer: NewOfficer) -> Result<OfficerProfile> {
        let mut t = self.tables.lock().await;
        if t.officers.values().any(|o| o.user_id == officer.user_id) {
            return Err(MarketError::Validation(format!(
                "user {} already has an officer profile",
                officer.user_id
            )));
        }
        let id = t.next_id();
        let profile = officer.into_profile(id, Utc::now());
        t.officers.insert(id, profile.clone());
        Ok(profile)
    }

    async fn officer(&self, id: OfficerId) -> Result<Option<OfficerProfile>> {
        Ok(self.tables.lock().await.officers.get(&id).cloned())
    }

    async fn officer_by_user(&self, user_id: UserId) -> Result<Option<OfficerProfile>> {
        let t = self.tables.lock().await;
        Ok(t.officers.values().find(|o| o.user_id == user_id).cloned())
    }

    async fn active_officers(&self) -> Result<Vec<OfficerProfile>> {
        let t = self.tables.lock().await;
        Ok(t.officers.values().filter(|o| o.is_active).cloned().collect())
    }

    async fn insert_borrower(&self, borrower: NewBorrower) -> Result<Borrower> {
        let mut t = self.tables.lock().await;
        let id = t.next_id();
        let borrower = borrower.into_borrower(id, Utc::now());
        t.borrowers.insert(id, borrower.clone());
        Ok(borrower)
    }

    async fn borrower(&self, id: BorrowerId) -> Result<Option<Borrower>> {
        Ok(self.tables.lock().await.borrowers.get(&id).cloned())
    }

    async fn insert_loan(&self, loan: NewLoan) -> Result<Loan> {
        let mut t = self.tables.lock().await;
        if !t.borrowers.contains_key(&loan.borrower_id) {
            return Err(MarketError::not_found("borrower", loan.borrower_id));
        }
        let id = t.next_id();
        let max_bids = loan.max_bids.unwrap_or(DEFAULT_MAX_BIDS);
        let loan = loan.into_loan(id, max_bids, Utc::now());
        t.loans.insert(id, loan.clone());
        Ok(loan)
    }

    async fn insert_borrower_with_loan(
        &self,
        borrower: NewBorrower,
        loan: NewLoan,
    ) -> Result<(Borrower, Loan)> {
        let mut t = self.tables.lock().await;
        let now = Utc::now();
        let borrower_id = t.next_id();
        let loan_id = t.next_id();
        let borrower = borrower.into_borrower(borrower_id, now);
        let max_bids = loan.max_bids.unwrap_or(DEFAULT_MAX_BIDS);
        let loan = NewLoan {
            borrower_id,
            ..loan
        }
        .into_loan(loan_id, max_bids, now);
        t.borrowers.insert(borrower_id, borrower.clone());
        t.loans.insert(loan_id, loan.clone());
        Ok((borrower, loan))
    }

    async fn loan(&self, id: LoanId) -> Result<Option<Loan>> {
        Ok(self.tables.lock().await.loans.get(&id).cloned())
    }

    async fn competitive_loans(&self, filter: &CompetitiveFilter) -> Result<Vec<Loan>> {
        let t = self.tables.lock().await;
        Ok(t.loans.values().filter(|l| filter.matches(l)).cloned().collect())
    }

    async fn open_loans(&self) -> Result<Vec<Loan>> {
        let t = self.tables.lock().await;
        Ok(t.loans.values().filter(|l| l.is_open()).cloned().collect())
    }

    async fn set_routing_score(&self, loan_id: LoanId, score: Decimal) -> Result<()> {
        let mut t = self.tables.lock().await;
        let loan = t.loan_mut(loan_id)?;
        loan.routing_score = Some(score);
        loan.updated_at = Utc::now();
        Ok(())
    }

    async fn won_loans(&self, officer_id: OfficerId) -> Result<Vec<Loan>> {
        let t = self.tables.lock().await;
        let won = t
            .loans
            .values()
            .filter(|l| l.is_closed)
            .filter(|l| {
                let by_bid = l
                    .winning_bid
                    .and_then(|id| t.bids.get(&id))
                    .is_some_and(|b| b.officer_id == officer_id);
                let by_assignment = t
                    .assignments
                    .get(&l.id)
                    .is_some_and(|a| a.officer_id == officer_id);
                by_bid || by_assignment
            })
            .cloned()
            .collect();
        Ok(won)
    }

    async fn due_loans(&self, now: DateTime<Utc>) -> Result<Vec<LoanId>> {
        let t = self.tables.lock().await;
        Ok(t.loans
            .values()
            .filter(|l| l.is_open() && l.is_expired_at(now))
            .map(|l| l.id)
            .collect())
    }

    async fn bid(&self, id: BidId) -> Result<Option<Bid>> {
        Ok(self.tables.lock().await.bids.get(&id).cloned())
    }

    async fn bids_for_loan(&self, loan_id: LoanId) -> Result<Vec<Bid>> {
        Ok(self.tables.lock().await.bids_of(loan_id))
    }

    async fn active_bids_for_loans(&self, loan_ids: &[LoanId]) -> Result<Vec<Bid>> {
        let t = self.tables.lock().await;
        Ok(t.bids
            .values()
            .filter(|b| b.is_active() && loan_ids.contains(&b.loan_id))
            .cloned()
            .collect())
    }

    async fn bids_by_officer(&self, officer_id: OfficerId) -> Result<Vec<BidWithLoanAmount>> {
        let t = self.tables.lock().await;
        let mut rows: Vec<BidWithLoanAmount> = t
            .bids
            .values()
            .filter(|b| b.officer_id == officer_id)
            .filter_map(|b| {
                t.loans.get(&b.loan_id).map(|l| BidWithLoanAmount {
                    bid: b.clone(),
                    loan_amount: l.amount,
                })
            })
            .collect();
        rows.sort_by(|a, b| {
            b.bid
                .created_at
                .cmp(&a.bid.created_at)
                .then(b.bid.id.cmp(&a.bid.id))
        });
        Ok(rows)
    }

    #[instrument(skip(self))]
    async fn place_bid(
        &self,
        loan_id: LoanId,
        officer_id: OfficerId,
        rate: Decimal,
        now: DateTime<Utc>,
    ) -> Result<PlacedBid> {
        let mut t = self.tables.lock().await;
        let plan = plan_bid(t.loan(loan_id)?, &t.bids_of(loan_id), officer_id, rate)?;

        for bid in t.bids.values_mut().filter(|b| b.loan_id == loan_id) {
            plan.apply_to_existing(bid, now);
        }
        let bid_id = t.next_id();
        let bid = plan.new_bid(bid_id, now);
        t.bids.insert(bid_id, bid.clone());
        let loan = t.loan_mut(loan_id)?;
        plan.apply_to_loan(loan, now);
        let loan = loan.clone();

        debug!(loan_id, bid_id, outbid = plan.outbid.len(), "bid committed");
        Ok(PlacedBid {
            loan,
            bid,
            outbid: plan.outbid,
        })
    }

    #[instrument(skip(self))]
    async fn accept_bid(&self, bid_id: BidId, now: DateTime<Utc>) -> Result<AcceptedBid> {
        let mut t = self.tables.lock().await;
        let loan_id = t
            .bids
            .get(&bid_id)
            .map(|b| b.loan_id)
            .ok_or_else(|| MarketError::not_found("bid", bid_id))?;
        let plan = plan_acceptance(t.loan(loan_id)?, &t.bids_of(loan_id), bid_id)?;

        for bid in t.bids.values_mut().filter(|b| b.loan_id == loan_id) {
            plan.apply_to_bid(bid, now);
        }
        let loan = t.loan_mut(loan_id)?;
        plan.apply_to_loan(loan, now);
        Ok(AcceptedBid {
            loan: loan.clone(),
            plan,
        })
    }

    #[instrument(skip(self, rules))]
    async fn claim_guaranteed(
        &self,
        loan_id: LoanId,
        officer_id: OfficerId,
        rules: &GuaranteedRules,
        now: DateTime<Utc>,
    ) -> Result<ClaimedLoan> {
        let mut t = self.tables.lock().await;
        let mut allocation = t.allocations.get(&officer_id).cloned();
        if let Some(alloc) = allocation.as_mut() {
            alloc.reset_if_due(rules, now);
        }
        check_claim(
            t.loan(loan_id)?,
            t.assignments.contains_key(&loan_id),
            allocation.as_ref(),
            rules,
        )?;
        let Some(mut allocation) = allocation else {
            return Err(MarketError::NoCreditsAvailable);
        };
        allocation.consume_credit()?;

        let assignment = GuaranteedAssignment {
            id: t.next_id(),
            loan_id,
            officer_id,
            assigned_at: now,
        };
        t.assignments.insert(loan_id, assignment.clone());
        t.allocations.insert(officer_id, allocation.clone());
        let loan = t.loan_mut(loan_id)?;
        apply_claim_to_loan(loan, now);

        Ok(ClaimedLoan {
            loan: loan.clone(),
            assignment,
            allocation,
        })
    }

    async fn convert_to_competitive(&self, loan_id: LoanId, now: DateTime<Utc>) -> Result<bool> {
        let mut t = self.tables.lock().await;
        let changed = apply_conversion(t.loan_mut(loan_id)?, now);
        if changed {
            t.assignments.remove(&loan_id);
        }
        Ok(changed)
    }

    async fn expire_loan(&self, loan_id: LoanId, now: DateTime<Utc>) -> Result<Option<ExpiredLoan>> {
        let mut t = self.tables.lock().await;
        let Some(plan) = plan_expiry(t.loan(loan_id)?, &t.bids_of(loan_id), now) else {
            return Ok(None);
        };
        for bid in t.bids.values_mut().filter(|b| b.loan_id == loan_id) {
            plan.apply_to_bid(bid, now);
        }
        let loan = t.loan_mut(loan_id)?;
        plan.apply_to_loan(loan, now);
        debug_assert_eq!(loan.status, LoanStatus::Expired);
        Ok(Some(ExpiredLoan {
            loan: loan.clone(),
            plan,
        }))
    }

    async fn allocation(&self, officer_id: OfficerId) -> Result<Option<GuaranteedAllocation>> {
        Ok(self.tables.lock().await.allocations.get(&officer_id).cloned())
    }

    async fn upsert_allocation(&self, allocation: &GuaranteedAllocation) -> Result<()> {
        if allocation.credits_available < 0 {
            return Err(MarketError::Validation(
                "credits_available must not be negative".to_string(),
            ));
        }
        let mut t = self.tables.lock().await;
        t.allocations.insert(allocation.officer_id, allocation.clone());
        Ok(())
    }

    async fn reset_due_allocations(&self, rules: &GuaranteedRules, now: DateTime<Utc>) -> Result<u64> {
        let mut t = self.tables.lock().await;
        let mut reset = 0;
        for allocation in t.allocations.values_mut() {
            if allocation.reset_if_due(rules, now) {
                reset += 1;
            }
        }
        Ok(reset)
    }

    async fn assignments_for_officer(&self, officer_id: OfficerId) -> Result<Vec<GuaranteedAssignment>> {
        let t = self.tables.lock().await;
        Ok(t.assignments
            .values()
            .filter(|a| a.officer_id == officer_id)
            .cloned()
            .collect())
    }

    async fn assigned_loan_ids(&self) -> Result<HashSet<LoanId>> {
        Ok(self.tables.lock().await.assignments.keys().copied().collect())
    }

    async fn insert_notification(&self, notification: NewNotification) -> Result<Notification> {
        let mut t = self.tables.lock().await;
        let id = t.next_id();
        let row = notification.into_notification(id, Utc::now());
        t.notifications.insert(id, row.clone());
        Ok(row)
    }

    async fn notifications_for(&self, user_id: UserId) -> Result<Vec<Notification>> {
        let t = self.tables.lock().await;
        // Ids grow monotonically, so reverse id order is newest first.
        Ok(t.notifications
            .values()
            .rev()
            .filter(|n| n.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn mark_read(&self, user_id: UserId, id: NotificationId) -> Result<bool> {
        let mut t = self.tables.lock().await;
        match t.notifications.get_mut(&id) {
            Some(n) if n.user_id == user_id => {
                n.is_read = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_all_read(&self, user_id: UserId) -> Result<u64> {
        let mut t = self.tables.lock().await;
        let mut changed = 0;
        for n in t
            .notifications
            .values_mut()
            .filter(|n| n.user_id == user_id && !n.is_read)
        {
            n.is_read = true;
            changed += 1;
        }
        Ok(changed)
    }

    async fn preferences(&self, user_id: UserId) -> Result<CommunicationPreferences> {
        let t = self.tables.lock().await;
        Ok(t.preferences.get(&user_id).copied().unwrap_or_default())
    }

    async fn save_preferences(&self, user_id: UserId, prefs: &CommunicationPreferences) -> Result<()> {
        self.tables.lock().await.preferences.insert(user_id, *prefs);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        check_lowest_bid_invariant, BidStatus, LeadType, LoanPreferences, NotificationKind,
    };
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    async fn seeded() -> (MemoryLedger, LoanId) {
        let ledger = MemoryLedger::new();
        let borrower = ledger
            .insert_borrower(NewBorrower {
                user_id: Some(500),
                first_name: "Ada".into(),
                last_name: "Lovelace".into(),
                email: "ada@example.com".into(),
                phone_number: None,
                credit_score: Some(720),
                annual_income: None,
                employment_status: None,
                property_type: None,
                property_use: None,
            })
            .await
            .unwrap();
        let loan = ledger.insert_loan(new_loan(borrower.id)).await.unwrap();
        (ledger, loan.id)
    }

    fn new_loan(borrower_id: BorrowerId) -> NewLoan {
        NewLoan {
            borrower_id,
            amount: dec!(400000),
            original_rate: dec!(5.00),
            location: "CA".into(),
            status: LoanStatus::Available,
            lead_type: LeadType::Competitive,
            fico_score: 720,
            max_bids: Some(10),
            loan_type: None,
            loan_term_months: Some(360),
            property_value: None,
            down_payment: None,
            monthly_payment: None,
            debt_to_income_ratio: None,
            expires_at: None,
            routing_score: None,
        }
    }

    async fn officer(ledger: &MemoryLedger, user_id: UserId) -> OfficerId {
        ledger
            .insert_officer(NewOfficer {
                user_id,
                nmls_id: format!("NMLS{user_id}"),
                company_name: "Acme Lending".into(),
                is_active: true,
                preferences: LoanPreferences::default(),
            })
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn rejected_bid_leaves_state_unchanged() {
        let (ledger, loan_id) = seeded().await;
        let a = officer(&ledger, 1).await;
        let b = officer(&ledger, 2).await;
        let now = Utc::now();

        ledger.place_bid(loan_id, a, dec!(4.50), now).await.unwrap();
        let before_loan = ledger.loan(loan_id).await.unwrap();
        let before_bids = ledger.bids_for_loan(loan_id).await.unwrap();

        let err = ledger.place_bid(loan_id, b, dec!(4.50), now).await.unwrap_err();
        assert!(matches!(err, MarketError::InvalidBid(_)));
        assert_eq!(ledger.loan(loan_id).await.unwrap(), before_loan);
        assert_eq!(ledger.bids_for_loan(loan_id).await.unwrap(), before_bids);
    }

    #[tokio::test]
    async fn accept_twice_is_already_closed_without_mutation() {
        let (ledger, loan_id) = seeded().await;
        let a = officer(&ledger, 1).await;
        let b = officer(&ledger, 2).await;
        let now = Utc::now();
        let first = ledger.place_bid(loan_id, a, dec!(4.50), now).await.unwrap();
        ledger.place_bid(loan_id, b, dec!(4.25), now).await.unwrap();

        let accepted = ledger.accept_bid(first.bid.id, now).await.unwrap();
        assert_eq!(accepted.loan.winning_bid, Some(first.bid.id));
        let snapshot = ledger.bids_for_loan(loan_id).await.unwrap();
        assert!(snapshot.iter().all(|b| b.is_final));
        assert_eq!(
            snapshot.iter().filter(|b| b.status == BidStatus::Rejected).count(),
            1
        );

        let err = ledger.accept_bid(first.bid.id, now).await.unwrap_err();
        assert!(matches!(err, MarketError::AlreadyClosed { .. }));
        assert_eq!(ledger.bids_for_loan(loan_id).await.unwrap(), snapshot);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_bids_leave_a_single_lowest() {
        let (ledger, loan_id) = seeded().await;
        let ledger = Arc::new(ledger);
        let mut officers = Vec::new();
        for user_id in 1..=16 {
            officers.push(officer(&ledger, user_id).await);
        }

        let handles: Vec<_> = officers
            .into_iter()
            .enumerate()
            .map(|(i, officer_id)| {
                let ledger = ledger.clone();
                // 4.90 down to 4.15 in steps of 0.05.
                let rate = dec!(4.90) - Decimal::new(5 * i as i64, 2);
                tokio::spawn(async move { ledger.place_bid(loan_id, officer_id, rate, Utc::now()).await })
            })
            .collect();

        let mut placed = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => placed += 1,
                Err(MarketError::InvalidBid(_)) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert!(placed >= 1);

        let loan = ledger.loan(loan_id).await.unwrap().unwrap();
        let bids = ledger.bids_for_loan(loan_id).await.unwrap();
        check_lowest_bid_invariant(&loan, &bids).unwrap();
        assert_eq!(bids.len(), placed);
        assert_eq!(loan.current_bid_count as usize, bids.len());
        assert_eq!(bids.iter().filter(|b| b.is_lowest).count(), 1);
    }

    #[tokio::test]
    async fn won_loans_only_lists_closed_loans() {
        let (ledger, competitive) = seeded().await;
        let winner = officer(&ledger, 1).await;
        let rules = GuaranteedRules::default();
        ledger
            .upsert_allocation(&GuaranteedAllocation::fresh(winner, &rules, Utc::now()))
            .await
            .unwrap();

        let borrower = ledger.loan(competitive).await.unwrap().unwrap().borrower_id;
        let mut held = new_loan(borrower);
        held.lead_type = LeadType::Guaranteed;
        let held = ledger.insert_loan(held).await.unwrap().id;
        let claimed = ledger
            .claim_guaranteed(held, winner, &rules, Utc::now())
            .await
            .unwrap();
        assert_eq!(claimed.loan.status, LoanStatus::Available);
        assert!(ledger.won_loans(winner).await.unwrap().is_empty());

        let bid = ledger
            .place_bid(competitive, winner, dec!(4.50), Utc::now())
            .await
            .unwrap();
        assert!(ledger.won_loans(winner).await.unwrap().is_empty());
        ledger.accept_bid(bid.bid.id, Utc::now()).await.unwrap();

        let won: Vec<LoanId> = ledger
            .won_loans(winner)
            .await
            .unwrap()
            .iter()
            .map(|l| l.id)
            .collect();
        assert_eq!(won, vec![competitive]);
    }

    #[tokio::test]
    async fn borrower_and_loan_are_inserted_together() {
        let ledger = MemoryLedger::new();
        let (borrower, loan) = ledger
            .insert_borrower_with_loan(
                NewBorrower {
                    user_id: Some(77),
                    first_name: "Lin".into(),
                    last_name: "Park".into(),
                    email: "lin@example.com".into(),
                    phone_number: None,
                    credit_score: None,
                    annual_income: None,
                    employment_status: None,
                    property_type: None,
                    property_use: None,
                },
                new_loan(0),
            )
            .await
            .unwrap();
        assert_eq!(loan.borrower_id, borrower.id);
        assert_eq!(ledger.borrower(borrower.id).await.unwrap(), Some(borrower));
        assert_eq!(ledger.loan(loan.id).await.unwrap(), Some(loan));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_claims_never_overspend_credits() {
        let ledger = Arc::new(MemoryLedger::new());
        let borrower = ledger
            .insert_borrower(NewBorrower {
                user_id: None,
                first_name: "Grace".into(),
                last_name: "Hopper".into(),
                email: "grace@example.com".into(),
                phone_number: None,
                credit_score: None,
                annual_income: None,
                employment_status: None,
                property_type: None,
                property_use: None,
            })
            .await
            .unwrap();
        let officer_id = officer(&ledger, 9).await;
        let rules = GuaranteedRules::default();
        let mut alloc = GuaranteedAllocation::fresh(officer_id, &rules, Utc::now());
        alloc.credits_available = 2;
        ledger.upsert_allocation(&alloc).await.unwrap();

        let mut loan_ids = Vec::new();
        for _ in 0..6 {
            let mut intake = new_loan(borrower.id);
            intake.lead_type = LeadType::Guaranteed;
            loan_ids.push(ledger.insert_loan(intake).await.unwrap().id);
        }

        let handles: Vec<_> = loan_ids
            .into_iter()
            .map(|loan_id| {
                let ledger = ledger.clone();
                let rules = rules.clone();
                tokio::spawn(async move {
                    ledger
                        .claim_guaranteed(loan_id, officer_id, &rules, Utc::now())
                        .await
                })
            })
            .collect();

        let mut successes = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => successes += 1,
                Err(MarketError::NoCreditsAvailable) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(successes, 2);
        let alloc = ledger.allocation(officer_id).await.unwrap().unwrap();
        assert_eq!(alloc.credits_available, 0);
        assert_eq!(alloc.credits_used, 2);
    }

    #[tokio::test]
    async fn mark_read_only_touches_own_rows() {
        let ledger = MemoryLedger::new();
        let n = ledger
            .insert_notification(NewNotification {
                user_id: 1,
                kind: NotificationKind::BidLost,
                title: "t".into(),
                message: "m".into(),
                loan_id: Some(1),
                bid_id: None,
            })
            .await
            .unwrap();

        assert!(!ledger.mark_read(2, n.id).await.unwrap());
        assert!(ledger.mark_read(1, n.id).await.unwrap());
        assert_eq!(ledger.mark_all_read(1).await.unwrap(), 0);
    }
}
