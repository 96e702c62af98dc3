//! Transactional ledger of loans, bids, allocations and notifications
//!
//! Each multi-row mutation is a single method so the backend can run it in one
//! transaction. Backends validate through the rules in [`crate::domain`] and
//! never commit a partial result.

pub mod memory;
pub mod postgres;

pub use memory::MemoryLedger;
pub use postgres::PostgresLedger;

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::domain::{
    AcceptancePlan, Bid, BidId, BidWithLoanAmount, Borrower, BorrowerId,
    CommunicationPreferences, CompetitiveFilter, DisplacedBid, ExpiryPlan, GuaranteedAllocation,
    GuaranteedAssignment, GuaranteedRules, Loan, LoanId, NewBorrower, NewLoan, NewNotification,
    NewOfficer, Notification, NotificationId, OfficerId, OfficerProfile, UserId,
};
use crate::error::Result;

/// Committed result of a bid placement
#[derive(Debug, Clone, Serialize)]
pub struct PlacedBid {
    pub loan: Loan,
    pub bid: Bid,
    #[serde(skip)]
    pub outbid: Vec<DisplacedBid>,
}

/// Committed result of a bid acceptance
#[derive(Debug, Clone)]
pub struct AcceptedBid {
    pub loan: Loan,
    pub plan: AcceptancePlan,
}

/// Committed result of a guaranteed claim
#[derive(Debug, Clone, Serialize)]
pub struct ClaimedLoan {
    pub loan: Loan,
    pub assignment: GuaranteedAssignment,
    pub allocation: GuaranteedAllocation,
}

/// Committed result of a loan expiry
#[derive(Debug, Clone)]
pub struct ExpiredLoan {
    pub loan: Loan,
    pub plan: ExpiryPlan,
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Cheap liveness probe
    async fn ping(&self) -> Result<()>;

    // ==================== Parties ====================

    async fn insert_officer(&self, officer: NewOfficer) -> Result<OfficerProfile>;
    async fn officer(&self, id: OfficerId) -> Result<Option<OfficerProfile>>;
    async fn officer_by_user(&self, user_id: UserId) -> Result<Option<OfficerProfile>>;
    async fn active_officers(&self) -> Result<Vec<OfficerProfile>>;
    async fn insert_borrower(&self, borrower: NewBorrower) -> Result<Borrower>;
    async fn borrower(&self, id: BorrowerId) -> Result<Option<Borrower>>;

    // ==================== Loans ====================

    /// Insert a loan; `max_bids` must already be resolved.
    async fn insert_loan(&self, loan: NewLoan) -> Result<Loan>;
    /// Insert a borrower and their loan together. `loan.borrower_id` is overwritten.
    async fn insert_borrower_with_loan(
        &self,
        borrower: NewBorrower,
        loan: NewLoan,
    ) -> Result<(Borrower, Loan)>;
    async fn loan(&self, id: LoanId) -> Result<Option<Loan>>;
    /// Open competitive loans matching the filter, by id
    async fn competitive_loans(&self, filter: &CompetitiveFilter) -> Result<Vec<Loan>>;
    /// AVAILABLE, unclosed loans of any lead type, by id
    async fn open_loans(&self) -> Result<Vec<Loan>>;
    async fn set_routing_score(&self, loan_id: LoanId, score: Decimal) -> Result<()>;
    /// Closed loans won by the officer's bid or held through an assignment
    async fn won_loans(&self, officer_id: OfficerId) -> Result<Vec<Loan>>;
    /// Open loans whose `expires_at` is at or before `now`
    async fn due_loans(&self, now: DateTime<Utc>) -> Result<Vec<LoanId>>;

    // ==================== Bids ====================

    async fn bid(&self, id: BidId) -> Result<Option<Bid>>;
    async fn bids_for_loan(&self, loan_id: LoanId) -> Result<Vec<Bid>>;
    async fn active_bids_for_loans(&self, loan_ids: &[LoanId]) -> Result<Vec<Bid>>;
    /// The officer's bids, newest first
    async fn bids_by_officer(&self, officer_id: OfficerId) -> Result<Vec<BidWithLoanAmount>>;

    // ==================== Transactions ====================

    /// Validate and place a bid under a lock on the loan.
    async fn place_bid(
        &self,
        loan_id: LoanId,
        officer_id: OfficerId,
        rate: Decimal,
        now: DateTime<Utc>,
    ) -> Result<PlacedBid>;

    /// Accept a bid, closing its loan and rejecting every other bid.
    async fn accept_bid(&self, bid_id: BidId, now: DateTime<Utc>) -> Result<AcceptedBid>;

    /// Claim a loan into the officer's guaranteed pool, spending one credit.
    ///
    /// Locks the loan and then the allocation.
    async fn claim_guaranteed(
        &self,
        loan_id: LoanId,
        officer_id: OfficerId,
        rules: &GuaranteedRules,
        now: DateTime<Utc>,
    ) -> Result<ClaimedLoan>;

    /// Returns whether the loan changed.
    async fn convert_to_competitive(&self, loan_id: LoanId, now: DateTime<Utc>) -> Result<bool>;

    /// Expire one loan if it is still due. `None` when another sweep won.
    async fn expire_loan(&self, loan_id: LoanId, now: DateTime<Utc>) -> Result<Option<ExpiredLoan>>;

    // ==================== Allocations ====================

    async fn allocation(&self, officer_id: OfficerId) -> Result<Option<GuaranteedAllocation>>;
    async fn upsert_allocation(&self, allocation: &GuaranteedAllocation) -> Result<()>;
    /// Reset every allocation whose reset date has passed; returns how many.
    async fn reset_due_allocations(&self, rules: &GuaranteedRules, now: DateTime<Utc>) -> Result<u64>;
    async fn assignments_for_officer(&self, officer_id: OfficerId) -> Result<Vec<GuaranteedAssignment>>;
    async fn assigned_loan_ids(&self) -> Result<HashSet<LoanId>>;

    // ==================== Notifications ====================

    async fn insert_notification(&self, notification: NewNotification) -> Result<Notification>;
    /// Newest first
    async fn notifications_for(&self, user_id: UserId) -> Result<Vec<Notification>>;
    /// False when the row does not exist or belongs to someone else
    async fn mark_read(&self, user_id: UserId, id: NotificationId) -> Result<bool>;
    async fn mark_all_read(&self, user_id: UserId) -> Result<u64>;
    /// Stored preferences, or the defaults
    async fn preferences(&self, user_id: UserId) -> Result<CommunicationPreferences>;
    async fn save_preferences(&self, user_id: UserId, prefs: &CommunicationPreferences) -> Result<()>;
}
