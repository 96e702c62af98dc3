//! Competitive bidding rules
//!
//! Every mutation of a loan's bid state is first computed here as a plan from
//! a consistent snapshot (the loan row plus all of its bids), then written by
//! the ledger inside the same transaction that produced the snapshot. Plans
//! are fully validated before anything is written, so a rejected bid never
//! leaves a partial mutation behind.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use super::{Bid, BidId, BidStatus, Loan, LoanId, LoanStatus, OfficerId};
use crate::error::{MarketError, Result};

/// A superseded bid and the officer who must hear about it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DisplacedBid {
    pub bid_id: BidId,
    pub officer_id: OfficerId,
}

/// Outcome of validating a new bid against a loan snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BidPlan {
    pub loan_id: LoanId,
    pub officer_id: OfficerId,
    pub rate: Decimal,
    pub rebid_count: i32,
    /// ACTIVE bids of other officers that become OUTBID
    pub outbid: Vec<DisplacedBid>,
    pub new_bid_count: i32,
}

impl BidPlan {
    pub fn new_bid(&self, id: BidId, now: DateTime<Utc>) -> Bid {
        Bid {
            id,
            loan_id: self.loan_id,
            officer_id: self.officer_id,
            rate: self.rate,
            status: BidStatus::Active,
            is_lowest: true,
            is_final: false,
            rebid_count: self.rebid_count,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn outbid_ids(&self) -> Vec<BidId> {
        self.outbid.iter().map(|d| d.bid_id).collect()
    }

    pub fn apply_to_loan(&self, loan: &mut Loan, now: DateTime<Utc>) {
        loan.lowest_bid_rate = Some(self.rate);
        loan.current_leader = Some(self.officer_id);
        loan.current_bid_count = self.new_bid_count;
        loan.updated_at = now;
    }

    /// Update an existing bid of the same loan (never the new bid itself).
    pub fn apply_to_existing(&self, bid: &mut Bid, now: DateTime<Utc>) {
        if self.outbid.iter().any(|d| d.bid_id == bid.id) {
            bid.status = BidStatus::Outbid;
            bid.updated_at = now;
        }
        if bid.is_lowest {
            bid.is_lowest = false;
            bid.updated_at = now;
        }
    }
}

/// True iff the officer may still improve on `bid`.
pub fn can_rebid(bid: &Bid, loan: &Loan) -> bool {
    !bid.is_final && bid.rebid_count < loan.max_bids && !loan.is_closed
}

/// Validate a bid of `rate` by `officer_id` against the loan and its bids.
pub fn plan_bid(loan: &Loan, bids: &[Bid], officer_id: OfficerId, rate: Decimal) -> Result<BidPlan> {
    if !loan.is_open() {
        return Err(MarketError::LoanUnavailable(
            "this loan is not available for bidding".to_string(),
        ));
    }
    if loan.is_guaranteed {
        return Err(MarketError::LoanUnavailable(
            "this loan is held in a guaranteed pool".to_string(),
        ));
    }
    if rate <= Decimal::ZERO {
        return Err(MarketError::InvalidBid(
            "bid rate must be positive".to_string(),
        ));
    }
    if loan.lowest_bid_rate.is_some_and(|lowest| rate >= lowest) {
        return Err(MarketError::InvalidBid(
            "bid must be lower than current lowest rate".to_string(),
        ));
    }
    if rate >= loan.original_rate {
        return Err(MarketError::InvalidBid(
            "bid must be lower than original rate".to_string(),
        ));
    }

    let own_bids = bids.iter().filter(|b| b.officer_id == officer_id);
    let rebid_count = own_bids.clone().count() as i32;
    if let Some(latest) = own_bids.max_by_key(|b| b.id) {
        if !can_rebid(latest, loan) {
            return Err(MarketError::InvalidBid("rebid limit reached".to_string()));
        }
    }

    let outbid = bids
        .iter()
        .filter(|b| b.is_active() && b.officer_id != officer_id)
        .map(|b| DisplacedBid {
            bid_id: b.id,
            officer_id: b.officer_id,
        })
        .collect();

    Ok(BidPlan {
        loan_id: loan.id,
        officer_id,
        rate,
        rebid_count,
        outbid,
        new_bid_count: loan.current_bid_count + 1,
    })
}

/// Outcome of accepting a bid
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptancePlan {
    pub loan_id: LoanId,
    pub winning_bid_id: BidId,
    pub winning_officer_id: OfficerId,
    /// Every other bid on the loan
    pub rejected: Vec<DisplacedBid>,
}

impl AcceptancePlan {
    pub fn rejected_ids(&self) -> Vec<BidId> {
        self.rejected.iter().map(|d| d.bid_id).collect()
    }

    /// Distinct officers that lost the loan, excluding the winner.
    pub fn losing_officers(&self) -> Vec<OfficerId> {
        let mut officers: Vec<OfficerId> = self
            .rejected
            .iter()
            .map(|d| d.officer_id)
            .filter(|o| *o != self.winning_officer_id)
            .collect();
        officers.sort_unstable();
        officers.dedup();
        officers
    }

    pub fn apply_to_loan(&self, loan: &mut Loan, now: DateTime<Utc>) {
        loan.status = LoanStatus::Closed;
        loan.is_closed = true;
        loan.winning_bid = Some(self.winning_bid_id);
        loan.updated_at = now;
    }

    pub fn apply_to_bid(&self, bid: &mut Bid, now: DateTime<Utc>) {
        bid.status = if bid.id == self.winning_bid_id {
            BidStatus::Accepted
        } else {
            BidStatus::Rejected
        };
        bid.is_final = true;
        bid.updated_at = now;
    }
}

pub fn plan_acceptance(loan: &Loan, bids: &[Bid], bid_id: BidId) -> Result<AcceptancePlan> {
    if loan.is_closed {
        return Err(MarketError::AlreadyClosed { loan_id: loan.id });
    }
    if loan.status == LoanStatus::Expired {
        return Err(MarketError::LoanUnavailable(
            "this loan has expired".to_string(),
        ));
    }
    let winner = bids
        .iter()
        .find(|b| b.id == bid_id)
        .ok_or_else(|| MarketError::not_found("bid", bid_id))?;

    let rejected = bids
        .iter()
        .filter(|b| b.id != bid_id)
        .map(|b| DisplacedBid {
            bid_id: b.id,
            officer_id: b.officer_id,
        })
        .collect();

    Ok(AcceptancePlan {
        loan_id: loan.id,
        winning_bid_id: winner.id,
        winning_officer_id: winner.officer_id,
        rejected,
    })
}

/// Outcome of expiring a loan that passed its deadline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiryPlan {
    pub loan_id: LoanId,
    pub expired_bids: Vec<BidId>,
    pub leader: Option<OfficerId>,
}

impl ExpiryPlan {
    pub fn apply_to_loan(&self, loan: &mut Loan, now: DateTime<Utc>) {
        loan.status = LoanStatus::Expired;
        loan.updated_at = now;
    }

    pub fn apply_to_bid(&self, bid: &mut Bid, now: DateTime<Utc>) {
        if self.expired_bids.contains(&bid.id) {
            bid.status = BidStatus::Expired;
            bid.is_lowest = false;
            bid.updated_at = now;
        }
    }
}

/// `None` when the loan is not due for expiry at `now`.
pub fn plan_expiry(loan: &Loan, bids: &[Bid], now: DateTime<Utc>) -> Option<ExpiryPlan> {
    if !loan.is_open() || !loan.is_expired_at(now) {
        return None;
    }
    Some(ExpiryPlan {
        loan_id: loan.id,
        expired_bids: bids.iter().filter(|b| b.is_active()).map(|b| b.id).collect(),
        leader: loan.current_leader,
    })
}

/// Check the lowest-bid invariants of one loan against its bids.
///
/// At most one ACTIVE bid carries `is_lowest`, it holds the minimum ACTIVE
/// rate, and an open loan's `lowest_bid_rate` equals that minimum. Closed and
/// expired loans keep their last `lowest_bid_rate` as the final best offer.
pub fn check_lowest_bid_invariant(loan: &Loan, bids: &[Bid]) -> std::result::Result<(), String> {
    let active: Vec<&Bid> = bids.iter().filter(|b| b.is_active()).collect();
    let flagged: Vec<&&Bid> = active.iter().filter(|b| b.is_lowest).collect();
    if flagged.len() > 1 {
        return Err(format!(
            "loan {} has {} active bids flagged lowest",
            loan.id,
            flagged.len()
        ));
    }

    let min_rate = active.iter().map(|b| b.rate).min();
    if let Some(bid) = flagged.first() {
        if Some(bid.rate) != min_rate {
            return Err(format!(
                "loan {} lowest flag on bid {} at {} but minimum active rate is {:?}",
                loan.id, bid.id, bid.rate, min_rate
            ));
        }
    }

    if loan.is_open() && loan.lowest_bid_rate != min_rate {
        return Err(format!(
            "loan {} lowest_bid_rate {:?} does not match minimum active rate {:?}",
            loan.id, loan.lowest_bid_rate, min_rate
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::loan::fixtures::loan;
    use rust_decimal_macros::dec;

    /// Run a plan against in-memory rows the way the ledgers do.
    fn place(loan: &mut Loan, bids: &mut Vec<Bid>, officer: OfficerId, rate: Decimal) -> Result<BidPlan> {
        let plan = plan_bid(loan, bids, officer, rate)?;
        let now = Utc::now();
        for bid in bids.iter_mut() {
            plan.apply_to_existing(bid, now);
        }
        bids.push(plan.new_bid(bids.len() as BidId + 1, now));
        plan.apply_to_loan(loan, now);
        Ok(plan)
    }

    #[test]
    fn outbid_scenario_moves_leadership() {
        let mut l = loan(1);
        let mut bids = Vec::new();

        place(&mut l, &mut bids, 10, dec!(4.50)).unwrap();
        assert_eq!(l.lowest_bid_rate, Some(dec!(4.50)));
        assert_eq!(l.current_leader, Some(10));

        let err = place(&mut l, &mut bids, 20, dec!(4.75)).unwrap_err();
        assert!(matches!(err, MarketError::InvalidBid(_)));
        assert_eq!(l.current_bid_count, 1);

        let plan = place(&mut l, &mut bids, 20, dec!(4.25)).unwrap();
        assert_eq!(plan.outbid, vec![DisplacedBid { bid_id: 1, officer_id: 10 }]);
        assert_eq!(bids[0].status, BidStatus::Outbid);
        assert!(!bids[0].is_lowest);
        assert_eq!(l.lowest_bid_rate, Some(dec!(4.25)));
        assert_eq!(l.current_leader, Some(20));
        assert_eq!(l.current_bid_count, 2);
        check_lowest_bid_invariant(&l, &bids).unwrap();
    }

    #[test]
    fn equal_rate_never_ties_for_lowest() {
        let mut l = loan(1);
        let mut bids = Vec::new();
        place(&mut l, &mut bids, 10, dec!(4.00)).unwrap();
        let err = place(&mut l, &mut bids, 20, dec!(4.00)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid bid: bid must be lower than current lowest rate"
        );
    }

    #[test]
    fn rate_must_beat_original_and_be_positive() {
        let l = loan(1);
        assert!(matches!(
            plan_bid(&l, &[], 1, dec!(5.00)),
            Err(MarketError::InvalidBid(_))
        ));
        assert!(matches!(
            plan_bid(&l, &[], 1, dec!(0)),
            Err(MarketError::InvalidBid(_))
        ));
    }

    #[test]
    fn closed_or_guaranteed_loans_refuse_bids() {
        let mut l = loan(1);
        l.is_guaranteed = true;
        assert!(matches!(
            plan_bid(&l, &[], 1, dec!(4.0)),
            Err(MarketError::LoanUnavailable(_))
        ));

        let mut l = loan(2);
        l.status = LoanStatus::Pending;
        assert!(matches!(
            plan_bid(&l, &[], 1, dec!(4.0)),
            Err(MarketError::LoanUnavailable(_))
        ));
    }

    #[test]
    fn own_earlier_bid_stays_active_without_lowest_flag() {
        let mut l = loan(1);
        let mut bids = Vec::new();
        place(&mut l, &mut bids, 10, dec!(4.50)).unwrap();
        let plan = place(&mut l, &mut bids, 10, dec!(4.40)).unwrap();

        assert!(plan.outbid.is_empty());
        assert_eq!(plan.rebid_count, 1);
        assert_eq!(bids[0].status, BidStatus::Active);
        assert!(!bids[0].is_lowest);
        assert!(bids[1].is_lowest);
        check_lowest_bid_invariant(&l, &bids).unwrap();
    }

    #[test]
    fn rebid_limit_is_enforced() {
        let mut l = loan(1);
        l.max_bids = 2;
        let mut bids = Vec::new();
        place(&mut l, &mut bids, 10, dec!(4.50)).unwrap();
        place(&mut l, &mut bids, 10, dec!(4.40)).unwrap();
        place(&mut l, &mut bids, 10, dec!(4.30)).unwrap();
        let err = place(&mut l, &mut bids, 10, dec!(4.20)).unwrap_err();
        assert_eq!(err.to_string(), "Invalid bid: rebid limit reached");

        // Other officers are unaffected by someone else's rebid count.
        place(&mut l, &mut bids, 20, dec!(4.20)).unwrap();
    }

    #[test]
    fn can_rebid_follows_finality_and_closure() {
        let mut l = loan(1);
        let mut bids = Vec::new();
        place(&mut l, &mut bids, 10, dec!(4.50)).unwrap();
        assert!(can_rebid(&bids[0], &l));

        bids[0].is_final = true;
        assert!(!can_rebid(&bids[0], &l));

        bids[0].is_final = false;
        l.is_closed = true;
        assert!(!can_rebid(&bids[0], &l));
    }

    #[test]
    fn acceptance_closes_loan_and_rejects_others() {
        let mut l = loan(1);
        let mut bids = Vec::new();
        place(&mut l, &mut bids, 10, dec!(4.50)).unwrap();
        place(&mut l, &mut bids, 20, dec!(4.25)).unwrap();
        place(&mut l, &mut bids, 30, dec!(4.10)).unwrap();

        let plan = plan_acceptance(&l, &bids, 2).unwrap();
        assert_eq!(plan.winning_officer_id, 20);
        assert_eq!(plan.losing_officers(), vec![10, 30]);

        let now = Utc::now();
        plan.apply_to_loan(&mut l, now);
        for bid in bids.iter_mut() {
            plan.apply_to_bid(bid, now);
        }
        assert!(l.is_closed);
        assert_eq!(l.status, LoanStatus::Closed);
        assert_eq!(l.winning_bid, Some(2));
        assert_eq!(bids[1].status, BidStatus::Accepted);
        assert!(bids.iter().all(|b| b.is_final));
        assert!(bids
            .iter()
            .filter(|b| b.id != 2)
            .all(|b| b.status == BidStatus::Rejected));

        assert!(matches!(
            plan_acceptance(&l, &bids, 2),
            Err(MarketError::AlreadyClosed { loan_id: 1 })
        ));
    }

    #[test]
    fn acceptance_of_foreign_bid_is_not_found() {
        let l = loan(1);
        assert!(matches!(
            plan_acceptance(&l, &[], 99),
            Err(MarketError::NotFound { entity: "bid", id: 99 })
        ));
    }

    #[test]
    fn expiry_only_targets_open_loans_past_deadline() {
        let mut l = loan(1);
        let mut bids = Vec::new();
        place(&mut l, &mut bids, 10, dec!(4.50)).unwrap();
        let now = Utc::now();
        assert!(plan_expiry(&l, &bids, now).is_none());

        l.expires_at = Some(now - chrono::Duration::hours(1));
        let plan = plan_expiry(&l, &bids, now).unwrap();
        assert_eq!(plan.expired_bids, vec![1]);
        assert_eq!(plan.leader, Some(10));
    }

    #[test]
    fn finished_loans_keep_their_final_best_offer() {
        let now = Utc::now();
        let mut expired = loan(1);
        let mut bids = Vec::new();
        place(&mut expired, &mut bids, 10, dec!(4.50)).unwrap();
        expired.expires_at = Some(now - chrono::Duration::hours(1));
        let plan = plan_expiry(&expired, &bids, now).unwrap();
        plan.apply_to_loan(&mut expired, now);
        for bid in bids.iter_mut() {
            plan.apply_to_bid(bid, now);
        }
        assert!(bids.iter().all(|b| !b.is_active()));
        assert_eq!(expired.lowest_bid_rate, Some(dec!(4.50)));
        check_lowest_bid_invariant(&expired, &bids).unwrap();

        let mut closed = loan(2);
        let mut bids = Vec::new();
        place(&mut closed, &mut bids, 10, dec!(4.40)).unwrap();
        let plan = plan_acceptance(&closed, &bids, 1).unwrap();
        plan.apply_to_loan(&mut closed, now);
        assert_eq!(closed.lowest_bid_rate, Some(dec!(4.40)));
    }

    #[test]
    fn random_bid_sequences_keep_a_single_lowest() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(42);
        for round in 0..20 {
            let mut l = loan(round);
            l.max_bids = rng.gen_range(1..=4);
            let mut bids = Vec::new();
            for _ in 0..60 {
                let officer = rng.gen_range(1..=5);
                // 3.00 through 5.20, so some steps hit the original rate.
                let rate = Decimal::new(rng.gen_range(300..=520), 2);
                let before = (l.clone(), bids.clone());
                if place(&mut l, &mut bids, officer, rate).is_err() {
                    assert_eq!((l.clone(), bids.clone()), before);
                }
                check_lowest_bid_invariant(&l, &bids).unwrap();
                assert_eq!(l.current_bid_count as usize, bids.len());
                let leaders: Vec<_> = bids.iter().filter(|b| b.is_lowest).collect();
                assert!(leaders.len() <= 1);
                if let Some(leader) = leaders.first() {
                    assert_eq!(l.current_leader, Some(leader.officer_id));
                }
            }
        }
    }

    #[test]
    fn invariant_checker_flags_stale_lowest_rate() {
        let mut l = loan(1);
        let mut bids = Vec::new();
        place(&mut l, &mut bids, 10, dec!(4.50)).unwrap();
        l.lowest_bid_rate = Some(dec!(4.60));
        assert!(check_lowest_bid_invariant(&l, &bids).is_err());
    }
}
