//! Runs against a real database only when LEADMARKET_TEST_DATABASE_URL is set.

use std::sync::Arc;

use chrono::Utc;
use leadmarket::domain::{
    check_lowest_bid_invariant, BidStatus, GuaranteedAllocation, GuaranteedRules, LeadType,
    LoanPreferences, LoanStatus, NewBorrower, NewLoan, NewOfficer, OfficerId,
};
use leadmarket::error::MarketError;
use leadmarket::ledger::{LedgerStore, PostgresLedger};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

async fn ledger() -> Option<PostgresLedger> {
    let url = std::env::var("LEADMARKET_TEST_DATABASE_URL").ok()?;
    let ledger = PostgresLedger::connect(&url, 8).await.unwrap();
    ledger.migrate().await.unwrap();
    Some(ledger)
}

fn unique_user() -> i64 {
    1_000_000 + i64::from(rand::random::<u32>())
}

async fn officer(ledger: &PostgresLedger) -> OfficerId {
    let user_id = unique_user();
    ledger
        .insert_officer(NewOfficer {
            user_id,
            nmls_id: format!("NMLS{user_id}"),
            company_name: "Integration Lending".into(),
            is_active: true,
            preferences: LoanPreferences::default(),
        })
        .await
        .unwrap()
        .id
}

async fn loan(ledger: &PostgresLedger, lead_type: LeadType) -> i64 {
    let borrower = ledger
        .insert_borrower(NewBorrower {
            user_id: None,
            first_name: "Pat".into(),
            last_name: "Quinn".into(),
            email: "pat@example.com".into(),
            phone_number: None,
            credit_score: Some(740),
            annual_income: None,
            employment_status: None,
            property_type: None,
            property_use: None,
        })
        .await
        .unwrap();
    ledger
        .insert_loan(NewLoan {
            borrower_id: borrower.id,
            amount: dec!(350000),
            original_rate: dec!(5.00),
            location: "OR".into(),
            status: LoanStatus::Available,
            lead_type,
            fico_score: 740,
            max_bids: Some(3),
            loan_type: None,
            loan_term_months: Some(360),
            property_value: Some(dec!(450000)),
            down_payment: None,
            monthly_payment: None,
            debt_to_income_ratio: Some(dec!(28)),
            expires_at: None,
            routing_score: None,
        })
        .await
        .unwrap()
        .id
}

#[tokio::test]
async fn bids_keep_a_single_lowest_and_acceptance_closes() {
    let Some(ledger) = ledger().await else {
        eprintln!("LEADMARKET_TEST_DATABASE_URL not set, skipping");
        return;
    };
    let loan_id = loan(&ledger, LeadType::Competitive).await;
    let a = officer(&ledger).await;
    let b = officer(&ledger).await;

    ledger.place_bid(loan_id, a, dec!(4.50), Utc::now()).await.unwrap();
    let err = ledger
        .place_bid(loan_id, b, dec!(4.75), Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::InvalidBid(_)));
    let placed = ledger.place_bid(loan_id, b, dec!(4.25), Utc::now()).await.unwrap();
    assert_eq!(placed.outbid.len(), 1);
    assert_eq!(placed.loan.current_leader, Some(b));

    let bids = ledger.bids_for_loan(loan_id).await.unwrap();
    let loan = ledger.loan(loan_id).await.unwrap().unwrap();
    check_lowest_bid_invariant(&loan, &bids).unwrap();

    let accepted = ledger.accept_bid(placed.bid.id, Utc::now()).await.unwrap();
    assert_eq!(accepted.loan.status, LoanStatus::Closed);
    let bids = ledger.bids_for_loan(loan_id).await.unwrap();
    assert!(bids.iter().all(|b| b.is_final));
    assert_eq!(
        bids.iter().filter(|b| b.status == BidStatus::Accepted).count(),
        1
    );

    let again = ledger.accept_bid(placed.bid.id, Utc::now()).await;
    assert!(matches!(again, Err(MarketError::AlreadyClosed { .. })));
}

#[tokio::test]
async fn concurrent_claims_never_overspend_credits() {
    let Some(ledger) = ledger().await else {
        eprintln!("LEADMARKET_TEST_DATABASE_URL not set, skipping");
        return;
    };
    let ledger = Arc::new(ledger);
    let rules = GuaranteedRules::default();
    let officer_id = officer(&ledger).await;
    let mut allocation = GuaranteedAllocation::fresh(officer_id, &rules, Utc::now());
    allocation.credits_available = 2;
    ledger.upsert_allocation(&allocation).await.unwrap();

    let mut loans = Vec::new();
    for _ in 0..5 {
        loans.push(loan(&ledger, LeadType::Guaranteed).await);
    }

    let handles: Vec<_> = loans
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
            Err(other) => panic!("unexpected claim error: {other}"),
        }
    }
    assert_eq!(successes, 2);
    let allocation = ledger.allocation(officer_id).await.unwrap().unwrap();
    assert_eq!(allocation.credits_available, 0);
    assert_eq!(allocation.credits_used, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_bids_leave_a_single_lowest() {
    let Some(ledger) = ledger().await else {
        eprintln!("LEADMARKET_TEST_DATABASE_URL not set, skipping");
        return;
    };
    let ledger = Arc::new(ledger);
    let loan_id = loan(&ledger, LeadType::Competitive).await;
    let mut officers = Vec::new();
    for _ in 0..12 {
        officers.push(officer(&ledger).await);
    }

    let handles: Vec<_> = officers
        .into_iter()
        .enumerate()
        .map(|(i, officer_id)| {
            let ledger = ledger.clone();
            let rate = dec!(4.90) - Decimal::new(5 * i as i64, 2);
            tokio::spawn(async move { ledger.place_bid(loan_id, officer_id, rate, Utc::now()).await })
        })
        .collect();

    let mut placed = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => placed += 1,
            Err(MarketError::InvalidBid(_)) => {}
            Err(other) => panic!("unexpected bid error: {other}"),
        }
    }
    assert!(placed >= 1);

    let loan = ledger.loan(loan_id).await.unwrap().unwrap();
    let bids = ledger.bids_for_loan(loan_id).await.unwrap();
    check_lowest_bid_invariant(&loan, &bids).unwrap();
    assert_eq!(bids.len(), placed);
    assert_eq!(loan.current_bid_count as usize, bids.len());
}

#[tokio::test]
async fn won_loans_skip_claims_that_are_still_open() {
    let Some(ledger) = ledger().await else {
        eprintln!("LEADMARKET_TEST_DATABASE_URL not set, skipping");
        return;
    };
    let rules = GuaranteedRules::default();
    let officer_id = officer(&ledger).await;
    ledger
        .upsert_allocation(&GuaranteedAllocation::fresh(officer_id, &rules, Utc::now()))
        .await
        .unwrap();
    let held = loan(&ledger, LeadType::Guaranteed).await;
    ledger
        .claim_guaranteed(held, officer_id, &rules, Utc::now())
        .await
        .unwrap();
    assert!(ledger.won_loans(officer_id).await.unwrap().is_empty());

    let competitive = loan(&ledger, LeadType::Competitive).await;
    let bid = ledger
        .place_bid(competitive, officer_id, dec!(4.50), Utc::now())
        .await
        .unwrap();
    ledger.accept_bid(bid.bid.id, Utc::now()).await.unwrap();
    let won: Vec<i64> = ledger
        .won_loans(officer_id)
        .await
        .unwrap()
        .iter()
        .map(|l| l.id)
        .collect();
    assert_eq!(won, vec![competitive]);
}

#[tokio::test]
async fn failed_loan_insert_leaves_no_borrower_behind() {
    let Some(ledger) = ledger().await else {
        eprintln!("LEADMARKET_TEST_DATABASE_URL not set, skipping");
        return;
    };
    let user_id = unique_user();
    let result = ledger
        .insert_borrower_with_loan(
            NewBorrower {
                user_id: Some(user_id),
                first_name: "Rae".into(),
                last_name: "Ortiz".into(),
                email: "rae@example.com".into(),
                phone_number: None,
                credit_score: None,
                annual_income: None,
                employment_status: None,
                property_type: None,
                property_use: None,
            },
            NewLoan {
                borrower_id: 0,
                amount: dec!(0),
                original_rate: dec!(5.00),
                location: "OR".into(),
                status: LoanStatus::Available,
                lead_type: LeadType::Competitive,
                fico_score: 700,
                max_bids: Some(3),
                loan_type: None,
                loan_term_months: None,
                property_value: None,
                down_payment: None,
                monthly_payment: None,
                debt_to_income_ratio: None,
                expires_at: None,
                routing_score: None,
            },
        )
        .await;
    assert!(result.is_err());

    let url = std::env::var("LEADMARKET_TEST_DATABASE_URL").unwrap();
    let pool = sqlx::PgPool::connect(&url).await.unwrap();
    let orphans: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM borrowers WHERE user_id = $1")
        .bind(user_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(orphans, 0);
}
