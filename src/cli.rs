use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use rand::seq::SliceRandom;
use rand::Rng;
use rust_decimal::Decimal;
use tracing::info;

use crate::domain::{
    is_eligible_for_guaranteed, routing_score, GuaranteedAllocation, GuaranteedRules, LeadType,
    LoanPreferences, LoanStatus, NewBorrower, NewLoan, NewOfficer, DEFAULT_MAX_BIDS,
};
use crate::error::Result;
use crate::ledger::LedgerStore;

#[derive(Parser)]
#[command(name = "leadmarket")]
#[command(author = "Leadmarket Team")]
#[command(version = "0.1.0")]
#[command(about = "Mortgage lead marketplace: guaranteed pool, competitive bidding, live updates", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Config directory
    #[arg(short, long, default_value = "config")]
    pub config: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP/WebSocket server and the maintenance sweep
    Serve {
        /// Use the in-memory ledger instead of PostgreSQL
        #[arg(long)]
        memory: bool,
    },
    /// Apply database migrations
    Migrate,
    /// Insert random demo officers, borrowers and loans
    Seed {
        /// Number of loans to create
        #[arg(long, default_value = "20")]
        count: usize,
    },
    /// Issue a signed bearer token for development
    Token {
        #[arg(long)]
        user_id: i64,
        /// ADMIN, LOAN_OFFICER or BORROWER
        #[arg(long, default_value = "LOAN_OFFICER")]
        role: String,
    },
    /// Recompute routing scores of every open loan
    Rescore,
}

const DEMO_LOCATIONS: &[&str] = &["CA", "TX", "FL", "NY", "WA", "CO", "AZ", "GA"];
const DEMO_FIRST_NAMES: &[&str] = &["Alex", "Jordan", "Taylor", "Morgan", "Casey", "Riley"];
const DEMO_LAST_NAMES: &[&str] = &["Garcia", "Nguyen", "Smith", "Patel", "Kim", "Okafor"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub officers: usize,
    pub loans: usize,
    pub guaranteed: usize,
}

/// Random officer profiles; user ids start at `first_user_id`.
pub fn demo_officers(rng: &mut impl Rng, count: usize, first_user_id: i64) -> Vec<NewOfficer> {
    (0..count)
        .map(|i| {
            let user_id = first_user_id + i as i64;
            let locations = DEMO_LOCATIONS
                .choose_multiple(rng, 3)
                .map(|s| s.to_string())
                .collect();
            NewOfficer {
                user_id,
                nmls_id: format!("NMLS{}", rng.gen_range(100_000..1_000_000)),
                company_name: format!("Demo Lending {}", i + 1),
                is_active: true,
                preferences: LoanPreferences {
                    min_loan_amount: Some(Decimal::from(100_000)),
                    max_loan_amount: Some(Decimal::from(1_000_000)),
                    min_credit_score: Some(rng.gen_range(620..=700)),
                    preferred_locations: locations,
                },
            }
        })
        .collect()
}

/// One random borrower with loan terms. Eligible loans go to the guaranteed
/// pool with probability `guaranteed_share`.
pub fn demo_loan(
    rng: &mut impl Rng,
    index: usize,
    rules: &GuaranteedRules,
    guaranteed_share: f64,
) -> (NewBorrower, NewLoan) {
    let first = DEMO_FIRST_NAMES.choose(rng).copied().unwrap_or("Alex");
    let last = DEMO_LAST_NAMES.choose(rng).copied().unwrap_or("Smith");
    let fico = rng.gen_range(600..=820);
    let amount = Decimal::from(rng.gen_range(150..=1_200) * 1_000);
    let ltv_pct = rng.gen_range(60..=95);
    let property_value = (amount * Decimal::ONE_HUNDRED / Decimal::from(ltv_pct)).round_dp(0);

    let borrower = NewBorrower {
        user_id: None,
        first_name: first.to_string(),
        last_name: last.to_string(),
        email: format!("{}.{}{}@example.com", first, last, index).to_lowercase(),
        phone_number: None,
        credit_score: Some(fico),
        annual_income: Some(Decimal::from(rng.gen_range(60..=400) * 1_000)),
        employment_status: Some("EMPLOYED".to_string()),
        property_type: Some("SINGLE_FAMILY".to_string()),
        property_use: Some("PRIMARY".to_string()),
    };

    let mut loan = NewLoan {
        borrower_id: 0,
        amount,
        original_rate: Decimal::new(rng.gen_range(550..=750), 2),
        location: DEMO_LOCATIONS.choose(rng).copied().unwrap_or("CA").to_string(),
        status: LoanStatus::Available,
        lead_type: LeadType::Competitive,
        fico_score: fico,
        max_bids: Some(DEFAULT_MAX_BIDS),
        loan_type: Some("CONVENTIONAL".to_string()),
        loan_term_months: Some(360),
        property_value: Some(property_value),
        down_payment: Some(property_value - amount),
        monthly_payment: None,
        debt_to_income_ratio: Some(Decimal::from(rng.gen_range(15..=45))),
        expires_at: Some(Utc::now() + Duration::days(rng.gen_range(3..=14))),
        routing_score: None,
    };

    let mut preview = loan.clone().into_loan(0, DEFAULT_MAX_BIDS, Utc::now());
    loan.routing_score = Some(routing_score(&preview));
    preview.lead_type = LeadType::Guaranteed;
    if is_eligible_for_guaranteed(&preview, rules) && rng.gen_bool(guaranteed_share) {
        loan.lead_type = LeadType::Guaranteed;
    }
    (borrower, loan)
}

/// Fill the ledger with demo data; every officer gets a fresh allocation.
pub async fn seed_demo_data(
    ledger: &dyn LedgerStore,
    rules: &GuaranteedRules,
    count: usize,
) -> Result<SeedReport> {
    // Generate up front so the thread-local rng never crosses an await.
    let (officers, loans) = {
        let mut rng = rand::thread_rng();
        let officers = demo_officers(&mut rng, (count / 5).max(2), 1_000);
        let loans: Vec<_> = (0..count)
            .map(|i| demo_loan(&mut rng, i, rules, 0.4))
            .collect();
        (officers, loans)
    };

    let now = Utc::now();
    let mut report = SeedReport::default();
    for officer in officers {
        let profile = ledger.insert_officer(officer).await?;
        ledger
            .upsert_allocation(&GuaranteedAllocation::fresh(profile.id, rules, now))
            .await?;
        report.officers += 1;
    }
    for (borrower, loan) in loans {
        let (_, loan) = ledger.insert_borrower_with_loan(borrower, loan).await?;
        if loan.lead_type == LeadType::Guaranteed {
            report.guaranteed += 1;
        }
        report.loans += 1;
    }

    info!(
        officers = report.officers,
        loans = report.loans,
        guaranteed = report.guaranteed,
        "demo data seeded"
    );
    Ok(report)
}
