use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, info, instrument};

use super::{AcceptedBid, ClaimedLoan, ExpiredLoan, LedgerStore, PlacedBid};
use crate::domain::{
    apply_claim_to_loan, apply_conversion, check_claim, plan_acceptance, plan_bid, plan_expiry,
    Bid, BidId, BidStatus, BidWithLoanAmount, Borrower, BorrowerId, CommunicationPreferences,
    CompetitiveFilter, GuaranteedAllocation, GuaranteedAssignment, GuaranteedRules, LeadType, Loan,
    LoanId, LoanPreferences, LoanStatus, NewBorrower, NewLoan, NewNotification, NewOfficer,
    Notification, NotificationId, NotificationKind, OfficerId, OfficerProfile, UserId,
    DEFAULT_MAX_BIDS,
};
use crate::error::{MarketError, Result};

const LOAN_COLUMNS: &str = r#"
    id, borrower_id, amount, original_rate, location, status, lead_type, fico_score,
    lowest_bid_rate, current_leader, max_bids, current_bid_count, is_guaranteed, is_closed,
    winning_bid, routing_score, loan_type, loan_term_months, property_value, down_payment,
    monthly_payment, debt_to_income_ratio, expires_at, created_at, updated_at
"#;

const BID_COLUMNS: &str = r#"
    id, loan_id, officer_id, rate, status, is_lowest, is_final, rebid_count, created_at, updated_at
"#;

const OFFICER_COLUMNS: &str = r#"
    id, user_id, nmls_id, company_name, is_active, min_loan_amount, max_loan_amount,
    min_credit_score, preferred_locations, created_at
"#;

const BORROWER_COLUMNS: &str = r#"
    id, user_id, first_name, last_name, email, phone_number, credit_score, annual_income,
    employment_status, property_type, property_use, created_at
"#;

const NOTIFICATION_COLUMNS: &str = r#"
    id, user_id, kind, title, message, loan_id, bid_id, is_read, created_at
"#;

/// Transaction scope, for log correlation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxScope {
    PlaceBid,
    AcceptBid,
    Claim,
    Convert,
    Intake,
    Expire,
    CreditReset,
}

impl std::fmt::Display for TxScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PlaceBid => write!(f, "place_bid"),
            Self::AcceptBid => write!(f, "accept_bid"),
            Self::Claim => write!(f, "claim"),
            Self::Convert => write!(f, "convert"),
            Self::Intake => write!(f, "intake"),
            Self::Expire => write!(f, "expire"),
            Self::CreditReset => write!(f, "credit_reset"),
        }
    }
}

fn parse_column<T>(raw: String) -> Result<T>
where
    T: for<'a> TryFrom<&'a str, Error = String>,
{
    T::try_from(raw.as_str()).map_err(MarketError::Internal)
}

fn loan_from_row(row: &PgRow) -> Result<Loan> {
    Ok(Loan {
        id: row.get("id"),
        borrower_id: row.get("borrower_id"),
        amount: row.get("amount"),
        original_rate: row.get("original_rate"),
        location: row.get("location"),
        status: parse_column::<LoanStatus>(row.get("status"))?,
        lead_type: parse_column::<LeadType>(row.get("lead_type"))?,
        fico_score: row.get("fico_score"),
        lowest_bid_rate: row.get("lowest_bid_rate"),
        current_leader: row.get("current_leader"),
        max_bids: row.get("max_bids"),
        current_bid_count: row.get("current_bid_count"),
        is_guaranteed: row.get("is_guaranteed"),
        is_closed: row.get("is_closed"),
        winning_bid: row.get("winning_bid"),
        routing_score: row.get("routing_score"),
        loan_type: row.get("loan_type"),
        loan_term_months: row.get("loan_term_months"),
        property_value: row.get("property_value"),
        down_payment: row.get("down_payment"),
        monthly_payment: row.get("monthly_payment"),
        debt_to_income_ratio: row.get("debt_to_income_ratio"),
        expires_at: row.get("expires_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn bid_from_row(row: &PgRow) -> Result<Bid> {
    Ok(Bid {
        id: row.get("id"),
        loan_id: row.get("loan_id"),
        officer_id: row.get("officer_id"),
        rate: row.get("rate"),
        status: parse_column::<BidStatus>(row.get("status"))?,
        is_lowest: row.get("is_lowest"),
        is_final: row.get("is_final"),
        rebid_count: row.get("rebid_count"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn officer_from_row(row: &PgRow) -> OfficerProfile {
    OfficerProfile {
        id: row.get("id"),
        user_id: row.get("user_id"),
        nmls_id: row.get("nmls_id"),
        company_name: row.get("company_name"),
        is_active: row.get("is_active"),
        preferences: LoanPreferences {
            min_loan_amount: row.get("min_loan_amount"),
            max_loan_amount: row.get("max_loan_amount"),
            min_credit_score: row.get("min_credit_score"),
            preferred_locations: row.get("preferred_locations"),
        },
        created_at: row.get("created_at"),
    }
}

fn borrower_from_row(row: &PgRow) -> Borrower {
    Borrower {
        id: row.get("id"),
        user_id: row.get("user_id"),
        first_name: row.get("first_name"),
        last_name: row.get("last_name"),
        email: row.get("email"),
        phone_number: row.get("phone_number"),
        credit_score: row.get("credit_score"),
        annual_income: row.get("annual_income"),
        employment_status: row.get("employment_status"),
        property_type: row.get("property_type"),
        property_use: row.get("property_use"),
        created_at: row.get("created_at"),
    }
}

fn notification_from_row(row: &PgRow) -> Result<Notification> {
    Ok(Notification {
        id: row.get("id"),
        user_id: row.get("user_id"),
        kind: parse_column::<NotificationKind>(row.get("kind"))?,
        title: row.get("title"),
        message: row.get("message"),
        loan_id: row.get("loan_id"),
        bid_id: row.get("bid_id"),
        is_read: row.get("is_read"),
        created_at: row.get("created_at"),
    })
}

fn allocation_from_row(row: &PgRow) -> GuaranteedAllocation {
    GuaranteedAllocation {
        officer_id: row.get("officer_id"),
        credits_available: row.get("credits_available"),
        credits_used: row.get("credits_used"),
        reset_date: row.get("reset_date"),
    }
}

fn assignment_from_row(row: &PgRow) -> GuaranteedAssignment {
    GuaranteedAssignment {
        id: row.get("id"),
        loan_id: row.get("loan_id"),
        officer_id: row.get("officer_id"),
        assigned_at: row.get("assigned_at"),
    }
}

/// Read and row-lock one loan inside a transaction.
async fn lock_loan(conn: &mut PgConnection, loan_id: LoanId) -> Result<Loan> {
    let row = sqlx::query(&format!(
        "SELECT {LOAN_COLUMNS} FROM loans WHERE id = $1 FOR UPDATE"
    ))
    .bind(loan_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| MarketError::not_found("loan", loan_id))?;
    loan_from_row(&row)
}

async fn loan_bids(conn: &mut PgConnection, loan_id: LoanId) -> Result<Vec<Bid>> {
    let rows = sqlx::query(&format!(
        "SELECT {BID_COLUMNS} FROM bids WHERE loan_id = $1 ORDER BY id"
    ))
    .bind(loan_id)
    .fetch_all(&mut *conn)
    .await?;
    rows.iter().map(bid_from_row).collect()
}

async fn write_allocation(conn: &mut PgConnection, alloc: &GuaranteedAllocation) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO guaranteed_allocations (officer_id, credits_available, credits_used, reset_date)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (officer_id) DO UPDATE SET
            credits_available = EXCLUDED.credits_available,
            credits_used = EXCLUDED.credits_used,
            reset_date = EXCLUDED.reset_date
        "#,
    )
    .bind(alloc.officer_id)
    .bind(alloc.credits_available)
    .bind(alloc.credits_used)
    .bind(alloc.reset_date)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn write_borrower(conn: &mut PgConnection, borrower: &NewBorrower) -> Result<Borrower> {
    let row = sqlx::query(&format!(
        r#"
        INSERT INTO borrowers (user_id, first_name, last_name, email, phone_number,
                               credit_score, annual_income, employment_status,
                               property_type, property_use)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING {BORROWER_COLUMNS}
        "#
    ))
    .bind(borrower.user_id)
    .bind(&borrower.first_name)
    .bind(&borrower.last_name)
    .bind(&borrower.email)
    .bind(&borrower.phone_number)
    .bind(borrower.credit_score)
    .bind(borrower.annual_income)
    .bind(&borrower.employment_status)
    .bind(&borrower.property_type)
    .bind(&borrower.property_use)
    .fetch_one(&mut *conn)
    .await?;
    Ok(borrower_from_row(&row))
}

async fn write_loan(conn: &mut PgConnection, loan: &NewLoan) -> Result<Loan> {
    let row = sqlx::query(&format!(
        r#"
        INSERT INTO loans (borrower_id, amount, original_rate, location, status, lead_type,
                           fico_score, max_bids, routing_score, loan_type, loan_term_months,
                           property_value, down_payment, monthly_payment,
                           debt_to_income_ratio, expires_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
        RETURNING {LOAN_COLUMNS}
        "#
    ))
    .bind(loan.borrower_id)
    .bind(loan.amount)
    .bind(loan.original_rate)
    .bind(&loan.location)
    .bind(loan.status.as_str())
    .bind(loan.lead_type.as_str())
    .bind(loan.fico_score)
    .bind(loan.max_bids.unwrap_or(DEFAULT_MAX_BIDS))
    .bind(loan.routing_score)
    .bind(&loan.loan_type)
    .bind(loan.loan_term_months)
    .bind(loan.property_value)
    .bind(loan.down_payment)
    .bind(loan.monthly_payment)
    .bind(loan.debt_to_income_ratio)
    .bind(loan.expires_at)
    .fetch_one(&mut *conn)
    .await?;
    loan_from_row(&row)
}

/// PostgreSQL ledger
#[derive(Clone)]
pub struct PostgresLedger {
    pool: PgPool,
}

impl PostgresLedger {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl LedgerStore for PostgresLedger {
    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    // ==================== Parties ====================

    async fn insert_officer(&self, officer: NewOfficer) -> Result<OfficerProfile> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO officers (user_id, nmls_id, company_name, is_active, min_loan_amount,
                                  max_loan_amount, min_credit_score, preferred_locations)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {OFFICER_COLUMNS}
            "#
        ))
        .bind(officer.user_id)
        .bind(&officer.nmls_id)
        .bind(&officer.company_name)
        .bind(officer.is_active)
        .bind(officer.preferences.min_loan_amount)
        .bind(officer.preferences.max_loan_amount)
        .bind(officer.preferences.min_credit_score)
        .bind(&officer.preferences.preferred_locations)
        .fetch_one(&self.pool)
        .await?;
        Ok(officer_from_row(&row))
    }

    async fn officer(&self, id: OfficerId) -> Result<Option<OfficerProfile>> {
        let row = sqlx::query(&format!("SELECT {OFFICER_COLUMNS} FROM officers WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(officer_from_row))
    }

    async fn officer_by_user(&self, user_id: UserId) -> Result<Option<OfficerProfile>> {
        let row = sqlx::query(&format!(
            "SELECT {OFFICER_COLUMNS} FROM officers WHERE user_id = $1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(officer_from_row))
    }

    async fn active_officers(&self) -> Result<Vec<OfficerProfile>> {
        let rows = sqlx::query(&format!(
            "SELECT {OFFICER_COLUMNS} FROM officers WHERE is_active ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(officer_from_row).collect())
    }

    async fn insert_borrower(&self, borrower: NewBorrower) -> Result<Borrower> {
        let mut conn = self.pool.acquire().await?;
        write_borrower(&mut conn, &borrower).await
    }

    async fn borrower(&self, id: BorrowerId) -> Result<Option<Borrower>> {
        let row = sqlx::query(&format!(
            "SELECT {BORROWER_COLUMNS} FROM borrowers WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(borrower_from_row))
    }

    // ==================== Loans ====================

    #[instrument(skip(self, loan), fields(borrower_id = loan.borrower_id))]
    async fn insert_loan(&self, loan: NewLoan) -> Result<Loan> {
        let mut conn = self.pool.acquire().await?;
        write_loan(&mut conn, &loan).await
    }

    #[instrument(skip_all)]
    async fn insert_borrower_with_loan(
        &self,
        borrower: NewBorrower,
        mut loan: NewLoan,
    ) -> Result<(Borrower, Loan)> {
        let mut tx = self.pool.begin().await?;
        debug!("Started transaction for scope: {}", TxScope::Intake);

        let borrower = write_borrower(&mut tx, &borrower).await?;
        loan.borrower_id = borrower.id;
        let loan = write_loan(&mut tx, &loan).await?;

        tx.commit().await?;
        Ok((borrower, loan))
    }

    async fn loan(&self, id: LoanId) -> Result<Option<Loan>> {
        let row = sqlx::query(&format!("SELECT {LOAN_COLUMNS} FROM loans WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(loan_from_row).transpose()
    }

    async fn competitive_loans(&self, filter: &CompetitiveFilter) -> Result<Vec<Loan>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {LOAN_COLUMNS} FROM loans
            WHERE lead_type = 'COMPETITIVE'
              AND status = 'AVAILABLE'
              AND NOT is_closed
              AND ($1::NUMERIC IS NULL OR amount >= $1)
              AND ($2::NUMERIC IS NULL OR amount <= $2)
              AND ($3::INTEGER IS NULL OR fico_score >= $3)
              AND ($4::TEXT IS NULL OR UPPER(location) = UPPER($4))
            ORDER BY id
            "#
        ))
        .bind(filter.min_amount)
        .bind(filter.max_amount)
        .bind(filter.min_fico)
        .bind(filter.location.as_deref().map(str::trim))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(loan_from_row).collect()
    }

    async fn open_loans(&self) -> Result<Vec<Loan>> {
        let rows = sqlx::query(&format!(
            "SELECT {LOAN_COLUMNS} FROM loans WHERE status = 'AVAILABLE' AND NOT is_closed ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(loan_from_row).collect()
    }

    async fn set_routing_score(&self, loan_id: LoanId, score: Decimal) -> Result<()> {
        let result = sqlx::query(
            "UPDATE loans SET routing_score = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(loan_id)
        .bind(score)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(MarketError::not_found("loan", loan_id));
        }
        Ok(())
    }

    async fn won_loans(&self, officer_id: OfficerId) -> Result<Vec<Loan>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {LOAN_COLUMNS} FROM loans l
            WHERE l.is_closed
              AND (EXISTS (
                      SELECT 1 FROM bids b WHERE b.id = l.winning_bid AND b.officer_id = $1)
                   OR EXISTS (
                      SELECT 1 FROM guaranteed_assignments a
                      WHERE a.loan_id = l.id AND a.officer_id = $1))
            ORDER BY l.id
            "#
        ))
        .bind(officer_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(loan_from_row).collect()
    }

    async fn due_loans(&self, now: DateTime<Utc>) -> Result<Vec<LoanId>> {
        let rows = sqlx::query(
            r#"
            SELECT id FROM loans
            WHERE status = 'AVAILABLE' AND NOT is_closed
              AND expires_at IS NOT NULL AND expires_at <= $1
            ORDER BY id
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(|r| r.get("id")).collect())
    }

    // ==================== Bids ====================

    async fn bid(&self, id: BidId) -> Result<Option<Bid>> {
        let row = sqlx::query(&format!("SELECT {BID_COLUMNS} FROM bids WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(bid_from_row).transpose()
    }

    async fn bids_for_loan(&self, loan_id: LoanId) -> Result<Vec<Bid>> {
        let mut conn = self.pool.acquire().await?;
        loan_bids(&mut conn, loan_id).await
    }

    async fn active_bids_for_loans(&self, loan_ids: &[LoanId]) -> Result<Vec<Bid>> {
        if loan_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(&format!(
            "SELECT {BID_COLUMNS} FROM bids WHERE status = 'ACTIVE' AND loan_id = ANY($1) ORDER BY id"
        ))
        .bind(loan_ids)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(bid_from_row).collect()
    }

    async fn bids_by_officer(&self, officer_id: OfficerId) -> Result<Vec<BidWithLoanAmount>> {
        let rows = sqlx::query(
            r#"
            SELECT b.id, b.loan_id, b.officer_id, b.rate, b.status, b.is_lowest, b.is_final,
                   b.rebid_count, b.created_at, b.updated_at, l.amount AS loan_amount
            FROM bids b JOIN loans l ON l.id = b.loan_id
            WHERE b.officer_id = $1
            ORDER BY b.created_at DESC, b.id DESC
            "#,
        )
        .bind(officer_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| -> Result<BidWithLoanAmount> {
                Ok(BidWithLoanAmount {
                    bid: bid_from_row(row)?,
                    loan_amount: row.get("loan_amount"),
                })
            })
            .collect()
    }

    // ==================== Transactions ====================

    #[instrument(skip(self))]
    async fn place_bid(
        &self,
        loan_id: LoanId,
        officer_id: OfficerId,
        rate: Decimal,
        now: DateTime<Utc>,
    ) -> Result<PlacedBid> {
        let mut tx = self.pool.begin().await?;
        debug!("Started transaction for scope: {}", TxScope::PlaceBid);

        let loan = lock_loan(&mut tx, loan_id).await?;
        let bids = loan_bids(&mut tx, loan_id).await?;
        let plan = plan_bid(&loan, &bids, officer_id, rate)?;

        // Clear the lowest flag before inserting the new lowest bid.
        sqlx::query(
            r#"
            UPDATE bids SET
                status = CASE WHEN id = ANY($2) THEN 'OUTBID' ELSE status END,
                is_lowest = FALSE,
                updated_at = $3
            WHERE loan_id = $1 AND (is_lowest OR id = ANY($2))
            "#,
        )
        .bind(loan_id)
        .bind(plan.outbid_ids())
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO bids (loan_id, officer_id, rate, status, is_lowest, is_final,
                              rebid_count, created_at, updated_at)
            VALUES ($1, $2, $3, $4, TRUE, FALSE, $5, $6, $6)
            RETURNING {BID_COLUMNS}
            "#
        ))
        .bind(loan_id)
        .bind(officer_id)
        .bind(plan.rate)
        .bind(BidStatus::Active.as_str())
        .bind(plan.rebid_count)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;
        let bid = bid_from_row(&row)?;

        let row = sqlx::query(&format!(
            r#"
            UPDATE loans SET
                lowest_bid_rate = $2,
                current_leader = $3,
                current_bid_count = $4,
                updated_at = $5
            WHERE id = $1
            RETURNING {LOAN_COLUMNS}
            "#
        ))
        .bind(loan_id)
        .bind(plan.rate)
        .bind(officer_id)
        .bind(plan.new_bid_count)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;
        let loan = loan_from_row(&row)?;

        tx.commit().await?;
        debug!(loan_id, bid_id = bid.id, outbid = plan.outbid.len(), "bid committed");
        Ok(PlacedBid {
            loan,
            bid,
            outbid: plan.outbid,
        })
    }

    #[instrument(skip(self))]
    async fn accept_bid(&self, bid_id: BidId, now: DateTime<Utc>) -> Result<AcceptedBid> {
        let loan_id: LoanId = sqlx::query("SELECT loan_id FROM bids WHERE id = $1")
            .bind(bid_id)
            .fetch_optional(&self.pool)
            .await?
            .map(|r| r.get("loan_id"))
            .ok_or_else(|| MarketError::not_found("bid", bid_id))?;

        let mut tx = self.pool.begin().await?;
        debug!("Started transaction for scope: {}", TxScope::AcceptBid);

        let loan = lock_loan(&mut tx, loan_id).await?;
        let bids = loan_bids(&mut tx, loan_id).await?;
        let plan = plan_acceptance(&loan, &bids, bid_id)?;

        sqlx::query(
            r#"
            UPDATE bids SET
                status = CASE WHEN id = $2 THEN 'ACCEPTED' ELSE 'REJECTED' END,
                is_final = TRUE,
                updated_at = $3
            WHERE loan_id = $1
            "#,
        )
        .bind(loan_id)
        .bind(bid_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query(&format!(
            r#"
            UPDATE loans SET status = 'CLOSED', is_closed = TRUE, winning_bid = $2, updated_at = $3
            WHERE id = $1
            RETURNING {LOAN_COLUMNS}
            "#
        ))
        .bind(loan_id)
        .bind(bid_id)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;
        let loan = loan_from_row(&row)?;

        tx.commit().await?;
        Ok(AcceptedBid { loan, plan })
    }

    #[instrument(skip(self, rules))]
    async fn claim_guaranteed(
        &self,
        loan_id: LoanId,
        officer_id: OfficerId,
        rules: &GuaranteedRules,
        now: DateTime<Utc>,
    ) -> Result<ClaimedLoan> {
        let mut tx = self.pool.begin().await?;
        debug!("Started transaction for scope: {}", TxScope::Claim);

        // Lock order: loan, then allocation.
        let mut loan = lock_loan(&mut tx, loan_id).await?;
        let already_assigned: bool = sqlx::query(
            "SELECT EXISTS (SELECT 1 FROM guaranteed_assignments WHERE loan_id = $1) AS assigned",
        )
        .bind(loan_id)
        .fetch_one(&mut *tx)
        .await?
        .get("assigned");

        let mut allocation = sqlx::query(
            r#"
            SELECT officer_id, credits_available, credits_used, reset_date
            FROM guaranteed_allocations WHERE officer_id = $1 FOR UPDATE
            "#,
        )
        .bind(officer_id)
        .fetch_optional(&mut *tx)
        .await?
        .as_ref()
        .map(allocation_from_row);
        if let Some(alloc) = allocation.as_mut() {
            alloc.reset_if_due(rules, now);
        }

        check_claim(&loan, already_assigned, allocation.as_ref(), rules)?;
        let Some(mut allocation) = allocation else {
            return Err(MarketError::NoCreditsAvailable);
        };
        allocation.consume_credit()?;
        write_allocation(&mut tx, &allocation).await?;

        let row = sqlx::query(
            r#"
            INSERT INTO guaranteed_assignments (loan_id, officer_id, assigned_at)
            VALUES ($1, $2, $3)
            RETURNING id, loan_id, officer_id, assigned_at
            "#,
        )
        .bind(loan_id)
        .bind(officer_id)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;
        let assignment = assignment_from_row(&row);

        apply_claim_to_loan(&mut loan, now);
        sqlx::query(
            "UPDATE loans SET is_guaranteed = TRUE, lead_type = $2, updated_at = $3 WHERE id = $1",
        )
        .bind(loan_id)
        .bind(loan.lead_type.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(ClaimedLoan {
            loan,
            assignment,
            allocation,
        })
    }

    #[instrument(skip(self))]
    async fn convert_to_competitive(&self, loan_id: LoanId, now: DateTime<Utc>) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        debug!("Started transaction for scope: {}", TxScope::Convert);

        let mut loan = lock_loan(&mut tx, loan_id).await?;
        if !apply_conversion(&mut loan, now) {
            return Ok(false);
        }
        sqlx::query(
            "UPDATE loans SET is_guaranteed = FALSE, lead_type = $2, updated_at = $3 WHERE id = $1",
        )
        .bind(loan_id)
        .bind(loan.lead_type.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM guaranteed_assignments WHERE loan_id = $1")
            .bind(loan_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    #[instrument(skip(self))]
    async fn expire_loan(&self, loan_id: LoanId, now: DateTime<Utc>) -> Result<Option<ExpiredLoan>> {
        let mut tx = self.pool.begin().await?;
        debug!("Started transaction for scope: {}", TxScope::Expire);

        let mut loan = lock_loan(&mut tx, loan_id).await?;
        let bids = loan_bids(&mut tx, loan_id).await?;
        let Some(plan) = plan_expiry(&loan, &bids, now) else {
            return Ok(None);
        };

        sqlx::query(
            r#"
            UPDATE bids SET status = 'EXPIRED', is_lowest = FALSE, updated_at = $2
            WHERE id = ANY($1)
            "#,
        )
        .bind(&plan.expired_bids)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        plan.apply_to_loan(&mut loan, now);
        sqlx::query("UPDATE loans SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(loan_id)
            .bind(loan.status.as_str())
            .bind(now)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(ExpiredLoan { loan, plan }))
    }

    // ==================== Allocations ====================

    async fn allocation(&self, officer_id: OfficerId) -> Result<Option<GuaranteedAllocation>> {
        let row = sqlx::query(
            r#"
            SELECT officer_id, credits_available, credits_used, reset_date
            FROM guaranteed_allocations WHERE officer_id = $1
            "#,
        )
        .bind(officer_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(allocation_from_row))
    }

    async fn upsert_allocation(&self, allocation: &GuaranteedAllocation) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        write_allocation(&mut conn, allocation).await
    }

    #[instrument(skip(self, rules))]
    async fn reset_due_allocations(&self, rules: &GuaranteedRules, now: DateTime<Utc>) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        debug!("Started transaction for scope: {}", TxScope::CreditReset);

        let rows = sqlx::query(
            r#"
            SELECT officer_id, credits_available, credits_used, reset_date
            FROM guaranteed_allocations WHERE reset_date <= $1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(now)
        .fetch_all(&mut *tx)
        .await?;

        let mut reset = 0;
        for row in &rows {
            let mut alloc = allocation_from_row(row);
            if alloc.reset_if_due(rules, now) {
                write_allocation(&mut tx, &alloc).await?;
                reset += 1;
            }
        }

        tx.commit().await?;
        Ok(reset)
    }

    async fn assignments_for_officer(&self, officer_id: OfficerId) -> Result<Vec<GuaranteedAssignment>> {
        let rows = sqlx::query(
            r#"
            SELECT id, loan_id, officer_id, assigned_at FROM guaranteed_assignments
            WHERE officer_id = $1 ORDER BY assigned_at, id
            "#,
        )
        .bind(officer_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(assignment_from_row).collect())
    }

    async fn assigned_loan_ids(&self) -> Result<HashSet<LoanId>> {
        let rows = sqlx::query("SELECT loan_id FROM guaranteed_assignments")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|r| r.get("loan_id")).collect())
    }

    // ==================== Notifications ====================

    async fn insert_notification(&self, notification: NewNotification) -> Result<Notification> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO notifications (user_id, kind, title, message, loan_id, bid_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {NOTIFICATION_COLUMNS}
            "#
        ))
        .bind(notification.user_id)
        .bind(notification.kind.as_str())
        .bind(&notification.title)
        .bind(&notification.message)
        .bind(notification.loan_id)
        .bind(notification.bid_id)
        .fetch_one(&self.pool)
        .await?;
        notification_from_row(&row)
    }

    async fn notifications_for(&self, user_id: UserId) -> Result<Vec<Notification>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {NOTIFICATION_COLUMNS} FROM notifications
            WHERE user_id = $1 ORDER BY created_at DESC, id DESC
            "#
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(notification_from_row).collect()
    }

    async fn mark_read(&self, user_id: UserId, id: NotificationId) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE notifications SET is_read = TRUE WHERE id = $1 AND user_id = $2",
        )
        .bind(id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_all_read(&self, user_id: UserId) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE notifications SET is_read = TRUE WHERE user_id = $1 AND NOT is_read",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn preferences(&self, user_id: UserId) -> Result<CommunicationPreferences> {
        let row = sqlx::query(
            r#"
            SELECT via_dashboard, via_email, via_sms
            FROM communication_preferences WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row
            .map(|r| CommunicationPreferences {
                via_dashboard: r.get("via_dashboard"),
                via_email: r.get("via_email"),
                via_sms: r.get("via_sms"),
            })
            .unwrap_or_default())
    }

    async fn save_preferences(&self, user_id: UserId, prefs: &CommunicationPreferences) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO communication_preferences (user_id, via_dashboard, via_email, via_sms)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id) DO UPDATE SET
                via_dashboard = EXCLUDED.via_dashboard,
                via_email = EXCLUDED.via_email,
                via_sms = EXCLUDED.via_sms
            "#,
        )
        .bind(user_id)
        .bind(prefs.via_dashboard)
        .bind(prefs.via_email)
        .bind(prefs.via_sms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
