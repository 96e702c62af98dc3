use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{BidId, BorrowerId, LoanId, OfficerId, UserId};

/// Rebid cap when neither the intake nor the configuration names one
pub const DEFAULT_MAX_BIDS: i32 = 10;

/// Loan lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoanStatus {
    New,
    Available,
    InProgress,
    Pending,
    Approved,
    Closed,
    Expired,
}

impl LoanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Available => "AVAILABLE",
            Self::InProgress => "IN_PROGRESS",
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::Closed => "CLOSED",
            Self::Expired => "EXPIRED",
        }
    }
}

impl std::fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for LoanStatus {
    type Error = String;

    fn try_from(raw: &str) -> std::result::Result<Self, Self::Error> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "NEW" => Ok(Self::New),
            "AVAILABLE" => Ok(Self::Available),
            "IN_PROGRESS" => Ok(Self::InProgress),
            "PENDING" => Ok(Self::Pending),
            "APPROVED" => Ok(Self::Approved),
            "CLOSED" => Ok(Self::Closed),
            "EXPIRED" => Ok(Self::Expired),
            other => Err(format!("unknown loan status: {other}")),
        }
    }
}

/// Allocation path a lead travels through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LeadType {
    Guaranteed,
    Competitive,
}

impl LeadType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Guaranteed => "GUARANTEED",
            Self::Competitive => "COMPETITIVE",
        }
    }
}

impl std::fmt::Display for LeadType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for LeadType {
    type Error = String;

    fn try_from(raw: &str) -> std::result::Result<Self, Self::Error> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "GUARANTEED" => Ok(Self::Guaranteed),
            "COMPETITIVE" => Ok(Self::Competitive),
            other => Err(format!("unknown lead type: {other}")),
        }
    }
}

/// A mortgage lead as held in the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Loan {
    pub id: LoanId,
    pub borrower_id: BorrowerId,
    pub amount: Decimal,
    pub original_rate: Decimal,
    pub location: String,
    pub status: LoanStatus,
    pub lead_type: LeadType,
    pub fico_score: i32,
    pub lowest_bid_rate: Option<Decimal>,
    pub current_leader: Option<OfficerId>,
    pub max_bids: i32,
    pub current_bid_count: i32,
    pub is_guaranteed: bool,
    pub is_closed: bool,
    pub winning_bid: Option<BidId>,
    pub routing_score: Option<Decimal>,
    pub loan_type: Option<String>,
    pub loan_term_months: Option<i32>,
    pub property_value: Option<Decimal>,
    pub down_payment: Option<Decimal>,
    pub monthly_payment: Option<Decimal>,
    pub debt_to_income_ratio: Option<Decimal>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loan {
    /// Open for bids or claims: AVAILABLE and not closed.
    pub fn is_open(&self) -> bool {
        self.status == LoanStatus::Available && !self.is_closed
    }

    /// Loan-to-value ratio in percent
    pub fn ltv_ratio(&self) -> Option<Decimal> {
        match self.property_value {
            Some(value) if value > Decimal::ZERO => {
                Some((self.amount / value * Decimal::ONE_HUNDRED).round_dp(2))
            }
            _ => None,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Whole days left before expiry, floored at zero
    pub fn days_remaining(&self, now: DateTime<Utc>) -> Option<i64> {
        self.expires_at
            .map(|at| (at - now).num_days().max(0))
    }
}

/// Loan terms for a new lead, as produced by document intake
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLoan {
    #[serde(default)]
    pub borrower_id: BorrowerId,
    pub amount: Decimal,
    pub original_rate: Decimal,
    pub location: String,
    #[serde(default = "default_new_status")]
    pub status: LoanStatus,
    #[serde(default = "default_lead_type")]
    pub lead_type: LeadType,
    pub fico_score: i32,
    #[serde(default)]
    pub max_bids: Option<i32>,
    #[serde(default)]
    pub loan_type: Option<String>,
    #[serde(default)]
    pub loan_term_months: Option<i32>,
    #[serde(default)]
    pub property_value: Option<Decimal>,
    #[serde(default)]
    pub down_payment: Option<Decimal>,
    #[serde(default)]
    pub monthly_payment: Option<Decimal>,
    #[serde(default)]
    pub debt_to_income_ratio: Option<Decimal>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub routing_score: Option<Decimal>,
}

fn default_new_status() -> LoanStatus {
    LoanStatus::Available
}

fn default_lead_type() -> LeadType {
    LeadType::Competitive
}

impl NewLoan {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.amount <= Decimal::ZERO {
            return Err("loan amount must be positive".to_string());
        }
        if self.original_rate <= Decimal::ZERO || self.original_rate >= Decimal::ONE_HUNDRED {
            return Err("original rate must be between 0 and 100".to_string());
        }
        if !(300..=850).contains(&self.fico_score) {
            return Err("fico score must be between 300 and 850".to_string());
        }
        if self.location.trim().is_empty() {
            return Err("location is required".to_string());
        }
        if self.max_bids.is_some_and(|m| m <= 0) {
            return Err("max_bids must be positive".to_string());
        }
        Ok(())
    }

    /// Materialize the row the ledger will insert.
    pub fn into_loan(self, id: LoanId, default_max_bids: i32, now: DateTime<Utc>) -> Loan {
        Loan {
            id,
            borrower_id: self.borrower_id,
            amount: self.amount,
            original_rate: self.original_rate,
            location: self.location,
            status: self.status,
            lead_type: self.lead_type,
            fico_score: self.fico_score,
            lowest_bid_rate: None,
            current_leader: None,
            max_bids: self.max_bids.unwrap_or(default_max_bids),
            current_bid_count: 0,
            is_guaranteed: false,
            is_closed: false,
            winning_bid: None,
            routing_score: self.routing_score,
            loan_type: self.loan_type,
            loan_term_months: self.loan_term_months,
            property_value: self.property_value,
            down_payment: self.down_payment,
            monthly_payment: self.monthly_payment,
            debt_to_income_ratio: self.debt_to_income_ratio,
            expires_at: self.expires_at,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Borrower record attached to a loan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Borrower {
    pub id: BorrowerId,
    pub user_id: Option<UserId>,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone_number: Option<String>,
    pub credit_score: Option<i32>,
    pub annual_income: Option<Decimal>,
    pub employment_status: Option<String>,
    pub property_type: Option<String>,
    pub property_use: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Borrower {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewBorrower {
    #[serde(default)]
    pub user_id: Option<UserId>,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub credit_score: Option<i32>,
    #[serde(default)]
    pub annual_income: Option<Decimal>,
    #[serde(default)]
    pub employment_status: Option<String>,
    #[serde(default)]
    pub property_type: Option<String>,
    #[serde(default)]
    pub property_use: Option<String>,
}

impl NewBorrower {
    pub fn into_borrower(self, id: BorrowerId, now: DateTime<Utc>) -> Borrower {
        Borrower {
            id,
            user_id: self.user_id,
            first_name: self.first_name,
            last_name: self.last_name,
            email: self.email,
            phone_number: self.phone_number,
            credit_score: self.credit_score,
            annual_income: self.annual_income,
            employment_status: self.employment_status,
            property_type: self.property_type,
            property_use: self.property_use,
            created_at: now,
        }
    }
}

/// Filter for the competitive loan board
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompetitiveFilter {
    pub min_amount: Option<Decimal>,
    pub max_amount: Option<Decimal>,
    pub min_fico: Option<i32>,
    pub location: Option<String>,
}

impl CompetitiveFilter {
    pub fn matches(&self, loan: &Loan) -> bool {
        if loan.lead_type != LeadType::Competitive || !loan.is_open() {
            return false;
        }
        if self.min_amount.is_some_and(|min| loan.amount < min) {
            return false;
        }
        if self.max_amount.is_some_and(|max| loan.amount > max) {
            return false;
        }
        if self.min_fico.is_some_and(|min| loan.fico_score < min) {
            return false;
        }
        if let Some(location) = self.location.as_deref() {
            if !loan.location.eq_ignore_ascii_case(location.trim()) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use rust_decimal_macros::dec;

    pub fn loan(id: LoanId) -> Loan {
        let now = Utc::now();
        NewLoan {
            borrower_id: 1,
            amount: dec!(400000),
            original_rate: dec!(5.00),
            location: "CA".to_string(),
            status: LoanStatus::Available,
            lead_type: LeadType::Competitive,
            fico_score: 720,
            max_bids: None,
            loan_type: Some("CONVENTIONAL".to_string()),
            loan_term_months: Some(360),
            property_value: Some(dec!(500000)),
            down_payment: None,
            monthly_payment: None,
            debt_to_income_ratio: Some(dec!(30)),
            expires_at: None,
            routing_score: None,
        }
        .into_loan(id, 10, now)
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::loan;
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn status_round_trips_through_db_text() {
        for status in [
            LoanStatus::New,
            LoanStatus::InProgress,
            LoanStatus::Closed,
            LoanStatus::Expired,
        ] {
            assert_eq!(LoanStatus::try_from(status.as_str()), Ok(status));
        }
        assert!(LoanStatus::try_from("archived").is_err());
    }

    #[test]
    fn ltv_ratio_needs_property_value() {
        let mut l = loan(1);
        assert_eq!(l.ltv_ratio(), Some(dec!(80.00)));
        l.property_value = None;
        assert_eq!(l.ltv_ratio(), None);
    }

    #[test]
    fn competitive_filter_applies_every_bound() {
        let l = loan(1);
        assert!(CompetitiveFilter::default().matches(&l));

        let filter = CompetitiveFilter {
            min_amount: Some(dec!(500000)),
            ..Default::default()
        };
        assert!(!filter.matches(&l));

        let filter = CompetitiveFilter {
            location: Some("ca".to_string()),
            min_fico: Some(700),
            ..Default::default()
        };
        assert!(filter.matches(&l));

        let mut closed = loan(2);
        closed.is_closed = true;
        closed.status = LoanStatus::Closed;
        assert!(!CompetitiveFilter::default().matches(&closed));
    }

    #[test]
    fn new_loan_validation_rejects_bad_terms() {
        let mut intake = NewLoan {
            borrower_id: 1,
            amount: dec!(0),
            original_rate: dec!(5),
            location: "TX".into(),
            status: LoanStatus::Available,
            lead_type: LeadType::Competitive,
            fico_score: 700,
            max_bids: None,
            loan_type: None,
            loan_term_months: None,
            property_value: None,
            down_payment: None,
            monthly_payment: None,
            debt_to_income_ratio: None,
            expires_at: None,
            routing_score: None,
        };
        assert!(intake.validate().is_err());
        intake.amount = dec!(250000);
        assert!(intake.validate().is_ok());
        intake.fico_score = 900;
        assert!(intake.validate().is_err());
    }
}
