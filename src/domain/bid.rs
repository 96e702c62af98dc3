use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{BidId, LoanId, OfficerId};

/// Bid status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BidStatus {
    Pending,
    Active,
    Winning,
    Outbid,
    Expired,
    Rejected,
    Accepted,
}

impl BidStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Active => "ACTIVE",
            Self::Winning => "WINNING",
            Self::Outbid => "OUTBID",
            Self::Expired => "EXPIRED",
            Self::Rejected => "REJECTED",
            Self::Accepted => "ACCEPTED",
        }
    }
}

impl std::fmt::Display for BidStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for BidStatus {
    type Error = String;

    fn try_from(raw: &str) -> std::result::Result<Self, Self::Error> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "ACTIVE" => Ok(Self::Active),
            "WINNING" => Ok(Self::Winning),
            "OUTBID" => Ok(Self::Outbid),
            "EXPIRED" => Ok(Self::Expired),
            "REJECTED" => Ok(Self::Rejected),
            "ACCEPTED" => Ok(Self::Accepted),
            other => Err(format!("unknown bid status: {other}")),
        }
    }
}

/// A rate offer from an officer on a competitive loan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bid {
    pub id: BidId,
    pub loan_id: LoanId,
    pub officer_id: OfficerId,
    pub rate: Decimal,
    pub status: BidStatus,
    pub is_lowest: bool,
    pub is_final: bool,
    pub rebid_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Bid {
    pub fn is_active(&self) -> bool {
        self.status == BidStatus::Active
    }
}

/// A bid joined with the amount of the loan it was placed on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BidWithLoanAmount {
    pub bid: Bid,
    pub loan_amount: Decimal,
}
