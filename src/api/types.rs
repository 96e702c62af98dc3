use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::{BidId, Loan, LoanId, NotificationId};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub database: bool,
    pub connections: usize,
    pub uptime_secs: i64,
}

#[derive(Debug, Deserialize)]
pub struct PlaceBidRequest {
    pub rate: Decimal,
}

#[derive(Debug, Serialize)]
pub struct AcceptBidResponse {
    pub loan: Loan,
    pub winning_bid_id: BidId,
    pub rejected_bid_ids: Vec<BidId>,
}

#[derive(Debug, Serialize)]
pub struct ConversionResponse {
    pub loan_id: LoanId,
    /// False when the loan was already competitive
    pub converted: bool,
}

#[derive(Debug, Serialize)]
pub struct RescoreResponse {
    pub loan_id: LoanId,
    pub routing_score: Decimal,
}

#[derive(Debug, Serialize)]
pub struct MarkReadResponse {
    pub success: bool,
    pub notification_id: NotificationId,
}

#[derive(Debug, Serialize)]
pub struct MarkAllReadResponse {
    pub success: bool,
    pub updated: u64,
}
