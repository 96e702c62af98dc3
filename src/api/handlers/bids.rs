use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};

use crate::api::{
    auth::{authenticate, require_officer},
    error::error_response,
    state::AppState,
    types::AcceptBidResponse,
};
use crate::domain::{BidId, BidWithLoanAmount};

/// POST /api/bids/:id/accept
///
/// Open to the loan's borrower and to administrators.
pub async fn accept_bid(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(bid_id): Path<BidId>,
) -> std::result::Result<Json<AcceptBidResponse>, (StatusCode, String)> {
    let identity = authenticate(&state, &headers).await?;
    let accepted = state
        .bidding
        .accept_bid(identity, bid_id)
        .await
        .map_err(error_response)?;
    Ok(Json(AcceptBidResponse {
        winning_bid_id: accepted.plan.winning_bid_id,
        rejected_bid_ids: accepted.plan.rejected_ids(),
        loan: accepted.loan,
    }))
}

/// GET /api/bids/history
pub async fn get_bid_history(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> std::result::Result<Json<Vec<BidWithLoanAmount>>, (StatusCode, String)> {
    let officer = require_officer(&state, &headers).await?;
    let history = state
        .bidding
        .bid_history(officer.id)
        .await
        .map_err(error_response)?;
    Ok(Json(history))
}
