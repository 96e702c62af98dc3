use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};

use crate::api::{
    auth::{authenticate, require_admin, require_officer},
    error::error_response,
    state::AppState,
    types::{ConversionResponse, PlaceBidRequest, RescoreResponse},
};
use crate::domain::{CompetitiveFilter, Loan, LoanId};
use crate::engine::{CompetitiveLoan, CreatedLoan, GuaranteedDashboard, LoanIntake};
use crate::ledger::{ClaimedLoan, PlacedBid};

/// POST /api/loans
pub async fn create_loan(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(intake): Json<LoanIntake>,
) -> std::result::Result<(StatusCode, Json<CreatedLoan>), (StatusCode, String)> {
    require_admin(&state, &headers).await?;
    let created = state
        .intake
        .create_loan(intake)
        .await
        .map_err(error_response)?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /api/loans/:id
pub async fn get_loan(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(loan_id): Path<LoanId>,
) -> std::result::Result<Json<Loan>, (StatusCode, String)> {
    authenticate(&state, &headers).await?;
    let loan = state.bidding.loan(loan_id).await.map_err(error_response)?;
    Ok(Json(loan))
}

/// GET /api/loans/competitive
pub async fn get_competitive_loans(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(filter): Query<CompetitiveFilter>,
) -> std::result::Result<Json<Vec<CompetitiveLoan>>, (StatusCode, String)> {
    let officer = require_officer(&state, &headers).await?;
    let loans = state
        .bidding
        .competitive_loans(Some(officer.id), &filter)
        .await
        .map_err(error_response)?;
    Ok(Json(loans))
}

/// GET /api/loans/guaranteed
pub async fn get_guaranteed_dashboard(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> std::result::Result<Json<GuaranteedDashboard>, (StatusCode, String)> {
    let officer = require_officer(&state, &headers).await?;
    let dashboard = state
        .allocation
        .guaranteed_dashboard(officer.id)
        .await
        .map_err(error_response)?;
    Ok(Json(dashboard))
}

/// GET /api/loans/won
pub async fn get_won_loans(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> std::result::Result<Json<Vec<Loan>>, (StatusCode, String)> {
    let officer = require_officer(&state, &headers).await?;
    let loans = state
        .bidding
        .won_loans(officer.id)
        .await
        .map_err(error_response)?;
    Ok(Json(loans))
}

/// POST /api/loans/:id/bids
pub async fn place_bid(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(loan_id): Path<LoanId>,
    Json(req): Json<PlaceBidRequest>,
) -> std::result::Result<(StatusCode, Json<PlacedBid>), (StatusCode, String)> {
    let officer = require_officer(&state, &headers).await?;
    let placed = state
        .bidding
        .place_bid(loan_id, officer.id, req.rate)
        .await
        .map_err(error_response)?;
    Ok((StatusCode::CREATED, Json(placed)))
}

/// POST /api/loans/:id/claim
pub async fn claim_loan(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(loan_id): Path<LoanId>,
) -> std::result::Result<Json<ClaimedLoan>, (StatusCode, String)> {
    let officer = require_officer(&state, &headers).await?;
    let claimed = state
        .allocation
        .assign_to_guaranteed_pool(loan_id, officer.id)
        .await
        .map_err(error_response)?;
    Ok(Json(claimed))
}

/// POST /api/loans/:id/convert
pub async fn convert_loan(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(loan_id): Path<LoanId>,
) -> std::result::Result<Json<ConversionResponse>, (StatusCode, String)> {
    require_admin(&state, &headers).await?;
    let converted = state
        .allocation
        .convert_to_competitive(loan_id)
        .await
        .map_err(error_response)?;
    Ok(Json(ConversionResponse { loan_id, converted }))
}

/// POST /api/loans/:id/rescore
pub async fn rescore_loan(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(loan_id): Path<LoanId>,
) -> std::result::Result<Json<RescoreResponse>, (StatusCode, String)> {
    require_admin(&state, &headers).await?;
    let routing_score = state
        .allocation
        .rescore(loan_id)
        .await
        .map_err(error_response)?;
    Ok(Json(RescoreResponse {
        loan_id,
        routing_score,
    }))
}
