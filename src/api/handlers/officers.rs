use axum::{extract::State, http::HeaderMap, http::StatusCode, Json};

use crate::api::{auth::require_officer, error::error_response, state::AppState};
use crate::domain::OfficerMetrics;

/// GET /api/officers/me/metrics
pub async fn get_my_metrics(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> std::result::Result<Json<OfficerMetrics>, (StatusCode, String)> {
    let officer = require_officer(&state, &headers).await?;
    let metrics = state
        .bidding
        .metrics(officer.id)
        .await
        .map_err(error_response)?;
    Ok(Json(metrics))
}
