use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use tracing::warn;

use crate::api::{state::AppState, types::HealthResponse};

/// GET /health
///
/// 200 while the ledger answers, 503 otherwise.
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let database = match state.ledger.ping().await {
        Ok(()) => true,
        Err(e) => {
            warn!("health check: ledger unreachable: {}", e);
            false
        }
    };
    let status = if database {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(HealthResponse {
            status: if database { "ok" } else { "degraded" }.to_string(),
            database,
            connections: state.gateway.connection_count(),
            uptime_secs: (Utc::now() - state.start_time).num_seconds(),
        }),
    )
}
