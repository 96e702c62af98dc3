use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};

use crate::api::{
    handlers,
    state::AppState,
    websocket::{bids_socket, notifications_socket},
};

pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health))
        // Loan endpoints
        .route("/api/loans", post(handlers::create_loan))
        .route("/api/loans/competitive", get(handlers::get_competitive_loans))
        .route("/api/loans/guaranteed", get(handlers::get_guaranteed_dashboard))
        .route("/api/loans/won", get(handlers::get_won_loans))
        .route("/api/loans/:id", get(handlers::get_loan))
        .route("/api/loans/:id/bids", post(handlers::place_bid))
        .route("/api/loans/:id/claim", post(handlers::claim_loan))
        .route("/api/loans/:id/convert", post(handlers::convert_loan))
        .route("/api/loans/:id/rescore", post(handlers::rescore_loan))
        // Bid endpoints
        .route("/api/bids/history", get(handlers::get_bid_history))
        .route("/api/bids/:id/accept", post(handlers::accept_bid))
        // Officer endpoints
        .route("/api/officers/me/metrics", get(handlers::get_my_metrics))
        // Notification endpoints
        .route("/api/notifications", get(handlers::list_notifications))
        .route(
            "/api/notifications/preferences",
            get(handlers::get_preferences).put(handlers::update_preferences),
        )
        .route(
            "/api/notifications/read-all",
            post(handlers::mark_all_notifications_read),
        )
        .route(
            "/api/notifications/:id/read",
            post(handlers::mark_notification_read),
        )
        // WebSocket endpoints
        .route("/ws/bids", get(bids_socket))
        .route("/ws/notifications", get(notifications_socket))
        // Add state and CORS
        .with_state(state)
        .layer(cors)
}
