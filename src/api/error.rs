use axum::http::StatusCode;
use tracing::error;

use crate::error::MarketError;

/// Map a marketplace error onto the HTTP status handlers return.
///
/// Infrastructure failures are logged here and reach the client only as a
/// generic message.
pub fn error_response(err: MarketError) -> (StatusCode, String) {
    let status = match &err {
        MarketError::InvalidBid(_) | MarketError::Validation(_) => StatusCode::BAD_REQUEST,
        MarketError::LoanUnavailable(_)
        | MarketError::AlreadyAssigned { .. }
        | MarketError::AlreadyClosed { .. }
        | MarketError::NoCreditsAvailable => StatusCode::CONFLICT,
        MarketError::NotAuthorized(_) => StatusCode::FORBIDDEN,
        MarketError::Auth(_) => StatusCode::UNAUTHORIZED,
        MarketError::NotFound { .. } => StatusCode::NOT_FOUND,
        _ => {
            error!("request failed: {}", err);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal server error".to_string(),
            );
        }
    };
    (status, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_violations_map_to_client_statuses() {
        let cases = [
            (MarketError::InvalidBid("x".into()), StatusCode::BAD_REQUEST),
            (MarketError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (MarketError::LoanUnavailable("x".into()), StatusCode::CONFLICT),
            (MarketError::NoCreditsAvailable, StatusCode::CONFLICT),
            (MarketError::AlreadyAssigned { loan_id: 1 }, StatusCode::CONFLICT),
            (MarketError::AlreadyClosed { loan_id: 1 }, StatusCode::CONFLICT),
            (MarketError::NotAuthorized("x".into()), StatusCode::FORBIDDEN),
            (MarketError::Auth("x".into()), StatusCode::UNAUTHORIZED),
            (MarketError::not_found("loan", 9), StatusCode::NOT_FOUND),
        ];
        for (err, status) in cases {
            assert!(err.is_client_error());
            assert_eq!(error_response(err).0, status);
        }
    }

    #[test]
    fn internal_errors_hide_details() {
        let (status, body) = error_response(MarketError::Internal("pool exhausted".into()));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!body.contains("pool"));
    }
}
