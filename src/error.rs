use thiserror::Error;

/// Main error type for the marketplace
#[derive(Error, Debug)]
pub enum MarketError {
    // Bidding / allocation rule violations
    #[error("Invalid bid: {0}")]
    InvalidBid(String),

    #[error("Loan unavailable: {0}")]
    LoanUnavailable(String),

    #[error("No guaranteed credits available")]
    NoCreditsAvailable,

    #[error("Loan {loan_id} is already assigned to a guaranteed pool")]
    AlreadyAssigned { loan_id: i64 },

    #[error("Loan {loan_id} is already closed")]
    AlreadyClosed { loan_id: i64 },

    // Authorization errors
    #[error("Not authorized: {0}")]
    NotAuthorized(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl MarketError {
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        MarketError::NotFound { entity, id }
    }

    /// True for errors caused by the caller's request rather than by the system.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            MarketError::InvalidBid(_)
                | MarketError::LoanUnavailable(_)
                | MarketError::NoCreditsAvailable
                | MarketError::AlreadyAssigned { .. }
                | MarketError::AlreadyClosed { .. }
                | MarketError::NotAuthorized(_)
                | MarketError::Auth(_)
                | MarketError::NotFound { .. }
                | MarketError::Validation(_)
        )
    }
}

/// Result type alias for MarketError
pub type Result<T> = std::result::Result<T, MarketError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_violations_render_user_facing_reasons() {
        let err = MarketError::InvalidBid("bid must be lower than current lowest rate".into());
        assert_eq!(
            err.to_string(),
            "Invalid bid: bid must be lower than current lowest rate"
        );
        assert_eq!(
            MarketError::not_found("loan", 7).to_string(),
            "loan 7 not found"
        );
    }

    #[test]
    fn infrastructure_errors_are_not_client_errors() {
        assert!(MarketError::NoCreditsAvailable.is_client_error());
        assert!(MarketError::AlreadyClosed { loan_id: 1 }.is_client_error());
        assert!(!MarketError::Internal("boom".into()).is_client_error());
        assert!(!MarketError::Database(sqlx::Error::RowNotFound).is_client_error());
    }
}
