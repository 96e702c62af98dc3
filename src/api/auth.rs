use axum::http::{header::AUTHORIZATION, HeaderMap, StatusCode};
use tracing::warn;

use crate::api::error::error_response;
use crate::api::state::AppState;
use crate::domain::OfficerProfile;
use crate::error::MarketError;
use crate::identity::{token_fingerprint, Identity};

fn extract_bearer_token(raw: &str) -> Option<&str> {
    raw.strip_prefix("Bearer ")
        .or_else(|| raw.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Resolve the `Authorization: Bearer` header to an identity.
pub async fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
) -> std::result::Result<Identity, (StatusCode, String)> {
    let Some(token) = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(extract_bearer_token)
    else {
        return Err((
            StatusCode::UNAUTHORIZED,
            "missing bearer token".to_string(),
        ));
    };

    state.identities.resolve(token).await.map_err(|e| {
        warn!(token_fp = %token_fingerprint(token), "bearer authentication failed: {}", e);
        (StatusCode::UNAUTHORIZED, "invalid token".to_string())
    })
}

pub fn ensure_admin(identity: &Identity) -> std::result::Result<(), (StatusCode, String)> {
    if identity.is_admin() {
        Ok(())
    } else {
        Err((
            StatusCode::FORBIDDEN,
            "administrator role required".to_string(),
        ))
    }
}

/// Authenticate and load the caller's active officer profile.
pub async fn require_officer(
    state: &AppState,
    headers: &HeaderMap,
) -> std::result::Result<OfficerProfile, (StatusCode, String)> {
    let identity = authenticate(state, headers).await?;
    let officer = state
        .ledger
        .officer_by_user(identity.user_id)
        .await
        .map_err(error_response)?
        .ok_or_else(|| {
            error_response(MarketError::NotAuthorized(
                "loan officer profile required".to_string(),
            ))
        })?;
    if !officer.is_active {
        return Err(error_response(MarketError::NotAuthorized(
            "officer account is not active".to_string(),
        )));
    }
    Ok(officer)
}

/// Authenticate and require the administrator role.
pub async fn require_admin(
    state: &AppState,
    headers: &HeaderMap,
) -> std::result::Result<Identity, (StatusCode, String)> {
    let identity = authenticate(state, headers).await?;
    ensure_admin(&identity)?;
    Ok(identity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_prefix_is_required() {
        assert_eq!(extract_bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(extract_bearer_token("bearer  abc "), Some("abc"));
        assert_eq!(extract_bearer_token("Basic abc"), None);
        assert_eq!(extract_bearer_token("Bearer "), None);
    }
}
