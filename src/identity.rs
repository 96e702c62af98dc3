//! Bearer-token identity
//!
//! Tokens are `user_id.ROLE.signature`, where the signature is the hex
//! HMAC-SHA256 of `user_id.ROLE` under the configured secret.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::UserId;
use crate::error::{MarketError, Result};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    LoanOfficer,
    Borrower,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "ADMIN",
            Self::LoanOfficer => "LOAN_OFFICER",
            Self::Borrower => "BORROWER",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for Role {
    type Error = String;

    fn try_from(raw: &str) -> std::result::Result<Self, Self::Error> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "ADMIN" => Ok(Self::Admin),
            "LOAN_OFFICER" | "OFFICER" => Ok(Self::LoanOfficer),
            "BORROWER" => Ok(Self::Borrower),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Authenticated caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: UserId,
    pub role: Role,
}

impl Identity {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Resolves bearer tokens to identities
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn resolve(&self, token: &str) -> Result<Identity>;
}

/// Short SHA-256 fingerprint safe to put in logs
pub fn token_fingerprint(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..12].to_string()
}

/// Verifies tokens signed with a shared secret
#[derive(Clone)]
pub struct HmacIdentityProvider {
    secret: Vec<u8>,
}

impl HmacIdentityProvider {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
        }
    }

    fn mac(&self, payload: &str) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| MarketError::Internal(format!("HMAC init failed: {e}")))?;
        mac.update(payload.as_bytes());
        Ok(mac)
    }

    pub fn issue_token(&self, user_id: UserId, role: Role) -> Result<String> {
        let payload = format!("{user_id}.{}", role.as_str());
        let signature = hex::encode(self.mac(&payload)?.finalize().into_bytes());
        Ok(format!("{payload}.{signature}"))
    }

    pub fn verify(&self, token: &str) -> Result<Identity> {
        let invalid = || MarketError::Auth("invalid token".to_string());

        let (payload, signature) = token.trim().rsplit_once('.').ok_or_else(invalid)?;
        let (user_raw, role_raw) = payload.split_once('.').ok_or_else(invalid)?;
        let signature = hex::decode(signature).map_err(|_| invalid())?;
        self.mac(payload)?
            .verify_slice(&signature)
            .map_err(|_| invalid())?;

        let user_id = user_raw.parse::<UserId>().map_err(|_| invalid())?;
        let role = Role::try_from(role_raw).map_err(|_| invalid())?;
        Ok(Identity { user_id, role })
    }
}

#[async_trait]
impl IdentityProvider for HmacIdentityProvider {
    async fn resolve(&self, token: &str) -> Result<Identity> {
        self.verify(token)
    }
}
