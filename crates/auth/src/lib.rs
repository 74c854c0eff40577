//! Signed session tokens. A token names the tenant and user it was minted
//! for; the role is only a hint and callers reload it from storage.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use shared::domain::{Role, TenantId, UserId};

const ISSUER: &str = "okr-server";

#[derive(Debug, Clone)]
pub struct TokenConfig {
    pub secret: String,
    pub ttl_seconds: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub iss: String,
    pub sub: String,
    pub tenant: i64,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionIdentity {
    pub tenant_id: TenantId,
    pub user_id: UserId,
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("session token expired")]
    Expired,
    #[error("session token is invalid: {0}")]
    Invalid(String),
}

pub fn mint_token(
    cfg: &TokenConfig,
    tenant_id: TenantId,
    user_id: UserId,
    role: Role,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now();
    let exp = now + Duration::seconds(cfg.ttl_seconds);
    let claims = Claims {
        iss: ISSUER.to_string(),
        sub: format!("user:{}", user_id.0),
        tenant: tenant_id.0,
        role,
        iat: now.timestamp(),
        exp: exp.timestamp(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(cfg.secret.as_bytes()),
    )
}

pub fn verify_token(cfg: &TokenConfig, token: &str) -> Result<SessionIdentity, TokenError> {
    let mut validation = Validation::default();
    validation.set_issuer(&[ISSUER]);
    validation.leeway = 0;

    let decoded = decode::<Claims>(
        token,
        &DecodingKey::from_secret(cfg.secret.as_bytes()),
        &validation,
    )
    .map_err(|err| match err.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => TokenError::Expired,
        _ => TokenError::Invalid(err.to_string()),
    })?;

    let user_id = decoded
        .claims
        .sub
        .strip_prefix("user:")
        .and_then(|raw| raw.parse::<i64>().ok())
        .ok_or_else(|| TokenError::Invalid("malformed subject".to_string()))?;

    Ok(SessionIdentity {
        tenant_id: TenantId(decoded.claims.tenant),
        user_id: UserId(user_id),
    })
}

#[cfg(test)]
#[path = "tests/auth_tests.rs"]
mod tests;
