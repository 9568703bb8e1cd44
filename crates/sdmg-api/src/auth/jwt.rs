// Dashboard JWT verification
//
// Access tokens are HS256, minted by the control plane with a unique jti.
// Verification here additionally consults the in-process revocation set so a
// logged-out token dies before its natural expiry.

use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use sdmg_core::{GatewayError, Result};

use super::revocation::RevocationSet;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: Uuid,
    /// Token id, the revocation handle
    pub jti: Uuid,
    pub iat: i64,
    pub exp: i64,
}

/// Mint an access token. The control plane owns issuance; kept here for
/// parity with `verify` and for tests.
#[allow(dead_code)]
pub fn issue(secret: &str, user_id: Uuid, lifetime: std::time::Duration) -> Result<String> {
    let now = Utc::now().timestamp();
    let claims = Claims {
        sub: user_id,
        jti: Uuid::now_v7(),
        iat: now,
        exp: now + lifetime.as_secs() as i64,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| GatewayError::Internal(anyhow::anyhow!(e)))
}

/// Verify signature and expiry, then check the revocation set.
pub fn verify(secret: &str, token: &str, revocations: &RevocationSet) -> Result<Claims> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| GatewayError::unauthorized("Invalid or expired token"))?;

    if revocations.is_revoked(data.claims.jti) {
        return Err(GatewayError::unauthorized("Token has been revoked"));
    }
    Ok(data.claims)
}
