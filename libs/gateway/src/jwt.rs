//! Access token claims
//!
//! The client never holds the backend's signing secret, so tokens are only
//! decoded to read their claims (subject, expiry). The backend verifies them
//! on every request. The in-memory backend signs its own tokens with HS256.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use common::{GatewayError, GatewayResult};

/// Claims carried by an access token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// User ID
    pub sub: Uuid,
    #[serde(default)]
    pub email: Option<String>,
    /// Backend role of the token ("authenticated" for signed-in users)
    #[serde(default)]
    pub role: Option<String>,
    /// Issued at time
    pub iat: u64,
    /// Expiration time
    pub exp: u64,
}

/// Read the claims of a token without verifying its signature or expiry
pub fn decode_unverified(token: &str) -> GatewayResult<AccessClaims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let data = decode::<AccessClaims>(token, &DecodingKey::from_secret(&[]), &validation)
        .map_err(|e| GatewayError::invalid("access_token", e.to_string()))?;
    Ok(data.claims)
}

/// Verify a token signed with `secret`, including its expiry
pub fn verify(token: &str, secret: &[u8]) -> GatewayResult<AccessClaims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_aud = false;
    validation.leeway = 0;

    decode::<AccessClaims>(token, &DecodingKey::from_secret(secret), &validation)
        .map(|data| data.claims)
        .map_err(|_| GatewayError::AuthenticationRequired)
}

/// Sign claims with an HS256 secret
pub fn issue(claims: &AccessClaims, secret: &[u8]) -> GatewayResult<String> {
    encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret),
    )
    .map_err(|e| GatewayError::Unknown(format!("Failed to sign token: {}", e)))
}
