//! Local structural validation of the auth credential.
//!
//! A cheap, non-cryptographic precheck before any transport connection: a
//! credential that is not even well-formed, or whose `exp` is in the past,
//! cannot possibly authenticate, so the round trip is skipped. Signature
//! verification stays a server concern.

use crate::{RelayError, RelayResult};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;

/// Seconds of remaining validity under which the credential is treated as
/// already expired, so a handshake does not race the expiry.
const EXPIRY_MARGIN_SECS: i64 = 60;

/// Claims the engine cares about.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenClaims {
    /// Subject (user id).
    pub sub: String,
    /// Expiry as a unix timestamp.
    pub exp: i64,
    #[serde(default)]
    pub company_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// Validate the credential's structure and expiry against `now` (unix
/// seconds).
pub fn validate_token(token: &str, now: i64) -> RelayResult<TokenClaims> {
    let mut segments = token.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(RelayError::AuthExpired(
            "credential is not a three-segment token".to_string(),
        ));
    };

    let claims_bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| RelayError::AuthExpired(format!("claims segment is not base64url: {e}")))?;

    let claims: TokenClaims = serde_json::from_slice(&claims_bytes)
        .map_err(|e| RelayError::AuthExpired(format!("claims are not valid JSON: {e}")))?;

    if claims.exp - now < EXPIRY_MARGIN_SECS {
        return Err(RelayError::AuthExpired(format!(
            "credential expired at {} (now {})",
            claims.exp, now
        )));
    }

    Ok(claims)
}
