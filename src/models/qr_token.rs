//! QR token payload and API request/response types.
//!
//! A QR token is a signed, short-lived capability proving the holder was
//! shown the code at the worksite. It is never stored as a row; only its
//! nonce is recorded once consumed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The signed fields of a token.
///
/// Field order here is alphabetical so that the JSON serialization is the
/// canonical form fed to the MAC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPayload {
    pub business_id: Uuid,
    /// Milliseconds since the Unix epoch
    pub expires_at: i64,
    /// Milliseconds since the Unix epoch
    pub issued_at: i64,
    /// 128-bit random value, 32 lowercase hex characters
    pub nonce: String,
}

/// Transport form of a token before base64url encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenEnvelope {
    /// Signing key identifier; not covered by the signature
    pub kid: String,
    #[serde(flatten)]
    pub payload: TokenPayload,
    /// Hex-encoded HMAC-SHA256
    pub signature: String,
}

/// Result of a successful issuance.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedToken {
    pub token: String,
    pub business_id: Uuid,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Unexpired tokens for the worksite, this one included
    pub active_tokens: u32,
}

/// A token that passed every verification step and is now consumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedToken {
    pub business_id: Uuid,
    pub nonce: String,
    pub expires_at: DateTime<Utc>,
}

/// Request body for `POST /api/v1/worksites/{business_id}/qr-tokens`.
///
/// ```json
/// { "ttl_secs": 60 }
/// ```
#[derive(Debug, Default, Deserialize)]
pub struct IssueTokenRequest {
    /// Lifetime in seconds (10..=300); the configured default when absent
    pub ttl_secs: Option<i64>,
}

/// Request body for `POST /api/v1/qr-tokens/verify`.
#[derive(Debug, Deserialize)]
pub struct VerifyTokenRequest {
    pub token: String,
}

/// Verification outcome as reported to clients.
///
/// ```json
/// { "valid": false, "business_id": null, "reason": "TOKEN_EXPIRED" }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenVerification {
    pub valid: bool,
    pub business_id: Option<Uuid>,
    pub reason: Option<&'static str>,
}
