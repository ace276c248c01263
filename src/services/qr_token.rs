//! QR token issuance and verification.
//!
//! A token is a base64url-encoded JSON envelope:
//!
//! ```json
//! {
//!   "kid": "k1",
//!   "business_id": "550e8400-e29b-41d4-a716-446655440000",
//!   "expires_at": 1740992430000,
//!   "issued_at": 1740992400000,
//!   "nonce": "9f86d081884c7d659a2feaa0c55ad015",
//!   "signature": "<hex HMAC-SHA256>"
//! }
//! ```
//!
//! The signature covers the canonical serialization of the four payload
//! fields (see [`canonicalize`]). `kid` selects the verification key and is
//! not signed; naming the wrong key simply fails the signature check.
//!
//! # Verification Order
//!
//! 1. Decode (malformed)
//! 2. Expiry, inclusive of `expires_at` (expired)
//! 3. Constant-time signature comparison (invalid signature)
//! 4. Worksite match, when verifying for a check-in (business mismatch)
//! 5. Atomic consume in the replay store (already used)
//!
//! Steps 1-4 never touch storage, so a rejected token is not burned.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{AppError, TokenError};
use crate::models::qr_token::{
    IssuedToken, TokenEnvelope, TokenPayload, TokenVerification, VerifiedToken,
};
use crate::store::{ReplayStore, TokenQuota};

type HmacSha256 = Hmac<Sha256>;

pub const MIN_TOKEN_TTL_SECS: i64 = 10;
pub const MAX_TOKEN_TTL_SECS: i64 = 300;
pub const DEFAULT_TOKEN_TTL_SECS: i64 = 30;

const NONCE_BYTES: usize = 16;
const SIGNATURE_HEX_LEN: usize = 64;

/// Upper bound on encoded token length accepted by [`decode`].
pub const MAX_ENCODED_TOKEN_LEN: usize = 1024;

/// An HMAC key and the identifier embedded in tokens signed with it.
#[derive(Clone)]
pub struct SigningKey {
    id: String,
    secret: Vec<u8>,
}

impl SigningKey {
    pub fn new(id: impl Into<String>, secret: impl Into<Vec<u8>>) -> Self {
        Self {
            id: id.into(),
            secret: secret.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    fn mac(&self, payload: &TokenPayload) -> HmacSha256 {
        let mut mac = HmacSha256::new_from_slice(&self.secret).expect("HMAC key length is valid");
        mac.update(canonicalize(payload).as_bytes());
        mac
    }
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Current signing key plus an optional previous key still accepted for
/// verification while tokens signed with it may be in circulation.
#[derive(Debug, Clone)]
pub struct SigningKeys {
    current: SigningKey,
    previous: Option<SigningKey>,
}

impl SigningKeys {
    pub fn new(current: SigningKey, previous: Option<SigningKey>) -> Self {
        Self { current, previous }
    }

    pub fn current(&self) -> &SigningKey {
        &self.current
    }

    pub fn find(&self, kid: &str) -> Option<&SigningKey> {
        if self.current.id == kid {
            return Some(&self.current);
        }
        self.previous.as_ref().filter(|k| k.id == kid)
    }
}

/// Canonical byte form of a payload: compact JSON, keys in lexicographic
/// order.
///
/// Built by hand so the MAC input never depends on serializer settings.
/// The nonce is checked to be hex before any token reaches this point.
pub fn canonicalize(payload: &TokenPayload) -> String {
    format!(
        r#"{{"business_id":"{}","expires_at":{},"issued_at":{},"nonce":"{}"}}"#,
        payload.business_id, payload.expires_at, payload.issued_at, payload.nonce
    )
}

/// Hex-encoded HMAC-SHA256 of the canonical payload.
pub fn sign(key: &SigningKey, payload: &TokenPayload) -> String {
    hex::encode(key.mac(payload).finalize().into_bytes())
}

/// Encode an envelope into its transport string.
pub fn encode(envelope: &TokenEnvelope) -> String {
    let json = serde_json::to_vec(envelope).expect("token envelope serializes to JSON");
    URL_SAFE_NO_PAD.encode(json)
}

fn is_lower_hex(s: &str, len: usize) -> bool {
    s.len() == len && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Decode a transport string back into an envelope.
///
/// # Errors
///
/// `TokenError::Malformed` for oversize input, bad base64, bad JSON, a
/// missing field, a nonce or signature that is not lowercase hex of the
/// right length, or an expiry before the issue time.
pub fn decode(token: &str) -> Result<TokenEnvelope, TokenError> {
    let token = token.trim();
    if token.is_empty() || token.len() > MAX_ENCODED_TOKEN_LEN {
        return Err(TokenError::Malformed);
    }

    let bytes = URL_SAFE_NO_PAD
        .decode(token)
        .map_err(|_| TokenError::Malformed)?;
    let envelope: TokenEnvelope =
        serde_json::from_slice(&bytes).map_err(|_| TokenError::Malformed)?;

    if !is_lower_hex(&envelope.payload.nonce, NONCE_BYTES * 2)
        || !is_lower_hex(&envelope.signature, SIGNATURE_HEX_LEN)
        || envelope.payload.expires_at < envelope.payload.issued_at
    {
        return Err(TokenError::Malformed);
    }
    Ok(envelope)
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, AppError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| AppError::Validation(format!("Timestamp {} is out of range", ms)))
}

/// Creates signed tokens for worksites, bounded by a per-worksite quota.
pub struct TokenIssuer {
    keys: SigningKeys,
    quota: Arc<dyn TokenQuota>,
    clock: Arc<dyn Clock>,
    default_ttl_secs: i64,
    max_active: u32,
}

impl TokenIssuer {
    pub fn new(
        keys: SigningKeys,
        quota: Arc<dyn TokenQuota>,
        clock: Arc<dyn Clock>,
        default_ttl_secs: i64,
        max_active: u32,
    ) -> Self {
        Self {
            keys,
            quota,
            clock,
            default_ttl_secs,
            max_active,
        }
    }

    /// Issue a token for `business_id` valid for `ttl_secs` (or the default).
    ///
    /// # Errors
    ///
    /// - `Validation`: TTL outside 10..=300 seconds
    /// - `TokenQuotaExceeded`: the worksite already has the maximum number of
    ///   unexpired tokens
    /// - `Database`: quota store failure
    pub async fn issue(
        &self,
        business_id: Uuid,
        ttl_secs: Option<i64>,
    ) -> Result<IssuedToken, AppError> {
        let ttl_secs = ttl_secs.unwrap_or(self.default_ttl_secs);
        if !(MIN_TOKEN_TTL_SECS..=MAX_TOKEN_TTL_SECS).contains(&ttl_secs) {
            return Err(AppError::Validation(format!(
                "Token lifetime must be between {} and {} seconds, got {}",
                MIN_TOKEN_TTL_SECS, MAX_TOKEN_TTL_SECS, ttl_secs
            )));
        }

        let now = self.clock.now();
        let issued_at = now.timestamp_millis();
        let expires_at = issued_at + ttl_secs * 1000;

        let nonce_bytes: [u8; NONCE_BYTES] = rand::random();
        let payload = TokenPayload {
            business_id,
            expires_at,
            issued_at,
            nonce: hex::encode(nonce_bytes),
        };

        let reserved = self
            .quota
            .try_reserve(
                business_id,
                &payload.nonce,
                from_millis(expires_at)?,
                now,
                self.max_active,
            )
            .await?;
        if !reserved {
            tracing::warn!(%business_id, limit = self.max_active, "QR token quota exhausted");
            return Err(AppError::TokenQuotaExceeded {
                limit: self.max_active,
            });
        }

        let key = self.keys.current();
        let envelope = TokenEnvelope {
            kid: key.id().to_string(),
            signature: sign(key, &payload),
            payload,
        };

        let active_tokens = self.quota.active_count(business_id, now).await?;
        tracing::info!(%business_id, ttl_secs, active_tokens, "Issued QR token");

        Ok(IssuedToken {
            token: encode(&envelope),
            business_id,
            issued_at: from_millis(issued_at)?,
            expires_at: from_millis(expires_at)?,
            active_tokens,
        })
    }
}

/// Verifies tokens and consumes them through the replay store.
pub struct TokenVerifier {
    keys: SigningKeys,
    replay: Arc<dyn ReplayStore>,
    clock: Arc<dyn Clock>,
}

impl TokenVerifier {
    pub fn new(keys: SigningKeys, replay: Arc<dyn ReplayStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            keys,
            replay,
            clock,
        }
    }

    /// Decode, check expiry and check the signature. No side effects.
    fn authenticate(&self, token: &str, now: DateTime<Utc>) -> Result<TokenEnvelope, TokenError> {
        let envelope = decode(token)?;

        if now.timestamp_millis() > envelope.payload.expires_at {
            tracing::debug!(business_id = %envelope.payload.business_id, "Rejected expired QR token");
            return Err(TokenError::Expired);
        }

        let key = self.keys.find(&envelope.kid).ok_or_else(|| {
            tracing::warn!(kid = %envelope.kid, "QR token names an unknown signing key");
            TokenError::InvalidSignature
        })?;

        let expected = hex::decode(&envelope.signature).map_err(|_| TokenError::Malformed)?;
        // verify_slice compares in constant time.
        key.mac(&envelope.payload)
            .verify_slice(&expected)
            .map_err(|_| {
                tracing::warn!(business_id = %envelope.payload.business_id, "QR token signature mismatch");
                TokenError::InvalidSignature
            })?;

        Ok(envelope)
    }

    /// Mark the token's nonce as used; fails if it already was.
    async fn consume(
        &self,
        envelope: TokenEnvelope,
        now: DateTime<Utc>,
    ) -> Result<VerifiedToken, AppError> {
        let payload = envelope.payload;
        // Keep the mark for at least the token's full lifetime.
        let ttl = Duration::milliseconds(payload.expires_at - payload.issued_at)
            .max(Duration::seconds(1));

        if !self.replay.check_and_mark(&payload.nonce, ttl, now).await? {
            tracing::warn!(business_id = %payload.business_id, "Replayed QR token rejected");
            return Err(TokenError::AlreadyUsed.into());
        }

        Ok(VerifiedToken {
            business_id: payload.business_id,
            expires_at: from_millis(payload.expires_at)?,
            nonce: payload.nonce,
        })
    }

    /// Verify and consume a token.
    ///
    /// # Errors
    ///
    /// - `Token(_)`: malformed, expired, bad signature or already used
    /// - `Database`: replay store failure
    pub async fn verify(&self, token: &str) -> Result<VerifiedToken, AppError> {
        let now = self.clock.now();
        let envelope = self.authenticate(token, now)?;
        self.consume(envelope, now).await
    }

    /// Verify a token presented for `business_id` and consume it.
    ///
    /// A genuine token for another worksite is rejected with
    /// `BusinessMismatch` and left unconsumed.
    pub async fn verify_for_business(
        &self,
        token: &str,
        business_id: Uuid,
    ) -> Result<VerifiedToken, AppError> {
        let now = self.clock.now();
        let envelope = self.authenticate(token, now)?;
        if envelope.payload.business_id != business_id {
            tracing::warn!(
                token_business = %envelope.payload.business_id,
                requested_business = %business_id,
                "QR token presented at the wrong worksite"
            );
            return Err(TokenError::BusinessMismatch.into());
        }
        self.consume(envelope, now).await
    }

    /// Verification outcome as a report instead of an error.
    ///
    /// Storage failures are still returned as errors.
    pub async fn check(&self, token: &str) -> Result<TokenVerification, AppError> {
        match self.verify(token).await {
            Ok(verified) => Ok(TokenVerification {
                valid: true,
                business_id: Some(verified.business_id),
                reason: None,
            }),
            Err(AppError::Token(reason)) => Ok(TokenVerification {
                valid: false,
                business_id: None,
                reason: Some(reason.code()),
            }),
            Err(e) => Err(e),
        }
    }
}
