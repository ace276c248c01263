//! API key authentication middleware.
//!
//! This middleware intercepts every protected request to:
//! 1. Extract the API key from the Authorization header
//! 2. Hash it and look up the active key it belongs to
//! 3. Inject the caller's identity into the request
//! 4. Reject unauthorized requests with HTTP 401

use crate::{db::DbPool, error::AppError, models::api_key::ApiKey};
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Identity of the authenticated caller.
///
/// Inserted into the request's extensions; handlers extract it with
/// `Extension<AuthContext>`. Attendance operations always act on
/// `user_id`, never on an id taken from the request body.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// Worker or manager the key belongs to
    pub user_id: Uuid,

    pub display_name: String,
}

/// SHA-256 of the presented key, hex encoded as stored in `api_keys`.
pub fn hash_api_key(api_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(api_key.as_bytes());
    hex::encode(hasher.finalize())
}

/// API key authentication middleware function.
///
/// # Flow
///
/// 1. Extract `Authorization: Bearer <key>` header from request
/// 2. Hash the `<key>` using SHA-256
/// 3. Query database for matching hash where `is_active = true`
/// 4. If found: inject `AuthContext` into request, call next handler
/// 5. If not found: return 401 `INVALID_API_KEY`
///
/// The header is checked before any database access, so a request without
/// credentials never touches the pool.
pub async fn auth_middleware(
    State(pool): State<DbPool>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let api_key = request
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .ok_or(AppError::InvalidApiKey)?;

    let key_hash = hash_api_key(api_key);

    let api_key_record = sqlx::query_as::<_, ApiKey>(
        "SELECT id, key_hash, user_id, display_name, created_at, is_active
         FROM api_keys
         WHERE key_hash = $1 AND is_active = true",
    )
    .bind(&key_hash)
    .fetch_optional(&pool)
    .await?
    .ok_or(AppError::InvalidApiKey)?;

    tracing::debug!(user_id = %api_key_record.user_id, key_id = %api_key_record.id, "Authenticated request");

    request.extensions_mut().insert(AuthContext {
        user_id: api_key_record.user_id,
        display_name: api_key_record.display_name,
    });

    Ok(next.run(request).await)
}
