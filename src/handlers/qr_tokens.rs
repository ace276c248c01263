//! QR token HTTP handlers.
//!
//! - POST /api/v1/worksites/:business_id/qr-tokens - Issue a token (manager only)
//! - POST /api/v1/qr-tokens/verify - Verify and consume a token

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use crate::{
    error::AppError,
    middleware::auth::AuthContext,
    models::qr_token::{IssueTokenRequest, TokenVerification, VerifyTokenRequest},
    state::AppState,
};

/// Issue a signed QR token for a worksite.
///
/// # Request Body (optional)
///
/// ```json
/// { "ttl_secs": 60 }
/// ```
///
/// # Response
///
/// - **Success (201 Created)**: `{ "token", "business_id", "issued_at", "expires_at", "active_tokens" }`
/// - **Error (403)**: caller is not the worksite's manager
/// - **Error (404)**: `WORKSITE_NOT_FOUND`
/// - **Error (429)**: `TOKEN_QUOTA_EXCEEDED`
pub async fn issue_token(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(business_id): Path<Uuid>,
    request: Option<Json<IssueTokenRequest>>,
) -> Result<impl IntoResponse, AppError> {
    let worksite = state
        .worksites
        .get(business_id)
        .await?
        .ok_or(AppError::WorksiteNotFound)?;

    if worksite.manager_id != auth.user_id {
        tracing::warn!(user_id = %auth.user_id, %business_id, "Rejected QR token issuance by non-manager");
        return Err(AppError::Forbidden(
            "Only the worksite manager may issue QR tokens".to_string(),
        ));
    }

    let ttl_secs = request.and_then(|Json(r)| r.ttl_secs);
    let issued = state.issuer.issue(business_id, ttl_secs).await?;

    Ok((StatusCode::CREATED, Json(issued)))
}

/// Verify a token, consuming it on success.
///
/// Always answers 200 with a report; a rejected token carries its reason:
///
/// ```json
/// { "valid": false, "business_id": null, "reason": "TOKEN_ALREADY_USED" }
/// ```
pub async fn verify_token(
    State(state): State<AppState>,
    Json(request): Json<VerifyTokenRequest>,
) -> Result<Json<TokenVerification>, AppError> {
    Ok(Json(state.verifier.check(&request.token).await?))
}
